//! Canonical scoring and ranking.
//!
//! Ranks the members of a duplicate group to recommend which item should
//! survive a merge. The weighted score deliberately covers only a minority
//! of the total judgment; the remainder is left to the reviewing human.
//! Ties break deterministically: score desc, completeness desc, most
//! recently modified desc, id asc.

use std::collections::BTreeSet;

use crate::config::ScoringConfig;
use crate::models::{Item, RankedMember};

/// Grade bands considered for coverage scoring.
const GRADE_BANDS: usize = 4;

/// Section headings whose presence marks a structurally complete lesson.
const STRUCTURE_SECTIONS: [&[&str]; 4] = [
    &["objective", "goals"],
    &["materials", "supplies"],
    &["procedure", "steps", "instructions"],
    &["assessment", "reflection"],
];

/// Completeness checklist: fraction of these fields that are non-empty.
fn completeness(item: &Item) -> f64 {
    let m = &item.metadata;
    let checks = [
        !item.title.trim().is_empty(),
        !item.body.trim().is_empty(),
        !m.grade_levels.is_empty(),
        !m.themes.is_empty(),
        !m.cultural_tags.is_empty(),
        !m.season_tags.is_empty(),
        !m.ingredients.is_empty(),
        !m.skills.is_empty(),
        !item.notes.trim().is_empty(),
    ];
    let filled = checks.iter().filter(|c| **c).count();
    filled as f64 / checks.len() as f64
}

/// Map a grade label ("K", "3", "K-2", "11") to its band index.
fn grade_band(label: &str) -> Option<usize> {
    let label = label.trim().to_lowercase();
    if label.is_empty() {
        return None;
    }
    if label == "k" || label == "pre-k" || label == "prek" {
        return Some(0);
    }
    // Band-shaped labels like "3-5" count by their starting grade.
    let first = label.split(['-', '–']).next().unwrap_or(&label);
    if first == "k" {
        return Some(0);
    }
    match first.parse::<u8>() {
        Ok(g) if g <= 2 => Some(0),
        Ok(g) if g <= 5 => Some(1),
        Ok(g) if g <= 8 => Some(2),
        Ok(g) if g <= 12 => Some(3),
        _ => None,
    }
}

/// Fraction of the possible grade bands this item covers.
fn grade_coverage(item: &Item) -> f64 {
    let bands: BTreeSet<usize> = item
        .metadata
        .grade_levels
        .iter()
        .filter_map(|g| grade_band(g))
        .collect();
    bands.len() as f64 / GRADE_BANDS as f64
}

/// Linear recency decay over the configured horizon. Missing dates score 0.
fn recency(item: &Item, now: i64, horizon_days: i64) -> f64 {
    if item.updated_at <= 0 {
        return 0.0;
    }
    let age_days = (now - item.updated_at) as f64 / 86_400.0;
    let horizon = horizon_days as f64;
    (1.0 - age_days / horizon).clamp(0.0, 1.0)
}

/// Fraction of expected content sections present in the body.
fn structure(item: &Item) -> f64 {
    let body = item.body.to_lowercase();
    let found = STRUCTURE_SECTIONS
        .iter()
        .filter(|aliases| aliases.iter().any(|a| body.contains(a)))
        .count();
    found as f64 / STRUCTURE_SECTIONS.len() as f64
}

/// Score one item against the weighted checklist.
pub fn score_item(item: &Item, now: i64, config: &ScoringConfig) -> RankedMember {
    let recency_frac = recency(item, now, config.recency_horizon_days);
    let completeness_frac = completeness(item);
    let coverage_frac = grade_coverage(item);
    let structure_frac = structure(item);

    let score = config.recency_weight * recency_frac
        + config.completeness_weight * completeness_frac
        + config.grade_coverage_weight * coverage_frac
        + config.structure_bonus * structure_frac;

    RankedMember {
        item_id: item.id.clone(),
        score,
        recency: recency_frac,
        completeness: completeness_frac,
        grade_coverage: coverage_frac,
        structure_bonus: structure_frac,
        updated_at: item.updated_at,
    }
}

/// Rank a group's members. The first entry is the recommended canonical.
pub fn rank_members(members: &[&Item], now: i64, config: &ScoringConfig) -> Vec<RankedMember> {
    let mut ranked: Vec<RankedMember> =
        members.iter().map(|m| score_item(m, now, config)).collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.completeness
                    .partial_cmp(&a.completeness)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.item_id.cmp(&b.item_id))
    });

    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemMetadata;

    const DAY: i64 = 86_400;

    fn item(id: &str, updated_at: i64) -> Item {
        Item {
            id: id.to_string(),
            title: "Lesson".to_string(),
            body: "Body text.".to_string(),
            content_hash: "h".to_string(),
            hash_kind: crate::models::HashKind::Content,
            created_at: 0,
            updated_at,
            metadata: ItemMetadata::default(),
            quality_flags: vec![],
            workflow_state: String::new(),
            notes: String::new(),
            extra_json: "{}".to_string(),
        }
    }

    #[test]
    fn recency_decays_linearly() {
        let config = ScoringConfig::default();
        let now = 1_700_000_000;
        let fresh = item("a", now);
        let halfway = item("b", now - config.recency_horizon_days / 2 * DAY);
        let stale = item("c", now - 2 * config.recency_horizon_days * DAY);
        let missing = item("d", 0);

        assert!((score_item(&fresh, now, &config).recency - 1.0).abs() < 1e-9);
        assert!((score_item(&halfway, now, &config).recency - 0.5).abs() < 1e-6);
        assert_eq!(score_item(&stale, now, &config).recency, 0.0);
        assert_eq!(score_item(&missing, now, &config).recency, 0.0);
    }

    #[test]
    fn completeness_counts_filled_fields() {
        let mut sparse = item("a", 0);
        sparse.notes = String::new();
        // title + body filled: 2/9
        assert!((completeness(&sparse) - 2.0 / 9.0).abs() < 1e-9);

        let mut full = item("b", 0);
        full.metadata = ItemMetadata {
            grade_levels: vec!["3".to_string()],
            themes: vec!["soil".to_string()],
            cultural_tags: vec!["oaxacan".to_string()],
            season_tags: vec!["fall".to_string()],
            ingredients: vec!["corn".to_string()],
            skills: vec!["knife safety".to_string()],
        };
        full.notes = "reviewed".to_string();
        assert!((completeness(&full) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn grade_bands_map_and_cover() {
        assert_eq!(grade_band("K"), Some(0));
        assert_eq!(grade_band("2"), Some(0));
        assert_eq!(grade_band("3"), Some(1));
        assert_eq!(grade_band("6-8"), Some(2));
        assert_eq!(grade_band("12"), Some(3));
        assert_eq!(grade_band("adult"), None);

        let mut wide = item("a", 0);
        wide.metadata.grade_levels =
            vec!["k".to_string(), "4".to_string(), "7".to_string(), "10".to_string()];
        assert!((grade_coverage(&wide) - 1.0).abs() < 1e-9);

        let mut narrow = item("b", 0);
        narrow.metadata.grade_levels = vec!["1".to_string(), "2".to_string()];
        assert!((grade_coverage(&narrow) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn structure_bonus_capped_by_sections() {
        let mut structured = item("a", 0);
        structured.body =
            "Objectives: learn.\nMaterials: trowels.\nProcedure: dig.\nReflection: discuss."
                .to_string();
        assert!((structure(&structured) - 1.0).abs() < 1e-9);

        let mut partial = item("b", 0);
        partial.body = "Materials: seeds. Then plant them.".to_string();
        assert!((structure(&partial) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn higher_completeness_wins_at_equal_recency() {
        let now = 1_700_000_000;
        let config = ScoringConfig::default();
        let a = item("a", now);
        let mut b = item("b", now);
        b.metadata.themes = vec!["soil".to_string()];
        let ranked = rank_members(&[&a, &b], now, &config);
        assert_eq!(ranked[0].item_id, "b");
    }

    #[test]
    fn tie_breaks_are_deterministic() {
        let now = 1_700_000_000;
        let config = ScoringConfig::default();
        // Identical scores and timestamps: id order decides, reproducibly.
        let a = item("alpha", now);
        let b = item("beta", now);
        let first = rank_members(&[&b, &a], now, &config);
        let second = rank_members(&[&a, &b], now, &config);
        assert_eq!(first[0].item_id, "alpha");
        assert_eq!(second[0].item_id, "alpha");

        // More recent wins when scores would otherwise tie on recency
        // weight alone being equal.
        let old = item("old", now - 400 * DAY);
        let new = item("new", now - 10 * DAY);
        let ranked = rank_members(&[&old, &new], now, &config);
        assert_eq!(ranked[0].item_id, "new");
    }

    #[test]
    fn weights_cap_total_score() {
        let config = ScoringConfig::default();
        let now = 1_700_000_000;
        let mut best = item("a", now);
        best.metadata = ItemMetadata {
            grade_levels: vec!["k".to_string(), "3".to_string(), "6".to_string(), "9".to_string()],
            themes: vec!["soil".to_string()],
            cultural_tags: vec!["hmong".to_string()],
            season_tags: vec!["fall".to_string()],
            ingredients: vec!["corn".to_string()],
            skills: vec!["measuring".to_string()],
        };
        best.notes = "complete".to_string();
        best.body =
            "Objectives: a. Materials: b. Procedure: c. Assessment: d.".to_string();
        let scored = score_item(&best, now, &config);
        let max = config.recency_weight
            + config.completeness_weight
            + config.grade_coverage_weight
            + config.structure_bonus;
        assert!((scored.score - max).abs() < 1e-9);
        assert!(max < 0.5);
    }
}
