//! Group categorization and insight generation.
//!
//! Each duplicate group is classified by a priority-ordered decision tree
//! over its similarity submatrix and member metadata, producing a
//! category, a recommended action, a confidence level, and human-facing
//! insights. Grade variants are never collapsed; a near-exact band guards
//! against false auto-merges; a "related but distinct" band triggers a
//! stricter re-clustering pass.

use std::collections::BTreeSet;

use crate::cluster::connected_components;
use crate::config::Thresholds;
use crate::models::{
    Confidence, GroupCategory, HashKind, Item, RecommendedAction, SimilarityPair,
    SimilaritySignal,
};
use crate::similarity::{token_jaccard, token_set};

/// Categorizer output for one group.
#[derive(Debug, Clone)]
pub struct Categorization {
    pub category: GroupCategory,
    pub action: RecommendedAction,
    pub confidence: Confidence,
    pub insights: Vec<String>,
    /// Member-id lists of the sub-groups found by the split pass; empty
    /// unless the action is `split_group`.
    pub subgroup_members: Vec<Vec<String>>,
}

struct GroupFacts {
    complete: bool,
    min_score: f64,
    avg_score: f64,
    hashes_equal: bool,
    distinct_grades: bool,
    distinct_cultural: bool,
    distinct_seasonal: bool,
    min_title_overlap: f64,
}

fn gather_facts(members: &[&Item], pairs: &[SimilarityPair]) -> GroupFacts {
    let n = members.len();
    let full_count = n * n.saturating_sub(1) / 2;

    let (min_score, avg_score) = if pairs.is_empty() {
        (0.0, 0.0)
    } else {
        let min = pairs.iter().map(|p| p.score).fold(f64::INFINITY, f64::min);
        let sum: f64 = pairs.iter().map(|p| p.score).sum();
        (min, sum / pairs.len() as f64)
    };

    let hashes_equal = members
        .iter()
        .all(|m| m.hash_kind == HashKind::Content && m.content_hash == members[0].content_hash);

    let distinct = |get: fn(&Item) -> &Vec<String>| {
        let first: BTreeSet<&String> = get(members[0]).iter().collect();
        members
            .iter()
            .any(|m| get(m).iter().collect::<BTreeSet<_>>() != first)
    };

    let token_sets: Vec<BTreeSet<String>> = members.iter().map(|m| token_set(&m.title)).collect();
    let mut min_title_overlap = 1.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            min_title_overlap = min_title_overlap.min(token_jaccard(&token_sets[i], &token_sets[j]));
        }
    }

    GroupFacts {
        complete: pairs.len() == full_count,
        min_score,
        avg_score,
        hashes_equal,
        distinct_grades: distinct(|m| &m.metadata.grade_levels),
        distinct_cultural: distinct(|m| &m.metadata.cultural_tags),
        distinct_seasonal: distinct(|m| &m.metadata.season_tags),
        min_title_overlap,
    }
}

/// Classify one group. `members` and `pairs` are the group's submatrix;
/// pairs discarded below the related threshold are simply absent.
pub fn categorize_group(
    members: &[&Item],
    pairs: &[SimilarityPair],
    thresholds: &Thresholds,
) -> Categorization {
    let facts = gather_facts(members, pairs);

    let (category, action, confidence) = if facts.complete
        && facts.min_score >= thresholds.auto_merge
        && facts.hashes_equal
    {
        (
            GroupCategory::ExactContent,
            RecommendedAction::AutoMerge,
            Confidence::High,
        )
    } else if facts.complete && facts.min_score >= thresholds.auto_merge {
        (
            GroupCategory::FormattingOnly,
            RecommendedAction::AutoMerge,
            Confidence::High,
        )
    } else if facts.complete && facts.min_score >= thresholds.near_exact {
        // Just shy of identical: same category as a formatting-only match,
        // but a human confirms the merge.
        (
            GroupCategory::FormattingOnly,
            RecommendedAction::ManualReview,
            Confidence::Medium,
        )
    } else if facts.distinct_grades && facts.avg_score >= thresholds.grade_variation {
        (
            GroupCategory::GradeAdaptations,
            RecommendedAction::KeepAll,
            Confidence::High,
        )
    } else if facts.distinct_cultural && facts.avg_score >= thresholds.cultural_variation {
        (
            GroupCategory::CulturalVariations,
            RecommendedAction::ManualReview,
            Confidence::Medium,
        )
    } else if facts.distinct_seasonal && facts.avg_score >= thresholds.seasonal_variation {
        (
            GroupCategory::SeasonalVariations,
            RecommendedAction::ManualReview,
            Confidence::Medium,
        )
    } else if facts.min_title_overlap <= thresholds.title_divergence_tokens
        && facts.avg_score >= thresholds.title_divergence_content
    {
        (
            GroupCategory::TitleInconsistencies,
            RecommendedAction::ManualReview,
            Confidence::Medium,
        )
    } else if facts.avg_score >= thresholds.grouping && facts.avg_score < thresholds.near_exact {
        (
            GroupCategory::PedagogicalVariations,
            RecommendedAction::SplitGroup,
            Confidence::Medium,
        )
    } else {
        (
            GroupCategory::Unclassified,
            RecommendedAction::ManualReview,
            Confidence::Low,
        )
    };

    let subgroup_members = if action == RecommendedAction::SplitGroup {
        split_group(members, pairs, thresholds.subgroup)
    } else {
        Vec::new()
    };

    let insights = build_insights(members, pairs, category, &facts, &subgroup_members);

    Categorization {
        category,
        action,
        confidence,
        insights,
        subgroup_members,
    }
}

/// Re-cluster the group's members at the stricter sub-group threshold.
/// Runs once; sub-groups are not split further.
fn split_group(
    members: &[&Item],
    pairs: &[SimilarityPair],
    subgroup_threshold: f64,
) -> Vec<Vec<String>> {
    let index_of = |id: &str| members.iter().position(|m| m.id == id);

    let edges = pairs.iter().filter(|p| p.score >= subgroup_threshold).filter_map(|p| {
        match (index_of(&p.item_a), index_of(&p.item_b)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    });

    connected_components(members.len(), edges)
        .into_iter()
        .map(|component| component.into_iter().map(|i| members[i].id.clone()).collect())
        .collect()
}

fn build_insights(
    members: &[&Item],
    pairs: &[SimilarityPair],
    category: GroupCategory,
    facts: &GroupFacts,
    subgroups: &[Vec<String>],
) -> Vec<String> {
    let mut insights = Vec::new();

    // Metadata shared by every member.
    for (name, _) in members[0].metadata.fields() {
        let mut shared: BTreeSet<&String> = match name {
            "grade_levels" => members[0].metadata.grade_levels.iter().collect(),
            "themes" => members[0].metadata.themes.iter().collect(),
            "cultural_tags" => members[0].metadata.cultural_tags.iter().collect(),
            "season_tags" => members[0].metadata.season_tags.iter().collect(),
            "ingredients" => members[0].metadata.ingredients.iter().collect(),
            _ => members[0].metadata.skills.iter().collect(),
        };
        for member in &members[1..] {
            let values: BTreeSet<&String> = match name {
                "grade_levels" => member.metadata.grade_levels.iter().collect(),
                "themes" => member.metadata.themes.iter().collect(),
                "cultural_tags" => member.metadata.cultural_tags.iter().collect(),
                "season_tags" => member.metadata.season_tags.iter().collect(),
                "ingredients" => member.metadata.ingredients.iter().collect(),
                _ => member.metadata.skills.iter().collect(),
            };
            shared = shared.intersection(&values).copied().collect();
        }
        if !shared.is_empty() {
            let values: Vec<&str> = shared.iter().map(|s| s.as_str()).collect();
            insights.push(format!("all members share {}: {}", name, values.join(", ")));
        }
    }

    // Explicit quality flags.
    for member in members {
        if member.title.to_lowercase().contains("copy") {
            insights.push(format!("'{}' title suggests a copied item", member.id));
        }
        if member
            .quality_flags
            .iter()
            .any(|f| f.contains("duplicate") || f.contains("copy"))
        {
            insights.push(format!("'{}' was previously flagged: {}", member.id, member.quality_flags.join(", ")));
        }
    }

    if pairs.iter().any(|p| p.signal == SimilaritySignal::Title)
        && pairs.iter().all(|p| p.signal != SimilaritySignal::Embedding)
    {
        insights.push("grouping rests on title similarity only; no embedding evidence".to_string());
    }

    // Category guidance.
    let guidance = match category {
        GroupCategory::ExactContent => {
            "content is identical after normalization; safe to merge automatically"
        }
        GroupCategory::FormattingOnly if facts.min_score >= 1.0 => {
            "content differs only in formatting or whitespace; safe to merge automatically"
        }
        GroupCategory::FormattingOnly => {
            "nearly identical but not provably the same; confirm before merging"
        }
        GroupCategory::GradeAdaptations => {
            "members target different grade levels; keep every adaptation"
        }
        GroupCategory::CulturalVariations => {
            "members carry different cultural-heritage tags; review whether variants are intentional"
        }
        GroupCategory::SeasonalVariations => {
            "members are timed to different seasons; review before consolidating"
        }
        GroupCategory::TitleInconsistencies => {
            "titles diverge over near-identical content; likely a naming cleanup, not a merge"
        }
        GroupCategory::PedagogicalVariations => {
            "related but distinct lessons; see sub-groups for candidates to consolidate"
        }
        GroupCategory::Unclassified => "no dominant signal; needs human review",
    };
    insights.push(guidance.to_string());

    if !subgroups.is_empty() {
        let clustered: usize = subgroups.iter().map(|s| s.len()).sum();
        insights.push(format!(
            "split pass found {} sub-group(s) covering {} of {} members",
            subgroups.len(),
            clustered,
            members.len()
        ));
    }

    insights
}
