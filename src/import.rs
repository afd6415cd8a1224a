//! Ingestion boundary: load lesson JSON exports into the item store.
//!
//! Historical exports are loosely typed: metadata fields appear as
//! scalars in some files and arrays in others, timestamps as strings or
//! numbers. Everything is normalized here, once, into the canonical
//! always-array shape so the comparison engines never branch on type.
//! Per-file failures are warned and skipped; the scan continues.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::embedding::vec_to_blob;
use crate::error::EngineError;
use crate::fingerprint::fingerprint;
use crate::models::{Item, ItemMetadata};
use crate::store;

pub async fn run_import(config: &Config, dir: &std::path::Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Import path is not a directory: {}", dir.display());
    }

    let include = build_globset(&config.import.include_globs)?;
    let exclude = build_globset(&config.import.exclude_globs)?;

    let pool = db::connect(config).await?;

    let mut scanned = 0u64;
    let mut imported = 0u64;
    let mut with_vectors = 0u64;
    let mut skipped = 0u64;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                eprintln!("Warning: cannot read directory entry: {}", e);
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if !include.is_match(rel) || exclude.is_match(rel) {
            continue;
        }

        scanned += 1;
        match import_file(entry.path()) {
            Ok((item, embedding)) => {
                store::upsert_item(&pool, &item)
                    .await
                    .with_context(|| format!("Failed to store item from {}", rel.display()))?;
                if let Some(vector) = embedding {
                    store_vector(&pool, &item, &vector).await?;
                    with_vectors += 1;
                }
                imported += 1;
            }
            Err(e) => {
                let err = EngineError::InputData {
                    item_id: rel.display().to_string(),
                    reason: format!("{:#}", e),
                };
                eprintln!("Warning: skipping: {}", err);
                skipped += 1;
            }
        }
    }

    println!("import {}", dir.display());
    println!("  files scanned: {}", scanned);
    println!("  items imported: {}", imported);
    println!("  with embeddings: {}", with_vectors);
    println!("  skipped: {}", skipped);
    println!("ok");

    pool.close().await;
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn import_file(path: &std::path::Path) -> Result<(Item, Option<Vec<f32>>)> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).context("not valid JSON")?;
    parse_item(value)
}

/// Known top-level keys; everything else lands in the residual map.
const KNOWN_KEYS: [&str; 15] = [
    "id",
    "title",
    "body",
    "created_at",
    "updated_at",
    "grade_levels",
    "themes",
    "cultural_tags",
    "season_tags",
    "ingredients",
    "skills",
    "quality_flags",
    "workflow_state",
    "notes",
    "embedding",
];

fn parse_item(value: Value) -> Result<(Item, Option<Vec<f32>>)> {
    let obj = match value {
        Value::Object(map) => map,
        _ => bail!("top-level value must be an object"),
    };

    let title = obj
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let body = obj
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if title.is_empty() && body.trim().is_empty() {
        bail!("item has neither title nor body");
    }

    let metadata = ItemMetadata {
        grade_levels: string_list(obj.get("grade_levels")),
        themes: string_list(obj.get("themes")),
        cultural_tags: string_list(obj.get("cultural_tags")),
        season_tags: string_list(obj.get("season_tags")),
        ingredients: string_list(obj.get("ingredients")),
        skills: string_list(obj.get("skills")),
    };

    let updated_at = obj.get("updated_at").and_then(timestamp).unwrap_or(0);
    let created_at = obj
        .get("created_at")
        .and_then(timestamp)
        .unwrap_or(updated_at);

    let mut quality_flags = string_list(obj.get("quality_flags"));
    if title.to_lowercase().contains("copy") && !quality_flags.iter().any(|f| f == "title_contains_copy")
    {
        quality_flags.push("title_contains_copy".to_string());
        quality_flags.sort();
    }

    let embedding = obj.get("embedding").and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .map(|n| n.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>()
    });

    let id = obj
        .get("id")
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let workflow_state = obj
        .get("workflow_state")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let notes = obj
        .get("notes")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let residual: serde_json::Map<String, Value> = obj
        .into_iter()
        .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
        .collect();

    let fp = fingerprint(&body, &metadata);

    let item = Item {
        id,
        title,
        body,
        content_hash: fp.hash,
        hash_kind: fp.kind,
        created_at,
        updated_at,
        metadata,
        quality_flags,
        workflow_state,
        notes,
        extra_json: serde_json::to_string(&Value::Object(residual))
            .unwrap_or_else(|_| "{}".to_string()),
    };

    Ok((item, embedding))
}

/// Collapse the historical scalar-or-array inconsistency into a sorted,
/// deduplicated, lowercased tag list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(_) => Vec::new(),
    };

    out = out
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Accept unix seconds, RFC 3339, or bare `YYYY-MM-DD` dates.
fn timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp())
        }
        _ => None,
    }
}

async fn store_vector(pool: &sqlx::SqlitePool, item: &Item, vector: &[f32]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO item_embeddings (item_id, model, dims, hash, created_at)
        VALUES (?, 'imported', ?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(&item.id)
    .bind(vector.len() as i64)
    .bind(&item.content_hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO item_vectors (item_id, embedding) VALUES (?, ?)
        ON CONFLICT(item_id) DO UPDATE SET embedding = excluded.embedding
        "#,
    )
    .bind(&item.id)
    .bind(vec_to_blob(vector))
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_and_array_metadata_normalize_identically() {
        let scalar = string_list(Some(&json!("Fall")));
        let array = string_list(Some(&json!(["Fall"])));
        assert_eq!(scalar, array);
        assert_eq!(scalar, vec!["fall".to_string()]);
    }

    #[test]
    fn lists_are_sorted_deduped_lowercased() {
        let value = json!(["Soil", "compost", "  soil ", 3]);
        assert_eq!(
            string_list(Some(&value)),
            vec!["3".to_string(), "compost".to_string(), "soil".to_string()]
        );
    }

    #[test]
    fn timestamps_accept_all_shapes() {
        assert_eq!(timestamp(&json!(1700000000)), Some(1700000000));
        assert_eq!(
            timestamp(&json!("2024-03-01T00:00:00Z")),
            Some(1709251200)
        );
        assert_eq!(timestamp(&json!("2024-03-01")), Some(1709251200));
        assert_eq!(timestamp(&json!(true)), None);
    }

    #[test]
    fn parse_item_normalizes_and_fingerprints() {
        let (item, embedding) = parse_item(json!({
            "id": "lesson-1",
            "title": "Compost Basics",
            "body": "Layer greens and browns.",
            "grade_levels": "3",
            "themes": ["Soil", "soil", "Compost"],
            "updated_at": "2024-03-01",
            "embedding": [0.5, 0.5],
            "source_system": "legacy-cms"
        }))
        .unwrap();

        assert_eq!(item.id, "lesson-1");
        assert_eq!(item.metadata.grade_levels, vec!["3".to_string()]);
        assert_eq!(
            item.metadata.themes,
            vec!["compost".to_string(), "soil".to_string()]
        );
        assert_eq!(item.hash_kind, crate::models::HashKind::Content);
        assert!(!item.content_hash.is_empty());
        assert_eq!(embedding, Some(vec![0.5, 0.5]));
        assert!(item.extra_json.contains("legacy-cms"));
    }

    #[test]
    fn copy_titles_get_flagged() {
        let (item, _) = parse_item(json!({
            "title": "Compost Basics (Copy)",
            "body": "Text."
        }))
        .unwrap();
        assert!(item
            .quality_flags
            .iter()
            .any(|f| f == "title_contains_copy"));
    }

    #[test]
    fn missing_title_and_body_rejected() {
        assert!(parse_item(json!({ "grade_levels": ["3"] })).is_err());
    }

    #[test]
    fn generated_ids_for_anonymous_items() {
        let (a, _) = parse_item(json!({ "title": "One", "body": "x" })).unwrap();
        let (b, _) = parse_item(json!({ "title": "Two", "body": "y" })).unwrap();
        assert_ne!(a.id, b.id);
    }
}
