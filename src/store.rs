//! Item-store access helpers shared by the engines.
//!
//! One row mapper and a handful of queries so resolve/undo can restore an
//! item bit-for-bit from the same shape the importer wrote.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::embedding::blob_to_vec;
use crate::models::{HashKind, Item, ItemMetadata};

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn item_from_row(row: &SqliteRow) -> Item {
    Item {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        content_hash: row.get("content_hash"),
        hash_kind: HashKind::parse(row.get("hash_kind")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        metadata: ItemMetadata {
            grade_levels: json_list(row.get("grade_levels")),
            themes: json_list(row.get("themes")),
            cultural_tags: json_list(row.get("cultural_tags")),
            season_tags: json_list(row.get("season_tags")),
            ingredients: json_list(row.get("ingredients")),
            skills: json_list(row.get("skills")),
        },
        quality_flags: json_list(row.get("quality_flags")),
        workflow_state: row.get("workflow_state"),
        notes: row.get("notes"),
        extra_json: row.get("extra_json"),
    }
}

/// All live items in stable id order, the order every analysis run uses.
pub async fn load_items(pool: &SqlitePool) -> Result<Vec<Item>> {
    let rows = sqlx::query("SELECT * FROM items ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(item_from_row).collect())
}

pub async fn load_item(pool: &SqlitePool, id: &str) -> Result<Option<Item>> {
    let row = sqlx::query("SELECT * FROM items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(item_from_row))
}

/// Stored embedding vectors keyed by item id.
pub async fn load_vector_map(pool: &SqlitePool) -> Result<HashMap<String, Vec<f32>>> {
    let rows = sqlx::query("SELECT item_id, embedding FROM item_vectors")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            (row.get("item_id"), blob_to_vec(&blob))
        })
        .collect())
}

/// Upsert a full item row. Also used by undo to reinsert snapshots, so it
/// must bind every column the row mapper reads.
pub async fn upsert_item<'e, E>(executor: E, item: &Item) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO items (
            id, title, body, content_hash, hash_kind, created_at, updated_at,
            grade_levels, themes, cultural_tags, season_tags, ingredients, skills,
            quality_flags, workflow_state, notes, extra_json
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            content_hash = excluded.content_hash,
            hash_kind = excluded.hash_kind,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            grade_levels = excluded.grade_levels,
            themes = excluded.themes,
            cultural_tags = excluded.cultural_tags,
            season_tags = excluded.season_tags,
            ingredients = excluded.ingredients,
            skills = excluded.skills,
            quality_flags = excluded.quality_flags,
            workflow_state = excluded.workflow_state,
            notes = excluded.notes,
            extra_json = excluded.extra_json
        "#,
    )
    .bind(&item.id)
    .bind(&item.title)
    .bind(&item.body)
    .bind(&item.content_hash)
    .bind(item.hash_kind.as_str())
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(serde_json::to_string(&item.metadata.grade_levels).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.metadata.themes).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.metadata.cultural_tags).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.metadata.season_tags).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.metadata.ingredients).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.metadata.skills).unwrap_or_else(|_| "[]".into()))
    .bind(serde_json::to_string(&item.quality_flags).unwrap_or_else(|_| "[]".into()))
    .bind(&item.workflow_state)
    .bind(&item.notes)
    .bind(&item.extra_json)
    .execute(executor)
    .await?;
    Ok(())
}

/// Append one attributable action to the audit trail.
pub async fn append_audit(
    pool: &SqlitePool,
    action: &str,
    group_id: &str,
    actor: &str,
    notes: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (action, group_id, actor, notes, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(action)
    .bind(group_id)
    .bind(actor)
    .bind(notes)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}
