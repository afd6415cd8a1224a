//! Undo engine.
//!
//! Reverses a resolution: every archived snapshot under the
//! duplicate-resolution reason is reinserted into the live set, then its
//! archive row, canonical mapping, and the group's resolution record are
//! deleted in one transaction. Restoring is the exact inverse of
//! archiving; any post-resolution edits to the canonical are left alone.
//! An id that is already live again is skipped and flagged for manual
//! reconciliation, and its snapshot is retained.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::EngineError;
use crate::models::{ArchivedItem, GroupOutcome, MutationSummary, OutcomeStatus};
use crate::store;

#[derive(Debug, Clone)]
pub struct UndoOptions {
    /// A group id, or `all` for every resolved group.
    pub target: String,
    pub actor: String,
    pub notes: String,
    pub dry_run: bool,
}

pub async fn run_undo(config: &Config, opts: &UndoOptions) -> Result<()> {
    let pool = db::connect(config).await?;

    let group_ids: Vec<String> = if opts.target == "all" {
        sqlx::query_scalar(
            "SELECT group_id FROM resolution_records ORDER BY created_at, group_id",
        )
        .fetch_all(&pool)
        .await?
    } else {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM resolution_records WHERE group_id = ?")
                .bind(&opts.target)
                .fetch_optional(&pool)
                .await?;
        if exists.is_none() {
            bail!("No resolution record for group: {}", opts.target);
        }
        vec![opts.target.clone()]
    };

    let mut summary = MutationSummary::default();
    for group_id in &group_ids {
        let outcome = undo_group(&pool, group_id, opts).await;
        summary.push(outcome);
    }

    let heading = if opts.dry_run { "undo (dry-run)" } else { "undo" };
    println!("{}", heading);
    for outcome in &summary.outcomes {
        println!(
            "  {}  {}  {}",
            outcome.group_id,
            outcome.status.as_str(),
            outcome.detail
        );
    }
    println!(
        "  succeeded: {}  skipped: {}  failed: {}",
        summary.succeeded, summary.skipped, summary.failed
    );
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn undo_group(pool: &SqlitePool, group_id: &str, opts: &UndoOptions) -> GroupOutcome {
    match try_undo_group(pool, group_id, opts).await {
        Ok(outcome) => outcome,
        Err(e) => GroupOutcome {
            group_id: group_id.to_string(),
            status: OutcomeStatus::Failed,
            detail: format!("{:#}", e),
        },
    }
}

async fn try_undo_group(
    pool: &SqlitePool,
    group_id: &str,
    opts: &UndoOptions,
) -> Result<GroupOutcome> {
    let rows = sqlx::query(
        r#"
        SELECT item_id, snapshot_json, reason, canonical_id, group_id, archived_at
        FROM archived_items
        WHERE group_id = ? AND reason = 'duplicate_resolution'
        ORDER BY item_id
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    let mut archived: Vec<ArchivedItem> = Vec::with_capacity(rows.len());
    for row in &rows {
        let snapshot_json: String = row.get("snapshot_json");
        archived.push(ArchivedItem {
            item: serde_json::from_str(&snapshot_json)?,
            reason: row.get("reason"),
            canonical_id: row.get("canonical_id"),
            group_id: row.get("group_id"),
            archived_at: row.get("archived_at"),
        });
    }

    if opts.dry_run {
        return Ok(GroupOutcome {
            group_id: group_id.to_string(),
            status: OutcomeStatus::Succeeded,
            detail: format!("would restore {} item(s)", archived.len()),
        });
    }

    let mut restored = 0u64;
    let mut conflicts: Vec<String> = Vec::new();

    let mut tx = pool.begin().await?;

    for entry in &archived {
        let item = &entry.item;

        let live: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?")
            .bind(&item.id)
            .fetch_optional(&mut *tx)
            .await?;
        if live.is_some() {
            // Snapshot and mapping stay behind for reconciliation.
            let err = EngineError::UndoConflict {
                item_id: item.id.clone(),
            };
            eprintln!("Warning: {}", err);
            conflicts.push(item.id.clone());
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO items (
                id, title, body, content_hash, hash_kind, created_at, updated_at,
                grade_levels, themes, cultural_tags, season_tags, ingredients, skills,
                quality_flags, workflow_state, notes, extra_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.content_hash)
        .bind(item.hash_kind.as_str())
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(serde_json::to_string(&item.metadata.grade_levels)?)
        .bind(serde_json::to_string(&item.metadata.themes)?)
        .bind(serde_json::to_string(&item.metadata.cultural_tags)?)
        .bind(serde_json::to_string(&item.metadata.season_tags)?)
        .bind(serde_json::to_string(&item.metadata.ingredients)?)
        .bind(serde_json::to_string(&item.metadata.skills)?)
        .bind(serde_json::to_string(&item.quality_flags)?)
        .bind(&item.workflow_state)
        .bind(&item.notes)
        .bind(&item.extra_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM archived_items WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM canonical_mappings WHERE duplicate_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        restored += 1;
    }

    sqlx::query("DELETE FROM resolution_records WHERE group_id = ?")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    store::append_audit(pool, "undo", group_id, &opts.actor, &opts.notes).await?;

    let detail = if conflicts.is_empty() {
        format!("restored {} item(s)", restored)
    } else {
        format!(
            "restored {} item(s); {} need reconciliation (already live): {}",
            restored,
            conflicts.len(),
            conflicts.join(", ")
        )
    };

    Ok(GroupOutcome {
        group_id: group_id.to_string(),
        status: OutcomeStatus::Succeeded,
        detail,
    })
}
