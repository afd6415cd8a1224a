//! Resolution executor.
//!
//! Archives the non-canonical members of a duplicate group, records the
//! canonical mappings, and writes one immutable resolution record per
//! group. The group is the unit of retry: a conflict skips the whole
//! group explicitly, a persistence failure aborts only the affected
//! duplicate, and already-committed duplicates in the same group are not
//! rolled back (a documented limitation). Dry-run computes the full
//! outcome without mutating anything.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::analyze;
use crate::config::Config;
use crate::db;
use crate::error::EngineError;
use crate::models::{
    DuplicateGroup, GroupOutcome, Item, MutationSummary, OutcomeStatus, RecommendedAction,
    ResolutionRecord,
};
use crate::store;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// A group id, or `all` for every group of the latest completed run.
    pub target: String,
    /// Override the recommended canonical. Must be a group member.
    pub canonical: Option<String>,
    pub actor: String,
    pub notes: String,
    pub dry_run: bool,
}

pub async fn run_resolve(config: &Config, opts: &ResolveOptions) -> Result<()> {
    let pool = db::connect(config).await?;

    let groups: Vec<DuplicateGroup> = if opts.target == "all" {
        let run_id = match analyze::latest_complete_run(&pool).await? {
            Some(id) => id,
            None => bail!("No completed analysis run found; run `lcr analyze` first"),
        };
        analyze::load_groups(&pool, &run_id).await?
    } else {
        match analyze::load_group(&pool, &opts.target).await? {
            Some(group) => vec![group],
            None => bail!("Unknown group id: {}", opts.target),
        }
    };

    if groups.len() > 1 && opts.canonical.is_some() {
        bail!("--canonical applies to a single group, not `all`");
    }

    let mut summary = MutationSummary::default();
    for group in &groups {
        let outcome = resolve_group(&pool, group, opts).await;
        summary.push(outcome);
    }

    let heading = if opts.dry_run {
        "resolve (dry-run)"
    } else {
        "resolve"
    };
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

/// One archiving unit: duplicates to fold into a canonical.
struct ResolveUnit {
    canonical_id: String,
    duplicate_ids: Vec<String>,
}

async fn resolve_group(
    pool: &SqlitePool,
    group: &DuplicateGroup,
    opts: &ResolveOptions,
) -> GroupOutcome {
    match try_resolve_group(pool, group, opts).await {
        Ok(outcome) => outcome,
        Err(e) => GroupOutcome {
            group_id: group.group_id.clone(),
            status: OutcomeStatus::Failed,
            detail: format!("{:#}", e),
        },
    }
}

async fn try_resolve_group(
    pool: &SqlitePool,
    group: &DuplicateGroup,
    opts: &ResolveOptions,
) -> Result<GroupOutcome> {
    let skipped = |detail: String| GroupOutcome {
        group_id: group.group_id.clone(),
        status: OutcomeStatus::Skipped,
        detail,
    };

    // Idempotency: resolving a resolved group is a reported no-op.
    let already: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM resolution_records WHERE group_id = ?")
            .bind(&group.group_id)
            .fetch_optional(pool)
            .await?;
    if already.is_some() {
        return Ok(skipped("already resolved".to_string()));
    }

    if group.action == RecommendedAction::KeepAll {
        return Ok(skipped(
            "keep_all: every member is canonical; nothing to archive".to_string(),
        ));
    }

    // Members still live, in group order.
    let mut live: Vec<Item> = Vec::new();
    for id in &group.member_ids {
        if let Some(item) = store::load_item(pool, id).await? {
            live.push(item);
        }
    }

    // Whole-group deferral: an unfinished external workflow on any member
    // blocks consolidation of all of them.
    if let Some(busy) = live.iter().find(|m| !m.workflow_state.is_empty()) {
        let err = EngineError::ResolutionConflict {
            group_id: group.group_id.clone(),
            reason: format!(
                "deferred: '{}' is in workflow '{}'",
                busy.id, busy.workflow_state
            ),
        };
        return Ok(skipped(err.to_string()));
    }

    let units = match plan_units(group, opts)? {
        Some(units) => units,
        None => {
            return Ok(skipped(
                "no archivable duplicates in this group".to_string(),
            ))
        }
    };

    let live_ids: Vec<&str> = live.iter().map(|i| i.id.as_str()).collect();
    for unit in &units {
        if !live_ids.contains(&unit.canonical_id.as_str()) {
            let err = EngineError::ResolutionConflict {
                group_id: group.group_id.clone(),
                reason: format!("canonical '{}' is not live", unit.canonical_id),
            };
            return Ok(skipped(err.to_string()));
        }
    }

    let planned: usize = units.iter().map(|u| u.duplicate_ids.len()).sum();
    if planned == 0 {
        return Ok(skipped(
            "no archivable duplicates in this group".to_string(),
        ));
    }

    if opts.dry_run {
        let detail = units
            .iter()
            .map(|u| {
                format!(
                    "would archive [{}] -> canonical '{}'",
                    u.duplicate_ids.join(", "),
                    u.canonical_id
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Ok(GroupOutcome {
            group_id: group.group_id.clone(),
            status: OutcomeStatus::Succeeded,
            detail,
        });
    }

    let now = chrono::Utc::now().timestamp();
    let mut archived: Vec<String> = Vec::new();
    let mut failures: Vec<String> = Vec::new();

    for unit in &units {
        for dup_id in &unit.duplicate_ids {
            match archive_duplicate(pool, group, dup_id, &unit.canonical_id, now).await {
                Ok(true) => archived.push(dup_id.clone()),
                Ok(false) => failures.push(format!("'{}' no longer live", dup_id)),
                Err(e) => {
                    let err = EngineError::Persistence {
                        item_id: dup_id.clone(),
                        source: e,
                    };
                    eprintln!("Warning: {}", err);
                    failures.push(err.to_string());
                }
            }
        }
    }

    if archived.is_empty() {
        return Ok(GroupOutcome {
            group_id: group.group_id.clone(),
            status: OutcomeStatus::Failed,
            detail: format!("no duplicates archived: {}", failures.join("; ")),
        });
    }

    let record = ResolutionRecord {
        group_id: group.group_id.clone(),
        canonical_id: units[0].canonical_id.clone(),
        archived_ids: archived.clone(),
        score: group
            .ranking
            .iter()
            .find(|r| r.item_id == units[0].canonical_id)
            .map(|r| r.score)
            .unwrap_or(0.0),
        action: group.action.as_str().to_string(),
        resolved_by: opts.actor.clone(),
        notes: opts.notes.clone(),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO resolution_records
            (group_id, canonical_id, archived_ids, score, action, resolved_by, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.group_id)
    .bind(&record.canonical_id)
    .bind(serde_json::to_string(&record.archived_ids)?)
    .bind(record.score)
    .bind(&record.action)
    .bind(&record.resolved_by)
    .bind(&record.notes)
    .bind(record.created_at)
    .execute(pool)
    .await?;

    store::append_audit(pool, "resolve", &group.group_id, &opts.actor, &opts.notes).await?;

    let detail = if failures.is_empty() {
        format!(
            "archived {} duplicate(s) -> canonical '{}'",
            archived.len(),
            record.canonical_id
        )
    } else {
        format!(
            "archived {} duplicate(s), {} failed: {}",
            archived.len(),
            failures.len(),
            failures.join("; ")
        )
    };

    Ok(GroupOutcome {
        group_id: group.group_id.clone(),
        status: OutcomeStatus::Succeeded,
        detail,
    })
}

/// Work out which members get archived under which canonical.
fn plan_units(group: &DuplicateGroup, opts: &ResolveOptions) -> Result<Option<Vec<ResolveUnit>>> {
    if group.action == RecommendedAction::SplitGroup {
        if opts.canonical.is_some() {
            bail!("cannot override the canonical of a split_group; resolve its sub-groups as reported");
        }
        if group.subgroups.is_empty() {
            return Ok(None);
        }
        return Ok(Some(
            group
                .subgroups
                .iter()
                .map(|sub| ResolveUnit {
                    canonical_id: sub.canonical_id.clone(),
                    duplicate_ids: sub
                        .member_ids
                        .iter()
                        .filter(|id| **id != sub.canonical_id)
                        .cloned()
                        .collect(),
                })
                .collect(),
        ));
    }

    let canonical_id = match &opts.canonical {
        Some(id) => {
            if !group.member_ids.contains(id) {
                bail!("canonical '{}' is not a member of this group", id);
            }
            id.clone()
        }
        None => match group.canonical_ids.first() {
            Some(id) => id.clone(),
            None => return Ok(None),
        },
    };

    let duplicate_ids: Vec<String> = group
        .member_ids
        .iter()
        .filter(|id| **id != canonical_id)
        .cloned()
        .collect();

    Ok(Some(vec![ResolveUnit {
        canonical_id,
        duplicate_ids,
    }]))
}

/// Snapshot, map, and remove one duplicate inside a single transaction.
/// Returns `Ok(false)` when the item is no longer live.
async fn archive_duplicate(
    pool: &SqlitePool,
    group: &DuplicateGroup,
    dup_id: &str,
    canonical_id: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT * FROM items WHERE id = ?")
        .bind(dup_id)
        .fetch_optional(&mut *tx)
        .await?;
    let item = match row {
        Some(ref r) => store::item_from_row(r),
        None => {
            tx.rollback().await?;
            return Ok(false);
        }
    };

    let existing: Option<String> =
        sqlx::query_scalar("SELECT canonical_id FROM canonical_mappings WHERE duplicate_id = ?")
            .bind(dup_id)
            .fetch_optional(&mut *tx)
            .await?;
    if existing.is_some() {
        tx.rollback().await?;
        return Ok(false);
    }

    let snapshot = serde_json::to_string(&item).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO archived_items (item_id, snapshot_json, reason, canonical_id, group_id, archived_at)
        VALUES (?, ?, 'duplicate_resolution', ?, ?, ?)
        "#,
    )
    .bind(dup_id)
    .bind(&snapshot)
    .bind(canonical_id)
    .bind(&group.group_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO canonical_mappings (duplicate_id, canonical_id, resolution_type, score, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(dup_id)
    .bind(canonical_id)
    .bind(group.action.as_str())
    .bind(
        group
            .ranking
            .iter()
            .find(|r| r.item_id == dup_id)
            .map(|r| r.score)
            .unwrap_or(0.0),
    )
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM items WHERE id = ?")
        .bind(dup_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}
