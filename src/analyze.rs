//! Analysis run orchestration.
//!
//! One run: load the live corpus in stable id order, make sure embeddings
//! are as fresh as the provider allows, score all pairs, cluster, categorize,
//! rank, persist the run's groups, and emit the report artifact. Similarity
//! and group rows are a recomputable cache scoped to the run id; durable
//! resolution state is never touched here.
//!
//! Ctrl-C is honored between comparison batches: the run persists its
//! resume index and exits as `cancelled`, and `analyze --resume` picks up
//! from there.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::categorize::categorize_group;
use crate::cluster::connected_components;
use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::models::{
    DuplicateGroup, Item, RecommendedAction, SimilarityPair, SimilaritySignal, SubGroup,
};
use crate::progress::ProgressMode;
use crate::report;
use crate::scoring::rank_members;
use crate::similarity::{scan_pairs, total_pairs, CompareItem, ScanStatus};
use crate::store;

pub async fn run_analyze(
    config: &Config,
    resume: bool,
    limit: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let reporter = progress.reporter();

    // Refresh embeddings before the comparison loop; provider failure
    // degrades the run to hash+title signals.
    if config.embedding.is_enabled() {
        let (embedded, failed) = embed_cmd::embed_pending_inline(config, &pool).await;
        if embedded > 0 || failed > 0 {
            eprintln!(
                "embeddings refreshed: {} fetched, {} failed",
                embedded, failed
            );
        }
    }

    let mut items = store::load_items(&pool).await?;
    if let Some(lim) = limit {
        items.truncate(lim);
    }

    if items.len() < 2 {
        println!("analyze");
        println!("  items: {}", items.len());
        println!("  nothing to compare");
        pool.close().await;
        return Ok(());
    }

    let vectors = store::load_vector_map(&pool).await?;
    let without_vectors = items.iter().filter(|i| !vectors.contains_key(&i.id)).count();
    if without_vectors > 0 {
        eprintln!(
            "Warning: {} of {} items have no embedding; their pairs use hash and title signals only",
            without_vectors,
            items.len()
        );
    }

    let run_signature = serde_json::json!({
        "thresholds": serde_json::to_value(ThresholdsView::from(config))?,
        "items": items.len(),
    })
    .to_string();

    let (run_id, start_row) = if resume {
        resume_run(&pool, &run_signature).await?
    } else {
        let run_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO analysis_runs (id, started_at, status, resume_index, config_json) VALUES (?, ?, 'running', 0, ?)",
        )
        .bind(&run_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(&run_signature)
        .execute(&pool)
        .await?;
        (run_id, 0usize)
    };

    let compare_items: Vec<CompareItem> = items
        .iter()
        .map(|item| CompareItem::new(item, vectors.get(&item.id).cloned()))
        .collect();
    let compare_items = Arc::new(compare_items);

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancel);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_flag.store(true, Ordering::SeqCst);
        }
    });

    let status = scan_pairs(
        &pool,
        &run_id,
        Arc::clone(&compare_items),
        config,
        reporter.as_ref(),
        cancel,
        start_row,
    )
    .await?;
    signal_task.abort();

    let pairs_retained = match status {
        ScanStatus::Cancelled { resume_index } => {
            sqlx::query("UPDATE analysis_runs SET status = 'cancelled' WHERE id = ?")
                .bind(&run_id)
                .execute(&pool)
                .await?;
            println!("analyze (cancelled)");
            println!("  run: {}", run_id);
            println!("  resume index: {} of {} items", resume_index, items.len());
            println!("  rerun with --resume to continue");
            pool.close().await;
            return Ok(());
        }
        ScanStatus::Complete { pairs_retained, .. } => pairs_retained,
    };

    let pairs = load_run_pairs(&pool, &run_id).await?;
    let now = chrono::Utc::now().timestamp();
    let groups = build_groups(&items, &pairs, config, now, &run_id);

    // Recomputed wholesale on every (re)run of this run id.
    sqlx::query("DELETE FROM run_groups WHERE run_id = ?")
        .bind(&run_id)
        .execute(&pool)
        .await?;
    for group in &groups {
        persist_group(&pool, group).await?;
    }

    let mut category_counts: BTreeMap<String, u64> = BTreeMap::new();
    for group in &groups {
        *category_counts
            .entry(group.category.as_str().to_string())
            .or_default() += 1;
    }

    let totals = report::RunTotals {
        items: items.len() as u64,
        pairs_compared: total_pairs(items.len()),
        pairs_retained,
        groups: groups.len() as u64,
    };

    sqlx::query(
        "UPDATE analysis_runs SET status = 'complete', finished_at = ?, totals_json = ? WHERE id = ?",
    )
    .bind(now)
    .bind(serde_json::to_string(&totals)?)
    .bind(&run_id)
    .execute(&pool)
    .await?;

    let artifact = report::build_report(&run_id, now, totals.clone(), category_counts.clone(), &groups);
    let artifact_path = report::write_artifact(config, &artifact)?;

    println!("analyze");
    println!("  run: {}", run_id);
    println!("  items: {}", totals.items);
    println!(
        "  pairs compared: {} (retained {})",
        totals.pairs_compared, totals.pairs_retained
    );
    println!("  duplicate groups: {}", totals.groups);
    for (category, count) in &category_counts {
        println!("    {}: {}", category, count);
    }
    println!("  report: {}", artifact_path.display());
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Thresholds as they entered the run, for the resume-compatibility check.
#[derive(serde::Serialize)]
struct ThresholdsView {
    related: f64,
    grouping: f64,
    auto_merge: f64,
    near_exact: f64,
    subgroup: f64,
}

impl From<&Config> for ThresholdsView {
    fn from(config: &Config) -> Self {
        let t = &config.thresholds;
        Self {
            related: t.related,
            grouping: t.grouping,
            auto_merge: t.auto_merge,
            near_exact: t.near_exact,
            subgroup: t.subgroup,
        }
    }
}

async fn resume_run(pool: &SqlitePool, run_signature: &str) -> Result<(String, usize)> {
    let row = sqlx::query(
        "SELECT id, resume_index, config_json FROM analysis_runs WHERE status = 'cancelled' ORDER BY started_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => bail!("No cancelled analysis run to resume"),
    };

    let stored_signature: String = row.get("config_json");
    if stored_signature != run_signature {
        bail!(
            "Cannot resume: thresholds or corpus changed since the run was cancelled. Start a fresh analyze."
        );
    }

    let run_id: String = row.get("id");
    let resume_index: i64 = row.get("resume_index");

    sqlx::query("UPDATE analysis_runs SET status = 'running' WHERE id = ?")
        .bind(&run_id)
        .execute(pool)
        .await?;

    Ok((run_id, resume_index as usize))
}

async fn load_run_pairs(pool: &SqlitePool, run_id: &str) -> Result<Vec<SimilarityPair>> {
    let rows = sqlx::query(
        "SELECT item_a, item_b, score, signal FROM run_pairs WHERE run_id = ? ORDER BY item_a, item_b",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SimilarityPair {
            item_a: row.get("item_a"),
            item_b: row.get("item_b"),
            score: row.get("score"),
            signal: SimilaritySignal::parse(row.get("signal")),
        })
        .collect())
}

/// Cluster retained pairs at the grouping threshold, then categorize and
/// rank every component with at least two members. Deterministic for a
/// given corpus and threshold profile, apart from the group UUIDs.
pub fn build_groups(
    items: &[Item],
    pairs: &[SimilarityPair],
    config: &Config,
    now: i64,
    run_id: &str,
) -> Vec<DuplicateGroup> {
    let index_by_id: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.as_str(), i))
        .collect();

    let edges = pairs
        .iter()
        .filter(|p| p.score >= config.thresholds.grouping)
        .filter_map(|p| {
            match (
                index_by_id.get(p.item_a.as_str()),
                index_by_id.get(p.item_b.as_str()),
            ) {
                (Some(&a), Some(&b)) => Some((a, b)),
                _ => None,
            }
        });

    let components = connected_components(items.len(), edges);

    let mut groups = Vec::with_capacity(components.len());
    for component in components {
        let members: Vec<&Item> = component.iter().map(|&i| &items[i]).collect();
        let member_ids: BTreeSet<&str> = members.iter().map(|m| m.id.as_str()).collect();

        let submatrix: Vec<SimilarityPair> = pairs
            .iter()
            .filter(|p| {
                member_ids.contains(p.item_a.as_str()) && member_ids.contains(p.item_b.as_str())
            })
            .cloned()
            .collect();

        let categorization = categorize_group(&members, &submatrix, &config.thresholds);
        let ranking = rank_members(&members, now, &config.scoring);

        let subgroups: Vec<SubGroup> = categorization
            .subgroup_members
            .iter()
            .enumerate()
            .map(|(i, ids)| {
                let sub_members: Vec<&Item> = members
                    .iter()
                    .filter(|m| ids.contains(&m.id))
                    .copied()
                    .collect();
                let sub_ranking = rank_members(&sub_members, now, &config.scoring);
                SubGroup {
                    name: format!("sub-{}", i + 1),
                    member_ids: ids.clone(),
                    canonical_id: sub_ranking[0].item_id.clone(),
                }
            })
            .collect();

        let canonical_ids: Vec<String> = match categorization.action {
            RecommendedAction::KeepAll => members.iter().map(|m| m.id.clone()).collect(),
            RecommendedAction::SplitGroup => {
                subgroups.iter().map(|s| s.canonical_id.clone()).collect()
            }
            _ => vec![ranking[0].item_id.clone()],
        };

        groups.push(DuplicateGroup {
            group_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            category: categorization.category,
            confidence: categorization.confidence,
            action: categorization.action,
            member_ids: members.iter().map(|m| m.id.clone()).collect(),
            similarity: submatrix,
            canonical_ids,
            ranking,
            insights: categorization.insights,
            subgroups,
        });
    }

    groups
}

async fn persist_group(pool: &SqlitePool, group: &DuplicateGroup) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO run_groups (
            group_id, run_id, category, confidence, action,
            member_ids, canonical_ids, similarity_json, ranking_json, insights, subgroups
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&group.group_id)
    .bind(&group.run_id)
    .bind(group.category.as_str())
    .bind(group.confidence.as_str())
    .bind(group.action.as_str())
    .bind(serde_json::to_string(&group.member_ids)?)
    .bind(serde_json::to_string(&group.canonical_ids)?)
    .bind(serde_json::to_string(&group.similarity)?)
    .bind(serde_json::to_string(&group.ranking)?)
    .bind(serde_json::to_string(&group.insights)?)
    .bind(serde_json::to_string(&group.subgroups)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one run's groups back from the cache tables.
pub async fn load_groups(pool: &SqlitePool, run_id: &str) -> Result<Vec<DuplicateGroup>> {
    let rows = sqlx::query("SELECT * FROM run_groups WHERE run_id = ? ORDER BY member_ids")
        .bind(run_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(group_from_row).collect()
}

pub async fn load_group(pool: &SqlitePool, group_id: &str) -> Result<Option<DuplicateGroup>> {
    let row = sqlx::query("SELECT * FROM run_groups WHERE group_id = ?")
        .bind(group_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(group_from_row).transpose()
}

fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DuplicateGroup> {
    let category: String = row.get("category");
    let confidence: String = row.get("confidence");
    let action: String = row.get("action");
    Ok(DuplicateGroup {
        group_id: row.get("group_id"),
        run_id: row.get("run_id"),
        category: serde_json::from_value(serde_json::Value::String(category))?,
        confidence: serde_json::from_value(serde_json::Value::String(confidence))?,
        action: serde_json::from_value(serde_json::Value::String(action))?,
        member_ids: serde_json::from_str(row.get("member_ids"))?,
        similarity: serde_json::from_str(row.get("similarity_json"))?,
        canonical_ids: serde_json::from_str(row.get("canonical_ids"))?,
        ranking: serde_json::from_str(row.get("ranking_json"))?,
        insights: serde_json::from_str(row.get("insights"))?,
        subgroups: serde_json::from_str(row.get("subgroups"))?,
    })
}

/// The most recent completed run, if any.
pub async fn latest_complete_run(pool: &SqlitePool) -> Result<Option<String>> {
    let run: Option<String> = sqlx::query_scalar(
        "SELECT id FROM analysis_runs WHERE status = 'complete' ORDER BY finished_at DESC, started_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(run)
}
