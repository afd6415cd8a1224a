//! Per-run report artifacts and the `report` / `groups` commands.
//!
//! Every completed analysis run writes one structured JSON document for
//! human review: run totals, per-category counts, and full per-group
//! detail (members, ranking, similarity submatrix, action, insights).

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::analyze;
use crate::config::Config;
use crate::db;
use crate::models::DuplicateGroup;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTotals {
    pub items: u64,
    pub pairs_compared: u64,
    pub pairs_retained: u64,
    pub groups: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub generated_at: i64,
    pub totals: RunTotals,
    pub categories: BTreeMap<String, u64>,
    pub groups: Vec<DuplicateGroup>,
}

pub fn build_report(
    run_id: &str,
    generated_at: i64,
    totals: RunTotals,
    categories: BTreeMap<String, u64>,
    groups: &[DuplicateGroup],
) -> RunReport {
    RunReport {
        run_id: run_id.to_string(),
        generated_at,
        totals,
        categories,
        groups: groups.to_vec(),
    }
}

/// Write the artifact to `<reports.dir>/<run_id>.json`.
pub fn write_artifact(config: &Config, report: &RunReport) -> Result<PathBuf> {
    std::fs::create_dir_all(&config.reports.dir).with_context(|| {
        format!(
            "Failed to create reports directory: {}",
            config.reports.dir.display()
        )
    })?;
    let path = config.reports.dir.join(format!("{}.json", report.run_id));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}

async fn load_report(config: &Config, run: Option<String>) -> Result<RunReport> {
    let pool = db::connect(config).await?;

    let run_id = match run {
        Some(id) => id,
        None => match analyze::latest_complete_run(&pool).await? {
            Some(id) => id,
            None => bail!("No completed analysis run found; run `lcr analyze` first"),
        },
    };

    let row = sqlx::query("SELECT finished_at, totals_json FROM analysis_runs WHERE id = ?")
        .bind(&run_id)
        .fetch_optional(&pool)
        .await?;
    let row = match row {
        Some(r) => r,
        None => bail!("Unknown run id: {}", run_id),
    };

    let finished_at: Option<i64> = row.get("finished_at");
    let totals: RunTotals = serde_json::from_str(row.get("totals_json")).unwrap_or_default();

    let groups = analyze::load_groups(&pool, &run_id).await?;
    let mut categories: BTreeMap<String, u64> = BTreeMap::new();
    for group in &groups {
        *categories
            .entry(group.category.as_str().to_string())
            .or_default() += 1;
    }

    pool.close().await;

    Ok(build_report(
        &run_id,
        finished_at.unwrap_or_default(),
        totals,
        categories,
        &groups,
    ))
}

/// `lcr report`: print the latest (or requested) run's report.
pub async fn run_report(config: &Config, run: Option<String>, json: bool) -> Result<()> {
    let report = load_report(config, run).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let date = chrono::DateTime::from_timestamp(report.generated_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();

    println!("report for run {}", report.run_id);
    println!("  generated: {}", date);
    println!("  items: {}", report.totals.items);
    println!(
        "  pairs compared: {} (retained {})",
        report.totals.pairs_compared, report.totals.pairs_retained
    );
    println!("  duplicate groups: {}", report.totals.groups);
    for (category, count) in &report.categories {
        println!("    {}: {}", category, count);
    }
    println!();

    for group in &report.groups {
        print_group(group);
    }

    Ok(())
}

/// `lcr groups`: one line per group, optionally filtered by category.
pub async fn run_groups(
    config: &Config,
    run: Option<String>,
    category: Option<String>,
) -> Result<()> {
    let report = load_report(config, run).await?;

    let mut shown = 0u64;
    for group in &report.groups {
        if let Some(ref wanted) = category {
            if !group.category.as_str().eq_ignore_ascii_case(wanted) {
                continue;
            }
        }
        println!(
            "{}  {}  {}  {}  [{}]",
            group.group_id,
            group.category.as_str(),
            group.action.as_str(),
            group.confidence.as_str(),
            group.member_ids.join(", ")
        );
        shown += 1;
    }

    if shown == 0 {
        println!("No groups.");
    }

    Ok(())
}

fn print_group(group: &DuplicateGroup) {
    println!(
        "group {}  [{}]  action: {}  confidence: {}",
        group.group_id,
        group.category.as_str(),
        group.action.as_str(),
        group.confidence.as_str()
    );
    println!("  members: {}", group.member_ids.join(", "));
    println!("  canonical: {}", group.canonical_ids.join(", "));
    for ranked in &group.ranking {
        println!(
            "    {}  score {:.3} (recency {:.2}, completeness {:.2}, grades {:.2}, structure {:.2})",
            ranked.item_id,
            ranked.score,
            ranked.recency,
            ranked.completeness,
            ranked.grade_coverage,
            ranked.structure_bonus
        );
    }
    for pair in &group.similarity {
        println!(
            "    {} ~ {}  {:.4} ({})",
            pair.item_a,
            pair.item_b,
            pair.score,
            pair.signal.as_str()
        );
    }
    for sub in &group.subgroups {
        println!(
            "    {}: [{}] canonical {}",
            sub.name,
            sub.member_ids.join(", "),
            sub.canonical_id
        );
    }
    for insight in &group.insights {
        println!("    note: {}", insight);
    }
    println!();
}
