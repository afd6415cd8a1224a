//! Pairwise similarity engine.
//!
//! Combines three heterogeneous signals per pair:
//! - exact content-hash equality (score 1.0),
//! - embedding cosine similarity,
//! - title similarity (normalized edit distance or token-set overlap).
//!
//! The combined score takes the strongest available signal (one strong
//! signal is sufficient evidence), with one refinement: when both the
//! embedding and the title clear the related threshold, the embedding
//! score wins even if the title ratio is higher. A shared title on two
//! genuinely different lessons must not mask the semantic distance the
//! vectors can see.
//!
//! Pairs below the related threshold are discarded, not stored. The scan
//! is O(n²) and runs in outer-row batches across blocking workers, with
//! progress after every batch and incremental persistence so a cancelled
//! run can resume.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::models::{HashKind, Item, SimilarityPair, SimilaritySignal};
use crate::progress::{AnalysisProgressEvent, AnalysisProgressReporter};

/// Precomputed per-item comparison state, built once before the scan.
#[derive(Debug, Clone)]
pub struct CompareItem {
    pub id: String,
    pub hash: String,
    pub hash_is_content: bool,
    pub title_norm: String,
    pub title_tokens: BTreeSet<String>,
    pub vector: Option<Vec<f32>>,
}

impl CompareItem {
    pub fn new(item: &Item, vector: Option<Vec<f32>>) -> Self {
        let title_norm = item.title.to_lowercase();
        let title_tokens = token_set(&item.title);
        Self {
            id: item.id.clone(),
            hash: item.content_hash.clone(),
            hash_is_content: item.hash_kind == HashKind::Content,
            title_norm,
            title_tokens,
            vector: vector.filter(|v| v.iter().any(|x| *x != 0.0)),
        }
    }
}

/// Lowercased alphanumeric tokens of a title.
pub fn token_set(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard overlap of two token sets. Empty-vs-anything is 0.
pub fn token_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Title similarity: the stronger of normalized Levenshtein ratio and
/// token-set overlap, both case-insensitive.
pub fn title_similarity(a: &CompareItem, b: &CompareItem) -> f64 {
    if a.title_norm.is_empty() || b.title_norm.is_empty() {
        return 0.0;
    }
    let edit = strsim::normalized_levenshtein(&a.title_norm, &b.title_norm);
    let tokens = token_jaccard(&a.title_tokens, &b.title_tokens);
    edit.max(tokens)
}

/// Combine available signals into a retained score, or `None` when the
/// pair falls below the related threshold.
fn combine_signals(
    exact: bool,
    embedding: Option<f64>,
    title: Option<f64>,
    related: f64,
) -> Option<(f64, SimilaritySignal)> {
    if exact {
        return Some((1.0, SimilaritySignal::Exact));
    }

    if let (Some(e), Some(t)) = (embedding, title) {
        if e >= related && t >= related {
            return Some((e, SimilaritySignal::Embedding));
        }
    }

    let mut best: Option<(f64, SimilaritySignal)> = None;
    if let Some(e) = embedding {
        if e >= related {
            best = Some((e, SimilaritySignal::Embedding));
        }
    }
    if let Some(t) = title {
        if t >= related && best.map(|(s, _)| t > s).unwrap_or(true) {
            best = Some((t, SimilaritySignal::Title));
        }
    }
    best
}

/// Score one pair. Returns `None` for unrelated pairs.
pub fn pair_score(
    a: &CompareItem,
    b: &CompareItem,
    related: f64,
) -> Option<(f64, SimilaritySignal)> {
    let exact = a.hash_is_content && b.hash_is_content && a.hash == b.hash;

    let embedding = match (&a.vector, &b.vector) {
        (Some(va), Some(vb)) => {
            let cos = cosine_similarity(va, vb) as f64;
            // Scores are bounded to [0, 1]; negative cosine is no evidence.
            Some(cos.clamp(0.0, 1.0))
        }
        _ => None,
    };

    let title = Some(title_similarity(a, b));

    combine_signals(exact, embedding, title, related)
}

/// Result of a pairwise scan.
#[derive(Debug)]
pub enum ScanStatus {
    Complete {
        pairs_compared: u64,
        pairs_retained: u64,
    },
    /// Cancelled between batches; `resume_index` is the first outer row
    /// not yet compared.
    Cancelled { resume_index: usize },
}

/// Total unordered pairs over `n` items.
pub fn total_pairs(n: usize) -> u64 {
    (n as u64) * (n.saturating_sub(1) as u64) / 2
}

fn pairs_through_row(n: usize, rows_done: usize) -> u64 {
    let mut done = 0u64;
    for i in 0..rows_done.min(n) {
        done += (n - 1 - i) as u64;
    }
    done
}

/// Compare all pairs from `start_row` onward, persisting retained pairs
/// per batch and honoring the cancel flag between batches.
#[allow(clippy::too_many_arguments)]
pub async fn scan_pairs(
    pool: &SqlitePool,
    run_id: &str,
    items: Arc<Vec<CompareItem>>,
    config: &Config,
    reporter: &dyn AnalysisProgressReporter,
    cancel: Arc<AtomicBool>,
    start_row: usize,
) -> Result<ScanStatus> {
    let n = items.len();
    let total = total_pairs(n);
    let related = config.thresholds.related;
    let batch_rows = config.analysis.batch_rows;
    let workers = if config.analysis.workers > 0 {
        config.analysis.workers
    } else {
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1)
    };

    let retained_so_far: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM run_pairs WHERE run_id = ?")
        .bind(run_id)
        .fetch_one(pool)
        .await?;
    let mut retained_total = retained_so_far as u64;

    let mut row = start_row;
    while row < n {
        if cancel.load(Ordering::SeqCst) {
            return Ok(ScanStatus::Cancelled { resume_index: row });
        }

        let batch_end = (row + batch_rows).min(n);

        // Split this batch's outer rows across blocking workers.
        let rows_per_worker = ((batch_end - row) + workers - 1) / workers;
        let mut handles = Vec::new();
        let mut chunk_start = row;
        while chunk_start < batch_end {
            let chunk_end = (chunk_start + rows_per_worker).min(batch_end);
            let items = Arc::clone(&items);
            handles.push(tokio::task::spawn_blocking(move || {
                compare_rows(&items, chunk_start, chunk_end, related)
            }));
            chunk_start = chunk_end;
        }

        let mut batch_pairs = Vec::new();
        for handle in handles {
            batch_pairs.extend(handle.await?);
        }

        for pair in &batch_pairs {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO run_pairs (run_id, item_a, item_b, score, signal)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&pair.item_a)
            .bind(&pair.item_b)
            .bind(pair.score)
            .bind(pair.signal.as_str())
            .execute(pool)
            .await?;
        }
        retained_total += batch_pairs.len() as u64;

        row = batch_end;
        sqlx::query("UPDATE analysis_runs SET resume_index = ? WHERE id = ?")
            .bind(row as i64)
            .bind(run_id)
            .execute(pool)
            .await?;

        reporter.report(AnalysisProgressEvent::Comparing {
            done: pairs_through_row(n, row),
            total,
        });
    }

    Ok(ScanStatus::Complete {
        pairs_compared: total - pairs_through_row(n, start_row),
        pairs_retained: retained_total,
    })
}

/// Score all pairs (i, j) with `start <= i < end`, `i < j < n`. Pure CPU
/// work; runs on a blocking worker.
fn compare_rows(
    items: &[CompareItem],
    start: usize,
    end: usize,
    related: f64,
) -> Vec<SimilarityPair> {
    let mut retained = Vec::new();
    for i in start..end {
        for j in (i + 1)..items.len() {
            if let Some((score, signal)) = pair_score(&items[i], &items[j], related) {
                retained.push(SimilarityPair {
                    item_a: items[i].id.clone(),
                    item_b: items[j].id.clone(),
                    score,
                    signal,
                });
            }
        }
    }
    retained
}
