use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::EngineError;

/// Fetch vectors for items that are missing embeddings or whose content
/// changed since they were embedded.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_items(&pool, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  items needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all items up to date");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) =
        embed_batches(config, &pool, provider.as_ref(), &model_name, &pending, batch_size).await;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete all vectors and re-fetch for every embeddable item. Useful when
/// switching models or dimensions.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM item_vectors").execute(&pool).await?;
    sqlx::query("DELETE FROM item_embeddings")
        .execute(&pool)
        .await?;

    println!("embed rebuild — cleared existing embeddings");

    let all_items = find_pending_items(&pool, &model_name, None).await?;

    if all_items.is_empty() {
        println!("  no items to embed");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) =
        embed_batches(config, &pool, provider.as_ref(), &model_name, &all_items, batch_size).await;

    println!("embed rebuild");
    println!("  total items: {}", all_items.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Inline fetch at the start of an analysis run. Non-fatal: failures leave
/// the affected items to the hash+title signals.
pub async fn embed_pending_inline(config: &Config, pool: &SqlitePool) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Warning: could not create embedding provider: {}", e);
            return (0, 0);
        }
    };
    let model_name = provider.model_name().to_string();

    let pending = match find_pending_items(pool, &model_name, None).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Warning: could not query pending embeddings: {}", e);
            return (0, 0);
        }
    };
    if pending.is_empty() {
        return (0, 0);
    }

    embed_batches(
        config,
        pool,
        provider.as_ref(),
        &model_name,
        &pending,
        config.embedding.batch_size,
    )
    .await
}

async fn embed_batches(
    config: &Config,
    pool: &SqlitePool,
    provider: &dyn embedding::EmbeddingProvider,
    model_name: &str,
    pending: &[PendingItem],
    batch_size: usize,
) -> (u64, u64) {
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    match upsert_embedding(
                        pool,
                        &item.item_id,
                        model_name,
                        provider.dims(),
                        &item.content_hash,
                        vec,
                    )
                    .await
                    {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            eprintln!(
                                "Warning: failed to store embedding for {}: {}",
                                item.item_id, e
                            );
                            failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                let err = EngineError::ExternalService(format!("{:#}", e));
                eprintln!("Warning: embedding batch failed: {}", err);
                failed += batch.len() as u64;
            }
        }
    }

    (embedded, failed)
}

struct PendingItem {
    item_id: String,
    text: String,
    content_hash: String,
}

/// Items with a content-kind hash that are missing a vector for this model
/// or carry a stale one. Metadata-only items have no text to embed.
async fn find_pending_items(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingItem>> {
    let limit_val = limit.unwrap_or(usize::MAX) as i64;

    let rows = sqlx::query(
        r#"
        SELECT i.id, i.title, i.body, i.content_hash
        FROM items i
        LEFT JOIN item_embeddings e ON e.item_id = i.id AND e.model = ?
        WHERE i.hash_kind = 'content' AND (e.item_id IS NULL OR e.hash != i.content_hash)
        ORDER BY i.id
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    let results: Vec<PendingItem> = rows
        .iter()
        .map(|row| {
            let title: String = row.get("title");
            let body: String = row.get("body");
            PendingItem {
                item_id: row.get("id"),
                text: format!("{}\n\n{}", title, body),
                content_hash: row.get("content_hash"),
            }
        })
        .collect();

    Ok(results)
}

async fn upsert_embedding(
    pool: &SqlitePool,
    item_id: &str,
    model: &str,
    dims: usize,
    content_hash: &str,
    vector: &[f32],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO item_embeddings (item_id, model, dims, hash, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(item_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(item_id)
    .bind(model)
    .bind(dims as i64)
    .bind(content_hash)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO item_vectors (item_id, embedding) VALUES (?, ?)
        ON CONFLICT(item_id) DO UPDATE SET embedding = excluded.embedding
        "#,
    )
    .bind(item_id)
    .bind(embedding::vec_to_blob(vector))
    .execute(pool)
    .await?;

    Ok(())
}
