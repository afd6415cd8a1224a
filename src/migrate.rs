use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Live item set
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            hash_kind TEXT NOT NULL DEFAULT 'content',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            grade_levels TEXT NOT NULL DEFAULT '[]',
            themes TEXT NOT NULL DEFAULT '[]',
            cultural_tags TEXT NOT NULL DEFAULT '[]',
            season_tags TEXT NOT NULL DEFAULT '[]',
            ingredients TEXT NOT NULL DEFAULT '[]',
            skills TEXT NOT NULL DEFAULT '[]',
            quality_flags TEXT NOT NULL DEFAULT '[]',
            workflow_state TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            extra_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Embedding bookkeeping (model + content hash at embed time, for staleness)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_embeddings (
            item_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_vectors (
            item_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Per-run analysis cache (regenerated per run, cheap to drop)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            status TEXT NOT NULL DEFAULT 'running',
            resume_index INTEGER NOT NULL DEFAULT 0,
            config_json TEXT NOT NULL,
            totals_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_pairs (
            run_id TEXT NOT NULL,
            item_a TEXT NOT NULL,
            item_b TEXT NOT NULL,
            score REAL NOT NULL,
            signal TEXT NOT NULL,
            PRIMARY KEY (run_id, item_a, item_b)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_groups (
            group_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            category TEXT NOT NULL,
            confidence TEXT NOT NULL,
            action TEXT NOT NULL,
            member_ids TEXT NOT NULL,
            canonical_ids TEXT NOT NULL,
            similarity_json TEXT NOT NULL,
            ranking_json TEXT NOT NULL,
            insights TEXT NOT NULL,
            subgroups TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Durable resolution state (removed only by undo)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archived_items (
            item_id TEXT PRIMARY KEY,
            snapshot_json TEXT NOT NULL,
            reason TEXT NOT NULL,
            canonical_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            archived_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_mappings (
            duplicate_id TEXT PRIMARY KEY,
            canonical_id TEXT NOT NULL,
            resolution_type TEXT NOT NULL,
            score REAL NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolution_records (
            group_id TEXT PRIMARY KEY,
            canonical_id TEXT NOT NULL,
            archived_ids TEXT NOT NULL,
            score REAL NOT NULL,
            action TEXT NOT NULL,
            resolved_by TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Append-only attribution; survives undo
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            group_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_updated_at ON items(updated_at DESC)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_pairs_run ON run_pairs(run_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_groups_run ON run_groups(run_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_archived_items_group ON archived_items(group_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_group ON audit_log(group_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
