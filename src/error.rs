//! Error taxonomy for the mutating engines.
//!
//! Per-item and per-group failures are classified here, aggregated into
//! run summaries, and never abort the whole batch. The CLI layer wraps
//! everything in `anyhow`; only corpus-unreadable and exclusive-access
//! failures propagate fatally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed item fields. The affected signal or unit is
    /// skipped; the rest of the run continues.
    #[error("invalid item data for '{item_id}': {reason}")]
    InputData { item_id: String, reason: String },

    /// Embedding provider down or rate-limited. Similarity degrades to
    /// the remaining signals.
    #[error("embedding provider unavailable: {0}")]
    ExternalService(String),

    /// Group already resolved, or a member sits in a protected in-flight
    /// workflow. Skipped explicitly, never silently merged.
    #[error("group '{group_id}' not resolved: {reason}")]
    ResolutionConflict { group_id: String, reason: String },

    /// Write failure during archive or mapping. Aborts that duplicate
    /// only; the rest of the group continues.
    #[error("persistence failure for '{item_id}': {source}")]
    Persistence {
        item_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// Restore target id already live. Skipped and flagged for manual
    /// reconciliation.
    #[error("cannot restore '{item_id}': an item with this id is already live")]
    UndoConflict { item_id: String },
}
