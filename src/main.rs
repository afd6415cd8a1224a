//! # Lesson Curator CLI (`lcr`)
//!
//! The `lcr` binary drives the deduplication engine: database setup,
//! ingestion, embedding fetch, duplicate analysis, and the reversible
//! resolve/undo workflow.
//!
//! ## Usage
//!
//! ```bash
//! lcr --config ./config/lcr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lcr init` | Create the SQLite database and run schema migrations |
//! | `lcr import <dir>` | Load lesson JSON exports into the item store |
//! | `lcr embed pending` | Fetch missing or stale embedding vectors |
//! | `lcr embed rebuild` | Delete and re-fetch all embedding vectors |
//! | `lcr analyze` | Run duplicate detection and write the run report |
//! | `lcr groups` | List a run's duplicate groups |
//! | `lcr resolve <group\|all>` | Archive non-canonical members of group(s) |
//! | `lcr undo <group\|all>` | Restore archived members, delete records |
//! | `lcr report` | Print the latest run report |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lesson_curator::progress::ProgressMode;
use lesson_curator::resolve::ResolveOptions;
use lesson_curator::undo::UndoOptions;
use lesson_curator::{analyze, config, embed_cmd, import, migrate, report, resolve, undo};

/// Lesson Curator — duplicate detection and consolidation for curated
/// lesson libraries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lcr.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lcr",
    about = "Lesson Curator — duplicate detection and consolidation for curated lesson libraries",
    version,
    long_about = "Lesson Curator compares every pair of lessons in a library using content \
    hashes, embedding vectors, and title similarity, clusters duplicates transitively, \
    recommends a canonical per group, and executes reversible, audited consolidation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lcr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it multiple times is safe.
    Init,

    /// Load lesson JSON exports into the item store.
    ///
    /// Scans the directory for `*.json` files, validates and normalizes
    /// each record (metadata arrays, timestamps, quality flags), and
    /// upserts them. Files may carry a precomputed `embedding` array.
    Import {
        /// Directory containing item JSON files.
        dir: PathBuf,
    },

    /// Manage embedding vectors.
    ///
    /// Vectors are produced by an external provider; these subcommands
    /// fetch and store them ahead of analysis.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Run duplicate detection over the live item set.
    ///
    /// Scores all pairs, clusters duplicates, categorizes groups, ranks
    /// canonical candidates, and writes a per-run JSON report. Ctrl-C
    /// cancels gracefully; rerun with --resume to continue.
    Analyze {
        /// Continue the most recently cancelled run.
        #[arg(long)]
        resume: bool,

        /// Only analyze the first N items (for smoke tests).
        #[arg(long)]
        limit: Option<usize>,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// List duplicate groups from a run.
    Groups {
        /// Run id (defaults to the latest completed run).
        #[arg(long)]
        run: Option<String>,

        /// Only show groups in this category (e.g. EXACT_CONTENT).
        #[arg(long)]
        category: Option<String>,
    },

    /// Resolve duplicate group(s): archive non-canonical members.
    ///
    /// Respects each group's recommended action. Groups already resolved
    /// or containing a member in an unfinished external workflow are
    /// skipped and reported.
    Resolve {
        /// Group id, or `all` for every group of the latest run.
        target: String,

        /// Override the recommended canonical (single group only).
        #[arg(long)]
        canonical: Option<String>,

        /// Actor recorded in the resolution record and audit trail.
        #[arg(long)]
        actor: Option<String>,

        /// Free-text note recorded with the action.
        #[arg(long, default_value = "")]
        notes: String,

        /// Compute and report the outcome without mutating anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Undo resolution(s): restore archived members, delete records.
    Undo {
        /// Group id, or `all` for every resolved group.
        target: String,

        /// Actor recorded in the audit trail.
        #[arg(long)]
        actor: Option<String>,

        /// Free-text note recorded with the action.
        #[arg(long, default_value = "")]
        notes: String,

        /// Compute and report the outcome without mutating anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print a run report.
    Report {
        /// Run id (defaults to the latest completed run).
        #[arg(long)]
        run: Option<String>,

        /// Emit the full JSON artifact instead of the human summary.
        #[arg(long)]
        json: bool,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Fetch vectors for items that are missing or stale.
    Pending {
        /// Maximum number of items to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without fetching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and re-fetch all vectors.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn resolve_actor(actor: Option<String>) -> String {
    actor
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "operator".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { dir } => {
            import::run_import(&cfg, &dir).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Analyze {
            resume,
            limit,
            progress,
        } => {
            let mode = match progress.as_deref() {
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: {}. Use off, human, or json.", value)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            analyze::run_analyze(&cfg, resume, limit, mode).await?;
        }
        Commands::Groups { run, category } => {
            report::run_groups(&cfg, run, category).await?;
        }
        Commands::Resolve {
            target,
            canonical,
            actor,
            notes,
            dry_run,
        } => {
            let opts = ResolveOptions {
                target,
                canonical,
                actor: resolve_actor(actor),
                notes,
                dry_run,
            };
            resolve::run_resolve(&cfg, &opts).await?;
        }
        Commands::Undo {
            target,
            actor,
            notes,
            dry_run,
        } => {
            let opts = UndoOptions {
                target,
                actor: resolve_actor(actor),
                notes,
                dry_run,
            };
            undo::run_undo(&cfg, &opts).await?;
        }
        Commands::Report { run, json } => {
            report::run_report(&cfg, run, json).await?;
        }
    }

    Ok(())
}
