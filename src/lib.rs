//! # Lesson Curator
//!
//! A duplicate detection and consolidation engine for curated lesson
//! libraries.
//!
//! Lesson Curator compares every pair of items in a library using
//! heterogeneous similarity signals (content hash, embedding cosine,
//! title similarity), clusters related items transitively into duplicate
//! groups, categorizes each group, ranks members to recommend a canonical,
//! and executes reversible resolutions with a full audit trail.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────┐   ┌────────────┐
//! │  Import   │──▶│ Similarity  │──▶│ Cluster  │──▶│ Categorize  │
//! │ (JSON)    │   │ hash/vec/   │   │ (union-  │   │  + Score    │
//! └──────────┘   │ title       │   │  find)   │   └─────┬──────┘
//!                └────────────┘   └─────────┘         │
//!                                          ┌───────────┤
//!                                          ▼           ▼
//!                                    ┌──────────┐ ┌──────────┐
//!                                    │ Resolve / │ │  Report   │
//!                                    │   Undo    │ │ (JSON)    │
//!                                    └──────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lcr init                        # create database
//! lcr import ./exports            # load lesson JSON files
//! lcr embed pending               # fetch missing embeddings
//! lcr analyze                     # find duplicate groups
//! lcr resolve all --dry-run       # preview consolidation
//! lcr resolve all --actor maria   # execute it
//! lcr undo all                    # change your mind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration: thresholds, weights, providers |
//! | [`models`] | Core data types |
//! | [`import`] | Ingestion boundary and metadata normalization |
//! | [`fingerprint`] | Text normalization and content hashing |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`similarity`] | Pairwise similarity engine |
//! | [`cluster`] | Disjoint-set transitive grouping |
//! | [`categorize`] | Group categorization and insights |
//! | [`scoring`] | Canonical ranking |
//! | [`analyze`] | Run orchestration with cancel/resume |
//! | [`resolve`] | Resolution executor |
//! | [`undo`] | Undo engine |
//! | [`report`] | Run report artifacts |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyze;
pub mod categorize;
pub mod cluster;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod import;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod undo;
