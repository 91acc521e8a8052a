//! # ragsync
//!
//! Incremental, idempotent indexing of document trees into a local vector
//! index.
//!
//! Every run fingerprints the files under the configured sources, skips the
//! ones whose content has not changed since they were last indexed, splits
//! the rest into overlapping fragments and upserts them under deterministic
//! ids. Running twice over the same tree writes nothing the second time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────┐   ┌────────┐   ┌──────────────┐
//! │ Scanner  │──▶│ Change cache │──▶│ Chunker │──▶│ Tagger │──▶│ Vector store │
//! │ (walk)   │   │ (SHA-256)    │   │         │   │        │   │ (SQLite)     │
//! └──────────┘   └──────────────┘   └─────────┘   └────────┘   └──────────────┘
//!                       ▲                                              ▲
//!                       └────────────── Orchestrator ──────────────────┘
//!                                            ▲
//!                               Scheduler (once / interval / cron)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragsync run-once                      # index what changed
//! ragsync run-once --dry-run            # report what would change
//! ragsync start-interval                # re-run every interval_minutes
//! ragsync install-periodic-job          # register with crontab
//! ragsync stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-file and periodic-job error types |
//! | [`logging`] | Subscriber setup and rotating log file |
//! | [`fingerprint`] | Content hashing |
//! | [`cache`] | Change cache |
//! | [`connector_fs`] | Filesystem scanner |
//! | [`chunk`] | Recursive text segmentation |
//! | [`tagging`] | Fragment ids and metadata |
//! | [`embedding`] | Embedding backends |
//! | [`store`] | Vector store abstraction |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`ingest`] | Update orchestration |
//! | [`scheduler`] | One-shot and interval runs |
//! | [`cron`] | Crontab registration |
//! | [`stats`] | Index statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod cron;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod scheduler;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod tagging;
