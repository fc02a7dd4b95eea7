//! # Zotero Index
//!
//! An incremental semantic index over a local Zotero library.
//!
//! Each update run reads the library (read-only), collapses preprint /
//! published duplicates, works out which items actually need work, extracts
//! attachment text only for those, and upserts the results in batches into
//! a SQLite-backed vector index. Re-running with nothing changed is cheap:
//! items already indexed with fulltext are never re-extracted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────────┐   ┌──────────────┐
//! │ zotero.sqlite│──▶│ Pipeline                  │──▶│ Index        │
//! │ + storage/   │   │ dedup → probe → extract   │   │ SQLite + vec │
//! └──────────────┘   └───────────────────────────┘   └──────┬───────┘
//!                                                           │
//!                                  ┌────────────────────────┤
//!                                  ▼                        ▼
//!                            ┌──────────┐            ┌──────────┐
//!                            │   CLI    │            │   HTTP   │
//!                            │  (zidx)  │            │  server  │
//!                            └──────────┘            └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`source`] | Read-only Zotero reader and attachment extraction |
//! | [`extract`] | PDF / HTML / text extraction with size and length caps |
//! | [`dedup`] | Preprint / journal-article duplicate collapsing |
//! | [`probe`] | Per-item "does this need work?" decision |
//! | [`document`] | Text and metadata for the index |
//! | [`pipeline`] | The update run: batches, counters, cancellation |
//! | [`guard`] | Single-run guard and cross-process lock file |
//! | [`schedule`] | Automatic update scheduling |
//! | [`store`] | Index storage trait, SQLite and in-memory backends |
//! | [`embedding`] | Embedding providers |
//! | [`search`] | Query and result enrichment |
//! | [`status`] | Index status summary |
//! | [`progress`] | Run progress reporting |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connections |
//! | [`migrate`] | Index schema |

pub mod config;
pub mod db;
pub mod dedup;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod guard;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod schedule;
pub mod search;
pub mod server;
pub mod source;
pub mod status;
pub mod store;
pub mod update_cmd;
