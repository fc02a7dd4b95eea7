//! # Zotero Index CLI (`zidx`)
//!
//! Keeps a semantic index of a local Zotero library up to date and queries it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `zidx update` | Incremental update: index new items, add fulltext where it appeared |
//! | `zidx rebuild` | Clear the index and re-index everything |
//! | `zidx status` | Document counts, last update, schedule |
//! | `zidx search "<query>"` | Semantic search over indexed items |
//! | `zidx delete <KEY>...` | Remove items from the index |
//! | `zidx serve` | HTTP server with scheduled background updates |
//!
//! ## Examples
//!
//! ```bash
//! # Metadata-only pass over the 200 most recently modified items
//! zidx update --limit 200
//!
//! # Pull in PDF / HTML fulltext as well
//! zidx update --fulltext
//!
//! # Search journal articles only
//! zidx search "sparse attention" --item-type journalArticle
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter), so
//! stdout stays parseable with `--json`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use zotero_index::config::{self, Config};
use zotero_index::pipeline::UpdateOptions;
use zotero_index::progress::ProgressMode;
use zotero_index::store::MetadataFilter;
use zotero_index::{search, server, status, update_cmd};

/// Zotero Index: an incremental semantic index over a local Zotero library.
#[derive(Parser)]
#[command(
    name = "zidx",
    about = "Incremental semantic index over a local Zotero library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `<config dir>/zotero-index/zidx.toml`. A missing file
    /// means "all defaults"; the file is created when the first update
    /// records its completion time.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to `zotero.sqlite`, overriding `[source].db_path`.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date with the library.
    ///
    /// New items are indexed; items indexed without fulltext are refreshed
    /// once a PDF or HTML attachment shows up; everything else is skipped.
    Update {
        /// Only consider the N most recently modified items.
        #[arg(long)]
        limit: Option<usize>,

        /// Extract fulltext from attachments (overrides `[update].extract_fulltext`).
        #[arg(long)]
        fulltext: bool,

        /// Clear the index first and process every item.
        #[arg(long)]
        force_rebuild: bool,

        /// Print run statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Clear the index and re-index the library.
    Rebuild {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        fulltext: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show index statistics and the update schedule.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Search indexed items.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Only items indexed with fulltext.
        #[arg(long)]
        fulltext_only: bool,

        /// Only items of this Zotero type (e.g. `journalArticle`, `preprint`).
        #[arg(long)]
        item_type: Option<String>,
    },

    /// Remove items from the index by key.
    Delete {
        /// Zotero item keys.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind`. When `[update].auto_update` is on and the
    /// schedule says a run is due, one starts in the background.
    Serve,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zotero-index")
        .join("zidx.toml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut cfg = Config::load_or_default(&config_path);
    if let Some(db_path) = cli.db_path {
        cfg.source.db_path = Some(config::expand_home(&db_path));
    }
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Update {
            limit,
            fulltext,
            force_rebuild,
            json,
        } => {
            let mut opts = UpdateOptions::from_config(&cfg);
            opts.limit = limit;
            opts.extract_fulltext |= fulltext;
            opts.force_rebuild = force_rebuild;
            update_cmd::run_update(&cfg, &config_path, opts, progress, json).await?;
        }
        Commands::Rebuild {
            limit,
            fulltext,
            json,
        } => {
            let mut opts = UpdateOptions::from_config(&cfg);
            opts.limit = limit;
            opts.extract_fulltext |= fulltext;
            opts.force_rebuild = true;
            update_cmd::run_update(&cfg, &config_path, opts, progress, json).await?;
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json).await?;
        }
        Commands::Search {
            query,
            limit,
            fulltext_only,
            item_type,
        } => {
            let filter = MetadataFilter {
                item_type,
                has_fulltext: fulltext_only.then_some(true),
                fulltext_source: None,
            };
            search::run_search(&cfg, &query, limit, filter).await?;
        }
        Commands::Delete { keys } => {
            update_cmd::run_delete(&cfg, &keys).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg, &config_path).await?;
        }
    }

    Ok(())
}
