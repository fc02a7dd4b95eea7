//! TOML configuration.
//!
//! Every section and key has a default, so an empty or missing file is a
//! valid configuration. [`load_config`] is strict and returns an error on a
//! malformed file; [`Config::load_or_default`] is what long-running entry
//! points use, and recovers from a bad file by logging and falling back to
//! defaults.
//!
//! The only key this crate ever writes back is `update.last_update`, via
//! [`record_last_update`], which preserves everything else in the file.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub source: SourceConfig,
    pub extraction: ExtractionConfig,
    pub update: UpdateConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("zotero-index").join("index.sqlite"))
        .unwrap_or_else(|| PathBuf::from("./zotero-index.sqlite"))
}

/// Where to find the Zotero library.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Override for `~/Zotero/zotero.sqlite`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Override for the attachment storage dir (default: `<db dir>/storage`).
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            storage_dir: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl SourceConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(p) => expand_home(p),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Zotero")
                .join("zotero.sqlite"),
        }
    }

    pub fn resolved_storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(p) => expand_home(p),
            None => self
                .resolved_db_path()
                .parent()
                .map(|p| p.join("storage"))
                .unwrap_or_else(|| PathBuf::from("storage")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_pdf_max_pages")]
    pub pdf_max_pages: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_fulltext_max_chars")]
    pub fulltext_max_chars: usize,
    /// Attachments extracted in parallel within one batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdf_max_pages: default_pdf_max_pages(),
            max_file_bytes: default_max_file_bytes(),
            fulltext_max_chars: default_fulltext_max_chars(),
            concurrency: default_concurrency(),
        }
    }
}

/// `ZOTERO_PDF_MAXPAGES` is honored when the key is absent from the file.
fn default_pdf_max_pages() -> usize {
    std::env::var("ZOTERO_PDF_MAXPAGES")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(10)
}
fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_fulltext_max_chars() -> usize {
    10_000
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdateConfig {
    #[serde(default)]
    pub auto_update: bool,
    /// `manual`, `startup`, `daily`, or `every_N`.
    #[serde(default = "default_update_frequency")]
    pub update_frequency: String,
    /// Interval used for a bare `every_n` frequency.
    #[serde(default = "default_update_days")]
    pub update_days: u32,
    /// RFC 3339 timestamp of the last completed run.
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub extract_fulltext: bool,
    #[serde(default = "default_update_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            auto_update: false,
            update_frequency: default_update_frequency(),
            update_days: default_update_days(),
            last_update: None,
            extract_fulltext: false,
            batch_size: default_update_batch_size(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_update_frequency() -> String {
    "manual".to_string()
}
fn default_update_days() -> u32 {
    7
}
fn default_update_batch_size() -> usize {
    50
}
fn default_lock_stale_secs() -> u64 {
    6 * 60 * 60
}

impl UpdateConfig {
    /// Parse `last_update`, accepting RFC 3339 or a naive ISO timestamp
    /// (interpreted as UTC). Unparseable values are treated as unset.
    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_update.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            Ok(naive) => Some(naive.and_utc()),
            Err(e) => {
                tracing::warn!(value = raw, error = %e, "ignoring unparseable update.last_update");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash`, `openai`, `ollama`, or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ollama endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// OpenAI-compatible endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Load `path`, or fall back to defaults.
    ///
    /// A missing file is silently treated as empty. A file that fails to
    /// parse or validate is reported as a configuration error and replaced
    /// by defaults; it is never fatal.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Config::default();
        }
        match load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                let err = Error::Configuration(format!("{:#}", e));
                tracing::warn!(path = %path.display(), error = %err, "using default configuration");
                Config::default()
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.index.path = expand_home(&config.index.path);

    if config.update.batch_size == 0 {
        anyhow::bail!("update.batch_size must be > 0");
    }
    if config.extraction.pdf_max_pages == 0 {
        anyhow::bail!("extraction.pdf_max_pages must be > 0");
    }
    if config.extraction.fulltext_max_chars == 0 {
        anyhow::bail!("extraction.fulltext_max_chars must be > 0");
    }
    if config.extraction.concurrency == 0 {
        anyhow::bail!("extraction.concurrency must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(config)
}

/// Persist `update.last_update = ts` into the config file at `path`.
///
/// Only that key is touched; the rest of the document is kept as parsed.
/// The file is replaced atomically via a sibling temp file.
pub fn record_last_update(path: &Path, ts: DateTime<Utc>) -> Result<()> {
    let mut doc: toml::Table = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Refusing to rewrite unparseable config: {}", path.display()))?
    } else {
        toml::Table::new()
    };

    let update = doc
        .entry("update")
        .or_insert(toml::Value::Table(toml::Table::new()));
    let table = update
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("config key `update` is not a table"))?;
    table.insert(
        "last_update".to_string(),
        toml::Value::String(ts.to_rfc3339()),
    );

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, toml::to_string_pretty(&doc)?)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zidx.toml");
        std::fs::write(&path, "").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.update.batch_size, 50);
        assert_eq!(cfg.update.update_frequency, "manual");
        assert_eq!(cfg.update.update_days, 7);
        assert!(!cfg.update.auto_update);
        assert_eq!(cfg.extraction.fulltext_max_chars, 10_000);
        assert_eq!(cfg.embedding.provider, "hash");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zidx.toml");
        std::fs::write(&path, "[update\nauto_update = ").unwrap();
        assert!(load_config(&path).is_err());
        let cfg = Config::load_or_default(&path);
        assert_eq!(cfg.update.batch_size, 50);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zidx.toml");
        std::fs::write(&path, "[update]\nbatch_size = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        std::fs::write(&path, "[embedding]\nprovider = \"bogus\"\n").unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, "[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn record_last_update_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zidx.toml");
        std::fs::write(
            &path,
            "[update]\nauto_update = true\nupdate_frequency = \"daily\"\n\n[server]\nbind = \"0.0.0.0:9000\"\n",
        )
        .unwrap();

        let ts = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        record_last_update(&path, ts).unwrap();

        let cfg = load_config(&path).unwrap();
        assert!(cfg.update.auto_update);
        assert_eq!(cfg.update.update_frequency, "daily");
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.update.last_update_at(), Some(ts));
    }

    #[test]
    fn record_last_update_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("zidx.toml");
        let ts = Utc::now();
        record_last_update(&path, ts).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(cfg.update.last_update_at().is_some());
    }

    #[test]
    fn naive_last_update_is_read_as_utc() {
        let cfg = UpdateConfig {
            last_update: Some("2025-01-02T03:04:05.123456".into()),
            ..UpdateConfig::default()
        };
        let ts = cfg.last_update_at().unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-01-02T03:04:05.123456+00:00");

        let junk = UpdateConfig {
            last_update: Some("yesterday".into()),
            ..UpdateConfig::default()
        };
        assert_eq!(junk.last_update_at(), None);
    }
}
