//! Error taxonomy for the indexing core.
//!
//! Only [`Error::SourceUnavailable`] is ever fatal to an update run. The
//! other variants are absorbed at the smallest scope that can contain them
//! (attachment, batch, or config load) and surface as counters or log lines.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Zotero database is missing, locked, or unreadable.
    #[error("zotero database unavailable at {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// A single attachment could not be turned into text.
    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// The index store rejected a write or lookup.
    #[error("index store error: {0}")]
    Store(String),

    /// The persisted configuration could not be parsed or validated.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SourceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_unavailable_is_fatal() {
        assert!(Error::source_unavailable("/tmp/zotero.sqlite", "locked").is_fatal());
        assert!(!Error::extraction("/tmp/a.pdf", "bad xref").is_fatal());
        assert!(!Error::Store("disk full".into()).is_fatal());
        assert!(!Error::Configuration("bad toml".into()).is_fatal());
    }

    #[test]
    fn messages_name_the_path() {
        let e = Error::source_unavailable("/data/zotero.sqlite", "database is locked");
        assert_eq!(
            e.to_string(),
            "zotero database unavailable at /data/zotero.sqlite: database is locked"
        );
    }
}
