//! Update-run progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! The pipeline reports through [`ProgressReporter`]; the CLI picks human,
//! JSON, or no output with [`ProgressMode`].

use std::io::Write;

/// Phase of an update run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunPhase {
    Fetching,
    Deduping,
    Probing,
    Extracting,
    Upserting,
    Finalizing,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Fetching => "fetching",
            RunPhase::Deduping => "deduping",
            RunPhase::Probing => "probing",
            RunPhase::Extracting => "extracting",
            RunPhase::Upserting => "upserting",
            RunPhase::Finalizing => "finalizing",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Entered a run-level phase.
    Phase(RunPhase),
    /// Candidates known: `fetched` before dedup, `candidates` after.
    Candidates { fetched: u64, candidates: u64 },
    /// A batch finished: `done` of `total` candidates handled so far.
    Batch {
        batch: usize,
        batches: usize,
        done: u64,
        total: u64,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "update  batch 3/12  150 / 600 items".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Phase(phase) => format!("update  {}...\n", phase.as_str()),
            ProgressEvent::Candidates {
                fetched,
                candidates,
            } => format!(
                "update  {} items fetched, {} after dedup\n",
                format_number(*fetched),
                format_number(*candidates)
            ),
            ProgressEvent::Batch {
                batch,
                batches,
                done,
                total,
            } => format!(
                "update  batch {}/{}  {} / {} items\n",
                batch,
                batches,
                format_number(*done),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Phase(phase) => serde_json::json!({
                "event": "progress",
                "phase": phase.as_str(),
            }),
            ProgressEvent::Candidates {
                fetched,
                candidates,
            } => serde_json::json!({
                "event": "progress",
                "phase": "deduping",
                "fetched": fetched,
                "candidates": candidates,
            }),
            ProgressEvent::Batch {
                batch,
                batches,
                done,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "batch",
                "batch": batch,
                "batches": batches,
                "n": done,
                "total": total,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(12_345), "12,345");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
