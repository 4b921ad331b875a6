//! Indexing progress reporting.
//!
//! The index manager calls a [`ProgressReporter`] once after every file of a
//! batch run. The CLI picks a sink with [`ProgressMode`]; progress goes to
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::time::Duration;

use serde::Serialize;

/// Snapshot of a batch run after one more file finished.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexProgress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub current_file: String,
    /// Extrapolated from mean elapsed time per processed file.
    pub estimated_remaining: Option<Duration>,
}

impl IndexProgress {
    pub(crate) fn estimate(elapsed: Duration, processed: usize, total: usize) -> Option<Duration> {
        if processed == 0 {
            return None;
        }
        let remaining = total.saturating_sub(processed) as u32;
        Some(elapsed / processed as u32 * remaining)
    }
}

/// Receives progress events. Called from the batch-indexing loop, one call
/// at a time.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &IndexProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&IndexProgress) + Send + Sync,
{
    fn report(&self, progress: &IndexProgress) {
        self(progress)
    }
}

/// Human-friendly progress on stderr: "index  1,234 / 5,000 files  (2 failed)  eta 41s  docs/a.md".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, p: &IndexProgress) {
        let mut line = format!(
            "index  {} / {} files",
            format_number(p.processed as u64),
            format_number(p.total as u64)
        );
        if p.failed > 0 {
            line.push_str(&format!("  ({} failed)", p.failed));
        }
        if let Some(eta) = p.estimated_remaining {
            line.push_str(&format!("  eta {}s", eta.as_secs()));
        }
        line.push_str(&format!("  {}\n", p.current_file));
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, p: &IndexProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "total": p.total,
            "processed": p.processed,
            "successful": p.successful,
            "failed": p.failed,
            "current_file": p.current_file,
            "estimated_remaining_secs": p.estimated_remaining.map(|d| d.as_secs_f64()),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: &IndexProgress) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn estimate_scales_with_remaining_files() {
        let eta = IndexProgress::estimate(Duration::from_secs(10), 5, 20).unwrap();
        assert_eq!(eta, Duration::from_secs(30));
        assert_eq!(IndexProgress::estimate(Duration::from_secs(1), 0, 3), None);
        assert_eq!(
            IndexProgress::estimate(Duration::from_secs(4), 4, 4),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn closures_are_reporters() {
        let seen = std::sync::Mutex::new(Vec::new());
        let reporter = |p: &IndexProgress| seen.lock().unwrap().push(p.processed);
        let p = IndexProgress {
            total: 2,
            processed: 1,
            successful: 1,
            failed: 0,
            current_file: "a.md".into(),
            estimated_remaining: None,
        };
        reporter.report(&p);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
