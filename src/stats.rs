//! Index statistics and performance counters.
//!
//! [`Stats`] is what `cidx stats` prints: registry counts, the live vector
//! count from the store, indexed source size, and in-process latency
//! counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub collection: String,
    pub documents: usize,
    pub chunks: usize,
    /// Points the vector store reports for the active collection.
    pub vectors: usize,
    /// Vector ids tracked by the registry. Equal to `vectors` when the index
    /// is consistent.
    pub tracked_vectors: usize,
    /// Sum of indexed source sizes in bytes.
    pub index_size: u64,
    pub degraded_chunks: usize,
    pub error_documents: usize,
    pub updated_at: Option<i64>,
    pub last_rebuild_at: Option<i64>,
    pub performance: PerformanceStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub documents_indexed: u64,
    pub searches: u64,
    pub avg_index_ms: f64,
    pub avg_search_ms: f64,
}

/// Lock-free counters updated by the engine.
#[derive(Debug, Default)]
pub struct PerfCounters {
    documents_indexed: AtomicU64,
    index_micros: AtomicU64,
    searches: AtomicU64,
    search_micros: AtomicU64,
}

impl PerfCounters {
    /// Record a batch run that processed `documents` files in `elapsed`.
    pub fn record_index(&self, documents: u64, elapsed: Duration) {
        self.documents_indexed.fetch_add(documents, Ordering::Relaxed);
        self.index_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_search(&self, elapsed: Duration) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.search_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceStats {
        let documents_indexed = self.documents_indexed.load(Ordering::Relaxed);
        let searches = self.searches.load(Ordering::Relaxed);
        PerformanceStats {
            documents_indexed,
            searches,
            avg_index_ms: mean_ms(self.index_micros.load(Ordering::Relaxed), documents_indexed),
            avg_search_ms: mean_ms(self.search_micros.load(Ordering::Relaxed), searches),
        }
    }
}

fn mean_ms(total_micros: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_micros as f64 / count as f64 / 1000.0
    }
}

/// Human-readable summary for the terminal.
pub fn render_stats(stats: &Stats) -> String {
    let mut out = String::new();
    out.push_str("Index Stats\n");
    out.push_str("===========\n\n");
    out.push_str(&format!("  Collection:  {}\n", stats.collection));
    out.push_str(&format!("  Size:        {}\n", format_bytes(stats.index_size)));
    out.push_str(&format!(
        "  Updated:     {}\n",
        stats
            .updated_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    ));
    out.push_str(&format!(
        "  Rebuilt:     {}\n\n",
        stats
            .last_rebuild_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    ));
    out.push_str(&format!("  Documents:   {}\n", stats.documents));
    out.push_str(&format!("  Chunks:      {}\n", stats.chunks));
    out.push_str(&format!(
        "  Vectors:     {} (registry tracks {})\n",
        stats.vectors, stats.tracked_vectors
    ));
    if stats.degraded_chunks > 0 {
        out.push_str(&format!("  Degraded:    {} chunks\n", stats.degraded_chunks));
    }
    if stats.error_documents > 0 {
        out.push_str(&format!("  Errors:      {} documents\n", stats.error_documents));
    }
    let perf = &stats.performance;
    out.push_str(&format!(
        "\n  Indexed this session:  {} docs, {:.1} ms avg\n",
        perf.documents_indexed, perf.avg_index_ms
    ));
    out.push_str(&format!(
        "  Searches this session: {}, {:.1} ms avg\n",
        perf.searches, perf.avg_search_ms
    ));
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn counters_average_per_item() {
        let perf = PerfCounters::default();
        assert_eq!(perf.snapshot().avg_search_ms, 0.0);
        perf.record_search(Duration::from_millis(10));
        perf.record_search(Duration::from_millis(30));
        perf.record_index(4, Duration::from_millis(40));
        let snap = perf.snapshot();
        assert_eq!(snap.searches, 2);
        assert!((snap.avg_search_ms - 20.0).abs() < 1e-6);
        assert!((snap.avg_index_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
