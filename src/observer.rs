//! Progress reporting contract between the engine and its renderer.
//!
//! The engine only ever talks to a [`ProgressSink`]; the binary decides
//! whether that is an indicatif bar, plain log lines, or nothing at all.
use indicatif::ProgressBar;

/// Receives byte-count updates and per-part detail lines.
///
/// `add` may be called with a negative delta: when a partial fetch is
/// discarded, the bytes it had already reported are refunded so the
/// displayed total always equals the complete bytes on disk.
pub trait ProgressSink: Send + Sync {
    fn add(&self, delta: i64);
    fn add_detail(&self, line: &str);
}

/// Renders progress on an indicatif [`ProgressBar`].
pub struct ConsoleSink {
    pub bar: ProgressBar,
}

impl ProgressSink for ConsoleSink {
    fn add(&self, delta: i64) {
        if delta >= 0 {
            self.bar.inc(delta as u64);
        } else {
            let refund = delta.unsigned_abs();
            self.bar
                .set_position(self.bar.position().saturating_sub(refund));
        }
    }

    fn add_detail(&self, line: &str) {
        self.bar.set_message(line.to_string());
    }
}

/// Verbose-mode sink: detail lines become log records, byte deltas are
/// dropped (the log would drown in them).
pub struct LogSink;

impl ProgressSink for LogSink {
    fn add(&self, _delta: i64) {}

    fn add_detail(&self, line: &str) {
        tracing::info!("downloading file... {line}");
    }
}

/// Sink that ignores everything; used by tests and embedders that do their
/// own accounting.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn add(&self, _delta: i64) {}
    fn add_detail(&self, _line: &str) {}
}
