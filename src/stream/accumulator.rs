//! Append-only text buffer with throttled flushes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// Accumulates delta fragments and decides when observers see them.
///
/// A flush publishes the whole buffer, never a fragment, so a skipped flush
/// loses nothing: the next one carries everything appended since.
pub struct DeltaAccumulator {
    buffer: String,
    last_flush_at: Option<DateTime<Utc>>,
    throttle: Duration,
    clock: Arc<dyn Clock>,
    flushes: usize,
}

impl DeltaAccumulator {
    pub fn new(throttle: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buffer: String::new(),
            last_flush_at: None,
            throttle,
            clock,
            flushes: 0,
        }
    }

    /// Append a fragment. Returns the buffer if a flush is due.
    ///
    /// The first fragment always flushes; afterwards at most one flush per
    /// throttle interval.
    pub fn push(&mut self, fragment: &str) -> Option<&str> {
        self.buffer.push_str(fragment);
        let now = self.clock.now();
        let due = match self.last_flush_at {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |gap| gap >= self.throttle),
        };
        if due {
            self.mark_flushed(now);
            Some(&self.buffer)
        } else {
            None
        }
    }

    /// Unconditional final flush.
    pub fn finish(&mut self) -> &str {
        let now = self.clock.now();
        self.mark_flushed(now);
        &self.buffer
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn into_text(self) -> String {
        self.buffer
    }

    /// Number of flushes so far, including the final one.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    fn mark_flushed(&mut self, at: DateTime<Utc>) {
        self.last_flush_at = Some(at);
        self.flushes += 1;
    }
}

impl std::fmt::Debug for DeltaAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaAccumulator")
            .field("buffer_len", &self.buffer.len())
            .field("last_flush_at", &self.last_flush_at)
            .field("throttle", &self.throttle)
            .field("flushes", &self.flushes)
            .finish()
    }
}
