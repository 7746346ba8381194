//! Elapsed-time helper for logging durations.

use std::time::{Duration, Instant};

/// Measures how long a named operation took.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer, logs the duration at debug level and returns it in
    /// milliseconds.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.elapsed_ms();
        tracing::debug!(span_name = %self.name, elapsed_ms, "Span finished");
        elapsed_ms
    }
}
