//! Monotonic timestamps and latency estimation.

use std::time::{Duration, Instant};

use crate::core::constants::LATENCY_ALPHA;

/// Monotonic clock used for envelope timestamps.
///
/// Readings are seconds since the clock was created. They are meaningful
/// only on the machine that took them.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since the clock started.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling round-trip latency estimate.
///
/// Smoothed the same way as SRTT in RFC 6298 (alpha = 1/8). Diagnostic
/// only; nothing in the protocol waits on it.
#[derive(Debug, Clone, Default)]
pub struct LatencyEstimator {
    /// Smoothed latency in milliseconds.
    smoothed_ms: f64,
    /// Most recent sample in milliseconds.
    last_ms: f64,
    /// Smallest sample seen.
    min_ms: f64,
    /// Number of samples.
    samples: u64,
}

impl LatencyEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample.
    pub fn update(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        if self.samples == 0 {
            self.smoothed_ms = sample_ms;
            self.min_ms = sample_ms;
        } else {
            self.smoothed_ms = (1.0 - LATENCY_ALPHA) * self.smoothed_ms + LATENCY_ALPHA * sample_ms;
            self.min_ms = self.min_ms.min(sample_ms);
        }
        self.last_ms = sample_ms;
        self.samples += 1;
    }

    /// Add a sample given in seconds. Samples that are not a valid
    /// duration are ignored; they can only come from a bad echo.
    pub fn update_secs(&mut self, secs: f64) {
        match Duration::try_from_secs_f64(secs) {
            Ok(sample) => self.update(sample),
            Err(_) => tracing::debug!(secs, "ignoring unusable latency sample"),
        }
    }

    /// Smoothed latency in milliseconds, once a sample exists.
    pub fn smoothed_ms(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.smoothed_ms)
    }

    /// Most recent sample in milliseconds.
    pub fn last_ms(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.last_ms)
    }

    /// Smallest sample in milliseconds.
    pub fn min_ms(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.min_ms)
    }

    /// Number of samples taken.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}
