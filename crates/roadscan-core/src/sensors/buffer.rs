//! Sample buffer
//!
//! Holds recent readings from one motion channel.

use std::collections::VecDeque;

use crate::types::{now_ms, SensorSample, TimestampMs};

/// Hard cap on buffered samples, regardless of trimming
const MAX_BUFFER_SIZE: usize = 10000;

/// Time-ordered buffer of readings from a single channel
///
/// Samples are kept in arrival order. Eviction by age is the owner's job:
/// call [`SampleBuffer::trim`] periodically. The only automatic eviction is
/// the capacity cap, which drops the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<SensorSample>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create an empty buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }

    /// Create an empty buffer holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(MAX_BUFFER_SIZE)),
            capacity,
        }
    }

    /// Append a sample
    pub fn push(&mut self, sample: SensorSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Samples from the last `window_ms` milliseconds, oldest first
    pub fn recent(&self, window_ms: i64) -> impl Iterator<Item = &SensorSample> + '_ {
        self.recent_as_of(now_ms(), window_ms)
    }

    /// Samples with `timestamp >= now - window_ms`, in arrival order
    pub fn recent_as_of(
        &self,
        now: TimestampMs,
        window_ms: i64,
    ) -> impl Iterator<Item = &SensorSample> + '_ {
        let cutoff = now.saturating_sub(window_ms);
        self.samples.iter().filter(move |s| s.timestamp >= cutoff)
    }

    /// Drop samples older than `max_age_ms`
    pub fn trim(&mut self, max_age_ms: i64) {
        self.trim_as_of(now_ms(), max_age_ms);
    }

    /// Drop samples with `timestamp < now - max_age_ms`
    pub fn trim_as_of(&mut self, now: TimestampMs, max_age_ms: i64) {
        let cutoff = now.saturating_sub(max_age_ms);
        self.samples.retain(|s| s.timestamp >= cutoff);
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&SensorSample> {
        self.samples.back()
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}
