//! Rolling network and reconciliation diagnostics

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One sampled data point
#[derive(Debug, Clone, Copy)]
pub struct StatsSample {
    pub ping_ms: f32,
    /// Largest reconcile correction seen since the previous sample, in metres
    pub correction: f32,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSummary {
    pub samples: usize,
    pub average_ping_ms: f32,
    pub max_ping_ms: f32,
    pub average_correction: f32,
    pub max_correction: f32,
}

/// Keeps the last few seconds of ping and correction history.
pub struct NetworkStats {
    history: VecDeque<StatsSample>,
    max_samples: usize,
    sample_interval: Duration,
    last_sample_time: Option<Instant>,

    ping_ms: f32,
    pending_correction: f32,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            max_samples: 100,
            sample_interval: Duration::from_millis(100),
            last_sample_time: None,
            ping_ms: 0.0,
            pending_correction: 0.0,
        }
    }

    pub fn record_ping(&mut self, ping_ms: f32) {
        self.ping_ms = ping_ms;
    }

    pub fn record_correction(&mut self, correction: f32) {
        self.pending_correction = self.pending_correction.max(correction);
    }

    pub fn ping_ms(&self) -> f32 {
        self.ping_ms
    }

    /// Takes a sample if the interval has passed. Returns true when one was taken.
    pub fn sample(&mut self, now: Instant) -> bool {
        if self
            .last_sample_time
            .is_some_and(|last| now.duration_since(last) < self.sample_interval)
        {
            return false;
        }
        self.last_sample_time = Some(now);

        self.history.push_back(StatsSample {
            ping_ms: self.ping_ms,
            correction: std::mem::take(&mut self.pending_correction),
            timestamp: now,
        });
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
        true
    }

    pub fn history(&self) -> impl Iterator<Item = &StatsSample> {
        self.history.iter()
    }

    pub fn summary(&self) -> StatsSummary {
        if self.history.is_empty() {
            return StatsSummary::default();
        }
        let count = self.history.len() as f32;
        StatsSummary {
            samples: self.history.len(),
            average_ping_ms: self.history.iter().map(|s| s.ping_ms).sum::<f32>() / count,
            max_ping_ms: self.history.iter().map(|s| s.ping_ms).fold(0.0, f32::max),
            average_correction: self.history.iter().map(|s| s.correction).sum::<f32>() / count,
            max_correction: self.history.iter().map(|s| s.correction).fold(0.0, f32::max),
        }
    }
}

impl Default for NetworkStats {
    fn default() -> Self {
        Self::new()
    }
}
