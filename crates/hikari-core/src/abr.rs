//! Throughput-based automatic level selection
//!
//! Used by the segment loader while the viewer has not picked a rendition.

use crate::types::RenditionLevel;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Bandwidth measurement sample
#[derive(Debug, Clone)]
pub struct BandwidthSample {
    /// Bytes downloaded
    pub bytes: usize,
    /// Time taken
    pub duration: Duration,
}

impl BandwidthSample {
    /// Calculate throughput in bits per second
    pub fn throughput_bps(&self) -> u64 {
        if self.duration.as_secs_f64() > 0.0 {
            ((self.bytes as f64 * 8.0) / self.duration.as_secs_f64()) as u64
        } else {
            0
        }
    }
}

/// EWMA throughput estimator over recent segment downloads
#[derive(Debug)]
pub struct ThroughputEstimator {
    history: VecDeque<BandwidthSample>,
    max_history: usize,
    estimate: u64,
}

impl ThroughputEstimator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(20),
            max_history: 20,
            estimate: 0,
        }
    }

    /// Record a completed download
    pub fn record(&mut self, bytes: usize, duration: Duration) {
        let sample = BandwidthSample { bytes, duration };
        let bps = sample.throughput_bps();
        if bps == 0 {
            return;
        }

        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        if self.estimate == 0 {
            self.estimate = bps;
        } else {
            // EWMA with alpha = 0.2
            self.estimate = ((self.estimate as f64 * 0.8) + (bps as f64 * 0.2)) as u64;
        }

        debug!(
            bytes = bytes,
            duration_ms = duration.as_millis(),
            estimate_mbps = self.estimate as f64 / 1_000_000.0,
            "Bandwidth measurement recorded"
        );
    }

    /// Current estimate in bits per second (0 = no samples yet)
    pub fn estimate(&self) -> u64 {
        self.estimate
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Pick the highest-bandwidth level that fits the estimate.
    ///
    /// Returns `None` without samples, so the caller keeps its level.
    pub fn select_level(&self, levels: &[RenditionLevel], safety_factor: f64) -> Option<usize> {
        if self.estimate == 0 || levels.is_empty() {
            return None;
        }

        let budget = (self.estimate as f64 * safety_factor) as u64;
        let fitting = levels
            .iter()
            .filter(|l| l.bandwidth <= budget)
            .max_by_key(|l| l.bandwidth);

        match fitting {
            Some(level) => Some(level.index),
            None => levels.iter().min_by_key(|l| l.bandwidth).map(|l| l.index),
        }
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new()
    }
}
