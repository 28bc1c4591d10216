//! Per-target sample buffer: distance-gated insertion and age-based pruning.

use std::collections::VecDeque;
use tracing::debug;

use crate::geometry::Vec3;

/// One recorded position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Vec3,
    /// Host clock time in seconds.
    pub timestamp_s: f64,
}

impl Sample {
    pub fn new(position: Vec3, timestamp_s: f64) -> Self {
        Self {
            position,
            timestamp_s,
        }
    }
}

/// Buffer tunables shared by every tracked target.
#[derive(Debug, Clone)]
pub struct TrailConfig {
    /// A sample is stored only if it moved further than this from the last one (meters).
    pub min_sample_distance: f32,
    /// Samples older than this are pruned (seconds).
    pub max_sample_age_s: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            min_sample_distance: 0.01,
            max_sample_age_s: 1.5,
        }
    }
}

/// What a prune pass did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Every sample was still within the age window.
    Unchanged,
    /// This many stale samples were dropped from the front.
    Trimmed(usize),
    /// Nothing was within the window; the whole buffer was discarded.
    Reset,
}

/// Ordered, time-stamped trail of recent positions for one target.
#[derive(Debug, Clone, Default)]
pub struct Trail {
    samples: VecDeque<Sample>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `position` if it moved far enough from the last stored sample.
    /// Returns true when the sample was stored.
    pub fn record(&mut self, position: Vec3, now_s: f64, config: &TrailConfig) -> bool {
        if let Some(last) = self.samples.back() {
            if last.position.distance(position) <= config.min_sample_distance {
                return false;
            }
        }
        self.samples.push_back(Sample::new(position, now_s));
        true
    }

    /// Drop samples older than the configured age.
    ///
    /// When at least one sample is inside the window the buffer starts at the
    /// oldest such sample.  When none is, the buffer is emptied entirely.
    pub fn prune(&mut self, now_s: f64, config: &TrailConfig) -> PruneOutcome {
        if self.samples.is_empty() {
            return PruneOutcome::Unchanged;
        }

        let first_fresh = self
            .samples
            .iter()
            .position(|s| now_s - s.timestamp_s <= config.max_sample_age_s);

        match first_fresh {
            Some(0) => PruneOutcome::Unchanged,
            Some(idx) => {
                self.samples.drain(..idx);
                PruneOutcome::Trimmed(idx)
            }
            None => {
                debug!(
                    "Trail fully stale at {:.3}s, discarding {} samples",
                    now_s,
                    self.samples.len()
                );
                self.samples.clear();
                PruneOutcome::Reset
            }
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Contiguous view of the samples, oldest first.
    pub fn as_slice(&mut self) -> &[Sample] {
        self.samples.make_contiguous()
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.samples.iter().map(|s| s.position).collect()
    }

    /// Time between the oldest and newest sample (seconds).
    pub fn duration_s(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(a), Some(b)) => b.timestamp_s - a.timestamp_s,
            _ => 0.0,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────
