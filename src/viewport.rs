use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::regions::Capture;
use crate::settings::ScanTuning;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub offset: f64,
    pub viewport_height: f64,
}

impl ScrollEvent {
    pub fn new(offset: f64, viewport_height: f64) -> Self {
        Self {
            offset,
            viewport_height,
        }
    }

    pub fn capture(&self) -> Capture {
        Capture::new(self.offset, self.viewport_height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub quiet_period: Duration,
    pub distance_threshold: f64,
}

impl From<&ScanTuning> for TrackerConfig {
    fn from(tuning: &ScanTuning) -> Self {
        Self {
            quiet_period: tuning.quiet_period,
            distance_threshold: tuning.distance_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    event: ScrollEvent,
    observed_at: Instant,
}

/// Decides when scrolling warrants a new scan. Time is passed in explicitly,
/// so the tracker itself never sleeps.
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    config: TrackerConfig,
    pending: Option<Pending>,
    last_scan_offset: Option<f64>,
}

impl ViewportTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            pending: None,
            last_scan_offset: None,
        }
    }

    pub fn last_scan_offset(&self) -> Option<f64> {
        self.last_scan_offset
    }

    /// Records a scroll event; it supersedes any event still waiting out the
    /// quiet period.
    pub fn observe(&mut self, event: ScrollEvent, now: Instant) {
        self.pending = Some(Pending {
            event,
            observed_at: now,
        });
    }

    /// When the pending event becomes a candidate, if nothing else arrives.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .map(|pending| pending.observed_at + self.config.quiet_period)
    }

    /// Returns the settled scroll position once the quiet period has elapsed.
    pub fn take_candidate(&mut self, now: Instant) -> Option<ScrollEvent> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.pending.take().map(|pending| pending.event)
    }

    /// Applies the distance threshold. On success the candidate becomes the
    /// new last-scan position, whatever happens to the scan afterwards.
    pub fn check_distance(&mut self, candidate: ScrollEvent) -> Option<Capture> {
        if let Some(last) = self.last_scan_offset {
            if (candidate.offset - last).abs() <= self.config.distance_threshold {
                return None;
            }
        }
        self.last_scan_offset = Some(candidate.offset);
        Some(candidate.capture())
    }

    pub fn poll(&mut self, now: Instant) -> Option<Capture> {
        let candidate = self.take_candidate(now)?;
        self.check_distance(candidate)
    }

    pub fn mark_scanned(&mut self, offset: f64) {
        self.last_scan_offset = Some(offset);
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.last_scan_offset = None;
    }
}
