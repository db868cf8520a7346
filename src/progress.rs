// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer progress tracking for model pulls.
//!
//! Speed is sampled over a minimum wall-clock window so a burst of small
//! chunks does not produce wild instantaneous rates. ETA is only recomputed
//! when a positive speed is known; otherwise the previous estimate stands.

use std::time::{Duration, Instant};

/// Minimum elapsed time between speed samples.
pub const SPEED_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

/// Lifecycle phase of a pull operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPhase {
    /// No pull has been started.
    #[default]
    Idle,
    /// Request in flight, progress events arriving.
    Running,
    /// Stream completed without error.
    Completed,
    /// Stream terminated with an error.
    Failed,
    /// Superseded or cancelled by the user.
    Cancelled,
}

impl PullPhase {
    /// Returns true once no further updates will arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Committed, observer-visible snapshot of a pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullProgress {
    pub phase: PullPhase,
    /// Raw status string from the server ("pulling manifest", ...).
    pub status: String,
    /// Fraction in [0, 1]; 0 while the total is unknown.
    pub fraction: f64,
    pub total: u64,
    pub completed: u64,
    /// Bytes per second over the last sample window; 0 until known.
    pub speed_bps: u64,
    /// Estimated seconds remaining; 0 until a positive speed is known.
    pub eta_seconds: u64,
    pub error: Option<String>,
}

impl PullProgress {
    pub fn failed(status: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            phase: PullPhase::Failed,
            status: status.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            phase: PullPhase::Cancelled,
            status: "Cancelled".to_string(),
            ..Default::default()
        }
    }
}

/// Derives fraction, speed, and ETA from raw byte counters.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: u64,
    completed: u64,
    speed_bps: f64,
    eta_seconds: u64,
    last_sample: Option<(Instant, u64)>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw `{completed, total}` pair from the wire.
    ///
    /// `total == 0` means unknown; the last known total is kept.
    pub fn update(&mut self, completed: u64, total: u64) {
        self.update_at(Instant::now(), completed, total);
    }

    fn update_at(&mut self, now: Instant, completed: u64, total: u64) {
        if total > 0 {
            self.total = total;
        }
        self.completed = completed;

        match self.last_sample {
            // First sample only records the baseline.
            None => self.last_sample = Some((now, completed)),
            Some((sampled_at, sampled_bytes)) => {
                let elapsed = now.duration_since(sampled_at);
                if elapsed < SPEED_SAMPLE_WINDOW {
                    return;
                }
                // Servers occasionally restart a layer; a shrinking counter
                // is a no-op, never a negative speed.
                if completed < sampled_bytes {
                    return;
                }
                let secs = elapsed.as_secs_f64();
                self.speed_bps = (completed - sampled_bytes) as f64 / secs;
                if self.speed_bps > 0.0 {
                    let remaining = self.total.saturating_sub(completed);
                    self.eta_seconds = (remaining as f64 / self.speed_bps) as u64;
                }
                self.last_sample = Some((now, completed));
            }
        }
    }

    /// Progress fraction clamped to [0, 1]; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).clamp(0.0, 1.0)
    }

    pub fn speed_bps(&self) -> u64 {
        self.speed_bps as u64
    }

    pub fn snapshot(&self, phase: PullPhase, status: &str) -> PullProgress {
        PullProgress {
            phase,
            status: status.to_string(),
            fraction: self.fraction(),
            total: self.total,
            completed: self.completed,
            speed_bps: self.speed_bps as u64,
            eta_seconds: self.eta_seconds,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_clamped() {
        let mut t = ProgressTracker::new();
        t.update(0, 0);
        assert_eq!(t.fraction(), 0.0);

        t.update(500, 1000);
        assert!((t.fraction() - 0.5).abs() < 1e-9);

        // Malformed server data: completed beyond total.
        t.update(2000, 1000);
        assert_eq!(t.fraction(), 1.0);

        // Total unknown again: last known total is kept.
        t.update(100, 0);
        assert!((t.fraction() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_speed_sampled_on_half_second_window() {
        let base = Instant::now();
        let mut t = ProgressTracker::new();

        // First sample only records the baseline.
        t.update_at(base, 0, 3000);
        assert_eq!(t.speed_bps(), 0);

        // 0.2s later: inside the window, no sample taken.
        t.update_at(base + Duration::from_millis(200), 400, 3000);
        assert_eq!(t.speed_bps(), 0);

        // 0.6s after baseline: 1000 bytes / 0.6s.
        t.update_at(base + Duration::from_millis(600), 1000, 3000);
        let speed = t.speed_bps();
        assert!((1600..=1700).contains(&speed), "speed was {}", speed);

        // Another 0.6s: rate stays near 1666 B/s.
        t.update_at(base + Duration::from_millis(1200), 2000, 3000);
        let speed = t.speed_bps();
        assert!((1600..=1700).contains(&speed), "speed was {}", speed);
        assert_eq!(t.eta_seconds, 0); // 1000 remaining / 1666 = 0.6 -> truncates
    }

    #[test]
    fn test_negative_delta_is_noop() {
        let base = Instant::now();
        let mut t = ProgressTracker::new();
        t.update_at(base, 1000, 2000);
        t.update_at(base + Duration::from_secs(1), 2000, 2000);
        let speed = t.speed_bps();
        assert!(speed > 0);

        // Counter goes backwards: speed unchanged, never negative.
        t.update_at(base + Duration::from_secs(2), 500, 2000);
        assert_eq!(t.speed_bps(), speed);
    }

    #[test]
    fn test_eta_kept_when_speed_unknown() {
        let base = Instant::now();
        let mut t = ProgressTracker::new();
        t.update_at(base, 0, 10_000);
        t.update_at(base + Duration::from_secs(1), 1000, 10_000);
        let eta = t.eta_seconds;
        assert!(eta > 0);

        // Stalled transfer: zero delta gives zero speed, ETA not recomputed.
        t.update_at(base + Duration::from_secs(2), 1000, 10_000);
        assert_eq!(t.eta_seconds, eta);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!PullPhase::Idle.is_terminal());
        assert!(!PullPhase::Running.is_terminal());
        assert!(PullPhase::Completed.is_terminal());
        assert!(PullPhase::Failed.is_terminal());
        assert!(PullPhase::Cancelled.is_terminal());
    }
}
