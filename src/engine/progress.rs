//! Rate-limited speed and ETA estimation.

use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Bytes per second over the last sampling window.
    pub speed: f64,
    /// Seconds remaining at the current speed, 0 when unknown.
    pub eta: f64,
}

/// Turns cumulative byte counts into speed/ETA samples, at most once per interval.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    interval: Duration,
    last_update: Instant,
    last_bytes: u64,
    speed: f64,
    eta: f64,
}

impl ProgressTracker {
    pub fn new(total: u64, interval: Duration) -> Self {
        Self::starting_at(total, interval, 0, Instant::now())
    }

    pub fn starting_at(total: u64, interval: Duration, bytes: u64, now: Instant) -> Self {
        Self {
            total,
            interval,
            last_update: now,
            last_bytes: bytes,
            speed: 0.0,
            eta: 0.0,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Restart the rate baseline, e.g. after a pause.
    pub fn reset(&mut self, bytes: u64) {
        self.reset_at(bytes, Instant::now());
    }

    pub fn reset_at(&mut self, bytes: u64, now: Instant) {
        self.last_update = now;
        self.last_bytes = bytes;
        self.speed = 0.0;
        self.eta = 0.0;
    }

    pub fn update(&mut self, bytes: u64) -> Option<ProgressUpdate> {
        self.update_at(bytes, Instant::now())
    }

    pub fn update_at(&mut self, bytes: u64, now: Instant) -> Option<ProgressUpdate> {
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed < self.interval {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            let delta = bytes.saturating_sub(self.last_bytes) as f64;
            self.speed = delta / secs;
            let remaining = self.total.saturating_sub(bytes) as f64;
            self.eta = if self.speed > 0.0 { remaining / self.speed } else { 0.0 };
        }

        self.last_update = now;
        self.last_bytes = bytes;

        Some(ProgressUpdate {
            speed: self.speed,
            eta: self.eta,
        })
    }
}
