//! Session coordinator tunables.

use std::time::Duration;

/// Roughly 30 position samples per second while playing.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(33);

pub const DEFAULT_PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the position sampling tick.
    pub sampling_interval: Duration,

    /// Minimum spacing of non-forced progress writes.
    pub progress_save_interval: Duration,

    /// `play()` from a finished chapter restarts this far before the end.
    pub replay_offset_secs: f64,

    /// A position this close to the end counts as "at the end".
    pub end_tolerance_secs: f64,

    /// Delay before re-reading the engine position after a seek.
    pub seek_resample_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            progress_save_interval: DEFAULT_PROGRESS_SAVE_INTERVAL,
            replay_offset_secs: 0.25,
            end_tolerance_secs: 0.001,
            seek_resample_delay: Duration::from_millis(150),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_progress_save_interval(mut self, interval: Duration) -> Self {
        self.progress_save_interval = interval;
        self
    }

    pub fn with_seek_resample_delay(mut self, delay: Duration) -> Self {
        self.seek_resample_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sampling_interval.is_zero() {
            return Err("sampling_interval must be greater than 0".to_string());
        }
        if self.progress_save_interval < self.sampling_interval {
            return Err("progress_save_interval must not be shorter than sampling_interval".to_string());
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !non_negative(self.replay_offset_secs) || !non_negative(self.end_tolerance_secs) {
            return Err("offsets must be non-negative".to_string());
        }
        Ok(())
    }
}
