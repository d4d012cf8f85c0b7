use crate::error::{Result, SonavoxError};
use std::time::Duration;

/// Configuration descriptor for a Sonavox engine
#[derive(Debug, Clone)]
pub struct SonavoxEngineDesc {
    /// Number of hardware voices created at startup. The pool never grows.
    pub voice_count: usize,
    /// Latency budget of the tick loop. While any entity is active the engine
    /// thread wakes at least this often.
    pub tick_period: Duration,
    /// Capacity of the bounded command queue shared by all producers.
    pub command_queue_capacity: usize,
    /// Number of hardware buffers a stream keeps queued on its voice.
    pub stream_queue_depth: usize,
    /// Frames per decode block handed between a stream's decode task and the engine.
    pub stream_block_frames: usize,
    /// Squared listener-to-origin distance above which recentering is allowed
    /// (only while no voice is playing).
    pub recenter_threshold_sq: f64,
    /// Squared listener-to-origin distance above which recentering happens even
    /// with voices playing.
    pub recenter_force_threshold_sq: f64,
    /// Static sources with an effective gain below this give their voice back.
    pub static_gain_epsilon: f32,
    /// Speed of sound in world units per second.
    pub speed_of_sound: f32,
    /// Max distance handed to the distance model of every voice.
    pub max_distance: f32,
}

impl Default for SonavoxEngineDesc {
    fn default() -> Self {
        Self {
            voice_count: 64,
            tick_period: Duration::from_millis(20),
            command_queue_capacity: 1024,
            stream_queue_depth: 3,
            stream_block_frames: 4096,
            recenter_threshold_sq: 1024.0,
            recenter_force_threshold_sq: 4096.0,
            static_gain_epsilon: 1e-3,
            speed_of_sound: 343.3,
            max_distance: f32::MAX,
        }
    }
}

impl SonavoxEngineDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voice_count(mut self, count: usize) -> Self {
        self.voice_count = count;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    pub fn stream_queue_depth(mut self, depth: usize) -> Self {
        self.stream_queue_depth = depth;
        self
    }

    pub fn stream_block_frames(mut self, frames: usize) -> Self {
        self.stream_block_frames = frames;
        self
    }

    pub fn recenter_thresholds(mut self, threshold_sq: f64, force_threshold_sq: f64) -> Self {
        self.recenter_threshold_sq = threshold_sq;
        self.recenter_force_threshold_sq = force_threshold_sq;
        self
    }

    pub fn static_gain_epsilon(mut self, epsilon: f32) -> Self {
        self.static_gain_epsilon = epsilon;
        self
    }

    pub fn speed_of_sound(mut self, speed: f32) -> Self {
        self.speed_of_sound = speed;
        self
    }

    pub fn max_distance(mut self, distance: f32) -> Self {
        self.max_distance = distance;
        self
    }

    /// Checks the values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.voice_count == 0 {
            return Err(SonavoxError::Configuration(
                "voice_count must be greater than 0".to_string(),
            ));
        }
        if self.command_queue_capacity == 0 {
            return Err(SonavoxError::Configuration(
                "command_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.stream_queue_depth == 0 || self.stream_block_frames == 0 {
            return Err(SonavoxError::Configuration(
                "stream_queue_depth and stream_block_frames must be greater than 0".to_string(),
            ));
        }
        if self.tick_period.is_zero() {
            return Err(SonavoxError::Configuration(
                "tick_period must be non-zero".to_string(),
            ));
        }
        if self.recenter_force_threshold_sq < self.recenter_threshold_sq {
            return Err(SonavoxError::Configuration(format!(
                "recenter_force_threshold_sq ({}) is below recenter_threshold_sq ({})",
                self.recenter_force_threshold_sq, self.recenter_threshold_sq
            )));
        }
        if self.speed_of_sound <= 0.0 {
            return Err(SonavoxError::Configuration(
                "speed_of_sound must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_desc_is_valid() {
        let desc = SonavoxEngineDesc::default();
        assert!(desc.validate().is_ok());
        assert_eq!(desc.voice_count, 64);
        assert_eq!(desc.stream_queue_depth, 3);
        assert_eq!(desc.recenter_threshold_sq, 1024.0);
        assert_eq!(desc.recenter_force_threshold_sq, 4096.0);
    }

    #[test]
    fn test_rejects_empty_pool() {
        let desc = SonavoxEngineDesc::new().voice_count(0);
        assert!(matches!(
            desc.validate(),
            Err(SonavoxError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_recenter_thresholds() {
        let desc = SonavoxEngineDesc::new().recenter_thresholds(4096.0, 1024.0);
        assert!(desc.validate().is_err());
    }
}
