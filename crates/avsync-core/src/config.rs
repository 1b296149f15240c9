//! Buffering and synchronization configuration.

use std::time::Duration;

/// Buffering watermarks for one frame queue.
///
/// The decode thread keeps decoding while a queue holds less than
/// `max_buffered`. Once every active queue reaches `max_buffered` it parks,
/// and a consumer wakes it when a queue drains below `min_buffered`.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Low watermark: draining below this wakes the decode thread
    pub min_buffered: Duration,
    /// High watermark: the decode thread parks at or above this
    pub max_buffered: Duration,
    /// A queue holding more than `max_buffered * overfill_factor` parks the
    /// decode thread even when the other queue is still hungry
    pub overfill_factor: u32,
}

impl BufferConfig {
    /// Watermarks for local files (fast, predictable reads).
    pub fn local() -> Self {
        Self {
            min_buffered: Duration::from_millis(200),
            max_buffered: Duration::from_millis(400),
            overfill_factor: 4,
        }
    }

    /// Watermarks for sources with bursty delivery.
    pub fn network() -> Self {
        Self {
            min_buffered: Duration::from_secs(2),
            max_buffered: Duration::from_secs(4),
            overfill_factor: 2,
        }
    }

    /// Duration above which the queue counts as overfilled.
    pub fn overfill_limit(&self) -> Duration {
        self.max_buffered
            .saturating_mul(self.overfill_factor.max(1))
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::local()
    }
}

/// Configuration for one playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Audio queue watermarks
    pub audio_buffer: BufferConfig,
    /// Video queue watermarks
    pub video_buffer: BufferConfig,
    /// Minimum content requested from the decoder per call
    pub decode_min_duration: Duration,
    /// A video frame this far ahead of the clock (or less) may be shown
    pub tolerance_early: Duration,
    /// A video frame further behind the clock than this is dropped
    pub tolerance_late: Duration,
    /// Upper bound on stale frames dropped in one selection call
    pub max_drops_per_call: u32,
}

impl SyncConfig {
    /// Defaults tuned for local file playback.
    pub fn local() -> Self {
        Self {
            audio_buffer: BufferConfig::local(),
            video_buffer: BufferConfig::local(),
            decode_min_duration: Duration::from_millis(100),
            tolerance_early: Duration::from_millis(15),
            tolerance_late: Duration::from_millis(100),
            max_drops_per_call: 8,
        }
    }

    /// Defaults for sources with bursty delivery.
    pub fn network() -> Self {
        Self {
            audio_buffer: BufferConfig::network(),
            video_buffer: BufferConfig::network(),
            decode_min_duration: Duration::from_millis(250),
            ..Self::local()
        }
    }

    /// Sets both selection tolerances.
    pub fn with_tolerances(mut self, early: Duration, late: Duration) -> Self {
        self.tolerance_early = early;
        self.tolerance_late = late;
        self
    }

    /// Sets the same watermarks on both queues.
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.audio_buffer = buffer.clone();
        self.video_buffer = buffer;
        self
    }

    /// Checks that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        for (name, buffer) in [("audio", &self.audio_buffer), ("video", &self.video_buffer)] {
            if buffer.max_buffered.is_zero() {
                return Err(format!("{name} max_buffered must be non-zero"));
            }
            if buffer.min_buffered > buffer.max_buffered {
                return Err(format!(
                    "{name} min_buffered ({:?}) exceeds max_buffered ({:?})",
                    buffer.min_buffered, buffer.max_buffered
                ));
            }
            if buffer.overfill_factor == 0 {
                return Err(format!("{name} overfill_factor must be at least 1"));
            }
        }
        if self.decode_min_duration.is_zero() {
            return Err("decode_min_duration must be non-zero".to_string());
        }
        if self.max_drops_per_call == 0 {
            return Err("max_drops_per_call must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::local()
    }
}
