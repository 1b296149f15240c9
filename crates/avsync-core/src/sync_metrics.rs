//! A/V synchronization metrics.
//!
//! Counters are plain atomics so the audio callback, the render thread and
//! the decode thread can all record into the same [`SyncMetrics`] without
//! locking. Read them back with [`SyncMetrics::snapshot`].
//!
//! ```ignore
//! let metrics = SyncMetrics::new();
//! metrics.record_frame(video_pts, clock_position);
//! println!("{}", metrics.snapshot());
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drift within ±40ms is imperceptible for local playback.
pub const SYNC_DRIFT_THRESHOLD_MS: i64 = 40;

/// Drift beyond this is noticeable and logged.
pub const SYNC_DRIFT_WARNING_MS: i64 = 100;

/// Drift beyond this is clearly out of sync.
pub const SYNC_DRIFT_SEVERE_MS: i64 = 200;

/// A/V synchronization metrics tracker.
#[derive(Clone)]
pub struct SyncMetrics {
    inner: Arc<SyncMetricsInner>,
}

struct SyncMetricsInner {
    /// Current drift in microseconds (video_pts - clock, positive = video ahead)
    current_drift_us: AtomicI64,
    /// Maximum positive drift seen (video ahead of audio)
    max_drift_ahead_us: AtomicI64,
    /// Maximum negative drift seen (video behind audio)
    max_drift_behind_us: AtomicI64,
    /// Sum of absolute drift values for average calculation
    total_drift_us: AtomicU64,
    /// Number of displayed frames
    frames_displayed: AtomicU64,
    /// Displayed frames whose drift exceeded the threshold
    out_of_sync_count: AtomicU64,
    /// Stale frames discarded by the selector
    frames_dropped: AtomicU64,
    /// Selection calls that found the next frame not yet due
    frames_held: AtomicU64,
    /// Audio callbacks that had to pad with silence
    underrun_count: AtomicU64,
    /// Sample frames of silence written to cover underruns
    silence_frames: AtomicU64,
    /// Sample frames of decoded audio handed to the hardware
    audio_frames_played: AtomicU64,
    /// Calls into the decoder
    decode_calls: AtomicU64,
    /// Failed decoder calls
    decode_errors: AtomicU64,
}

impl SyncMetrics {
    /// Creates a new sync metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncMetricsInner {
                current_drift_us: AtomicI64::new(0),
                max_drift_ahead_us: AtomicI64::new(0),
                max_drift_behind_us: AtomicI64::new(0),
                total_drift_us: AtomicU64::new(0),
                frames_displayed: AtomicU64::new(0),
                out_of_sync_count: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                frames_held: AtomicU64::new(0),
                underrun_count: AtomicU64::new(0),
                silence_frames: AtomicU64::new(0),
                audio_frames_played: AtomicU64::new(0),
                decode_calls: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Records a displayed video frame against the clock position.
    ///
    /// Returns the signed drift in microseconds (positive = video ahead).
    pub fn record_frame(&self, video_pts: Duration, clock_position: Duration) -> i64 {
        let drift_us = video_pts.as_micros() as i64 - clock_position.as_micros() as i64;
        let inner = &self.inner;

        inner.current_drift_us.store(drift_us, Ordering::Relaxed);
        if drift_us > 0 {
            inner.max_drift_ahead_us.fetch_max(drift_us, Ordering::Relaxed);
        } else {
            inner.max_drift_behind_us.fetch_min(drift_us, Ordering::Relaxed);
        }
        inner
            .total_drift_us
            .fetch_add(drift_us.unsigned_abs(), Ordering::Relaxed);
        inner.frames_displayed.fetch_add(1, Ordering::Relaxed);

        let drift_ms = drift_us.abs() / 1000;
        if drift_ms > SYNC_DRIFT_THRESHOLD_MS {
            inner.out_of_sync_count.fetch_add(1, Ordering::Relaxed);
            if drift_ms > SYNC_DRIFT_WARNING_MS {
                let direction = if drift_us > 0 { "ahead of" } else { "behind" };
                tracing::warn!(
                    "A/V sync: video {}ms {} audio (video_pts={:?}, clock={:?})",
                    drift_ms,
                    direction,
                    video_pts,
                    clock_position
                );
            }
        }
        drift_us
    }

    /// Records a stale video frame discarded by the selector.
    pub fn record_drop(&self) {
        self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a selection call that held the previous frame.
    pub fn record_hold(&self) {
        self.inner.frames_held.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an audio callback that padded `silence_frames` with silence.
    pub fn record_underrun(&self, silence_frames: u64) {
        self.inner.underrun_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .silence_frames
            .fetch_add(silence_frames, Ordering::Relaxed);
    }

    /// Records sample frames of decoded audio handed to the hardware.
    pub fn record_audio_played(&self, frames: u64) {
        self.inner
            .audio_frames_played
            .fetch_add(frames, Ordering::Relaxed);
    }

    /// Records a call into the decoder.
    pub fn record_decode_call(&self) {
        self.inner.decode_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed decoder call.
    pub fn record_decode_error(&self) {
        self.inner.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true if the last displayed frame was within the threshold.
    pub fn is_in_sync(&self) -> bool {
        let drift_us = self.inner.current_drift_us.load(Ordering::Relaxed);
        drift_us.abs() <= SYNC_DRIFT_THRESHOLD_MS * 1000
    }

    /// Resets all counters.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.current_drift_us,
            &inner.max_drift_ahead_us,
            &inner.max_drift_behind_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in [
            &inner.total_drift_us,
            &inner.frames_displayed,
            &inner.out_of_sync_count,
            &inner.frames_dropped,
            &inner.frames_held,
            &inner.underrun_count,
            &inner.silence_frames,
            &inner.audio_frames_played,
            &inner.decode_calls,
            &inner.decode_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let inner = &self.inner;
        let frames_displayed = inner.frames_displayed.load(Ordering::Relaxed);
        let total_drift_us = inner.total_drift_us.load(Ordering::Relaxed);
        SyncMetricsSnapshot {
            current_drift_us: inner.current_drift_us.load(Ordering::Relaxed),
            max_drift_ahead_us: inner.max_drift_ahead_us.load(Ordering::Relaxed),
            max_drift_behind_us: inner.max_drift_behind_us.load(Ordering::Relaxed),
            avg_drift_us: if frames_displayed > 0 {
                (total_drift_us / frames_displayed) as i64
            } else {
                0
            },
            frames_displayed,
            out_of_sync_count: inner.out_of_sync_count.load(Ordering::Relaxed),
            frames_dropped: inner.frames_dropped.load(Ordering::Relaxed),
            frames_held: inner.frames_held.load(Ordering::Relaxed),
            underrun_count: inner.underrun_count.load(Ordering::Relaxed),
            silence_frames: inner.silence_frames.load(Ordering::Relaxed),
            audio_frames_played: inner.audio_frames_played.load(Ordering::Relaxed),
            decode_calls: inner.decode_calls.load(Ordering::Relaxed),
            decode_errors: inner.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Logs current sync status at debug level.
    pub fn log_status(&self) {
        tracing::debug!("{}", self.snapshot());
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of sync metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetricsSnapshot {
    /// Drift of the last displayed frame (positive = video ahead)
    pub current_drift_us: i64,
    /// Largest drift with video ahead of audio
    pub max_drift_ahead_us: i64,
    /// Largest drift with video behind audio (negative)
    pub max_drift_behind_us: i64,
    /// Mean absolute drift over displayed frames
    pub avg_drift_us: i64,
    /// Video frames handed to the renderer
    pub frames_displayed: u64,
    /// Displayed frames beyond [`SYNC_DRIFT_THRESHOLD_MS`]
    pub out_of_sync_count: u64,
    /// Stale video frames discarded
    pub frames_dropped: u64,
    /// Selection calls that held the previous frame
    pub frames_held: u64,
    /// Audio callbacks padded with silence
    pub underrun_count: u64,
    /// Sample frames of silence written to cover underruns
    pub silence_frames: u64,
    /// Sample frames of decoded audio played
    pub audio_frames_played: u64,
    /// Decoder calls
    pub decode_calls: u64,
    /// Failed decoder calls
    pub decode_errors: u64,
}

impl SyncMetricsSnapshot {
    /// Minimum displayed frames before a sync verdict is meaningful.
    pub const MIN_SYNC_SAMPLES: u64 = 10;

    /// Returns the current drift in milliseconds.
    pub fn current_drift_ms(&self) -> i64 {
        self.current_drift_us / 1000
    }

    /// Returns the maximum absolute drift in milliseconds.
    pub fn max_drift_ms(&self) -> i64 {
        self.max_drift_ahead_us
            .abs()
            .max(self.max_drift_behind_us.abs())
            / 1000
    }

    /// Returns the percentage of displayed frames that were out of sync.
    pub fn out_of_sync_percentage(&self) -> f64 {
        if self.frames_displayed == 0 {
            0.0
        } else {
            (self.out_of_sync_count as f64 / self.frames_displayed as f64) * 100.0
        }
    }

    /// Returns true if enough frames were shown and drift stayed acceptable.
    pub fn passed_sync_test(&self) -> bool {
        self.frames_displayed >= Self::MIN_SYNC_SAMPLES
            && self.max_drift_ms() < SYNC_DRIFT_SEVERE_MS
            && self.out_of_sync_percentage() < 5.0
    }
}

impl std::fmt::Display for SyncMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A/V Sync: drift={:+}ms (max ahead={:+}ms, behind={:+}ms), {} shown, {} dropped, {} underruns, {:.1}% out of sync",
            self.current_drift_ms(),
            self.max_drift_ahead_us / 1000,
            self.max_drift_behind_us / 1000,
            self.frames_displayed,
            self.frames_dropped,
            self.underrun_count,
            self.out_of_sync_percentage()
        )
    }
}
