//! Audio pull bridge.
//!
//! The audio hardware drives playback: it calls back with an empty buffer and
//! the bridge fills it from the audio [`FrameQueue`]. Audio is the master
//! clock, so every chunk handed to the hardware also moves the
//! [`PlaybackClock`].
//!
//! # Real-time rules
//!
//! [`AudioPullBridge::fill`] runs on the audio thread. It never blocks on the
//! decode thread, never performs I/O and never allocates: queue pops take a
//! short uncontended lock, and splitting a frame slices the shared payload.
//! An empty queue is answered with silence.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::PlaybackClock;
use crate::frame::{frames_to_duration, AudioFrame};
use crate::frame_queue::FrameQueue;
use crate::sync_metrics::SyncMetrics;

/// Format of the audio handed to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl AudioFormat {
    /// Creates a format description.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// A hardware sample type the bridge can write.
pub trait OutputSample: Copy + Send + 'static {
    /// The value of silence.
    const SILENCE: Self;

    /// Converts a signed 16-bit PCM sample.
    fn from_i16(sample: i16) -> Self;
}

impl OutputSample for i16 {
    const SILENCE: Self = 0;

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample
    }
}

impl OutputSample for f32 {
    const SILENCE: Self = 0.0;

    #[inline]
    fn from_i16(sample: i16) -> Self {
        sample as f32 / 32768.0
    }
}

/// Consumer side of the audio queue, handed to the audio output callback.
///
/// There is exactly one bridge per playback session. It is `Send` so it can
/// be moved into the hardware callback closure.
pub struct AudioPullBridge {
    queue: Arc<FrameQueue<AudioFrame>>,
    clock: Arc<PlaybackClock>,
    metrics: SyncMetrics,
    /// True while consecutive callbacks keep running dry (log once per streak)
    in_underrun: bool,
}

impl AudioPullBridge {
    /// Creates a bridge draining `queue` and driving `clock`.
    pub fn new(
        queue: Arc<FrameQueue<AudioFrame>>,
        clock: Arc<PlaybackClock>,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            queue,
            clock,
            metrics,
            in_underrun: false,
        }
    }

    /// Fills `out` with `num_frames` interleaved sample frames of
    /// `num_channels` channels each.
    ///
    /// Every sample of `out` is written: decoded audio first, silence for the
    /// rest. Returns the number of sample frames that carried decoded audio.
    ///
    /// While the clock is paused or the session is closed, the buffer is
    /// silenced and the queue is left untouched.
    pub fn fill<S: OutputSample>(
        &mut self,
        out: &mut [S],
        num_frames: usize,
        num_channels: usize,
    ) -> usize {
        let channels = num_channels.max(1);
        let wanted = num_frames.min(out.len() / channels);

        if self.queue.is_closed() || !self.clock.is_running() {
            out.fill(S::SILENCE);
            self.in_underrun = false;
            return 0;
        }

        // The buffer starts playing at `now`; each chunk starts playing
        // `offset` later, so the clock anchors the latest chunk there and the
        // extrapolation lands on the next callback's first sample.
        let now = self.clock.now();
        let mut offset = Duration::ZERO;
        let mut written = 0;

        while written < wanted {
            let Some(frame) = self.queue.pop() else {
                break;
            };
            let available = frame.sample_frames();
            if available == 0 {
                continue;
            }
            let take = available.min(wanted - written);
            let dst = &mut out[written * channels..(written + take) * channels];
            write_converted(&frame, take, dst, channels);

            self.clock.on_audio_consumed(frame.pts, now + offset);
            if let Some(rest) = frame.remainder_after(take) {
                self.queue.restore_front(rest);
            }
            offset += frames_to_duration(take as u64, frame.sample_rate);
            written += take;
        }

        out[written * channels..].fill(S::SILENCE);

        if written > 0 {
            self.metrics.record_audio_played(written as u64);
        }

        if written < wanted && !self.queue.is_eos() {
            let missing = (wanted - written) as u64;
            self.metrics.record_underrun(missing);
            if !self.in_underrun {
                tracing::warn!(
                    "Audio underrun: padded {} of {} frames with silence",
                    missing,
                    wanted
                );
                self.in_underrun = true;
            }
        } else {
            self.in_underrun = false;
        }

        written
    }

    /// Returns true once end-of-stream was signaled and all audio was played.
    pub fn is_finished(&self) -> bool {
        self.queue.is_drained()
    }

    /// Returns true once the decoder has delivered its last audio frame.
    pub fn is_eos(&self) -> bool {
        self.queue.is_eos()
    }

    /// Returns the duration of audio waiting in the queue.
    pub fn buffered(&self) -> Duration {
        self.queue.buffered_duration()
    }
}

/// Copies the first `count` sample frames of `frame` into `dst`, converting
/// channel layout and sample type.
fn write_converted<S: OutputSample>(
    frame: &AudioFrame,
    count: usize,
    dst: &mut [S],
    out_channels: usize,
) {
    let src_channels = frame.channel_count();

    for (i, slot) in dst.chunks_exact_mut(out_channels).take(count).enumerate() {
        if src_channels == out_channels {
            for (c, s) in slot.iter_mut().enumerate() {
                *s = S::from_i16(frame.sample(i, c));
            }
        } else if src_channels == 1 {
            slot.fill(S::from_i16(frame.sample(i, 0)));
        } else if out_channels == 1 {
            let mixed = (frame.sample(i, 0) as i32 + frame.sample(i, 1) as i32) / 2;
            slot[0] = S::from_i16(mixed as i16);
        } else {
            for (c, s) in slot.iter_mut().enumerate() {
                *s = if c < src_channels {
                    S::from_i16(frame.sample(i, c))
                } else {
                    S::SILENCE
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTime;
    use crate::config::BufferConfig;
    use crate::frame_queue::DemandSignal;

    struct Fixture {
        bridge: AudioPullBridge,
        queue: Arc<FrameQueue<AudioFrame>>,
        clock: Arc<PlaybackClock>,
        metrics: SyncMetrics,
        time: ManualTime,
    }

    fn fixture() -> Fixture {
        let demand = Arc::new(DemandSignal::new());
        let queue = Arc::new(FrameQueue::new(BufferConfig::local(), demand));
        let time = ManualTime::new();
        let clock = Arc::new(PlaybackClock::new(Arc::new(time.clone())));
        clock.resume();
        let metrics = SyncMetrics::new();
        let bridge = AudioPullBridge::new(Arc::clone(&queue), Arc::clone(&clock), metrics.clone());
        Fixture {
            bridge,
            queue,
            clock,
            metrics,
            time,
        }
    }

    /// 1kHz mono frame whose samples count up from `first`.
    fn ramp(pts_ms: u64, first: i16, len: usize) -> AudioFrame {
        let samples: Vec<i16> = (0..len as i16).map(|i| first + i).collect();
        AudioFrame::from_i16(Duration::from_millis(pts_ms), 1000, 1, &samples)
    }

    #[test]
    fn test_fill_exact_count() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 20));
        f.queue.push(ramp(20, 21, 20));

        let mut out = [99i16; 30];
        assert_eq!(f.bridge.fill(&mut out, 30, 1), 30);
        let expected: Vec<i16> = (1..=30).collect();
        assert_eq!(&out[..], &expected[..]);
        assert_eq!(f.metrics.snapshot().underrun_count, 0);
    }

    #[test]
    fn test_partial_frame_remainder_stays_at_front() {
        let mut f = fixture();
        f.queue.push(ramp(0, 0, 20));

        let mut out = [0i16; 5];
        f.bridge.fill(&mut out, 5, 1);
        assert_eq!(out, [0, 1, 2, 3, 4]);
        assert_eq!(f.queue.peek_pts(), Some(Duration::from_millis(5)));
        assert_eq!(f.queue.buffered_duration(), Duration::from_millis(15));

        f.bridge.fill(&mut out, 5, 1);
        assert_eq!(out, [5, 6, 7, 8, 9]);
        // Clock follows the start of the most recent chunk
        assert_eq!(f.clock.current_position(), Duration::from_millis(5));
    }

    #[test]
    fn test_clock_never_runs_backwards_across_callbacks() {
        let mut f = fixture();
        // 7ms frames against a 5ms hardware buffer: chunk boundaries drift
        // through the buffer on every callback
        for i in 0..20u64 {
            f.queue.push(ramp(i * 7, (i * 7) as i16, 7));
        }

        let mut out = [0i16; 5];
        let mut last = f.clock.current_position();
        for cb in 0..25 {
            f.bridge.fill(&mut out, 5, 1);
            assert_eq!(out[0], cb * 5, "callback {cb} starts on the next sample");
            for _ in 0..5 {
                let pos = f.clock.current_position();
                assert!(pos >= last, "clock stepped back at callback {cb}");
                last = pos;
                f.time.advance(Duration::from_millis(1));
            }
        }
        // One buffer of wall time per callback keeps the clock on the audio
        assert_eq!(f.clock.current_position(), Duration::from_millis(125));
    }

    #[test]
    fn test_clock_anchors_latest_chunk_at_its_offset() {
        let mut f = fixture();
        f.queue.push(ramp(0, 0, 7));
        f.queue.push(ramp(7, 7, 7));

        let mut out = [0i16; 10];
        f.bridge.fill(&mut out, 10, 1);
        // The 7ms frame starts 7ms into the buffer
        assert_eq!(f.clock.current_position(), Duration::from_millis(7));
        f.time.advance(Duration::from_millis(4));
        assert_eq!(f.clock.current_position(), Duration::from_millis(7));
        f.time.advance(Duration::from_millis(6));
        assert_eq!(f.clock.current_position(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_channel_frame_plays_as_mono() {
        let mut f = fixture();
        f.queue.push(AudioFrame {
            pts: Duration::ZERO,
            duration: Duration::from_millis(2),
            samples: bytes::Bytes::from_static(&[5, 0, 6, 0]),
            channels: 0,
            sample_rate: 1000,
        });

        let mut out = [0i16; 4];
        assert_eq!(f.bridge.fill(&mut out, 2, 2), 2);
        assert_eq!(out, [5, 5, 6, 6]);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 4));

        let mut out = [7i16; 10];
        assert_eq!(f.bridge.fill(&mut out, 10, 1), 4);
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0, 0, 0]);

        let snap = f.metrics.snapshot();
        assert_eq!(snap.underrun_count, 1);
        assert_eq!(snap.silence_frames, 6);
        assert_eq!(snap.audio_frames_played, 4);
    }

    #[test]
    fn test_empty_after_eos_is_not_underrun() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 4));
        f.queue.set_eos();

        let mut out = [0i16; 10];
        f.bridge.fill(&mut out, 10, 1);
        assert!(f.bridge.is_finished());
        assert_eq!(f.metrics.snapshot().underrun_count, 0);
    }

    #[test]
    fn test_paused_outputs_silence_without_consuming() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 20));
        f.clock.pause();

        let mut out = [5i16; 8];
        assert_eq!(f.bridge.fill(&mut out, 8, 1), 0);
        assert_eq!(out, [0; 8]);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.metrics.snapshot().underrun_count, 0);
    }

    #[test]
    fn test_closed_queue_outputs_silence() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 20));
        f.queue.close();

        let mut out = [5.0f32; 4];
        assert_eq!(f.bridge.fill(&mut out, 4, 1), 0);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut f = fixture();
        f.queue.push(ramp(0, 10, 3));

        let mut out = [0i16; 6];
        f.bridge.fill(&mut out, 3, 2);
        assert_eq!(out, [10, 10, 11, 11, 12, 12]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut f = fixture();
        f.queue.push(AudioFrame::from_i16(
            Duration::ZERO,
            1000,
            2,
            &[100, 300, -50, 50],
        ));

        let mut out = [1i16; 2];
        f.bridge.fill(&mut out, 2, 1);
        assert_eq!(out, [200, 0]);
    }

    #[test]
    fn test_extra_output_channels_are_silent() {
        let mut f = fixture();
        f.queue.push(AudioFrame::from_i16(Duration::ZERO, 1000, 2, &[1, 2, 3, 4]));

        let mut out = [9i16; 8];
        f.bridge.fill(&mut out, 2, 4);
        assert_eq!(out, [1, 2, 0, 0, 3, 4, 0, 0]);
    }

    #[test]
    fn test_f32_output_scaling() {
        let mut f = fixture();
        f.queue.push(AudioFrame::from_i16(
            Duration::ZERO,
            1000,
            1,
            &[i16::MIN, 0, 16384],
        ));

        let mut out = [0.0f32; 3];
        f.bridge.fill(&mut out, 3, 1);
        approx::assert_relative_eq!(out[0], -1.0);
        approx::assert_relative_eq!(out[1], 0.0);
        approx::assert_relative_eq!(out[2], 0.5);
    }

    #[test]
    fn test_oversized_request_clamped_to_buffer() {
        let mut f = fixture();
        f.queue.push(ramp(0, 1, 20));

        let mut out = [0i16; 4];
        assert_eq!(f.bridge.fill(&mut out, 100, 2), 2);
        assert_eq!(out, [1, 1, 2, 2]);
    }
}
