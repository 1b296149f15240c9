//! Synthetic test-pattern decoder.
//!
//! Generates a sine tone and a moving luma bar without touching any codec,
//! so playback can be exercised end to end in the demo and in tests.
//! Sources are named `synthetic:<anything>`.

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::audio::AudioFormat;
use crate::decoder::{DecodeOutcome, DecoderAdapter, DecoderError, InterruptFlag, OpenOptions};
use crate::frame::{frames_to_duration, AudioFrame, Frame, VideoFrame};

/// Source prefix accepted by [`SyntheticDecoder`].
pub const SYNTHETIC_SCHEME: &str = "synthetic:";

/// Parameters of the generated streams.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Total stream length
    pub duration: Duration,
    /// Audio format (`None` for a video-only source)
    pub audio: Option<AudioFormat>,
    /// Sample frames per audio frame
    pub audio_frame_len: u32,
    /// Tone frequency in Hz
    pub tone_hz: f32,
    /// Video frame rate (`0` for an audio-only source)
    pub fps: u32,
    /// Picture width in pixels
    pub width: u32,
    /// Picture height in pixels
    pub height: u32,
    /// Fail with a decode error once content reaches this time
    pub fail_at: Option<Duration>,
    /// Simulated cost of each decode call
    pub decode_latency: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            audio: Some(AudioFormat::new(48000, 2)),
            audio_frame_len: 1024,
            tone_hz: 440.0,
            fps: 30,
            width: 320,
            height: 180,
            fail_at: None,
            decode_latency: Duration::ZERO,
        }
    }
}

/// A [`DecoderAdapter`] producing generated audio and video.
pub struct SyntheticDecoder {
    config: SyntheticConfig,
    open: bool,
    audio_cursor: u64,
    video_cursor: u64,
    interrupt: InterruptFlag,
}

impl SyntheticDecoder {
    /// Creates a decoder for the given stream parameters.
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            open: false,
            audio_cursor: 0,
            video_cursor: 0,
            interrupt: InterruptFlag::new(),
        }
    }

    fn next_audio_pts(&self) -> Option<Duration> {
        let format = self.config.audio?;
        let pts = frames_to_duration(self.audio_cursor, format.sample_rate);
        (pts < self.config.duration).then_some(pts)
    }

    fn next_video_pts(&self) -> Option<Duration> {
        if self.config.fps == 0 {
            return None;
        }
        let pts = frames_to_duration(self.video_cursor, self.config.fps);
        (pts < self.config.duration).then_some(pts)
    }

    fn make_audio(&mut self, pts: Duration, format: AudioFormat) -> AudioFrame {
        let remaining = frames_to_remaining(self.config.duration - pts, format.sample_rate);
        let len = (self.config.audio_frame_len as u64).min(remaining.max(1));
        let channels = format.channels.max(1) as usize;
        let mut samples = Vec::with_capacity(len as usize * channels);
        for i in 0..len {
            let t = (self.audio_cursor + i) as f32 / format.sample_rate as f32;
            let value = ((TAU * self.config.tone_hz * t).sin() * 0.25 * i16::MAX as f32) as i16;
            samples.extend(std::iter::repeat(value).take(channels));
        }
        self.audio_cursor += len;
        AudioFrame::from_i16(pts, format.sample_rate, format.channels, &samples)
    }

    fn make_video(&mut self, pts: Duration) -> VideoFrame {
        let width = self.config.width.max(2) as usize;
        let height = self.config.height.max(2) as usize;
        let bar = (self.video_cursor as usize * 4) % width;

        let mut luma = vec![16u8; width * height];
        for row in luma.chunks_exact_mut(width) {
            row[bar..(bar + 8).min(width)].fill(235);
        }
        let chroma_len = width.div_ceil(2) * height.div_ceil(2);

        self.video_cursor += 1;
        VideoFrame {
            pts,
            duration: Duration::from_secs(1) / self.config.fps,
            width: width as u32,
            height: height as u32,
            line_size: width,
            luma: Bytes::from(luma),
            chroma_b: Bytes::from(vec![128u8; chroma_len]),
            chroma_r: Bytes::from(vec![128u8; chroma_len]),
        }
    }

    /// Sleeps for the configured latency, returning early if interrupted.
    fn simulate_latency(&self) -> Result<(), DecoderError> {
        let deadline = Instant::now() + self.config.decode_latency;
        while Instant::now() < deadline {
            if self.interrupt.is_raised() {
                return Err(DecoderError::Interrupted);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

fn frames_to_remaining(span: Duration, rate: u32) -> u64 {
    (span.as_nanos() * rate as u128).div_ceil(1_000_000_000) as u64
}

impl DecoderAdapter for SyntheticDecoder {
    fn open(&mut self, source: &str, options: &OpenOptions) -> Result<(), DecoderError> {
        if !source.starts_with(SYNTHETIC_SCHEME) {
            return Err(DecoderError::UnsupportedFormat(format!(
                "not a synthetic source: {source}"
            )));
        }
        if self.config.audio.is_none() && self.config.fps == 0 {
            return Err(DecoderError::OpenFailed("source has no streams".into()));
        }
        tracing::debug!(
            "SyntheticDecoder: opened {} ({:?}, {:?})",
            source,
            self.config.duration,
            options
        );
        self.open = true;
        self.audio_cursor = 0;
        self.video_cursor = 0;
        Ok(())
    }

    fn decode(&mut self, min_duration: Duration) -> Result<DecodeOutcome, DecoderError> {
        if !self.open {
            return Err(DecoderError::NotOpen);
        }
        self.simulate_latency()?;

        let start = match (self.next_audio_pts(), self.next_video_pts()) {
            (None, None) => return Ok(DecodeOutcome::EndOfStream),
            (Some(a), Some(v)) => a.min(v),
            (Some(a), None) => a,
            (None, Some(v)) => v,
        };
        if let Some(fail_at) = self.config.fail_at {
            if start >= fail_at {
                return Err(DecoderError::DecodeFailed(format!(
                    "synthetic failure at {fail_at:?}"
                )));
            }
        }

        let target = start + min_duration;
        let mut frames = Vec::new();
        loop {
            let next = match (self.next_audio_pts(), self.next_video_pts()) {
                (None, None) => break,
                (Some(a), Some(v)) if v < a => Frame::Video(self.make_video(v)),
                (Some(a), _) => match self.config.audio {
                    Some(format) => Frame::Audio(self.make_audio(a, format)),
                    None => break,
                },
                (None, Some(v)) => Frame::Video(self.make_video(v)),
            };
            let reached = next.pts() >= target;
            frames.push(next);
            if reached {
                break;
            }
        }
        Ok(DecodeOutcome::Frames(frames))
    }

    fn close(&mut self) {
        self.open = false;
        tracing::debug!("SyntheticDecoder: closed");
    }

    fn video_width(&self) -> u32 {
        if self.config.fps == 0 {
            0
        } else {
            self.config.width
        }
    }

    fn video_height(&self) -> u32 {
        if self.config.fps == 0 {
            0
        } else {
            self.config.height
        }
    }

    fn has_audio(&self) -> bool {
        self.config.audio.is_some()
    }

    fn has_video(&self) -> bool {
        self.config.fps > 0
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.config.audio
    }

    fn set_interrupt(&mut self, flag: InterruptFlag) {
        self.interrupt = flag;
    }
}
