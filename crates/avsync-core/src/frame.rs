//! Decoded frame types.
//!
//! Frames are immutable once produced by the decoder. Payloads are held in
//! [`Bytes`] so a frame can move between the decode thread, a queue and a
//! consumer without copying, and so an audio frame can be split at a sample
//! boundary without touching the allocator.

use std::time::Duration;

use bytes::Bytes;

/// Bytes per PCM sample (signed 16-bit little-endian).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Common timing accessors for anything stored in a [`FrameQueue`](crate::frame_queue::FrameQueue).
pub trait Timed {
    /// Presentation timestamp.
    fn pts(&self) -> Duration;
    /// How long this frame occupies on the timeline.
    fn duration(&self) -> Duration;
}

/// Converts a count of sample frames at `sample_rate` into a duration.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// A block of decoded PCM audio.
///
/// Samples are interleaved signed 16-bit little-endian, `channels` per
/// sample frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp of the first sample frame
    pub pts: Duration,
    /// Duration covered by `samples`
    pub duration: Duration,
    /// Interleaved PCM payload
    pub samples: Bytes,
    /// Number of interleaved channels
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Creates an audio frame from raw interleaved PCM bytes.
    ///
    /// The duration is derived from the payload length. A trailing partial
    /// sample frame is ignored.
    pub fn new(pts: Duration, sample_rate: u32, channels: u16, samples: Bytes) -> Self {
        let channels = channels.max(1);
        let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
        let whole = samples.len() / frame_bytes * frame_bytes;
        let samples = samples.slice(..whole);
        let duration = frames_to_duration((whole / frame_bytes) as u64, sample_rate);
        Self {
            pts,
            duration,
            samples,
            channels,
            sample_rate,
        }
    }

    /// Creates an audio frame from interleaved `i16` samples.
    pub fn from_i16(pts: Duration, sample_rate: u32, channels: u16, samples: &[i16]) -> Self {
        let mut raw = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for s in samples {
            raw.extend_from_slice(&s.to_le_bytes());
        }
        Self::new(pts, sample_rate, channels, Bytes::from(raw))
    }

    /// Number of sample frames (one sample per channel) in this frame.
    pub fn sample_frames(&self) -> usize {
        self.samples.len() / (BYTES_PER_SAMPLE * self.channel_count())
    }

    /// Channel count used for payload layout; a zero count reads as mono.
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.max(1) as usize
    }

    /// Returns the sample at `frame` for `channel`, or silence when out of range.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> i16 {
        let offset = (frame * self.channel_count() + channel) * BYTES_PER_SAMPLE;
        match self.samples.get(offset..offset + BYTES_PER_SAMPLE) {
            Some(b) => i16::from_le_bytes([b[0], b[1]]),
            None => 0,
        }
    }

    /// Returns what is left after the first `consumed` sample frames.
    ///
    /// The remainder's presentation time is advanced by the consumed span.
    /// Returns `None` when nothing remains. The payload is a sub-slice of
    /// the same buffer.
    pub fn remainder_after(&self, consumed: usize) -> Option<AudioFrame> {
        let total = self.sample_frames();
        if consumed >= total {
            return None;
        }
        let frame_bytes = BYTES_PER_SAMPLE * self.channel_count();
        let consumed_span = frames_to_duration(consumed as u64, self.sample_rate);
        Some(AudioFrame {
            pts: self.pts + consumed_span,
            duration: self.duration.saturating_sub(consumed_span),
            samples: self.samples.slice(consumed * frame_bytes..),
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }
}

impl Timed for AudioFrame {
    fn pts(&self) -> Duration {
        self.pts
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

/// A decoded planar YUV 4:2:0 picture.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation timestamp (when this frame should be displayed)
    pub pts: Duration,
    /// Display duration
    pub duration: Duration,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per luma row, may include padding
    pub line_size: usize,
    /// Y plane
    pub luma: Bytes,
    /// Cb plane
    pub chroma_b: Bytes,
    /// Cr plane
    pub chroma_r: Bytes,
}

impl VideoFrame {
    /// Returns the frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per chroma row for 4:2:0 subsampling.
    pub fn chroma_line_size(&self) -> usize {
        self.line_size.div_ceil(2)
    }
}

impl Timed for VideoFrame {
    fn pts(&self) -> Duration {
        self.pts
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

/// A decoded unit as returned by the decoder.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Audio samples
    Audio(AudioFrame),
    /// A video picture
    Video(VideoFrame),
}

impl Frame {
    /// Presentation timestamp of either variant.
    pub fn pts(&self) -> Duration {
        match self {
            Frame::Audio(f) => f.pts,
            Frame::Video(f) => f.pts,
        }
    }

    /// Duration of either variant.
    pub fn duration(&self) -> Duration {
        match self {
            Frame::Audio(f) => f.duration,
            Frame::Video(f) => f.duration,
        }
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}
