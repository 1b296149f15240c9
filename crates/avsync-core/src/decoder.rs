//! Decoder adapter contract.
//!
//! The decoder itself (demuxing and codec work) lives outside this crate.
//! [`DecoderAdapter`] is the seam the decode thread drives: it is opened on
//! the control thread, then moved to the decode thread and called there
//! until end-of-stream, failure or shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioFormat;
use crate::frame::Frame;

/// Options passed to [`DecoderAdapter::open`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOptions {
    /// Bytes the demuxer may read while probing the container
    pub probe_size: Option<u64>,
    /// Upper bound on stream analysis time
    pub max_analyze_duration: Option<Duration>,
    /// Frames inspected to estimate the frame rate
    pub fps_probe_size: Option<u32>,
    /// Original URL of the source when `source` is a rewritten or proxied
    /// path (e.g. an RTMP tcUrl)
    pub source_url_hint: Option<String>,
}

impl OpenOptions {
    /// Sets the probe size.
    pub fn probe_size(mut self, bytes: u64) -> Self {
        self.probe_size = Some(bytes);
        self
    }

    /// Sets the maximum analyze duration.
    pub fn max_analyze_duration(mut self, duration: Duration) -> Self {
        self.max_analyze_duration = Some(duration);
        self
    }

    /// Sets the frame-rate probe size.
    pub fn fps_probe_size(mut self, frames: u32) -> Self {
        self.fps_probe_size = Some(frames);
        self
    }

    /// Sets the source URL hint.
    pub fn source_url_hint(mut self, url: impl Into<String>) -> Self {
        self.source_url_hint = Some(url.into());
        self
    }
}

/// Result of one successful decode step.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Frames in decode order, possibly empty, possibly mixed audio/video
    Frames(Vec<Frame>),
    /// The source has no more frames
    EndOfStream,
}

/// Errors reported by a decoder adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderError {
    /// The source could not be opened
    OpenFailed(String),
    /// Container or codec is not supported
    UnsupportedFormat(String),
    /// A decode step failed mid-stream
    DecodeFailed(String),
    /// The call returned early because the interrupt flag was raised
    Interrupted,
    /// `decode` was called before a successful `open`
    NotOpen,
}

impl std::fmt::Display for DecoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderError::OpenFailed(msg) => write!(f, "Failed to open source: {msg}"),
            DecoderError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {msg}"),
            DecoderError::DecodeFailed(msg) => write!(f, "Decode failed: {msg}"),
            DecoderError::Interrupted => write!(f, "Decoder interrupted"),
            DecoderError::NotOpen => write!(f, "Decoder is not open"),
        }
    }
}

impl std::error::Error for DecoderError {}

/// Cancellation request shared between the control side and a decoder.
///
/// Raising the flag does not preempt anything. An adapter that supports
/// cancellation polls [`is_raised`](Self::is_raised) at its own checkpoints
/// (between packets, inside blocking reads) and returns
/// [`DecoderError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the decoder to stop at its next checkpoint.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once a stop has been requested.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A source of decoded frames.
///
/// # Cancellation bound
///
/// The decode thread raises the [`InterruptFlag`] handed over through
/// [`set_interrupt`](Self::set_interrupt) when playback is closed, then
/// waits for the in-flight [`decode`](Self::decode) call to return before
/// exiting. Closing therefore takes at most one decode call for adapters
/// that ignore the flag, and one checkpoint interval for adapters that
/// honour it.
pub trait DecoderAdapter: Send {
    /// Opens the source. Called once, before any `decode`.
    fn open(&mut self, source: &str, options: &OpenOptions) -> Result<(), DecoderError>;

    /// Decodes at least `min_duration` of additional content when available.
    fn decode(&mut self, min_duration: Duration) -> Result<DecodeOutcome, DecoderError>;

    /// Releases decoder resources. Called on the decode thread during shutdown.
    fn close(&mut self);

    /// Width of the video stream in pixels (0 when unknown or absent).
    fn video_width(&self) -> u32;

    /// Height of the video stream in pixels (0 when unknown or absent).
    fn video_height(&self) -> u32;

    /// Returns true if the source carries an audio stream.
    fn has_audio(&self) -> bool {
        true
    }

    /// Returns true if the source carries a video stream.
    fn has_video(&self) -> bool {
        true
    }

    /// Output format of decoded audio, when known after `open`.
    fn audio_format(&self) -> Option<AudioFormat> {
        None
    }

    /// Hands the decoder the flag raised on shutdown.
    ///
    /// The default ignores it, which bounds shutdown by one decode call.
    fn set_interrupt(&mut self, _flag: InterruptFlag) {}
}

impl DecoderAdapter for Box<dyn DecoderAdapter> {
    fn open(&mut self, source: &str, options: &OpenOptions) -> Result<(), DecoderError> {
        (**self).open(source, options)
    }

    fn decode(&mut self, min_duration: Duration) -> Result<DecodeOutcome, DecoderError> {
        (**self).decode(min_duration)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn video_width(&self) -> u32 {
        (**self).video_width()
    }

    fn video_height(&self) -> u32 {
        (**self).video_height()
    }

    fn has_audio(&self) -> bool {
        (**self).has_audio()
    }

    fn has_video(&self) -> bool {
        (**self).has_video()
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        (**self).audio_format()
    }

    fn set_interrupt(&mut self, flag: InterruptFlag) {
        (**self).set_interrupt(flag)
    }
}
