//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avsync_core::{
    AudioFormat, AudioFrame, DecodeOutcome, DecoderAdapter, DecoderError, Frame, InterruptFlag,
    OpenOptions, VideoFrame,
};
use bytes::Bytes;

/// Sample rate of scripted audio: one sample per millisecond keeps the
/// arithmetic in tests readable.
pub const SAMPLE_RATE: u32 = 1000;

/// One scripted response to `decode`.
#[derive(Debug, Clone)]
pub enum Step {
    Frames(Vec<Frame>),
    Empty,
    Fail(String),
    End,
}

/// Counters shared between a test and the decoder it handed to the player.
#[derive(Debug, Clone, Default)]
pub struct DecoderProbe {
    pub calls: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
    pub in_decode: Arc<AtomicBool>,
}

impl DecoderProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_decoding(&self) -> bool {
        self.in_decode.load(Ordering::SeqCst)
    }
}

/// A decoder that replays a fixed script, then optionally generates audio
/// forever, then reports end-of-stream.
pub struct ScriptedDecoder {
    script: VecDeque<Step>,
    probe: DecoderProbe,
    endless_audio: Option<Duration>,
    next_endless_pts: Duration,
    latency: Duration,
    honour_interrupt: bool,
    interrupt: InterruptFlag,
    has_audio: bool,
    has_video: bool,
    open_error: Option<DecoderError>,
}

impl ScriptedDecoder {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            probe: DecoderProbe::default(),
            endless_audio: None,
            next_endless_pts: Duration::ZERO,
            latency: Duration::ZERO,
            honour_interrupt: false,
            interrupt: InterruptFlag::new(),
            has_audio: true,
            has_video: true,
            open_error: None,
        }
    }

    /// After the script, keep producing audio frames of `frame_len`.
    pub fn endless_audio(mut self, frame_len: Duration) -> Self {
        self.endless_audio = Some(frame_len);
        self
    }

    /// Each decode call takes `latency`; with `honour_interrupt` it returns
    /// `Interrupted` as soon as the flag is raised.
    pub fn latency(mut self, latency: Duration, honour_interrupt: bool) -> Self {
        self.latency = latency;
        self.honour_interrupt = honour_interrupt;
        self
    }

    pub fn streams(mut self, has_audio: bool, has_video: bool) -> Self {
        self.has_audio = has_audio;
        self.has_video = has_video;
        self
    }

    pub fn failing_open(mut self, error: DecoderError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn probe(&self) -> DecoderProbe {
        self.probe.clone()
    }

    fn wait_latency(&self) -> Result<(), DecoderError> {
        let deadline = Instant::now() + self.latency;
        while Instant::now() < deadline {
            if self.honour_interrupt && self.interrupt.is_raised() {
                return Err(DecoderError::Interrupted);
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl DecoderAdapter for ScriptedDecoder {
    fn open(&mut self, _source: &str, _options: &OpenOptions) -> Result<(), DecoderError> {
        match self.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn decode(&mut self, _min_duration: Duration) -> Result<DecodeOutcome, DecoderError> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.in_decode.store(true, Ordering::SeqCst);
        let waited = self.wait_latency();
        self.probe.in_decode.store(false, Ordering::SeqCst);
        waited?;

        match self.script.pop_front() {
            Some(Step::Frames(frames)) => Ok(DecodeOutcome::Frames(frames)),
            Some(Step::Empty) => Ok(DecodeOutcome::Frames(Vec::new())),
            Some(Step::Fail(msg)) => Err(DecoderError::DecodeFailed(msg)),
            Some(Step::End) => Ok(DecodeOutcome::EndOfStream),
            None => match self.endless_audio {
                Some(len) => {
                    let frame = audio_frame_at(self.next_endless_pts, len);
                    self.next_endless_pts += len;
                    Ok(DecodeOutcome::Frames(vec![frame.into()]))
                }
                None => Ok(DecodeOutcome::EndOfStream),
            },
        }
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }

    fn video_width(&self) -> u32 {
        if self.has_video {
            4
        } else {
            0
        }
    }

    fn video_height(&self) -> u32 {
        if self.has_video {
            2
        } else {
            0
        }
    }

    fn has_audio(&self) -> bool {
        self.has_audio
    }

    fn has_video(&self) -> bool {
        self.has_video
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.has_audio.then(|| AudioFormat::new(SAMPLE_RATE, 1))
    }

    fn set_interrupt(&mut self, flag: InterruptFlag) {
        self.interrupt = flag;
    }
}

/// Mono audio at [`SAMPLE_RATE`] whose samples encode their own timestamp
/// in milliseconds.
pub fn audio_frame_at(pts: Duration, len: Duration) -> AudioFrame {
    let start = pts.as_millis() as i16;
    let samples: Vec<i16> = (0..len.as_millis() as i16).map(|i| start + i).collect();
    AudioFrame::from_i16(pts, SAMPLE_RATE, 1, &samples)
}

pub fn audio_frame(pts_ms: u64, len_ms: u64) -> Frame {
    audio_frame_at(Duration::from_millis(pts_ms), Duration::from_millis(len_ms)).into()
}

pub fn video_frame(pts_ms: u64, len_ms: u64) -> Frame {
    VideoFrame {
        pts: Duration::from_millis(pts_ms),
        duration: Duration::from_millis(len_ms),
        width: 4,
        height: 2,
        line_size: 4,
        luma: Bytes::from_static(&[16; 8]),
        chroma_b: Bytes::from_static(&[128; 2]),
        chroma_r: Bytes::from_static(&[128; 2]),
    }
    .into()
}

/// Audio frames of 20ms and ~30fps video up to `total_ms`, merged in
/// presentation order the way a demuxer would emit them.
pub fn interleaved(total_ms: u64) -> Vec<Frame> {
    let mut frames: Vec<Frame> = (0..total_ms / 20).map(|i| audio_frame(i * 20, 20)).collect();
    let mut i = 0;
    loop {
        let pts = (i * 100 + 1) / 3; // 0, 33, 67, 100, ...
        if pts >= total_ms {
            break;
        }
        let next = ((i + 1) * 100 + 1) / 3;
        frames.push(video_frame(pts, next - pts));
        i += 1;
    }
    frames.sort_by_key(|f| f.pts());
    frames
}

/// Polls `cond` for up to two seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}
