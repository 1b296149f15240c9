//! Background decode thread.
//!
//! The pump owns the [`DecoderAdapter`] for the lifetime of a session. It
//! keeps both frame queues topped up between their watermarks and parks on
//! the shared [`DemandSignal`] when they are full:
//!
//! ```text
//!   control ──cmd──▶ ┌────────────┐ push ┌─────────────┐ pop ┌─────────────────┐
//!                    │ DecodePump │─────▶│ audio queue │────▶│ AudioPullBridge │
//!   decoder ◀decode──│  (thread)  │─────▶│ video queue │────▶│ VideoSelector   │
//!                    └─────▲──────┘      └──────┬──────┘     └─────────────────┘
//!                          └──── demand (low watermark crossed) ◀───┘
//! ```
//!
//! Decoding continues while any present stream is below its high watermark
//! and stops once all are at or above it. After parking, decoding resumes
//! only when a queue drains below its low watermark.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::decoder::{DecodeOutcome, DecoderAdapter, DecoderError, InterruptFlag};
use crate::frame::{AudioFrame, Frame, VideoFrame};
use crate::frame_queue::{DemandSignal, FrameQueue};
use crate::sync_metrics::SyncMetrics;

/// How long to back off after a decode call that returned no frames.
const EMPTY_DECODE_BACKOFF: Duration = Duration::from_millis(10);

/// Commands sent to the decode thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    /// Start or resume decoding
    Play,
    /// Stop decoding but keep the decoder open
    Pause,
    /// Exit the decode thread
    Stop,
}

/// What the decode thread is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpPhase {
    /// Waiting for `Play`
    Paused,
    /// Inside a decode call
    Decoding,
    /// Queues are full; parked until a consumer drains one
    Waiting,
    /// The decoder reported end-of-stream
    Finished,
    /// The decoder failed; buffered frames remain playable
    Failed,
    /// The thread has exited and the decoder is closed
    Stopped,
}

/// Snapshot of the decode thread state.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpStatus {
    /// Current phase
    pub phase: PumpPhase,
    /// The decode error that ended production, if any
    pub error: Option<DecoderError>,
}

impl Default for PumpStatus {
    fn default() -> Self {
        Self {
            phase: PumpPhase::Paused,
            error: None,
        }
    }
}

/// Where decoded frames go and how much to ask for.
pub struct PumpTargets {
    /// Audio frame destination
    pub audio: Arc<FrameQueue<AudioFrame>>,
    /// Video frame destination
    pub video: Arc<FrameQueue<VideoFrame>>,
    /// Raised by the consumers when a queue needs refilling
    pub demand: Arc<DemandSignal>,
    /// Decode call and error counters
    pub metrics: SyncMetrics,
    /// Minimum content requested per decode call
    pub min_duration: Duration,
}

/// Handle to the decode thread.
///
/// The thread starts paused. Dropping the handle stops and joins it.
pub struct DecodePump {
    handle: Option<JoinHandle<()>>,
    command_tx: Sender<PumpCommand>,
    demand: Arc<DemandSignal>,
    interrupt: InterruptFlag,
    status: Arc<Mutex<PumpStatus>>,
}

impl DecodePump {
    /// Spawns the decode thread for an opened decoder.
    pub fn spawn<D: DecoderAdapter + 'static>(
        mut decoder: D,
        targets: PumpTargets,
    ) -> std::io::Result<Self> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let interrupt = InterruptFlag::new();
        let status = Arc::new(Mutex::new(PumpStatus::default()));
        let demand = Arc::clone(&targets.demand);

        decoder.set_interrupt(interrupt.clone());

        let worker = PumpWorker {
            has_audio: decoder.has_audio(),
            has_video: decoder.has_video(),
            targets,
            command_rx,
            interrupt: interrupt.clone(),
            status: Arc::clone(&status),
            playing: false,
            parked: false,
            done: false,
        };

        let handle = thread::Builder::new()
            .name("avsync-decode".into())
            .spawn(move || worker.run(decoder))?;

        Ok(Self {
            handle: Some(handle),
            command_tx,
            demand,
            interrupt,
            status,
        })
    }

    /// Starts or resumes decoding.
    pub fn play(&self) {
        self.send(PumpCommand::Play);
    }

    /// Pauses decoding.
    pub fn pause(&self) {
        self.send(PumpCommand::Pause);
    }

    /// Asks the thread to exit without waiting for it.
    ///
    /// Raises the decoder's interrupt flag so an in-flight decode call can
    /// return early.
    pub fn request_stop(&self) {
        self.interrupt.raise();
        self.send(PumpCommand::Stop);
    }

    /// Stops the thread and waits for it to exit.
    ///
    /// When this returns the decoder has been closed.
    pub fn join(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("DecodePump: decode thread panicked");
            }
        }
    }

    /// Returns the current decode thread status.
    pub fn status(&self) -> PumpStatus {
        self.status.lock().clone()
    }

    fn send(&self, cmd: PumpCommand) {
        // The receiver is gone once the thread exited; nothing left to tell it
        let _ = self.command_tx.send(cmd);
        self.demand.notify();
    }
}

impl Drop for DecodePump {
    fn drop(&mut self) {
        self.join();
    }
}

struct PumpWorker {
    has_audio: bool,
    has_video: bool,
    targets: PumpTargets,
    command_rx: Receiver<PumpCommand>,
    interrupt: InterruptFlag,
    status: Arc<Mutex<PumpStatus>>,
    playing: bool,
    /// True after parking on full queues, until a queue drains below low water
    parked: bool,
    /// True after end-of-stream or a decode failure
    done: bool,
}

impl PumpWorker {
    fn run<D: DecoderAdapter>(mut self, mut decoder: D) {
        tracing::debug!(
            "DecodePump: thread started (audio={}, video={})",
            self.has_audio,
            self.has_video
        );

        loop {
            // Arm before looking at commands or levels so a notification
            // landing after the checks still wakes the wait below
            let ticket = self.targets.demand.arm();

            if !self.drain_commands() || self.interrupt.is_raised() {
                break;
            }

            if self.done || !self.playing {
                self.targets.demand.disarm();
                if !self.done {
                    self.set_phase(PumpPhase::Paused);
                }
                let keep_running = match self.command_rx.recv() {
                    Ok(cmd) => self.apply(cmd),
                    Err(_) => false,
                };
                if keep_running {
                    continue;
                }
                break;
            }

            if !self.needs_data() {
                if !self.parked {
                    tracing::trace!(
                        "DecodePump: queues full (audio={:?}, video={:?}), parking",
                        self.targets.audio.buffered_duration(),
                        self.targets.video.buffered_duration()
                    );
                    self.parked = true;
                    self.set_phase(PumpPhase::Waiting);
                }
                self.targets.demand.wait(ticket);
                continue;
            }
            self.targets.demand.disarm();
            self.parked = false;

            self.set_phase(PumpPhase::Decoding);
            self.targets.metrics.record_decode_call();
            match decoder.decode(self.targets.min_duration) {
                Ok(DecodeOutcome::Frames(frames)) if frames.is_empty() => {
                    tracing::trace!("DecodePump: decoder returned no frames, backing off");
                    let ticket = self.targets.demand.arm();
                    self.targets.demand.wait_for(ticket, EMPTY_DECODE_BACKOFF);
                }
                Ok(DecodeOutcome::Frames(frames)) => self.route(frames),
                Ok(DecodeOutcome::EndOfStream) => {
                    tracing::info!("DecodePump: end of stream");
                    self.finish(PumpPhase::Finished, None);
                }
                Err(DecoderError::Interrupted) => {
                    tracing::debug!("DecodePump: decode interrupted");
                    break;
                }
                Err(e) => {
                    tracing::error!("DecodePump: decode failed: {}", e);
                    self.targets.metrics.record_decode_error();
                    self.finish(PumpPhase::Failed, Some(e));
                }
            }
        }

        decoder.close();
        self.set_phase(PumpPhase::Stopped);
        tracing::debug!("DecodePump: thread exiting, decoder closed");
    }

    /// Applies every queued command. Returns false on `Stop`.
    fn drain_commands(&mut self) -> bool {
        while let Ok(cmd) = self.command_rx.try_recv() {
            if !self.apply(cmd) {
                return false;
            }
        }
        true
    }

    fn apply(&mut self, cmd: PumpCommand) -> bool {
        tracing::debug!("DecodePump: command {:?}", cmd);
        match cmd {
            PumpCommand::Play => self.playing = true,
            PumpCommand::Pause => self.playing = false,
            PumpCommand::Stop => return false,
        }
        true
    }

    fn needs_data(&self) -> bool {
        let audio = &self.targets.audio;
        let video = &self.targets.video;

        // One stream far ahead of the other must not grow without bound
        if (self.has_audio && audio.is_overfilled()) || (self.has_video && video.is_overfilled()) {
            return false;
        }

        if self.parked {
            (self.has_audio && audio.is_starved()) || (self.has_video && video.is_starved())
        } else {
            (self.has_audio && !audio.is_full()) || (self.has_video && !video.is_full())
        }
    }

    fn route(&self, frames: Vec<Frame>) {
        let count = frames.len();
        for frame in frames {
            match frame {
                Frame::Audio(audio) if self.has_audio => {
                    self.targets.audio.push(audio);
                }
                Frame::Video(video) if self.has_video => {
                    self.targets.video.push(video);
                }
                other => {
                    tracing::trace!(
                        "DecodePump: discarding frame for absent stream at {:?}",
                        other.pts()
                    );
                }
            }
        }
        tracing::trace!(
            "DecodePump: routed {} frames (audio={:?}, video={:?})",
            count,
            self.targets.audio.buffered_duration(),
            self.targets.video.buffered_duration()
        );
    }

    fn finish(&mut self, phase: PumpPhase, error: Option<DecoderError>) {
        self.done = true;
        self.targets.audio.set_eos();
        self.targets.video.set_eos();
        let mut status = self.status.lock();
        status.phase = phase;
        if error.is_some() {
            status.error = error;
        }
    }

    fn set_phase(&self, phase: PumpPhase) {
        self.status.lock().phase = phase;
    }
}
