//! Playback control surface.
//!
//! [`Player`] owns one playback session at a time. A session bundles the two
//! frame queues, the clock and the decode thread for a single opened source.
//! The audio and render sides receive their consumer handles once per
//! session through [`Player::take_audio_bridge`] and
//! [`Player::take_video_selector`].
//!
//! # State Machine
//!
//! ```text
//! new()                         → Idle
//!
//! open()   [any]                → Opened   (an active session is closed first)
//! open() fails                  → Idle
//! play()   [Opened/Paused]      → Playing
//! pause()  [Playing]            → Paused
//! stop()   [any]                → Stopped  (session torn down)
//! close()  [any]                → Idle     (session torn down)
//! ```
//!
//! End of stream does not change the state; it shows up as
//! [`PlaybackStatus::finished`].

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioFormat, AudioPullBridge};
use crate::clock::{MonotonicTime, PlaybackClock, TimeSource};
use crate::config::SyncConfig;
use crate::decode_pump::{DecodePump, PumpTargets};
use crate::decoder::{DecoderAdapter, DecoderError, OpenOptions};
use crate::frame::{AudioFrame, VideoFrame};
use crate::frame_queue::{DemandSignal, FrameQueue};
use crate::sync_metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::video_selector::VideoFrameSelector;

/// Playback state of a [`Player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No source opened
    Idle,
    /// Source opened, decode thread waiting for `play`
    Opened,
    /// Clock advancing, decode thread filling the queues
    Playing,
    /// Clock frozen, decode thread idle
    Paused,
    /// Session torn down by `stop`
    Stopped,
}

/// Errors returned by [`Player`] operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// The decoder could not open the source
    SourceOpen(DecoderError),
    /// The operation is not valid in the current state
    InvalidState {
        /// Operation attempted
        op: &'static str,
        /// State at the time
        state: PlaybackState,
    },
    /// The configuration is inconsistent
    InvalidConfig(String),
    /// The consumer handle was already handed out for this session
    ConsumerTaken(&'static str),
    /// The decode thread could not be started
    Spawn(String),
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::SourceOpen(e) => write!(f, "Failed to open source: {e}"),
            PlayerError::InvalidState { op, state } => {
                write!(f, "Cannot {op} while {state:?}")
            }
            PlayerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            PlayerError::ConsumerTaken(which) => {
                write!(f, "The {which} consumer was already taken for this session")
            }
            PlayerError::Spawn(msg) => write!(f, "Failed to start decode thread: {msg}"),
        }
    }
}

impl std::error::Error for PlayerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlayerError::SourceOpen(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecoderError> for PlayerError {
    fn from(e: DecoderError) -> Self {
        PlayerError::SourceOpen(e)
    }
}

/// Point-in-time view of a playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    /// Control state
    pub state: PlaybackState,
    /// Clock position
    pub position: Duration,
    /// Audio waiting in the queue
    pub audio_buffered: Duration,
    /// Video waiting in the queue
    pub video_buffered: Duration,
    /// True once every present stream reached end-of-stream and was consumed
    pub finished: bool,
    /// Decode error that ended production early, if any
    pub decode_error: Option<DecoderError>,
}

struct Session {
    source: String,
    audio: Arc<FrameQueue<AudioFrame>>,
    video: Arc<FrameQueue<VideoFrame>>,
    clock: Arc<PlaybackClock>,
    pump: DecodePump,
    bridge: Option<AudioPullBridge>,
    selector: Option<VideoFrameSelector>,
    has_audio: bool,
    has_video: bool,
    dimensions: (u32, u32),
    audio_format: Option<AudioFormat>,
}

impl Session {
    fn is_finished(&self) -> bool {
        (!self.has_audio || self.audio.is_drained()) && (!self.has_video || self.video.is_drained())
    }

    /// Stops the clock and the decode thread and discards every queued frame.
    ///
    /// Consumer handles still held elsewhere keep the queues alive but see
    /// them closed and empty.
    fn teardown(mut self) {
        self.clock.pause();
        self.pump.request_stop();
        let audio_dropped = self.audio.close();
        let video_dropped = self.video.close();
        self.pump.join();
        tracing::info!(
            "Player: closed {} (discarded {} audio, {} video frames)",
            self.source,
            audio_dropped,
            video_dropped
        );
    }
}

/// Audio-master A/V playback controller.
pub struct Player {
    config: SyncConfig,
    time: Arc<dyn TimeSource>,
    metrics: SyncMetrics,
    state: PlaybackState,
    session: Option<Session>,
}

impl Player {
    /// Creates an idle player using the monotonic system clock.
    pub fn new(config: SyncConfig) -> Result<Self, PlayerError> {
        Self::with_time_source(config, Arc::new(MonotonicTime::new()))
    }

    /// Creates an idle player reading wall time from `time`.
    pub fn with_time_source(
        config: SyncConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, PlayerError> {
        config.validate().map_err(PlayerError::InvalidConfig)?;
        Ok(Self {
            config,
            time,
            metrics: SyncMetrics::new(),
            state: PlaybackState::Idle,
            session: None,
        })
    }

    /// Opens `source` with `decoder` and prepares a paused session.
    ///
    /// An already active session is closed first. On failure the player is
    /// left idle.
    pub fn open<D: DecoderAdapter + 'static>(
        &mut self,
        mut decoder: D,
        source: &str,
        options: &OpenOptions,
    ) -> Result<(), PlayerError> {
        if self.session.is_some() {
            tracing::debug!("Player: open while active, closing previous session");
            self.close();
        }

        if let Err(e) = decoder.open(source, options) {
            tracing::warn!("Player: failed to open {}: {}", source, e);
            // Release whatever the adapter acquired before failing
            decoder.close();
            self.state = PlaybackState::Idle;
            return Err(PlayerError::SourceOpen(e));
        }

        let has_audio = decoder.has_audio();
        let has_video = decoder.has_video();
        let dimensions = (decoder.video_width(), decoder.video_height());
        let audio_format = decoder.audio_format();

        let demand = Arc::new(DemandSignal::new());
        let audio = Arc::new(FrameQueue::new(
            self.config.audio_buffer.clone(),
            Arc::clone(&demand),
        ));
        let video = Arc::new(FrameQueue::new(
            self.config.video_buffer.clone(),
            Arc::clone(&demand),
        ));
        // Absent streams never produce frames; consumers see them as ended
        if !has_audio {
            audio.set_eos();
        }
        if !has_video {
            video.set_eos();
        }

        let clock = Arc::new(if has_audio {
            PlaybackClock::new(Arc::clone(&self.time))
        } else {
            PlaybackClock::free_running(Arc::clone(&self.time))
        });

        self.metrics.reset();
        let targets = PumpTargets {
            audio: Arc::clone(&audio),
            video: Arc::clone(&video),
            demand,
            metrics: self.metrics.clone(),
            min_duration: self.config.decode_min_duration,
        };
        let pump = DecodePump::spawn(decoder, targets).map_err(|e| {
            self.state = PlaybackState::Idle;
            PlayerError::Spawn(e.to_string())
        })?;

        let bridge = AudioPullBridge::new(
            Arc::clone(&audio),
            Arc::clone(&clock),
            self.metrics.clone(),
        );
        let selector = VideoFrameSelector::new(
            Arc::clone(&video),
            Arc::clone(&clock),
            self.metrics.clone(),
            &self.config,
        );

        tracing::info!(
            "Player: opened {} (audio={}, video={} {}x{})",
            source,
            has_audio,
            has_video,
            dimensions.0,
            dimensions.1
        );

        self.session = Some(Session {
            source: source.to_string(),
            audio,
            video,
            clock,
            pump,
            bridge: Some(bridge),
            selector: Some(selector),
            has_audio,
            has_video,
            dimensions,
            audio_format,
        });
        self.state = PlaybackState::Opened;
        Ok(())
    }

    /// Starts or resumes playback.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        let session = self.active_session("play")?;
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        session.clock.resume();
        session.pump.play();
        tracing::debug!("Player: {:?} -> Playing", self.state);
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Pauses playback. The clock freezes and decoding stops; queued frames
    /// are kept.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        let session = self.active_session("pause")?;
        if self.state != PlaybackState::Playing {
            return Ok(());
        }
        session.clock.pause();
        session.pump.pause();
        tracing::debug!("Player: Playing -> Paused");
        self.state = PlaybackState::Paused;
        Ok(())
    }

    /// Tears down the session and enters `Stopped`.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.state = PlaybackState::Stopped;
    }

    /// Tears down the session and returns to `Idle`.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.state = PlaybackState::Idle;
    }

    /// Hands out the audio consumer for this session. Succeeds once per session.
    pub fn take_audio_bridge(&mut self) -> Result<AudioPullBridge, PlayerError> {
        let state = self.state;
        let session = self.session.as_mut().ok_or(PlayerError::InvalidState {
            op: "take audio bridge",
            state,
        })?;
        session
            .bridge
            .take()
            .ok_or(PlayerError::ConsumerTaken("audio"))
    }

    /// Hands out the video consumer for this session. Succeeds once per session.
    pub fn take_video_selector(&mut self) -> Result<VideoFrameSelector, PlayerError> {
        let state = self.state;
        let session = self.session.as_mut().ok_or(PlayerError::InvalidState {
            op: "take video selector",
            state,
        })?;
        session
            .selector
            .take()
            .ok_or(PlayerError::ConsumerTaken("video"))
    }

    /// Returns the current control state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Returns the clock position (zero without a session).
    pub fn position(&self) -> Duration {
        self.session
            .as_ref()
            .map_or(Duration::ZERO, |s| s.clock.current_position())
    }

    /// Returns the video dimensions reported by the decoder.
    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.session
            .as_ref()
            .filter(|s| s.has_video)
            .map(|s| s.dimensions)
    }

    /// Returns the decoded audio format, when the decoder reports one.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.session.as_ref().and_then(|s| s.audio_format)
    }

    /// Returns true if the open source carries audio.
    pub fn has_audio(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.has_audio)
    }

    /// Returns true if the open source carries video.
    pub fn has_video(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.has_video)
    }

    /// Returns a status snapshot.
    pub fn status(&self) -> PlaybackStatus {
        match &self.session {
            Some(session) => {
                PlaybackStatus {
                    state: self.state,
                    position: session.clock.current_position(),
                    audio_buffered: session.audio.buffered_duration(),
                    video_buffered: session.video.buffered_duration(),
                    finished: session.is_finished(),
                    decode_error: session.pump.status().error,
                }
            }
            None => PlaybackStatus {
                state: self.state,
                position: Duration::ZERO,
                audio_buffered: Duration::ZERO,
                video_buffered: Duration::ZERO,
                finished: false,
                decode_error: None,
            },
        }
    }

    /// Returns the metrics shared by the session's threads.
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Returns a metrics snapshot.
    pub fn metrics_snapshot(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the configuration sessions are created with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn active_session(&self, op: &'static str) -> Result<&Session, PlayerError> {
        self.session.as_ref().ok_or(PlayerError::InvalidState {
            op,
            state: self.state,
        })
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTime;
    use crate::synthetic::{SyntheticConfig, SyntheticDecoder};

    fn player() -> (Player, ManualTime) {
        let time = ManualTime::new();
        let Ok(player) = Player::with_time_source(SyncConfig::local(), Arc::new(time.clone()))
        else {
            panic!("default config should be valid");
        };
        (player, time)
    }

    fn open_synthetic(player: &mut Player, config: SyntheticConfig) {
        let result = player.open(
            SyntheticDecoder::new(config),
            "synthetic:test",
            &OpenOptions::default(),
        );
        assert!(result.is_ok(), "open failed: {result:?}");
    }

    #[test]
    fn test_state_transitions() {
        let (mut player, _) = player();
        assert_eq!(player.state(), PlaybackState::Idle);

        open_synthetic(&mut player, SyntheticConfig::default());
        assert_eq!(player.state(), PlaybackState::Opened);
        assert_eq!(player.video_dimensions(), Some((320, 180)));
        assert_eq!(player.audio_format(), Some(AudioFormat::new(48000, 2)));

        assert!(player.play().is_ok());
        assert_eq!(player.state(), PlaybackState::Playing);
        assert!(player.pause().is_ok());
        assert_eq!(player.state(), PlaybackState::Paused);
        assert!(player.play().is_ok());
        assert_eq!(player.state(), PlaybackState::Playing);

        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
        player.close();
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_without_session_is_invalid() {
        let (mut player, _) = player();
        assert_eq!(
            player.play(),
            Err(PlayerError::InvalidState {
                op: "play",
                state: PlaybackState::Idle
            })
        );
        player.stop();
        assert!(matches!(
            player.pause(),
            Err(PlayerError::InvalidState {
                state: PlaybackState::Stopped,
                ..
            })
        ));
    }

    #[test]
    fn test_open_failure_reports_source_error() {
        let (mut player, _) = player();
        let result = player.open(
            SyntheticDecoder::new(SyntheticConfig::default()),
            "file:///missing.mp4",
            &OpenOptions::default(),
        );
        assert!(matches!(
            result,
            Err(PlayerError::SourceOpen(DecoderError::UnsupportedFormat(_)))
        ));
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_consumers_handed_out_once() {
        let (mut player, _) = player();
        open_synthetic(&mut player, SyntheticConfig::default());

        assert!(player.take_audio_bridge().is_ok());
        assert_eq!(
            player.take_audio_bridge().err(),
            Some(PlayerError::ConsumerTaken("audio"))
        );
        assert!(player.take_video_selector().is_ok());
        assert_eq!(
            player.take_video_selector().err(),
            Some(PlayerError::ConsumerTaken("video"))
        );
    }

    #[test]
    fn test_reopen_gives_fresh_consumers() {
        let (mut player, _) = player();
        open_synthetic(&mut player, SyntheticConfig::default());
        let Ok(mut old_bridge) = player.take_audio_bridge() else {
            panic!("bridge should be available");
        };

        open_synthetic(&mut player, SyntheticConfig::default());
        assert_eq!(player.state(), PlaybackState::Opened);
        assert!(player.take_audio_bridge().is_ok());

        // The old bridge outlives its session but only produces silence
        let mut out = [1i16; 64];
        assert_eq!(old_bridge.fill(&mut out, 32, 2), 0);
        assert_eq!(out, [0i16; 64]);
        assert_eq!(old_bridge.buffered(), Duration::ZERO);
    }

    #[test]
    fn test_video_only_source_uses_free_running_clock() {
        let (mut player, time) = player();
        open_synthetic(
            &mut player,
            SyntheticConfig {
                audio: None,
                ..SyntheticConfig::default()
            },
        );
        assert!(!player.has_audio());
        assert!(player.has_video());

        assert!(player.play().is_ok());
        time.advance(Duration::from_millis(120));
        assert_eq!(player.position(), Duration::from_millis(120));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig {
            decode_min_duration: Duration::ZERO,
            ..SyncConfig::local()
        };
        assert!(matches!(
            Player::new(config),
            Err(PlayerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = PlayerError::InvalidState {
            op: "play",
            state: PlaybackState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot play while Idle");
    }
}
