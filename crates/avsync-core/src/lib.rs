//! avsync-core: audio-master audio/video synchronization.
//!
//! This crate sits between a decoder and the two things that consume its
//! output: an audio device pulling samples on a real-time thread, and a
//! renderer asking once per display refresh which picture to show. Audio is
//! the timing master; video follows the clock the audio callback drives.
//!
//! - Frames and queues: [`frame`], [`frame_queue`]
//! - Producer side: [`decoder`] (adapter trait), [`decode_pump`] (background thread)
//! - Consumer side: [`audio`] (pull bridge), [`video_selector`]
//! - Timing: [`clock`], [`sync_metrics`]
//! - Control: [`player`], [`config`]
//! - Hardware output: `audio_output` (feature `cpal-output`)
//!
//! ```ignore
//! let mut player = Player::new(SyncConfig::local())?;
//! player.open(decoder, "movie.mkv", &OpenOptions::default())?;
//! let output = AudioOutput::for_bridge(format, player.take_audio_bridge()?)?;
//! let mut selector = player.take_video_selector()?;
//! player.play()?;
//! output.play()?;
//! // per display refresh:
//! if let Selection::Display(frame) = selector.select() { /* upload */ }
//! ```

pub mod audio;
pub mod clock;
pub mod config;
pub mod decode_pump;
pub mod decoder;
pub mod frame;
pub mod frame_queue;
pub mod player;
pub mod sync_metrics;
pub mod synthetic;
pub mod video_selector;

#[cfg(feature = "cpal-output")]
pub mod audio_output;

pub use audio::{AudioFormat, AudioPullBridge, OutputSample};
pub use clock::{ManualTime, MonotonicTime, PlaybackClock, TimeSource};
pub use config::{BufferConfig, SyncConfig};
pub use decode_pump::{DecodePump, PumpCommand, PumpPhase, PumpStatus};
pub use decoder::{DecodeOutcome, DecoderAdapter, DecoderError, InterruptFlag, OpenOptions};
pub use frame::{AudioFrame, Frame, Timed, VideoFrame};
pub use frame_queue::{DemandSignal, FrameQueue};
pub use player::{PlaybackState, PlaybackStatus, Player, PlayerError};
pub use sync_metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use synthetic::{SyntheticConfig, SyntheticDecoder};
pub use video_selector::{Selection, VideoFrameSelector};

#[cfg(feature = "cpal-output")]
pub use audio_output::{AudioOutput, AudioOutputError};
