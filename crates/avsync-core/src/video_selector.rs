//! Picks the video frame due for display against the audio clock.
//!
//! The render thread calls [`VideoFrameSelector::select`] once per render
//! opportunity (typically every display refresh). The selector never blocks
//! and never waits for a frame: if nothing is due it says so and the caller
//! keeps showing what it already has.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::PlaybackClock;
use crate::config::SyncConfig;
use crate::frame::VideoFrame;
use crate::frame_queue::FrameQueue;
use crate::sync_metrics::SyncMetrics;

/// Outcome of one selection call.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Display this frame now
    Display(VideoFrame),
    /// Nothing is due yet; keep the previous frame on screen
    Hold,
    /// The stream is over (or the session closed) and nothing is left to show
    Ended,
}

impl Selection {
    /// Returns the frame to display, if any.
    pub fn into_frame(self) -> Option<VideoFrame> {
        match self {
            Selection::Display(frame) => Some(frame),
            Selection::Hold | Selection::Ended => None,
        }
    }

    /// Returns true for [`Selection::Ended`].
    pub fn is_ended(&self) -> bool {
        matches!(self, Selection::Ended)
    }
}

/// Consumer side of the video queue, handed to the render thread.
pub struct VideoFrameSelector {
    queue: Arc<FrameQueue<VideoFrame>>,
    clock: Arc<PlaybackClock>,
    metrics: SyncMetrics,
    tolerance_early: Duration,
    tolerance_late: Duration,
    max_drops: u32,
}

impl VideoFrameSelector {
    /// Creates a selector for `queue` using the tolerances in `config`.
    pub fn new(
        queue: Arc<FrameQueue<VideoFrame>>,
        clock: Arc<PlaybackClock>,
        metrics: SyncMetrics,
        config: &SyncConfig,
    ) -> Self {
        Self {
            queue,
            clock,
            metrics,
            tolerance_early: config.tolerance_early,
            tolerance_late: config.tolerance_late,
            max_drops: config.max_drops_per_call.max(1),
        }
    }

    /// Returns the frame due at the current clock position.
    ///
    /// Frames more than `tolerance_late` behind the clock are discarded, at
    /// most `max_drops_per_call` of them per call. A front frame more than
    /// `tolerance_early` ahead of the clock stays queued.
    pub fn select(&mut self) -> Selection {
        let mut drops = 0u32;

        loop {
            if self.queue.is_closed() {
                return Selection::Ended;
            }
            let Some(pts) = self.queue.peek_pts() else {
                return if self.queue.is_eos() {
                    Selection::Ended
                } else {
                    Selection::Hold
                };
            };

            let position = self.clock.current_position();

            if pts > position + self.tolerance_early {
                self.metrics.record_hold();
                return Selection::Hold;
            }

            if pts + self.tolerance_late < position {
                if drops >= self.max_drops {
                    tracing::debug!(
                        "VideoFrameSelector: drop bound {} reached at clock {:?}",
                        self.max_drops,
                        position
                    );
                    self.metrics.record_hold();
                    return Selection::Hold;
                }
                if let Some(stale) = self.queue.pop() {
                    tracing::trace!(
                        "VideoFrameSelector: dropping stale frame pts={:?} (clock {:?})",
                        stale.pts,
                        position
                    );
                    self.metrics.record_drop();
                    drops += 1;
                }
                continue;
            }

            // Only this consumer pops, so the peeked frame is still at the front
            let Some(frame) = self.queue.pop() else {
                return Selection::Hold;
            };
            self.metrics.record_frame(frame.pts, position);
            if drops > 0 {
                tracing::debug!(
                    "VideoFrameSelector: dropped {} late frame(s) before pts={:?}",
                    drops,
                    frame.pts
                );
            }
            return Selection::Display(frame);
        }
    }

    /// Returns the number of frames waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns the current clock position.
    pub fn position(&self) -> Duration {
        self.clock.current_position()
    }
}
