//! Frame queues between the decode thread and the consumers.
//!
//! Each [`FrameQueue`] has exactly one producer (the decode thread) and one
//! consumer (the audio callback or the render thread). Pushing and popping
//! never block: the lock guards only a `VecDeque` operation and a duration
//! update. Backpressure is applied by the decode thread parking on a shared
//! [`DemandSignal`] which consumers raise when they drain a queue below its
//! low watermark.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::BufferConfig;
use crate::frame::Timed;

/// Initial slot count. Queues grow past this only if the watermarks are
/// large relative to frame durations.
const INITIAL_CAPACITY: usize = 64;

/// Wake-up channel from consumers to the decode thread.
///
/// The waiter takes a ticket with [`arm`](Self::arm) *before* checking the
/// queue levels and then blocks in [`wait`](Self::wait) until the generation
/// moves past the ticket. A notification that lands between the check and
/// the wait bumps the generation first, so it is never lost.
pub struct DemandSignal {
    generation: AtomicU64,
    armed: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl DemandSignal {
    /// Creates an unarmed signal.
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Marks the waiter as interested and returns its ticket.
    pub fn arm(&self) -> u64 {
        self.armed.store(true, Ordering::SeqCst);
        self.generation.load(Ordering::SeqCst)
    }

    /// Clears interest without waiting.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Returns true while the waiter is armed.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Wakes the waiter.
    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Blocks until a notification newer than `ticket` arrives.
    pub fn wait(&self, ticket: u64) {
        let mut guard = self.lock.lock();
        while self.generation.load(Ordering::SeqCst) == ticket {
            self.cond.wait(&mut guard);
        }
        drop(guard);
        self.disarm();
    }

    /// Like [`wait`](Self::wait) with a timeout. Returns true if notified.
    pub fn wait_for(&self, ticket: u64, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        let mut notified = self.generation.load(Ordering::SeqCst) != ticket;
        if !notified {
            self.cond.wait_for(&mut guard, timeout);
            notified = self.generation.load(Ordering::SeqCst) != ticket;
        }
        drop(guard);
        self.disarm();
        notified
    }
}

impl Default for DemandSignal {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueInner<T> {
    frames: VecDeque<T>,
    buffered: Duration,
    last_pts: Option<Duration>,
}

/// A FIFO of decoded frames with a running total of buffered duration.
pub struct FrameQueue<T: Timed> {
    inner: Mutex<QueueInner<T>>,
    config: BufferConfig,
    demand: Arc<DemandSignal>,
    /// Flag indicating the producer will push no more frames
    eos: AtomicBool,
    /// Flag indicating the session was closed; pushes are rejected
    closed: AtomicBool,
}

impl<T: Timed> FrameQueue<T> {
    /// Creates an empty queue reporting demand to `demand`.
    pub fn new(config: BufferConfig, demand: Arc<DemandSignal>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(INITIAL_CAPACITY),
                buffered: Duration::ZERO,
                last_pts: None,
            }),
            config,
            demand,
            eos: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends a frame. Never blocks.
    ///
    /// Returns false if the queue is closed and the frame was discarded.
    pub fn push(&self, frame: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut inner = self.inner.lock();
        // Re-check under the lock so close() cannot race a late push
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let pts = frame.pts();
        if let Some(last) = inner.last_pts {
            if pts < last {
                tracing::warn!(
                    "FrameQueue: pts went backwards ({:?} after {:?}), keeping decoder order",
                    pts,
                    last
                );
            }
        }
        inner.last_pts = Some(pts);
        inner.buffered += frame.duration();
        inner.frames.push_back(frame);
        true
    }

    /// Takes the front frame, or `None` if the queue is empty. Never blocks.
    pub fn pop(&self) -> Option<T> {
        let (frame, before, after) = {
            let mut inner = self.inner.lock();
            let frame = inner.frames.pop_front()?;
            let before = inner.buffered;
            inner.buffered = before.saturating_sub(frame.duration());
            // Guard against rounding drift once the queue is empty
            if inner.frames.is_empty() {
                inner.buffered = Duration::ZERO;
            }
            (frame, before, inner.buffered)
        };
        if self.demand.is_armed() && self.crossed_demand_edge(before, after) {
            self.demand.notify();
        }
        Some(frame)
    }

    /// Puts a frame back at the front of the queue.
    ///
    /// Only the consumer calls this, to return the unconsumed remainder of
    /// a frame it just popped.
    pub fn restore_front(&self, frame: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.lock();
        inner.buffered += frame.duration();
        inner.frames.push_front(frame);
    }

    /// Returns the presentation timestamp of the front frame.
    pub fn peek_pts(&self) -> Option<Duration> {
        self.inner.lock().frames.front().map(|f| f.pts())
    }

    /// Sum of the durations of all queued frames.
    pub fn buffered_duration(&self) -> Duration {
        self.inner.lock().buffered
    }

    /// Returns the number of frames currently in the queue.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once the high watermark is reached.
    pub fn is_full(&self) -> bool {
        self.buffered_duration() >= self.config.max_buffered
    }

    /// Returns true while below the low watermark.
    pub fn is_starved(&self) -> bool {
        self.buffered_duration() < self.config.min_buffered
    }

    /// Returns true when the queue holds far more than its high watermark.
    pub fn is_overfilled(&self) -> bool {
        self.buffered_duration() > self.config.overfill_limit()
    }

    /// Watermarks this queue was created with.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Marks that the producer has delivered its last frame.
    pub fn set_eos(&self) {
        self.eos.store(true, Ordering::Release);
    }

    /// Returns true if end-of-stream has been reached.
    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    /// Returns true when end-of-stream is set and every frame was consumed.
    pub fn is_drained(&self) -> bool {
        self.is_eos() && self.is_empty()
    }

    /// Closes the queue: discards all frames and rejects later pushes.
    ///
    /// Returns the number of frames discarded.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let dropped = {
            let mut inner = self.inner.lock();
            let count = inner.frames.len();
            inner.frames.clear();
            inner.buffered = Duration::ZERO;
            count
        };
        tracing::debug!("FrameQueue::close: dropped {} frames", dropped);
        dropped
    }

    /// Returns true if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Draining below the low watermark, or back under the overfill limit,
    /// is what the parked decode thread waits for.
    fn crossed_demand_edge(&self, before: Duration, after: Duration) -> bool {
        let low = self.config.min_buffered;
        let overfill = self.config.overfill_limit();
        (before >= low && after < low) || (before > overfill && after <= overfill)
    }
}
