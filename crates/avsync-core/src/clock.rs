//! Audio-master playback clock.
//!
//! The clock is moved forward only by the audio callback reporting which
//! presentation time it just handed to the hardware. Between reports the
//! position is extrapolated from wall-clock time, so the render thread sees
//! a smoothly advancing value even though audio updates arrive in bursts of
//! one hardware buffer.
//!
//! ```text
//! position = audio_pts + (now - anchor)   while running
//! position = frozen value                 while paused
//! ```
//!
//! The anchor may lie slightly in the future when the reported audio starts
//! partway into a hardware buffer; the position holds at `audio_pts` until
//! then.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of wall-clock time for the playback clock.
pub trait TimeSource: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
}

/// [`TimeSource`] backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    /// Creates a time source whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A [`TimeSource`] that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the clock.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now_ns: Arc<AtomicU64>,
}

impl ManualTime {
    /// Creates a manual time source at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        self.now_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Sets the absolute time.
    pub fn set(&self, now: Duration) {
        self.now_ns.store(now.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    /// Last audio presentation time reported (or the frozen position while paused)
    audio_pts: Duration,
    /// Wall time at which `audio_pts` becomes current; `None` while not extrapolating
    anchor: Option<Duration>,
    /// True between resume() and pause()
    running: bool,
    /// True once there is something to extrapolate from
    started: bool,
}

/// Audio-master playback clock.
///
/// All methods take a short `parking_lot` lock around a handful of loads and
/// one addition, so reads from the render thread and updates from the audio
/// thread never hold each other up for longer than that.
pub struct PlaybackClock {
    state: Mutex<ClockState>,
    time: Arc<dyn TimeSource>,
}

impl PlaybackClock {
    /// Creates a paused clock at position zero.
    ///
    /// The clock does not extrapolate until audio has been consumed.
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                audio_pts: Duration::ZERO,
                anchor: None,
                running: false,
                started: false,
            }),
            time,
        }
    }

    /// Creates a clock that advances from wall time alone once resumed.
    ///
    /// Used for sources without an audio stream, where there is no audio
    /// consumption to drive the clock.
    pub fn free_running(time: Arc<dyn TimeSource>) -> Self {
        let clock = Self::new(time);
        clock.state.lock().started = true;
        clock
    }

    /// Current wall time from the clock's time source.
    pub fn now(&self) -> Duration {
        self.time.now()
    }

    /// Returns the extrapolated playback position.
    pub fn current_position(&self) -> Duration {
        let state = *self.state.lock();
        Self::position_at(&state, self.time.now())
    }

    /// Records that audio with presentation time `pts` becomes current at
    /// wall time `at`. Called only from the audio callback.
    ///
    /// Once started, a paused clock keeps its frozen position: a pull that
    /// was already in flight when `pause()` ran cannot move it.
    pub fn on_audio_consumed(&self, pts: Duration, at: Duration) {
        let mut state = self.state.lock();
        if state.started && !state.running {
            return;
        }
        state.audio_pts = pts;
        state.started = true;
        state.anchor = if state.running { Some(at) } else { None };
    }

    /// Freezes the position. Idempotent.
    pub fn pause(&self) {
        let now = self.time.now();
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.audio_pts = Self::position_at(&state, now);
        state.anchor = None;
        state.running = false;
    }

    /// Resumes extrapolation from the frozen position. Idempotent.
    pub fn resume(&self) {
        let now = self.time.now();
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        state.running = true;
        if state.started {
            state.anchor = Some(now);
        }
    }

    /// Returns true between `resume()` and `pause()`.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns true once audio has been consumed (or for a free-running clock).
    pub fn has_started(&self) -> bool {
        self.state.lock().started
    }

    fn position_at(state: &ClockState, now: Duration) -> Duration {
        match state.anchor {
            Some(anchor) if state.running => state.audio_pts + now.saturating_sub(anchor),
            _ => state.audio_pts,
        }
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock() -> (PlaybackClock, ManualTime) {
        let time = ManualTime::new();
        (PlaybackClock::new(Arc::new(time.clone())), time)
    }

    #[test]
    fn test_position_starts_at_zero_without_audio() {
        let (clock, time) = manual_clock();
        clock.resume();
        time.advance(Duration::from_millis(500));
        // No audio consumed yet: nothing to extrapolate from
        assert_eq!(clock.current_position(), Duration::ZERO);
    }

    #[test]
    fn test_position_equals_consumed_pts() {
        let (clock, time) = manual_clock();
        clock.resume();
        for i in 0..10u64 {
            let pts = Duration::from_millis(i * 20);
            clock.on_audio_consumed(pts, time.now());
            assert_eq!(clock.current_position(), pts);
            time.advance(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_position_increases_while_playing() {
        let (clock, time) = manual_clock();
        clock.resume();
        clock.on_audio_consumed(Duration::from_millis(100), time.now());

        let mut last = clock.current_position();
        for _ in 0..5 {
            time.advance(Duration::from_millis(3));
            let pos = clock.current_position();
            assert!(pos > last, "{pos:?} should exceed {last:?}");
            last = pos;
        }
        assert_eq!(last, Duration::from_millis(115));
    }

    #[test]
    fn test_pause_resume_accrues_no_drift() {
        let (clock, time) = manual_clock();
        clock.resume();
        clock.on_audio_consumed(Duration::from_secs(2), time.now());
        time.advance(Duration::from_millis(40));

        let before_pause = clock.current_position();
        clock.pause();
        time.advance(Duration::from_secs(5));
        assert_eq!(clock.current_position(), before_pause);

        clock.resume();
        assert_eq!(clock.current_position(), before_pause);

        time.advance(Duration::from_millis(10));
        assert_eq!(
            clock.current_position(),
            before_pause + Duration::from_millis(10)
        );
    }

    #[test]
    fn test_in_flight_consumption_cannot_move_frozen_position() {
        let (clock, time) = manual_clock();
        clock.resume();
        clock.on_audio_consumed(Duration::from_secs(2), time.now());
        time.advance(Duration::from_millis(40));

        // The pull read `now` before the pause and reports after it
        let at = time.now();
        clock.pause();
        let frozen = clock.current_position();
        assert_eq!(frozen, Duration::from_millis(2040));
        clock.on_audio_consumed(Duration::from_millis(2000), at);
        clock.on_audio_consumed(Duration::from_millis(2020), at);
        assert_eq!(clock.current_position(), frozen);

        clock.resume();
        assert_eq!(clock.current_position(), frozen);
        time.advance(Duration::from_millis(5));
        assert_eq!(clock.current_position(), frozen + Duration::from_millis(5));
    }

    #[test]
    fn test_consumption_while_paused_does_not_extrapolate() {
        let (clock, time) = manual_clock();
        clock.on_audio_consumed(Duration::from_millis(80), time.now());
        time.advance(Duration::from_millis(50));
        assert_eq!(clock.current_position(), Duration::from_millis(80));
    }

    #[test]
    fn test_free_running_clock_advances_from_wall_time() {
        let time = ManualTime::new();
        let clock = PlaybackClock::free_running(Arc::new(time.clone()));
        clock.resume();
        time.advance(Duration::from_millis(250));
        assert_eq!(clock.current_position(), Duration::from_millis(250));
    }

    #[test]
    fn test_monotonic_time_advances() {
        let time = MonotonicTime::new();
        let a = time.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(time.now() > a);
    }
}
