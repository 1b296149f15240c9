//! avsync Demo Application
//!
//! Plays a synthetic tone-and-bars source through the sync core without a
//! window: the "renderer" is a 60Hz loop that logs what it would draw, and
//! audio goes either to the system device (`--features audio`) or to a
//! simulated device that pulls one buffer per period.
//!
//! Usage: `avsync-demo [seconds]`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avsync_core::{
    AudioFormat, OpenOptions, Player, Selection, SyncConfig, SyntheticConfig, SyntheticDecoder,
};

/// Display refresh interval of the simulated renderer.
const RENDER_INTERVAL: Duration = Duration::from_micros(16_667);

/// Sample frames requested per simulated hardware callback.
#[cfg(not(feature = "audio"))]
const HARDWARE_BUFFER_FRAMES: usize = 1024;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("avsync_core=info".parse()?)
                .add_directive("avsync_demo=info".parse()?),
        )
        .init();

    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };

    let format = AudioFormat::new(48000, 2);
    let source = SyntheticConfig {
        duration: Duration::from_secs(seconds),
        audio: Some(format),
        ..SyntheticConfig::default()
    };

    let mut player = Player::new(SyncConfig::local())?;
    player.open(
        SyntheticDecoder::new(source),
        "synthetic:demo",
        &OpenOptions::default(),
    )?;
    if let Some((w, h)) = player.video_dimensions() {
        tracing::info!("Opened synthetic source: {}x{}, {}s", w, h, seconds);
    }

    let bridge = player.take_audio_bridge()?;
    let mut selector = player.take_video_selector()?;
    let audio_done = Arc::new(AtomicBool::new(false));

    #[cfg(feature = "audio")]
    let output = {
        let output = avsync_core::AudioOutput::for_bridge(format, bridge)?;
        if output.format() != format {
            tracing::warn!(
                "Device runs at {:?}; the tone will play at the wrong pitch",
                output.format()
            );
        }
        output
    };

    #[cfg(not(feature = "audio"))]
    let audio_thread = spawn_simulated_device(bridge, format, Arc::clone(&audio_done))?;

    player.play()?;
    #[cfg(feature = "audio")]
    output.play()?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut shown = 0u64;

    loop {
        match selector.select() {
            Selection::Display(frame) => {
                shown += 1;
                tracing::trace!(
                    "render frame pts={:?} at clock {:?}",
                    frame.pts,
                    selector.position()
                );
            }
            Selection::Hold => {}
            Selection::Ended => {
                tracing::info!("Video ended after {} frames", shown);
                break;
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let status = player.status();
            tracing::info!(
                "position={:?} audio_buf={:?} video_buf={:?} | {}",
                status.position,
                status.audio_buffered,
                status.video_buffered,
                player.metrics_snapshot()
            );
            last_report = Instant::now();
        }

        // Safety net against a stalled source
        if started.elapsed() > Duration::from_secs(seconds + 5) {
            tracing::warn!("Playback did not finish in time, giving up");
            break;
        }

        thread::sleep(RENDER_INTERVAL);
    }

    let status = player.status();
    let snapshot = player.metrics_snapshot();
    audio_done.store(true, Ordering::Release);

    #[cfg(feature = "audio")]
    output.pause();
    #[cfg(not(feature = "audio"))]
    let _ = audio_thread
        .join()
        .map_err(|_| tracing::error!("Simulated audio device thread panicked"));

    player.close();

    println!("{snapshot}");
    println!(
        "finished={} displayed={} dropped={} underruns={} passed={}",
        status.finished,
        snapshot.frames_displayed,
        snapshot.frames_dropped,
        snapshot.underrun_count,
        snapshot.passed_sync_test()
    );
    if let Some(err) = status.decode_error {
        println!("decode error: {err}");
    }
    Ok(())
}

/// Pulls one hardware buffer per period, the way a sound card would.
#[cfg(not(feature = "audio"))]
fn spawn_simulated_device(
    mut bridge: avsync_core::AudioPullBridge,
    format: AudioFormat,
    done: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let channels = format.channels as usize;
    let period = Duration::from_secs_f64(HARDWARE_BUFFER_FRAMES as f64 / format.sample_rate as f64);

    thread::Builder::new()
        .name("avsync-demo-audio".into())
        .spawn(move || {
            let mut buffer = vec![0i16; HARDWARE_BUFFER_FRAMES * channels];
            let mut next = Instant::now();
            while !done.load(Ordering::Acquire) && !bridge.is_finished() {
                bridge.fill(&mut buffer, HARDWARE_BUFFER_FRAMES, channels);
                next += period;
                thread::sleep(next.saturating_duration_since(Instant::now()));
            }
            tracing::debug!("Simulated audio device stopped");
        })
}
