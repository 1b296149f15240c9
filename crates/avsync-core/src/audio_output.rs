//! Hardware audio output via cpal.
//!
//! [`AudioOutput`] opens the default output device and calls a fill closure
//! from cpal's real-time callback. The closure always works in `f32`; the
//! stream is built for the device's native sample format and converts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, I24};

use crate::audio::{AudioFormat, AudioPullBridge};

/// Scratch space preallocated for non-f32 devices, in samples.
const SCRATCH_SAMPLES: usize = 16384;

/// Errors opening or driving the audio device.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioOutputError {
    /// No default output device
    NoDevice,
    /// The device configuration could not be queried
    Config(String),
    /// The device's sample format is not handled
    UnsupportedFormat(String),
    /// Building or starting the stream failed
    Stream(String),
}

impl std::fmt::Display for AudioOutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioOutputError::NoDevice => write!(f, "No audio output device available"),
            AudioOutputError::Config(msg) => write!(f, "Failed to get output config: {msg}"),
            AudioOutputError::UnsupportedFormat(msg) => {
                write!(f, "Unsupported output sample format: {msg}")
            }
            AudioOutputError::Stream(msg) => write!(f, "Audio stream error: {msg}"),
        }
    }
}

impl std::error::Error for AudioOutputError {}

/// A running cpal output stream.
///
/// The stream starts paused. Dropping the output stops the callback.
pub struct AudioOutput {
    stream: cpal::Stream,
    format: AudioFormat,
    playing: Arc<AtomicBool>,
}

impl AudioOutput {
    /// Opens the default device at `format` and drives `fill` from its
    /// callback.
    ///
    /// `fill(buffer, num_frames, num_channels)` must write every sample of
    /// `buffer`. If the device cannot run at the requested rate, the device
    /// rate is used instead; check [`format`](Self::format).
    pub fn new<F>(format: AudioFormat, fill: F) -> Result<Self, AudioOutputError>
    where
        F: FnMut(&mut [f32], usize, usize) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutputError::NoDevice)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioOutputError::Config(e.to_string()))?;
        let sample_format = supported_config.sample_format();
        let device_sample_rate = supported_config.sample_rate();

        let mut actual = format;
        if !is_config_supported(&device, actual.channels, sample_format, actual.sample_rate) {
            tracing::warn!(
                "Requested {}Hz/{}ch not supported for {:?}, falling back to device {}Hz/{}ch",
                actual.sample_rate,
                actual.channels,
                sample_format,
                device_sample_rate,
                supported_config.channels()
            );
            actual = AudioFormat::new(device_sample_rate, supported_config.channels());
        }

        let stream_config = cpal::StreamConfig {
            channels: actual.channels,
            sample_rate: actual.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let playing = Arc::new(AtomicBool::new(false));
        let stream = build_stream(
            &device,
            &stream_config,
            sample_format,
            fill,
            Arc::clone(&playing),
        )?;

        tracing::info!(
            "Audio output initialized (cpal, {}Hz, {}ch, {:?})",
            actual.sample_rate,
            actual.channels,
            sample_format
        );

        Ok(Self {
            stream,
            format: actual,
            playing,
        })
    }

    /// Opens the default device and feeds it from `bridge`.
    pub fn for_bridge(
        format: AudioFormat,
        mut bridge: AudioPullBridge,
    ) -> Result<Self, AudioOutputError> {
        Self::new(format, move |buffer, frames, channels| {
            bridge.fill(buffer, frames, channels);
        })
    }

    /// The format the stream actually runs at.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Starts the hardware callback.
    pub fn play(&self) -> Result<(), AudioOutputError> {
        self.playing.store(true, Ordering::Release);
        self.stream
            .play()
            .map_err(|e| AudioOutputError::Stream(e.to_string()))
    }

    /// Pauses the hardware callback.
    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
        // pause() is not supported everywhere; the playing flag silences the
        // callback regardless
        let _ = self.stream.pause();
    }

    /// Returns true between `play` and `pause`.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

fn build_stream<F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    fill: F,
    playing: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioOutputError>
where
    F: FnMut(&mut [f32], usize, usize) + Send + 'static,
{
    match sample_format {
        SampleFormat::F32 => build_stream_f32(device, config, fill, playing),
        SampleFormat::I8 => build_stream_converted::<i8, F>(device, config, fill, playing),
        SampleFormat::I16 => build_stream_converted::<i16, F>(device, config, fill, playing),
        SampleFormat::I24 => build_stream_converted::<I24, F>(device, config, fill, playing),
        SampleFormat::I32 => build_stream_converted::<i32, F>(device, config, fill, playing),
        SampleFormat::U8 => build_stream_converted::<u8, F>(device, config, fill, playing),
        SampleFormat::U16 => build_stream_converted::<u16, F>(device, config, fill, playing),
        SampleFormat::U32 => build_stream_converted::<u32, F>(device, config, fill, playing),
        SampleFormat::F64 => build_stream_converted::<f64, F>(device, config, fill, playing),
        other => Err(AudioOutputError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_stream_f32<F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut fill: F,
    playing: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioOutputError>
where
    F: FnMut(&mut [f32], usize, usize) + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !playing.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }
                fill(data, data.len() / channels, channels);
            },
            |err| tracing::error!("cpal audio error: {err}"),
            None,
        )
        .map_err(|e| AudioOutputError::Stream(e.to_string()))?;

    stream.pause().ok(); // Start paused
    Ok(stream)
}

fn build_stream_converted<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut fill: F,
    playing: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioOutputError>
where
    T: SizedSample + FromSample<f32>,
    F: FnMut(&mut [f32], usize, usize) + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let mut scratch = vec![0.0f32; SCRATCH_SAMPLES];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let zero = T::from_sample(0.0f32);
                if !playing.load(Ordering::Acquire) {
                    data.fill(zero);
                    return;
                }
                // Devices rarely ask for more than the preallocated scratch;
                // grow once if one does
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let buffer = &mut scratch[..data.len()];
                fill(buffer, data.len() / channels, channels);
                for (out, &s) in data.iter_mut().zip(buffer.iter()) {
                    *out = T::from_sample(s);
                }
            },
            |err| tracing::error!("cpal audio error: {err}"),
            None,
        )
        .map_err(|e| AudioOutputError::Stream(e.to_string()))?;

    stream.pause().ok(); // Start paused
    Ok(stream)
}

fn is_config_supported(
    device: &cpal::Device,
    channels: u16,
    sample_format: SampleFormat,
    sample_rate: u32,
) -> bool {
    let Ok(configs) = device.supported_output_configs() else {
        return false;
    };

    configs.into_iter().any(|cfg| {
        cfg.channels() == channels
            && cfg.sample_format() == sample_format
            && sample_rate >= cfg.min_sample_rate()
            && sample_rate <= cfg.max_sample_rate()
    })
}
