//! cpal-backed [AudioOutput], spawning a dedicated thread that owns the
//! (non-`Send`) cpal stream and pulls samples from the shared
//! [SoundChip] under a mutex.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::host::{AudioOutput, HostError};
use crate::synth::SoundChip;

pub struct CpalOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}

// cpal::Stream is not Send on some platforms; the thread that owns it
// never shares it further than this struct, and callers only move the
// struct itself across threads, never the stream.
unsafe impl Send for CpalOutput {}

impl CpalOutput {
    /// Opens the host's default output device and starts streaming
    /// samples pulled from `chip`, at the device's native sample rate.
    pub fn start(chip: Arc<Mutex<SoundChip>>) -> Result<Self, HostError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(HostError::NoDevice)?;
        let default_config = device
            .default_output_config()
            .map_err(|e| HostError::ConfigQuery(e.to_string()))?;

        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels().max(1) as usize;

        {
            let mut locked = chip.lock().expect("sound chip mutex poisoned");
            locked.set_sample_rate(sample_rate);
        }

        let stream_config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut locked = match chip.lock() {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    let frames = data.len() / channels;
                    for frame in 0..frames {
                        let sample = locked.generate_sample();
                        for c in 0..channels {
                            data[frame * channels + c] = sample;
                        }
                    }
                },
                move |err| {
                    log::error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| HostError::StreamBuild(e.to_string()))?;

        stream.play().map_err(|e| HostError::StreamStart(e.to_string()))?;

        Ok(CpalOutput { stream, sample_rate })
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pause(&mut self) -> Result<(), HostError> {
        self.stream.pause().map_err(|e| HostError::StreamStart(e.to_string()))
    }

    fn resume(&mut self) -> Result<(), HostError> {
        self.stream.play().map_err(|e| HostError::StreamStart(e.to_string()))
    }
}
