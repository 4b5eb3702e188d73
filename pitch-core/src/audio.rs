//! # Audio Capture Module
//!
//! Real-time audio capture using CPAL (Cross-Platform Audio Library).
//! Opens the default input device and streams hop-sized chunks of mono
//! samples into the detection worker's channel.
//!
//! ## Features
//! - Automatic audio device selection
//! - F32 input preferred, I16 accepted with normalization
//! - Hop-sized chunk delivery with non-blocking backpressure
//! - Error handling for missing devices and formats

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::Sender;

use crate::frame;

/// Accumulates device callback data and forwards hop-sized chunks.
///
/// The channel send is non-blocking: when the worker falls behind and
/// the channel is full, the chunk is dropped rather than stalling the
/// device callback.
struct ChunkAssembler {
    pending: Vec<f32>,
    hop_size: usize,
    sender: Sender<Vec<f32>>,
}

impl ChunkAssembler {
    fn new(hop_size: usize, sender: Sender<Vec<f32>>) -> Self {
        Self {
            pending: Vec::with_capacity(hop_size * 2),
            hop_size,
            sender,
        }
    }

    fn feed(&mut self, samples: &[f32]) {
        // A zero-length callback is "no data this iteration", not an error.
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.hop_size {
            let chunk = self.pending[..self.hop_size].to_vec();
            let _ = self.sender.try_send(chunk);
            self.pending.drain(..self.hop_size);
        }
    }
}

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Picks a mono input configuration near the requested sample rate,
///    preferring 32-bit float and falling back to signed 16-bit
/// 3. Streams hop-sized chunks of normalized samples to `sender`
///
/// The returned stream handle owns the device for as long as it lives;
/// the caller (the capture worker) must keep it alive for the session
/// and drop it on shutdown.
///
/// # Arguments
/// * `sender` - Channel for hop-sized sample chunks
/// * `target_rate` - Desired sample rate in Hz (44 100 in practice)
/// * `hop_size` - Samples per delivered chunk
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Live stream handle and actual rate
/// * `Err(e)` - No device, no usable format, or stream setup failure
pub fn start_capture(
    sender: Sender<Vec<f32>>,
    target_rate: u32,
    hop_size: usize,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    eprintln!("[AUDIO] Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(&configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable mono input format found"))?;

    let clamped_rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(clamped_rate));

    let sample_rate = config.sample_rate().0;
    let sample_format = config.sample_format();
    let config: cpal::StreamConfig = config.into();

    eprintln!("[AUDIO] Selected sample rate: {sample_rate} Hz ({sample_format:?})");

    let err_fn = |err| eprintln!("[AUDIO] An error occurred on the audio stream: {err}");

    let stream = match sample_format {
        SampleFormat::F32 => {
            let mut assembler = ChunkAssembler::new(hop_size, sender);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| assembler.feed(data),
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let mut assembler = ChunkAssembler::new(hop_size, sender);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    assembler.feed(&frame::samples_from_i16(data))
                },
                err_fn,
                None,
            )?
        }
        other => return Err(anyhow!("Unsupported input sample format: {other:?}")),
    };

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Finds the best supported mono configuration for the target rate.
///
/// 32-bit float configurations are preferred; signed 16-bit is the
/// fallback. Within a format, the configuration whose rate range lies
/// closest to the target wins.
fn find_supported_config(
    configs: &[SupportedStreamConfigRange],
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    for format in [SampleFormat::F32, SampleFormat::I16] {
        let best = configs
            .iter()
            .filter(|c| c.channels() == 1 && c.sample_format() == format)
            .min_by_key(|c| {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            })
            .cloned();
        if best.is_some() {
            return best;
        }
    }
    None
}
