//! Host audio output: a cpal stream pulling PCM from the machine's
//! mutex-guarded sample buffer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use machine_spectrum::audio::AudioSink;

/// Keeps the cpal stream alive for the lifetime of the window.
pub struct AudioOutput {
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Open the default output device at the machine's sample rate, mono.
    ///
    /// # Errors
    ///
    /// Returns an error if no device is available or no supported
    /// configuration matches; the caller runs silent in that case.
    pub fn new(sink: AudioSink, sample_rate: u32) -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| String::from("no default audio output device"))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| format!("failed to query output configs: {e}"))?
            .filter(|cfg| cfg.channels() == 1)
            .find(|cfg| {
                cfg.min_sample_rate().0 <= sample_rate && sample_rate <= cfg.max_sample_rate().0
            })
            .ok_or_else(|| format!("no mono output config supports {sample_rate} Hz"))?;

        let sample_format = supported.sample_format();
        let config = supported
            .with_sample_rate(cpal::SampleRate(sample_rate))
            .config();

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        sink.fill(data);
                    },
                    |err| log::error!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| format!("failed to build i16 audio stream: {e}"))?,
            cpal::SampleFormat::F32 => {
                let mut staging = vec![0i16; 2048];
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            staging.resize(data.len(), 0);
                            sink.fill(&mut staging);
                            for (out, &s) in data.iter_mut().zip(&staging) {
                                *out = f32::from(s) / f32::from(i16::MAX);
                            }
                        },
                        |err| log::error!("audio stream error: {err}"),
                        None,
                    )
                    .map_err(|e| format!("failed to build f32 audio stream: {e}"))?
            }
            other => return Err(format!("unsupported audio sample format: {other:?}")),
        };

        stream
            .play()
            .map_err(|e| format!("failed to start audio stream: {e}"))?;

        Ok(Self { _stream: stream })
    }
}
