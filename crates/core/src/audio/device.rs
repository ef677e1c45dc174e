use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::{feed_levels, SamplerStatus};
use crate::{
    analysis::{WindowedLevels, SAMPLE_SCALE},
    config::AudioConfig,
    AudioInitError, SharedAudioChannel,
};

/// Opens the first capture-capable device, reports the outcome and keeps
/// the stream alive until a stop request arrives. The stream is created and
/// dropped on this thread because cpal streams are not `Send` everywhere.
pub(super) fn run(
    config: &AudioConfig,
    channel: SharedAudioChannel,
    ready_tx: &Sender<SamplerStatus>,
    stop_rx: &Receiver<()>,
) {
    match open_stream(config, channel) {
        Ok((stream, device)) => {
            let _ = ready_tx.send(SamplerStatus::Ready { device });
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(reason) => {
            let _ = ready_tx.send(SamplerStatus::Failed(reason));
        }
    }
}

fn open_stream(
    config: &AudioConfig,
    channel: SharedAudioChannel,
) -> Result<(cpal::Stream, String), AudioInitError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| AudioInitError::Stream(err.to_string()))?;

    let (device, default_config) = devices
        .filter_map(|device| {
            device
                .default_input_config()
                .ok()
                .map(|supported| (device, supported))
        })
        .next()
        .ok_or(AudioInitError::NoInputDevice)?;

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    // Prefer the configured rate and channel count when the device offers
    // them; otherwise run at whatever the device defaults to.
    let wanted_rate = cpal::SampleRate(config.sample_rate);
    let supported = device
        .supported_input_configs()
        .ok()
        .and_then(|mut ranges| {
            ranges.find(|range| {
                range.channels() == config.channels
                    && range.min_sample_rate() <= wanted_rate
                    && range.max_sample_rate() >= wanted_rate
            })
        })
        .map(|range| range.with_sample_rate(wanted_rate))
        .unwrap_or(default_config);

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let channels = usize::from(stream_config.channels);
    tracing::info!(
        device = %name,
        sample_rate = stream_config.sample_rate.0,
        channels,
        format = ?sample_format,
        "opening audio input"
    );

    let mut levels = WindowedLevels::new(config.window, channels);
    let mut scratch: Vec<f32> = Vec::new();

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|sample| f32::from(*sample)));
                feed_levels(&mut levels, &scratch, &channel);
            },
            report_stream_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|sample| sample * SAMPLE_SCALE));
                feed_levels(&mut levels, &scratch, &channel);
            },
            report_stream_error,
            None,
        ),
        other => return Err(AudioInitError::UnsupportedFormat(format!("{other:?}"))),
    }
    .map_err(|err| AudioInitError::Stream(err.to_string()))?;

    stream
        .play()
        .map_err(|err| AudioInitError::Stream(err.to_string()))?;

    Ok((stream, name))
}

fn report_stream_error(err: cpal::StreamError) {
    tracing::error!(%err, "audio input stream error");
}
