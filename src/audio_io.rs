// src/audio_io.rs

use crate::audio_device;
use crate::audio_engine::transport::Transport;
use crate::settings::{AppSettings, LoopConfig};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use ringbuf::HeapProducer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Opens the input and output streams at the session's rate and chunk size
/// and starts them. Input is mixed down to mono `i16` and queued for the
/// output callback, which drives the engine through `transport`.
pub fn init_and_run_streams(
    settings: &AppSettings,
    config: LoopConfig,
    audio_input_producer: HeapProducer<i16>,
    transport: Transport,
    xrun_count: Arc<AtomicUsize>,
) -> Result<(Stream, Stream)> {
    let host = audio_device::get_host(settings.host_name.as_deref())?;
    let input_device =
        audio_device::find_input_device(&host, settings.input_device.as_deref())?;
    let output_device =
        audio_device::find_output_device(&host, settings.output_device.as_deref())?;
    log::info!("Using input device: {}", input_device.name()?);
    log::info!("Using output device: {}", output_device.name()?);

    let default_input_config = input_device
        .default_input_config()
        .context("Failed to query input config")?;
    let default_output_config = output_device
        .default_output_config()
        .context("Failed to query output config")?;
    let input_format = default_input_config.sample_format();
    let output_format = default_output_config.sample_format();

    let mut input_config: StreamConfig = default_input_config.into();
    input_config.sample_rate = cpal::SampleRate(config.sample_rate);
    input_config.buffer_size = BufferSize::Fixed(config.chunk as u32);

    let mut output_config: StreamConfig = default_output_config.into();
    output_config.sample_rate = cpal::SampleRate(config.sample_rate);
    output_config.buffer_size = BufferSize::Fixed(config.chunk as u32);

    let input_stream = match input_format {
        SampleFormat::F32 => build_input_stream::<f32>(&input_device, &input_config, audio_input_producer, xrun_count.clone())?,
        SampleFormat::I16 => build_input_stream::<i16>(&input_device, &input_config, audio_input_producer, xrun_count.clone())?,
        SampleFormat::U16 => build_input_stream::<u16>(&input_device, &input_config, audio_input_producer, xrun_count.clone())?,
        format => return Err(anyhow::anyhow!("Unsupported input sample format {}", format)),
    };
    let output_stream = match output_format {
        SampleFormat::F32 => build_output_stream::<f32>(&output_device, &output_config, transport, xrun_count)?,
        SampleFormat::I16 => build_output_stream::<i16>(&output_device, &output_config, transport, xrun_count)?,
        SampleFormat::U16 => build_output_stream::<u16>(&output_device, &output_config, transport, xrun_count)?,
        format => return Err(anyhow::anyhow!("Unsupported output sample format {}", format)),
    };

    input_stream.play().context("Failed to start input stream")?;
    output_stream.play().context("Failed to start output stream")?;

    log::info!(
        "Started streams at {} Hz, {} samples per buffer",
        config.sample_rate,
        config.chunk
    );
    Ok((input_stream, output_stream))
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProducer<i16>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on input stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let channels = config.channels as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mono_sample =
                    frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / (channels as f32);
                if producer.push(i16::from_sample(mono_sample)).is_err() {
                    // output side stalled, drop sample
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut transport: Transport,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on output stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let chunk = transport.engine().config().chunk;
    let mut mono: Vec<i16> = Vec::with_capacity(chunk * 4);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            // only grows if the device hands us an unusually large buffer
            mono.resize(frames, 0);
            transport.fill(&mut mono);
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
