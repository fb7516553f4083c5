//! Device output using a dedicated thread

use super::context::ContextError;
use super::graph::Graph;
use super::sources::device_name_from_sink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Commands sent to the output thread
enum OutputCommand {
    Stop,
}

/// Output handle (Send + Sync safe)
///
/// This struct doesn't contain the cpal::Stream directly.
/// Instead, it manages a dedicated thread that owns the stream.
pub(crate) struct OutputHandle {
    /// Command sender to control the output thread
    command_tx: mpsc::Sender<OutputCommand>,

    /// Handle to the output thread
    thread_handle: Option<JoinHandle<()>>,
}

impl OutputHandle {
    /// Open the output device and start rendering `graph` into it.
    ///
    /// Returns once the stream is playing; the graph's sample rate has been
    /// set to the device rate by then.
    pub fn start(
        graph: Arc<Mutex<Graph>>,
        sink_id: Option<String>,
        sample_rate: Option<u32>,
    ) -> Result<Self, ContextError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_stream(graph, sink_id.as_deref(), sample_rate) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        log::error!("Audio output error: {}", e);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Block until stopped or the handle is gone
                match command_rx.recv() {
                    Ok(OutputCommand::Stop) => log::info!("Audio output stopping"),
                    Err(_) => log::info!("Audio output channel disconnected"),
                }
                drop(stream);
            })
            .map_err(|e| ContextError::ThreadError(e.to_string()))?;

        let mut handle = Self {
            command_tx,
            thread_handle: Some(thread_handle),
        };

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                log::info!("Audio output started at {} Hz", rate);
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.stop();
                Err(e)
            }
            Err(e) => {
                handle.stop();
                Err(ContextError::ThreadError(e.to_string()))
            }
        }
    }

    /// Stop the output stream
    pub fn stop(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Select the device, build a stream that renders `graph`, and start it
fn open_stream(
    graph: Arc<Mutex<Graph>>,
    sink_id: Option<&str>,
    sample_rate: Option<u32>,
) -> Result<(cpal::Stream, u32), ContextError> {
    let host = cpal::default_host();

    let device = match device_name_from_sink(sink_id) {
        None => host
            .default_output_device()
            .ok_or(ContextError::NoOutputDevice)?,
        Some(name) => {
            log::info!("Using output device: {}", name);
            host.output_devices()
                .map_err(|e| ContextError::ConfigError(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| ContextError::SinkNotFound(name.to_string()))?
        }
    };

    let supported = device
        .default_output_config()
        .map_err(|e| ContextError::ConfigError(e.to_string()))?;
    let sample_format = supported.sample_format();

    let mut config: StreamConfig = supported.into();
    if let Some(rate) = sample_rate {
        config.sample_rate = cpal::SampleRate(rate);
    }
    let rate = config.sample_rate.0;

    log::info!(
        "Audio output: {} Hz, {} channels",
        rate,
        config.channels
    );

    // Processors must see the device rate from the first callback on
    graph.lock().set_sample_rate(rate);

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, graph),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, graph),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, graph),
        _ => {
            return Err(ContextError::ConfigError(
                "Unsupported sample format".to_string(),
            ))
        }
    }
    .map_err(|e| ContextError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| ContextError::PlayError(e.to_string()))?;

    Ok((stream, rate))
}

/// Build output stream for given sample type
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    graph: Arc<Mutex<Graph>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;

    // Reused across callbacks; only grows when the device asks for more frames
    let mut rendered: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            rendered.resize(frames, 0.0);
            graph.lock().render_into(&mut rendered);

            // The graph is mono; duplicate it to every device channel
            for (frame, &sample) in data.chunks_mut(channels).zip(rendered.iter()) {
                let value = T::from_sample(sample.clamp(-1.0, 1.0));
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        },
        |err| {
            log::error!("Audio output stream error: {}", err);
        },
        None,
    )
}
