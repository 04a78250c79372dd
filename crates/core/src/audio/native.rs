//! System audio through cpal: microphone capture and a realtime output driver.
//!
//! cpal streams are not `Send` on every host, so each stream is built and
//! owned by a dedicated thread that holds it until told to stop.

use std::{
    collections::VecDeque,
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SizedSample,
};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::{Result, SpectraError};

use super::{
    resample::StreamResampler,
    software::{CaptureBackend, CaptureInput, SoftwareGraph},
};

/// Seconds of device audio buffered between the input callback and the graph.
const CAPTURE_BUFFER_SECONDS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
}

/// Names of the input devices on the default host.
pub fn list_input_devices() -> Result<Vec<InputDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| InputDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect())
}

/// Sample rate the default output device runs at.
pub fn default_output_rate() -> Result<u32> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| SpectraError::UnsupportedEnvironment("no audio output device found".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?;
    Ok(config.sample_rate().0)
}

/// Capture backend reading from a system input device.
#[derive(Debug, Clone, Default)]
pub struct CpalCapture {
    device: Option<String>,
}

impl CpalCapture {
    /// Captures from the host's default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures from the input device with this exact name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device: Some(name.into()),
        }
    }
}

impl CaptureBackend for CpalCapture {
    fn open(&self, sample_rate: u32) -> BoxFuture<'_, Result<Box<dyn CaptureInput>>> {
        let device = self.device.clone();
        Box::pin(async move {
            let (ready_tx, ready_rx) = oneshot::channel();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let ring = Arc::new(Mutex::new(VecDeque::new()));
            let shared = ring.clone();

            let worker = thread::Builder::new()
                .name("spectra-capture".into())
                .spawn(move || match build_input_stream(device.as_deref(), shared) {
                    Ok((stream, rate)) => {
                        if ready_tx.send(Ok(rate)).is_ok() {
                            // Returns once the input is dropped.
                            let _ = stop_rx.recv();
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })?;

            let device_rate = ready_rx.await.map_err(|_| {
                SpectraError::UnsupportedEnvironment("capture thread exited early".into())
            })??;
            tracing::info!(device_rate, graph_rate = sample_rate, "microphone capture started");

            let capacity = sample_rate as usize * CAPTURE_BUFFER_SECONDS;
            let input: Box<dyn CaptureInput> = Box::new(CpalInput {
                ring,
                resampler: StreamResampler::new(device_rate, sample_rate, capacity)?,
                stop: Some(stop_tx),
                worker: Some(worker),
            });
            Ok(input)
        })
    }
}

fn build_input_stream(
    name: Option<&str>,
    ring: Arc<Mutex<VecDeque<f32>>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                SpectraError::UnsupportedEnvironment(format!("input device {name:?} not found"))
            })?,
        None => host.default_input_device().ok_or_else(|| {
            SpectraError::UnsupportedEnvironment("no audio input device found".into())
        })?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| SpectraError::UnsupportedEnvironment(format!("no supported input config: {e}")))?;

    let rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels().max(1));
    let capacity = rate as usize * CAPTURE_BUFFER_SECONDS;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        cpal::SampleFormat::F32 => input_stream::<f32>(&device, &config, ring, channels, capacity),
        cpal::SampleFormat::I16 => input_stream::<i16>(&device, &config, ring, channels, capacity),
        cpal::SampleFormat::U16 => input_stream::<u16>(&device, &config, ring, channels, capacity),
        other => {
            return Err(SpectraError::UnsupportedEnvironment(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => SpectraError::PermissionDenied(
            "input device is not available; access may have been refused".into(),
        ),
        other => SpectraError::UnsupportedEnvironment(other.to_string()),
    })?;

    stream
        .play()
        .map_err(|e| SpectraError::PermissionDenied(format!("failed to start capture: {e}")))?;
    Ok((stream, rate))
}

/// Downmixes interleaved device frames of any sample type into `ring`.
fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<Mutex<VecDeque<f32>>>,
    channels: usize,
    capacity: usize,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut ring = ring.lock().unwrap_or_else(PoisonError::into_inner);
            downmix_into(data, channels, &mut ring, capacity);
        },
        |err| tracing::warn!(error = %err, "input stream error"),
        None,
    )
}

/// Appends the mono mix of interleaved `data` to `ring`, keeping at most
/// `capacity` of the newest frames.
fn downmix_into<T>(data: &[T], channels: usize, ring: &mut VecDeque<f32>, capacity: usize)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    ring.extend(data.chunks(channels.max(1)).map(|frame| {
        frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
    }));
    if ring.len() > capacity {
        let excess = ring.len() - capacity;
        ring.drain(..excess);
    }
}

/// Mono samples from the device, resampled to the graph rate on read.
struct CpalInput {
    ring: Arc<Mutex<VecDeque<f32>>>,
    resampler: StreamResampler,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CaptureInput for CpalInput {
    fn pull(&mut self, out: &mut [f32]) {
        {
            let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            self.resampler.push(ring.drain(..));
        }
        self.resampler.read(out);
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
        }
        tracing::debug!("microphone capture stopped");
    }
}

/// Plays a realtime [`SoftwareGraph`] through the default output device.
/// Output stops when this value is dropped.
pub struct CpalOutput {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn start(graph: Arc<SoftwareGraph>) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = thread::Builder::new()
            .name("spectra-output".into())
            .spawn(move || match build_output_stream(graph) {
                Ok(stream) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        let _ = stop_rx.recv();
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| SpectraError::UnsupportedEnvironment("output thread exited early".into()))??;

        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

fn build_output_stream(graph: Arc<SoftwareGraph>) -> Result<cpal::Stream> {
    use super::graph::AudioGraphProvider;

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| SpectraError::UnsupportedEnvironment("no audio output device found".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?;

    let channels = usize::from(supported.channels().max(1));
    let format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.into();
    config.sample_rate = cpal::SampleRate(graph.sample_rate());
    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate = config.sample_rate.0,
        channels,
        ?format,
        "audio output started"
    );

    let stream = match format {
        cpal::SampleFormat::F32 => output_stream::<f32>(&device, &config, graph, channels),
        cpal::SampleFormat::I16 => output_stream::<i16>(&device, &config, graph, channels),
        cpal::SampleFormat::U16 => output_stream::<u16>(&device, &config, graph, channels),
        other => {
            return Err(SpectraError::UnsupportedEnvironment(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    }
    .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?;
    stream
        .play()
        .map_err(|e| SpectraError::UnsupportedEnvironment(e.to_string()))?;
    Ok(stream)
}

/// Renders the graph in mono and copies it to every device channel.
fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    graph: Arc<SoftwareGraph>,
    channels: usize,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mono = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mono.resize(data.len() / channels, 0.0);
            graph.render_into(&mut mono);
            fan_out(&mono, data, channels);
        },
        |err| tracing::warn!(error = %err, "output stream error"),
        None,
    )
}

/// Writes each mono sample to every channel of the matching device frame.
fn fan_out<T>(mono: &[f32], data: &mut [T], channels: usize)
where
    T: SizedSample + FromSample<f32>,
{
    for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono) {
        frame.fill(T::from_sample(sample));
    }
}
