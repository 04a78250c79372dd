//! In-process audio graph.
//!
//! Nodes live in a map keyed by [`NodeId`] and are rendered pull-style: asking
//! a node for a block first renders its inputs, and each node renders at most
//! once per pass so fan-out is cheap. A [`RenderMode::Offline`] graph renders a
//! fixed hop whenever a tap is read, which makes file analysis and tests fully
//! deterministic. A [`RenderMode::Realtime`] graph is clocked by an output
//! device calling [`SoftwareGraph::render_into`] from its callback.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::future::BoxFuture;

use crate::{analysis::SpectrumAnalyser, Result, SpectraError};

use super::{
    decode::decode_bytes,
    graph::{
        AudioGraphProvider, GraphStats, MediaNode, MediaSource, NodeId, OscillatorSpec, TapFrame,
        TapOptions,
    },
    playback::PlaybackHandle,
    resample::resample_mono,
};

const DESTINATION: NodeId = NodeId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Every tap read first renders `hop` new samples.
    Offline { hop: usize },
    /// Rendering is driven externally; tap reads only observe.
    Realtime,
}

/// Opens capture devices for the graph.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, sample_rate: u32) -> BoxFuture<'_, Result<Box<dyn CaptureInput>>>;
}

/// A live capture stream. Dropping it closes the device.
pub trait CaptureInput: Send {
    /// Overwrites `out` with the next captured samples, writing silence for
    /// anything the device has not delivered yet.
    fn pull(&mut self, out: &mut [f32]);
}

/// Fetches encoded media for stream sources.
pub trait StreamFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Scripted capture backend: a fixed signal, or a scripted failure.
#[derive(Debug, Clone, Copy)]
pub struct SignalCapture {
    signal: Signal,
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Tone { spec: OscillatorSpec, amplitude: f32 },
    Silence,
    Denied,
    Missing,
}

impl SignalCapture {
    pub fn tone(spec: OscillatorSpec, amplitude: f32) -> Self {
        Self {
            signal: Signal::Tone { spec, amplitude },
        }
    }

    pub fn silence() -> Self {
        Self {
            signal: Signal::Silence,
        }
    }

    /// Every open fails with `PermissionDenied`.
    pub fn denied() -> Self {
        Self {
            signal: Signal::Denied,
        }
    }

    /// Every open fails with `UnsupportedEnvironment`.
    pub fn missing() -> Self {
        Self {
            signal: Signal::Missing,
        }
    }
}

impl CaptureBackend for SignalCapture {
    fn open(&self, sample_rate: u32) -> BoxFuture<'_, Result<Box<dyn CaptureInput>>> {
        let signal = self.signal;
        Box::pin(async move {
            let input: Box<dyn CaptureInput> = match signal {
                Signal::Denied => {
                    return Err(SpectraError::PermissionDenied(
                        "capture access was refused".into(),
                    ))
                }
                Signal::Missing => {
                    return Err(SpectraError::UnsupportedEnvironment(
                        "no capture device available".into(),
                    ))
                }
                Signal::Silence => Box::new(ScriptedInput {
                    oscillator: None,
                    amplitude: 0.0,
                    sample_rate,
                }),
                Signal::Tone { spec, amplitude } => Box::new(ScriptedInput {
                    oscillator: Some(Oscillator::new(spec)),
                    amplitude,
                    sample_rate,
                }),
            };
            Ok(input)
        })
    }
}

struct ScriptedInput {
    oscillator: Option<Oscillator>,
    amplitude: f32,
    sample_rate: u32,
}

impl CaptureInput for ScriptedInput {
    fn pull(&mut self, out: &mut [f32]) {
        match self.oscillator.as_mut() {
            Some(oscillator) => {
                oscillator.render(out, self.sample_rate);
                out.iter_mut().for_each(|s| *s *= self.amplitude);
            }
            None => out.fill(0.0),
        }
    }
}

/// Serves media from an in-memory table of URLs.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes);
    }
}

impl StreamFetcher for MemoryFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.resources
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(url)
                .cloned()
                .ok_or_else(|| SpectraError::Stream(format!("no resource at {url}")))
        })
    }
}

/// Fetcher for builds without networking.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetwork;

impl StreamFetcher for NoNetwork {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            Err(SpectraError::Stream(format!(
                "cannot fetch {url}: networking is not available"
            )))
        })
    }
}

/// The in-process [`AudioGraphProvider`].
pub struct SoftwareGraph {
    sample_rate: u32,
    mode: RenderMode,
    capture: Arc<dyn CaptureBackend>,
    fetcher: Arc<dyn StreamFetcher>,
    inner: Mutex<GraphInner>,
}

impl SoftwareGraph {
    pub fn new(sample_rate: u32, mode: RenderMode) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(DESTINATION, Node::new(NodeKind::Destination));

        Self {
            sample_rate: sample_rate.max(1),
            mode,
            capture: Arc::new(SignalCapture::missing()),
            fetcher: Arc::new(NoNetwork),
            inner: Mutex::new(GraphInner {
                sample_rate: sample_rate.max(1),
                next_id: 1,
                pass: 0,
                nodes,
                shut_down: false,
            }),
        }
    }

    /// Offline graph rendering `hop` samples per tap read.
    pub fn offline(sample_rate: u32, hop: usize) -> Self {
        Self::new(sample_rate, RenderMode::Offline { hop: hop.max(1) })
    }

    pub fn with_capture(mut self, capture: Arc<dyn CaptureBackend>) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn StreamFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Renders one block into `out`: the destination mix, clamped to
    /// [-1, 1]. Taps that do not feed the destination are rendered too so
    /// analysis keeps running for sources without a playback sink.
    pub fn render_into(&self, out: &mut [f32]) {
        let mut inner = self.lock();
        inner.pass += 1;

        let mixed = inner.pull(DESTINATION, out.len());
        for (slot, sample) in out.iter_mut().zip(mixed) {
            *slot = sample.clamp(-1.0, 1.0);
        }

        let taps: Vec<NodeId> = inner
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node.kind, NodeKind::Tap(_)))
            .map(|(id, _)| *id)
            .collect();
        for tap in taps {
            inner.pull(tap, out.len());
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.lock().shut_down {
            return Err(SpectraError::UnsupportedEnvironment(
                "audio graph has been shut down".into(),
            ));
        }
        Ok(())
    }

    fn insert(&self, kind: NodeKind) -> Result<NodeId> {
        let mut inner = self.lock();
        if inner.shut_down {
            return Err(SpectraError::UnsupportedEnvironment(
                "audio graph has been shut down".into(),
            ));
        }
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        tracing::debug!(node = %id, kind = kind.label(), "node created");
        inner.nodes.insert(id, Node::new(kind));
        Ok(id)
    }

    fn with_gain<T>(&self, gain: NodeId, f: impl FnOnce(&mut Node) -> T) -> Result<T> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(&gain)
            .ok_or(SpectraError::UnknownNode(gain))?;
        if !matches!(node.kind, NodeKind::Gain(_)) {
            return Err(SpectraError::msg(format!("node {gain} is not a gain stage")));
        }
        Ok(f(node))
    }
}

impl AudioGraphProvider for SoftwareGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_capture_source(&self) -> BoxFuture<'_, Result<NodeId>> {
        Box::pin(async move {
            self.ensure_running()?;
            let input = self.capture.open(self.sample_rate).await?;
            self.insert(NodeKind::Capture(input))
        })
    }

    fn create_media_source(&self, source: MediaSource) -> BoxFuture<'_, Result<MediaNode>> {
        Box::pin(async move {
            self.ensure_running()?;

            let (bytes, hint, from_stream) = match source {
                MediaSource::Blob(blob) => {
                    let hint = blob.extension();
                    (blob.bytes, hint, false)
                }
                MediaSource::Stream { url } => {
                    let bytes = self.fetcher.fetch(&url).await?;
                    (bytes, url_extension(&url), true)
                }
            };

            let sample_rate = self.sample_rate;
            let prepared = match tokio::runtime::Handle::try_current() {
                Ok(runtime) => runtime
                    .spawn_blocking(move || prepare_media(bytes, hint, sample_rate))
                    .await
                    .map_err(|e| SpectraError::Decode(format!("decoder task failed: {e}")))
                    .and_then(|prepared| prepared),
                Err(_) => prepare_media(bytes, hint, sample_rate),
            };
            let samples = match prepared {
                Ok(samples) => samples,
                Err(SpectraError::Decode(reason)) if from_stream => {
                    return Err(SpectraError::Stream(reason))
                }
                Err(e) => return Err(e),
            };

            let playback = PlaybackHandle::new(samples.len(), sample_rate);
            let node = self.insert(NodeKind::Media(MediaPlayer {
                samples,
                playback: playback.clone(),
            }))?;
            Ok(MediaNode { node, playback })
        })
    }

    fn create_oscillator(&self, spec: OscillatorSpec) -> Result<NodeId> {
        if !spec.frequency.is_finite() || spec.frequency < 0.0 {
            return Err(SpectraError::msg(format!(
                "invalid oscillator frequency {}",
                spec.frequency
            )));
        }
        self.insert(NodeKind::Oscillator(Oscillator::new(spec)))
    }

    fn create_gain(&self, value: f32) -> Result<NodeId> {
        if !value.is_finite() {
            return Err(SpectraError::msg("gain must be finite"));
        }
        self.insert(NodeKind::Gain(value))
    }

    fn create_analysis_tap(&self, options: TapOptions) -> Result<NodeId> {
        if !options.fft_size.is_power_of_two() || !(32..=32_768).contains(&options.fft_size) {
            return Err(SpectraError::InvalidConfig(format!(
                "fft size {} must be a power of two in [32, 32768]",
                options.fft_size
            )));
        }
        self.insert(NodeKind::Tap(TapState::new(options)))
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(&from) {
            return Err(SpectraError::UnknownNode(from));
        }
        let target = inner
            .nodes
            .get_mut(&to)
            .ok_or(SpectraError::UnknownNode(to))?;
        if target.kind.is_source() {
            return Err(SpectraError::msg(format!("node {to} does not accept inputs")));
        }
        if !target.inputs.contains(&from) {
            target.inputs.push(from);
        }
        Ok(())
    }

    fn modulate_gain(&self, gain: NodeId, modulator: NodeId, depth: f32) -> Result<()> {
        if !self.lock().nodes.contains_key(&modulator) {
            return Err(SpectraError::UnknownNode(modulator));
        }
        self.with_gain(gain, |node| {
            node.modulators.retain(|(m, _)| *m != modulator);
            node.modulators.push((modulator, depth));
        })
    }

    fn set_gain(&self, gain: NodeId, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(SpectraError::msg("gain must be finite"));
        }
        self.with_gain(gain, |node| {
            if let NodeKind::Gain(current) = &mut node.kind {
                *current = value;
            }
        })
    }

    fn read_tap(&self, tap: NodeId, frame: &mut TapFrame) -> Result<()> {
        let mut inner = self.lock();
        match inner.nodes.get(&tap) {
            Some(node) if matches!(node.kind, NodeKind::Tap(_)) => {}
            Some(_) => {
                return Err(SpectraError::msg(format!(
                    "node {tap} is not an analysis tap"
                )))
            }
            None => return Err(SpectraError::UnknownNode(tap)),
        }

        if let RenderMode::Offline { hop } = self.mode {
            inner.pass += 1;
            inner.pull(tap, hop);
        }

        match inner.nodes.get_mut(&tap).map(|node| &mut node.kind) {
            Some(NodeKind::Tap(state)) => state.read(frame),
            _ => Err(SpectraError::UnknownNode(tap)),
        }
    }

    fn release(&self, node: NodeId) {
        if node == DESTINATION {
            return;
        }
        let mut inner = self.lock();
        if let Some(removed) = inner.remove(node) {
            tracing::debug!(node = %node, kind = removed.kind.label(), "node released");
        }
    }

    fn stats(&self) -> GraphStats {
        let inner = self.lock();
        let mut stats = GraphStats::default();
        for (id, node) in &inner.nodes {
            stats.connections += node.inputs.len() + node.modulators.len();
            if *id == DESTINATION {
                continue;
            }
            stats.nodes += 1;
            match node.kind {
                NodeKind::Destination => {}
                NodeKind::Capture(_) => stats.captures += 1,
                NodeKind::Media(_) => stats.media += 1,
                NodeKind::Oscillator(_) => stats.oscillators += 1,
                NodeKind::Gain(_) => stats.gains += 1,
                NodeKind::Tap(_) => stats.taps += 1,
            }
        }
        stats
    }

    fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        let ids: Vec<NodeId> = inner
            .nodes
            .keys()
            .copied()
            .filter(|id| *id != DESTINATION)
            .collect();
        for id in ids {
            inner.remove(id);
        }
        tracing::debug!("software graph shut down");
    }
}

impl fmt::Debug for SoftwareGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareGraph")
            .field("sample_rate", &self.sample_rate)
            .field("mode", &self.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

struct GraphInner {
    sample_rate: u32,
    next_id: u64,
    pass: u64,
    nodes: HashMap<NodeId, Node>,
    shut_down: bool,
}

impl GraphInner {
    /// Renders `id` for the current pass, reusing the cached block when it
    /// has already been rendered.
    fn pull(&mut self, id: NodeId, frames: usize) -> Vec<f32> {
        let pass = self.pass;
        let (inputs, modulators) = match self.nodes.get_mut(&id) {
            None => return vec![0.0; frames],
            Some(node) if node.pass == pass => return node.block.clone(),
            Some(node) => {
                // Marked before recursing so a cycle reads silence.
                node.pass = pass;
                node.block.clear();
                node.block.resize(frames, 0.0);
                (node.inputs.clone(), node.modulators.clone())
            }
        };

        let mut block = vec![0.0; frames];
        for input in inputs {
            for (acc, sample) in block.iter_mut().zip(self.pull(input, frames)) {
                *acc += sample;
            }
        }
        let modulation: Vec<(Vec<f32>, f32)> = modulators
            .into_iter()
            .map(|(modulator, depth)| (self.pull(modulator, frames), depth))
            .collect();

        let sample_rate = self.sample_rate;
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.kind.process(&mut block, &modulation, sample_rate);
                node.block.clone_from(&block);
                block
            }
            None => vec![0.0; frames],
        }
    }

    fn remove(&mut self, id: NodeId) -> Option<Node> {
        let removed = self.nodes.remove(&id)?;
        for node in self.nodes.values_mut() {
            node.inputs.retain(|input| *input != id);
            node.modulators.retain(|(modulator, _)| *modulator != id);
        }
        if let NodeKind::Media(player) = &removed.kind {
            player.playback.release();
        }
        Some(removed)
    }
}

struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    modulators: Vec<(NodeId, f32)>,
    block: Vec<f32>,
    pass: u64,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            modulators: Vec::new(),
            block: Vec::new(),
            pass: 0,
        }
    }
}

enum NodeKind {
    Destination,
    Capture(Box<dyn CaptureInput>),
    Media(MediaPlayer),
    Oscillator(Oscillator),
    Gain(f32),
    Tap(TapState),
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Destination => "destination",
            Self::Capture(_) => "capture",
            Self::Media(_) => "media",
            Self::Oscillator(_) => "oscillator",
            Self::Gain(_) => "gain",
            Self::Tap(_) => "tap",
        }
    }

    fn is_source(&self) -> bool {
        matches!(self, Self::Capture(_) | Self::Media(_) | Self::Oscillator(_))
    }

    /// Turns the summed input `block` into this node's output in place.
    fn process(&mut self, block: &mut [f32], modulation: &[(Vec<f32>, f32)], sample_rate: u32) {
        match self {
            Self::Destination => {}
            Self::Capture(input) => input.pull(block),
            Self::Media(player) => player.render(block),
            Self::Oscillator(oscillator) => oscillator.render(block, sample_rate),
            Self::Gain(value) => {
                for (index, sample) in block.iter_mut().enumerate() {
                    let offset: f32 = modulation
                        .iter()
                        .map(|(signal, depth)| depth * signal[index])
                        .sum();
                    *sample *= *value + offset;
                }
            }
            Self::Tap(state) => state.push(block),
        }
    }
}

struct Oscillator {
    spec: OscillatorSpec,
    phase: f64,
}

impl Oscillator {
    fn new(spec: OscillatorSpec) -> Self {
        Self { spec, phase: 0.0 }
    }

    fn render(&mut self, out: &mut [f32], sample_rate: u32) {
        let step = f64::from(self.spec.frequency) / f64::from(sample_rate.max(1));
        for slot in out {
            *slot = self.spec.waveform.sample(self.phase as f32);
            self.phase = (self.phase + step).fract();
        }
    }
}

/// Decoded media at the graph rate, one sample per graph frame.
struct MediaPlayer {
    samples: Vec<f32>,
    playback: PlaybackHandle,
}

impl MediaPlayer {
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if !self.playback.is_playing() {
            return;
        }

        let start = self.playback.position_frames() as usize;
        let remaining = self.samples.get(start..).unwrap_or_default();
        let count = remaining.len().min(out.len());
        out[..count].copy_from_slice(&remaining[..count]);

        if count < out.len() {
            self.playback.finish();
        } else {
            self.playback.set_position_frames((start + count) as f64);
        }
    }
}

/// Analysis tap: passes audio through and keeps the latest transform window.
struct TapState {
    analyser: SpectrumAnalyser,
    history: Vec<f32>,
}

impl TapState {
    fn new(options: TapOptions) -> Self {
        Self {
            analyser: SpectrumAnalyser::new(
                options.fft_size,
                options.smoothing,
                options.min_decibels,
                options.max_decibels,
            ),
            history: Vec::with_capacity(options.fft_size * 2),
        }
    }

    fn push(&mut self, block: &[f32]) {
        self.history.extend_from_slice(block);
        let window = self.analyser.fft_size();
        if self.history.len() > window {
            let excess = self.history.len() - window;
            self.history.drain(..excess);
        }
    }

    fn read(&mut self, frame: &mut TapFrame) -> Result<()> {
        let bins = self.analyser.bin_count();
        frame.spectrum.resize(bins, 0);
        frame.waveform.resize(bins, 0);
        self.analyser
            .frequency_bytes(&self.history, &mut frame.spectrum)?;
        SpectrumAnalyser::waveform_bytes(&self.history, &mut frame.waveform);
        Ok(())
    }
}

/// Decodes `bytes` and converts the result to `sample_rate`.
fn prepare_media(bytes: Vec<u8>, hint: Option<String>, sample_rate: u32) -> Result<Vec<f32>> {
    let decoded = decode_bytes(bytes, hint.as_deref())?;
    resample_mono(decoded.samples, decoded.sample_rate, sample_rate)
}

/// Lower-cased file extension of the last path segment of `url`.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        task::{Context, Poll},
    };

    use futures_util::task::noop_waker_ref;

    use super::*;
    use crate::audio::{decode::tests::wav_bytes, graph::AudioBlob, Waveform};

    fn tap_options() -> TapOptions {
        TapOptions {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }

    #[test]
    fn oscillator_peaks_in_its_bin() {
        let graph = SoftwareGraph::offline(44_100, 735);
        // 2048-point transform at 44.1 kHz: bin 100 is centred on ~2153 Hz.
        let osc = graph
            .create_oscillator(OscillatorSpec::new(Waveform::Sine, 100.0 * 44_100.0 / 2048.0))
            .unwrap();
        let gain = graph.create_gain(0.01).unwrap();
        let tap = graph.create_analysis_tap(tap_options()).unwrap();
        graph.connect(osc, gain).unwrap();
        graph.connect(gain, tap).unwrap();

        let mut frame = TapFrame::default();
        for _ in 0..30 {
            graph.read_tap(tap, &mut frame).unwrap();
        }

        assert_eq!(frame.spectrum.len(), 1024);
        assert_eq!(frame.waveform.len(), 1024);
        let loudest = frame
            .spectrum
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 100);
        assert!(frame.spectrum[100] > 100);
        assert!(frame.waveform.iter().all(|&b| (126..=130).contains(&b)));
    }

    #[test]
    fn release_disconnects_and_counts() {
        let graph = SoftwareGraph::offline(44_100, 128);
        let osc = graph
            .create_oscillator(OscillatorSpec::new(Waveform::Sine, 440.0))
            .unwrap();
        let lfo = graph
            .create_oscillator(OscillatorSpec::new(Waveform::Sine, 2.0))
            .unwrap();
        let gain = graph.create_gain(0.5).unwrap();
        graph.connect(osc, gain).unwrap();
        graph.modulate_gain(gain, lfo, 0.1).unwrap();
        graph.connect(gain, graph.destination()).unwrap();

        let stats = graph.stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.oscillators, 2);
        assert_eq!(stats.gains, 1);
        assert_eq!(stats.connections, 3);

        graph.release(lfo);
        assert_eq!(graph.stats().connections, 2);
        graph.release(osc);
        graph.release(gain);
        graph.release(gain);
        graph.release(graph.destination());
        assert_eq!(graph.stats(), GraphStats::default());
    }

    #[test]
    fn rejects_invalid_wiring() {
        let graph = SoftwareGraph::offline(44_100, 128);
        let osc = graph
            .create_oscillator(OscillatorSpec::new(Waveform::Square, 100.0))
            .unwrap();
        let gain = graph.create_gain(1.0).unwrap();

        assert!(graph.connect(gain, osc).is_err());
        assert!(matches!(
            graph.connect(NodeId(99), gain),
            Err(SpectraError::UnknownNode(NodeId(99)))
        ));
        assert!(graph.set_gain(osc, 0.5).is_err());
        assert!(graph.create_gain(f32::NAN).is_err());

        let mut frame = TapFrame::default();
        assert!(graph.read_tap(gain, &mut frame).is_err());
        assert!(matches!(
            graph.create_analysis_tap(TapOptions {
                fft_size: 1000,
                ..tap_options()
            }),
            Err(SpectraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cycles_render_without_recursing_forever() {
        let graph = SoftwareGraph::offline(44_100, 64);
        let a = graph.create_gain(1.0).unwrap();
        let b = graph.create_gain(1.0).unwrap();
        let tap = graph.create_analysis_tap(tap_options()).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();
        graph.connect(b, tap).unwrap();

        let mut frame = TapFrame::default();
        graph.read_tap(tap, &mut frame).unwrap();
        assert!(frame.spectrum.iter().all(|&b| b == 0));
    }

    #[test]
    fn realtime_render_mixes_into_destination() {
        let graph = SoftwareGraph::new(48_000, RenderMode::Realtime);
        let osc = graph
            .create_oscillator(OscillatorSpec::new(Waveform::Square, 1_000.0))
            .unwrap();
        let gain = graph.create_gain(0.5).unwrap();
        let tap = graph.create_analysis_tap(tap_options()).unwrap();
        graph.connect(osc, gain).unwrap();
        graph.connect(gain, tap).unwrap();
        graph.connect(tap, graph.destination()).unwrap();

        let mut out = vec![0.0f32; 256];
        graph.render_into(&mut out);
        assert!(out.iter().all(|s| s.abs() == 0.5));

        // Tap reads observe what the device rendered without advancing it.
        let mut frame = TapFrame::default();
        graph.read_tap(tap, &mut frame).unwrap();
        assert_eq!(frame.waveform[1023], 192);
    }

    #[tokio::test]
    async fn capture_failures_surface() {
        let denied = SoftwareGraph::offline(44_100, 128)
            .with_capture(Arc::new(SignalCapture::denied()));
        assert!(matches!(
            denied.create_capture_source().await,
            Err(SpectraError::PermissionDenied(_))
        ));

        let missing = SoftwareGraph::offline(44_100, 128);
        assert!(matches!(
            missing.create_capture_source().await,
            Err(SpectraError::UnsupportedEnvironment(_))
        ));
        assert_eq!(missing.stats().captures, 0);
    }

    #[tokio::test]
    async fn capture_feeds_a_tap() {
        let graph = SoftwareGraph::offline(44_100, 735).with_capture(Arc::new(
            SignalCapture::tone(OscillatorSpec::new(Waveform::Sine, 440.0), 0.5),
        ));
        let capture = graph.create_capture_source().await.unwrap();
        let tap = graph.create_analysis_tap(tap_options()).unwrap();
        graph.connect(capture, tap).unwrap();

        let mut frame = TapFrame::default();
        for _ in 0..4 {
            graph.read_tap(tap, &mut frame).unwrap();
        }
        assert!(frame.spectrum.iter().any(|&b| b > 0));
        assert_eq!(graph.stats().captures, 1);
    }

    #[tokio::test]
    async fn media_is_converted_to_the_graph_rate() {
        let graph = SoftwareGraph::offline(44_100, 1_000);
        let bytes = wav_bytes(&vec![0.25; 2_000], 22_050, 1);
        let media = graph
            .create_media_source(MediaSource::Blob(AudioBlob::new("tone.wav", bytes)))
            .await
            .unwrap();
        let tap = graph.create_analysis_tap(tap_options()).unwrap();
        graph.connect(media.node, tap).unwrap();

        let mut frame = TapFrame::default();
        graph.read_tap(tap, &mut frame).unwrap();
        assert_eq!(media.playback.position_seconds(), 0.0);

        assert_eq!(media.playback.duration_seconds(), 4_000.0 / 44_100.0);
        media.playback.play().unwrap();
        graph.read_tap(tap, &mut frame).unwrap();
        assert_eq!(media.playback.position_frames(), 1_000.0);
        assert!((159..=160).contains(&frame.waveform[1023]));

        for _ in 0..4 {
            graph.read_tap(tap, &mut frame).unwrap();
        }
        assert!(media.playback.is_ended());
        assert!(!media.playback.is_playing());

        graph.release(media.node);
        assert!(media.playback.is_released());
    }

    #[test]
    fn media_decodes_inline_without_a_runtime() {
        let graph = SoftwareGraph::offline(44_100, 128);
        let bytes = wav_bytes(&[0.1; 256], 22_050, 1);
        let mut pending =
            graph.create_media_source(MediaSource::Blob(AudioBlob::new("short.wav", bytes)));

        let mut cx = Context::from_waker(noop_waker_ref());
        let media = match pending.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result.unwrap(),
            Poll::Pending => panic!("decoding should complete synchronously"),
        };
        drop(pending);

        assert_eq!(media.playback.duration_seconds(), 512.0 / 44_100.0);
        assert_eq!(graph.stats().media, 1);
    }

    #[tokio::test]
    async fn stream_failures_are_stream_errors() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("https://cdn.test/bad.mp3", b"not audio".to_vec());
        fetcher.insert(
            "https://cdn.test/good.wav?sig=1",
            wav_bytes(&[0.1; 512], 44_100, 1),
        );
        let graph = SoftwareGraph::offline(44_100, 128).with_fetcher(fetcher);

        for url in ["https://cdn.test/missing.mp3", "https://cdn.test/bad.mp3"] {
            let err = graph
                .create_media_source(MediaSource::Stream { url: url.into() })
                .await
                .unwrap_err();
            assert!(matches!(err, SpectraError::Stream(_)), "{url}: {err}");
        }

        let media = graph
            .create_media_source(MediaSource::Stream {
                url: "https://cdn.test/good.wav?sig=1".into(),
            })
            .await
            .unwrap();
        assert_eq!(media.playback.duration_seconds(), 512.0 / 44_100.0);
        assert_eq!(graph.stats().media, 1);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let graph = SoftwareGraph::offline(44_100, 128);
        graph
            .create_oscillator(OscillatorSpec::new(Waveform::Sine, 100.0))
            .unwrap();
        graph.shutdown();

        assert_eq!(graph.stats(), GraphStats::default());
        assert!(graph.create_gain(1.0).is_err());
        assert!(matches!(
            graph
                .create_media_source(MediaSource::Stream { url: "x".into() })
                .await,
            Err(SpectraError::UnsupportedEnvironment(_))
        ));
    }

    #[test]
    fn extension_is_taken_from_the_url_path() {
        assert_eq!(url_extension("https://a.b/c/track.MP3").as_deref(), Some("mp3"));
        assert_eq!(url_extension("https://a.b/t.ogg?x=1.5#y").as_deref(), Some("ogg"));
        assert_eq!(url_extension("https://a.b/stream"), None);
    }
}
