use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AnalysisPipeline, AnalysisSummary, FeatureFrame},
    config::{AnalysisConfig, AppConfig, DemoConfig},
    timeline::FrameClock,
    Result, SpectraError,
};

use super::{
    demo::build_voice_bank,
    graph::{AudioBlob, AudioGraphProvider, MediaSource, NodeId, TapFrame, TapOptions},
    playback::PlaybackHandle,
    session::SessionGraph,
};

/// Kind of source behind an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Mic,
    File,
    Demo,
    RemoteStream,
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceState {
    Idle,
    Mic,
    File,
    Demo,
    RemoteStream,
}

impl From<SourceKind> for SourceState {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Mic => Self::Mic,
            SourceKind::File => Self::File,
            SourceKind::Demo => Self::Demo,
            SourceKind::RemoteStream => Self::RemoteStream,
        }
    }
}

/// Display metadata for the active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    /// Length in seconds, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub source: SourceKind,
}

impl TrackInfo {
    fn microphone() -> Self {
        Self {
            title: "Microphone Input".into(),
            artist: "Live Input".into(),
            artwork_url: None,
            duration: None,
            source: SourceKind::Mic,
        }
    }

    fn demo() -> Self {
        Self {
            title: "Demo Tone".into(),
            artist: "Spectra".into(),
            artwork_url: None,
            duration: None,
            source: SourceKind::Demo,
        }
    }

    /// Derives metadata from a file name such as `"Artist - Title.mp3"`.
    /// Names without the separator use the file stem as the title.
    pub fn from_file_name(name: &str) -> Self {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Unknown Track".into());

        let (artist, title) = match stem.split_once(" - ") {
            Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
                (artist.trim().to_string(), title.trim().to_string())
            }
            _ => ("Local File".to_string(), stem.trim().to_string()),
        };

        Self {
            title,
            artist,
            artwork_url: None,
            duration: None,
            source: SourceKind::File,
        }
    }
}

/// A catalog record describing a remotely hosted track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub stream_url: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl From<&TrackRef> for TrackInfo {
    fn from(track: &TrackRef) -> Self {
        Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            artwork_url: track.artwork_url.clone(),
            duration: track.duration,
            source: SourceKind::RemoteStream,
        }
    }
}

/// Owns the single active audio session and turns its analysis tap into
/// [`FeatureFrame`]s on demand.
///
/// `start_*` calls are async only while acquiring resources (capture
/// permission, fetching, decoding). Each transition bumps a generation
/// counter; a session that finishes building after a newer transition has
/// begun is released and its start call fails with
/// [`SpectraError::Superseded`].
pub struct SourceController {
    provider: Arc<dyn AudioGraphProvider>,
    clock: Arc<dyn FrameClock>,
    analysis: AnalysisConfig,
    demo: DemoConfig,
    state: Mutex<EngineState>,
}

struct EngineState {
    generation: u64,
    disposed: bool,
    gain: f32,
    session: Option<SourceSession>,
    pipeline: AnalysisPipeline,
    tap_frame: TapFrame,
}

struct SourceSession {
    kind: SourceKind,
    tap: NodeId,
    gain: Option<NodeId>,
    playback: Option<PlaybackHandle>,
    track: TrackInfo,
    graph: SessionGraph,
}

impl SourceController {
    /// Validates `config` and creates an idle controller over `provider`.
    pub fn new(
        provider: Arc<dyn AudioGraphProvider>,
        config: &AppConfig,
        clock: Arc<dyn FrameClock>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = AnalysisPipeline::new(&config.analysis, provider.sample_rate());
        let bins = pipeline.bin_count();

        Ok(Self {
            provider,
            clock,
            analysis: config.analysis.clone(),
            demo: config.demo.clone(),
            state: Mutex::new(EngineState {
                generation: 0,
                disposed: false,
                gain: config.audio.initial_gain,
                session: None,
                pipeline,
                tap_frame: TapFrame::new(bins),
            }),
        })
    }

    /// Starts analysing the capture device. The capture is not routed to the
    /// output, so there is no feedback path.
    pub async fn start_mic(&self) -> Result<()> {
        let (generation, _) = self.begin_transition(SourceKind::Mic)?;
        let session = self.build_mic().await;
        self.install(generation, session)
    }

    /// Decodes `blob` and starts playing it through the output.
    pub async fn start_file(&self, blob: AudioBlob) -> Result<PlaybackHandle> {
        let (generation, level) = self.begin_transition(SourceKind::File)?;
        let track = TrackInfo::from_file_name(&blob.name);
        let session = self
            .build_media(SourceKind::File, MediaSource::Blob(blob), track, level)
            .await;
        self.install_media(generation, session)
    }

    /// Starts the synthesized demo tone, routed to the output.
    pub async fn start_demo(&self) -> Result<()> {
        let (generation, level) = self.begin_transition(SourceKind::Demo)?;
        let session = self.build_demo(level);
        self.install(generation, session)
    }

    /// Fetches the track's stream and plays it like a file.
    pub async fn start_remote_stream(&self, track: TrackRef) -> Result<PlaybackHandle> {
        let (generation, level) = self.begin_transition(SourceKind::RemoteStream)?;
        let info = TrackInfo::from(&track);
        let source = MediaSource::Stream {
            url: track.stream_url,
        };
        let session = self
            .build_media(SourceKind::RemoteStream, source, info, level)
            .await
            .map_err(into_stream_error);
        self.install_media(generation, session)
    }

    /// Releases the active session. Safe to call at any time.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(session) = state.session.take() {
            tracing::info!(source = ?session.kind, "source stopped");
        }
        state.pipeline.reset();
    }

    /// Stops the active session and shuts the provider down. Later starts
    /// fail with [`SpectraError::Disposed`].
    pub fn dispose(&self) {
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.generation += 1;
            state.session = None;
            state.pipeline.reset();
        }
        self.provider.shutdown();
        tracing::info!("source controller disposed");
    }

    /// Clamps `value` to [0, 1], applies it to the active gain stage and
    /// remembers it for later sessions. Returns the applied value.
    pub fn set_gain(&self, value: f32) -> f32 {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };

        let mut state = self.lock();
        state.gain = value;
        if let Some(node) = state.session.as_ref().and_then(|s| s.gain) {
            if let Err(e) = self.provider.set_gain(node, value) {
                tracing::warn!(error = %e, "failed to apply gain");
            }
        }
        value
    }

    /// Returns the gain level applied to new and active sessions.
    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    /// Analyses the current contents of the active tap. Never fails: with no
    /// session the canonical silent frame is returned, and tap read errors
    /// are analysed as silence.
    pub fn get_frame(&self) -> FeatureFrame {
        let now_ms = self.clock.now_ms();
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(tap) = state.session.as_ref().map(|s| s.tap) else {
            return FeatureFrame::silent(state.pipeline.bin_count());
        };

        if let Err(e) = self.provider.read_tap(tap, &mut state.tap_frame) {
            tracing::warn!(error = %e, "analysis tap read failed");
            state.tap_frame.clear();
        }

        let frame = state
            .pipeline
            .process(&state.tap_frame.spectrum, &state.tap_frame.waveform, now_ms);
        if frame.beat.is_beat {
            tracing::debug!(intensity = frame.beat.intensity, bpm = frame.bpm, "beat");
        }
        frame
    }

    /// Returns the kind of the active session, or `Idle`.
    pub fn state(&self) -> SourceState {
        self.lock()
            .session
            .as_ref()
            .map_or(SourceState::Idle, |s| s.kind.into())
    }

    /// Returns the metadata of the active session.
    pub fn track_info(&self) -> Option<TrackInfo> {
        self.lock().session.as_ref().map(|s| s.track.clone())
    }

    /// Returns the transport of the active File or RemoteStream session.
    pub fn playback_handle(&self) -> Option<PlaybackHandle> {
        self.lock().session.as_ref().and_then(|s| s.playback.clone())
    }

    /// Returns the analysis totals since the current session started.
    pub fn summary(&self) -> AnalysisSummary {
        self.lock().pipeline.summary().clone()
    }

    /// Returns true once [`SourceController::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tap_options(&self) -> TapOptions {
        TapOptions::from(&self.analysis)
    }

    /// Tears down the active session and claims a new generation. Returns the
    /// generation together with the remembered gain level.
    fn begin_transition(&self, kind: SourceKind) -> Result<(u64, f32)> {
        let mut state = self.lock();
        if state.disposed {
            return Err(SpectraError::Disposed);
        }
        if let Some(previous) = state.session.take() {
            tracing::debug!(source = ?previous.kind, "releasing previous session");
        }
        state.pipeline.reset();
        state.generation += 1;
        tracing::info!(source = ?kind, generation = state.generation, "starting source");
        Ok((state.generation, state.gain))
    }

    fn install(&self, generation: u64, session: Result<SourceSession>) -> Result<()> {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::warn!(
                generation,
                current = state.generation,
                "discarding superseded session"
            );
            drop(session);
            return Err(SpectraError::Superseded);
        }

        let session = session.map_err(|e| {
            tracing::warn!(error = %e, "source failed to start");
            e
        })?;

        state.pipeline.reset();
        state.tap_frame.clear();
        tracing::info!(
            source = ?session.kind,
            title = %session.track.title,
            nodes = session.graph.node_count(),
            "session installed"
        );
        state.session = Some(session);
        Ok(())
    }

    fn install_media(
        &self,
        generation: u64,
        session: Result<SourceSession>,
    ) -> Result<PlaybackHandle> {
        let playback = session.as_ref().ok().and_then(|s| s.playback.clone());
        self.install(generation, session)?;
        playback.ok_or_else(|| SpectraError::msg("media session has no playback handle"))
    }

    async fn build_mic(&self) -> Result<SourceSession> {
        let mut graph = SessionGraph::new(self.provider.clone());
        let capture = graph.capture_source().await?;
        let tap = graph.analysis_tap(self.tap_options())?;
        graph.connect(capture, tap)?;

        Ok(SourceSession {
            kind: SourceKind::Mic,
            tap,
            gain: None,
            playback: None,
            track: TrackInfo::microphone(),
            graph,
        })
    }

    async fn build_media(
        &self,
        kind: SourceKind,
        source: MediaSource,
        mut track: TrackInfo,
        level: f32,
    ) -> Result<SourceSession> {
        let mut graph = SessionGraph::new(self.provider.clone());
        let media = graph.media_source(source).await?;
        let gain = graph.gain(level)?;
        let tap = graph.analysis_tap(self.tap_options())?;
        graph.connect(media.node, gain)?;
        graph.connect(gain, tap)?;
        graph.connect(tap, graph.destination())?;

        if track.duration.is_none() {
            track.duration = Some(media.playback.duration_seconds());
        }
        media.playback.play()?;

        Ok(SourceSession {
            kind,
            tap,
            gain: Some(gain),
            playback: Some(media.playback),
            track,
            graph,
        })
    }

    fn build_demo(&self, level: f32) -> Result<SourceSession> {
        let mut graph = SessionGraph::new(self.provider.clone());
        let master = build_voice_bank(&mut graph, &self.demo.voices, level)?;
        let tap = graph.analysis_tap(self.tap_options())?;
        graph.connect(master, tap)?;
        graph.connect(tap, graph.destination())?;

        Ok(SourceSession {
            kind: SourceKind::Demo,
            tap,
            gain: Some(master),
            playback: None,
            track: TrackInfo::demo(),
            graph,
        })
    }
}

impl std::fmt::Debug for SourceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceController")
            .field("state", &self.state())
            .field("gain", &self.gain())
            .finish()
    }
}

fn into_stream_error(err: SpectraError) -> SpectraError {
    match err {
        SpectraError::Decode(reason) => SpectraError::Stream(reason),
        other => other,
    }
}
