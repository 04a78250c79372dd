use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{config::AnalysisConfig, Result};

use super::playback::PlaybackHandle;

/// Opaque handle to one node of an audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    /// High for the first eighth of each cycle.
    Pulse,
}

impl Waveform {
    /// Value at `phase` in [0, 1), in [-1, 1].
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Self::Sine => (std::f32::consts::TAU * phase).sin(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * phase - 1.0,
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Self::Pulse => {
                if phase < 0.125 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorSpec {
    pub waveform: Waveform,
    pub frequency: f32,
}

impl OscillatorSpec {
    pub fn new(waveform: Waveform, frequency: f32) -> Self {
        Self {
            waveform,
            frequency,
        }
    }
}

/// Shape of the analysis tap: transform size and byte mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapOptions {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl From<&AnalysisConfig> for TapOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            smoothing: config.smoothing,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }
}

/// Raw bytes read from an analysis tap, `fft_size / 2` of each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapFrame {
    pub spectrum: Vec<u8>,
    pub waveform: Vec<u8>,
}

impl TapFrame {
    pub fn new(bins: usize) -> Self {
        Self {
            spectrum: vec![0; bins],
            waveform: vec![0; bins],
        }
    }

    pub fn clear(&mut self) {
        self.spectrum.iter_mut().for_each(|b| *b = 0);
        self.waveform.iter_mut().for_each(|b| *b = 0);
    }
}

/// Encoded audio supplied by the caller, e.g. a file picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl AudioBlob {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }

    /// Lower-cased extension of the blob name, used as a container hint.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// Where a media node gets its encoded audio from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Blob(AudioBlob),
    Stream { url: String },
}

/// Media node together with its transport controls.
#[derive(Debug, Clone)]
pub struct MediaNode {
    pub node: NodeId,
    pub playback: PlaybackHandle,
}

/// Resource counters, used to verify that sessions leave nothing behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub captures: usize,
    pub media: usize,
    pub oscillators: usize,
    pub gains: usize,
    pub taps: usize,
    pub connections: usize,
}

/// Capability set the source controller builds sessions from.
///
/// Acquisitions that may wait on the host (capture permission, fetching,
/// decoding) return boxed futures so providers stay object safe. Every other
/// operation is synchronous and cheap. Nodes are owned by whoever created them
/// and must be handed back through [`AudioGraphProvider::release`].
pub trait AudioGraphProvider: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Opens the capture device. Fails with `PermissionDenied` when access is
    /// refused and `UnsupportedEnvironment` when there is no device.
    fn create_capture_source(&self) -> BoxFuture<'_, Result<NodeId>>;

    /// Fetches and decodes media into a paused playable node.
    fn create_media_source(&self, source: MediaSource) -> BoxFuture<'_, Result<MediaNode>>;

    fn create_oscillator(&self, spec: OscillatorSpec) -> Result<NodeId>;

    fn create_gain(&self, value: f32) -> Result<NodeId>;

    fn create_analysis_tap(&self, options: TapOptions) -> Result<NodeId>;

    /// The output device. Always present and never released.
    fn destination(&self) -> NodeId;

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()>;

    /// Adds `depth * modulator` to the gain value of `gain`, sample by sample.
    fn modulate_gain(&self, gain: NodeId, modulator: NodeId, depth: f32) -> Result<()>;

    fn set_gain(&self, gain: NodeId, value: f32) -> Result<()>;

    /// Reads the latest spectrum and waveform of `tap` into `frame`.
    fn read_tap(&self, tap: NodeId, frame: &mut TapFrame) -> Result<()>;

    /// Disconnects and frees `node`, stopping whatever device or buffer it
    /// holds. Unknown nodes are ignored.
    fn release(&self, node: NodeId);

    fn stats(&self) -> GraphStats;

    /// Releases persistent host resources. The provider is unusable afterwards.
    fn shutdown(&self) {}
}
