//! Core library for the Spectra audio feature engine.
//!
//! The crate turns a live or decoded audio signal into one compact
//! [`FeatureFrame`] per render frame: a byte spectrum and waveform, named band
//! energies, beat onsets, a tempo estimate and spectral flux. Each module owns
//! a distinct subsystem (source lifecycle and audio graph, feature analysis,
//! configuration, frame timing) so renderers only ever deal with the
//! [`SourceController`] and the frames it hands out.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod timeline;

pub use analysis::{AnalysisPipeline, AnalysisSummary, BandEnergies, BeatInfo, FeatureFrame};
pub use audio::{
    AudioBlob, AudioGraphProvider, PlaybackHandle, RenderMode, SoftwareGraph, SourceController,
    SourceKind, SourceState, TrackInfo, TrackRef,
};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, DemoConfig, DemoVoice};
pub use error::{Result, SpectraError};
pub use timeline::{FrameClock, ManualClock, SystemClock};
