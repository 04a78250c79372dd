//! Audio sources and the graph they are built from.
//!
//! [`SourceController`] owns the one active session and drives analysis;
//! everything below it talks to an [`AudioGraphProvider`]. The in-process
//! [`SoftwareGraph`] is the provider used by the CLI and the tests, with cpal
//! (`native` feature) and reqwest (`remote` feature) plugging in the host
//! devices and the network.

mod controller;
mod decode;
mod demo;
mod graph;
mod playback;
mod resample;
mod session;
mod software;

#[cfg(feature = "native")]
mod native;
#[cfg(feature = "remote")]
mod remote;

pub use controller::{SourceController, SourceKind, SourceState, TrackInfo, TrackRef};
pub use decode::{decode_bytes, DecodedAudio};
pub use graph::{
    AudioBlob, AudioGraphProvider, GraphStats, MediaNode, MediaSource, NodeId, OscillatorSpec,
    TapFrame, TapOptions, Waveform,
};
pub use playback::PlaybackHandle;
pub use software::{
    CaptureBackend, CaptureInput, MemoryFetcher, NoNetwork, RenderMode, SignalCapture,
    SoftwareGraph, StreamFetcher,
};

#[cfg(feature = "native")]
pub use native::{default_output_rate, list_input_devices, CpalCapture, CpalOutput, InputDevice};
#[cfg(feature = "remote")]
pub use remote::HttpFetcher;
