use crate::audio::NodeId;

/// Result alias that carries the custom [`SpectraError`] type.
pub type Result<T> = std::result::Result<T, SpectraError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SpectraError {
    /// Capture access was refused by the host or the user.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The supplied audio could not be decoded or played.
    #[error("decode error: {0}")]
    Decode(String),
    /// Network or codec failure while starting a remote stream.
    #[error("stream error: {0}")]
    Stream(String),
    /// Capture or playback is not available in this environment.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),
    /// A newer transition was requested while this session was being built.
    #[error("session construction was superseded by a newer transition")]
    Superseded,
    /// The controller has been disposed and accepts no new sessions.
    #[error("source controller has been disposed")]
    Disposed,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown graph node {0}")]
    UnknownNode(NodeId),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl SpectraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SpectraError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpectraError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
