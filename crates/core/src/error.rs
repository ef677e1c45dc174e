/// Result alias that carries the custom [`LumenError`] type.
pub type Result<T> = std::result::Result<T, LumenError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LumenError {
    /// Free-form failure, mostly used for poisoned locks and collaborator
    /// errors that have no richer type.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be parsed or serialised.
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),
    /// The audio sampler could not start.
    #[error("audio: {0}")]
    Audio(#[from] AudioInitError),
    /// A remote-control message was rejected.
    #[error("remote: {0}")]
    Remote(#[from] RemoteError),
    /// A mode index or name does not exist in the registry.
    #[error("unknown mode `{0}`")]
    UnknownMode(String),
    /// The display collaborator failed to open or present.
    #[error("display: {0}")]
    Display(String),
    /// A screengrab could not be encoded.
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl LumenError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for LumenError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LumenError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Reasons the audio sampler reports `Failed` instead of `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioInitError {
    #[error("no input device exposes capture")]
    NoInputDevice,
    #[error("unsupported sample format `{0}`")]
    UnsupportedFormat(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("built without the `capture` feature")]
    CaptureUnavailable,
    #[error("sampler did not report readiness in time")]
    Timeout,
}

/// Malformed remote-control traffic. Always logged and dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("empty message")]
    Empty,
    #[error("unknown address `{0}`")]
    UnknownAddress(String),
    #[error("knob index `{0}` out of range")]
    KnobIndex(String),
    #[error("missing value for `{0}`")]
    MissingValue(String),
    #[error("invalid value `{value}` for `{address}`")]
    InvalidValue { address: String, value: String },
}
