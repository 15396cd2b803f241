//! Daemon-internal error type. Library-style code (anything that can be
//! called from more than one place) returns this; `main` collapses
//! everything into `anyhow::Result` at the top level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GnssdError {
    #[error("i/o error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("frame corrupt: {reason}")]
    FrameCorrupt { reason: String },

    #[error("could not write config to device: {reason}")]
    ConfigWrite { reason: String },

    #[error("hunt loop exhausted every configured baud/framing combination")]
    HuntExhausted,

    #[error("shared memory segment unavailable: {reason}")]
    ShmUnavailable { reason: String },
}

impl GnssdError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        GnssdError::Io { path: path.into(), source }
    }
}
