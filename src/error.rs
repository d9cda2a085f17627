use std::path::PathBuf;

use thiserror::Error;

use crate::schema::{ProtocolVersion, Wire};

/// Errors raised by the store, encoder and transport.
#[derive(Debug, Error)]
pub enum TunerError {
    #[error("no stage selected")]
    Unselected,

    #[error("stage {index} out of range (0..{count})")]
    OutOfRange { index: usize, count: usize },

    #[error("corrupt stage store {}: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("corrupt global config {}: {reason}", path.display())]
    CorruptGlobalConfig { path: PathBuf, reason: String },

    #[error("{field} = {value} does not fit wire type {wire}")]
    EncodingRange {
        field: &'static str,
        value: String,
        wire: Wire,
    },

    #[error("frame '{tag}' is not defined by the {version} protocol")]
    FrameUnsupported { tag: char, version: ProtocolVersion },

    #[error("serial device {device} unavailable: {reason}")]
    TransportUnavailable { device: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TunerError>;

impl TunerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TunerError::Io {
            path: path.into(),
            source,
        }
    }
}
