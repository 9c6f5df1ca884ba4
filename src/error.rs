use crate::membership::codec::CodecError;
use crate::topology::TopologyError;

pub type Result<T> = std::result::Result<T, GossamerError>;

#[derive(Debug, thiserror::Error)]
pub enum GossamerError {
    #[error("configuration error: {error_msg}")]
    Config { error_msg: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence error: {0}")]
    Persistence(#[from] sled::Error),
    #[error("serialization error: {error_msg}")]
    Serialization { error_msg: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: std::time::Duration,
    },
    #[error("{component} is no longer running")]
    Closed { component: &'static str },
}

impl From<Box<bincode::ErrorKind>> for GossamerError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        GossamerError::Serialization {
            error_msg: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GossamerError {
    fn from(err: serde_json::Error) -> Self {
        GossamerError::Serialization {
            error_msg: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for GossamerError {
    fn from(err: config::ConfigError) -> Self {
        GossamerError::Config {
            error_msg: err.to_string(),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for GossamerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        GossamerError::Closed {
            component: "actor reply",
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GossamerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GossamerError::Closed {
            component: "actor inbox",
        }
    }
}

impl From<tokio::task::JoinError> for GossamerError {
    fn from(err: tokio::task::JoinError) -> Self {
        GossamerError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}
