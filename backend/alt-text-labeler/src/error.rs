use std::time::Duration;
use thiserror::Error;

/// Cursor persistence errors
///
/// A missing cursor file is not an error; `load` reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Cursor IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cursor file {path} does not hold a microsecond timestamp: {content:?}")]
    Corrupt { path: String, content: String },
}

/// Label creation errors; all are treated as transient by the coordinator
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Label request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Labeling service error: {0}")]
    Service(String),
}

/// Event source errors
#[derive(Debug, Error)]
pub enum FirehoseError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid firehose URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Top-level service errors
#[derive(Debug, Error)]
pub enum LabelerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Firehose(#[from] FirehoseError),

    #[error("Label store error: {0}")]
    LabelStore(#[from] label_store::LabelStoreError),

    #[error("Listener error: {0}")]
    Listener(#[source] std::io::Error),
}

impl From<envy::Error> for LabelerError {
    fn from(err: envy::Error) -> Self {
        LabelerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LabelerError>;
