//! Error types for the channel-ingest library.
//!
//! This module provides custom error types using `thiserror` so each stage of
//! the pipeline can decide which failures are recoverable at its own
//! granularity (image, file, channel) and which abort the run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`crate::client::ChannelClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The platform asked us to back off for the given number of seconds.
    #[error("Flood wait requested for {seconds} seconds")]
    FloodWait {
        /// Wait duration requested by the platform.
        seconds: u64,
    },

    /// Session could not be established.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The client was used before `authenticate` or after `disconnect`.
    #[error("Client session is not active")]
    NotConnected,

    /// The channel does not exist or is not public.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The message carries no downloadable media.
    #[error("Message {0} has no downloadable media")]
    NoMedia(i64),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected HTTP status.
    #[error("Unexpected HTTP status {status} for {url}")]
    Status {
        /// Status code returned by the platform.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Page markup could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O errors while storing media.
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the ingestion pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Channel client errors
    #[error("Channel client error: {0}")]
    Client(#[from] ClientError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A staged file could not be parsed or loaded as a unit.
    #[error("Staged file {path}: {reason}")]
    StagedFile {
        /// Offending file.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Object detection failed for one image.
    #[error("Detection failed for {path}: {reason}")]
    Detection {
        /// Image that failed.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The external transformation tool exited unsuccessfully.
    #[error("Transform `{command}` exited with status {status}: {stderr}")]
    Transform {
        /// Rendered command line, for diagnostics only.
        command: String,
        /// Exit code, or -1 when killed by a signal.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Input rejected by validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline stage failed and the run was aborted.
    #[error("Stage `{stage}` failed: {source}")]
    Stage {
        /// Stage name.
        stage: &'static str,
        /// Cause of the failure.
        #[source]
        source: Box<IngestError>,
    },

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Other(err.to_string())
    }
}

impl IngestError {
    /// Wrap an error with the name of the stage it aborted.
    pub fn in_stage(self, stage: &'static str) -> Self {
        IngestError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}
