/// Error types shared across the crate
///
/// Money and placeholder lifecycle errors are recovered inside the
/// generation controller; everything else bubbles up as `EditorError`.

use thiserror::Error;

use crate::annotate::annotation::AnnotationId;
use crate::state::data::Credits;

/// Library-wide error type
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Detected before submission; the UI should route to a top-up flow
    #[error("insufficient credit: {required} required, {balance} available")]
    InsufficientCredit { required: Credits, balance: Credits },

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("image {0} has no stored pixels yet")]
    SourceNotReady(String),

    #[error("blob {0} not found")]
    BlobNotFound(String),

    #[error("an interaction session is already active")]
    SessionActive,

    #[error("annotation {0} not found")]
    AnnotationNotFound(AnnotationId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors raised by the generation collaborator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("generation backend failed: {0}")]
    Backend(String),

    #[error("generation backend returned no image")]
    EmptyResult,

    #[error("generated image could not be decoded: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, EditorError>;
