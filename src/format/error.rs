//! Error types for task format operations.

use thiserror::Error;

use crate::model::ModelError;
use crate::segmentation::CodecError;
use crate::taxonomy::TaxonomyError;
use crate::transport::TransportError;

/// Errors that can occur during format operations.
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task or annotation structure is invalid
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A category is missing from the taxonomy
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    /// A mask could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A blob could not be fetched or stored
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid format structure or content
    #[error("Invalid format: {message}")]
    InvalidFormat {
        /// Description of the format error
        message: String,
    },

    /// Required field is missing
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// Version mismatch between expected and found
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version string
        expected: String,
        /// Found version string
        found: String,
    },

    /// Operation not supported by this format
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl FormatError {
    /// Create an invalid format error with a message.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}
