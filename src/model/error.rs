//! Error types for task and annotation parsing.

use thiserror::Error;

use crate::model::annotation::AnnotationKind;
use crate::model::series::SeriesKind;

/// Segment map keys and decoded mask values differ.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error(
    "Segment map mismatch: values {missing_in_map:?} are in the mask but not the map, \
     entries {missing_in_mask:?} are in the map but not the mask"
)]
pub struct SegmentMapMismatch {
    /// Mask values with no segment map entry
    pub missing_in_map: Vec<u32>,
    /// Segment map entries never observed in the mask
    pub missing_in_mask: Vec<u32>,
}

/// Errors raised while parsing or constructing tasks, series, and annotations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// An annotation is missing a required field or has an out-of-range value.
    #[error("Malformed {kind} annotation #{index}: {message}")]
    MalformedAnnotation {
        /// Variant that failed to parse
        kind: AnnotationKind,
        /// Position within its variant array
        index: usize,
        /// Description of the problem
        message: String,
    },

    /// A task or series violates a structural invariant.
    #[error("Malformed task: {message}")]
    MalformedTask {
        /// Description of the problem
        message: String,
    },

    /// An annotation variant was placed in a series kind it cannot appear in.
    #[error("{kind} annotations are not allowed in {series_kind} series")]
    Inapplicable {
        /// Annotation variant
        kind: AnnotationKind,
        /// Kind of the owning series
        series_kind: SeriesKind,
    },

    /// JSON parsing error outside of any single annotation.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Create a malformed annotation error.
    pub fn malformed_annotation(
        kind: AnnotationKind,
        index: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedAnnotation {
            kind,
            index,
            message: message.into(),
        }
    }

    /// Create a malformed task error.
    pub fn malformed_task(message: impl Into<String>) -> Self {
        Self::MalformedTask {
            message: message.into(),
        }
    }

    /// Prefix the message of a malformed task error with a location.
    pub(crate) fn within(self, location: &str) -> Self {
        match self {
            Self::MalformedTask { message } => Self::MalformedTask {
                message: format!("{location}: {message}"),
            },
            other => other,
        }
    }
}
