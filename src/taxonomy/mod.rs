//! Project taxonomy: the category tree and resolution of annotation categories.
//!
//! A [`Taxonomy`] is a read-only value passed explicitly to every call that
//! needs it. There is no process-wide cache.

mod resolver;
mod tree;

use std::fmt;

use thiserror::Error;

pub use resolver::{ResolvedCategory, Taxonomy};
pub use tree::{
    AttributeOption, AttributeSchema, AttributeType, LabelType, OBJECT_ROOT, TaxonomyCategory,
};

/// Errors raised while loading a taxonomy or resolving categories against it.
#[derive(Error, Debug)]
pub enum TaxonomyError {
    /// A category reference does not resolve.
    #[error("Unknown category '{segment}' while resolving '{path}'")]
    UnknownCategory {
        /// First segment (or id) that failed to match
        segment: String,
        /// The full reference being resolved
        path: String,
    },

    /// A category resolved but has no class id to encode in a mask.
    #[error("Category '{path}' has no class id")]
    MissingClassId {
        /// Path of the category
        path: String,
    },

    /// The taxonomy document itself is malformed.
    #[error("Invalid taxonomy: {message}")]
    InvalidTaxonomy {
        /// Description of the problem
        message: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaxonomyError {
    /// Create an invalid taxonomy error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTaxonomy {
            message: message.into(),
        }
    }

    /// Create an unknown category error.
    pub fn unknown(segment: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownCategory {
            segment: segment.into(),
            path: path.into(),
        }
    }
}

/// Non-fatal finding from [`Taxonomy::validate_task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyWarning {
    /// Series the finding is in; `None` for task-level findings.
    pub series: Option<usize>,
    /// Description of the finding.
    pub message: String,
}

impl TaxonomyWarning {
    pub(crate) fn new(series: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            series,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaxonomyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.series {
            Some(series) => write!(f, "series #{series}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
