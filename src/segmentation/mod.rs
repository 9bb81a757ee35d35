//! Segmentation codec: segment maps to and from dense label volumes.
//!
//! Mask files are decoded through a [`MaskCodecRegistry`] (NIfTI-1 volumes and
//! PNG images) into a [`LabelVolume`], then checked against the series'
//! segment map in both directions. Encoding goes the other way, either from an
//! existing label volume ([`encode_segmentation`]) or by rasterizing the
//! series' shape annotations ([`rasterize_series`]).
//!
//! ## Modes
//!
//! | Mode | Mask value | Files |
//! |------|------------|-------|
//! | Instance | arbitrary instance id | one or more, merged in order |
//! | Semantic | category class value (`classId + 1`) | one or more, merged in order |
//! | Binary | any non-zero marks presence | one or more per segment map entry |
//!
//! When several files overlap, the later file wins.

mod codec;
mod codecs;
mod decode;
mod encode;
mod labels;
mod raster;

use thiserror::Error;

use crate::model::{Dimensions, SegmentMapMismatch};
use crate::taxonomy::TaxonomyError;
use crate::transport::TransportError;

pub use codec::{MaskCodec, MaskCodecRegistry, MaskImage};
pub use codecs::{NiftiCodec, PngCodec};
pub use decode::{
    DecodedSegmentation, Repaired, Segment, decode_segmentation, item_dimensions,
    repair_segmentation,
};
pub use encode::{EncodedSegmentation, MaskFile, encode_segmentation};
pub use labels::{
    LabelVolume, ValueStats, distinct_values, label_dimensions, merge_into, retain_values,
    value_stats,
};
pub use raster::{Rasterized, rasterize_series};

/// Errors raised while decoding or encoding segmentation masks.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Segment map keys and mask values differ.
    #[error(transparent)]
    SegmentMapMismatch(#[from] SegmentMapMismatch),

    /// A mask blob could not be read or is corrupt.
    #[error("Cannot read mask '{reference}': {message}")]
    Io {
        /// Blob reference, empty when not yet known
        reference: String,
        /// Description of the problem
        message: String,
    },

    /// Declared and decoded dimensions disagree.
    #[error("Shape mismatch: expected {expected}, found {actual}")]
    ShapeMismatch {
        /// Dimensions the series declares
        expected: Dimensions,
        /// Dimensions of the decoded data
        actual: Dimensions,
    },

    /// The requested combination is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A category could not be mapped to a mask value.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

impl CodecError {
    /// Create an I/O error for a blob.
    pub fn io(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error whose blob is filled in later by [`Self::at`].
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::io("", message)
    }

    /// Attach a blob reference to an I/O error that has none.
    pub fn at(self, reference: &str) -> Self {
        match self {
            Self::Io {
                reference: existing,
                message,
            } if existing.is_empty() => Self::Io {
                reference: reference.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<TransportError> for CodecError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound { reference } => Self::io(reference, "not found"),
            other => Self::corrupt(other.to_string()),
        }
    }
}
