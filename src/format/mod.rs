//! Task format import/export system.
//!
//! Every format converts between a [`Dataset`] and an external
//! representation, taking the project taxonomy as an explicit parameter.
//! Lossy conversions never fail on what they cannot represent: dropped
//! annotations are reported as [`FormatWarning`]s on the result.
//!
//! ## Supported Formats
//!
//! - **Native**: task JSON with NIfTI sidecars, full fidelity
//! - **COCO JSON**: bounding boxes and polygons of 2D images and video frames
//! - **PNG masks**: task JSON with PNG masks, shapes rasterized
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rbtask::format::{ExportOptions, FormatRegistry};
//!
//! let registry = FormatRegistry::new();
//! let format = registry.get("coco").unwrap();
//! let result = format.export(&dataset, &taxonomy, path, &ExportOptions::default())?;
//! ```

mod dataset;
mod error;
pub mod formats;
mod registry;
mod traits;

pub use dataset::{Dataset, SeriesEntry, TaskEntry};
pub use error::FormatError;
pub use registry::FormatRegistry;
pub use traits::{
    ExportOptions, ExportResult, FormatWarning, ImportOptions, TaskFormat, WarningSeverity,
};
