//! rbtask - task annotation model and format conversion
//!
//! Parses the task JSON of a hosted medical-image annotation platform into a
//! typed model, validates it against the project taxonomy, decodes and
//! encodes segmentation masks (NIfTI and PNG), and converts tasks to and from
//! COCO, native JSON, and PNG mask trees.
//!
//! Network access is not part of the crate: blobs, tasks, and taxonomies come
//! through the [`transport`] traits.

pub mod batch;
pub mod config;
pub mod format;
pub mod model;
pub mod segmentation;
pub mod taxonomy;
pub mod transport;

pub use model::{Annotation, Series, Task};
pub use taxonomy::Taxonomy;
