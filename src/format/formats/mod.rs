//! Task format implementations.

mod coco;
mod native;
mod png_masks;
mod tree;

#[cfg(test)]
mod tests;

pub use coco::CocoFormat;
pub use native::NativeFormat;
pub use png_masks::{CLASS_MAP_FILE, PngMaskFormat};
pub use tree::{MANIFEST_FILE, SEGMENTATIONS_DIR, TASKS_FILE};
