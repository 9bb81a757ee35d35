//! Built-in mask codecs.

mod nifti;
mod png;

pub use nifti::NiftiCodec;
pub use png::PngCodec;
