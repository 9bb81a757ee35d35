//! Trait-based mask file codecs.
//!
//! Each physical mask format implements [`MaskCodec`]. The
//! [`MaskCodecRegistry`] picks a codec by file name, then by magic bytes.

use crate::model::VolumeGeometry;
use crate::segmentation::CodecError;
use crate::segmentation::codecs::{NiftiCodec, PngCodec};
use crate::segmentation::labels::LabelVolume;

/// A decoded mask file.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskImage {
    /// Label values.
    pub labels: LabelVolume,
    /// Voxel to world mapping, when the file format carries one.
    pub geometry: Option<VolumeGeometry>,
}

impl MaskImage {
    /// Wrap a label volume without geometry.
    pub fn new(labels: LabelVolume) -> Self {
        Self {
            labels,
            geometry: None,
        }
    }
}

/// Codec for one physical mask file format.
pub trait MaskCodec: Send + Sync {
    /// Unique identifier (e.g. "nifti", "png").
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// File name suffixes handled, lowercase without the leading dot.
    ///
    /// The first entry is used when naming new files.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether the bytes look like this format.
    fn can_decode(&self, data: &[u8]) -> bool;

    /// Decode a file into a label volume.
    fn decode(&self, data: &[u8]) -> Result<MaskImage, CodecError>;

    /// Encode a label volume.
    ///
    /// With `binary` set, every non-zero voxel is written as the format's
    /// "on" value instead of its label.
    fn encode(&self, image: &MaskImage, binary: bool) -> Result<Vec<u8>, CodecError>;

    /// Whether the format can hold more than one slice.
    fn supports_volumes(&self) -> bool;

    /// Detection priority (higher = tried first).
    fn priority(&self) -> i32 {
        0
    }

    /// Default file name suffix.
    fn default_extension(&self) -> &'static str {
        self.extensions().first().copied().unwrap_or("bin")
    }
}

/// Registry of available mask codecs.
pub struct MaskCodecRegistry {
    codecs: Vec<Box<dyn MaskCodec>>,
}

impl MaskCodecRegistry {
    /// Create a registry with the built-in codecs.
    pub fn new() -> Self {
        let mut registry = Self { codecs: Vec::new() };
        registry.register(Box::new(NiftiCodec));
        registry.register(Box::new(PngCodec));
        registry
    }

    /// Register a codec.
    pub fn register(&mut self, codec: Box<dyn MaskCodec>) {
        self.codecs.push(codec);
        self.codecs.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Codec by id.
    pub fn get(&self, id: &str) -> Option<&dyn MaskCodec> {
        self.codecs.iter().find(|c| c.id() == id).map(|c| c.as_ref())
    }

    /// Codec whose extension matches a file name or blob reference.
    pub fn for_reference(&self, reference: &str) -> Option<&dyn MaskCodec> {
        let name = reference
            .split(['?', '#'])
            .next()
            .unwrap_or(reference)
            .to_lowercase();
        self.codecs
            .iter()
            .find(|c| {
                c.extensions()
                    .iter()
                    .any(|ext| name.ends_with(&format!(".{ext}")))
            })
            .map(|c| c.as_ref())
    }

    /// Codec detected from magic bytes.
    fn detect(&self, data: &[u8]) -> Option<&dyn MaskCodec> {
        self.codecs
            .iter()
            .find(|c| c.can_decode(data))
            .map(|c| c.as_ref())
    }

    /// Decode a mask file, choosing the codec by name, then by content.
    ///
    /// Errors carry `reference` so callers can report which blob failed.
    pub fn decode(&self, data: &[u8], reference: &str) -> Result<MaskImage, CodecError> {
        let codec = self
            .detect(data)
            .or_else(|| self.for_reference(reference))
            .ok_or_else(|| CodecError::io(reference, "unrecognized mask file format"))?;

        let image = codec.decode(data).map_err(|e| e.at(reference))?;
        log::debug!(
            "Decoded '{}' with {} codec: shape {:?}",
            reference,
            codec.id(),
            image.labels.dim()
        );
        Ok(image)
    }

    /// All file suffixes handled by any codec.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .codecs
            .iter()
            .flat_map(|c| c.extensions().iter().copied())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    /// All registered codecs.
    pub fn codecs(&self) -> &[Box<dyn MaskCodec>] {
        &self.codecs
    }
}

impl Default for MaskCodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = MaskCodecRegistry::new();
        assert_eq!(registry.for_reference("seg/ct.nii.gz").unwrap().id(), "nifti");
        assert_eq!(registry.for_reference("CT.NII").unwrap().id(), "nifti");
        assert_eq!(
            registry.for_reference("https://host/mask.png?sig=abc").unwrap().id(),
            "png"
        );
        assert!(registry.for_reference("notes.txt").is_none());
        assert!(registry.supported_extensions().contains(&"nii.gz"));
    }

    #[test]
    fn test_decode_detects_by_content() {
        let registry = MaskCodecRegistry::new();
        let mut labels = LabelVolume::zeros((2, 2, 1));
        labels[[1, 0, 0]] = 3;
        let bytes = registry
            .get("png")
            .unwrap()
            .encode(&MaskImage::new(labels.clone()), false)
            .unwrap();

        // Misleading name, correct content.
        let decoded = registry.decode(&bytes, "mask.nii.gz").unwrap();
        assert_eq!(decoded.labels, labels);
    }

    #[test]
    fn test_unrecognized_bytes() {
        let registry = MaskCodecRegistry::new();
        let err = registry.decode(b"hello", "notes.txt").unwrap_err();
        assert!(matches!(err, CodecError::Io { reference, .. } if reference == "notes.txt"));
    }
}
