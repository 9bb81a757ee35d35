//! Encoding label volumes into mask files plus a segment map.

use crate::model::{Dimensions, MaskMode, OneOrMany, SegmentMap, Series, VolumeGeometry};
use crate::segmentation::CodecError;
use crate::segmentation::codec::{MaskCodec, MaskImage};
use crate::segmentation::labels::{LabelVolume, distinct_values, label_dimensions};

/// One encoded mask file.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskFile {
    /// Suggested file name.
    pub name: String,
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Segment map key held by the file, in binary mode.
    pub value: Option<u32>,
}

/// Mask files and the segment map describing them.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSegmentation {
    /// Mode the files were written in.
    pub mode: MaskMode,
    /// Id of the codec that wrote the files.
    pub codec: &'static str,
    /// Files in series order.
    pub files: Vec<MaskFile>,
    /// Segment map; binary entries name their file.
    pub segment_map: SegmentMap,
}

impl EncodedSegmentation {
    /// Point a series at the stored files.
    ///
    /// `references` are the stored blob references, one per file in order.
    pub fn apply_to(&self, series: &mut Series, references: Vec<String>) -> Result<(), CodecError> {
        if references.len() != self.files.len() {
            return Err(CodecError::Unsupported(format!(
                "{} reference(s) for {} mask file(s)",
                references.len(),
                self.files.len()
            )));
        }

        let mut segment_map = self.segment_map.clone();
        if self.mode == MaskMode::Binary {
            segment_map = self
                .segment_map
                .iter()
                .map(|(value, entry)| {
                    let reference = self
                        .files
                        .iter()
                        .position(|f| f.value == Some(value))
                        .map(|index| references[index].clone());
                    (value, entry.with_mask(reference))
                })
                .collect();
        }

        series.segmentations = Some(match references.len() {
            1 => OneOrMany::from(references[0].clone()),
            _ => OneOrMany::from(references),
        });
        series.segment_map = Some(segment_map);
        series.binary_mask = (self.mode == MaskMode::Binary).then_some(true);
        series.semantic_mask = (self.mode == MaskMode::Semantic).then_some(true);
        series.png_mask = (self.codec == "png").then_some(true);
        Ok(())
    }
}

/// Encode a label volume whose values are exactly the keys of `segment_map`.
///
/// Instance and semantic modes write one file. Binary mode writes one file per
/// entry, holding only that entry's voxels.
pub fn encode_segmentation(
    labels: &LabelVolume,
    segment_map: &SegmentMap,
    mode: MaskMode,
    codec: &dyn MaskCodec,
    geometry: Option<VolumeGeometry>,
) -> Result<EncodedSegmentation, CodecError> {
    let dims = label_dimensions(labels);
    if !codec.supports_volumes() && !dims.is_planar() {
        return Err(CodecError::ShapeMismatch {
            expected: Dimensions::image(dims.width, dims.height),
            actual: dims,
        });
    }

    segment_map.check_values(&distinct_values(labels))?;

    let extension = codec.default_extension();
    let files = match mode {
        MaskMode::Instance | MaskMode::Semantic => {
            let image = MaskImage {
                labels: labels.clone(),
                geometry,
            };
            vec![MaskFile {
                name: format!("instances.{extension}"),
                data: codec.encode(&image, false)?,
                value: None,
            }]
        }
        MaskMode::Binary => segment_map
            .iter()
            .map(|(value, _)| {
                let image = MaskImage {
                    labels: labels.mapv(|v| u16::from(u32::from(v) == value)),
                    geometry,
                };
                Ok(MaskFile {
                    name: format!("instance-{value}.{extension}"),
                    data: codec.encode(&image, true)?,
                    value: Some(value),
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?,
    };

    let segment_map = match mode {
        MaskMode::Binary => segment_map
            .iter()
            .map(|(value, entry)| {
                let name = format!("instance-{value}.{extension}");
                (value, entry.with_mask(Some(name)))
            })
            .collect(),
        _ => segment_map.clone(),
    };

    log::debug!(
        "Encoded {} {} segment(s) into {} {} file(s)",
        segment_map.len(),
        mode,
        files.len(),
        codec.id()
    );
    Ok(EncodedSegmentation {
        mode,
        codec: codec.id(),
        files,
        segment_map,
    })
}
