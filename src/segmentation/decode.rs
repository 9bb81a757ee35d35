//! Decoding a series' mask files into one checked label volume.

use std::collections::BTreeSet;
use std::io::Cursor;

use ndarray::Zip;

use crate::model::{
    Attributes, CategoryRef, Dimensions, MaskMode, SegmentEntry, SegmentMap, SegmentMapMismatch,
    SegmentProps, Series, SeriesKind, VolumeGeometry, VoxelPoint,
};
use crate::segmentation::CodecError;
use crate::segmentation::codec::{MaskCodecRegistry, MaskImage};
use crate::segmentation::labels::{
    LabelVolume, ValueStats, distinct_values, label_dimensions, merge_into, retain_values,
    value_stats,
};
use crate::transport::BlobStore;

/// One segment found in a decoded mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Value in the merged label volume.
    pub value: u32,
    /// Category from the segment map.
    pub category: CategoryRef,
    /// Attributes from the segment map.
    pub attributes: Option<Attributes>,
    /// Number of voxels holding the value.
    pub voxel_count: usize,
    /// Inclusive bounding box `(min, max)`.
    pub bounds: (VoxelPoint, VoxelPoint),
}

impl Segment {
    fn new(value: u32, entry: &SegmentEntry, stats: &ValueStats) -> Self {
        Self {
            value,
            category: entry.category().clone(),
            attributes: entry.attributes().cloned(),
            voxel_count: stats.count,
            bounds: (stats.min, stats.max),
        }
    }
}

/// Label volume and segments decoded from a series.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegmentation {
    /// Merged label volume. In binary mode each segment's voxels carry its
    /// segment map key.
    pub labels: LabelVolume,
    /// Mode the files were read in.
    pub mode: MaskMode,
    /// Geometry of the first file, if its format stores one.
    pub geometry: Option<VolumeGeometry>,
    /// Segments in ascending value order.
    pub segments: Vec<Segment>,
}

impl DecodedSegmentation {
    /// Dimensions of the label volume.
    pub fn dimensions(&self) -> Dimensions {
        label_dimensions(&self.labels)
    }

    /// Values of every segment.
    pub fn values(&self) -> BTreeSet<u32> {
        self.segments.iter().map(|s| s.value).collect()
    }

    /// Segment holding a value.
    pub fn segment(&self, value: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.value == value)
    }

    /// Segment map describing the decoded segments, without file references.
    pub fn segment_map(&self) -> SegmentMap {
        self.segments
            .iter()
            .map(|s| {
                let entry = match &s.attributes {
                    Some(attributes) => SegmentEntry::Props(SegmentProps {
                        category: s.category.clone(),
                        attributes: Some(attributes.clone()),
                        mask: None,
                    }),
                    None => SegmentEntry::Category(s.category.clone()),
                };
                (s.value, entry)
            })
            .collect()
    }
}

/// Outcome of [`repair_segmentation`].
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    /// Decoded segmentation after repair.
    pub decoded: DecodedSegmentation,
    /// The series' segment map with unobserved entries removed. Mask
    /// references of binary entries are kept.
    pub segment_map: SegmentMap,
    /// What was removed: mask values cleared for lack of an entry, and
    /// entries dropped for lack of voxels.
    pub removed: SegmentMapMismatch,
}

impl Repaired {
    /// Whether anything had to be removed.
    pub fn changed(&self) -> bool {
        !self.removed.missing_in_map.is_empty() || !self.removed.missing_in_mask.is_empty()
    }
}

/// Fetch, decode, and check every segmentation file of a series.
///
/// Returns `Ok(None)` when the series has no segmentations. With `expected`
/// set, every file must have exactly those dimensions; otherwise all files
/// must agree with the first one.
pub fn decode_segmentation(
    series: &Series,
    store: &dyn BlobStore,
    registry: &MaskCodecRegistry,
    expected: Option<Dimensions>,
) -> Result<Option<DecodedSegmentation>, CodecError> {
    Ok(decode_with(series, store, registry, expected, false)?.map(|r| r.decoded))
}

/// Like [`decode_segmentation`], but drops segment map entries with no voxels
/// and clears voxels with no entry instead of failing.
pub fn repair_segmentation(
    series: &Series,
    store: &dyn BlobStore,
    registry: &MaskCodecRegistry,
    expected: Option<Dimensions>,
) -> Result<Option<Repaired>, CodecError> {
    let repaired = decode_with(series, store, registry, expected, true)?;
    if let Some(r) = &repaired
        && r.changed()
    {
        log::warn!(
            "Repaired segment map: cleared mask values {:?}, dropped entries {:?}",
            r.removed.missing_in_map,
            r.removed.missing_in_mask
        );
    }
    Ok(repaired)
}

/// Pixel dimensions of a 2D image or frame-sequence series, read from the
/// header of its first item.
///
/// Volumes and single-file videos give `Ok(None)`: their size is only known
/// from their own containers.
pub fn item_dimensions(
    series: &Series,
    store: &dyn BlobStore,
) -> Result<Option<Dimensions>, CodecError> {
    let items = series.items.as_slice();
    let depth = match series.kind() {
        SeriesKind::Image2D => 1,
        SeriesKind::Video if items.len() > 1 => items.len(),
        _ => return Ok(None),
    };
    let Some(first) = items.first() else {
        return Ok(None);
    };

    let data = store
        .fetch_blob(first)
        .map_err(|e| CodecError::from(e).at(first))?;
    let (width, height) = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| CodecError::io(first.as_str(), e.to_string()))?
        .into_dimensions()
        .map_err(|e| CodecError::io(first.as_str(), e.to_string()))?;
    Ok(Some(Dimensions::volume(width as usize, height as usize, depth)))
}

fn decode_with(
    series: &Series,
    store: &dyn BlobStore,
    registry: &MaskCodecRegistry,
    expected: Option<Dimensions>,
    repair: bool,
) -> Result<Option<Repaired>, CodecError> {
    let Some(references) = series.segmentations.as_ref().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let references = references.as_slice();

    let mut images: Vec<MaskImage> = Vec::with_capacity(references.len());
    for reference in references {
        let data = store
            .fetch_blob(reference)
            .map_err(|e| CodecError::from(e).at(reference))?;
        let image = registry.decode(&data, reference)?;

        let actual = label_dimensions(&image.labels);
        let wanted = expected.unwrap_or_else(|| {
            images
                .first()
                .map(|first| label_dimensions(&first.labels))
                .unwrap_or(actual)
        });
        if actual != wanted {
            return Err(CodecError::ShapeMismatch {
                expected: wanted,
                actual,
            });
        }
        images.push(image);
    }

    let mode = series.mask_mode();
    let map = series.segment_map.clone().unwrap_or_default();
    let repaired = match mode {
        MaskMode::Instance | MaskMode::Semantic => decode_merged(map, images, mode, repair)?,
        MaskMode::Binary => decode_binary(map, references, &images, repair)?,
    };

    log::debug!(
        "Decoded {} {} mask file(s): {} segment(s) in {}",
        references.len(),
        mode,
        repaired.decoded.segments.len(),
        repaired.decoded.dimensions()
    );
    Ok(Some(repaired))
}

/// Instance and semantic modes: merge files in order, then compare values.
fn decode_merged(
    mut map: SegmentMap,
    images: Vec<MaskImage>,
    mode: MaskMode,
    repair: bool,
) -> Result<Repaired, CodecError> {
    let mut layers = images.into_iter();
    let Some(first) = layers.next() else {
        return Err(CodecError::Unsupported("no mask files".into()));
    };
    let geometry = first.geometry;
    let mut labels = first.labels;
    for layer in layers {
        merge_into(&mut labels, &layer.labels);
    }

    let removed = if repair {
        let missing_in_mask = map.prune(&distinct_values(&labels));
        let missing_in_map = retain_values(&mut labels, &map.values());
        SegmentMapMismatch {
            missing_in_map: missing_in_map.into_iter().collect(),
            missing_in_mask: missing_in_mask.into_iter().collect(),
        }
    } else {
        map.check_values(&distinct_values(&labels))?;
        SegmentMapMismatch::default()
    };

    let segments = value_stats(&labels)
        .iter()
        .filter_map(|(&value, stats)| map.get(value).map(|entry| Segment::new(value, entry, stats)))
        .collect();

    Ok(Repaired {
        decoded: DecodedSegmentation {
            labels,
            mode,
            geometry,
            segments,
        },
        segment_map: map,
        removed,
    })
}

/// Binary mode: each segment map entry owns one or more files.
///
/// Files no entry owns are still read; any content in them is reported as
/// values missing from the map.
fn decode_binary(
    mut map: SegmentMap,
    references: &[String],
    images: &[MaskImage],
    repair: bool,
) -> Result<Repaired, CodecError> {
    let pairs = binary_pairs(&map, references)?;

    let shape = images
        .first()
        .map(|i| i.labels.dim())
        .unwrap_or((0, 0, 0));
    let geometry = images.first().and_then(|i| i.geometry);
    let mut labels = LabelVolume::zeros(shape);
    let mut segments = Vec::with_capacity(pairs.len());
    let mut missing_in_mask = Vec::new();
    let mut owned = vec![false; images.len()];

    for (value, files) in pairs {
        let mut presence = LabelVolume::zeros(shape);
        for index in files {
            owned[index] = true;
            Zip::from(&mut presence)
                .and(&images[index].labels)
                .for_each(|p, &v| {
                    if v != 0 {
                        *p = 1;
                    }
                });
        }
        let Some(stats) = value_stats(&presence).remove(&1) else {
            missing_in_mask.push(value);
            continue;
        };
        // Keys are bounded by MAX_SEGMENT_VALUE when the series validates.
        let label = u16::try_from(value)
            .map_err(|_| CodecError::Unsupported(format!("segment value {value}")))?;
        Zip::from(&mut labels).and(&presence).for_each(|l, &p| {
            if p != 0 {
                *l = label;
            }
        });
        if let Some(entry) = map.get(value) {
            segments.push(Segment::new(value, entry, &stats));
        }
    }

    let unowned: BTreeSet<u32> = images
        .iter()
        .zip(&owned)
        .filter(|(_, owned)| !**owned)
        .flat_map(|(image, _)| distinct_values(&image.labels))
        .collect();
    let missing_in_map: Vec<u32> = unowned.into_iter().collect();

    if !missing_in_map.is_empty() || !missing_in_mask.is_empty() {
        if !repair {
            return Err(SegmentMapMismatch {
                missing_in_map,
                missing_in_mask,
            }
            .into());
        }
        let present: BTreeSet<u32> = segments.iter().map(|s: &Segment| s.value).collect();
        map.prune(&present);
    }

    Ok(Repaired {
        decoded: DecodedSegmentation {
            labels,
            mode: MaskMode::Binary,
            geometry,
            segments,
        },
        segment_map: map,
        removed: SegmentMapMismatch {
            missing_in_map,
            missing_in_mask,
        },
    })
}

/// Pair segment map keys with the positions of their files.
///
/// When every entry names its mask file(s) they are matched by reference.
/// Otherwise keys in ascending order pair with files in listed order; keys
/// past the last file get no file.
fn binary_pairs(
    map: &SegmentMap,
    references: &[String],
) -> Result<Vec<(u32, Vec<usize>)>, CodecError> {
    let every_entry_named = !map.is_empty() && map.iter().all(|(_, e)| !e.masks().is_empty());
    if !every_entry_named {
        return Ok(map
            .values()
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let files = if index < references.len() {
                    vec![index]
                } else {
                    Vec::new()
                };
                (value, files)
            })
            .collect());
    }

    map.iter()
        .map(|(value, entry)| {
            let files = entry
                .masks()
                .iter()
                .map(|mask| {
                    references
                        .iter()
                        .position(|r| r == mask || r.ends_with(&format!("/{mask}")))
                        .ok_or_else(|| {
                            CodecError::io(
                                mask.as_str(),
                                format!("segment {value} names a file not in the series"),
                            )
                        })
                })
                .collect::<Result<Vec<usize>, CodecError>>()?;
            Ok((value, files))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OneOrMany;
    use crate::segmentation::codec::MaskCodec;
    use crate::segmentation::codecs::{NiftiCodec, PngCodec};
    use crate::transport::MemoryStore;

    fn liver_tumor_series(reference: &str) -> Series {
        let mut series = Series::new(vec!["ct/0001.dcm".to_string(), "ct/0002.dcm".to_string()]);
        series.segmentations = Some(OneOrMany::from(reference));
        let mut map = SegmentMap::new();
        map.insert(1, CategoryRef::name("liver"));
        map.insert(2, CategoryRef::name("tumor"));
        series.segment_map = Some(map);
        series
    }

    fn nifti_with(values: &[(usize, usize, usize, u16)]) -> Vec<u8> {
        let mut labels = LabelVolume::zeros((4, 4, 2));
        for &(i, j, k, v) in values {
            labels[[i, j, k]] = v;
        }
        NiftiCodec.encode(&MaskImage::new(labels), false).unwrap()
    }

    #[test]
    fn test_liver_and_tumor_decode() {
        let store = MemoryStore::new();
        store
            .insert_blob("seg.nii.gz", nifti_with(&[(0, 0, 0, 1), (1, 0, 0, 1), (3, 3, 1, 2)]))
            .unwrap();
        let series = liver_tumor_series("seg.nii.gz");

        let decoded = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.segments.len(), 2);
        assert_eq!(decoded.segment(1).unwrap().voxel_count, 2);
        assert_eq!(decoded.segment(2).unwrap().category, CategoryRef::name("tumor"));
        assert_eq!(
            decoded.segment(2).unwrap().bounds,
            (VoxelPoint::new(3, 3, 1), VoxelPoint::new(3, 3, 1))
        );
        assert_eq!(decoded.dimensions(), Dimensions::volume(4, 4, 2));
    }

    #[test]
    fn test_value_missing_from_map() {
        let store = MemoryStore::new();
        store
            .insert_blob("seg.nii.gz", nifti_with(&[(0, 0, 0, 1), (1, 1, 0, 2), (2, 2, 0, 3)]))
            .unwrap();
        let series = liver_tumor_series("seg.nii.gz");

        let err = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None).unwrap_err();
        match err {
            CodecError::SegmentMapMismatch(mismatch) => {
                assert_eq!(mismatch.missing_in_map, vec![3]);
                assert!(mismatch.missing_in_mask.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_entry_missing_from_mask() {
        let store = MemoryStore::new();
        store
            .insert_blob("seg.nii.gz", nifti_with(&[(0, 0, 0, 1)]))
            .unwrap();
        let series = liver_tumor_series("seg.nii.gz");

        let err = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SegmentMapMismatch(SegmentMapMismatch { ref missing_in_mask, .. })
                if missing_in_mask == &vec![2]
        ));
    }

    #[test]
    fn test_later_file_wins_on_overlap() {
        let store = MemoryStore::new();
        store
            .insert_blob("a.nii.gz", nifti_with(&[(0, 0, 0, 1), (1, 0, 0, 1)]))
            .unwrap();
        store
            .insert_blob("b.nii.gz", nifti_with(&[(1, 0, 0, 2)]))
            .unwrap();
        let mut series = liver_tumor_series("a.nii.gz");
        series.segmentations = Some(OneOrMany::from(vec![
            "a.nii.gz".to_string(),
            "b.nii.gz".to_string(),
        ]));

        let decoded = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.labels[[0, 0, 0]], 1);
        assert_eq!(decoded.labels[[1, 0, 0]], 2);
    }

    #[test]
    fn test_binary_files_pair_with_sorted_keys() {
        let store = MemoryStore::new();
        let mut first = LabelVolume::zeros((3, 2, 1));
        first[[0, 0, 0]] = 255;
        let mut second = LabelVolume::zeros((3, 2, 1));
        second[[2, 1, 0]] = 255;
        store
            .insert_blob("m1.png", PngCodec.encode(&MaskImage::new(first), true).unwrap())
            .unwrap();
        store
            .insert_blob("m2.png", PngCodec.encode(&MaskImage::new(second), true).unwrap())
            .unwrap();

        let mut series = Series::new("photo.png");
        series.segmentations = Some(OneOrMany::from(vec!["m1.png".to_string(), "m2.png".to_string()]));
        series.binary_mask = Some(true);
        series.png_mask = Some(true);
        let mut map = SegmentMap::new();
        map.insert(5, CategoryRef::name("cat"));
        map.insert(9, CategoryRef::name("dog"));
        series.segment_map = Some(map);

        let decoded = decode_segmentation(
            &series,
            &store,
            &MaskCodecRegistry::new(),
            Some(Dimensions::image(3, 2)),
        )
        .unwrap()
        .unwrap();
        assert_eq!(decoded.mode, MaskMode::Binary);
        assert_eq!(decoded.labels[[0, 0, 0]], 5);
        assert_eq!(decoded.labels[[2, 1, 0]], 9);
        assert_eq!(decoded.values(), BTreeSet::from([5, 9]));
    }

    #[test]
    fn test_empty_binary_file_is_missing_in_mask() {
        let store = MemoryStore::new();
        let blank = LabelVolume::zeros((2, 2, 1));
        store
            .insert_blob("m.png", PngCodec.encode(&MaskImage::new(blank), true).unwrap())
            .unwrap();
        let mut series = Series::new("photo.png");
        series.segmentations = Some(OneOrMany::from("m.png"));
        series.binary_mask = Some(true);
        series.segment_map = Some(SegmentMap::from_iter([(
            1,
            SegmentEntry::Category(CategoryRef::name("cat")),
        )]));

        let err = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None).unwrap_err();
        assert!(matches!(err, CodecError::SegmentMapMismatch(_)));
    }

    /// Binary PNG masks with one lit pixel each, at `(i, 0)`.
    fn binary_png_series(store: &MemoryStore, names: &[&str]) -> Series {
        for (i, name) in names.iter().enumerate() {
            let mut layer = LabelVolume::zeros((4, 2, 1));
            layer[[i, 0, 0]] = 255;
            store
                .insert_blob(*name, PngCodec.encode(&MaskImage::new(layer), true).unwrap())
                .unwrap();
        }
        let mut series = Series::new("photo.png");
        series.segmentations = Some(OneOrMany::from(
            names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
        ));
        series.binary_mask = Some(true);
        series.png_mask = Some(true);
        series
    }

    fn named_entry(category: &str, masks: &[&str]) -> SegmentEntry {
        SegmentEntry::Props(SegmentProps {
            category: CategoryRef::name(category),
            attributes: None,
            mask: Some(OneOrMany::from(
                masks.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
            )),
        })
    }

    #[test]
    fn test_binary_file_without_entry_is_missing_in_map() {
        let store = MemoryStore::new();
        let mut series = binary_png_series(&store, &["a.png", "b.png"]);
        series.segment_map = Some(SegmentMap::from_iter([(1, named_entry("cat", &["a.png"]))]));

        let err = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None).unwrap_err();
        match err {
            CodecError::SegmentMapMismatch(mismatch) => {
                assert_eq!(mismatch.missing_in_map, vec![255]);
                assert!(mismatch.missing_in_mask.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }

        let repaired = repair_segmentation(&series, &store, &MaskCodecRegistry::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(repaired.removed.missing_in_map, vec![255]);
        assert_eq!(repaired.decoded.values(), BTreeSet::from([1]));
        assert_eq!(repaired.decoded.labels[[1, 0, 0]], 0);
    }

    #[test]
    fn test_binary_files_with_empty_map() {
        let store = MemoryStore::new();
        let mut series = binary_png_series(&store, &["a.png"]);
        series.segment_map = Some(SegmentMap::new());

        let err = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SegmentMapMismatch(SegmentMapMismatch { ref missing_in_map, .. })
                if missing_in_map == &vec![255]
        ));
    }

    #[test]
    fn test_binary_entry_with_several_files() {
        let store = MemoryStore::new();
        let mut series = binary_png_series(&store, &["a.png", "b.png", "c.png"]);
        series.segment_map = Some(SegmentMap::from_iter([
            (1, named_entry("cat", &["a.png", "c.png"])),
            (2, named_entry("dog", &["b.png"])),
        ]));

        let decoded = decode_segmentation(&series, &store, &MaskCodecRegistry::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.labels[[0, 0, 0]], 1);
        assert_eq!(decoded.labels[[1, 0, 0]], 2);
        assert_eq!(decoded.labels[[2, 0, 0]], 1);
        assert_eq!(decoded.segment(1).unwrap().voxel_count, 2);
    }

    #[test]
    fn test_shape_and_missing_blob_errors() {
        let store = MemoryStore::new();
        store
            .insert_blob("seg.nii.gz", nifti_with(&[(0, 0, 0, 1), (3, 3, 1, 2)]))
            .unwrap();
        let series = liver_tumor_series("seg.nii.gz");
        let registry = MaskCodecRegistry::new();

        let err = decode_segmentation(&series, &store, &registry, Some(Dimensions::volume(4, 4, 3)))
            .unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));

        let missing = liver_tumor_series("absent.nii.gz");
        let err = decode_segmentation(&missing, &store, &registry, None).unwrap_err();
        assert!(matches!(err, CodecError::Io { ref reference, .. } if reference == "absent.nii.gz"));

        let bare = Series::new("photo.png");
        assert!(decode_segmentation(&bare, &store, &registry, None).unwrap().is_none());
    }

    #[test]
    fn test_repair_drops_both_sides() {
        let store = MemoryStore::new();
        store
            .insert_blob("seg.nii.gz", nifti_with(&[(0, 0, 0, 1), (2, 2, 0, 3)]))
            .unwrap();
        let series = liver_tumor_series("seg.nii.gz");

        let repaired = repair_segmentation(&series, &store, &MaskCodecRegistry::new(), None)
            .unwrap()
            .unwrap();
        assert!(repaired.changed());
        assert_eq!(repaired.removed.missing_in_map, vec![3]);
        assert_eq!(repaired.removed.missing_in_mask, vec![2]);
        assert_eq!(repaired.segment_map.values(), BTreeSet::from([1]));
        assert_eq!(repaired.decoded.labels[[2, 2, 0]], 0);
        assert_eq!(repaired.decoded.values(), BTreeSet::from([1]));
    }
}
