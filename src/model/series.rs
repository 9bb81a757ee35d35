//! Imaging series: items, segmentation references, and attached annotations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::model::annotation::{Annotation, AnnotationGroup, AnnotationKind};
use crate::model::category::{Attributes, CategoryRef};
use crate::model::error::{ModelError, SegmentMapMismatch};

/// Largest value a segment map key may take (16-bit label volumes).
pub const MAX_SEGMENT_VALUE: u32 = u16::MAX as u32;

/// File extensions of video containers.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "webm", "mkv"];

/// File extensions of single-frame raster images.
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Kind of imaging data a series holds, derived from its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKind {
    /// A single 2D image.
    Image2D,
    /// A video container or a sequence of frames.
    Video,
    /// A 3D volume (DICOM stack, NIfTI, ...).
    Volume3D,
}

impl SeriesKind {
    /// Infer the kind from the series item references.
    pub fn infer<S: AsRef<str>>(items: &[S]) -> Self {
        let extensions: Vec<String> = items.iter().map(|i| extension(i.as_ref())).collect();

        if extensions
            .iter()
            .any(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
        {
            return SeriesKind::Video;
        }

        let all_raster = !extensions.is_empty()
            && extensions
                .iter()
                .all(|e| RASTER_EXTENSIONS.contains(&e.as_str()));
        match (all_raster, extensions.len()) {
            (true, 1) => SeriesKind::Image2D,
            (true, _) => SeriesKind::Video,
            (false, _) => SeriesKind::Volume3D,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Image2D => write!(f, "2D image"),
            SeriesKind::Video => write!(f, "video"),
            SeriesKind::Volume3D => write!(f, "3D volume"),
        }
    }
}

/// Lowercased extension of a blob reference, ignoring query strings and `.gz`.
fn extension(reference: &str) -> String {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}

/// A single reference or an ordered list of references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// A single value.
    One(String),
    /// Several values, in order.
    Many(Vec<String>),
}

impl OneOrMany {
    /// All values as a slice.
    pub fn as_slice(&self) -> &[String] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Replace every value through `f`, keeping the one/many shape.
    pub fn map(&self, mut f: impl FnMut(&str) -> String) -> Self {
        match self {
            OneOrMany::One(value) => OneOrMany::One(f(value)),
            OneOrMany::Many(values) => OneOrMany::Many(values.iter().map(|v| f(v)).collect()),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<String> for OneOrMany {
    fn from(value: String) -> Self {
        OneOrMany::One(value)
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(values: Vec<String>) -> Self {
        OneOrMany::Many(values)
    }
}

/// Category and attributes attached to one segment value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProps {
    /// Category of the segment.
    pub category: CategoryRef,
    /// Per-instance attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Binary mask file(s) holding this segment, in binary mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<OneOrMany>,
}

/// One segment map entry: a bare category or full properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SegmentEntry {
    /// Just a category reference.
    Category(CategoryRef),
    /// Category with attributes and an optional mask reference.
    Props(SegmentProps),
}

impl SegmentEntry {
    /// Category of the segment.
    pub fn category(&self) -> &CategoryRef {
        match self {
            SegmentEntry::Category(category) => category,
            SegmentEntry::Props(props) => &props.category,
        }
    }

    /// Attributes of the segment, if any.
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            SegmentEntry::Category(_) => None,
            SegmentEntry::Props(props) => props.attributes.as_ref(),
        }
    }

    /// Binary mask reference(s), if declared.
    pub fn mask(&self) -> Option<&OneOrMany> {
        match self {
            SegmentEntry::Category(_) => None,
            SegmentEntry::Props(props) => props.mask.as_ref(),
        }
    }

    /// Declared binary mask references; empty when none are declared.
    pub fn masks(&self) -> &[String] {
        self.mask().map(OneOrMany::as_slice).unwrap_or_default()
    }

    /// Copy of this entry with the mask reference replaced.
    pub fn with_mask(&self, mask: Option<String>) -> Self {
        match (self, mask) {
            (SegmentEntry::Category(category), None) => SegmentEntry::Category(category.clone()),
            (SegmentEntry::Category(category), Some(mask)) => SegmentEntry::Props(SegmentProps {
                category: category.clone(),
                attributes: None,
                mask: Some(OneOrMany::from(mask)),
            }),
            (SegmentEntry::Props(props), mask) => SegmentEntry::Props(SegmentProps {
                mask: mask.map(OneOrMany::from),
                ..props.clone()
            }),
        }
    }
}

impl From<CategoryRef> for SegmentEntry {
    fn from(category: CategoryRef) -> Self {
        SegmentEntry::Category(category)
    }
}

/// Mapping from mask value (instance or category id) to its segment entry.
///
/// Serialized as a JSON object keyed by the decimal value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentMap(BTreeMap<u32, SegmentEntry>);

impl SegmentMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the previous one.
    pub fn insert(&mut self, value: u32, entry: impl Into<SegmentEntry>) -> Option<SegmentEntry> {
        self.0.insert(value, entry.into())
    }

    /// Entry for a mask value.
    pub fn get(&self, value: u32) -> Option<&SegmentEntry> {
        self.0.get(&value)
    }

    /// All mask values, ascending.
    pub fn values(&self) -> BTreeSet<u32> {
        self.0.keys().copied().collect()
    }

    /// Iterate entries in ascending value order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SegmentEntry)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove entries whose value was not observed, returning the removed values.
    pub fn prune(&mut self, observed: &BTreeSet<u32>) -> BTreeSet<u32> {
        let removed: BTreeSet<u32> = self
            .0
            .keys()
            .filter(|k| !observed.contains(k))
            .copied()
            .collect();
        self.0.retain(|k, _| observed.contains(k));
        removed
    }
}

impl SegmentMap {
    /// Compare the keys with the values observed in a mask.
    pub fn check_values(&self, observed: &BTreeSet<u32>) -> Result<(), SegmentMapMismatch> {
        let mapped = self.values();
        let missing_in_map: Vec<u32> = observed.difference(&mapped).copied().collect();
        let missing_in_mask: Vec<u32> = mapped.difference(observed).copied().collect();
        if missing_in_map.is_empty() && missing_in_mask.is_empty() {
            Ok(())
        } else {
            Err(SegmentMapMismatch {
                missing_in_map,
                missing_in_mask,
            })
        }
    }
}

impl FromIterator<(u32, SegmentEntry)> for SegmentMap {
    fn from_iter<I: IntoIterator<Item = (u32, SegmentEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Decoding strategy for a series' segmentation files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskMode {
    /// Values are arbitrary instance ids.
    Instance,
    /// Values are category class values.
    Semantic,
    /// One category per file; any non-zero voxel marks presence.
    Binary,
}

impl fmt::Display for MaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskMode::Instance => write!(f, "instance"),
            MaskMode::Semantic => write!(f, "semantic"),
            MaskMode::Binary => write!(f, "binary"),
        }
    }
}

/// Check that the map keys and the observed mask values are the same set.
pub fn validate_segment_map(
    series: &Series,
    decoded_values: &BTreeSet<u32>,
) -> Result<(), SegmentMapMismatch> {
    series
        .segment_map
        .as_ref()
        .map_or_else(SegmentMap::new, SegmentMap::clone)
        .check_values(decoded_values)
}

/// One imaging series and everything attached to it.
///
/// Annotations are kept in declared order: grouped by their JSON key in
/// [`AnnotationGroup::ALL`] order, array order within a group. That order is
/// what "later" means when shapes overlap in a rasterized mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Image, frame, or volume references.
    pub items: OneOrMany,
    /// Display name.
    pub name: Option<String>,
    /// Free-form string metadata.
    pub meta_data: Option<BTreeMap<String, String>>,
    /// Segmentation file references.
    pub segmentations: Option<OneOrMany>,
    /// Mask value to category mapping.
    pub segment_map: Option<SegmentMap>,
    /// Segmentations are one binary file per segment.
    pub binary_mask: Option<bool>,
    /// Segmentation values are category class values.
    pub semantic_mask: Option<bool>,
    /// Segmentations are stored as PNG.
    pub png_mask: Option<bool>,
    annotations: Vec<Annotation>,
}

impl Series {
    /// Create a series with the given items and nothing attached.
    pub fn new(items: impl Into<OneOrMany>) -> Self {
        Self {
            items: items.into(),
            name: None,
            meta_data: None,
            segmentations: None,
            segment_map: None,
            binary_mask: None,
            semantic_mask: None,
            png_mask: None,
            annotations: Vec::new(),
        }
    }

    /// Kind of this series, derived from its items.
    pub fn kind(&self) -> SeriesKind {
        SeriesKind::infer(self.items.as_slice())
    }

    /// Active decoding strategy: binary, then semantic, then instance.
    pub fn mask_mode(&self) -> MaskMode {
        if self.binary_mask.unwrap_or(false) {
            MaskMode::Binary
        } else if self.semantic_mask.unwrap_or(false) {
            MaskMode::Semantic
        } else {
            MaskMode::Instance
        }
    }

    /// Whether segmentations are stored as PNG.
    pub fn is_png_mask(&self) -> bool {
        self.png_mask.unwrap_or(false)
    }

    /// All annotations in declared order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Annotations of one variant, in declared order.
    pub fn annotations_of(&self, kind: AnnotationKind) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.kind() == kind)
    }

    /// Validate and append an annotation at the end of its group.
    pub fn push(&mut self, annotation: impl Into<Annotation>) -> Result<(), ModelError> {
        let annotation = annotation.into();
        let kind = annotation.kind();
        let index = self.annotations_of(kind).count();
        let annotation = annotation
            .validated()
            .map_err(|message| ModelError::malformed_annotation(kind, index, message))?;
        self.check_annotation(&annotation)?;

        let group = kind.group();
        let position = self
            .annotations
            .iter()
            .rposition(|a| a.kind().group() <= group)
            .map_or(0, |p| p + 1);
        self.annotations.insert(position, annotation);
        Ok(())
    }

    /// Remove every annotation, keeping items and segmentation fields.
    pub fn clear_annotations(&mut self) {
        self.annotations.clear();
    }

    /// Check every structural invariant of the series.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.items.is_empty() || self.items.as_slice().iter().any(|i| i.trim().is_empty()) {
            return Err(ModelError::malformed_task("series has no items"));
        }
        if let Some(segmentations) = &self.segmentations
            && segmentations.is_empty()
        {
            return Err(ModelError::malformed_task(
                "segmentations is present but empty",
            ));
        }
        if let Some(map) = &self.segment_map {
            for (value, entry) in map.iter() {
                if value == 0 || value > MAX_SEGMENT_VALUE {
                    return Err(ModelError::malformed_task(format!(
                        "segment map key {value} is outside 1..={MAX_SEGMENT_VALUE}"
                    )));
                }
                if entry.category().is_blank() {
                    return Err(ModelError::malformed_task(format!(
                        "segment map entry {value} has an empty category"
                    )));
                }
            }
        }
        for annotation in &self.annotations {
            self.check_annotation(annotation)?;
        }
        Ok(())
    }

    /// Check that an annotation may live in this series.
    fn check_annotation(&self, annotation: &Annotation) -> Result<(), ModelError> {
        let kind = annotation.kind();
        let series_kind = self.kind();
        if !kind.applies_to(series_kind) {
            return Err(ModelError::Inapplicable { kind, series_kind });
        }

        match (annotation.video(), series_kind) {
            (Some(_), other) if other != SeriesKind::Video => {
                return Err(ModelError::malformed_task(format!(
                    "{kind} annotation carries video metadata in a {series_kind} series"
                )));
            }
            (None, SeriesKind::Video) if kind.is_shape() => {
                return Err(ModelError::malformed_task(format!(
                    "{kind} annotation in a video series has no video metadata"
                )));
            }
            (Some(video), SeriesKind::Video) if self.items.len() > 1 => {
                if video.frame_index as usize >= self.items.len() {
                    return Err(ModelError::malformed_task(format!(
                        "{kind} annotation on frame {} of a {}-frame video",
                        video.frame_index,
                        self.items.len()
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Parse a series from its platform JSON object.
    pub fn from_value(value: &Value) -> Result<Self, ModelError> {
        let repr = SeriesRepr::deserialize(value)
            .map_err(|e| ModelError::malformed_task(format!("invalid series: {e}")))?;
        Self::from_repr(repr)
    }

    /// Serialize to the platform JSON object.
    pub fn to_value(&self) -> Result<Value, ModelError> {
        Ok(serde_json::to_value(self.to_repr()?)?)
    }

    pub(crate) fn from_repr(repr: SeriesRepr) -> Result<Self, ModelError> {
        let SeriesRepr {
            items,
            name,
            meta_data,
            segmentations,
            segment_map,
            binary_mask,
            semantic_mask,
            png_mask,
            groups,
        } = repr;

        let mut annotations = Vec::new();
        for group in AnnotationGroup::ALL {
            if let Some(values) = groups.get(group) {
                annotations.extend(group.parse(values)?);
            }
        }

        let series = Self {
            items,
            name,
            meta_data,
            segmentations,
            segment_map,
            binary_mask,
            semantic_mask,
            png_mask,
            annotations,
        };
        series.validate()?;
        Ok(series)
    }

    pub(crate) fn to_repr(&self) -> Result<SeriesRepr, serde_json::Error> {
        let mut groups = AnnotationArrays::default();
        for annotation in &self.annotations {
            groups
                .get_mut(annotation.kind().group())
                .get_or_insert_with(Vec::new)
                .push(annotation.to_value()?);
        }
        Ok(SeriesRepr {
            items: self.items.clone(),
            name: self.name.clone(),
            meta_data: self.meta_data.clone(),
            segmentations: self.segmentations.clone(),
            segment_map: self.segment_map.clone(),
            binary_mask: self.binary_mask,
            semantic_mask: self.semantic_mask,
            png_mask: self.png_mask,
            groups,
        })
    }
}

impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_repr()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = SeriesRepr::deserialize(deserializer)?;
        Series::from_repr(repr).map_err(serde::de::Error::custom)
    }
}

/// Wire form of a series, with annotation arrays left as raw JSON.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeriesRepr {
    items: OneOrMany,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segmentations: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segment_map: Option<SegmentMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary_mask: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    semantic_mask: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    png_mask: Option<bool>,
    #[serde(flatten)]
    groups: AnnotationArrays,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationArrays {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classifications: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_classifications: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    landmarks: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    landmarks3d: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    measurements: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ellipses: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bounding_boxes: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cuboids: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    polygons: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    polylines: Option<Vec<Value>>,
}

impl AnnotationArrays {
    fn get(&self, group: AnnotationGroup) -> Option<&Vec<Value>> {
        match group {
            AnnotationGroup::Classifications => self.classifications.as_ref(),
            AnnotationGroup::InstanceClassifications => self.instance_classifications.as_ref(),
            AnnotationGroup::Landmarks => self.landmarks.as_ref(),
            AnnotationGroup::Landmarks3D => self.landmarks3d.as_ref(),
            AnnotationGroup::Measurements => self.measurements.as_ref(),
            AnnotationGroup::Ellipses => self.ellipses.as_ref(),
            AnnotationGroup::BoundingBoxes => self.bounding_boxes.as_ref(),
            AnnotationGroup::Cuboids => self.cuboids.as_ref(),
            AnnotationGroup::Polygons => self.polygons.as_ref(),
            AnnotationGroup::Polylines => self.polylines.as_ref(),
        }
    }

    fn get_mut(&mut self, group: AnnotationGroup) -> &mut Option<Vec<Value>> {
        match group {
            AnnotationGroup::Classifications => &mut self.classifications,
            AnnotationGroup::InstanceClassifications => &mut self.instance_classifications,
            AnnotationGroup::Landmarks => &mut self.landmarks,
            AnnotationGroup::Landmarks3D => &mut self.landmarks3d,
            AnnotationGroup::Measurements => &mut self.measurements,
            AnnotationGroup::Ellipses => &mut self.ellipses,
            AnnotationGroup::BoundingBoxes => &mut self.bounding_boxes,
            AnnotationGroup::Cuboids => &mut self.cuboids,
            AnnotationGroup::Polygons => &mut self.polygons,
            AnnotationGroup::Polylines => &mut self.polylines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::annotation::{BoundingBox, Cuboid, Polygon, VideoMetaData};
    use crate::model::geometry::{Point2D, VolumeGeometry, VoxelPoint};
    use serde_json::json;

    fn bbox(x: f64) -> BoundingBox {
        BoundingBox::new(Point2D::new(x, 0.1), 0.2, 0.2, "car".into())
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(SeriesKind::infer(&["a/b/img.PNG"]), SeriesKind::Image2D);
        assert_eq!(SeriesKind::infer(&["f1.jpg", "f2.jpg"]), SeriesKind::Video);
        assert_eq!(SeriesKind::infer(&["clip.mp4?sig=1"]), SeriesKind::Video);
        assert_eq!(SeriesKind::infer(&["ct.nii.gz"]), SeriesKind::Volume3D);
        assert_eq!(SeriesKind::infer(&["1.dcm", "2.dcm"]), SeriesKind::Volume3D);
    }

    #[test]
    fn test_mask_mode_precedence() {
        let mut series = Series::new("ct.nii.gz");
        assert_eq!(series.mask_mode(), MaskMode::Instance);
        series.semantic_mask = Some(true);
        assert_eq!(series.mask_mode(), MaskMode::Semantic);
        series.binary_mask = Some(true);
        assert_eq!(series.mask_mode(), MaskMode::Binary);
    }

    #[test]
    fn test_push_keeps_declared_order() {
        let mut series = Series::new("image.png");
        let triangle = Polygon::new(
            vec![
                Point2D::new(0.1, 0.1),
                Point2D::new(0.5, 0.1),
                Point2D::new(0.3, 0.4),
            ],
            "lesion".into(),
        );
        series.push(triangle).unwrap();
        series.push(bbox(0.1)).unwrap();
        series.push(bbox(0.2)).unwrap();

        let kinds: Vec<_> = series.annotations().iter().map(Annotation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnnotationKind::BoundingBox,
                AnnotationKind::BoundingBox,
                AnnotationKind::Polygon
            ]
        );
        let Annotation::BoundingBox(second) = &series.annotations()[1] else {
            panic!("Expected bounding box");
        };
        assert_eq!(second.point_top_left.xnorm, 0.2);
    }

    #[test]
    fn test_inapplicable_variants_rejected() {
        let mut volume = Series::new("ct.nii.gz");
        let err = volume.push(bbox(0.1)).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Inapplicable {
                kind: AnnotationKind::BoundingBox,
                series_kind: SeriesKind::Volume3D
            }
        ));

        let cuboid = Cuboid::new(
            VoxelPoint::new(0, 0, 0),
            VoxelPoint::new(1, 1, 1),
            &VolumeGeometry::IDENTITY,
            "organ".into(),
        );
        assert!(volume.push(cuboid.clone()).is_ok());
        assert!(Series::new("image.png").push(cuboid.clone()).is_err());
        assert!(Series::new("clip.mp4").push(cuboid).is_err());
    }

    #[test]
    fn test_video_metadata_rules() {
        let mut image = Series::new("image.png");
        let mut on_frame = bbox(0.1);
        on_frame.video = Some(VideoMetaData::key_frame(0, "t1"));
        assert!(image.push(on_frame.clone()).is_err());

        let mut video = Series::new(vec!["f0.png".to_string(), "f1.png".to_string()]);
        assert!(video.push(bbox(0.1)).is_err());
        assert!(video.push(on_frame).is_ok());

        let mut past_end = bbox(0.1);
        past_end.video = Some(VideoMetaData::key_frame(2, "t1"));
        assert!(video.push(past_end).is_err());
    }

    #[test]
    fn test_parse_rejects_inapplicable_json() {
        let raw = json!({
            "items": "ct.nii.gz",
            "polygons": [{
                "points": [{"xNorm": 0.1, "yNorm": 0.1}, {"xNorm": 0.2, "yNorm": 0.1}, {"xNorm": 0.2, "yNorm": 0.2}],
                "category": "lesion"
            }]
        });
        assert!(matches!(
            Series::from_value(&raw),
            Err(ModelError::Inapplicable { .. })
        ));
    }

    #[test]
    fn test_segment_map_json() {
        let raw = json!({
            "items": "ct.nii.gz",
            "segmentations": "seg.nii.gz",
            "segmentMap": {
                "1": "liver",
                "2": {"category": ["organ", "tumor"], "attributes": {"malignant": true}}
            }
        });
        let series = Series::from_value(&raw).unwrap();
        let map = series.segment_map.as_ref().unwrap();
        assert_eq!(map.get(1).unwrap().category(), &CategoryRef::name("liver"));
        assert!(map.get(2).unwrap().attributes().is_some());
        assert_eq!(series.to_value().unwrap(), raw);

        let zero_key = json!({"items": "ct.nii.gz", "segmentMap": {"0": "liver"}});
        assert!(Series::from_value(&zero_key).is_err());
    }

    #[test]
    fn test_segment_entry_mask_list() {
        let raw = json!({
            "items": "ct.nii.gz",
            "segmentations": ["a.nii.gz", "b.nii.gz", "c.nii.gz"],
            "binaryMask": true,
            "segmentMap": {
                "1": {"category": "liver", "mask": ["a.nii.gz", "b.nii.gz"]},
                "2": {"category": "tumor", "mask": "c.nii.gz"}
            }
        });
        let series = Series::from_value(&raw).unwrap();
        let map = series.segment_map.as_ref().unwrap();
        assert_eq!(map.get(1).unwrap().masks(), ["a.nii.gz", "b.nii.gz"]);
        assert_eq!(map.get(2).unwrap().masks(), ["c.nii.gz"]);
        assert_eq!(series.to_value().unwrap(), raw);
    }

    #[test]
    fn test_validate_segment_map_both_directions() {
        let mut series = Series::new("ct.nii.gz");
        let mut map = SegmentMap::new();
        map.insert(1, CategoryRef::name("liver"));
        map.insert(2, CategoryRef::name("tumor"));
        series.segment_map = Some(map);

        assert!(validate_segment_map(&series, &BTreeSet::from([1, 2])).is_ok());

        let err = validate_segment_map(&series, &BTreeSet::from([1, 2, 3])).unwrap_err();
        assert_eq!(err.missing_in_map, vec![3]);
        assert!(err.missing_in_mask.is_empty());

        let err = validate_segment_map(&series, &BTreeSet::from([1])).unwrap_err();
        assert_eq!(err.missing_in_mask, vec![2]);
    }

    #[test]
    fn test_prune() {
        let mut map = SegmentMap::new();
        map.insert(1, CategoryRef::name("liver"));
        map.insert(2, CategoryRef::name("tumor"));
        let removed = map.prune(&BTreeSet::from([1]));
        assert_eq!(removed, BTreeSet::from([2]));
        assert_eq!(map.values(), BTreeSet::from([1]));
    }
}
