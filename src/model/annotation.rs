//! Annotation variants and their validation.
//!
//! Each variant is an immutable value object. Raw JSON is parsed into the typed
//! structs at the boundary, validated (required fields, normalized ranges), and
//! only then wrapped in [`Annotation`]. Serialization is the structural inverse
//! of parsing, so `parse(serialize(x)) == x` holds for every valid value.

use std::fmt;

use serde::de::{self, DeserializeOwned, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::category::{Attributes, CategoryRef};
use crate::model::error::ModelError;
use crate::model::geometry::{
    Point2D, VolumeGeometry, VoxelPoint, WorldPoint, check_non_negative, check_norm, cross, dot,
    norm, normalize,
};
use crate::model::series::SeriesKind;

/// Minimum number of points in a polygon.
pub const MIN_POLYGON_POINTS: usize = 3;

/// Minimum number of points in a polyline.
pub const MIN_POLYLINE_POINTS: usize = 2;

/// The closed set of annotation variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationKind {
    /// Whole-series classification.
    Classification,
    /// Per-file (frame or slice) classification.
    InstanceClassification,
    /// 2D point.
    Landmarks,
    /// 3D voxel point.
    Landmarks3D,
    /// Distance between two voxels.
    MeasureLength,
    /// Angle formed by three voxels.
    MeasureAngle,
    /// Rotated ellipse.
    Ellipse,
    /// Axis-aligned 2D box.
    BoundingBox,
    /// Axis-aligned 3D box.
    Cuboid,
    /// Closed 2D outline.
    Polygon,
    /// Open 2D path.
    Polyline,
}

impl AnnotationKind {
    /// Every variant, in declared (serialization) order.
    pub const ALL: [AnnotationKind; 11] = [
        AnnotationKind::Classification,
        AnnotationKind::InstanceClassification,
        AnnotationKind::Landmarks,
        AnnotationKind::Landmarks3D,
        AnnotationKind::MeasureLength,
        AnnotationKind::MeasureAngle,
        AnnotationKind::Ellipse,
        AnnotationKind::BoundingBox,
        AnnotationKind::Cuboid,
        AnnotationKind::Polygon,
        AnnotationKind::Polyline,
    ];

    /// Display name for messages.
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationKind::Classification => "Classification",
            AnnotationKind::InstanceClassification => "InstanceClassification",
            AnnotationKind::Landmarks => "Landmarks",
            AnnotationKind::Landmarks3D => "Landmarks3D",
            AnnotationKind::MeasureLength => "MeasureLength",
            AnnotationKind::MeasureAngle => "MeasureAngle",
            AnnotationKind::Ellipse => "Ellipse",
            AnnotationKind::BoundingBox => "BoundingBox",
            AnnotationKind::Cuboid => "Cuboid",
            AnnotationKind::Polygon => "Polygon",
            AnnotationKind::Polyline => "Polyline",
        }
    }

    /// Series JSON key holding this variant.
    pub fn json_key(&self) -> &'static str {
        self.group().json_key()
    }

    /// Group (series JSON array) this variant is stored in.
    pub fn group(&self) -> AnnotationGroup {
        match self {
            AnnotationKind::Classification => AnnotationGroup::Classifications,
            AnnotationKind::InstanceClassification => AnnotationGroup::InstanceClassifications,
            AnnotationKind::Landmarks => AnnotationGroup::Landmarks,
            AnnotationKind::Landmarks3D => AnnotationGroup::Landmarks3D,
            AnnotationKind::MeasureLength | AnnotationKind::MeasureAngle => {
                AnnotationGroup::Measurements
            }
            AnnotationKind::Ellipse => AnnotationGroup::Ellipses,
            AnnotationKind::BoundingBox => AnnotationGroup::BoundingBoxes,
            AnnotationKind::Cuboid => AnnotationGroup::Cuboids,
            AnnotationKind::Polygon => AnnotationGroup::Polygons,
            AnnotationKind::Polyline => AnnotationGroup::Polylines,
        }
    }

    /// Whether this variant may appear in a series of the given kind.
    pub fn applies_to(&self, series: SeriesKind) -> bool {
        use AnnotationKind::*;
        match self {
            Classification => true,
            InstanceClassification => matches!(series, SeriesKind::Video | SeriesKind::Volume3D),
            Landmarks | Ellipse | BoundingBox | Polygon | Polyline => {
                matches!(series, SeriesKind::Image2D | SeriesKind::Video)
            }
            Landmarks3D | MeasureLength | MeasureAngle | Cuboid => series == SeriesKind::Volume3D,
        }
    }

    /// Whether this variant carries optional per-video metadata.
    pub fn supports_video(&self) -> bool {
        use AnnotationKind::*;
        matches!(
            self,
            Classification | Landmarks | Ellipse | BoundingBox | Polygon | Polyline
        )
    }

    /// Whether the variant is a located shape (everything but classifications).
    pub fn is_shape(&self) -> bool {
        !matches!(
            self,
            AnnotationKind::Classification | AnnotationKind::InstanceClassification
        )
    }

    /// Whether the variant encloses area and can be rasterized into a mask.
    pub fn is_rasterizable(&self) -> bool {
        matches!(
            self,
            AnnotationKind::BoundingBox
                | AnnotationKind::Polygon
                | AnnotationKind::Ellipse
                | AnnotationKind::Cuboid
        )
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Series-level JSON arrays, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationGroup {
    /// `classifications`
    Classifications,
    /// `instanceClassifications`
    InstanceClassifications,
    /// `landmarks`
    Landmarks,
    /// `landmarks3d`
    Landmarks3D,
    /// `measurements` (lengths and angles, discriminated by `type`)
    Measurements,
    /// `ellipses`
    Ellipses,
    /// `boundingBoxes`
    BoundingBoxes,
    /// `cuboids`
    Cuboids,
    /// `polygons`
    Polygons,
    /// `polylines`
    Polylines,
}

impl AnnotationGroup {
    /// Every group, in declared order.
    pub const ALL: [AnnotationGroup; 10] = [
        AnnotationGroup::Classifications,
        AnnotationGroup::InstanceClassifications,
        AnnotationGroup::Landmarks,
        AnnotationGroup::Landmarks3D,
        AnnotationGroup::Measurements,
        AnnotationGroup::Ellipses,
        AnnotationGroup::BoundingBoxes,
        AnnotationGroup::Cuboids,
        AnnotationGroup::Polygons,
        AnnotationGroup::Polylines,
    ];

    /// JSON key of this group within a series object.
    pub fn json_key(&self) -> &'static str {
        match self {
            AnnotationGroup::Classifications => "classifications",
            AnnotationGroup::InstanceClassifications => "instanceClassifications",
            AnnotationGroup::Landmarks => "landmarks",
            AnnotationGroup::Landmarks3D => "landmarks3d",
            AnnotationGroup::Measurements => "measurements",
            AnnotationGroup::Ellipses => "ellipses",
            AnnotationGroup::BoundingBoxes => "boundingBoxes",
            AnnotationGroup::Cuboids => "cuboids",
            AnnotationGroup::Polygons => "polygons",
            AnnotationGroup::Polylines => "polylines",
        }
    }

    /// Parse every element of this group's JSON array.
    pub(crate) fn parse(&self, values: &[Value]) -> Result<Vec<Annotation>, ModelError> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| self.parse_one(value, index))
            .collect()
    }

    fn parse_one(&self, value: &Value, index: usize) -> Result<Annotation, ModelError> {
        let annotation = match self {
            AnnotationGroup::Classifications => {
                Annotation::Classification(parse_as(AnnotationKind::Classification, value, index)?)
            }
            AnnotationGroup::InstanceClassifications => Annotation::InstanceClassification(
                parse_as(AnnotationKind::InstanceClassification, value, index)?,
            ),
            AnnotationGroup::Landmarks => {
                Annotation::Landmarks(parse_as(AnnotationKind::Landmarks, value, index)?)
            }
            AnnotationGroup::Landmarks3D => {
                Annotation::Landmarks3D(parse_as(AnnotationKind::Landmarks3D, value, index)?)
            }
            AnnotationGroup::Measurements => {
                let kind = match value.get("type").and_then(Value::as_str) {
                    Some("length") => AnnotationKind::MeasureLength,
                    Some("angle") => AnnotationKind::MeasureAngle,
                    Some(other) => {
                        return Err(ModelError::malformed_annotation(
                            AnnotationKind::MeasureLength,
                            index,
                            format!("unknown measurement type '{other}'"),
                        ));
                    }
                    None => {
                        return Err(ModelError::malformed_annotation(
                            AnnotationKind::MeasureLength,
                            index,
                            "measurement has no `type`",
                        ));
                    }
                };
                match parse_as::<MeasurementRepr>(kind, value, index)? {
                    MeasurementRepr::Length(length) => Annotation::MeasureLength(length),
                    MeasurementRepr::Angle(angle) => Annotation::MeasureAngle(angle),
                }
            }
            AnnotationGroup::Ellipses => {
                Annotation::Ellipse(parse_as(AnnotationKind::Ellipse, value, index)?)
            }
            AnnotationGroup::BoundingBoxes => {
                Annotation::BoundingBox(parse_as(AnnotationKind::BoundingBox, value, index)?)
            }
            AnnotationGroup::Cuboids => {
                Annotation::Cuboid(parse_as(AnnotationKind::Cuboid, value, index)?)
            }
            AnnotationGroup::Polygons => {
                Annotation::Polygon(parse_as(AnnotationKind::Polygon, value, index)?)
            }
            AnnotationGroup::Polylines => {
                Annotation::Polyline(parse_as(AnnotationKind::Polyline, value, index)?)
            }
        };

        let kind = annotation.kind();
        annotation
            .validated()
            .map_err(|message| ModelError::malformed_annotation(kind, index, message))
    }
}

fn parse_as<T: DeserializeOwned>(
    kind: AnnotationKind,
    value: &Value,
    index: usize,
) -> Result<T, ModelError> {
    T::deserialize(value)
        .map_err(|e| ModelError::malformed_annotation(kind, index, e.to_string()))
}

/// Frame and track information for an annotation in a video series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetaData {
    /// Frame the annotation sits on.
    pub frame_index: u32,
    /// Identifier shared by every frame of one tracked object.
    pub track_id: String,
    /// Whether the frame is a user-placed key frame (vs interpolated).
    #[serde(default, deserialize_with = "flag")]
    pub key_frame: bool,
    /// Whether the track ends at this frame.
    #[serde(default, deserialize_with = "flag")]
    pub end_track: bool,
}

/// A boolean written as `true`/`false` or as `1`/`0`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(de::Error::invalid_value(
            Unexpected::Signed(other),
            &"a boolean, 0 or 1",
        )),
    }
}

impl VideoMetaData {
    /// Metadata for a key frame of a track.
    pub fn key_frame(frame_index: u32, track_id: impl Into<String>) -> Self {
        Self {
            frame_index,
            track_id: track_id.into(),
            key_frame: true,
            end_track: false,
        }
    }
}

/// Measurement statistics computed by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStats {
    /// Mean intensity.
    pub average: f64,
    /// Area in mm², for planar shapes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    /// Volume in mm³, for volumetric shapes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Minimum intensity.
    pub minimum: f64,
    /// Maximum intensity.
    pub maximum: f64,
}

/// Study or series classification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Optional category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryRef>,
    /// Classification attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Frame information for per-frame classifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

/// Classification of a single file (frame or slice) within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceClassification {
    /// Index of the classified file in the series' items.
    pub file_index: u32,
    /// Name of the classified file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attribute values for the file.
    pub values: Attributes,
}

/// 2D point label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    /// Location of the point.
    pub point: Point2D,
    /// Category of the point.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional frame information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

/// 3D point label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks3D {
    /// Location of the point.
    pub point: VoxelPoint,
    /// Category of the point.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

/// Length measurement between two voxels.
///
/// The world-space fields are computed once from a [`VolumeGeometry`] in
/// [`MeasureLength::new`] and carried as-is afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureLength {
    /// Start voxel.
    pub point1: VoxelPoint,
    /// End voxel.
    pub point2: VoxelPoint,
    /// World position of `point1`.
    pub absolute_point1: WorldPoint,
    /// World position of `point2`.
    pub absolute_point2: WorldPoint,
    /// Normal of the plane the measurement was drawn on.
    pub normal: [f64; 3],
    /// Distance in world units.
    pub length: f64,
    /// Category of the measurement.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl MeasureLength {
    /// Build a length measurement, deriving world-space fields from `geometry`.
    pub fn new(
        point1: VoxelPoint,
        point2: VoxelPoint,
        geometry: &VolumeGeometry,
        category: CategoryRef,
    ) -> Self {
        let absolute_point1 = geometry.to_world(&point1);
        let absolute_point2 = geometry.to_world(&point2);
        Self {
            point1,
            point2,
            absolute_point1,
            absolute_point2,
            normal: geometry.slice_normal(),
            length: absolute_point1.distance(&absolute_point2),
            category,
            attributes: None,
        }
    }
}

/// Angle measurement at a vertex voxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureAngle {
    /// First arm end voxel.
    pub point1: VoxelPoint,
    /// Vertex voxel.
    pub vertex: VoxelPoint,
    /// Second arm end voxel.
    pub point2: VoxelPoint,
    /// World position of `point1`.
    pub absolute_point1: WorldPoint,
    /// World position of `vertex`.
    pub absolute_vertex: WorldPoint,
    /// World position of `point2`.
    pub absolute_point2: WorldPoint,
    /// Normal of the plane spanned by the two arms.
    pub normal: [f64; 3],
    /// Angle in degrees, in `[0, 180]`.
    pub angle: f64,
    /// Category of the measurement.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl MeasureAngle {
    /// Build an angle measurement, deriving world-space fields from `geometry`.
    ///
    /// The normal is the unit cross product of the two arms; for collinear
    /// arms the slice normal of `geometry` is used instead.
    pub fn new(
        point1: VoxelPoint,
        vertex: VoxelPoint,
        point2: VoxelPoint,
        geometry: &VolumeGeometry,
        category: CategoryRef,
    ) -> Self {
        let absolute_point1 = geometry.to_world(&point1);
        let absolute_vertex = geometry.to_world(&vertex);
        let absolute_point2 = geometry.to_world(&point2);

        let arm1 = absolute_vertex.to(&absolute_point1);
        let arm2 = absolute_vertex.to(&absolute_point2);
        let lengths = norm(arm1) * norm(arm2);
        let angle = if lengths > f64::EPSILON {
            (dot(arm1, arm2) / lengths).clamp(-1.0, 1.0).acos().to_degrees()
        } else {
            0.0
        };
        let normal = normalize(cross(arm1, arm2)).unwrap_or_else(|| geometry.slice_normal());

        Self {
            point1,
            vertex,
            point2,
            absolute_point1,
            absolute_vertex,
            absolute_point2,
            normal,
            angle,
            category,
            attributes: None,
        }
    }
}

/// Wire form of the `measurements` array, discriminated by `type`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum MeasurementRepr {
    #[serde(rename = "length")]
    Length(MeasureLength),
    #[serde(rename = "angle")]
    Angle(MeasureAngle),
}

/// Rotated ellipse label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ellipse {
    /// Centre of the ellipse.
    pub point_center: Point2D,
    /// Horizontal radius as a fraction of image width.
    pub x_radius_norm: f64,
    /// Vertical radius as a fraction of image height.
    pub y_radius_norm: f64,
    /// Counter-clockwise rotation in radians.
    pub rotation_rad: f64,
    /// Category of the ellipse.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MeasurementStats>,
    /// Optional frame information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

/// Axis-aligned 2D box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Top-left corner.
    pub point_top_left: Point2D,
    /// Width as a fraction of image width.
    pub w_norm: f64,
    /// Height as a fraction of image height.
    pub h_norm: f64,
    /// Category of the box.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MeasurementStats>,
    /// Optional frame information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

impl BoundingBox {
    /// Create a box with only the required fields set.
    pub fn new(point_top_left: Point2D, w_norm: f64, h_norm: f64, category: CategoryRef) -> Self {
        Self {
            point_top_left,
            w_norm,
            h_norm,
            category,
            attributes: None,
            stats: None,
            video: None,
        }
    }

    /// Box as `[x, y, width, height]` in pixels of an image of the given size.
    pub fn to_pixels(&self, width: usize, height: usize) -> [f64; 4] {
        let (x, y) = self.point_top_left.to_pixels(width, height);
        [x, y, self.w_norm * width as f64, self.h_norm * height as f64]
    }
}

/// Axis-aligned 3D box between two voxel corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cuboid {
    /// First corner.
    pub point1: VoxelPoint,
    /// Opposite corner.
    pub point2: VoxelPoint,
    /// World position of `point1`.
    pub absolute_point1: WorldPoint,
    /// World position of `point2`.
    pub absolute_point2: WorldPoint,
    /// Category of the cuboid.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MeasurementStats>,
}

impl Cuboid {
    /// Build a cuboid, deriving world-space corners from `geometry`.
    pub fn new(
        point1: VoxelPoint,
        point2: VoxelPoint,
        geometry: &VolumeGeometry,
        category: CategoryRef,
    ) -> Self {
        Self {
            point1,
            point2,
            absolute_point1: geometry.to_world(&point1),
            absolute_point2: geometry.to_world(&point2),
            category,
            attributes: None,
            stats: None,
        }
    }

    /// Inclusive voxel ranges `(min, max)` along each axis.
    pub fn voxel_bounds(&self) -> [(u32, u32); 3] {
        let (a, b) = (self.point1, self.point2);
        [
            (a.i.min(b.i), a.i.max(b.i)),
            (a.j.min(b.j), a.j.max(b.j)),
            (a.k.min(b.k), a.k.max(b.k)),
        ]
    }
}

/// Closed 2D outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Vertices in drawing order; the outline closes implicitly.
    pub points: Vec<Point2D>,
    /// Category of the polygon.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MeasurementStats>,
    /// Optional frame information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

impl Polygon {
    /// Create a polygon with only the required fields set.
    pub fn new(points: Vec<Point2D>, category: CategoryRef) -> Self {
        Self {
            points,
            category,
            attributes: None,
            stats: None,
            video: None,
        }
    }
}

/// Open 2D path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    /// Vertices in drawing order.
    pub points: Vec<Point2D>,
    /// Category of the polyline.
    pub category: CategoryRef,
    /// Optional attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Optional frame information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMetaData>,
}

/// A single annotation of any variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Whole-series classification.
    Classification(Classification),
    /// Per-file classification.
    InstanceClassification(InstanceClassification),
    /// 2D point.
    Landmarks(Landmarks),
    /// 3D point.
    Landmarks3D(Landmarks3D),
    /// Length measurement.
    MeasureLength(MeasureLength),
    /// Angle measurement.
    MeasureAngle(MeasureAngle),
    /// Ellipse.
    Ellipse(Ellipse),
    /// Bounding box.
    BoundingBox(BoundingBox),
    /// Cuboid.
    Cuboid(Cuboid),
    /// Polygon.
    Polygon(Polygon),
    /// Polyline.
    Polyline(Polyline),
}

impl Annotation {
    /// Variant of this annotation.
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Classification(_) => AnnotationKind::Classification,
            Annotation::InstanceClassification(_) => AnnotationKind::InstanceClassification,
            Annotation::Landmarks(_) => AnnotationKind::Landmarks,
            Annotation::Landmarks3D(_) => AnnotationKind::Landmarks3D,
            Annotation::MeasureLength(_) => AnnotationKind::MeasureLength,
            Annotation::MeasureAngle(_) => AnnotationKind::MeasureAngle,
            Annotation::Ellipse(_) => AnnotationKind::Ellipse,
            Annotation::BoundingBox(_) => AnnotationKind::BoundingBox,
            Annotation::Cuboid(_) => AnnotationKind::Cuboid,
            Annotation::Polygon(_) => AnnotationKind::Polygon,
            Annotation::Polyline(_) => AnnotationKind::Polyline,
        }
    }

    /// Category reference, if the variant has one.
    pub fn category(&self) -> Option<&CategoryRef> {
        match self {
            Annotation::Classification(a) => a.category.as_ref(),
            Annotation::InstanceClassification(_) => None,
            Annotation::Landmarks(a) => Some(&a.category),
            Annotation::Landmarks3D(a) => Some(&a.category),
            Annotation::MeasureLength(a) => Some(&a.category),
            Annotation::MeasureAngle(a) => Some(&a.category),
            Annotation::Ellipse(a) => Some(&a.category),
            Annotation::BoundingBox(a) => Some(&a.category),
            Annotation::Cuboid(a) => Some(&a.category),
            Annotation::Polygon(a) => Some(&a.category),
            Annotation::Polyline(a) => Some(&a.category),
        }
    }

    /// Attributes set on the annotation.
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Annotation::Classification(a) => a.attributes.as_ref(),
            Annotation::InstanceClassification(a) => Some(&a.values),
            Annotation::Landmarks(a) => a.attributes.as_ref(),
            Annotation::Landmarks3D(a) => a.attributes.as_ref(),
            Annotation::MeasureLength(a) => a.attributes.as_ref(),
            Annotation::MeasureAngle(a) => a.attributes.as_ref(),
            Annotation::Ellipse(a) => a.attributes.as_ref(),
            Annotation::BoundingBox(a) => a.attributes.as_ref(),
            Annotation::Cuboid(a) => a.attributes.as_ref(),
            Annotation::Polygon(a) => a.attributes.as_ref(),
            Annotation::Polyline(a) => a.attributes.as_ref(),
        }
    }

    /// Per-video metadata, if present.
    pub fn video(&self) -> Option<&VideoMetaData> {
        match self {
            Annotation::Classification(a) => a.video.as_ref(),
            Annotation::Landmarks(a) => a.video.as_ref(),
            Annotation::Ellipse(a) => a.video.as_ref(),
            Annotation::BoundingBox(a) => a.video.as_ref(),
            Annotation::Polygon(a) => a.video.as_ref(),
            Annotation::Polyline(a) => a.video.as_ref(),
            Annotation::InstanceClassification(_)
            | Annotation::Landmarks3D(_)
            | Annotation::MeasureLength(_)
            | Annotation::MeasureAngle(_)
            | Annotation::Cuboid(_) => None,
        }
    }

    /// Measurement statistics, if present.
    pub fn stats(&self) -> Option<&MeasurementStats> {
        match self {
            Annotation::Ellipse(a) => a.stats.as_ref(),
            Annotation::BoundingBox(a) => a.stats.as_ref(),
            Annotation::Cuboid(a) => a.stats.as_ref(),
            Annotation::Polygon(a) => a.stats.as_ref(),
            _ => None,
        }
    }

    /// Serialize to the platform's JSON object form.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Annotation::Classification(a) => serde_json::to_value(a),
            Annotation::InstanceClassification(a) => serde_json::to_value(a),
            Annotation::Landmarks(a) => serde_json::to_value(a),
            Annotation::Landmarks3D(a) => serde_json::to_value(a),
            Annotation::MeasureLength(a) => {
                serde_json::to_value(MeasurementRepr::Length(a.clone()))
            }
            Annotation::MeasureAngle(a) => serde_json::to_value(MeasurementRepr::Angle(a.clone())),
            Annotation::Ellipse(a) => serde_json::to_value(a),
            Annotation::BoundingBox(a) => serde_json::to_value(a),
            Annotation::Cuboid(a) => serde_json::to_value(a),
            Annotation::Polygon(a) => serde_json::to_value(a),
            Annotation::Polyline(a) => serde_json::to_value(a),
        }
    }

    /// Validate required fields and ranges, normalizing float noise.
    ///
    /// Returns the (possibly clamped) annotation, or a message describing the
    /// first violation.
    pub fn validated(self) -> Result<Self, String> {
        if let Some(category) = self.category()
            && category.is_blank()
        {
            return Err("category is empty".into());
        }

        Ok(match self {
            Annotation::Classification(a) => Annotation::Classification(a),
            Annotation::InstanceClassification(a) => Annotation::InstanceClassification(a),
            Annotation::Landmarks(mut a) => {
                a.point = a.point.validated("point")?;
                Annotation::Landmarks(a)
            }
            Annotation::Landmarks3D(a) => Annotation::Landmarks3D(a),
            Annotation::MeasureLength(mut a) => {
                a.length = check_non_negative(a.length, "length")?;
                check_normal(&a.normal)?;
                Annotation::MeasureLength(a)
            }
            Annotation::MeasureAngle(mut a) => {
                a.angle = check_non_negative(a.angle, "angle")?;
                if a.angle > 180.0 + 1e-6 {
                    return Err(format!("angle = {} exceeds 180 degrees", a.angle));
                }
                check_normal(&a.normal)?;
                Annotation::MeasureAngle(a)
            }
            Annotation::Ellipse(mut a) => {
                a.point_center = a.point_center.validated("pointCenter")?;
                a.x_radius_norm = check_non_negative(a.x_radius_norm, "xRadiusNorm")?;
                a.y_radius_norm = check_non_negative(a.y_radius_norm, "yRadiusNorm")?;
                if !a.rotation_rad.is_finite() {
                    return Err("rotationRad is not a finite number".into());
                }
                Annotation::Ellipse(a)
            }
            Annotation::BoundingBox(mut a) => {
                a.point_top_left = a.point_top_left.validated("pointTopLeft")?;
                a.w_norm = check_norm(a.w_norm, "wNorm")?;
                a.h_norm = check_norm(a.h_norm, "hNorm")?;
                check_norm(a.point_top_left.xnorm + a.w_norm, "pointTopLeft.xNorm + wNorm")?;
                check_norm(a.point_top_left.ynorm + a.h_norm, "pointTopLeft.yNorm + hNorm")?;
                Annotation::BoundingBox(a)
            }
            Annotation::Cuboid(a) => Annotation::Cuboid(a),
            Annotation::Polygon(mut a) => {
                if a.points.len() < MIN_POLYGON_POINTS {
                    return Err(format!(
                        "polygon needs at least {MIN_POLYGON_POINTS} points, found {}",
                        a.points.len()
                    ));
                }
                a.points = validate_points(a.points)?;
                Annotation::Polygon(a)
            }
            Annotation::Polyline(mut a) => {
                if a.points.len() < MIN_POLYLINE_POINTS {
                    return Err(format!(
                        "polyline needs at least {MIN_POLYLINE_POINTS} points, found {}",
                        a.points.len()
                    ));
                }
                a.points = validate_points(a.points)?;
                Annotation::Polyline(a)
            }
        })
    }
}

fn validate_points(points: Vec<Point2D>) -> Result<Vec<Point2D>, String> {
    points
        .into_iter()
        .enumerate()
        .map(|(i, p)| p.validated(&format!("points[{i}]")))
        .collect()
}

fn check_normal(normal: &[f64; 3]) -> Result<(), String> {
    if normal.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err("normal contains a non-finite component".into())
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Annotation {
                fn from(value: $variant) -> Self {
                    Annotation::$variant(value)
                }
            }
        )*
    };
}

impl_from_variant!(
    Classification,
    InstanceClassification,
    Landmarks,
    Landmarks3D,
    MeasureLength,
    MeasureAngle,
    Ellipse,
    BoundingBox,
    Cuboid,
    Polygon,
    Polyline,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(group: AnnotationGroup, value: Value) -> Result<Annotation, ModelError> {
        group.parse(&[value]).map(|mut v| v.remove(0))
    }

    #[test]
    fn test_bounding_box_parse() {
        let ann = parse(
            AnnotationGroup::BoundingBoxes,
            json!({
                "pointTopLeft": {"xNorm": 0.1, "yNorm": 0.1},
                "wNorm": 0.2,
                "hNorm": 0.2,
                "category": "car"
            }),
        )
        .unwrap();

        let Annotation::BoundingBox(bbox) = &ann else {
            panic!("Expected bounding box");
        };
        assert_eq!(bbox.category, CategoryRef::name("car"));
        assert_eq!(bbox.to_pixels(1000, 800), [100.0, 80.0, 200.0, 160.0]);
        assert!(bbox.attributes.is_none());
    }

    #[test]
    fn test_video_flags_accept_integers() {
        let numeric: VideoMetaData = serde_json::from_value(json!({
            "frameIndex": 4, "trackId": "t1", "keyFrame": 1, "endTrack": 0
        }))
        .unwrap();
        assert!(numeric.key_frame);
        assert!(!numeric.end_track);

        let boolean: VideoMetaData = serde_json::from_value(json!({
            "frameIndex": 4, "trackId": "t1", "keyFrame": true
        }))
        .unwrap();
        assert_eq!(boolean, VideoMetaData::key_frame(4, "t1"));

        let err = serde_json::from_value::<VideoMetaData>(json!({
            "frameIndex": 4, "trackId": "t1", "keyFrame": 2
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let err = parse(
            AnnotationGroup::BoundingBoxes,
            json!({"pointTopLeft": {"xNorm": 0.1, "yNorm": 0.1}, "wNorm": 0.2, "category": "car"}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::MalformedAnnotation {
                kind: AnnotationKind::BoundingBox,
                index: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_is_malformed() {
        let err = parse(
            AnnotationGroup::Landmarks,
            json!({"point": {"xNorm": 1.5, "yNorm": 0.1}, "category": "tip"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));

        let err = parse(
            AnnotationGroup::Ellipses,
            json!({
                "pointCenter": {"xNorm": 0.5, "yNorm": 0.5},
                "xRadiusNorm": -0.1,
                "yRadiusNorm": 0.1,
                "rotationRad": 0.0,
                "category": "cell"
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_box_overflowing_image_is_malformed() {
        let result = parse(
            AnnotationGroup::BoundingBoxes,
            json!({
                "pointTopLeft": {"xNorm": 0.9, "yNorm": 0.1},
                "wNorm": 0.2,
                "hNorm": 0.2,
                "category": "car"
            }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_polygon_point_count() {
        let result = parse(
            AnnotationGroup::Polygons,
            json!({
                "points": [{"xNorm": 0.1, "yNorm": 0.1}, {"xNorm": 0.2, "yNorm": 0.2}],
                "category": "lesion"
            }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_measurements_discriminated_by_type() {
        let geometry = VolumeGeometry::IDENTITY;
        let length = MeasureLength::new(
            VoxelPoint::new(0, 0, 0),
            VoxelPoint::new(3, 4, 0),
            &geometry,
            "diameter".into(),
        );
        let value = Annotation::from(length.clone()).to_value().unwrap();
        assert_eq!(value["type"], "length");
        assert_eq!(value["length"], 5.0);

        let parsed = parse(AnnotationGroup::Measurements, value).unwrap();
        assert_eq!(parsed, Annotation::MeasureLength(length));

        let unknown = parse(AnnotationGroup::Measurements, json!({"type": "area"}));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_measure_angle_geometry() {
        let angle = MeasureAngle::new(
            VoxelPoint::new(1, 0, 0),
            VoxelPoint::new(0, 0, 0),
            VoxelPoint::new(0, 1, 0),
            &VolumeGeometry::IDENTITY,
            "angle".into(),
        );
        assert!((angle.angle - 90.0).abs() < 1e-9);
        assert_eq!(angle.normal, [0.0, 0.0, 1.0]);

        let collinear = MeasureAngle::new(
            VoxelPoint::new(1, 0, 0),
            VoxelPoint::new(0, 0, 0),
            VoxelPoint::new(2, 0, 0),
            &VolumeGeometry::IDENTITY,
            "angle".into(),
        );
        assert!(collinear.angle.abs() < 1e-9);
        assert_eq!(collinear.normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_round_trip_optional_fields() {
        let mut polygon = Polygon::new(
            vec![
                Point2D::new(0.1, 0.1),
                Point2D::new(0.5, 0.1),
                Point2D::new(0.3, 0.4),
            ],
            CategoryRef::path(["organ", "liver"]),
        );
        let bare = Annotation::from(polygon.clone());
        let parsed = parse(AnnotationGroup::Polygons, bare.to_value().unwrap()).unwrap();
        assert_eq!(parsed, bare);

        polygon.attributes = Some(Attributes::new());
        polygon.video = Some(VideoMetaData::key_frame(3, "track-1"));
        polygon.stats = Some(MeasurementStats {
            average: 1.0,
            area: Some(2.0),
            volume: None,
            minimum: 0.0,
            maximum: 4.0,
        });
        let full = Annotation::from(polygon);
        let parsed = parse(AnnotationGroup::Polygons, full.to_value().unwrap()).unwrap();
        assert_eq!(parsed, full);
        assert_ne!(parsed, bare);
    }

    #[test]
    fn test_applicability_table() {
        assert!(AnnotationKind::Cuboid.applies_to(SeriesKind::Volume3D));
        assert!(!AnnotationKind::Cuboid.applies_to(SeriesKind::Image2D));
        assert!(!AnnotationKind::Cuboid.applies_to(SeriesKind::Video));
        assert!(AnnotationKind::Polygon.applies_to(SeriesKind::Image2D));
        assert!(AnnotationKind::Polygon.applies_to(SeriesKind::Video));
        assert!(!AnnotationKind::Polygon.applies_to(SeriesKind::Volume3D));
        for kind in AnnotationKind::ALL {
            if kind == AnnotationKind::Classification {
                assert!(
                    [SeriesKind::Image2D, SeriesKind::Video, SeriesKind::Volume3D]
                        .iter()
                        .all(|s| kind.applies_to(*s))
                );
            }
        }
    }
}
