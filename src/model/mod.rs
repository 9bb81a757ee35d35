//! Task data model: geometry, annotation variants, series, and tasks.
//!
//! Raw platform JSON is parsed into these types at the boundary and validated
//! immediately; nothing downstream works on untyped maps.

mod annotation;
mod category;
mod error;
mod geometry;
mod series;
mod task;

pub use annotation::{
    Annotation, AnnotationGroup, AnnotationKind, BoundingBox, Classification, Cuboid, Ellipse,
    InstanceClassification, Landmarks, Landmarks3D, MIN_POLYGON_POINTS, MIN_POLYLINE_POINTS,
    MeasureAngle, MeasureLength, MeasurementStats, Polygon, Polyline, VideoMetaData,
};
pub use category::{AttributeValue, Attributes, CategoryRef, PATH_SEPARATOR};
pub use error::{ModelError, SegmentMapMismatch};
pub use geometry::{
    Dimensions, NORM_TOLERANCE, Point2D, VolumeGeometry, VoxelPoint, WorldPoint,
};
pub use series::{
    MAX_SEGMENT_VALUE, MaskMode, OneOrMany, SegmentEntry, SegmentMap, SegmentProps, Series,
    SeriesKind, validate_segment_map,
};
pub use task::{ConsensusScore, Task};
