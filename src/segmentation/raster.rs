//! Rasterizing shape annotations into a label volume.
//!
//! Pixel `(x, y)` is inside a shape when its centre `(x + 0.5, y + 0.5)` is.
//! Boxes are half-open so adjacent boxes never share a pixel. Shapes are drawn
//! in the series' declared order and later shapes overwrite earlier ones.

use crate::model::{
    Annotation, CategoryRef, Dimensions, MIN_POLYGON_POINTS, MaskMode, SegmentEntry, SegmentMap,
    SegmentProps, Series, SeriesKind,
};
use crate::segmentation::CodecError;
use crate::segmentation::labels::{LabelVolume, distinct_values};
use crate::taxonomy::Taxonomy;

/// Result of rasterizing a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Rasterized {
    /// Drawn label volume.
    pub labels: LabelVolume,
    /// Segment map covering exactly the values left in `labels`.
    pub segment_map: SegmentMap,
    /// Shapes that were skipped or left no visible pixels.
    pub warnings: Vec<String>,
}

/// Region of one plane, in pixel coordinates.
enum Region {
    Rect { x: f64, y: f64, w: f64, h: f64 },
    Polygon(Vec<(f64, f64)>),
    Ellipse { cx: f64, cy: f64, rx: f64, ry: f64, rotation: f64 },
}

impl Region {
    fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Region::Rect { x: left, y: top, w, h } => {
                x >= *left && x < left + w && y >= *top && y < top + h
            }
            Region::Polygon(vertices) => {
                // Ray casting
                if vertices.len() < MIN_POLYGON_POINTS {
                    return false;
                }
                let mut inside = false;
                let mut j = vertices.len() - 1;
                for i in 0..vertices.len() {
                    let (xi, yi) = vertices[i];
                    let (xj, yj) = vertices[j];
                    if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
            Region::Ellipse { cx, cy, rx, ry, rotation } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return false;
                }
                let (dx, dy) = (x - cx, y - cy);
                let (sin, cos) = rotation.sin_cos();
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                (u / rx).powi(2) + (v / ry).powi(2) <= 1.0
            }
        }
    }

    /// `(min_x, min_y, max_x, max_y)` enclosing the region.
    fn extent(&self) -> (f64, f64, f64, f64) {
        match self {
            Region::Rect { x, y, w, h } => (*x, *y, x + w, y + h),
            Region::Polygon(vertices) => vertices.iter().fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            ),
            Region::Ellipse { cx, cy, rx, ry, .. } => {
                let r = rx.max(*ry);
                (cx - r, cy - r, cx + r, cy + r)
            }
        }
    }
}

/// Where a shape lands in the volume.
enum Footprint {
    Planar { frame: usize, region: Region },
    Block([(u32, u32); 3]),
}

/// Build the footprint of a shape, or `None` for variants that enclose no area.
fn footprint(annotation: &Annotation, kind: SeriesKind, dims: Dimensions) -> Option<Footprint> {
    let (width, height) = (dims.width, dims.height);
    let frame = match (kind, annotation.video()) {
        (SeriesKind::Video, Some(video)) => video.frame_index as usize,
        _ => 0,
    };
    let region = match annotation {
        Annotation::BoundingBox(bbox) => {
            let [x, y, w, h] = bbox.to_pixels(width, height);
            Region::Rect { x, y, w, h }
        }
        Annotation::Polygon(polygon) => Region::Polygon(
            polygon
                .points
                .iter()
                .map(|p| p.to_pixels(width, height))
                .collect(),
        ),
        Annotation::Ellipse(ellipse) => {
            let (cx, cy) = ellipse.point_center.to_pixels(width, height);
            Region::Ellipse {
                cx,
                cy,
                rx: ellipse.x_radius_norm * width as f64,
                ry: ellipse.y_radius_norm * height as f64,
                rotation: ellipse.rotation_rad,
            }
        }
        Annotation::Cuboid(cuboid) => return Some(Footprint::Block(cuboid.voxel_bounds())),
        _ => return None,
    };
    Some(Footprint::Planar { frame, region })
}

/// Paint a footprint with `value`, returning how many voxels were written.
fn paint(labels: &mut LabelVolume, footprint: &Footprint, value: u16) -> usize {
    let (width, height, depth) = labels.dim();
    if labels.is_empty() {
        return 0;
    }
    let mut painted = 0;
    match footprint {
        Footprint::Planar { frame, region } => {
            let (x0, y0, x1, y1) = region.extent();
            let clamp = |v: f64, max: usize| (v.max(0.0) as usize).min(max);
            let (xs, xe) = (clamp(x0.floor(), width), clamp(x1.ceil(), width));
            let (ys, ye) = (clamp(y0.floor(), height), clamp(y1.ceil(), height));
            for x in xs..xe {
                for y in ys..ye {
                    if region.contains(x as f64 + 0.5, y as f64 + 0.5) {
                        labels[[x, y, *frame]] = value;
                        painted += 1;
                    }
                }
            }
        }
        Footprint::Block([(i0, i1), (j0, j1), (k0, k1)]) => {
            let last = |v: u32, len: usize| (v as usize).min(len.saturating_sub(1));
            let (i1, j1, k1) = (last(*i1, width), last(*j1, height), last(*k1, depth));
            for i in (*i0 as usize)..=i1 {
                for j in (*j0 as usize)..=j1 {
                    for k in (*k0 as usize)..=k1 {
                        labels[[i, j, k]] = value;
                        painted += 1;
                    }
                }
            }
        }
    }
    painted
}

/// Rasterize the area-enclosing annotations of a series.
///
/// In instance mode every shape gets its own id, counting up from 1. In
/// semantic and binary mode every shape is drawn with its category's class
/// value from `taxonomy`. Entries whose pixels were all overwritten by later
/// shapes are dropped from the segment map with a warning.
pub fn rasterize_series(
    series: &Series,
    dims: Dimensions,
    mode: MaskMode,
    taxonomy: &Taxonomy,
) -> Result<Rasterized, CodecError> {
    let kind = series.kind();
    let mut labels = LabelVolume::zeros(dims.shape());
    let mut segment_map = SegmentMap::new();
    let mut warnings = Vec::new();
    let mut next_id: u32 = 1;

    for annotation in series.annotations() {
        let Some(category) = annotation.category() else {
            continue;
        };
        let Some(footprint) = footprint(annotation, kind, dims) else {
            if annotation.kind().is_shape() {
                warnings.push(format!(
                    "{} '{}' encloses no area and was not rasterized",
                    annotation.kind(),
                    category
                ));
            }
            continue;
        };
        if let Footprint::Planar { frame, .. } = &footprint
            && *frame >= dims.depth
        {
            warnings.push(format!(
                "{} '{}' is on frame {} but the volume has {} frame(s)",
                annotation.kind(),
                category,
                frame,
                dims.depth
            ));
            continue;
        }

        let value = match mode {
            MaskMode::Instance => {
                let id = next_id;
                next_id += 1;
                segment_map.insert(id, instance_entry(category, annotation));
                id
            }
            MaskMode::Semantic | MaskMode::Binary => {
                let value = taxonomy.class_value(category)?;
                if segment_map.get(value).is_none() {
                    segment_map.insert(value, category.clone());
                }
                value
            }
        };
        let label = u16::try_from(value)
            .map_err(|_| CodecError::Unsupported(format!("mask value {value} exceeds 16 bits")))?;

        if paint(&mut labels, &footprint, label) == 0 {
            log::debug!("{} '{}' covers no pixel centres", annotation.kind(), category);
        }
    }

    for value in segment_map.prune(&distinct_values(&labels)) {
        warnings.push(format!("segment {value} has no visible pixels and was dropped"));
    }
    for warning in &warnings {
        log::warn!("{warning}");
    }

    Ok(Rasterized {
        labels,
        segment_map,
        warnings,
    })
}

fn instance_entry(category: &CategoryRef, annotation: &Annotation) -> SegmentEntry {
    match annotation.attributes() {
        Some(attributes) => SegmentEntry::Props(SegmentProps {
            category: category.clone(),
            attributes: Some(attributes.clone()),
            mask: None,
        }),
        None => SegmentEntry::Category(category.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BoundingBox, Cuboid, Ellipse, Landmarks, Point2D, Polygon, VideoMetaData, VolumeGeometry,
        VoxelPoint,
    };
    use crate::segmentation::value_stats;
    use crate::taxonomy::TaxonomyCategory;

    fn bbox(x: f64, y: f64, w: f64, h: f64, category: &str) -> BoundingBox {
        BoundingBox::new(Point2D::new(x, y), w, h, CategoryRef::name(category))
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            TaxonomyCategory::new("car", 0),
            TaxonomyCategory::new("person", 4),
        ])
        .unwrap()
    }

    #[test]
    fn test_bbox_covers_pixel_centres() {
        let mut series = Series::new("street.png");
        series.push(bbox(0.1, 0.1, 0.2, 0.2, "car")).unwrap();

        let out =
            rasterize_series(&series, Dimensions::image(10, 10), MaskMode::Instance, &taxonomy())
                .unwrap();
        let stats = value_stats(&out.labels);
        assert_eq!(stats[&1].count, 4);
        assert_eq!(stats[&1].min, VoxelPoint::new(1, 1, 0));
        assert_eq!(stats[&1].max, VoxelPoint::new(2, 2, 0));
        assert_eq!(out.segment_map.len(), 1);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_polygon_and_ellipse() {
        let mut series = Series::new("street.png");
        series
            .push(Polygon::new(
                vec![
                    Point2D::new(0.0, 0.0),
                    Point2D::new(0.5, 0.0),
                    Point2D::new(0.0, 0.5),
                ],
                CategoryRef::name("car"),
            ))
            .unwrap();
        series
            .push(Ellipse {
                point_center: Point2D::new(0.75, 0.75),
                x_radius_norm: 0.1,
                y_radius_norm: 0.1,
                rotation_rad: 0.0,
                category: CategoryRef::name("person"),
                attributes: None,
                stats: None,
                video: None,
            })
            .unwrap();

        let out =
            rasterize_series(&series, Dimensions::image(20, 20), MaskMode::Semantic, &taxonomy())
                .unwrap();
        // Ellipses are stored before polygons, so the polygon is drawn last.
        assert_eq!(out.labels[[0, 0, 0]], 1);
        assert_eq!(out.labels[[8, 0, 0]], 1);
        assert_eq!(out.labels[[10, 0, 0]], 0);
        assert_eq!(out.labels[[15, 15, 0]], 5);
        assert_eq!(out.labels[[19, 19, 0]], 0);
        assert_eq!(out.segment_map.values().into_iter().collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn test_covered_shape_is_pruned() {
        let mut series = Series::new("street.png");
        series.push(bbox(0.2, 0.2, 0.1, 0.1, "car")).unwrap();
        series.push(bbox(0.0, 0.0, 0.5, 0.5, "person")).unwrap();

        let out =
            rasterize_series(&series, Dimensions::image(10, 10), MaskMode::Instance, &taxonomy())
                .unwrap();
        assert_eq!(out.segment_map.values().into_iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.labels[[2, 2, 0]], 2);
    }

    #[test]
    fn test_unrasterizable_and_unknown_categories() {
        let mut series = Series::new("street.png");
        series
            .push(Landmarks {
                point: Point2D::new(0.5, 0.5),
                category: CategoryRef::name("car"),
                attributes: None,
                video: None,
            })
            .unwrap();
        let out =
            rasterize_series(&series, Dimensions::image(4, 4), MaskMode::Instance, &taxonomy())
                .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.segment_map.is_empty());

        let mut series = Series::new("street.png");
        series.push(bbox(0.0, 0.0, 0.5, 0.5, "truck")).unwrap();
        let err = rasterize_series(&series, Dimensions::image(4, 4), MaskMode::Semantic, &taxonomy())
            .unwrap_err();
        assert!(matches!(err, CodecError::Taxonomy(_)));
    }

    #[test]
    fn test_video_frames_and_cuboids() {
        let mut series = Series::new(vec!["f0.png".to_string(), "f1.png".to_string()]);
        let mut on_second = bbox(0.0, 0.0, 1.0, 1.0, "car");
        on_second.video = Some(VideoMetaData::key_frame(1, "t1"));
        series.push(on_second).unwrap();
        let out =
            rasterize_series(&series, Dimensions::volume(2, 2, 2), MaskMode::Instance, &taxonomy())
                .unwrap();
        assert_eq!(out.labels[[0, 0, 0]], 0);
        assert_eq!(out.labels[[1, 1, 1]], 1);

        let mut volume = Series::new("ct.nii.gz");
        volume
            .push(Cuboid::new(
                VoxelPoint::new(1, 1, 1),
                VoxelPoint::new(2, 5, 1),
                &VolumeGeometry::default(),
                CategoryRef::name("car"),
            ))
            .unwrap();
        let out =
            rasterize_series(&volume, Dimensions::volume(4, 4, 3), MaskMode::Instance, &taxonomy())
                .unwrap();
        assert_eq!(value_stats(&out.labels)[&1].count, 2 * 3);
    }
}
