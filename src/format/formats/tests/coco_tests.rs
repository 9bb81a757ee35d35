//! Tests for the COCO JSON format.

use serde_json::{Value, json};
use tempfile::TempDir;

use super::{car_box, image_task, taxonomy};
use crate::format::dataset::{Dataset, TaskEntry};
use crate::format::error::FormatError;
use crate::format::formats::CocoFormat;
use crate::format::traits::{ExportOptions, ImportOptions, TaskFormat, WarningSeverity};
use crate::model::{
    Annotation, CategoryRef, Classification, Dimensions, Landmarks, Point2D, Polygon, Polyline,
    Series, Task, VideoMetaData,
};

fn export_json(data: &Dataset) -> (Value, crate::format::traits::ExportResult) {
    let (bytes, result) = CocoFormat
        .export_to_bytes(data, &taxonomy(), &ExportOptions::default())
        .unwrap();
    (serde_json::from_slice(&bytes).unwrap(), result)
}

fn single(task: Task, dims: Dimensions) -> Dataset {
    let mut data = Dataset::new();
    data.tasks.push(TaskEntry::new(task).with_dimensions(0, dims));
    data
}

#[test]
fn test_coco_format_metadata() {
    let format = CocoFormat;

    assert_eq!(format.id(), "coco");
    assert_eq!(format.display_name(), "COCO (JSON)");
    assert!(format.extensions().contains(&"json"));
    assert!(format.supports_import());
    assert!(!format.writes_masks());
}

#[test]
fn test_bbox_denormalized_to_pixels() {
    let task = image_task("street", car_box(0.1, 0.1, 0.2, 0.2));
    let (coco, result) = export_json(&single(task, Dimensions::image(1000, 800)));

    assert_eq!(coco["images"][0]["width"], 1000);
    assert_eq!(coco["images"][0]["height"], 800);
    assert_eq!(coco["images"][0]["file_name"], "photo.png");

    let ann = &coco["annotations"][0];
    let bbox: Vec<f64> = serde_json::from_value(ann["bbox"].clone()).unwrap();
    for (got, want) in bbox.iter().zip([100.0, 80.0, 200.0, 160.0]) {
        assert!((got - want).abs() < 1e-9, "{bbox:?}");
    }
    assert_eq!(ann["category_id"], 2);
    assert!((ann["area"].as_f64().unwrap() - 32000.0).abs() < 1e-6);
    assert_eq!(result.annotations_exported, 1);
    assert!(!result.has_warnings());
}

#[test]
fn test_categories_from_taxonomy() {
    let (coco, _) = export_json(&Dataset::new());
    let categories = coco["categories"].as_array().unwrap();

    assert_eq!(categories.len(), 6);
    let truck = categories.iter().find(|c| c["name"] == "truck").unwrap();
    assert_eq!(truck["id"], 7);
    assert_eq!(truck["supercategory"], "vehicle");
    let car = categories.iter().find(|c| c["name"] == "car").unwrap();
    assert_eq!(car["supercategory"], "none");
}

#[test]
fn test_polygon_to_flat_array() {
    let mut series = Series::new("photo.png");
    let points = vec![
        Point2D::new(0.1, 0.2),
        Point2D::new(0.3, 0.2),
        Point2D::new(0.2, 0.4),
    ];
    series
        .push(Polygon::new(points, CategoryRef::name("truck")))
        .unwrap();
    let (coco, _) = export_json(&single(
        Task::new("t", vec![series]),
        Dimensions::image(1000, 1000),
    ));

    let ann = &coco["annotations"][0];
    let flat: Vec<f64> = serde_json::from_value(ann["segmentation"][0].clone()).unwrap();
    assert_eq!(flat.len(), 6);
    assert!((flat[0] - 100.0).abs() < 1e-9);
    assert!((flat[5] - 400.0).abs() < 1e-9);
    assert_eq!(ann["category_id"], 7);
    // Triangle with base 200 and height 200
    assert!((ann["area"].as_f64().unwrap() - 20000.0).abs() < 1e-6);
}

#[test]
fn test_unsupported_variants_dropped_with_warnings() {
    let mut series = Series::new("photo.png");
    series.push(car_box(0.1, 0.1, 0.2, 0.2)).unwrap();
    series
        .push(Annotation::Landmarks(Landmarks {
            point: Point2D::new(0.5, 0.5),
            category: CategoryRef::name("person"),
            attributes: None,
            video: None,
        }))
        .unwrap();
    series
        .push(Annotation::Polyline(Polyline {
            points: vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0)],
            category: CategoryRef::name("person"),
            attributes: None,
            video: None,
        }))
        .unwrap();

    let (coco, result) = export_json(&single(
        Task::new("t", vec![series]),
        Dimensions::image(100, 100),
    ));

    assert_eq!(coco["annotations"].as_array().unwrap().len(), 1);
    assert_eq!(result.warnings.len(), 2);
    assert!(
        result
            .warnings
            .iter()
            .all(|w| w.severity == WarningSeverity::Warning && w.task.as_deref() == Some("t"))
    );
}

#[test]
fn test_volume_series_skipped() {
    let mut volume = Series::new("ct.nii.gz");
    volume
        .push(Annotation::Classification(Classification {
            category: Some(CategoryRef::name("liver")),
            attributes: None,
            video: None,
        }))
        .unwrap();
    let mut data = Dataset::new();
    data.tasks
        .push(TaskEntry::new(Task::new("ct", vec![volume])));

    let (coco, result) = export_json(&data);
    assert!(coco["images"].as_array().unwrap().is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].series, Some(0));
}

#[test]
fn test_missing_dimensions_is_error() {
    let mut data = Dataset::new();
    data.tasks
        .push(TaskEntry::new(image_task("t", car_box(0.1, 0.1, 0.2, 0.2))));

    let (coco, result) = export_json(&data);
    assert!(coco["annotations"].as_array().unwrap().is_empty());
    assert!(result.has_errors());
}

#[test]
fn test_video_frames_become_images() {
    let frames: Vec<String> = (0..3).map(|i| format!("frames/{i}.png")).collect();
    let mut series = Series::new(frames);
    let mut bbox = car_box(0.1, 0.1, 0.2, 0.2);
    bbox.video = Some(VideoMetaData::key_frame(2, "track-1"));
    series.push(bbox).unwrap();

    let (coco, _) = export_json(&single(
        Task::new("clip", vec![series]),
        Dimensions::volume(50, 40, 3),
    ));

    let images = coco["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["file_name"], "frames/2.png");
    assert_eq!(images[0]["width"], 50);
    assert_eq!(coco["annotations"][0]["image_id"], images[0]["id"]);
}

#[test]
fn test_coco_import() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coco.json");
    let coco = json!({
        "images": [{"id": 1, "file_name": "a.png", "width": 1000, "height": 800}],
        "categories": [
            {"id": 2, "name": "car", "supercategory": "none"},
            {"id": 40, "name": "truck", "supercategory": "vehicle"}
        ],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 2, "bbox": [100, 80, 200, 160], "area": 32000, "iscrowd": 0},
            {"id": 2, "image_id": 1, "category_id": 40,
             "segmentation": [[100, 100, 300, 100, 200, 300]], "area": 20000, "iscrowd": 0},
            {"id": 3, "image_id": 1, "category_id": 2,
             "segmentation": {"counts": [0, 10], "size": [800, 1000]}, "area": 10, "iscrowd": 1}
        ]
    });
    std::fs::write(&path, coco.to_string()).unwrap();

    let data = CocoFormat
        .import(&path, &taxonomy(), &ImportOptions::default())
        .unwrap();

    assert_eq!(data.tasks.len(), 1);
    let entry = &data.tasks[0];
    assert_eq!(entry.task.name, "a.png");
    assert_eq!(entry.series[0].dimensions, Some(Dimensions::image(1000, 800)));
    assert_eq!(entry.warnings.len(), 1);
    assert!(entry.warnings[0].message.contains("RLE"));

    let annotations = entry.task.series[0].annotations();
    assert_eq!(annotations.len(), 2);
    match &annotations[0] {
        Annotation::BoundingBox(bbox) => {
            assert!((bbox.point_top_left.xnorm - 0.1).abs() < 1e-9);
            assert!((bbox.h_norm - 0.2).abs() < 1e-9);
            assert_eq!(bbox.category, CategoryRef::name("car"));
        }
        other => panic!("expected a box, got {other:?}"),
    }
    match &annotations[1] {
        Annotation::Polygon(polygon) => {
            // Unknown id 40 falls back to the category name
            assert_eq!(polygon.category, CategoryRef::path(["vehicle", "truck"]));
            assert_eq!(polygon.points.len(), 3);
        }
        other => panic!("expected a polygon, got {other:?}"),
    }
}

#[test]
fn test_import_bbox_fallbacks_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coco.json");
    let coco = json!({
        "images": [{"id": 1, "file_name": "a.png", "width": 100, "height": 100}],
        "categories": [{"id": 2, "name": "car"}],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 2, "bbox": [10, 10, 20, 20],
             "segmentation": [[10, 10, 30, 30]], "area": 400, "iscrowd": 0},
            {"id": 2, "image_id": 1, "category_id": 2, "bbox": [50, 50, 10, 10],
             "segmentation": {"counts": [0, 10], "size": [100, 100]}, "area": 100, "iscrowd": 1}
        ]
    });
    std::fs::write(&path, coco.to_string()).unwrap();

    let data = CocoFormat
        .import(&path, &taxonomy(), &ImportOptions::default())
        .unwrap();

    let entry = &data.tasks[0];
    let annotations = entry.task.series[0].annotations();
    assert_eq!(annotations.len(), 2);
    assert!(
        annotations
            .iter()
            .all(|a| matches!(a, Annotation::BoundingBox(_)))
    );

    assert_eq!(entry.warnings.len(), 2);
    assert!(entry.warnings[0].message.contains("fewer than 3 points"));
    assert!(entry.warnings[1].message.contains("RLE"));
    assert!(
        entry
            .warnings
            .iter()
            .all(|w| w.severity == WarningSeverity::Warning && w.series == Some(0))
    );
}

#[test]
fn test_import_unknown_category_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coco.json");
    let coco = json!({
        "images": [],
        "categories": [{"id": 99, "name": "boat"}],
        "annotations": []
    });
    std::fs::write(&path, coco.to_string()).unwrap();

    let err = CocoFormat
        .import(&path, &taxonomy(), &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, FormatError::Taxonomy(_)));
}
