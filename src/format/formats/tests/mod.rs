//! Unit tests for task format implementations.
//!
//! These tests verify the correctness of format serialization, deserialization,
//! and round-trip conversions.

mod coco_tests;
mod native_tests;

use serde_json::json;

use crate::format::dataset::Dataset;
use crate::model::{BoundingBox, CategoryRef, OneOrMany, Point2D, SegmentMap, Series, Task};
use crate::segmentation::{LabelVolume, MaskCodec, MaskCodecRegistry, MaskImage, NiftiCodec};
use crate::taxonomy::Taxonomy;
use crate::transport::MemoryStore;

/// Taxonomy shared by the format tests.
///
/// Class values are `classId + 1`: car = 3, liver = 5, tumor = 6, truck = 8.
fn taxonomy() -> Taxonomy {
    Taxonomy::from_value(&json!({
        "name": "test",
        "categories": [{
            "name": "object",
            "children": [
                {"name": "car", "classId": 2},
                {"name": "person", "classId": 3},
                {"name": "liver", "classId": 4},
                {"name": "tumor", "classId": 5},
                {"name": "vehicle", "classId": 6, "children": [
                    {"name": "truck", "classId": 7}
                ]}
            ]
        }]
    }))
    .unwrap()
}

/// A 2D image task with one box.
fn image_task(name: &str, bbox: BoundingBox) -> Task {
    let mut series = Series::new("photo.png");
    series.push(bbox).unwrap();
    Task::new(name, vec![series])
}

fn car_box(x: f64, y: f64, w: f64, h: f64) -> BoundingBox {
    BoundingBox::new(Point2D::new(x, y), w, h, CategoryRef::name("car"))
}

/// A 4x4x2 liver/tumor label volume.
fn liver_tumor_labels() -> LabelVolume {
    let mut labels = LabelVolume::zeros((4, 4, 2));
    labels[[0, 0, 0]] = 1;
    labels[[1, 0, 0]] = 1;
    labels[[3, 3, 1]] = 2;
    labels
}

fn liver_tumor_map() -> SegmentMap {
    let mut map = SegmentMap::new();
    map.insert(1, CategoryRef::name("liver"));
    map.insert(2, CategoryRef::name("tumor"));
    map
}

/// A dataset with one CT task whose segmentation is already decoded.
fn segmented_dataset(key: &str) -> Dataset {
    let store = MemoryStore::new();
    let data = NiftiCodec
        .encode(&MaskImage::new(liver_tumor_labels()), false)
        .unwrap();
    store.insert_blob("upload/seg.nii.gz", data).unwrap();

    let mut series = Series::new(vec!["ct/0001.dcm".to_string(), "ct/0002.dcm".to_string()]);
    series.segmentations = Some(OneOrMany::from("upload/seg.nii.gz"));
    series.segment_map = Some(liver_tumor_map());
    let mut task = Task::new(key, vec![series]);
    task.task_id = Some(key.to_string());

    let mut dataset = Dataset::from_tasks(vec![task]);
    dataset.load_segmentations(&store, &MaskCodecRegistry::new(), false);
    assert_eq!(dataset.warnings().count(), 0);
    dataset
}
