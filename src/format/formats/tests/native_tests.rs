//! Tests for the native task JSON format.

use std::fs;

use tempfile::TempDir;

use super::{image_task, liver_tumor_labels, liver_tumor_map, segmented_dataset, taxonomy};
use crate::format::dataset::Dataset;
use crate::format::error::FormatError;
use crate::format::formats::{MANIFEST_FILE, NativeFormat, TASKS_FILE};
use crate::format::traits::{ExportOptions, ImportOptions, TaskFormat, WarningSeverity};
use crate::model::{BoundingBox, CategoryRef, MaskMode, OneOrMany, Point2D, Series, Task};
use crate::segmentation::{LabelVolume, MaskCodec, MaskImage, NiftiCodec};

/// Write a bare `tasks.json` with one CT series pointing at `seg.nii.gz`,
/// plus a plain image series without segmentation.
fn write_ct_tree(dir: &std::path::Path, labels: LabelVolume) {
    let data = NiftiCodec.encode(&MaskImage::new(labels), false).unwrap();
    fs::write(dir.join("seg.nii.gz"), data).unwrap();

    let mut ct = Series::new(vec!["ct/0001.dcm".to_string(), "ct/0002.dcm".to_string()]);
    ct.segmentations = Some(OneOrMany::from("seg.nii.gz"));
    ct.segment_map = Some(liver_tumor_map());
    let task = Task::new("case", vec![ct, Series::new("photo.png")]);
    let json = serde_json::to_string(&vec![task.to_value().unwrap()]).unwrap();
    fs::write(dir.join(TASKS_FILE), json).unwrap();
}

#[test]
fn test_native_format_metadata() {
    let format = NativeFormat;
    assert_eq!(format.id(), "native");
    assert!(format.supports_import());
    assert!(format.writes_masks());
}

#[test]
fn test_export_writes_tree() {
    let dir = TempDir::new().unwrap();
    let data = segmented_dataset("case-1");

    let result = NativeFormat
        .export(&data, &taxonomy(), dir.path(), &ExportOptions::default())
        .unwrap();

    assert_eq!(result.tasks_exported, 1);
    assert_eq!(result.masks_written, 1);
    assert!(dir.path().join(MANIFEST_FILE).is_file());
    assert!(
        dir.path()
            .join("segmentations/case-1/0/instances.nii.gz")
            .is_file()
    );

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(TASKS_FILE)).unwrap()).unwrap();
    let tasks = Task::parse_many(&json).unwrap();
    assert_eq!(
        tasks[0].series[0].segmentations,
        Some(OneOrMany::from("segmentations/case-1/0/instances.nii.gz"))
    );
    assert_eq!(tasks[0].series[0].segment_map, Some(liver_tumor_map()));
}

#[test]
fn test_export_then_import_decodes_masks() {
    let dir = TempDir::new().unwrap();
    let data = segmented_dataset("case-1");
    NativeFormat
        .export(&data, &taxonomy(), dir.path(), &ExportOptions::default())
        .unwrap();

    let imported = NativeFormat
        .import(dir.path(), &taxonomy(), &ImportOptions::default())
        .unwrap();

    assert_eq!(imported.tasks.len(), 1);
    assert_eq!(imported.warnings().count(), 0);
    let decoded = imported.tasks[0].series[0].segmentation.as_ref().unwrap();
    assert_eq!(decoded.labels, liver_tumor_labels());
    assert_eq!(decoded.mode, MaskMode::Instance);
    assert_eq!(decoded.segment(2).unwrap().category, CategoryRef::name("tumor"));
}

#[test]
fn test_export_to_bytes_is_json_only() {
    let data = segmented_dataset("case-1");
    let (bytes, result) = NativeFormat
        .export_to_bytes(&data, &taxonomy(), &ExportOptions::default())
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["taskId"], "case-1");
    assert_eq!(result.masks_written, 0);
}

#[test]
fn test_mismatch_stays_on_its_series() {
    let dir = TempDir::new().unwrap();
    let mut labels = liver_tumor_labels();
    labels[[2, 2, 0]] = 3;
    write_ct_tree(dir.path(), labels);

    let data = NativeFormat
        .import(dir.path(), &taxonomy(), &ImportOptions::default())
        .unwrap();

    let entry = &data.tasks[0];
    assert!(entry.series[0].segmentation.is_none());
    assert_eq!(entry.warnings.len(), 1);
    assert_eq!(entry.warnings[0].severity, WarningSeverity::Error);
    assert_eq!(entry.warnings[0].series, Some(0));
    assert!(entry.warnings[0].message.contains('3'));
}

#[test]
fn test_repair_clears_unmapped_values() {
    let dir = TempDir::new().unwrap();
    let mut labels = liver_tumor_labels();
    labels[[2, 2, 0]] = 3;
    write_ct_tree(dir.path(), labels);

    let options = ImportOptions::new().repair_segment_maps(true);
    let data = NativeFormat
        .import(&dir.path().join(TASKS_FILE), &taxonomy(), &options)
        .unwrap();

    let entry = &data.tasks[0];
    let decoded = entry.series[0].segmentation.as_ref().unwrap();
    assert_eq!(decoded.labels, liver_tumor_labels());
    assert_eq!(entry.warnings.len(), 1);
    assert_eq!(entry.warnings[0].severity, WarningSeverity::Warning);
}

#[test]
fn test_import_without_decoding() {
    let dir = TempDir::new().unwrap();
    write_ct_tree(dir.path(), liver_tumor_labels());

    let options = ImportOptions::new().decode_segmentations(false);
    let data = NativeFormat
        .import(dir.path(), &taxonomy(), &options)
        .unwrap();
    assert!(data.tasks[0].series[0].segmentation.is_none());
    assert_eq!(data.warnings().count(), 0);
}

#[test]
fn test_incompatible_manifest_version() {
    let dir = TempDir::new().unwrap();
    write_ct_tree(dir.path(), liver_tumor_labels());
    fs::write(
        dir.path().join(MANIFEST_FILE),
        r#"{"version": "0.9.0", "format": "native", "tasks": 1}"#,
    )
    .unwrap();

    let err = NativeFormat
        .import(dir.path(), &taxonomy(), &ImportOptions::default())
        .unwrap_err();
    match err {
        FormatError::VersionMismatch { expected, found } => {
            assert_eq!(expected, Dataset::CURRENT_VERSION);
            assert_eq!(found, "0.9.0");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_tasks_are_left_out() {
    let dir = TempDir::new().unwrap();
    let car = image_task(
        "street",
        BoundingBox::new(Point2D::new(0.1, 0.1), 0.2, 0.2, CategoryRef::name("car")),
    );
    let boat = image_task(
        "harbour",
        BoundingBox::new(Point2D::new(0.1, 0.1), 0.2, 0.2, CategoryRef::name("boat")),
    );
    let json = serde_json::json!([
        car.to_value().unwrap(),
        boat.to_value().unwrap(),
        {"taskId": "broken", "series": []},
    ]);
    fs::write(dir.path().join(TASKS_FILE), json.to_string()).unwrap();

    let data = NativeFormat
        .import(dir.path(), &taxonomy(), &ImportOptions::default())
        .unwrap();

    assert_eq!(data.tasks.len(), 1);
    assert_eq!(data.tasks[0].task.key(), "street");
    let rejected: Vec<_> = data
        .rejected
        .iter()
        .map(|w| (w.task.as_deref(), w.severity))
        .collect();
    assert_eq!(
        rejected,
        vec![
            (Some("harbour"), WarningSeverity::Error),
            (Some("broken"), WarningSeverity::Error),
        ]
    );
    assert_eq!(data.warnings().count(), 2);
}

#[test]
fn test_bare_task_object_is_read() {
    let dir = TempDir::new().unwrap();
    let task = image_task(
        "single",
        BoundingBox::new(Point2D::new(0.1, 0.1), 0.2, 0.2, CategoryRef::name("car")),
    );
    let path = dir.path().join("single.json");
    fs::write(&path, task.to_json().unwrap()).unwrap();

    let data = NativeFormat
        .import(&path, &taxonomy(), &ImportOptions::default())
        .unwrap();
    assert_eq!(data.tasks.len(), 1);
    assert!(data.rejected.is_empty());
}
