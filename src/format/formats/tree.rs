//! Directory layout shared by the native and PNG mask formats.
//!
//! ```text
//! <root>/
//!   manifest.json
//!   tasks.json
//!   segmentations/<task-key>/<series-index>/instances.nii.gz
//! ```
//!
//! Segmentation references in `tasks.json` are relative to the root.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::format::dataset::{Dataset, SeriesEntry, TaskEntry};
use crate::format::error::FormatError;
use crate::format::traits::{ExportOptions, ExportResult, FormatWarning, ImportOptions};
use crate::model::{MAX_SEGMENT_VALUE, MaskMode, SegmentEntry, SegmentMap, Series, Task};
use crate::segmentation::{
    CodecError, DecodedSegmentation, LabelVolume, MaskCodecRegistry, encode_segmentation,
    rasterize_series,
};
use crate::taxonomy::Taxonomy;
use crate::transport::{BlobStore, LocalDirectory};

/// Task array file.
pub const TASKS_FILE: &str = "tasks.json";
/// Layout version file.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Root of the sidecar mask files.
pub const SEGMENTATIONS_DIR: &str = "segmentations";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: String,
    format: String,
    tasks: usize,
}

/// Which mask files a tree export prefers for planar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MaskPreference {
    /// NIfTI for everything.
    Nifti,
    /// PNG for planar series, NIfTI for volumes.
    Png,
}

/// Serialize the tasks of a dataset as a JSON array.
pub(crate) fn tasks_to_json(tasks: &[Task]) -> Result<Vec<u8>, FormatError> {
    let values = tasks
        .iter()
        .map(Task::to_value)
        .collect::<Result<Vec<Value>, _>>()?;
    Ok(serde_json::to_string_pretty(&values)?.into_bytes())
}

/// Mask writing context shared by every series of an export.
struct TreeWriter<'a> {
    root: &'a Path,
    store: LocalDirectory,
    codecs: MaskCodecRegistry,
    taxonomy: &'a Taxonomy,
    options: &'a ExportOptions,
    preference: MaskPreference,
}

impl TreeWriter<'_> {
    /// Write the masks of one series and point its references at them.
    ///
    /// On error the series is left as it was.
    fn write_series(
        &self,
        series: &mut Series,
        slot: &SeriesEntry,
        key: &str,
        index: usize,
        result: &mut ExportResult,
    ) -> Result<(), FormatError> {
        let prepared = prepare_labels(series, slot, self.taxonomy, self.options)?;
        for message in prepared.warnings {
            result.add_warning(FormatWarning::warning(message).for_task(key).for_series(index));
        }
        let Some((labels, segment_map, mode)) = prepared.labels else {
            if series.segmentations.is_some() {
                result.add_warning(
                    FormatWarning::warning(
                        "segmentation was not decoded; references left unchanged",
                    )
                    .for_task(key)
                    .for_series(index),
                );
            }
            return Ok(());
        };

        let planar = labels.shape()[2] == 1;
        let codec_id = match self.preference {
            MaskPreference::Png if planar => "png",
            MaskPreference::Png => {
                result.add_warning(
                    FormatWarning::info("volume written as NIfTI instead of PNG")
                        .for_task(key)
                        .for_series(index),
                );
                "nifti"
            }
            MaskPreference::Nifti => "nifti",
        };
        let codec = self
            .codecs
            .get(codec_id)
            .ok_or_else(|| FormatError::UnsupportedOperation(format!("codec {codec_id}")))?;

        let encoded = encode_segmentation(&labels, &segment_map, mode, codec, slot.geometry)?;

        let dir_key = sanitize(key);
        let mut references = Vec::with_capacity(encoded.files.len());
        for file in &encoded.files {
            let name = format!("{SEGMENTATIONS_DIR}/{dir_key}/{index}/{}", file.name);
            let reference = self.store.store_blob(&name, file.data.clone())?;
            result.files_created.push(self.root.join(&reference));
            references.push(reference);
        }

        encoded.apply_to(series, references)?;
        result.masks_written += encoded.files.len();
        Ok(())
    }
}

/// Write a dataset as a directory tree.
///
/// A series whose masks cannot be written keeps its references and gets an
/// error-level warning; the rest of the dataset is still written.
pub(crate) fn write_tree(
    format_id: &str,
    data: &Dataset,
    taxonomy: &Taxonomy,
    root: &Path,
    options: &ExportOptions,
    preference: MaskPreference,
) -> Result<ExportResult, FormatError> {
    fs::create_dir_all(root)?;
    let writer = TreeWriter {
        root,
        store: LocalDirectory::new(root),
        codecs: MaskCodecRegistry::new(),
        taxonomy,
        options,
        preference: if options.png_masks {
            MaskPreference::Png
        } else {
            preference
        },
    };

    let mut result = ExportResult::new();
    let mut tasks = Vec::with_capacity(data.tasks.len());

    for entry in &data.tasks {
        let mut task = entry.task.clone();
        let key = task.key().to_string();

        for (index, slot) in entry.series.iter().enumerate() {
            let Some(series) = task.series.get_mut(index) else {
                continue;
            };
            if let Err(e) = writer.write_series(series, slot, &key, index, &mut result) {
                log::warn!("Task {key} series {index}: masks not written: {e}");
                result.add_warning(
                    FormatWarning::error(e.to_string())
                        .for_task(&key)
                        .for_series(index),
                );
            }
        }

        result.annotations_exported += task.annotations().count();
        tasks.push(task);
    }

    let tasks_path = root.join(TASKS_FILE);
    fs::write(&tasks_path, tasks_to_json(&tasks)?)?;
    result.files_created.push(tasks_path);

    let manifest = Manifest {
        version: data.version.clone(),
        format: format_id.to_string(),
        tasks: tasks.len(),
    };
    let manifest_path = root.join(MANIFEST_FILE);
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    result.files_created.push(manifest_path);

    result.tasks_exported = tasks.len();
    for entry in &data.tasks {
        result.warnings.extend(entry.warnings.iter().cloned());
    }
    Ok(result)
}

/// Read a directory tree, or a bare task JSON file.
///
/// A task that does not parse or names categories the taxonomy lacks is
/// left out with an error-level warning on [`Dataset::rejected`].
pub(crate) fn read_tree(
    path: &Path,
    taxonomy: &Taxonomy,
    options: &ImportOptions,
) -> Result<Dataset, FormatError> {
    let (tasks_path, root) = if path.is_dir() {
        (path.join(TASKS_FILE), path.to_path_buf())
    } else {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (path.to_path_buf(), parent)
    };
    let root = options.base_path.clone().unwrap_or(root);

    let manifest_path = root.join(MANIFEST_FILE);
    if manifest_path.is_file() {
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
        if !Dataset::is_version_compatible(&manifest.version) {
            return Err(FormatError::VersionMismatch {
                expected: Dataset::CURRENT_VERSION.to_string(),
                found: manifest.version,
            });
        }
    }

    let value: Value = serde_json::from_str(&fs::read_to_string(&tasks_path)?)?;
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut data = Dataset::new();
    for (position, item) in items.iter().enumerate() {
        let key = raw_key(item).unwrap_or_else(|| format!("task #{position}"));
        let task = match Task::parse(item) {
            Ok(task) => task,
            Err(e) => {
                data.reject(&key, e);
                continue;
            }
        };
        let warnings = match taxonomy.validate_task(&task) {
            Ok(warnings) => warnings,
            Err(e) => {
                data.reject(&key, e);
                continue;
            }
        };
        let mut entry = TaskEntry::new(task);
        for warning in warnings {
            let mut w = FormatWarning::warning(warning.message).for_task(&key);
            w.series = warning.series;
            entry.warnings.push(w);
        }
        data.tasks.push(entry);
    }

    if options.decode_segmentations {
        let store = LocalDirectory::new(&root);
        data.load_segmentations(&store, &MaskCodecRegistry::new(), options.repair_segment_maps);
    }
    Ok(data)
}

/// Task id or name of an unparsed task object.
fn raw_key(item: &Value) -> Option<String> {
    ["taskId", "name"]
        .iter()
        .find_map(|field| item.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// Labels to write for one series.
struct Prepared {
    labels: Option<(LabelVolume, SegmentMap, MaskMode)>,
    warnings: Vec<String>,
}

fn prepare_labels(
    series: &Series,
    slot: &SeriesEntry,
    taxonomy: &Taxonomy,
    options: &ExportOptions,
) -> Result<Prepared, FormatError> {
    if let Some(decoded) = &slot.segmentation {
        let mode = options.mask_mode.unwrap_or(decoded.mode);
        let (labels, segment_map) = convert_mode(decoded, mode, taxonomy)?;
        return Ok(Prepared {
            labels: Some((labels, segment_map, mode)),
            warnings: Vec::new(),
        });
    }

    let has_shapes = series
        .annotations()
        .iter()
        .any(|a| a.kind().is_rasterizable());
    if !options.rasterize || !has_shapes {
        return Ok(Prepared {
            labels: None,
            warnings: Vec::new(),
        });
    }
    let Some(dims) = slot.resolved_dimensions() else {
        return Ok(Prepared {
            labels: None,
            warnings: vec!["size unknown; shapes were not rasterized".to_string()],
        });
    };

    let mode = options.mask_mode.unwrap_or(MaskMode::Instance);
    let rasterized = rasterize_series(series, dims, mode, taxonomy)?;
    let labels = (!rasterized.segment_map.is_empty())
        .then_some((rasterized.labels, rasterized.segment_map, mode));
    Ok(Prepared {
        labels,
        warnings: rasterized.warnings,
    })
}

/// Relabel a decoded segmentation for another mask mode.
///
/// Only the step to semantic changes values: every segment is relabeled with
/// its category's class value, merging segments of the same category.
fn convert_mode(
    decoded: &DecodedSegmentation,
    mode: MaskMode,
    taxonomy: &Taxonomy,
) -> Result<(LabelVolume, SegmentMap), FormatError> {
    if mode != MaskMode::Semantic || decoded.mode == MaskMode::Semantic {
        return Ok((decoded.labels.clone(), decoded.segment_map()));
    }

    let mut remap: HashMap<u16, u16> = HashMap::new();
    let mut segment_map = SegmentMap::new();
    for segment in &decoded.segments {
        let class_value = taxonomy.class_value(&segment.category)?;
        if class_value > MAX_SEGMENT_VALUE {
            return Err(CodecError::Unsupported(format!(
                "class value {class_value} of '{}' does not fit a mask",
                segment.category
            ))
            .into());
        }
        // Values fit: decoded volumes hold u16 labels.
        remap.insert(segment.value as u16, class_value as u16);
        if segment_map.get(class_value).is_none() {
            segment_map.insert(class_value, SegmentEntry::Category(segment.category.clone()));
        }
    }
    let labels = decoded
        .labels
        .mapv(|v| remap.get(&v).copied().unwrap_or(0));
    Ok((labels, segment_map))
}

/// Task key made safe for use as a single path component.
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "task".to_string(),
        trimmed => trimmed.to_string(),
    }
}
