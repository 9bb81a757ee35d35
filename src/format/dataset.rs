//! Dataset structures for import/export.
//!
//! [`Dataset`] is the intermediate representation every format converts to
//! and from: validated tasks plus what the JSON alone cannot carry, namely
//! pixel dimensions, volume geometry, and decoded segmentations.
//!
//! # Versioning
//!
//! The sidecar layout uses semantic versioning (MAJOR.MINOR.PATCH). Version
//! 0.x.x is unstable: files are only compatible within the same minor version.

use crate::batch::{TaskFailure, TaskOutcome};
use crate::format::traits::FormatWarning;
use crate::model::{Dimensions, Task, VolumeGeometry};
use crate::segmentation::{
    CodecError, DecodedSegmentation, MaskCodecRegistry, decode_segmentation, item_dimensions,
    repair_segmentation,
};
use crate::transport::BlobStore;

/// Tasks with their per-series conversion data.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Layout version for compatibility checking.
    pub version: String,

    /// Tasks in export order.
    pub tasks: Vec<TaskEntry>,

    /// Error-level warnings for tasks that were left out on import.
    pub rejected: Vec<FormatWarning>,
}

impl Dataset {
    /// Current version of the dataset layout.
    pub const CURRENT_VERSION: &'static str = "0.1.0";

    /// Major version number for compatibility checking.
    pub const VERSION_MAJOR: u32 = 0;

    /// Minor version number.
    pub const VERSION_MINOR: u32 = 1;

    /// Create an empty dataset.
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            tasks: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Wrap tasks with empty series entries.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(TaskEntry::new).collect(),
            ..Self::new()
        }
    }

    /// Build a dataset from batch outcomes, returning the failed tasks.
    ///
    /// Series whose segmentation failed to decode keep an empty entry and
    /// get an error-level warning.
    pub fn from_outcomes(outcomes: Vec<TaskOutcome>) -> (Self, Vec<TaskFailure>) {
        let mut data = Self::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            let materialized = match outcome {
                Ok(materialized) => materialized,
                Err(failure) => {
                    failures.push(failure);
                    continue;
                }
            };
            let mut entry = TaskEntry::new(materialized.task);
            let key = entry.task.key().to_string();
            for warning in materialized.warnings {
                let mut w = FormatWarning::warning(warning.message).for_task(&key);
                w.series = warning.series;
                entry.warnings.push(w);
            }
            for series in materialized.series {
                if let Some(slot) = entry.series.get_mut(series.index)
                    && slot.dimensions.is_none()
                {
                    slot.dimensions = series.dimensions;
                }
                match series.segmentation {
                    Ok(decoded) => entry.series[series.index].set_segmentation(decoded),
                    Err(e) => entry.warnings.push(
                        FormatWarning::error(e.to_string())
                            .for_task(&key)
                            .for_series(series.index),
                    ),
                }
            }
            data.tasks.push(entry);
        }
        (data, failures)
    }

    /// Parse a version string into (major, minor, patch) components.
    pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() != 3 {
            return None;
        }
        let major = parts[0].parse().ok()?;
        let minor = parts[1].parse().ok()?;
        let patch = parts[2].parse().ok()?;
        Some((major, minor, patch))
    }

    /// Check if a version is compatible with the current version.
    ///
    /// For version 0.x.x (unstable), only exact minor version matches are compatible.
    /// For version 1.x.x+, any file with the same major version is compatible.
    pub fn is_version_compatible(file_version: &str) -> bool {
        let Some((file_major, file_minor, _)) = Self::parse_version(file_version) else {
            return false;
        };

        if Self::VERSION_MAJOR == 0 {
            file_major == 0 && file_minor == Self::VERSION_MINOR
        } else {
            file_major == Self::VERSION_MAJOR
        }
    }

    /// Total annotation count across all tasks.
    pub fn total_annotations(&self) -> usize {
        self.tasks.iter().map(|t| t.task.annotations().count()).sum()
    }

    /// Every warning attached to any task, then those of rejected tasks.
    pub fn warnings(&self) -> impl Iterator<Item = &FormatWarning> {
        self.tasks
            .iter()
            .flat_map(|t| t.warnings.iter())
            .chain(&self.rejected)
    }

    /// Leave a task out, recording why.
    pub fn reject(&mut self, key: &str, reason: impl std::fmt::Display) {
        log::warn!("Skipping task {key}: {reason}");
        self.rejected
            .push(FormatWarning::error(reason.to_string()).for_task(key));
    }

    /// Decode the segmentations of every series that has none loaded yet.
    ///
    /// Every file must match the series' known dimensions. Failures become
    /// error-level warnings on the task; sibling series are still decoded.
    /// With `repair` set, segment map mismatches are repaired and the
    /// repaired map replaces the series' map.
    pub fn load_segmentations(
        &mut self,
        store: &dyn BlobStore,
        registry: &MaskCodecRegistry,
        repair: bool,
    ) {
        for entry in &mut self.tasks {
            let key = entry.task.key().to_string();
            for (index, series) in entry.task.series.iter_mut().enumerate() {
                let slot = &mut entry.series[index];
                if slot.segmentation.is_some() {
                    continue;
                }
                let expected = slot.dimensions;

                let decoded = if repair {
                    repair_segmentation(series, store, registry, expected).map(|r| {
                        r.map(|r| {
                            if r.changed() {
                                entry.warnings.push(
                                    FormatWarning::warning(format!(
                                        "segment map repaired: cleared values {:?}, dropped entries {:?}",
                                        r.removed.missing_in_map, r.removed.missing_in_mask
                                    ))
                                    .for_task(&key)
                                    .for_series(index),
                                );
                                series.segment_map = Some(r.segment_map);
                            }
                            r.decoded
                        })
                    })
                } else {
                    decode_segmentation(series, store, registry, expected)
                };

                match decoded {
                    Ok(decoded) => slot.set_segmentation(decoded),
                    Err(e) => {
                        log::warn!("Task {key} series {index}: {e}");
                        entry.warnings.push(
                            FormatWarning::error(e.to_string())
                                .for_task(&key)
                                .for_series(index),
                        );
                    }
                }
            }
        }
    }

    /// Read pixel dimensions of 2D and frame-sequence series from their first
    /// item, for series that do not know them yet.
    ///
    /// A segmentation already loaded with other dimensions is dropped with an
    /// error-level warning.
    pub fn probe_dimensions(&mut self, store: &dyn BlobStore) {
        for entry in &mut self.tasks {
            let key = entry.task.key().to_string();
            for (index, series) in entry.task.series.iter().enumerate() {
                let slot = &mut entry.series[index];
                if slot.dimensions.is_some() {
                    continue;
                }
                match item_dimensions(series, store) {
                    Ok(dimensions) => {
                        slot.dimensions = dimensions;
                        if let Some(expected) = dimensions
                            && let Some(decoded) = &slot.segmentation
                            && decoded.dimensions() != expected
                        {
                            let err = CodecError::ShapeMismatch {
                                expected,
                                actual: decoded.dimensions(),
                            };
                            entry.warnings.push(
                                FormatWarning::error(err.to_string())
                                    .for_task(&key)
                                    .for_series(index),
                            );
                            slot.segmentation = None;
                        }
                    }
                    Err(e) => entry.warnings.push(
                        FormatWarning::warning(format!("cannot read image size: {e}"))
                            .for_task(&key)
                            .for_series(index),
                    ),
                }
            }
        }
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new()
    }
}

/// A task with one entry per series.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    /// The task.
    pub task: Task,

    /// Conversion data, one per series in order.
    pub series: Vec<SeriesEntry>,

    /// Warnings collected while building the entry.
    pub warnings: Vec<FormatWarning>,
}

impl TaskEntry {
    /// Wrap a task with empty series entries.
    pub fn new(task: Task) -> Self {
        let series = vec![SeriesEntry::default(); task.series.len()];
        Self {
            task,
            series,
            warnings: Vec::new(),
        }
    }

    /// Set the dimensions of one series (builder style).
    pub fn with_dimensions(mut self, index: usize, dimensions: Dimensions) -> Self {
        if let Some(entry) = self.series.get_mut(index) {
            entry.dimensions = Some(dimensions);
        }
        self
    }
}

/// Conversion data of one series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesEntry {
    /// Pixel/voxel dimensions, if known.
    pub dimensions: Option<Dimensions>,

    /// Voxel to world mapping, if known.
    pub geometry: Option<VolumeGeometry>,

    /// Decoded segmentation, if loaded.
    pub segmentation: Option<DecodedSegmentation>,
}

impl SeriesEntry {
    /// Dimensions, falling back to those of the decoded segmentation.
    pub fn resolved_dimensions(&self) -> Option<Dimensions> {
        self.dimensions
            .or_else(|| self.segmentation.as_ref().map(DecodedSegmentation::dimensions))
    }

    /// Store a decoded segmentation, taking its geometry when none is set.
    pub fn set_segmentation(&mut self, decoded: Option<DecodedSegmentation>) {
        if let Some(decoded) = &decoded
            && self.geometry.is_none()
        {
            self.geometry = decoded.geometry;
        }
        self.segmentation = decoded;
    }
}
