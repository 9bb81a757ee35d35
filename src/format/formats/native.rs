//! Native task JSON format.
//!
//! The platform's own task structure with NIfTI segmentation sidecars. This
//! is the only lossless format: every annotation variant and every task field
//! survives export and import.

use std::path::Path;

use crate::format::dataset::Dataset;
use crate::format::error::FormatError;
use crate::format::formats::tree::{self, MaskPreference};
use crate::format::traits::{ExportOptions, ExportResult, ImportOptions, TaskFormat};
use crate::model::Task;
use crate::taxonomy::Taxonomy;

/// Native task JSON with NIfTI sidecars.
pub struct NativeFormat;

impl TaskFormat for NativeFormat {
    fn id(&self) -> &'static str {
        "native"
    }

    fn display_name(&self) -> &'static str {
        "Task JSON + NIfTI"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json", "nii.gz"]
    }

    fn supports_import(&self) -> bool {
        true
    }

    fn writes_masks(&self) -> bool {
        true
    }

    fn export(
        &self,
        data: &Dataset,
        taxonomy: &Taxonomy,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError> {
        log::info!("Exporting native tasks to {:?}", path);

        let result = tree::write_tree(
            self.id(),
            data,
            taxonomy,
            path,
            options,
            MaskPreference::Nifti,
        )?;

        log::info!(
            "Exported {} tasks with {} annotations and {} mask files ({} warnings)",
            result.tasks_exported,
            result.annotations_exported,
            result.masks_written,
            result.warnings.len()
        );
        Ok(result)
    }

    fn export_to_bytes(
        &self,
        data: &Dataset,
        _taxonomy: &Taxonomy,
        _options: &ExportOptions,
    ) -> Result<(Vec<u8>, ExportResult), FormatError> {
        let tasks: Vec<Task> = data.tasks.iter().map(|e| e.task.clone()).collect();
        let bytes = tree::tasks_to_json(&tasks)?;

        let result = ExportResult {
            tasks_exported: tasks.len(),
            annotations_exported: data.total_annotations(),
            warnings: data.warnings().cloned().collect(),
            ..ExportResult::default()
        };
        Ok((bytes, result))
    }

    fn import(
        &self,
        path: &Path,
        taxonomy: &Taxonomy,
        options: &ImportOptions,
    ) -> Result<Dataset, FormatError> {
        log::info!("Importing native tasks from {:?}", path);

        let data = tree::read_tree(path, taxonomy, options)?;

        log::info!(
            "Imported {} tasks with {} annotations ({} warnings)",
            data.tasks.len(),
            data.total_annotations(),
            data.warnings().count()
        );
        Ok(data)
    }
}
