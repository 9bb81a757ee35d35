//! PNG mask tree format.
//!
//! Same layout as the native format, but planar masks are written as 8/16-bit
//! grayscale PNGs and shapes are rasterized when a series has no
//! segmentation of its own. A `class_map.json` next to `tasks.json` maps
//! every category path to its mask value so consumers can read semantic
//! masks without the taxonomy.

use std::fs;
use std::path::Path;

use crate::format::dataset::Dataset;
use crate::format::error::FormatError;
use crate::format::formats::tree::{self, MaskPreference};
use crate::format::traits::{ExportOptions, ExportResult, ImportOptions, TaskFormat};
use crate::taxonomy::Taxonomy;

/// File holding the category path to class value map.
pub const CLASS_MAP_FILE: &str = "class_map.json";

/// Directory of PNG masks with task JSON.
pub struct PngMaskFormat;

impl TaskFormat for PngMaskFormat {
    fn id(&self) -> &'static str {
        "png"
    }

    fn display_name(&self) -> &'static str {
        "PNG masks"
    }

    fn extensions(&self) -> &[&'static str] {
        &["png"]
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
        log::info!("Exporting PNG masks to {:?}", path);

        let options = options.clone().png_masks(true).rasterize(true);
        let mut result =
            tree::write_tree(self.id(), data, taxonomy, path, &options, MaskPreference::Png)?;

        let class_map_path = path.join(CLASS_MAP_FILE);
        fs::write(
            &class_map_path,
            serde_json::to_string_pretty(&taxonomy.class_map())?,
        )?;
        result.files_created.push(class_map_path);

        log::info!(
            "Exported {} tasks with {} mask files ({} warnings)",
            result.tasks_exported,
            result.masks_written,
            result.warnings.len()
        );
        Ok(result)
    }

    fn export_to_bytes(
        &self,
        _data: &Dataset,
        _taxonomy: &Taxonomy,
        _options: &ExportOptions,
    ) -> Result<(Vec<u8>, ExportResult), FormatError> {
        Err(FormatError::UnsupportedOperation(
            "PNG masks are a directory tree; export to a path instead".into(),
        ))
    }

    fn import(
        &self,
        path: &Path,
        taxonomy: &Taxonomy,
        options: &ImportOptions,
    ) -> Result<Dataset, FormatError> {
        log::info!("Importing PNG masks from {:?}", path);

        let data = tree::read_tree(path, taxonomy, options)?;

        log::info!(
            "Imported {} tasks ({} warnings)",
            data.tasks.len(),
            data.warnings().count()
        );
        Ok(data)
    }
}
