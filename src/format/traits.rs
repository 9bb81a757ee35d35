//! Trait definitions for task format implementations.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::format::dataset::Dataset;
use crate::format::error::FormatError;
use crate::model::MaskMode;
use crate::taxonomy::Taxonomy;

/// Trait for task format import/export implementations.
///
/// Each format (native JSON, COCO, PNG masks) implements this trait to convert
/// between a [`Dataset`] and the external representation. The taxonomy is
/// passed to every call and never cached.
pub trait TaskFormat: Send + Sync {
    /// Unique identifier for this format (e.g., "native", "coco", "png").
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// File extensions this format uses (e.g., `["json"]` for COCO).
    fn extensions(&self) -> &[&'static str];

    /// Whether [`TaskFormat::import`] is implemented.
    fn supports_import(&self) -> bool;

    /// Whether segmentation masks are written alongside the JSON.
    fn writes_masks(&self) -> bool;

    /// Export a dataset to the specified path.
    ///
    /// For single-file formats, `path` is the output file.
    /// For directory formats, `path` is the output directory.
    fn export(
        &self,
        data: &Dataset,
        taxonomy: &Taxonomy,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError>;

    /// Export the JSON part of a dataset to bytes.
    fn export_to_bytes(
        &self,
        data: &Dataset,
        taxonomy: &Taxonomy,
        options: &ExportOptions,
    ) -> Result<(Vec<u8>, ExportResult), FormatError>;

    /// Import a dataset from the specified path.
    fn import(
        &self,
        path: &Path,
        taxonomy: &Taxonomy,
        options: &ImportOptions,
    ) -> Result<Dataset, FormatError>;
}

/// Options for export operations.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Mask mode to write; `None` keeps each series' own mode.
    pub mask_mode: Option<MaskMode>,

    /// Write 2D masks as PNG instead of NIfTI.
    pub png_masks: bool,

    /// Rasterize shapes of series that have no decoded segmentation.
    pub rasterize: bool,
}

impl ExportOptions {
    /// Create new export options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mask mode to write.
    pub fn mask_mode(mut self, mode: MaskMode) -> Self {
        self.mask_mode = Some(mode);
        self
    }

    /// Write 2D masks as PNG.
    pub fn png_masks(mut self, png: bool) -> Self {
        self.png_masks = png;
        self
    }

    /// Rasterize shapes when no segmentation was decoded.
    pub fn rasterize(mut self, rasterize: bool) -> Self {
        self.rasterize = rasterize;
        self
    }
}

/// Options for import operations.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Directory that relative blob references resolve against.
    pub base_path: Option<PathBuf>,

    /// Decode segmentation sidecars.
    pub decode_segmentations: bool,

    /// Drop segment map entries and mask values that have no counterpart
    /// instead of reporting a mismatch.
    pub repair_segment_maps: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            base_path: None,
            decode_segmentations: true,
            repair_segment_maps: false,
        }
    }
}

impl ImportOptions {
    /// Create new import options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base path for resolving relative references.
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Enable or disable decoding of segmentation sidecars.
    pub fn decode_segmentations(mut self, decode: bool) -> Self {
        self.decode_segmentations = decode;
        self
    }

    /// Repair segment map mismatches instead of reporting them.
    pub fn repair_segment_maps(mut self, repair: bool) -> Self {
        self.repair_segment_maps = repair;
        self
    }
}

/// Result of an export operation.
#[derive(Debug, Default)]
pub struct ExportResult {
    /// Number of tasks exported.
    pub tasks_exported: usize,

    /// Number of annotations exported.
    pub annotations_exported: usize,

    /// Number of mask files written.
    pub masks_written: usize,

    /// Warnings generated during export (e.g., dropped annotations).
    pub warnings: Vec<FormatWarning>,

    /// Files created during export.
    pub files_created: Vec<PathBuf>,
}

impl ExportResult {
    /// Create a new export result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning to the result.
    pub fn add_warning(&mut self, warning: FormatWarning) {
        self.warnings.push(warning);
    }

    /// Check if there were any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Check if there were any errors (severe warnings).
    pub fn has_errors(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w.severity, WarningSeverity::Error))
    }
}

/// Warning generated during format conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatWarning {
    /// Key of the task this warning relates to (if applicable).
    pub task: Option<String>,

    /// Index of the series within the task (if applicable).
    pub series: Option<usize>,

    /// Human-readable warning message.
    pub message: String,

    /// Severity level of the warning.
    pub severity: WarningSeverity,
}

impl FormatWarning {
    /// Create a new warning.
    pub fn new(message: impl Into<String>, severity: WarningSeverity) -> Self {
        Self {
            task: None,
            series: None,
            message: message.into(),
            severity,
        }
    }

    /// Create an info-level warning.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, WarningSeverity::Info)
    }

    /// Create a warning-level warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, WarningSeverity::Warning)
    }

    /// Create an error-level warning.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, WarningSeverity::Error)
    }

    /// Set the task this warning relates to.
    pub fn for_task(mut self, key: impl Into<String>) -> Self {
        self.task = Some(key.into());
        self
    }

    /// Set the series this warning relates to.
    pub fn for_series(mut self, index: usize) -> Self {
        self.series = Some(index);
        self
    }
}

impl fmt::Display for FormatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.task, self.series) {
            (Some(task), Some(series)) => write!(f, "[{task} #{series}] {}", self.message),
            (Some(task), None) => write!(f, "[{task}] {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Severity level for format warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational message, not a problem.
    Info,
    /// Warning that something was skipped or modified.
    Warning,
    /// Error that may affect data integrity.
    Error,
}
