//! COCO JSON format implementation.
//!
//! Implements the COCO (Common Objects in Context) annotation format,
//! which is widely used for object detection and segmentation tasks.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::format::dataset::{Dataset, TaskEntry};
use crate::format::error::FormatError;
use crate::format::traits::{ExportOptions, ExportResult, FormatWarning, ImportOptions, TaskFormat};
use crate::model::{
    Annotation, BoundingBox, CategoryRef, Dimensions, Point2D, Polygon, Series, SeriesKind, Task,
};
use crate::taxonomy::{ResolvedCategory, Taxonomy};

/// COCO JSON format.
///
/// Supports:
/// - Bounding boxes (bbox)
/// - Polygons (segmentation)
/// - Categories with supercategories, ids taken from the taxonomy's class ids
///
/// Does not support:
/// - Any other annotation variant (dropped with a warning)
/// - 3D volumes (skipped with a warning)
/// - RLE segmentations on import (skipped with a warning)
pub struct CocoFormat;

impl TaskFormat for CocoFormat {
    fn id(&self) -> &'static str {
        "coco"
    }

    fn display_name(&self) -> &'static str {
        "COCO (JSON)"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn supports_import(&self) -> bool {
        true
    }

    fn writes_masks(&self) -> bool {
        false
    }

    fn export(
        &self,
        data: &Dataset,
        taxonomy: &Taxonomy,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError> {
        log::info!("Exporting COCO annotations to {:?}", path);

        let (bytes, mut result) = self.export_to_bytes(data, taxonomy, options)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        result.files_created = vec![path.to_path_buf()];

        Ok(result)
    }

    fn export_to_bytes(
        &self,
        data: &Dataset,
        taxonomy: &Taxonomy,
        _options: &ExportOptions,
    ) -> Result<(Vec<u8>, ExportResult), FormatError> {
        let mut result = ExportResult::new();
        let mut coco = CocoDataset::new();

        // Categories come from the taxonomy, not from the tasks
        for category in taxonomy.iter() {
            if let Some(id) = category.class_id() {
                coco.categories.push(CocoCategory {
                    id,
                    name: category.name().to_string(),
                    supercategory: category.parent().unwrap_or("none").to_string(),
                });
            }
        }

        for entry in &data.tasks {
            let key = entry.task.key();
            for (index, series) in entry.task.series.iter().enumerate() {
                let dims = entry.series.get(index).and_then(|s| s.resolved_dimensions());
                self.export_series(
                    &mut coco,
                    &mut result,
                    taxonomy,
                    (key, index),
                    series,
                    dims,
                )?;
            }
        }
        result.tasks_exported = data.tasks.len();
        result.annotations_exported = coco.annotations.len();

        let json = serde_json::to_string_pretty(&coco)?;

        log::info!(
            "Exported {} images with {} annotations ({} warnings)",
            coco.images.len(),
            result.annotations_exported,
            result.warnings.len()
        );

        Ok((json.into_bytes(), result))
    }

    fn import(
        &self,
        path: &Path,
        taxonomy: &Taxonomy,
        _options: &ImportOptions,
    ) -> Result<Dataset, FormatError> {
        log::info!("Importing COCO annotations from {:?}", path);

        let json = std::fs::read_to_string(path)?;
        let coco: CocoDataset = serde_json::from_str(&json)?;

        // COCO category id to taxonomy category
        let mut categories: HashMap<i64, CategoryRef> = HashMap::new();
        for cat in &coco.categories {
            let resolved = match taxonomy.find_by_class_id(cat.id) {
                Some(resolved) => resolved,
                None => taxonomy.resolve(&CategoryRef::name(&cat.name))?,
            };
            categories.insert(cat.id, category_ref(&resolved));
        }

        let image_map: HashMap<u64, usize> = coco
            .images
            .iter()
            .enumerate()
            .map(|(idx, img)| (img.id, idx))
            .collect();

        let mut entries: Vec<TaskEntry> = coco
            .images
            .iter()
            .map(|img| {
                let task = Task::new(&img.file_name, vec![Series::new(img.file_name.as_str())]);
                let entry = TaskEntry::new(task);
                if img.width > 0 && img.height > 0 {
                    entry.with_dimensions(0, Dimensions::image(img.width, img.height))
                } else {
                    entry
                }
            })
            .collect();

        for ann in &coco.annotations {
            let Some(&idx) = image_map.get(&ann.image_id) else {
                log::warn!("Annotation {} references unknown image {}", ann.id, ann.image_id);
                continue;
            };
            let entry = &mut entries[idx];
            let image = &coco.images[idx];
            let warn = |message: String| {
                FormatWarning::warning(message)
                    .for_task(&image.file_name)
                    .for_series(0)
            };

            let Some(category) = categories.get(&ann.category_id) else {
                entry.warnings.push(warn(format!(
                    "annotation {} has unknown category id {}",
                    ann.id, ann.category_id
                )));
                continue;
            };
            if image.width == 0 || image.height == 0 {
                entry.warnings.push(warn(format!(
                    "annotation {} skipped: image has no dimensions",
                    ann.id
                )));
                continue;
            }

            let mut notes = Vec::new();
            let converted =
                self.convert_coco_annotation(ann, category, image.width, image.height, &mut notes);
            entry.warnings.extend(notes.into_iter().map(&warn));
            match converted {
                Ok(annotation) => {
                    if let Err(e) = entry.task.series[0].push(annotation) {
                        entry.warnings.push(warn(format!("annotation {}: {e}", ann.id)));
                    }
                }
                Err(message) => entry.warnings.push(warn(message)),
            }
        }

        let mut data = Dataset::new();
        data.tasks = entries;

        log::info!(
            "Imported {} images with {} annotations",
            data.tasks.len(),
            data.total_annotations()
        );

        Ok(data)
    }
}

impl CocoFormat {
    /// Add the images and annotations of one series.
    fn export_series(
        &self,
        coco: &mut CocoDataset,
        result: &mut ExportResult,
        taxonomy: &Taxonomy,
        (key, index): (&str, usize),
        series: &Series,
        dims: Option<Dimensions>,
    ) -> Result<(), FormatError> {
        let warn = |message: String| FormatWarning::warning(message).for_task(key).for_series(index);
        let kind = series.kind();

        if kind == SeriesKind::Volume3D {
            if !series.annotations().is_empty() {
                result.add_warning(warn(format!(
                    "3D volume skipped with {} annotation(s)",
                    series.annotations().len()
                )));
            }
            return Ok(());
        }

        let Some(dims) = dims else {
            result.add_warning(
                FormatWarning::error("image size unknown; series skipped")
                    .for_task(key)
                    .for_series(index),
            );
            return Ok(());
        };

        // Every frame that holds a box or polygon becomes an image
        let frames: BTreeSet<u32> = match kind {
            SeriesKind::Video => series
                .annotations()
                .iter()
                .filter(|a| is_coco_shape(a))
                .map(|a| a.video().map_or(0, |v| v.frame_index))
                .collect(),
            _ => BTreeSet::from([0]),
        };
        let mut image_ids: HashMap<u32, u64> = HashMap::new();
        for frame in frames {
            let image_id = coco.images.len() as u64 + 1;
            coco.images.push(CocoImage {
                id: image_id,
                file_name: frame_name(series, kind, frame),
                width: dims.width,
                height: dims.height,
                license: None,
            });
            image_ids.insert(frame, image_id);
        }

        for annotation in series.annotations() {
            if !is_coco_shape(annotation) {
                result.add_warning(warn(format!(
                    "{} cannot be represented in COCO and was dropped",
                    annotation.kind()
                )));
                continue;
            }
            let frame = annotation.video().map_or(0, |v| v.frame_index);
            let Some(&image_id) = image_ids.get(&frame) else {
                continue;
            };
            let Some(category) = annotation.category() else {
                continue;
            };
            let Some(category_id) = taxonomy.resolve(category)?.class_id() else {
                result.add_warning(warn(format!(
                    "category '{category}' has no class id; {} dropped",
                    annotation.kind()
                )));
                continue;
            };

            let id = coco.annotations.len() as u64 + 1;
            if let Some(coco_ann) =
                self.convert_annotation(annotation, id, image_id, category_id, dims)
            {
                coco.annotations.push(coco_ann);
            }
        }
        Ok(())
    }

    /// Convert a box or polygon to COCO pixel space.
    fn convert_annotation(
        &self,
        annotation: &Annotation,
        id: u64,
        image_id: u64,
        category_id: i64,
        dims: Dimensions,
    ) -> Option<CocoAnnotation> {
        let (bbox, segmentation, area) = match annotation {
            Annotation::BoundingBox(bbox) => {
                let pixels = bbox.to_pixels(dims.width, dims.height);
                (Some(pixels), None, pixels[2] * pixels[3])
            }
            Annotation::Polygon(polygon) => {
                let vertices: Vec<(f64, f64)> = polygon
                    .points
                    .iter()
                    .map(|p| p.to_pixels(dims.width, dims.height))
                    .collect();
                // Convert vertices to flat array [x1, y1, x2, y2, ...]
                let flat: Vec<f64> = vertices.iter().flat_map(|(x, y)| [*x, *y]).collect();
                (
                    polygon_bbox(&vertices),
                    Some(CocoSegmentation::Polygons(vec![flat])),
                    polygon_area(&vertices),
                )
            }
            _ => return None,
        };

        Some(CocoAnnotation {
            id,
            image_id,
            category_id,
            bbox,
            segmentation,
            area,
            iscrowd: 0,
        })
    }

    /// Convert a COCO annotation to a box or polygon.
    ///
    /// Lossy fallbacks to the bbox are described in `notes`.
    fn convert_coco_annotation(
        &self,
        ann: &CocoAnnotation,
        category: &CategoryRef,
        width: usize,
        height: usize,
        notes: &mut Vec<String>,
    ) -> Result<Annotation, String> {
        // Prefer segmentation if available
        match &ann.segmentation {
            Some(CocoSegmentation::Polygons(polygons)) => {
                let first = polygons.first().filter(|p| p.len() >= 6);
                if first.is_none() && ann.bbox.is_some() {
                    notes.push(format!(
                        "annotation {} has a polygon with fewer than 3 points; bbox used instead",
                        ann.id
                    ));
                }
                if let Some(first) = first {
                    if polygons.len() > 1 {
                        log::debug!(
                            "Annotation {} has {} polygons; keeping the first",
                            ann.id,
                            polygons.len()
                        );
                    }
                    let points = first
                        .chunks_exact(2)
                        .map(|c| Point2D::from_pixels(c[0], c[1], width, height))
                        .collect();
                    return Ok(Polygon::new(points, category.clone()).into());
                }
            }
            Some(CocoSegmentation::Rle(_)) if ann.bbox.is_none() => {
                return Err(format!("annotation {} uses RLE and was skipped", ann.id));
            }
            Some(CocoSegmentation::Rle(_)) => notes.push(format!(
                "annotation {} uses RLE; only its bbox was kept",
                ann.id
            )),
            _ => {}
        }

        // Fall back to bounding box
        let Some([x, y, w, h]) = ann.bbox else {
            return Err(format!("annotation {} has no bbox or polygon", ann.id));
        };
        let top_left = Point2D::from_pixels(x, y, width, height);
        let w_norm = (w / width as f64).clamp(0.0, 1.0 - top_left.xnorm);
        let h_norm = (h / height as f64).clamp(0.0, 1.0 - top_left.ynorm);
        Ok(BoundingBox::new(top_left, w_norm, h_norm, category.clone()).into())
    }
}

fn is_coco_shape(annotation: &Annotation) -> bool {
    matches!(
        annotation,
        Annotation::BoundingBox(_) | Annotation::Polygon(_)
    )
}

/// Image file name of one frame of a series.
fn frame_name(series: &Series, kind: SeriesKind, frame: u32) -> String {
    let items = series.items.as_slice();
    let first = items.first().map(String::as_str).unwrap_or_default();
    match kind {
        SeriesKind::Video if items.len() > 1 => items
            .get(frame as usize)
            .cloned()
            .unwrap_or_else(|| format!("{first}#{frame}")),
        SeriesKind::Video => format!("{first}#{frame}"),
        _ => first.to_string(),
    }
}

/// Reference for an imported category: its name at the top level, its path
/// below that.
fn category_ref(resolved: &ResolvedCategory<'_>) -> CategoryRef {
    match resolved.parent() {
        None => CategoryRef::name(resolved.name()),
        Some(_) => resolved.to_ref(),
    }
}

/// Calculate the area of a polygon using the shoelace formula.
fn polygon_area(vertices: &[(f64, f64)]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    let n = vertices.len();
    for i in 0..n {
        let j = (i + 1) % n;
        area += vertices[i].0 * vertices[j].1;
        area -= vertices[j].0 * vertices[i].1;
    }
    (area / 2.0).abs()
}

/// Calculate the bounding box of a polygon.
fn polygon_bbox(vertices: &[(f64, f64)]) -> Option<[f64; 4]> {
    if vertices.is_empty() {
        return None;
    }

    let min_x = vertices.iter().map(|(x, _)| *x).fold(f64::MAX, f64::min);
    let max_x = vertices.iter().map(|(x, _)| *x).fold(f64::MIN, f64::max);
    let min_y = vertices.iter().map(|(_, y)| *y).fold(f64::MAX, f64::min);
    let max_y = vertices.iter().map(|(_, y)| *y).fold(f64::MIN, f64::max);

    Some([min_x, min_y, max_x - min_x, max_y - min_y])
}

// COCO format structures

#[derive(Debug, Serialize, Deserialize)]
struct CocoDataset {
    #[serde(default)]
    info: CocoInfo,
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
    #[serde(default)]
    licenses: Vec<CocoLicense>,
}

impl CocoDataset {
    fn new() -> Self {
        Self {
            info: CocoInfo {
                description: "Exported by rbtask".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..CocoInfo::default()
            },
            images: Vec::new(),
            annotations: Vec::new(),
            categories: Vec::new(),
            licenses: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CocoInfo {
    #[serde(default)]
    year: u32,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    contributor: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    date_created: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    #[serde(default)]
    width: usize,
    #[serde(default)]
    height: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segmentation: Option<CocoSegmentation>,
    #[serde(default)]
    area: f64,
    #[serde(default)]
    iscrowd: u8,
}

/// Polygon lists, or a run-length encoded mask (kept opaque).
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CocoSegmentation {
    Polygons(Vec<Vec<f64>>),
    Rle(Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: i64,
    name: String,
    #[serde(default)]
    supercategory: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoLicense {
    id: u32,
    name: String,
    url: String,
}
