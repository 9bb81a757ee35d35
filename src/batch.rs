//! Batch conversion of many tasks.
//!
//! Each task is fetched, parsed, checked against the taxonomy, and has its
//! segmentations decoded. A failing task never stops the batch: every
//! requested id gets exactly one [`TaskOutcome`], in request order. Codec
//! failures are narrower still and stay attached to their series.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use thiserror::Error;

use crate::model::{Dimensions, ModelError, Task};
use crate::segmentation::{
    CodecError, DecodedSegmentation, MaskCodecRegistry, decode_segmentation, item_dimensions,
};
use crate::taxonomy::{Taxonomy, TaxonomyError, TaxonomyWarning};
use crate::transport::{BlobStore, TaskSource, TransportError};

/// Why a whole task could not be materialized.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The task could not be fetched.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The task JSON is malformed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The task references categories the taxonomy lacks.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    /// Converting the task panicked.
    #[error("conversion panicked: {0}")]
    Panicked(String),
}

/// A task that failed, with the id it was requested by.
#[derive(Debug)]
pub struct TaskFailure {
    /// Requested task id.
    pub task_id: String,
    /// Cause of the failure.
    pub error: BatchError,
}

/// Decoding result for one series.
#[derive(Debug)]
pub struct SeriesOutcome {
    /// Position of the series within its task.
    pub index: usize,
    /// Image size read from the series' first item, for 2D and frame series.
    pub dimensions: Option<Dimensions>,
    /// Decoded segmentation, `None` when the series has none.
    pub segmentation: Result<Option<DecodedSegmentation>, CodecError>,
}

/// A parsed, checked task with its decoded segmentations.
#[derive(Debug)]
pub struct MaterializedTask {
    /// The task.
    pub task: Task,
    /// Non-fatal taxonomy findings.
    pub warnings: Vec<TaxonomyWarning>,
    /// One entry per series, in series order.
    pub series: Vec<SeriesOutcome>,
}

impl MaterializedTask {
    /// Series whose segmentation failed to decode.
    pub fn failed_series(&self) -> impl Iterator<Item = (usize, &CodecError)> {
        self.series
            .iter()
            .filter_map(|s| s.segmentation.as_ref().err().map(|e| (s.index, e)))
    }
}

/// Outcome for one requested task.
pub type TaskOutcome = Result<MaterializedTask, TaskFailure>;

/// Collaborators shared by every task of a batch.
#[derive(Clone, Copy)]
pub struct BatchContext<'a> {
    /// Where task JSON comes from.
    pub tasks: &'a dyn TaskSource,
    /// Where mask files come from.
    pub blobs: &'a dyn BlobStore,
    /// Project taxonomy, read-only for the whole batch.
    pub taxonomy: &'a Taxonomy,
    /// Mask file codecs.
    pub codecs: &'a MaskCodecRegistry,
}

impl BatchContext<'_> {
    /// Materialize one task.
    ///
    /// A panic while converting the task is caught and reported as a
    /// [`BatchError::Panicked`] failure.
    pub fn materialize_one(&self, task_id: &str) -> TaskOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.try_materialize(task_id)))
            .unwrap_or_else(|payload| Err(BatchError::Panicked(panic_message(&*payload))));
        result.map_err(|error| {
            log::warn!("Task {task_id} failed: {error}");
            TaskFailure {
                task_id: task_id.to_string(),
                error,
            }
        })
    }

    fn try_materialize(&self, task_id: &str) -> Result<MaterializedTask, BatchError> {
        let raw = self.tasks.fetch_task(task_id)?;
        let task = Task::parse(&raw)?;
        let warnings = self.taxonomy.validate_task(&task)?;

        let series = task
            .series
            .iter()
            .enumerate()
            .map(|(index, series)| {
                let dimensions = item_dimensions(series, self.blobs).unwrap_or_else(|e| {
                    log::debug!("Task {task_id} series {index}: size unknown: {e}");
                    None
                });
                let segmentation =
                    decode_segmentation(series, self.blobs, self.codecs, dimensions);
                if let Err(e) = &segmentation {
                    log::warn!("Task {task_id} series {index}: {e}");
                }
                SeriesOutcome {
                    index,
                    dimensions,
                    segmentation,
                }
            })
            .collect();

        Ok(MaterializedTask {
            task,
            warnings,
            series,
        })
    }
}

/// Materialize every requested task on a pool of up to `concurrency` threads.
///
/// The returned outcomes are in the same order as `task_ids`.
pub fn materialize(
    context: BatchContext<'_>,
    task_ids: &[String],
    concurrency: usize,
) -> Vec<TaskOutcome> {
    let workers = concurrency.clamp(1, task_ids.len().max(1));
    let outcomes: Vec<TaskOutcome> = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
    {
        Ok(pool) => pool.install(|| {
            task_ids
                .par_iter()
                .map(|task_id| context.materialize_one(task_id))
                .collect()
        }),
        Err(e) => {
            log::warn!("Cannot start {workers} worker thread(s), converting in order: {e}");
            task_ids
                .iter()
                .map(|task_id| context.materialize_one(task_id))
                .collect()
        }
    };

    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    log::info!(
        "Materialized {} task(s), {} failed",
        outcomes.len() - failed,
        failed
    );
    outcomes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
