//! Boundary with the platform transport.
//!
//! The conversion engine only ever needs to fetch task JSON, fetch and store
//! blobs, and fetch a project's taxonomy. Those three capabilities are traits
//! here; HTTP clients implement them elsewhere. Two implementations ship with
//! the crate: [`MemoryStore`] for data already in memory, and
//! [`LocalDirectory`] for an exported directory on disk.
//!
//! ## Directory layout
//!
//! ```text
//! <root>/
//!   taxonomy.json          # or taxonomies/<project-id>.json
//!   tasks/*.json           # one task object or an array of tasks per file
//!   <blob references>      # relative paths
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;

use crate::taxonomy::{Taxonomy, TaxonomyError};

/// Errors raised by transport implementations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No task, blob, or taxonomy exists under the reference.
    #[error("Not found: {reference}")]
    NotFound {
        /// Task id, blob reference, or project id
        reference: String,
    },

    /// A blob reference escapes the store or is otherwise unusable.
    #[error("Invalid reference '{0}'")]
    InvalidReference(String),

    /// The backing store is not usable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored taxonomy is malformed.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

impl TransportError {
    fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }
}

/// Selection criteria for [`TaskSource::list_tasks`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    /// Only tasks currently in this stage.
    pub stage: Option<String>,
    /// Only these task ids (or names), in this order.
    pub task_ids: Option<Vec<String>>,
    /// At most this many tasks.
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Filter by stage name (builder style).
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Filter by task ids (builder style).
    pub fn with_task_ids(mut self, ids: Vec<String>) -> Self {
        self.task_ids = Some(ids);
        self
    }

    /// Limit the number of results (builder style).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn apply(&self, tasks: Vec<Value>) -> Vec<Value> {
        let tasks: Vec<Value> = match &self.task_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| tasks.iter().find(|t| task_key(t) == Some(id.as_str())))
                .cloned()
                .collect(),
            None => tasks,
        };
        tasks
            .into_iter()
            .filter(|t| match &self.stage {
                Some(stage) => {
                    t.get("currentStageName").and_then(Value::as_str) == Some(stage.as_str())
                }
                None => true,
            })
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Id of a raw task: `taskId`, falling back to `name`.
fn task_key(task: &Value) -> Option<&str> {
    task.get("taskId")
        .and_then(Value::as_str)
        .or_else(|| task.get("name").and_then(Value::as_str))
}

/// Source of raw task JSON.
pub trait TaskSource: Send + Sync {
    /// Fetch one task by id.
    fn fetch_task(&self, task_id: &str) -> Result<Value, TransportError>;

    /// List tasks matching a filter.
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Value>, TransportError>;

    /// Change a task's priority on the platform.
    fn update_priority(&self, task_id: &str, priority: f64) -> Result<(), TransportError>;
}

/// Blob storage for images and mask files.
pub trait BlobStore: Send + Sync {
    /// Read a blob.
    fn fetch_blob(&self, reference: &str) -> Result<Vec<u8>, TransportError>;

    /// Write a blob, returning the reference to fetch it by.
    fn store_blob(&self, name_hint: &str, data: Vec<u8>) -> Result<String, TransportError>;
}

/// Source of project taxonomies.
pub trait TaxonomySource: Send + Sync {
    /// Fetch the taxonomy in force for a project.
    fn resolve_taxonomy(&self, project_id: &str) -> Result<Taxonomy, TransportError>;
}

/// In-process store for tasks, blobs, and taxonomies.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<Vec<Value>>,
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    taxonomies: RwLock<BTreeMap<String, Taxonomy>>,
}

fn poisoned<T>(_: T) -> TransportError {
    TransportError::Unavailable("lock poisoned".into())
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw task.
    pub fn insert_task(&self, task: Value) -> Result<(), TransportError> {
        self.tasks.write().map_err(poisoned)?.push(task);
        Ok(())
    }

    /// Add a blob under an exact reference.
    pub fn insert_blob(
        &self,
        reference: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(reference.into(), data);
        Ok(())
    }

    /// Set a project's taxonomy.
    pub fn insert_taxonomy(
        &self,
        project_id: impl Into<String>,
        taxonomy: Taxonomy,
    ) -> Result<(), TransportError> {
        self.taxonomies
            .write()
            .map_err(poisoned)?
            .insert(project_id.into(), taxonomy);
        Ok(())
    }

    /// References of every stored blob.
    pub fn blob_references(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.blobs.read().map_err(poisoned)?.keys().cloned().collect())
    }
}

impl TaskSource for MemoryStore {
    fn fetch_task(&self, task_id: &str) -> Result<Value, TransportError> {
        self.tasks
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|t| task_key(t) == Some(task_id))
            .cloned()
            .ok_or_else(|| TransportError::not_found(task_id))
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Value>, TransportError> {
        let tasks = self.tasks.read().map_err(poisoned)?.clone();
        Ok(filter.apply(tasks))
    }

    fn update_priority(&self, task_id: &str, priority: f64) -> Result<(), TransportError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let task = tasks
            .iter_mut()
            .find(|t| task_key(t) == Some(task_id))
            .ok_or_else(|| TransportError::not_found(task_id))?;
        task["priority"] = Value::from(priority);
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn fetch_blob(&self, reference: &str) -> Result<Vec<u8>, TransportError> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(reference)
            .cloned()
            .ok_or_else(|| TransportError::not_found(reference))
    }

    fn store_blob(&self, name_hint: &str, data: Vec<u8>) -> Result<String, TransportError> {
        self.insert_blob(name_hint, data)?;
        Ok(name_hint.to_string())
    }
}

impl TaxonomySource for MemoryStore {
    fn resolve_taxonomy(&self, project_id: &str) -> Result<Taxonomy, TransportError> {
        self.taxonomies
            .read()
            .map_err(poisoned)?
            .get(project_id)
            .cloned()
            .ok_or_else(|| TransportError::not_found(project_id))
    }
}

/// Tasks, blobs, and taxonomy stored under a local directory.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    /// Directory holding task files.
    pub const TASKS_DIR: &'static str = "tasks";
    /// Taxonomy file used for every project.
    pub const TAXONOMY_FILE: &'static str = "taxonomy.json";
    /// Directory of per-project taxonomy files.
    pub const TAXONOMIES_DIR: &'static str = "taxonomies";

    /// Open a directory store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob reference to a path inside the root.
    fn blob_path(&self, reference: &str) -> Result<PathBuf, TransportError> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.is_empty() || escapes {
            return Err(TransportError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Every task file, sorted by name.
    fn task_files(&self) -> Result<Vec<PathBuf>, TransportError> {
        let dir = self.root.join(Self::TASKS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Tasks of one file, whether it holds an object or an array.
    fn read_task_file(path: &Path) -> Result<Vec<Value>, TransportError> {
        let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(match value {
            Value::Array(tasks) => tasks,
            task => vec![task],
        })
    }

    fn all_tasks(&self) -> Result<Vec<Value>, TransportError> {
        let mut tasks = Vec::new();
        for file in self.task_files()? {
            tasks.extend(Self::read_task_file(&file)?);
        }
        Ok(tasks)
    }

    /// Write a task file under `tasks/`.
    pub fn write_tasks(&self, file_name: &str, tasks: &[Value]) -> Result<PathBuf, TransportError> {
        let dir = self.root.join(Self::TASKS_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(tasks)?)?;
        Ok(path)
    }
}

impl TaskSource for LocalDirectory {
    fn fetch_task(&self, task_id: &str) -> Result<Value, TransportError> {
        self.all_tasks()?
            .into_iter()
            .find(|t| task_key(t) == Some(task_id))
            .ok_or_else(|| TransportError::not_found(task_id))
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Value>, TransportError> {
        Ok(filter.apply(self.all_tasks()?))
    }

    fn update_priority(&self, task_id: &str, priority: f64) -> Result<(), TransportError> {
        for file in self.task_files()? {
            let original: Value = serde_json::from_str(&fs::read_to_string(&file)?)?;
            let mut value = original.clone();
            let found = match &mut value {
                Value::Array(tasks) => tasks.iter_mut().find(|t| task_key(t) == Some(task_id)),
                task if task_key(task) == Some(task_id) => Some(task),
                _ => None,
            };
            if let Some(task) = found {
                task["priority"] = Value::from(priority);
                fs::write(&file, serde_json::to_string_pretty(&value)?)?;
                log::info!("Updated priority of {task_id} in {}", file.display());
                return Ok(());
            }
        }
        Err(TransportError::not_found(task_id))
    }
}

impl BlobStore for LocalDirectory {
    fn fetch_blob(&self, reference: &str) -> Result<Vec<u8>, TransportError> {
        let path = self.blob_path(reference)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransportError::not_found(reference),
            _ => TransportError::Io(e),
        })
    }

    fn store_blob(&self, name_hint: &str, data: Vec<u8>) -> Result<String, TransportError> {
        let path = self.blob_path(name_hint)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(name_hint.to_string())
    }
}

impl TaxonomySource for LocalDirectory {
    fn resolve_taxonomy(&self, project_id: &str) -> Result<Taxonomy, TransportError> {
        let per_project = self
            .root
            .join(Self::TAXONOMIES_DIR)
            .join(format!("{project_id}.json"));
        let path = if per_project.is_file() {
            per_project
        } else {
            self.root.join(Self::TAXONOMY_FILE)
        };
        if !path.is_file() {
            return Err(TransportError::not_found(project_id));
        }
        Ok(Taxonomy::from_json(&fs::read_to_string(path)?)?)
    }
}
