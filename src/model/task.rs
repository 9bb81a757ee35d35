//! Task model: series list, task classification, workflow and audit fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::model::annotation::{Annotation, Classification};
use crate::model::error::ModelError;
use crate::model::series::{OneOrMany, Series, SeriesRepr};

/// Agreement score between a task's labeler and another labeler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusScore {
    /// Other labeler's user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_user: Option<String>,
    /// Other labeler's user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_user_id: Option<String>,
    /// Other labeler's email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_user_email: Option<String>,
    /// Agreement in `[0, 1]`.
    pub score: f64,
}

/// One annotation task.
///
/// A task owns its series exclusively. Fields mirror the platform's task JSON;
/// timestamps are kept as the platform's ISO strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Task name, unique within a project (not checked locally).
    pub name: String,
    /// Series in order; never empty.
    pub series: Vec<Series>,
    /// Task-level classification.
    pub classification: Option<Classification>,
    /// Platform task id.
    pub task_id: Option<String>,
    /// Workflow stage the task is in.
    pub current_stage_name: Option<String>,
    /// Queue priority in `[0, 1]`.
    pub priority: Option<f64>,
    /// Free-form string metadata.
    pub meta_data: Option<BTreeMap<String, String>>,
    /// Stage name to pre-assigned user(s).
    pub pre_assign: Option<BTreeMap<String, OneOrMany>>,
    /// Workflow status.
    pub status: Option<String>,
    /// Creator.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Last editor.
    pub updated_by: Option<String>,
    /// Last editor's user id.
    pub updated_by_user_id: Option<String>,
    /// Last edit timestamp.
    pub updated_at: Option<String>,
    /// Whether the task went through consensus.
    pub consensus: Option<bool>,
    /// Aggregate consensus score.
    pub consensus_score: Option<f64>,
    /// Every labeler's version of the task.
    pub consensus_tasks: Option<Vec<Task>>,
    /// Per-labeler agreement scores.
    pub scores: Option<Vec<ConsensusScore>>,
    /// Reference labels the consensus was scored against.
    pub super_truth: Option<Box<Task>>,
}

impl Task {
    /// Create a task with the given name and series.
    pub fn new(name: impl Into<String>, series: Vec<Series>) -> Self {
        Self {
            name: name.into(),
            series,
            classification: None,
            task_id: None,
            current_stage_name: None,
            priority: None,
            meta_data: None,
            pre_assign: None,
            status: None,
            created_by: None,
            created_at: None,
            updated_by: None,
            updated_by_user_id: None,
            updated_at: None,
            consensus: None,
            consensus_score: None,
            consensus_tasks: None,
            scores: None,
            super_truth: None,
        }
    }

    /// Parse and validate a task from its JSON value.
    pub fn parse(value: &Value) -> Result<Self, ModelError> {
        let repr = TaskRepr::deserialize(value)
            .map_err(|e| ModelError::malformed_task(format!("invalid task: {e}")))?;
        Self::from_repr(repr)
    }

    /// Parse a JSON string holding one task.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let value: Value = serde_json::from_str(json)?;
        Self::parse(&value)
    }

    /// Parse a JSON array of tasks.
    pub fn parse_many(value: &Value) -> Result<Vec<Self>, ModelError> {
        let Some(items) = value.as_array() else {
            return Err(ModelError::malformed_task("expected an array of tasks"));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| Self::parse(item).map_err(|e| e.within(&format!("task #{i}"))))
            .collect()
    }

    /// Serialize to the platform JSON object.
    pub fn to_value(&self) -> Result<Value, ModelError> {
        Ok(serde_json::to_value(self.to_repr()?)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(&self.to_repr()?)?)
    }

    /// Identifier used to name per-task sidecar files: the task id when known,
    /// the name otherwise.
    pub fn key(&self) -> &str {
        self.task_id.as_deref().unwrap_or(&self.name)
    }

    /// Iterate every annotation in every series, with its series index.
    pub fn annotations(&self) -> impl Iterator<Item = (usize, &Annotation)> {
        self.series
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.annotations().iter().map(move |a| (i, a)))
    }

    /// Return a copy with a new priority, validated to `[0, 1]`.
    pub fn with_priority(&self, priority: f64) -> Result<Self, ModelError> {
        check_priority(priority)?;
        Ok(Self {
            priority: Some(priority),
            ..self.clone()
        })
    }

    /// Check every structural invariant of the task and its series.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::malformed_task("task name is empty"));
        }
        if self.series.is_empty() {
            return Err(ModelError::malformed_task(format!(
                "task '{}' has no series",
                self.name
            )));
        }
        if let Some(classification) = &self.classification
            && classification.video.is_some()
        {
            return Err(ModelError::malformed_task(
                "task classification cannot carry video metadata",
            ));
        }
        if let Some(priority) = self.priority {
            check_priority(priority)?;
        }
        for (i, series) in self.series.iter().enumerate() {
            series
                .validate()
                .map_err(|e| e.within(&format!("series #{i}")))?;
        }
        for task in self.consensus_tasks.iter().flatten() {
            task.validate()
                .map_err(|e| e.within(&format!("consensus task '{}'", task.name)))?;
        }
        if let Some(truth) = &self.super_truth {
            truth.validate().map_err(|e| e.within("super truth"))?;
        }
        Ok(())
    }

    fn from_repr(repr: TaskRepr) -> Result<Self, ModelError> {
        let series = repr
            .series
            .into_iter()
            .enumerate()
            .map(|(i, s)| Series::from_repr(s).map_err(|e| e.within(&format!("series #{i}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let consensus_tasks = repr
            .consensus_tasks
            .map(|tasks| {
                tasks
                    .into_iter()
                    .map(Self::from_repr)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let super_truth = repr
            .super_truth
            .map(|t| Self::from_repr(*t).map(Box::new))
            .transpose()?;

        let task = Self {
            name: repr.name,
            series,
            classification: repr.classification,
            task_id: repr.task_id,
            current_stage_name: repr.current_stage_name,
            priority: repr.priority,
            meta_data: repr.meta_data,
            pre_assign: repr.pre_assign,
            status: repr.status,
            created_by: repr.created_by,
            created_at: repr.created_at,
            updated_by: repr.updated_by,
            updated_by_user_id: repr.updated_by_user_id,
            updated_at: repr.updated_at,
            consensus: repr.consensus,
            consensus_score: repr.consensus_score,
            consensus_tasks,
            scores: repr.scores,
            super_truth,
        };
        task.validate()?;
        Ok(task)
    }

    fn to_repr(&self) -> Result<TaskRepr, serde_json::Error> {
        Ok(TaskRepr {
            name: self.name.clone(),
            series: self
                .series
                .iter()
                .map(Series::to_repr)
                .collect::<Result<_, _>>()?,
            classification: self.classification.clone(),
            task_id: self.task_id.clone(),
            current_stage_name: self.current_stage_name.clone(),
            priority: self.priority,
            meta_data: self.meta_data.clone(),
            pre_assign: self.pre_assign.clone(),
            status: self.status.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at.clone(),
            updated_by: self.updated_by.clone(),
            updated_by_user_id: self.updated_by_user_id.clone(),
            updated_at: self.updated_at.clone(),
            consensus: self.consensus,
            consensus_score: self.consensus_score,
            consensus_tasks: self
                .consensus_tasks
                .as_ref()
                .map(|tasks| tasks.iter().map(Self::to_repr).collect::<Result<Vec<_>, _>>())
                .transpose()?,
            scores: self.scores.clone(),
            super_truth: self
                .super_truth
                .as_ref()
                .map(|t| t.to_repr().map(Box::new))
                .transpose()?,
        })
    }
}

fn check_priority(priority: f64) -> Result<(), ModelError> {
    if priority.is_finite() && (0.0..=1.0).contains(&priority) {
        Ok(())
    } else {
        Err(ModelError::malformed_task(format!(
            "priority {priority} is outside [0, 1]"
        )))
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_repr()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TaskRepr::deserialize(deserializer)?;
        Task::from_repr(repr).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRepr {
    name: String,
    series: Vec<SeriesRepr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_assign: Option<BTreeMap<String, OneOrMany>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_by_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consensus: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consensus_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consensus_tasks: Option<Vec<TaskRepr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scores: Option<Vec<ConsensusScore>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    super_truth: Option<Box<TaskRepr>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::annotation::AnnotationKind;
    use serde_json::json;

    fn car_task() -> Value {
        json!({
            "name": "frame-001",
            "taskId": "t-1",
            "currentStageName": "Review_1",
            "priority": 0.5,
            "createdAt": "2024-03-01T10:00:00.000000+00:00",
            "series": [{
                "items": "frame-001.png",
                "boundingBoxes": [{
                    "pointTopLeft": {"xNorm": 0.1, "yNorm": 0.1},
                    "wNorm": 0.2,
                    "hNorm": 0.2,
                    "category": "car"
                }]
            }]
        })
    }

    #[test]
    fn test_parse_and_round_trip() {
        let raw = car_task();
        let task = Task::parse(&raw).unwrap();
        assert_eq!(task.key(), "t-1");
        assert_eq!(task.series.len(), 1);
        assert_eq!(
            task.annotations().next().unwrap().1.kind(),
            AnnotationKind::BoundingBox
        );
        assert_eq!(task.to_value().unwrap(), raw);
        assert_eq!(Task::parse(&task.to_value().unwrap()).unwrap(), task);
    }

    #[test]
    fn test_empty_series_rejected() {
        let err = Task::parse(&json!({"name": "t", "series": []})).unwrap_err();
        assert!(matches!(err, ModelError::MalformedTask { .. }));
    }

    #[test]
    fn test_priority_range() {
        let mut raw = car_task();
        raw["priority"] = json!(1.5);
        assert!(Task::parse(&raw).is_err());

        let task = Task::parse(&car_task()).unwrap();
        assert_eq!(task.with_priority(0.9).unwrap().priority, Some(0.9));
        assert!(task.with_priority(-0.1).is_err());
    }

    #[test]
    fn test_parse_many_reports_position() {
        let raw = json!([car_task(), {"name": "bad", "series": []}]);
        let err = Task::parse_many(&raw).unwrap_err();
        assert!(err.to_string().contains("task #1"));
    }

    #[test]
    fn test_consensus_tasks_recursive() {
        let mut raw = car_task();
        raw["consensus"] = json!(true);
        raw["consensusTasks"] = json!([car_task()]);
        raw["scores"] = json!([{"secondaryUser": "b", "score": 0.8}]);
        let task = Task::parse(&raw).unwrap();
        assert_eq!(task.consensus_tasks.as_ref().unwrap().len(), 1);
        assert_eq!(task.scores.as_ref().unwrap()[0].score, 0.8);
        assert_eq!(task.to_value().unwrap(), raw);
    }
}
