//! Taxonomy tree types and loading from the platform's JSON forms.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::AnnotationKind;
use crate::taxonomy::TaxonomyError;

/// Name of the synthetic root category in the nested taxonomy form.
pub const OBJECT_ROOT: &str = "object";

/// Kind of label a category may be drawn as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelType {
    /// Bounding box.
    Bbox,
    /// Cuboid.
    Cuboid,
    /// 2D or 3D landmark.
    Point,
    /// Polyline.
    Polyline,
    /// Polygon.
    Polygon,
    /// Ellipse.
    Ellipse,
    /// Segmentation mask.
    Segmentation,
    /// Length measurement.
    Length,
    /// Angle measurement.
    Angle,
}

impl LabelType {
    /// Label type an annotation variant is drawn as, if it is a located shape.
    pub fn for_kind(kind: AnnotationKind) -> Option<Self> {
        match kind {
            AnnotationKind::Classification | AnnotationKind::InstanceClassification => None,
            AnnotationKind::Landmarks | AnnotationKind::Landmarks3D => Some(LabelType::Point),
            AnnotationKind::MeasureLength => Some(LabelType::Length),
            AnnotationKind::MeasureAngle => Some(LabelType::Angle),
            AnnotationKind::Ellipse => Some(LabelType::Ellipse),
            AnnotationKind::BoundingBox => Some(LabelType::Bbox),
            AnnotationKind::Cuboid => Some(LabelType::Cuboid),
            AnnotationKind::Polygon => Some(LabelType::Polygon),
            AnnotationKind::Polyline => Some(LabelType::Polyline),
        }
    }
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    /// Checkbox.
    Bool,
    /// Free text.
    Text,
    /// One of `options`.
    Select,
    /// Any subset of `options`.
    Multiselect,
}

/// One selectable option of a SELECT or MULTISELECT attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeOption {
    /// Option label.
    pub name: String,
    /// Stable option id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_id: Option<i64>,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Whether the option is retired.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

/// Declared attribute of a category or classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSchema {
    /// Attribute key.
    pub name: String,
    /// Value type.
    pub attr_type: AttributeType,
    /// Stable attribute id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr_id: Option<i64>,
    /// Options for SELECT and MULTISELECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<AttributeOption>>,
    /// Label types the attribute applies to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_types: Vec<LabelType>,
    /// Whether the attribute is retired.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

impl AttributeSchema {
    /// Whether `value` is one of the declared option names.
    ///
    /// Attributes without options accept anything.
    pub fn allows_option(&self, value: &str) -> bool {
        match &self.options {
            Some(options) if !options.is_empty() => options.iter().any(|o| o.name == value),
            _ => true,
        }
    }

    /// Whether the attribute applies to the given label type.
    pub fn applies_to(&self, label_type: Option<LabelType>) -> bool {
        match label_type {
            Some(label_type) => {
                self.label_types.is_empty() || self.label_types.contains(&label_type)
            }
            None => true,
        }
    }
}

/// A node of the category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyCategory {
    /// Category name, unique among siblings.
    pub name: String,
    /// Stable class id; grouping nodes have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    /// Label types the category may be drawn as; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_types: Vec<LabelType>,
    /// Declared attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeSchema>,
    /// Child categories.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaxonomyCategory>,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Whether the category is retired.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

impl TaxonomyCategory {
    /// Create a leaf category.
    pub fn new(name: impl Into<String>, class_id: i64) -> Self {
        Self {
            name: name.into(),
            class_id: Some(class_id),
            label_types: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            color: None,
            archived: false,
        }
    }

    /// Add a child category (builder style).
    pub fn with_child(mut self, child: TaxonomyCategory) -> Self {
        self.children.push(child);
        self
    }

    /// Add a declared attribute (builder style).
    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Restrict the category to the given label types (builder style).
    pub fn with_label_types(mut self, label_types: impl IntoIterator<Item = LabelType>) -> Self {
        self.label_types = label_types.into_iter().collect();
        self
    }

    /// Mask value of the category (`classId + 1`; 0 is background).
    pub fn class_value(&self) -> Option<u32> {
        self.class_id
            .and_then(|id| u32::try_from(id).ok())
            .and_then(|id| id.checked_add(1))
    }

    fn group(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class_id: None,
            label_types: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            color: None,
            archived: false,
        }
    }
}

/// Flat object type of the platform's v2 taxonomy form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectType {
    category: String,
    class_id: i64,
    label_type: Option<LabelType>,
    #[serde(default)]
    attributes: Option<Vec<AttributeSchema>>,
    #[serde(default)]
    parents: Option<Vec<String>>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    archived: bool,
}

/// Serialized form of a [`crate::taxonomy::Taxonomy`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaxonomyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<TaxonomyCategory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub study_classify: Vec<AttributeSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series_classify: Vec<AttributeSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_classify: Vec<AttributeSchema>,
}

impl TaxonomyRepr {
    /// Read either the nested (`categories`) or flat (`objectTypes`) form.
    pub(crate) fn from_value(value: &Value) -> Result<Self, TaxonomyError> {
        let Some(object) = value.as_object() else {
            return Err(TaxonomyError::invalid("taxonomy must be a JSON object"));
        };

        if let Some(object_types) = object.get("objectTypes") {
            let types: Vec<ObjectType> = serde_json::from_value(object_types.clone())?;
            let mut repr: TaxonomyRepr = serde_json::from_value(Value::Object(
                object
                    .iter()
                    .filter(|(k, _)| k.as_str() != "objectTypes" && k.as_str() != "categories")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ))?;
            repr.categories = build_tree(types)?;
            return Ok(repr);
        }

        if object.contains_key("categories") {
            let mut repr: TaxonomyRepr = serde_json::from_value(value.clone())?;
            if let [root] = repr.categories.as_slice()
                && root.name == OBJECT_ROOT
                && root.class_id.is_none_or(|id| id == 0)
            {
                let root = repr.categories.remove(0);
                repr.categories = root.children;
            }
            return Ok(repr);
        }

        Err(TaxonomyError::invalid(
            "taxonomy has neither `categories` nor `objectTypes`",
        ))
    }
}

/// Nest flat object types under their `parents` chain.
fn build_tree(types: Vec<ObjectType>) -> Result<Vec<TaxonomyCategory>, TaxonomyError> {
    let mut roots: Vec<TaxonomyCategory> = Vec::new();

    for object_type in types {
        let mut level = &mut roots;
        for parent in object_type.parents.iter().flatten() {
            let position = match level.iter().position(|c| &c.name == parent) {
                Some(position) => position,
                None => {
                    level.push(TaxonomyCategory::group(parent));
                    level.len() - 1
                }
            };
            level = &mut level[position].children;
        }

        match level.iter_mut().find(|c| c.name == object_type.category) {
            Some(existing) if existing.class_id.is_none() => {
                existing.class_id = Some(object_type.class_id);
                existing.label_types.extend(object_type.label_type);
                existing.attributes = object_type.attributes.unwrap_or_default();
                existing.color = object_type.color;
                existing.archived = object_type.archived;
            }
            Some(existing) if existing.class_id == Some(object_type.class_id) => {
                existing.label_types.extend(object_type.label_type);
            }
            Some(existing) => {
                return Err(TaxonomyError::invalid(format!(
                    "category '{}' declared with class ids {:?} and {}",
                    existing.name, existing.class_id, object_type.class_id
                )));
            }
            None => level.push(TaxonomyCategory {
                name: object_type.category,
                class_id: Some(object_type.class_id),
                label_types: object_type.label_type.into_iter().collect(),
                attributes: object_type.attributes.unwrap_or_default(),
                children: Vec::new(),
                color: object_type.color,
                archived: object_type.archived,
            }),
        }
    }

    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_form_unwraps_object_root() {
        let repr = TaxonomyRepr::from_value(&json!({
            "categories": [{
                "name": "object",
                "classId": 0,
                "children": [
                    {"name": "car", "classId": 1, "children": [{"name": "suv", "classId": 3}]},
                    {"name": "person", "classId": 2}
                ]
            }]
        }))
        .unwrap();
        assert_eq!(repr.categories.len(), 2);
        assert_eq!(repr.categories[0].children[0].name, "suv");
        assert_eq!(repr.categories[0].class_value(), Some(2));
    }

    #[test]
    fn test_flat_form_builds_tree() {
        let repr = TaxonomyRepr::from_value(&json!({
            "name": "abdomen",
            "objectTypes": [
                {"category": "liver", "classId": 0, "labelType": "SEGMENTATION", "parents": ["organ"]},
                {"category": "liver", "classId": 0, "labelType": "BBOX", "parents": ["organ"]},
                {"category": "tumor", "classId": 1, "labelType": "SEGMENTATION"}
            ],
            "studyClassify": [{"name": "quality", "attrType": "SELECT", "attrId": 0,
                               "options": [{"name": "good", "optionId": 0}]}]
        }))
        .unwrap();

        assert_eq!(repr.name.as_deref(), Some("abdomen"));
        assert_eq!(repr.categories.len(), 2);
        let organ = &repr.categories[0];
        assert_eq!(organ.class_id, None);
        assert_eq!(
            organ.children[0].label_types,
            vec![LabelType::Segmentation, LabelType::Bbox]
        );
        assert!(repr.study_classify[0].allows_option("good"));
        assert!(!repr.study_classify[0].allows_option("bad"));
    }

    #[test]
    fn test_conflicting_class_ids_rejected() {
        let result = TaxonomyRepr::from_value(&json!({
            "objectTypes": [
                {"category": "liver", "classId": 0, "labelType": "BBOX"},
                {"category": "liver", "classId": 4, "labelType": "POLYGON"}
            ]
        }));
        assert!(matches!(result, Err(TaxonomyError::InvalidTaxonomy { .. })));
    }

    #[test]
    fn test_neither_form_rejected() {
        assert!(TaxonomyRepr::from_value(&json!({"name": "x"})).is_err());
        assert!(TaxonomyRepr::from_value(&json!([])).is_err());
    }
}
