//! Category resolution and task validation against a taxonomy.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::model::{
    Annotation, AttributeValue, Attributes, CategoryRef, Classification, MaskMode, Task,
    PATH_SEPARATOR,
};
use crate::taxonomy::tree::{
    AttributeSchema, AttributeType, LabelType, OBJECT_ROOT, TaxonomyCategory, TaxonomyRepr,
};
use crate::taxonomy::{TaxonomyError, TaxonomyWarning};

/// A category found in the tree, with its root-to-leaf path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCategory<'a> {
    /// The tree node.
    pub category: &'a TaxonomyCategory,
    /// Names from the top level down to (and including) this category.
    pub path: Vec<&'a str>,
}

impl<'a> ResolvedCategory<'a> {
    /// Category name.
    pub fn name(&self) -> &'a str {
        &self.category.name
    }

    /// Class id, if the node has one.
    pub fn class_id(&self) -> Option<i64> {
        self.category.class_id
    }

    /// Mask value, or an error for grouping nodes.
    pub fn class_value(&self) -> Result<u32, TaxonomyError> {
        self.category
            .class_value()
            .ok_or_else(|| TaxonomyError::MissingClassId {
                path: self.path_string(),
            })
    }

    /// Name of the parent category, `None` at the top level.
    pub fn parent(&self) -> Option<&'a str> {
        self.path.len().checked_sub(2).map(|i| self.path[i])
    }

    /// Path joined with `::`.
    pub fn path_string(&self) -> String {
        self.path.join(PATH_SEPARATOR)
    }

    /// Path as a category reference.
    pub fn to_ref(&self) -> CategoryRef {
        CategoryRef::path(self.path.iter().copied())
    }

    /// Declared attributes of the category.
    pub fn attributes(&self) -> &'a [AttributeSchema] {
        &self.category.attributes
    }

    /// Whether the category may be drawn as `label_type`.
    pub fn allows(&self, label_type: LabelType) -> bool {
        self.category.label_types.is_empty() || self.category.label_types.contains(&label_type)
    }
}

/// Read-only view of a project's category and attribute schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Taxonomy {
    /// Taxonomy name.
    pub name: Option<String>,
    categories: Vec<TaxonomyCategory>,
    /// Attributes of task-level classifications.
    pub study_classify: Vec<AttributeSchema>,
    /// Attributes of series-level classifications.
    pub series_classify: Vec<AttributeSchema>,
    /// Attributes of per-file classifications.
    pub instance_classify: Vec<AttributeSchema>,
}

impl Taxonomy {
    /// Create a taxonomy from top-level categories.
    ///
    /// Fails if two categories share a class id or two siblings share a name.
    pub fn new(categories: Vec<TaxonomyCategory>) -> Result<Self, TaxonomyError> {
        let taxonomy = Self {
            name: None,
            categories,
            ..Self::default()
        };
        taxonomy.check()?;
        Ok(taxonomy)
    }

    /// Load from the platform JSON (nested `categories` or flat `objectTypes`).
    pub fn from_value(value: &Value) -> Result<Self, TaxonomyError> {
        let repr = TaxonomyRepr::from_value(value)?;
        let taxonomy = Self {
            name: repr.name,
            categories: repr.categories,
            study_classify: repr.study_classify,
            series_classify: repr.series_classify,
            instance_classify: repr.instance_classify,
        };
        taxonomy.check()?;
        log::debug!(
            "Loaded taxonomy {:?} with {} categories",
            taxonomy.name,
            taxonomy.iter().count()
        );
        Ok(taxonomy)
    }

    /// Load from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, TaxonomyError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Serialize in the nested form.
    pub fn to_value(&self) -> Result<Value, TaxonomyError> {
        let repr = TaxonomyRepr {
            name: self.name.clone(),
            categories: self.categories.clone(),
            study_classify: self.study_classify.clone(),
            series_classify: self.series_classify.clone(),
            instance_classify: self.instance_classify.clone(),
        };
        Ok(serde_json::to_value(repr)?)
    }

    /// Top-level categories.
    pub fn categories(&self) -> &[TaxonomyCategory] {
        &self.categories
    }

    fn check(&self) -> Result<(), TaxonomyError> {
        let mut class_ids = HashSet::new();
        for resolved in self.iter() {
            if let Some(id) = resolved.class_id()
                && !class_ids.insert(id)
            {
                return Err(TaxonomyError::invalid(format!(
                    "class id {id} is used more than once (at '{}')",
                    resolved.path_string()
                )));
            }
            let mut names = HashSet::new();
            for child in &resolved.category.children {
                if !names.insert(child.name.as_str()) {
                    return Err(TaxonomyError::invalid(format!(
                        "'{}' has two children named '{}'",
                        resolved.path_string(),
                        child.name
                    )));
                }
            }
        }
        let mut names = HashSet::new();
        for top in &self.categories {
            if !names.insert(top.name.as_str()) {
                return Err(TaxonomyError::invalid(format!(
                    "two top-level categories named '{}'",
                    top.name
                )));
            }
        }
        Ok(())
    }

    /// Every category in pre-order (parents before children, siblings in order).
    pub fn iter(&self) -> impl Iterator<Item = ResolvedCategory<'_>> {
        let mut out = Vec::new();
        collect(&self.categories, &[], &mut out);
        out.into_iter()
    }

    /// Resolve a category reference.
    ///
    /// - An id matches a class id anywhere in the tree.
    /// - A plain name matches the first category with that name in pre-order.
    /// - A `::`-joined name or a path walks the tree from the top, failing on the
    ///   first segment that does not match. A leading `object` segment is skipped.
    pub fn resolve(&self, reference: &CategoryRef) -> Result<ResolvedCategory<'_>, TaxonomyError> {
        match reference {
            CategoryRef::Id(id) => self
                .find_by_class_id(*id)
                .ok_or_else(|| TaxonomyError::unknown(reference.to_string(), reference.to_string())),
            CategoryRef::Name(name) if !name.contains(PATH_SEPARATOR) => self
                .iter()
                .find(|c| c.name() == name)
                .ok_or_else(|| TaxonomyError::unknown(name.as_str(), name.as_str())),
            _ => {
                let segments = reference.segments().unwrap_or_default();
                self.resolve_path(&segments)
            }
        }
    }

    /// Walk the tree along `segments` from the top level.
    pub fn resolve_path(&self, segments: &[&str]) -> Result<ResolvedCategory<'_>, TaxonomyError> {
        let full = segments.join(PATH_SEPARATOR);
        let segments = match segments {
            [first, rest @ ..]
                if *first == OBJECT_ROOT
                    && !rest.is_empty()
                    && !self.categories.iter().any(|c| c.name == OBJECT_ROOT) =>
            {
                rest
            }
            _ => segments,
        };

        let Some((first, rest)) = segments.split_first() else {
            return Err(TaxonomyError::unknown("", full));
        };

        let mut node = self
            .categories
            .iter()
            .find(|c| c.name == *first)
            .ok_or_else(|| TaxonomyError::unknown(*first, full.as_str()))?;
        let mut path = vec![node.name.as_str()];

        for segment in rest {
            node = node
                .children
                .iter()
                .find(|c| c.name == *segment)
                .ok_or_else(|| TaxonomyError::unknown(*segment, full.as_str()))?;
            path.push(node.name.as_str());
        }

        Ok(ResolvedCategory {
            category: node,
            path,
        })
    }

    /// Category with the given class id.
    pub fn find_by_class_id(&self, class_id: i64) -> Option<ResolvedCategory<'_>> {
        self.iter().find(|c| c.class_id() == Some(class_id))
    }

    /// Category whose mask value (`classId + 1`) is `value`.
    pub fn find_by_class_value(&self, value: u32) -> Option<ResolvedCategory<'_>> {
        value
            .checked_sub(1)
            .and_then(|id| self.find_by_class_id(i64::from(id)))
    }

    /// Mask value of a referenced category.
    pub fn class_value(&self, reference: &CategoryRef) -> Result<u32, TaxonomyError> {
        self.resolve(reference)?.class_value()
    }

    /// Declared attribute schemas of a referenced category.
    pub fn attributes_for(
        &self,
        reference: &CategoryRef,
    ) -> Result<&[AttributeSchema], TaxonomyError> {
        Ok(self.resolve(reference)?.attributes())
    }

    /// Category path to mask value, for every category with a class id.
    pub fn class_map(&self) -> BTreeMap<String, u32> {
        self.iter()
            .filter_map(|c| c.category.class_value().map(|v| (c.path_string(), v)))
            .collect()
    }

    /// Check every category and attribute in a task.
    ///
    /// Unknown categories are errors. Unknown attribute keys, attribute type
    /// mismatches, and label type mismatches are returned as warnings.
    pub fn validate_task(&self, task: &Task) -> Result<Vec<TaxonomyWarning>, TaxonomyError> {
        let mut warnings = Vec::new();

        if let Some(classification) = &task.classification {
            self.check_classification(None, classification, &self.study_classify, &mut warnings)?;
        }

        for (index, series) in task.series.iter().enumerate() {
            let at = Some(index);
            for annotation in series.annotations() {
                match annotation {
                    Annotation::Classification(classification) => self.check_classification(
                        at,
                        classification,
                        &self.series_classify,
                        &mut warnings,
                    )?,
                    Annotation::InstanceClassification(instance) => check_attributes(
                        at,
                        &format!("instance classification of file {}", instance.file_index),
                        &instance.values,
                        &self.instance_classify,
                        None,
                        &mut warnings,
                    ),
                    shape => {
                        let Some(reference) = shape.category() else {
                            continue;
                        };
                        let resolved = self.resolve(reference)?;
                        let label_type = LabelType::for_kind(shape.kind());
                        if let Some(label_type) = label_type
                            && !resolved.allows(label_type)
                        {
                            warnings.push(TaxonomyWarning::new(
                                at,
                                format!(
                                    "{} drawn as {label_type:?} but '{}' does not allow it",
                                    shape.kind(),
                                    resolved.path_string()
                                ),
                            ));
                        }
                        if let Some(attributes) = shape.attributes() {
                            check_attributes(
                                at,
                                &format!("{} '{}'", shape.kind(), resolved.path_string()),
                                attributes,
                                resolved.attributes(),
                                label_type,
                                &mut warnings,
                            );
                        }
                    }
                }
            }

            for (value, entry) in series.segment_map.iter().flat_map(|m| m.iter()) {
                let resolved = self.resolve(entry.category())?;
                if !resolved.allows(LabelType::Segmentation) {
                    warnings.push(TaxonomyWarning::new(
                        at,
                        format!(
                            "segment {value}: '{}' does not allow segmentation",
                            resolved.path_string()
                        ),
                    ));
                }
                if series.mask_mode() == MaskMode::Semantic
                    && resolved.category.class_value() != Some(value)
                {
                    warnings.push(TaxonomyWarning::new(
                        at,
                        format!(
                            "semantic segment {value} maps to '{}' whose class value is {:?}",
                            resolved.path_string(),
                            resolved.category.class_value()
                        ),
                    ));
                }
                if let Some(attributes) = entry.attributes() {
                    check_attributes(
                        at,
                        &format!("segment {value}"),
                        attributes,
                        resolved.attributes(),
                        Some(LabelType::Segmentation),
                        &mut warnings,
                    );
                }
            }
        }

        for warning in &warnings {
            log::debug!("Task '{}': {warning}", task.name);
        }
        Ok(warnings)
    }

    fn check_classification(
        &self,
        at: Option<usize>,
        classification: &Classification,
        schema: &[AttributeSchema],
        warnings: &mut Vec<TaxonomyWarning>,
    ) -> Result<(), TaxonomyError> {
        if let Some(reference) = &classification.category {
            self.resolve(reference)?;
        }
        if let Some(attributes) = &classification.attributes {
            check_attributes(at, "classification", attributes, schema, None, warnings);
        }
        Ok(())
    }
}

fn collect<'a>(
    nodes: &'a [TaxonomyCategory],
    prefix: &[&'a str],
    out: &mut Vec<ResolvedCategory<'a>>,
) {
    for node in nodes {
        let mut path = prefix.to_vec();
        path.push(node.name.as_str());
        out.push(ResolvedCategory {
            category: node,
            path: path.clone(),
        });
        collect(&node.children, &path, out);
    }
}

fn check_attributes(
    at: Option<usize>,
    owner: &str,
    attributes: &Attributes,
    schema: &[AttributeSchema],
    label_type: Option<LabelType>,
    warnings: &mut Vec<TaxonomyWarning>,
) {
    for (key, value) in attributes {
        let Some(declared) = schema.iter().find(|s| &s.name == key) else {
            warnings.push(TaxonomyWarning::new(
                at,
                format!("unknown attribute '{key}' on {owner}"),
            ));
            continue;
        };

        if !declared.applies_to(label_type) {
            warnings.push(TaxonomyWarning::new(
                at,
                format!("attribute '{key}' does not apply to {owner}"),
            ));
        }

        let type_ok = matches!(
            (declared.attr_type, value),
            (AttributeType::Bool, AttributeValue::Bool(_))
                | (AttributeType::Text, AttributeValue::Text(_))
                | (AttributeType::Select, AttributeValue::Text(_))
                | (AttributeType::Multiselect, AttributeValue::List(_))
        );
        if !type_ok {
            warnings.push(TaxonomyWarning::new(
                at,
                format!(
                    "attribute '{key}' on {owner} is declared {:?} but holds a {} value",
                    declared.attr_type,
                    value.type_name()
                ),
            ));
            continue;
        }

        let bad_options: Vec<&str> = match value {
            AttributeValue::Text(text) if declared.attr_type == AttributeType::Select => {
                vec![text.as_str()]
            }
            AttributeValue::List(items) => items.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
        .into_iter()
        .filter(|option| !declared.allows_option(option))
        .collect();
        if !bad_options.is_empty() {
            warnings.push(TaxonomyWarning::new(
                at,
                format!("attribute '{key}' on {owner} has undeclared options {bad_options:?}"),
            ));
        }
    }
}
