//! Category references and per-annotation attributes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used when a category path is written as a single string.
pub const PATH_SEPARATOR: &str = "::";

/// Reference to a taxonomy category, as it appears on an annotation.
///
/// Resolution against a taxonomy happens in [`crate::taxonomy`]; the reference
/// itself is never silently defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryRef {
    /// Taxonomy class id.
    Id(i64),
    /// Category name, or a `::`-joined path.
    Name(String),
    /// Root-to-leaf sequence of category names.
    Path(Vec<String>),
}

impl CategoryRef {
    /// Reference a category by name.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Reference a category by its full path.
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(segments.into_iter().map(Into::into).collect())
    }

    /// Path segments of this reference, if it is name-based.
    ///
    /// A single name containing `::` is split into its segments.
    pub fn segments(&self) -> Option<Vec<&str>> {
        match self {
            Self::Id(_) => None,
            Self::Name(name) => Some(name.split(PATH_SEPARATOR).collect()),
            Self::Path(path) => Some(path.iter().map(String::as_str).collect()),
        }
    }

    /// Whether the reference is empty (blank name or empty path).
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Id(_) => false,
            Self::Name(name) => name.trim().is_empty(),
            Self::Path(path) => path.is_empty() || path.iter().any(|s| s.trim().is_empty()),
        }
    }
}

impl fmt::Display for CategoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => f.write_str(name),
            Self::Path(path) => f.write_str(&path.join(PATH_SEPARATOR)),
        }
    }
}

impl From<&str> for CategoryRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<i64> for CategoryRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

/// Value of a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Checkbox attribute.
    Bool(bool),
    /// Free text or single selection.
    Text(String),
    /// Multiple selection, in order.
    List(Vec<String>),
}

impl AttributeValue {
    /// Short name of the value's type, for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }
}

/// Attribute name to value. A missing key means "not set", never `false`.
pub type Attributes = BTreeMap<String, AttributeValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ref_json_forms() {
        let id: CategoryRef = serde_json::from_str("3").unwrap();
        assert_eq!(id, CategoryRef::Id(3));

        let name: CategoryRef = serde_json::from_str("\"liver\"").unwrap();
        assert_eq!(name, CategoryRef::name("liver"));

        let path: CategoryRef = serde_json::from_str("[\"organ\", \"liver\"]").unwrap();
        assert_eq!(path, CategoryRef::path(["organ", "liver"]));
        assert_eq!(path.to_string(), "organ::liver");
    }

    #[test]
    fn test_segments_split_joined_names() {
        let name = CategoryRef::name("organ::liver");
        assert_eq!(name.segments().unwrap(), vec!["organ", "liver"]);
        assert!(CategoryRef::Id(1).segments().is_none());
        assert!(CategoryRef::name("  ").is_blank());
    }

    #[test]
    fn test_attribute_values() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"occluded": true, "color": "red", "tags": ["a", "b"]}"#)
                .unwrap();
        assert_eq!(attrs["occluded"], AttributeValue::Bool(true));
        assert_eq!(attrs["color"], AttributeValue::Text("red".into()));
        assert_eq!(
            attrs["tags"],
            AttributeValue::List(vec!["a".into(), "b".into()])
        );
        assert!(!attrs.contains_key("truncated"));
    }
}
