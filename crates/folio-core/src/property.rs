//! Typed resource properties.
//!
//! A property has up to two values: a structure value that belongs to one
//! path, and a resource value shared by every sibling. When both are set
//! the structure value takes precedence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Written as a value, deletes that value.
pub const DELETE_VALUE: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub structure_value: Option<String>,
    pub resource_value: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        Property {
            name: name.into(),
            structure_value: None,
            resource_value: None,
        }
    }

    pub fn with_structure_value(mut self, value: impl Into<String>) -> Self {
        self.structure_value = Some(value.into());
        self
    }

    pub fn with_resource_value(mut self, value: impl Into<String>) -> Self {
        self.resource_value = Some(value.into());
        self
    }

    /// The effective value.
    pub fn value(&self) -> Option<&str> {
        self.structure_value
            .as_deref()
            .or(self.resource_value.as_deref())
    }

    /// True if neither value is set.
    pub fn is_null(&self) -> bool {
        self.structure_value.is_none() && self.resource_value.is_none()
    }
}

/// A registered property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub date_created: DateTime<Utc>,
}

pub fn validate_property_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() || name.chars().any(|c| c.is_control()) {
        return Err(CoreError::InvalidName {
            name: name.to_string(),
            reason: "property names must be non-empty printable text".to_string(),
        });
    }
    Ok(())
}

/// Applies a write to a stored value: `None` keeps it, [`DELETE_VALUE`]
/// clears it, anything else replaces it.
pub fn merge_value(current: Option<String>, write: Option<&str>) -> Option<String> {
    match write {
        None => current,
        Some(DELETE_VALUE) => None,
        Some(value) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_value_wins() {
        let p = Property::new("title")
            .with_structure_value("own")
            .with_resource_value("shared");
        assert_eq!(p.value(), Some("own"));
        let shared = Property::new("title").with_resource_value("shared");
        assert_eq!(shared.value(), Some("shared"));
        assert!(Property::new("x").is_null());
    }

    #[test]
    fn test_merge_value() {
        assert_eq!(merge_value(Some("a".into()), None), Some("a".to_string()));
        assert_eq!(merge_value(Some("a".into()), Some("")), None);
        assert_eq!(merge_value(None, Some("b")), Some("b".to_string()));
    }

    #[test]
    fn test_property_name_validation() {
        assert!(validate_property_name("Title").is_ok());
        assert!(validate_property_name("  ").is_err());
        assert!(validate_property_name("a\nb").is_err());
    }
}
