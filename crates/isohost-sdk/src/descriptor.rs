//! Structural type descriptors.
//!
//! A type loaded inside an isolation boundary never has the same identity as
//! the host's type of the same name, so every comparison across a boundary is
//! done on plain data: namespace plus name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name and namespace of a type, compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Dotted namespace, e.g. `Widgets.Contract`
    #[serde(default)]
    pub namespace: String,
    /// Simple type name, e.g. `IWidget`
    pub name: String,
}

impl TypeDescriptor {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `Namespace.Name` string. The last segment is the name.
    pub fn parse(full_name: &str) -> Option<Self> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return None;
        }
        match full_name.rsplit_once('.') {
            Some((namespace, name)) if !name.is_empty() => Some(Self::new(namespace, name)),
            Some(_) => None,
            None => Some(Self::new("", full_name)),
        }
    }

    /// `Namespace.Name`, or just `Name` for the root namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Structural match: same name and same namespace.
    pub fn matches(&self, other: &TypeDescriptor) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_name() {
        let ty = TypeDescriptor::parse("Widgets.Contract.IWidget").unwrap();
        assert_eq!(ty.namespace, "Widgets.Contract");
        assert_eq!(ty.name, "IWidget");
        assert_eq!(ty.full_name(), "Widgets.Contract.IWidget");
    }

    #[test]
    fn test_parse_root_namespace() {
        let ty = TypeDescriptor::parse("IWidget").unwrap();
        assert!(ty.namespace.is_empty());
        assert_eq!(ty.to_string(), "IWidget");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(TypeDescriptor::parse("").is_none());
        assert!(TypeDescriptor::parse("Widgets.").is_none());
    }

    #[test]
    fn test_matches_is_structural() {
        let a = TypeDescriptor::new("Widgets", "IWidget");
        let b = TypeDescriptor::new("Widgets", "IWidget");
        let c = TypeDescriptor::new("Gadgets", "IWidget");
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
