//! Neutral value representation used on the wire between host and plugin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value in transit across an isolation boundary.
///
/// Records carry their fields by name only; neither side's type identity
/// travels with the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoundaryValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned integers above `i64::MAX`; smaller ones travel as [`Int`](Self::Int).
    #[serde(rename = "uint")]
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<BoundaryValue>),
    Record(BTreeMap<String, BoundaryValue>),
    Enum { name: String, value: i64 },
}

impl BoundaryValue {
    /// Short name of the variant, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Enum { .. } => "enum",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Start an empty record.
    pub fn record() -> RecordBuilder {
        RecordBuilder::default()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&BoundaryValue> {
        match self {
            Self::Record(fields) => fields.get(name),
            _ => None,
        }
    }
}

impl Default for BoundaryValue {
    fn default() -> Self {
        Self::Null
    }
}

/// Builder for ad-hoc record values.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    fields: BTreeMap<String, BoundaryValue>,
}

impl RecordBuilder {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<BoundaryValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> BoundaryValue {
        BoundaryValue::Record(self.fields)
    }
}

impl From<bool> for BoundaryValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for BoundaryValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for BoundaryValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Self::Int(v),
            Err(_) => Self::UInt(v),
        }
    }
}

impl From<f64> for BoundaryValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for BoundaryValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for BoundaryValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<Vec<BoundaryValue>> for BoundaryValue {
    fn from(v: Vec<BoundaryValue>) -> Self {
        Self::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let value = BoundaryValue::record()
            .field("text", "ok")
            .field("count", 3i64)
            .build();
        assert_eq!(value.field("text").and_then(|v| v.as_str()), Some("ok"));
        assert_eq!(value.field("count"), Some(&BoundaryValue::Int(3)));
        assert_eq!(value.kind(), "record");
    }

    #[test]
    fn test_json_wire_shape() {
        let value = BoundaryValue::Enum {
            name: "Red".to_string(),
            value: 1,
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "enum");
        assert_eq!(json["value"]["name"], "Red");

        let back: BoundaryValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_wide_unsigned_wire_shape() {
        assert_eq!(BoundaryValue::from(7u64), BoundaryValue::Int(7));

        let value = BoundaryValue::from(u64::MAX);
        assert_eq!(value, BoundaryValue::UInt(u64::MAX));
        assert_eq!(value.kind(), "int");

        let json = serde_json::to_string(&value).unwrap();
        let back: BoundaryValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_null_wire_shape() {
        let json = serde_json::to_string(&BoundaryValue::Null).unwrap();
        let back: BoundaryValue = serde_json::from_str(&json).unwrap();
        assert!(back.is_null());
    }
}
