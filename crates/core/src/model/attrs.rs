use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OtellyError, Result};

/// Scalar attribute value. Variant order matters for untagged decoding:
/// an integer literal must land in `Int` before `Double` gets a chance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

pub type Attributes = BTreeMap<String, AttrValue>;

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

pub fn attrs_to_json(attrs: &Attributes) -> Result<String> {
    if let Some((key, _)) = attrs
        .iter()
        .find(|(_, v)| matches!(v, AttrValue::Double(d) if !d.is_finite()))
    {
        return Err(OtellyError::InvalidArgument(format!(
            "attribute {key} holds a non-finite double"
        )));
    }
    serde_json::to_string(attrs)
        .map_err(|e| OtellyError::Internal(format!("failed to encode attributes: {e}")))
}

pub fn attrs_from_json(raw: &str) -> Result<Attributes> {
    serde_json::from_str(raw)
        .map_err(|e| OtellyError::Parse(format!("failed to decode attributes: {e}")))
}

pub fn attrs_text(attrs: &Attributes) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}
