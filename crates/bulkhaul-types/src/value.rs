//! Dynamically typed cell values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::column::Type;

/// One cell of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Column type of a non-null value.
    #[must_use]
    pub fn value_type(&self) -> Option<Type> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(Type::Boolean),
            Self::Long(_) => Some(Type::Long),
            Self::Double(_) => Some(Type::Double),
            Self::Timestamp(_) => Some(Type::Timestamp),
            Self::String(_) => Some(Type::String),
            Self::Json(_) => Some(Type::Json),
        }
    }

    /// Convert a JSON literal into a value of the given column type.
    ///
    /// Timestamps accept RFC 3339 strings or integer epoch seconds. Any JSON
    /// value is accepted for `json` columns; JSON `null` is always `Null`.
    pub fn from_json(json: &serde_json::Value, ty: Type) -> Result<Self, String> {
        use serde_json::Value as J;

        if json.is_null() {
            return Ok(Self::Null);
        }
        let converted = match (ty, json) {
            (Type::Boolean, J::Bool(b)) => Some(Self::Boolean(*b)),
            (Type::Long, J::Number(n)) => n.as_i64().map(Self::Long),
            (Type::Double, J::Number(n)) => n.as_f64().map(Self::Double),
            (Type::String, J::String(s)) => Some(Self::String(s.clone())),
            (Type::Timestamp, J::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| Self::Timestamp(t.with_timezone(&Utc))),
            (Type::Timestamp, J::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(Self::Timestamp),
            (Type::Json, other) => Some(Self::Json(other.clone())),
            _ => None,
        };
        converted.ok_or_else(|| format!("cannot convert {json} to {ty}"))
    }

    /// Render as a JSON value, used for display and row export.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => (*b).into(),
            Self::Long(v) => (*v).into(),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Timestamp(t) => t.to_rfc3339().into(),
            Self::String(s) => s.clone().into(),
            Self::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::String(s) => f.write_str(s),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_by_type() {
        assert_eq!(Value::from_json(&json!(true), Type::Boolean).unwrap(), Value::Boolean(true));
        assert_eq!(Value::from_json(&json!(-3), Type::Long).unwrap(), Value::Long(-3));
        assert_eq!(Value::from_json(&json!(1.5), Type::Double).unwrap(), Value::Double(1.5));
        assert_eq!(Value::from_json(&json!(2), Type::Double).unwrap(), Value::Double(2.0));
        assert_eq!(Value::from_json(&json!("x"), Type::String).unwrap(), Value::from("x"));
        assert_eq!(
            Value::from_json(&json!({"k": [1]}), Type::Json).unwrap(),
            Value::Json(json!({"k": [1]}))
        );
        assert!(Value::from_json(&json!(null), Type::Long).unwrap().is_null());
    }

    #[test]
    fn timestamps_from_rfc3339_and_epoch() {
        let a = Value::from_json(&json!("2024-01-02T03:04:05Z"), Type::Timestamp).unwrap();
        let b = Value::from_json(&json!(1_704_164_645), Type::Timestamp).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_json_is_rejected() {
        let err = Value::from_json(&json!("seven"), Type::Long).unwrap_err();
        assert!(err.contains("long"), "{err}");
        assert!(Value::from_json(&json!(1.5), Type::Long).is_err());
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(4_i64)), Value::Long(4));
    }
}
