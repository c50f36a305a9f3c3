//! Column types and column descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Width in bytes of a reference-table index stored in a fixed slot.
pub const REFERENCE_INDEX_SIZE: usize = 4;

/// Width in bytes of a timestamp slot: `i64` epoch seconds + `u32` nanos.
pub const TIMESTAMP_SIZE: usize = 12;

/// Primitive column type.
///
/// Every type has a fixed on-page width. `String` and `Json` values live in
/// the owning page's reference tables; their fixed slot holds a 4-byte index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Boolean,
    Long,
    Double,
    String,
    Timestamp,
    Json,
}

impl Type {
    /// Stable lowercase type name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
        }
    }

    /// Number of bytes the type occupies in a record's fixed slot.
    #[must_use]
    pub fn fixed_size(self) -> usize {
        match self {
            Self::Boolean => 1,
            Self::Long | Self::Double => 8,
            Self::Timestamp => TIMESTAMP_SIZE,
            Self::String | Self::Json => REFERENCE_INDEX_SIZE,
        }
    }

    /// Whether the slot holds a reference-table index instead of inline bytes.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(self, Self::String | Self::Json)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Type {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "long" | "int" | "integer" => Ok(Self::Long),
            "double" | "float" => Ok(Self::Double),
            "string" => Ok(Self::String),
            "timestamp" => Ok(Self::Timestamp),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

/// A named, typed column at a stable position in its schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    index: usize,
    name: String,
    #[serde(rename = "type")]
    ty: Type,
}

impl Column {
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>, ty: Type) -> Self {
        Self {
            index,
            name: name.into(),
            ty,
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column_type(&self) -> Type {
        self.ty
    }
}
