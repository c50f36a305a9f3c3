//! Stage plugin protocol.
//!
//! Every stage follows the same two-phase contract. `transaction` resolves
//! the stage's schema and frozen per-partition [`TaskSource`] and calls its
//! control callback, which runs everything downstream (eventually all
//! partitions) before returning. `run`/`open` then execute one partition.
//! `resume` replays a transaction from a frozen task and `cleanup` runs once
//! the job is done for good.
//!
//! [`TaskSource`]: bulkhaul_types::TaskSource

pub mod builtin;
pub mod file;
pub mod filter;
pub mod input;
pub mod output;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use file::{
    CodecControl, DecoderPlugin, EncoderPlugin, FileInput, FileInputControl, FileInputPlugin,
    FileOutput, FileOutputControl, FileOutputPlugin, FormatterControl, FormatterPlugin,
    ParserControl, ParserPlugin, TransactionalFileInput, TransactionalFileOutput,
};
pub use filter::{FilterControl, FilterPlugin};
pub use input::{InputControl, InputPlugin};
pub use output::{OutputControl, OutputPlugin, TransactionalPageOutput};
pub use registry::{PluginCategory, PluginRegistry};

/// Plugin reference: a name plus an optional version, written `name` or
/// `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginType {
    name: String,
    version: Option<String>,
}

impl PluginType {
    /// Unversioned reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    #[must_use]
    pub fn with_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn valid_part(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '@')
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (s, None),
        };
        if !valid_part(name) {
            return Err(format!("invalid plugin name in '{s}'"));
        }
        match version {
            Some(v) if !valid_part(v) => Err(format!("invalid plugin version in '{s}'")),
            Some(v) => Ok(Self::with_version(name, v)),
            None => Ok(Self::new(name)),
        }
    }
}

impl TryFrom<String> for PluginType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PluginType> for String {
    fn from(value: PluginType) -> Self {
        value.to_string()
    }
}
