//! Typed pipeline configuration model.

use anyhow::{bail, Context, Result};
use bulkhaul_types::ConfigSource;
use serde::{Deserialize, Serialize};

use crate::plugin::PluginType;

/// Default number of pages buffered per partition channel.
pub const DEFAULT_MAX_QUEUED_PAGES: usize = 16;

/// Default page capacity.
pub const DEFAULT_PAGE_SIZE: &str = "32kb";

/// What happens to a job when some partitions fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed partition fails the job; the resume state is kept.
    #[default]
    Abort,
    /// The job succeeds; failures are reported as ignored errors.
    AllowPartial,
}

/// Executor settings (`exec:` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Upper bound on concurrently running partitions. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
    pub max_queued_pages: usize,
    pub page_size: String,
    pub failure_policy: FailurePolicy,
    pub max_retries: u32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            max_queued_pages: DEFAULT_MAX_QUEUED_PAGES,
            page_size: DEFAULT_PAGE_SIZE.to_string(),
            failure_policy: FailurePolicy::Abort,
            max_retries: 0,
        }
    }
}

impl ExecConfig {
    /// Page capacity in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `page_size` is not a valid byte size.
    pub fn page_size_bytes(&self) -> Result<usize> {
        let bytes = parse_byte_size(&self.page_size)?;
        usize::try_from(bytes).with_context(|| format!("page_size '{}' too large", self.page_size))
    }
}

/// Configuration of one stage: a `type` key naming the plugin plus
/// plugin-specific keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageConfig(ConfigSource);

impl StageConfig {
    #[must_use]
    pub fn new(source: ConfigSource) -> Self {
        Self(source)
    }

    /// Raw `type` value, if present and a string.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.0.raw("type").and_then(serde_json::Value::as_str)
    }

    /// Parsed plugin reference.
    ///
    /// # Errors
    ///
    /// Returns an error if `type` is missing or malformed.
    pub fn plugin_type(&self) -> Result<PluginType> {
        let Some(name) = self.type_name() else {
            bail!("missing 'type'");
        };
        name.parse().map_err(anyhow::Error::msg)
    }

    #[must_use]
    pub fn source(&self) -> &ConfigSource {
        &self.0
    }
}

/// State backend type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
    /// In-memory `SQLite`; nothing survives the process.
    Memory,
}

/// State persistence settings (`state:` section).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database path. Defaults to `$HOME/.bulkhaul/state.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// A parsed pipeline file.
///
/// The whole document is also kept as a [`ConfigSource`]: it is the user
/// configuration onto which stage config diffs are merged to produce the
/// next configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline: String,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(rename = "in")]
    pub input: StageConfig,
    #[serde(default)]
    pub filters: Vec<StageConfig>,
    #[serde(rename = "out")]
    pub output: StageConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(skip)]
    document: ConfigSource,
}

impl PipelineConfig {
    /// Build from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the pipeline shape.
    pub fn from_json(document: serde_json::Value) -> Result<Self> {
        let mut config: Self = serde_json::from_value(document.clone())
            .context("Invalid pipeline configuration")?;
        config.document = ConfigSource::from_json(document);
        Ok(config)
    }

    /// The full user configuration document.
    #[must_use]
    pub fn user_config(&self) -> &ConfigSource {
        &self.document
    }
}

/// Parse a human byte size such as `32kb`, `4 MiB` or `65536`.
///
/// Units are powers of 1024. A bare number is bytes.
///
/// # Errors
///
/// Returns an error if the string is empty, has an unknown unit or overflows.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        bail!("invalid byte size '{input}'");
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid byte size '{input}'"))?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        other => bail!("unknown byte size unit '{other}' in '{input}'"),
    };
    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{input}' overflows"))
}
