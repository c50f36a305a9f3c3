//! JSON-object task data exchanged through the transaction protocol.
//!
//! [`ConfigSource`] is user-facing configuration, [`TaskSource`] the frozen
//! per-partition configuration a stage hands to `run`, [`ConfigDiff`] what a
//! stage contributes to the next configuration, and [`TaskReport`] the
//! outcome of one partition. All four share the same object model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Error mapping task data onto a typed value.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for '{key}': {source}")]
pub struct TaskDataError {
    pub key: String,
    #[source]
    pub source: serde_json::Error,
}

macro_rules! task_data {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Map<String, Json>);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Map::new())
            }

            /// Wrap a JSON value; non-objects produce an empty instance.
            #[must_use]
            pub fn from_json(value: Json) -> Self {
                match value {
                    Json::Object(map) => Self(map),
                    _ => Self::default(),
                }
            }

            /// Serialize any value into task data.
            pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, TaskDataError> {
                serde_json::to_value(value)
                    .map(Self::from_json)
                    .map_err(|source| TaskDataError { key: String::new(), source })
            }

            #[must_use]
            pub fn as_map(&self) -> &Map<String, Json> {
                &self.0
            }

            #[must_use]
            pub fn into_json(self) -> Json {
                Json::Object(self.0)
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            #[must_use]
            pub fn has(&self, key: &str) -> bool {
                self.0.contains_key(key)
            }

            #[must_use]
            pub fn raw(&self, key: &str) -> Option<&Json> {
                self.0.get(key)
            }

            /// Typed lookup; `Ok(None)` when the key is absent or null.
            pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TaskDataError> {
                match self.0.get(key) {
                    None | Some(Json::Null) => Ok(None),
                    Some(v) => serde_json::from_value(v.clone())
                        .map(Some)
                        .map_err(|source| TaskDataError { key: key.to_owned(), source }),
                }
            }

            /// Typed lookup with a default for absent keys.
            pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, TaskDataError> {
                Ok(self.get(key)?.unwrap_or(default))
            }

            /// Nested object under `key`; empty when absent or not an object.
            #[must_use]
            pub fn get_nested(&self, key: &str) -> Self {
                self.0.get(key).cloned().map(Self::from_json).unwrap_or_default()
            }

            /// Set a value; serialization failures store `null`.
            pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
                let json = serde_json::to_value(value).unwrap_or(Json::Null);
                self.0.insert(key.into(), json);
                self
            }

            pub fn set_nested(&mut self, key: impl Into<String>, value: impl Into<Json>) -> &mut Self {
                self.0.insert(key.into(), value.into());
                self
            }

            pub fn remove(&mut self, key: &str) -> Option<Json> {
                self.0.remove(key)
            }

            /// Deep merge `other` into `self`: objects merge recursively,
            /// anything else replaces the existing value.
            pub fn merge(&mut self, other: &Map<String, Json>) -> &mut Self {
                merge_maps(&mut self.0, other);
                self
            }

            /// Map the object onto a typed configuration struct.
            ///
            /// Known keys are extracted; fields absent from the object fall
            /// back to their serde defaults and unknown keys are ignored.
            pub fn load_config<T: DeserializeOwned>(&self) -> Result<T, TaskDataError> {
                serde_json::from_value(Json::Object(self.0.clone()))
                    .map_err(|source| TaskDataError { key: String::new(), source })
            }
        }

        impl From<Map<String, Json>> for $name {
            fn from(map: Map<String, Json>) -> Self {
                Self(map)
            }
        }

        impl From<$name> for Json {
            fn from(value: $name) -> Self {
                value.into_json()
            }
        }
    };
}

task_data!(
    /// User configuration tree for a stage or for the whole job.
    ConfigSource
);
task_data!(
    /// Frozen per-partition configuration. Every retry of a partition
    /// receives the identical task source.
    TaskSource
);
task_data!(
    /// State a stage contributes toward the next configuration.
    ConfigDiff
);
task_data!(
    /// Per-partition outcome of a successful `run`.
    TaskReport
);

impl ConfigSource {
    /// Deep merge a config diff, producing the next configuration.
    pub fn merge_diff(&mut self, diff: &ConfigDiff) -> &mut Self {
        self.merge(diff.as_map())
    }
}

fn merge_maps(target: &mut Map<String, Json>, source: &Map<String, Json>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Json::Object(existing)), Json::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
