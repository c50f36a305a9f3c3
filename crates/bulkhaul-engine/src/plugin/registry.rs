//! Plugin lookup by category and [`PluginType`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bulkhaul_types::{ConfigSource, StageError};

use crate::config::StageConfig;
use crate::file_runner::{FileInputRunner, FileOutputRunner};
use crate::plugin::{
    DecoderPlugin, EncoderPlugin, FileInputPlugin, FileOutputPlugin, FilterPlugin,
    FormatterPlugin, InputPlugin, OutputPlugin, ParserPlugin, PluginType,
};

/// Stage categories a plugin can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    Input,
    Output,
    Filter,
    Decoder,
    Encoder,
    Parser,
    Formatter,
    FileInput,
    FileOutput,
}

impl PluginCategory {
    pub const ALL: [Self; 9] = [
        Self::Input,
        Self::Output,
        Self::Filter,
        Self::Decoder,
        Self::Encoder,
        Self::Parser,
        Self::Formatter,
        Self::FileInput,
        Self::FileOutput,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Filter => "filter",
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::Parser => "parser",
            Self::Formatter => "formatter",
            Self::FileInput => "file_input",
            Self::FileOutput => "file_output",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Category<T: ?Sized> {
    factories: BTreeMap<PluginType, Factory<T>>,
}

impl<T: ?Sized> Default for Category<T> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T: ?Sized> Category<T> {
    fn insert(&mut self, ty: PluginType, factory: Factory<T>) {
        self.factories.insert(ty, factory);
    }

    /// Exact match first; an unversioned request falls back to the highest
    /// registered version of that name.
    fn lookup(&self, ty: &PluginType) -> Option<Arc<T>> {
        if let Some(factory) = self.factories.get(ty) {
            return Some(factory());
        }
        if ty.version().is_some() {
            return None;
        }
        self.factories
            .iter()
            .rev()
            .find(|(k, _)| k.name() == ty.name())
            .map(|(_, factory)| factory())
    }

    fn types(&self) -> impl Iterator<Item = &PluginType> {
        self.factories.keys()
    }
}

/// Per-category plugin factories for one job.
///
/// Registries are built explicitly and handed to the session; there is no
/// process-wide plugin cache.
#[derive(Default)]
pub struct PluginRegistry {
    inputs: Category<dyn InputPlugin>,
    outputs: Category<dyn OutputPlugin>,
    filters: Category<dyn FilterPlugin>,
    decoders: Category<dyn DecoderPlugin>,
    encoders: Category<dyn EncoderPlugin>,
    parsers: Category<dyn ParserPlugin>,
    formatters: Category<dyn FormatterPlugin>,
    file_inputs: Category<dyn FileInputPlugin>,
    file_outputs: Category<dyn FileOutputPlugin>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

fn parse_type(name: &str) -> PluginType {
    name.parse().unwrap_or_else(|_| PluginType::new(name))
}

fn unknown_plugin(category: PluginCategory, ty: &PluginType) -> StageError {
    StageError::config(
        "UNKNOWN_PLUGIN",
        format!("no {category} plugin registered as '{ty}'"),
    )
}

fn stage_type(config: &ConfigSource, context: &str) -> Result<PluginType, StageError> {
    StageConfig::new(config.clone())
        .plugin_type()
        .map_err(|e| StageError::config("INVALID_PLUGIN_TYPE", format!("{context}: {e}")))
}

macro_rules! register_fn {
    ($fn_name:ident, $field:ident, $trait_:ident) => {
        pub fn $fn_name<F>(&mut self, name: &str, factory: F) -> &mut Self
        where
            F: Fn() -> Arc<dyn $trait_> + Send + Sync + 'static,
        {
            self.$field.insert(parse_type(name), Arc::new(factory));
            self
        }
    };
}

impl PluginRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in stages registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugin::builtin::register(&mut registry);
        registry
    }

    register_fn!(register_input, inputs, InputPlugin);
    register_fn!(register_output, outputs, OutputPlugin);
    register_fn!(register_filter, filters, FilterPlugin);
    register_fn!(register_decoder, decoders, DecoderPlugin);
    register_fn!(register_encoder, encoders, EncoderPlugin);
    register_fn!(register_parser, parsers, ParserPlugin);
    register_fn!(register_formatter, formatters, FormatterPlugin);
    register_fn!(register_file_input, file_inputs, FileInputPlugin);
    register_fn!(register_file_output, file_outputs, FileOutputPlugin);

    /// Every registered plugin, grouped by category.
    #[must_use]
    pub fn list(&self) -> Vec<(PluginCategory, PluginType)> {
        let mut out = Vec::new();
        for category in PluginCategory::ALL {
            let types: Vec<&PluginType> = match category {
                PluginCategory::Input => self.inputs.types().collect(),
                PluginCategory::Output => self.outputs.types().collect(),
                PluginCategory::Filter => self.filters.types().collect(),
                PluginCategory::Decoder => self.decoders.types().collect(),
                PluginCategory::Encoder => self.encoders.types().collect(),
                PluginCategory::Parser => self.parsers.types().collect(),
                PluginCategory::Formatter => self.formatters.types().collect(),
                PluginCategory::FileInput => self.file_inputs.types().collect(),
                PluginCategory::FileOutput => self.file_outputs.types().collect(),
            };
            out.extend(types.into_iter().map(|ty| (category, ty.clone())));
        }
        out
    }

    /// Input stage for `config`.
    ///
    /// A plain input plugin wins; otherwise a file input plugin of that type
    /// is composed with the `decoders` and `parser` named in `config`.
    ///
    /// # Errors
    ///
    /// Returns a config error if any referenced plugin is unknown.
    pub fn resolve_input(&self, config: &StageConfig) -> Result<Arc<dyn InputPlugin>, StageError> {
        let ty = stage_type(config.source(), "in")?;
        if let Some(input) = self.inputs.lookup(&ty) {
            return Ok(input);
        }
        let Some(file_input) = self.file_inputs.lookup(&ty) else {
            return Err(unknown_plugin(PluginCategory::Input, &ty));
        };

        let decoders = nested_configs(config.source(), "decoders")?
            .iter()
            .map(|decoder| {
                let ty = stage_type(decoder, "decoders")?;
                self.decoders
                    .lookup(&ty)
                    .ok_or_else(|| unknown_plugin(PluginCategory::Decoder, &ty))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parser_ty = stage_type(&config.source().get_nested("parser"), "parser")?;
        let parser = self
            .parsers
            .lookup(&parser_ty)
            .ok_or_else(|| unknown_plugin(PluginCategory::Parser, &parser_ty))?;

        Ok(Arc::new(FileInputRunner::new(file_input, decoders, parser)))
    }

    /// Output stage for `config`, composing a file output with its
    /// `formatter` and `encoders` when no plain output plugin matches.
    ///
    /// # Errors
    ///
    /// Returns a config error if any referenced plugin is unknown.
    pub fn resolve_output(
        &self,
        config: &StageConfig,
    ) -> Result<Arc<dyn OutputPlugin>, StageError> {
        let ty = stage_type(config.source(), "out")?;
        if let Some(output) = self.outputs.lookup(&ty) {
            return Ok(output);
        }
        let Some(file_output) = self.file_outputs.lookup(&ty) else {
            return Err(unknown_plugin(PluginCategory::Output, &ty));
        };

        let encoders = nested_configs(config.source(), "encoders")?
            .iter()
            .map(|encoder| {
                let ty = stage_type(encoder, "encoders")?;
                self.encoders
                    .lookup(&ty)
                    .ok_or_else(|| unknown_plugin(PluginCategory::Encoder, &ty))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let formatter_ty = stage_type(&config.source().get_nested("formatter"), "formatter")?;
        let formatter = self
            .formatters
            .lookup(&formatter_ty)
            .ok_or_else(|| unknown_plugin(PluginCategory::Formatter, &formatter_ty))?;

        Ok(Arc::new(FileOutputRunner::new(formatter, encoders, file_output)))
    }

    /// Filter stage for `config`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the filter is unknown.
    pub fn resolve_filter(
        &self,
        config: &StageConfig,
    ) -> Result<Arc<dyn FilterPlugin>, StageError> {
        let ty = stage_type(config.source(), "filters")?;
        self.filters
            .lookup(&ty)
            .ok_or_else(|| unknown_plugin(PluginCategory::Filter, &ty))
    }
}

/// Configs listed under `key`, each a JSON object.
pub(crate) fn nested_configs(
    config: &ConfigSource,
    key: &str,
) -> Result<Vec<ConfigSource>, StageError> {
    config
        .get::<Vec<serde_json::Map<String, serde_json::Value>>>(key)
        .map(|list| list.unwrap_or_default().into_iter().map(ConfigSource::from).collect())
        .map_err(|e| StageError::config("INVALID_CONFIG", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(value: serde_json::Value) -> StageConfig {
        StageConfig::new(ConfigSource::from_json(value))
    }

    #[test]
    fn test_builtins_are_listed() {
        let registry = PluginRegistry::with_builtins();
        let listed = registry.list();
        for (category, name) in [
            (PluginCategory::Input, "inline"),
            (PluginCategory::Output, "null"),
            (PluginCategory::Output, "stdout"),
            (PluginCategory::Filter, "remove_columns"),
            (PluginCategory::Filter, "rename"),
        ] {
            assert!(
                listed.contains(&(category, PluginType::new(name))),
                "missing {category} {name}"
            );
        }
    }

    #[test]
    fn test_resolve_builtin_stages() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.resolve_input(&stage(json!({"type": "inline"}))).is_ok());
        assert!(registry.resolve_output(&stage(json!({"type": "null"}))).is_ok());
        assert!(registry.resolve_filter(&stage(json!({"type": "rename"}))).is_ok());
    }

    #[test]
    fn test_unknown_plugin_is_config_error() {
        let registry = PluginRegistry::with_builtins();
        let err = match registry.resolve_input(&stage(json!({"type": "nope"}))) {
            Err(e) => e,
            Ok(_) => panic!("resolved unknown plugin"),
        };
        assert_eq!(err.category, bulkhaul_types::ErrorCategory::Config);
        assert_eq!(err.code, "UNKNOWN_PLUGIN");
        assert!(err.message.contains("'nope'"));
    }

    #[test]
    fn test_versioned_lookup() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register_output("null@9", || {
            Arc::new(crate::plugin::builtin::NullOutput) as Arc<dyn OutputPlugin>
        });
        assert!(registry.resolve_output(&stage(json!({"type": "null@9"}))).is_ok());
        assert!(registry.resolve_output(&stage(json!({"type": "null"}))).is_ok());
        assert!(registry.resolve_output(&stage(json!({"type": "null@3"}))).is_err());
    }

    #[test]
    fn test_filter_is_not_an_output() {
        let registry = PluginRegistry::with_builtins();
        let err = match registry.resolve_output(&stage(json!({"type": "rename"}))) {
            Err(e) => e,
            Ok(_) => panic!("filter resolved as output"),
        };
        assert!(err.message.contains("no output plugin"));
    }
}
