//! Configuration layer: typed settings with layered precedence (file → env).

use std::{num::NonZeroUsize, path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stencil";
const ENV_PREFIX: &str = "STENCIL";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence: `config/default`, then
/// `stencil`, then `config_file` when given, then `STENCIL__*` variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.container_types")
            .with_list_parse_key("cache.template_types")
            .try_parsing(true),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    container_types: Option<Vec<String>>,
    template_types: Option<Vec<String>>,
    content_child_name: Option<String>,
    template_property: Option<String>,
    max_walk_nodes: Option<u64>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;
        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let container_types = type_tags(
        cache.container_types,
        defaults.container_types,
        "cache.container_types",
    )?;
    let template_types = type_tags(
        cache.template_types,
        defaults.template_types,
        "cache.template_types",
    )?;
    let content_child_name = non_blank(
        cache.content_child_name,
        defaults.content_child_name,
        "cache.content_child_name",
    )?;
    if content_child_name.contains('/') {
        return Err(LoadError::invalid(
            "cache.content_child_name",
            "must be a single path segment",
        ));
    }
    let template_property = non_blank(
        cache.template_property,
        defaults.template_property,
        "cache.template_property",
    )?;

    let max_walk_nodes = match cache.max_walk_nodes {
        Some(value) => {
            let value = usize::try_from(value)
                .map_err(|_| LoadError::invalid("cache.max_walk_nodes", "value is too large"))?;
            Some(NonZeroUsize::new(value).ok_or_else(|| {
                LoadError::invalid("cache.max_walk_nodes", "must be greater than zero")
            })?)
        }
        None => None,
    };

    Ok(CacheConfig {
        container_types,
        template_types,
        content_child_name,
        template_property,
        max_walk_nodes,
    })
}

fn type_tags(
    value: Option<Vec<String>>,
    default: Vec<String>,
    key: &'static str,
) -> Result<Vec<String>, LoadError> {
    let Some(tags) = value else {
        return Ok(default);
    };
    let tags: Vec<String> = tags.into_iter().map(|tag| tag.trim().to_string()).collect();
    if tags.iter().any(String::is_empty) {
        return Err(LoadError::invalid(key, "type tags must not be blank"));
    }
    Ok(tags)
}

fn non_blank(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    match value {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(key, "must not be blank"));
            }
            Ok(trimmed.to_string())
        }
        None => Ok(default),
    }
}
