//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::OverwritePolicy;

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, InspectArgs, ReplayArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "verbatim";
const ENV_PREFIX: &str = "VERBATIM";
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 256;
const DEFAULT_ROOT_ID: &str = "ROOT_QUERY";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub bypass_queries: Vec<String>,
    pub overwrite_policy: OverwritePolicy,
    pub event_queue_limit: usize,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub root_id: String,
    pub add_typename: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.bypass_queries")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    store: RawStoreSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if !overrides.bypass_queries.is_empty() {
            self.cache.bypass_queries = Some(overrides.bypass_queries.clone());
        }
        if let Some(policy) = overrides.overwrite_policy.as_ref() {
            self.cache.overwrite_policy = Some(policy.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            store,
            logging,
        } = raw;

        Ok(Self {
            cache: build_cache_settings(cache)?,
            store: build_store_settings(store)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let mut bypass_queries = Vec::new();
    for name in cache.bypass_queries.unwrap_or_default() {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(LoadError::invalid(
                "cache.bypass_queries",
                "query names must not be empty",
            ));
        }
        if !bypass_queries.iter().any(|known| known == trimmed) {
            bypass_queries.push(trimmed.to_string());
        }
    }

    let overwrite_policy = match cache.overwrite_policy {
        Some(policy) => OverwritePolicy::from_str(&policy)
            .map_err(|reason| LoadError::invalid("cache.overwrite_policy", reason))?,
        None => OverwritePolicy::default(),
    };

    let event_queue_limit = cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT);
    if event_queue_limit == 0 {
        return Err(LoadError::invalid(
            "cache.event_queue_limit",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        bypass_queries,
        overwrite_policy,
        event_queue_limit,
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let root_id = store
        .root_id
        .unwrap_or_else(|| DEFAULT_ROOT_ID.to_string());
    if root_id.trim().is_empty() {
        return Err(LoadError::invalid("store.root_id", "must not be empty"));
    }
    if root_id == crate::cache::BYPASS_ENTRIES_KEY {
        return Err(LoadError::invalid(
            "store.root_id",
            "collides with the snapshot key reserved for bypass entries",
        ));
    }

    Ok(StoreSettings {
        root_id,
        add_typename: store.add_typename.unwrap_or(true),
    })
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

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    bypass_queries: Option<Vec<String>>,
    overwrite_policy: Option<String>,
    event_queue_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    root_id: Option<String>,
    add_typename: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
