use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::ingest::{SystemConfig, CURRENT_VERSION};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Database locations. Nothing is required up front; each command asks only for the store it
/// connects to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    history_db_url: Option<String>,
    core_db_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            history_db_url: lookup("DATABASE_URL"),
            core_db_url: lookup("CORE_DATABASE_URL"),
        }
    }

    /// CLI flags win over the environment.
    pub fn with_overrides(mut self, history: Option<String>, core: Option<String>) -> Self {
        if history.is_some() {
            self.history_db_url = history;
        }
        if core.is_some() {
            self.core_db_url = core;
        }
        self
    }

    pub fn history_db_url(&self) -> Result<&str, ConfigError> {
        self.history_db_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }

    pub fn core_db_url(&self) -> Result<&str, ConfigError> {
        self.core_db_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("CORE_DATABASE_URL".to_string()))
    }
}

/// `IMPORTER_VERSION`, defaulting to [`CURRENT_VERSION`].
pub fn importer_version_from_lookup<F>(lookup: F) -> Result<i32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup("IMPORTER_VERSION") {
        Some(val) => val
            .parse::<i32>()
            .ok()
            .filter(|version| *version > 0)
            .ok_or(ConfigError::InvalidValue {
                name: "IMPORTER_VERSION".to_string(),
                value: val,
            }),
        None => Ok(CURRENT_VERSION),
    }
}

pub fn importer_version_from_env() -> Result<i32, ConfigError> {
    importer_version_from_lookup(|name| env::var(name).ok())
}

/// Tuning for a process that drives [`crate::ingest::System`] unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Default: 1000ms
    pub tick_interval: Duration,
    pub system: SystemConfig,
}

impl IngestSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tick_interval = match lookup("TICK_INTERVAL_MS") {
            Some(val) => Duration::from_millis(parse_positive("TICK_INTERVAL_MS", &val)?),
            None => Duration::from_millis(1000),
        };

        let session_timeout = match lookup("SESSION_TIMEOUT_SECS") {
            Some(val) => Some(Duration::from_secs(parse_positive(
                "SESSION_TIMEOUT_SECS",
                &val,
            )?)),
            None => None,
        };

        let max_stalled_reingest_iterations = match lookup("REINGEST_MAX_STALLED_ITERATIONS") {
            Some(val) => val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                name: "REINGEST_MAX_STALLED_ITERATIONS".to_string(),
                value: val,
            })?,
            None => 3,
        };

        Ok(Self {
            tick_interval,
            system: SystemConfig {
                importer_version: importer_version_from_lookup(&lookup)?,
                session_timeout,
                max_stalled_reingest_iterations,
            },
        })
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|parsed| *parsed > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}
