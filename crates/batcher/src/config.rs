use std::{path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    accumulator::{AccumulatorConfig, OverflowPolicy},
    sinks::console::DEFAULT_LABEL,
};

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub accumulator: AccumulatorConfig,
    pub label: String,
    pub jsonl_sink_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Configuration {
    pub fn from_env() -> Result<Configuration, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source, `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Configuration, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flush_interval_ms =
            read_from(&lookup, "FLUSH_INTERVAL_MS")?.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS);
        if flush_interval_ms == 0 {
            return Err(invalid("FLUSH_INTERVAL_MS", "0", "must be greater than zero"));
        }

        let mut accumulator = AccumulatorConfig::new(Duration::from_millis(flush_interval_ms));
        let overflow =
            read_from::<OverflowPolicy, _>(&lookup, "OVERFLOW_POLICY")?.unwrap_or_default();
        if let Some(max_pending) = read_from::<usize, _>(&lookup, "MAX_PENDING")? {
            if max_pending == 0 {
                return Err(invalid("MAX_PENDING", "0", "must be at least 1"));
            }
            accumulator = accumulator.with_max_pending(max_pending, overflow);
        }

        Ok(Configuration {
            accumulator,
            label: lookup("BATCH_LABEL").unwrap_or(DEFAULT_LABEL.into()),
            jsonl_sink_path: lookup("JSONL_SINK_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            metrics_port: read_from(&lookup, "METRICS_PORT")?,
        })
    }
}

fn read_from<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(name, &value, &e.to_string())),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
