//! Process bootstrap settings read from the environment.
use std::time::Duration;
use thiserror::Error;

pub const ENV_TRANSPORT: &str = "TRANSPORT";
pub const ENV_CACHE_NAME: &str = "CACHE_NAME";
pub const ENV_REQUEST_TIMEOUT: &str = "MCP_REQUEST_TIMEOUT_SECS";
pub const ENV_DEFAULT_TTL: &str = "CACHE_DEFAULT_TTL_SECS";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Unsupported transport '{0}', expected 'stdio' or 'momento'")]
    UnsupportedTransport(String),
    #[error("{name} must be a whole number of seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },
}

/// Which transport the process talks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Stdio,
    /// Pub/sub topics in the configured cache.
    Topic,
}

impl TransportKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "stdio" => Ok(TransportKind::Stdio),
            "momento" | "topic" | "topics" => Ok(TransportKind::Topic),
            _ => Err(ConfigError::UnsupportedTransport(value.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub transport: TransportKind,
    pub cache_name: String,
    pub request_timeout: Duration,
    pub default_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup, `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = match lookup(ENV_TRANSPORT) {
            Some(value) => TransportKind::parse(&value)?,
            None => TransportKind::default(),
        };

        let cache_name = lookup(ENV_CACHE_NAME)
            .filter(|name| !name.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_CACHE_NAME))?;

        let request_timeout =
            seconds(&lookup, ENV_REQUEST_TIMEOUT)?.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let default_ttl =
            seconds(&lookup, ENV_DEFAULT_TTL)?.unwrap_or(crate::cache::DEFAULT_TTL);

        Ok(Self {
            transport,
            cache_name,
            request_timeout,
            default_ttl,
        })
    }
}

fn seconds<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidSeconds { name, value }),
    }
}
