//! Runtime configuration loaded from environment variables.

use std::time::Duration;

use crate::reconnect::DEFAULT_RECONNECT_DELAY;

/// Default REST request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Sync service configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the bot's REST API.
    pub api_url: String,
    /// WebSocket URL of the event stream.
    pub events_url: String,
    /// Guild whose cases are synchronized.
    pub guild_id: String,
    /// Bearer token sent to both the API and the event stream.
    pub session_token: Option<String>,
    pub reconnect_delay: Duration,
    /// Refetch list and detail after every reconnect.
    pub resync_on_reconnect: bool,
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Required | Default |
    /// |-------------------------------|----------|---------|
    /// | `CASEHUB_API_URL`             | yes      | --      |
    /// | `CASEHUB_EVENTS_URL`          | yes      | --      |
    /// | `CASEHUB_GUILD_ID`            | yes      | --      |
    /// | `CASEHUB_SESSION_TOKEN`       | no       | none    |
    /// | `CASEHUB_RECONNECT_DELAY_MS`  | no       | `5000`  |
    /// | `CASEHUB_RESYNC_ON_RECONNECT` | no       | `true`  |
    /// | `CASEHUB_REQUEST_TIMEOUT_SECS`| no       | `30`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let reconnect_delay = match get("CASEHUB_RECONNECT_DELAY_MS") {
            Some(v) => Duration::from_millis(parse("CASEHUB_RECONNECT_DELAY_MS", v)?),
            None => DEFAULT_RECONNECT_DELAY,
        };

        let resync_on_reconnect = match get("CASEHUB_RESYNC_ON_RECONNECT") {
            Some(v) => parse_bool("CASEHUB_RESYNC_ON_RECONNECT", v)?,
            None => true,
        };

        let request_timeout = Duration::from_secs(match get("CASEHUB_REQUEST_TIMEOUT_SECS") {
            Some(v) => parse("CASEHUB_REQUEST_TIMEOUT_SECS", v)?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        });

        Ok(Self {
            api_url: required("CASEHUB_API_URL")?,
            events_url: required("CASEHUB_EVENTS_URL")?,
            guild_id: required("CASEHUB_GUILD_ID")?,
            session_token: get("CASEHUB_SESSION_TOKEN"),
            reconnect_delay,
            resync_on_reconnect,
            request_timeout,
        })
    }
}

fn parse(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid { name, value })
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}
