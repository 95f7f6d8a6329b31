//! Client configuration.
//!
//! Provides [`SolarNetConfig`] for configuring SolarNetwork clients.
//! Configuration is driven by environment variables, falling back to
//! defaults that target the public SolarNetwork deployment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;
use typed_builder::TypedBuilder;

use crate::environment::{DEFAULT_HOST, Environment};
use crate::error::{SolarNetError, SolarNetResult};

/// SolarNetwork client configuration.
///
/// # Examples
///
/// ```
/// use solarnet_core::SolarNetConfig;
///
/// let config = SolarNetConfig::default();
/// assert_eq!(config.host, "data.solarnetwork.net");
/// assert_eq!(config.refresh_ms, 20_000);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SolarNetConfig {
    /// SolarNetwork API host.
    #[builder(default = String::from(DEFAULT_HOST))]
    pub host: String,

    /// Protocol used to reach the API (`https` or `http`).
    #[builder(default = String::from("https"))]
    pub protocol: String,

    /// API port; `None` means the protocol default.
    #[builder(default)]
    pub port: Option<u16>,

    /// Separate host for SolarQuery requests, if any.
    #[builder(default)]
    pub query_host: Option<String>,

    /// Security token ID.
    #[builder(default)]
    pub token: Option<String>,

    /// Security token secret.
    #[builder(default)]
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    /// Node owning the control.
    #[builder(default)]
    pub node_id: Option<u64>,

    /// Control ID to manage.
    #[builder(default)]
    pub control_id: Option<String>,

    /// Polling interval while no change is pending, in milliseconds.
    #[builder(default = 20_000)]
    pub refresh_ms: u64,

    /// Polling interval while a change is pending, in milliseconds.
    #[builder(default = 5_000)]
    pub pending_refresh_ms: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl fmt::Debug for SolarNetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolarNetConfig")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .field("query_host", &self.query_host)
            .field("token", &self.token)
            .field("secret", &self.secret.as_ref().map(|_| "..."))
            .field("node_id", &self.node_id)
            .field("control_id", &self.control_id)
            .field("refresh_ms", &self.refresh_ms)
            .field("pending_refresh_ms", &self.pending_refresh_ms)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(variable = name, value, "ignoring unparsable numeric setting");
    }
    parsed
}

impl Default for SolarNetConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SolarNetConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SN_HOST` | `data.solarnetwork.net` |
    /// | `SN_PROTOCOL` | `https` |
    /// | `SN_PORT` | *(protocol default)* |
    /// | `SN_QUERY_HOST` | *(same as `SN_HOST`)* |
    /// | `SN_TOKEN` | *(unset)* |
    /// | `SN_SECRET` | *(unset)* |
    /// | `SN_NODE_ID` | *(unset)* |
    /// | `SN_CONTROL_ID` | *(unset)* |
    /// | `SN_REFRESH_MS` | `20000` |
    /// | `SN_PENDING_REFRESH_MS` | `5000` |
    /// | `LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Values that fail to parse are ignored and the default is kept.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("SN_HOST") {
            config.host = v;
        }
        if let Some(v) = lookup("SN_PROTOCOL") {
            config.protocol = v.to_ascii_lowercase();
        }
        if let Some(n) =
            lookup("SN_PORT").and_then(|v| parse_number::<u16>("SN_PORT", &v))
        {
            config.port = Some(n);
        }
        if let Some(v) = lookup("SN_QUERY_HOST") {
            config.query_host = Some(v);
        }
        if let Some(v) = lookup("SN_TOKEN") {
            config.token = Some(v);
        }
        if let Some(v) = lookup("SN_SECRET") {
            config.secret = Some(v);
        }
        if let Some(n) =
            lookup("SN_NODE_ID").and_then(|v| parse_number::<u64>("SN_NODE_ID", &v))
        {
            config.node_id = Some(n);
        }
        if let Some(v) = lookup("SN_CONTROL_ID") {
            config.control_id = Some(v);
        }
        if let Some(n) =
            lookup("SN_REFRESH_MS").and_then(|v| parse_number::<u64>("SN_REFRESH_MS", &v))
        {
            config.refresh_ms = n;
        }
        if let Some(n) =
            lookup("SN_PENDING_REFRESH_MS").and_then(|v| parse_number::<u64>("SN_PENDING_REFRESH_MS", &v))
        {
            config.pending_refresh_ms = n;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// The environment for SolarUser (command) requests.
    #[must_use]
    pub fn environment(&self) -> Environment {
        Environment::new(&self.protocol, &self.host, self.port)
    }

    /// The environment for SolarQuery requests.
    #[must_use]
    pub fn query_environment(&self) -> Environment {
        match &self.query_host {
            Some(host) => Environment::new(&self.protocol, host, self.port),
            None => self.environment(),
        }
    }

    /// Return the value of a required setting or a configuration error naming it.
    pub fn require<'a, T: ?Sized>(value: Option<&'a T>, name: &str) -> SolarNetResult<&'a T> {
        value.ok_or_else(|| SolarNetError::Config(format!("{name} is required")))
    }
}
