//! SolarNetwork deployment environment.
//!
//! An [`Environment`] names the protocol, host, and port of a SolarNetwork
//! deployment. Both the URL helpers and the request signer derive their host
//! context from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SolarNetError, SolarNetResult};

/// Host of the public SolarNetwork deployment.
pub const DEFAULT_HOST: &str = "data.solarnetwork.net";

/// Protocol, host, and port of a SolarNetwork deployment.
///
/// # Examples
///
/// ```
/// use solarnet_core::Environment;
///
/// let env = Environment::new("https", "example.com", Some(8443));
/// assert_eq!(env.host_header(), "example.com:8443");
/// assert_eq!(env.base_url(), "https://example.com:8443");
///
/// let env = Environment::new("https", "example.com", Some(443));
/// assert_eq!(env.host_header(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    protocol: String,
    host: String,
    port: Option<u16>,
}

impl Environment {
    /// Create a new environment. A `None` port means the protocol default.
    #[must_use]
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            protocol: protocol.into().to_ascii_lowercase(),
            host: host.into(),
            port,
        }
    }

    /// Derive an environment from the scheme and authority of a URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use solarnet_core::Environment;
    ///
    /// let env = Environment::from_url("http://localhost:8080/solarquery").unwrap();
    /// assert_eq!(env.host(), "localhost");
    /// assert_eq!(env.port(), 8080);
    /// assert!(!env.use_tls());
    /// ```
    pub fn from_url(url: &str) -> SolarNetResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|_| SolarNetError::InvalidEnvironment(url.to_owned()))?;
        let protocol = uri
            .scheme_str()
            .ok_or_else(|| SolarNetError::InvalidEnvironment(url.to_owned()))?;
        let host = uri
            .host()
            .ok_or_else(|| SolarNetError::InvalidEnvironment(url.to_owned()))?;
        Ok(Self::new(protocol, host, uri.port_u16()))
    }

    /// The protocol, lower-cased (e.g. `https`).
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The host name, without any port.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The effective port: the configured one, or the protocol default.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| default_port(&self.protocol))
    }

    /// Whether the protocol is TLS based (`https` or `wss`).
    #[must_use]
    pub fn use_tls(&self) -> bool {
        matches!(self.protocol.as_str(), "https" | "wss")
    }

    /// The value of the `Host` header for this environment.
    ///
    /// The port is appended only when it is not the default for the protocol.
    #[must_use]
    pub fn host_header(&self) -> String {
        host_with_port(&self.protocol, &self.host, self.port)
    }

    /// The base URL (`protocol://host[:port]`), without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host_header())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("https", DEFAULT_HOST, None)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// The default port for a protocol: 443 for `https`/`wss`, 80 otherwise.
#[must_use]
pub fn default_port(protocol: &str) -> u16 {
    if protocol.eq_ignore_ascii_case("https") || protocol.eq_ignore_ascii_case("wss") {
        443
    } else {
        80
    }
}

/// Format a host for a `Host` header, appending the port when non-default.
#[must_use]
pub fn host_with_port(protocol: &str, host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if port != default_port(protocol) => format!("{host}:{port}"),
        _ => host.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_use_public_deployment_by_default() {
        let env = Environment::default();
        assert_eq!(env.host(), "data.solarnetwork.net");
        assert_eq!(env.port(), 443);
        assert!(env.use_tls());
        assert_eq!(env.base_url(), "https://data.solarnetwork.net");
    }

    #[test]
    fn test_should_omit_default_ports_from_host_header() {
        assert_eq!(host_with_port("http", "a", Some(80)), "a");
        assert_eq!(host_with_port("https", "a", Some(443)), "a");
        assert_eq!(host_with_port("wss", "a", Some(443)), "a");
        assert_eq!(host_with_port("ws", "a", Some(8080)), "a:8080");
        assert_eq!(host_with_port("https", "a", Some(80)), "a:80");
        assert_eq!(host_with_port("https", "a", None), "a");
    }

    #[test]
    fn test_should_parse_environment_from_url() {
        let env = Environment::from_url("HTTPS://query.example.com").unwrap();
        assert_eq!(env.protocol(), "https");
        assert_eq!(env.host(), "query.example.com");
        assert_eq!(env.port(), 443);
    }

    #[test]
    fn test_should_reject_relative_url() {
        assert!(Environment::from_url("/solarquery").is_err());
    }
}
