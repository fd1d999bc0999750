//! Configuration file management.
//!
//! This module handles loading, parsing, and merging configuration from TOML files
//! and command-line arguments, and resolves the result into the immutable
//! [`Settings`] handed to the prober, the chain retriever and the resolver.
//!
//! # Configuration Precedence
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (tlsprobe.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! timeout_ms = 2000
//! certificate_timeout_ms = 3000
//! http_timeout_ms = 10000
//!
//! [retry]
//! max_attempts = 10
//! base_delay_ms = 500
//! max_delay_ms = 2500
//! ```

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// ALPN identifiers offered by the negotiation-support check.
///
/// See <https://www.iana.org/assignments/tls-extensiontype-values/tls-extensiontype-values.xhtml#alpn-protocol-ids>.
pub const DEFAULT_ALPN_PROTOCOLS: &[&str] = &[
    "http/0.9",
    "http/1.0",
    "http/1.1",
    "spdy/1",
    "spdy/2",
    "spdy/3",
    "stun.turn",
    "stun.nat-discovery",
    "h2",
    "h2c",
    "webrtc",
    "c-webrtc",
    "ftp",
    "imap",
    "pop3",
    "managesieve",
    "coap",
    "xmpp-client",
    "xmpp-server",
    "acme-tls/1",
    "mqtt",
    "dot",
    "ntske/1",
    "sunrpc",
    "h3",
    "smb",
    "irc",
    "nntp",
    "nnsp",
    "doq",
];

/// Raw configuration as read from TOML or the command line.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// Dial and handshake timeout for matrix probes, in milliseconds
    pub timeout_ms: Option<u64>,
    /// Timeout for certificate chain retrieval, in milliseconds
    pub certificate_timeout_ms: Option<u64>,
    /// Port used by the chain retriever
    pub certificate_port: Option<u16>,
    /// Timeout for CRL, OCSP and CT HTTP requests, in milliseconds
    pub http_timeout_ms: Option<u64>,
    /// User-Agent header sent with HTTP requests
    pub user_agent: Option<String>,
    /// ALPN identifiers offered by the negotiation check
    pub alpn_protocols: Option<Vec<String>>,
    /// Retry policy for network operations
    pub retry: Option<RetryConfig>,
}

/// Retry policy configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Fully resolved, immutable settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub timeout: Duration,
    pub certificate_timeout: Duration,
    pub certificate_port: u16,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub alpn_protocols: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            timeout: Duration::from_millis(2000),
            certificate_timeout: Duration::from_millis(3000),
            certificate_port: 443,
            http_timeout: Duration::from_millis(10_000),
            user_agent: format!("tlsprobe/{}", env!("CARGO_PKG_VERSION")),
            alpn_protocols: DEFAULT_ALPN_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Creates a configuration with every value set to its default.
    ///
    /// # Default Values
    ///
    /// - `timeout_ms`: 2000
    /// - `certificate_timeout_ms`: 3000
    /// - `certificate_port`: 443
    /// - `http_timeout_ms`: 10000
    /// - `user_agent`: "tlsprobe/<crate version>"
    /// - `alpn_protocols`: [`DEFAULT_ALPN_PROTOCOLS`]
    /// - `retry`: 10 attempts, 500ms base delay, 2500ms cap
    pub fn defaults() -> Self {
        Config {
            timeout_ms: Some(2000),
            certificate_timeout_ms: Some(3000),
            certificate_port: Some(443),
            http_timeout_ms: Some(10_000),
            user_agent: Some(format!("tlsprobe/{}", env!("CARGO_PKG_VERSION"))),
            alpn_protocols: Some(
                DEFAULT_ALPN_PROTOCOLS
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            ),
            retry: Some(RetryConfig {
                max_attempts: Some(10),
                base_delay_ms: Some(500),
                max_delay_ms: Some(2500),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. If the `other` value is None, keeps the current value.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        if other.certificate_timeout_ms.is_some() {
            self.certificate_timeout_ms = other.certificate_timeout_ms;
        }
        if other.certificate_port.is_some() {
            self.certificate_port = other.certificate_port;
        }
        if other.http_timeout_ms.is_some() {
            self.http_timeout_ms = other.http_timeout_ms;
        }
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent;
        }
        if other.alpn_protocols.is_some() {
            self.alpn_protocols = other.alpn_protocols;
        }
        if let Some(other_retry) = other.retry {
            if let Some(ref mut self_retry) = self.retry {
                if other_retry.max_attempts.is_some() {
                    self_retry.max_attempts = other_retry.max_attempts;
                }
                if other_retry.base_delay_ms.is_some() {
                    self_retry.base_delay_ms = other_retry.base_delay_ms;
                }
                if other_retry.max_delay_ms.is_some() {
                    self_retry.max_delay_ms = other_retry.max_delay_ms;
                }
            } else {
                self.retry = Some(other_retry);
            }
        }
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only provided arguments (Some values) will override other configurations.
    pub fn from_cli_args(
        timeout_ms: Option<u64>,
        certificate_port: Option<u16>,
        max_attempts: Option<u32>,
    ) -> Self {
        Config {
            timeout_ms,
            certificate_port,
            retry: max_attempts.map(|attempts| RetryConfig {
                max_attempts: Some(attempts),
                ..RetryConfig::default()
            }),
            ..Config::default()
        }
    }

    /// Validates the configuration and fills gaps from [`Config::defaults`].
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let merged = Config::defaults().merge_with(self.clone());
        let retry = merged.retry.unwrap_or_default();

        let millis = |name: &str, value: Option<u64>| -> Result<Duration, ConfigError> {
            match value {
                Some(0) => Err(ConfigError::Validation(format!(
                    "{} must be greater than zero",
                    name
                ))),
                Some(ms) => Ok(Duration::from_millis(ms)),
                None => Err(ConfigError::Validation(format!("{} is required", name))),
            }
        };

        let max_attempts = retry.max_attempts.unwrap_or(10);
        if max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let base_delay = Duration::from_millis(retry.base_delay_ms.unwrap_or(500));
        let max_delay = Duration::from_millis(retry.max_delay_ms.unwrap_or(2500));
        if base_delay > max_delay {
            return Err(ConfigError::Validation(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        let alpn_protocols = merged.alpn_protocols.unwrap_or_default();
        if let Some(bad) = alpn_protocols
            .iter()
            .find(|p| p.is_empty() || p.len() > 255)
        {
            return Err(ConfigError::Validation(format!(
                "invalid ALPN protocol identifier: {:?}",
                bad
            )));
        }

        Ok(Settings {
            timeout: millis("timeout_ms", merged.timeout_ms)?,
            certificate_timeout: millis("certificate_timeout_ms", merged.certificate_timeout_ms)?,
            certificate_port: merged.certificate_port.unwrap_or(443),
            http_timeout: millis("http_timeout_ms", merged.http_timeout_ms)?,
            user_agent: merged.user_agent.unwrap_or_default(),
            alpn_protocols,
            retry: RetryPolicy {
                max_attempts,
                base_delay,
                max_delay,
            },
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            alpn_protocols: Some(vec!["h2".to_string(), "http/1.1".to_string()]),
            ..Config::defaults()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (invalid values)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
