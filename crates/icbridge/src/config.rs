//! Runtime configuration, loaded from a JSON document.
//!
//! ```json
//! {
//!     "server_hostname": "irc.example.org",
//!     "bindings": ["tcp://0.0.0.0:6667", "tcps://0.0.0.0:6697?cert=/etc/ssl/irc.pem&key=/etc/ssl/irc.key"],
//!     "logging_verbosity": "info",
//!     "icb_endpoint": "tcp://internetcitizens.band:7326"
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Logging verbosity accepted in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl Verbosity {
    /// The matching `tracing` level.
    pub fn as_level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Fatal => tracing::Level::ERROR,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name advertised as the IRC server.
    pub server_hostname: String,
    /// Listen URLs (`tcp://host:port`, `tcps://host:port?cert=…&key=…`).
    pub bindings: Vec<String>,
    pub logging_verbosity: Verbosity,
    /// Upstream ICB server (`tcp://host:port`).
    pub icb_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_hostname: "localhost".into(),
            bindings: Vec::new(),
            logging_verbosity: Verbosity::Info,
            icb_endpoint: "tcp://localhost:7326".into(),
        }
    }
}

impl Config {
    /// Load the configuration from a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse the configuration from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Host and port of the upstream ICB endpoint.
    pub fn icb_address(&self) -> Result<(String, u16)> {
        match Binding::parse(&self.icb_endpoint)? {
            Binding::Tcp { host, port } => Ok((host, port)),
            Binding::Tls { .. } => Err(Error::UnsupportedProtocol(
                "tcps is not supported for the ICB endpoint".into(),
            )),
        }
    }
}

/// A parsed listen binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Plain TCP listener.
    Tcp { host: String, port: u16 },
    /// TLS listener with PEM certificate and key paths.
    Tls {
        host: String,
        port: u16,
        cert: PathBuf,
        key: PathBuf,
    },
}

impl Binding {
    /// Parse a binding URL. Schemes other than `tcp` and `tcps` are
    /// rejected as unsupported.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| Error::InvalidBinding(format!("{raw}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidBinding(format!("{raw}: missing host")))?
            .to_string();
        let port = url
            .port()
            .ok_or_else(|| Error::InvalidBinding(format!("{raw}: missing port")))?;

        match url.scheme() {
            "tcp" => Ok(Self::Tcp { host, port }),
            "tcps" => {
                let mut cert = None;
                let mut key = None;
                for (k, v) in url.query_pairs() {
                    match k.as_ref() {
                        "cert" => cert = Some(PathBuf::from(v.as_ref())),
                        "key" => key = Some(PathBuf::from(v.as_ref())),
                        _ => {}
                    }
                }
                let cert = cert.ok_or_else(|| {
                    Error::InvalidBinding(format!("{raw}: tls binding requires cert="))
                })?;
                let key = key.ok_or_else(|| {
                    Error::InvalidBinding(format!("{raw}: tls binding requires key="))
                })?;
                Ok(Self::Tls {
                    host,
                    port,
                    cert,
                    key,
                })
            }
            other => Err(Error::UnsupportedProtocol(other.to_string())),
        }
    }
}
