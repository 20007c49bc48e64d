//! Transport configuration.

use rustls::SupportedProtocolVersion;
use sealwire_core::DEFAULT_MAX_BODY_LEN;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 443;

static TLS12_AND_13: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];

/// Which side of the connection this transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Connects out and runs the client side of the handshake.
    Initiator,
    /// Binds, accepts one peer and runs the server side of the handshake.
    Acceptor,
}

/// Protocol version policy applied to the crypto context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersions {
    #[default]
    Tls12And13,
    Tls13Only,
    Tls12Only,
}

impl TlsVersions {
    pub(crate) fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersions::Tls12And13 => TLS12_AND_13,
            TlsVersions::Tls13Only => TLS13_ONLY,
            TlsVersions::Tls12Only => TLS12_ONLY,
        }
    }
}

/// String-keyed options accepted by `set_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOption {
    Host,
    Port,
    MaxBodyLen,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("invalid max body length: {0:?}")]
    InvalidMaxBodyLen(String),
}

/// Settings read once by `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Peer host for an initiator, bind address for an acceptor.
    pub host: String,
    pub port: u16,
    /// Largest body either side will send or accept.
    pub max_body_len: usize,
    pub versions: TlsVersions,
    /// PEM certificate(s) the peer must present. `None` pins our own leaf.
    pub trusted_peer_pem: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            versions: TlsVersions::default(),
            trusted_peer_pem: None,
        }
    }
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_versions(mut self, versions: TlsVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    pub fn with_trusted_peer_pem(mut self, pem: impl Into<String>) -> Self {
        self.trusted_peer_pem = Some(pem.into());
        self
    }

    /// Apply a string-encoded option.
    ///
    /// The config is left unchanged when the value does not parse.
    pub fn set_option(&mut self, option: TransportOption, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match option {
            TransportOption::Host => {
                if value.is_empty() {
                    return Err(ConfigError::EmptyHost);
                }
                self.host = value.to_string();
            }
            TransportOption::Port => {
                self.port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(value.to_string()))?;
            }
            TransportOption::MaxBodyLen => {
                let len: usize = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidMaxBodyLen(value.to_string()))?;
                if len == 0 || len > u32::MAX as usize {
                    return Err(ConfigError::InvalidMaxBodyLen(value.to_string()));
                }
                self.max_body_len = len;
            }
        }
        Ok(())
    }
}
