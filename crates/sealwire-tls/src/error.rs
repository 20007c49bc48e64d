//! Error types for identity loading and the secure transport.

use std::io;

use sealwire_core::FrameError;
use thiserror::Error;

/// Identity material could not be installed.
///
/// Certificate and key bytes are expected to be fixed at build or deploy
/// time, so none of these are retriable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("bad certificate: {0}")]
    BadCertificate(String),

    #[error("bad private key: {0}")]
    BadKey(String),

    #[error("private key does not match certificate")]
    KeyMismatch,
}

/// Errors from establishing or using a secure transport.
///
/// All variants are fatal to the current connection. The caller may run a
/// fresh `init`, but must not keep using a failed session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create crypto context: {0}")]
    ContextCreationFailed(String),

    #[error("identity load failed: {0}")]
    Identity(#[from] LoadError),

    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("receive failed: {0}")]
    RecvFailed(#[source] io::Error),

    #[error("message body of {len} bytes exceeds limit of {max}")]
    OversizedMessage { len: usize, max: usize },

    #[error("malformed frame header: {0}")]
    MalformedHeader(#[from] FrameError),

    #[error("transport not established")]
    NotEstablished,

    #[error("transport already initialized")]
    AlreadyInitialized,
}
