//! Secure framed transport for sealwire.
//!
//! This crate provides:
//! - PEM identity loading from in-memory buffers
//! - A rustls crypto context with pinned mutual certificate trust
//! - Handshake coordination for the initiator and acceptor roles
//! - A framed message channel with bounded, reassembling receive
//!
//! # Design
//!
//! A [`Transport`] owns exactly one crypto context, one TLS session and one
//! TCP stream. Connect/accept and the handshake block; once established the
//! stream is non-blocking, so `recv` may report [`RecvOutcome::Empty`].
//! Teardown sends close_notify, then drops the session, the context and the
//! stream, in that order.

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod stream;
pub mod transport;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use channel::{Channel, FlushStatus, RecvOutcome, SendStatus};
pub use config::{Role, TlsVersions, TransportConfig, TransportOption};
pub use error::{LoadError, TransportError};
pub use handshake::{establish, HandshakeStage, PeerInfo};
pub use identity::{load_identity, IdentityPem};
pub use transport::{Transport, TransportState};

pub use sealwire_core::{Message, HEADER_LEN};
