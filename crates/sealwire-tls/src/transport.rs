//! The secure transport: one role, one peer, one framed TLS channel.

use std::net::{SocketAddr, TcpStream};

use sealwire_core::Message;
use tracing::{debug, info, warn};

use crate::channel::{Channel, FlushStatus, RecvOutcome, SendStatus};
use crate::config::{ConfigError, Role, TransportConfig, TransportOption};
use crate::context::CryptoContext;
use crate::error::TransportError;
use crate::handshake::{establish, PeerInfo};
use crate::identity::IdentityPem;
use crate::stream::TcpSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Established,
    Failed,
    Closed,
}

/// A point-to-point secure transport.
///
/// Construct with the identity it presents, optionally adjust the
/// configuration, then `init` as either role. Channel operations are valid
/// until `close`, which also runs on drop.
pub struct Transport {
    config: TransportConfig,
    identity: IdentityPem,
    role: Option<Role>,
    state: TransportState,
    socket: TcpSocket,
    context: Option<CryptoContext>,
    channel: Option<Channel<TcpStream>>,
    peer: Option<PeerInfo>,
}

impl Transport {
    pub fn new(identity: IdentityPem) -> Self {
        Self::with_config(identity, TransportConfig::default())
    }

    pub fn with_config(identity: IdentityPem, config: TransportConfig) -> Self {
        Self {
            config,
            identity,
            role: None,
            state: TransportState::Uninitialized,
            socket: TcpSocket::new(),
            context: None,
            channel: None,
            peer: None,
        }
    }

    /// Set a string-typed option. Ignored, with a warning, once the
    /// transport is established.
    pub fn set_option(&mut self, option: TransportOption, value: &str) -> Result<(), ConfigError> {
        if self.state == TransportState::Established {
            warn!(?option, value, "transport already established, option ignored");
            return Ok(());
        }
        self.config.set_option(option, value)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Role of the last `init`, if any.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn peer_info(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    pub fn context(&self) -> Option<&CryptoContext> {
        self.context.as_ref()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    /// Bind the listener ahead of `init(Role::Acceptor)`.
    pub fn bind(&mut self) -> Result<SocketAddr, TransportError> {
        if self.state == TransportState::Established {
            return Err(TransportError::AlreadyInitialized);
        }
        self.socket.bind(&self.config.host, self.config.port)
    }

    /// Establish the secure session as `role`. Blocks until the handshake
    /// completes or fails.
    pub fn init(&mut self, role: Role) -> Result<(), TransportError> {
        if self.state == TransportState::Established {
            return Err(TransportError::AlreadyInitialized);
        }

        // A previous session may still hold its channel after failing.
        self.release_session();
        self.role = Some(role);
        self.peer = None;
        match establish(role, &self.config, &self.identity, &mut self.socket) {
            Ok(established) => {
                self.context = Some(established.context);
                self.channel = Some(established.channel);
                self.peer = Some(established.peer);
                self.state = TransportState::Established;
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Failed;
                Err(e)
            }
        }
    }

    /// Run `op` on the live channel. Any error fails the transport.
    fn with_channel<T>(
        &mut self,
        op: impl FnOnce(&mut Channel<TcpStream>) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let channel = match (self.state, self.channel.as_mut()) {
            (TransportState::Established, Some(channel)) => channel,
            _ => return Err(TransportError::NotEstablished),
        };

        let result = op(channel);
        if let Err(e) = &result {
            warn!(error = %e, "session failed");
            self.state = TransportState::Failed;
        }
        result
    }

    /// Send one message, waiting out backpressure. Returns frame bytes sent.
    pub fn send(&mut self, msg: &Message) -> Result<usize, TransportError> {
        self.with_channel(|channel| channel.send(msg))
    }

    pub fn try_send(&mut self, msg: &Message) -> Result<SendStatus, TransportError> {
        self.with_channel(|channel| channel.try_send(msg))
    }

    pub fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        self.with_channel(|channel| channel.flush())
    }

    /// Receive one message into `msg` without blocking.
    pub fn recv(&mut self, msg: &mut Message) -> Result<RecvOutcome, TransportError> {
        self.with_channel(|channel| channel.recv(msg))
    }

    /// Drop the session, the context and the connected stream. A listener
    /// bound ahead of the next `init` is kept.
    fn release_session(&mut self) -> bool {
        let had_session = match self.channel.take() {
            Some(mut channel) => {
                channel.shutdown();
                drop(channel);
                debug!("session released");
                true
            }
            None => false,
        };
        if self.context.take().is_some() {
            debug!("crypto context released");
        }
        self.socket.close_stream();
        had_session
    }

    /// Tear down session, context and stream, in that order. Safe to call
    /// any number of times.
    pub fn close(&mut self) {
        let had_session = self.release_session();
        self.socket.close();

        if had_session {
            info!(role = ?self.role, "transport closed");
            self.state = TransportState::Closed;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::generate_identity;

    #[test]
    fn test_operations_need_established_transport() {
        let mut transport = Transport::new(generate_identity());
        let mut msg = Message::new(0);

        assert_eq!(transport.state(), TransportState::Uninitialized);
        assert!(matches!(
            transport.send(&Message::new(1)),
            Err(TransportError::NotEstablished)
        ));
        assert!(matches!(
            transport.recv(&mut msg),
            Err(TransportError::NotEstablished)
        ));
        assert!(matches!(
            transport.flush(),
            Err(TransportError::NotEstablished)
        ));
    }

    #[test]
    fn test_set_option_before_init() {
        let mut transport = Transport::new(generate_identity());
        transport.set_option(TransportOption::Host, "localhost").unwrap();
        transport.set_option(TransportOption::Port, "8443").unwrap();

        assert_eq!(transport.config().host, "localhost");
        assert_eq!(transport.config().port, 8443);
        assert!(transport.set_option(TransportOption::Port, "x").is_err());
        assert_eq!(transport.config().port, 8443);
    }

    #[test]
    fn test_failed_init_marks_failed() {
        let first = generate_identity();
        let second = generate_identity();
        let mut transport = Transport::with_config(
            IdentityPem::new(first.cert_pem(), second.key_pem()),
            TransportConfig::new("127.0.0.1", 0),
        );

        assert!(transport.init(Role::Acceptor).is_err());
        assert_eq!(transport.state(), TransportState::Failed);
        assert_eq!(transport.role(), Some(Role::Acceptor));
        assert!(transport.context().is_none());
    }

    #[test]
    fn test_close_without_init_is_harmless() {
        let mut transport = Transport::new(generate_identity());
        transport.close();
        transport.close();
        assert_eq!(transport.state(), TransportState::Uninitialized);
    }
}
