//! Handshake coordination: context, identity, session, stream, handshake.
//!
//! Everything here runs in blocking mode. The stream only switches to
//! non-blocking once the session is established and handed to a
//! [`Channel`].

use std::io;
use std::net::TcpStream;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Connection, ServerConnection};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::{Role, TransportConfig};
use crate::context::CryptoContext;
use crate::error::TransportError;
use crate::identity::{fingerprint, load_identity, IdentityPem};
use crate::stream::TcpSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    Uninitialized,
    ContextReady,
    IdentityVerified,
    SessionReady,
    StreamBound,
    Established,
}

/// What the handshake revealed about the other end. Fields stay `None` when
/// the information is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub protocol: Option<String>,
    pub cipher: Option<String>,
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub fingerprint: Option<String>,
}

impl PeerInfo {
    pub fn from_connection(conn: &Connection) -> Self {
        let mut info = PeerInfo {
            protocol: conn.protocol_version().map(|v| format!("{v:?}")),
            cipher: conn
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
            ..PeerInfo::default()
        };

        let Some(leaf) = conn.peer_certificates().and_then(|certs| certs.first()) else {
            return info;
        };
        info.fingerprint = Some(fingerprint(leaf.as_ref()));

        match x509_parser::parse_x509_certificate(leaf.as_ref()) {
            Ok((_, cert)) => {
                info.subject = Some(cert.subject().to_string());
                info.issuer = Some(cert.issuer().to_string());
            }
            Err(e) => debug!(error = %e, "peer certificate not parseable for diagnostics"),
        }
        info
    }
}

/// A completed handshake: the context that backs the session, the framed
/// channel over it and what we learned about the peer.
pub struct Established {
    pub context: CryptoContext,
    pub channel: Channel<TcpStream>,
    pub peer: PeerInfo,
}

/// Bring up a secure session for `role`.
///
/// On failure the stream (and any listener) held by `socket` is closed and
/// nothing partial is returned.
pub fn establish(
    role: Role,
    config: &TransportConfig,
    identity: &IdentityPem,
    socket: &mut TcpSocket,
) -> Result<Established, TransportError> {
    let mut stage = HandshakeStage::Uninitialized;
    match run(role, config, identity, socket, &mut stage) {
        Ok(established) => Ok(established),
        Err(e) => {
            warn!(?role, ?stage, error = %e, "secure transport setup failed");
            socket.close();
            Err(e)
        }
    }
}

fn advance(stage: &mut HandshakeStage, next: HandshakeStage) {
    debug!(from = ?*stage, to = ?next, "handshake stage");
    *stage = next;
}

fn run(
    role: Role,
    config: &TransportConfig,
    identity: &IdentityPem,
    socket: &mut TcpSocket,
    stage: &mut HandshakeStage,
) -> Result<Established, TransportError> {
    let mut context = CryptoContext::new(config.versions)?;
    advance(stage, HandshakeStage::ContextReady);

    load_identity(&mut context, identity.cert_pem(), identity.key_pem())?;
    if let Some(pem) = &config.trusted_peer_pem {
        context.trust_peer_pem(pem.as_bytes())?;
    }
    advance(stage, HandshakeStage::IdentityVerified);

    let mut conn: Connection = match role {
        Role::Initiator => {
            let name = ServerName::try_from(config.host.clone()).map_err(|e| {
                TransportError::ContextCreationFailed(format!(
                    "invalid server name {:?}: {e}",
                    config.host
                ))
            })?;
            ClientConnection::new(context.client_config()?, name)
                .map_err(|e| TransportError::ContextCreationFailed(e.to_string()))?
                .into()
        }
        Role::Acceptor => ServerConnection::new(context.server_config()?)
            .map_err(|e| TransportError::ContextCreationFailed(e.to_string()))?
            .into(),
    };
    advance(stage, HandshakeStage::SessionReady);

    let mut stream = match role {
        Role::Initiator => socket.connect(&config.host, config.port)?,
        Role::Acceptor => {
            socket.bind(&config.host, config.port)?;
            socket.accept()?
        }
    };
    advance(stage, HandshakeStage::StreamBound);

    complete_handshake(&mut conn, &mut stream)?;
    stream
        .set_nonblocking(true)
        .map_err(|e| TransportError::HandshakeFailed(format!("switch to non-blocking: {e}")))?;

    let peer = PeerInfo::from_connection(&conn);
    advance(stage, HandshakeStage::Established);
    info!(
        ?role,
        protocol = peer.protocol.as_deref().unwrap_or("unknown"),
        cipher = peer.cipher.as_deref().unwrap_or("unknown"),
        subject = peer.subject.as_deref().unwrap_or("unknown"),
        issuer = peer.issuer.as_deref().unwrap_or("unknown"),
        fingerprint = peer.fingerprint.as_deref().unwrap_or("unknown"),
        "secure session established"
    );

    Ok(Established {
        context,
        channel: Channel::new(conn, stream, config.max_body_len),
        peer,
    })
}

fn complete_handshake(conn: &mut Connection, stream: &mut TcpStream) -> Result<(), TransportError> {
    let handshake_err = |e: io::Error| TransportError::HandshakeFailed(e.to_string());

    while conn.is_handshaking() {
        conn.complete_io(stream).map_err(handshake_err)?;
    }
    while conn.wants_write() {
        conn.write_tls(stream).map_err(handshake_err)?;
    }
    Ok(())
}
