//! Raw TCP stream primitive underneath the TLS session.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::error::TransportError;

/// Pending-connection backlog for the accept side.
const SOCKET_BACKLOG: i32 = 10;

/// Byte stream a session can run over.
pub trait ByteStream: Read + Write {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;
}

impl ByteStream for TcpStream {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.set_nonblocking(!blocking)
    }
}

/// Owns the listening socket (accept side) and the connected stream.
///
/// Sessions get a duplicated handle of the stream; shutting the socket down
/// here is what ends the connection, so `close` runs last during teardown.
/// The listener serves exactly one peer and is released once `accept`
/// succeeds.
#[derive(Debug, Default)]
pub struct TcpSocket {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `host:port`, trying every resolved address.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let addr = format!("{host}:{port}");
        let connect_err = |source| TransportError::ConnectFailed {
            addr: addr.clone(),
            source,
        };

        let stream = TcpStream::connect((host, port)).map_err(connect_err)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to disable Nagle");
        }
        info!(peer = %addr, "connected");

        let session_handle = stream.try_clone().map_err(connect_err)?;
        self.stream = Some(stream);
        Ok(session_handle)
    }

    /// Bind and listen on `host:port`. A no-op returning the bound address if
    /// already listening.
    pub fn bind(&mut self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let addr_text = format!("{host}:{port}");
        let bind_err = |source| TransportError::BindFailed {
            addr: addr_text.clone(),
            source,
        };

        if let Some(listener) = &self.listener {
            return listener.local_addr().map_err(bind_err);
        }

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(SOCKET_BACKLOG).map_err(bind_err)?;

        let listener: TcpListener = socket.into();
        let local = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local, "listening");

        self.listener = Some(listener);
        Ok(local)
    }

    /// Block until one peer connects, then stop listening.
    pub fn accept(&mut self) -> Result<TcpStream, TransportError> {
        let listener = self.listener.as_ref().ok_or_else(|| {
            TransportError::AcceptFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "accept before bind",
            ))
        })?;

        let (stream, peer) = listener.accept().map_err(TransportError::AcceptFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to disable Nagle");
        }
        info!(%peer, "accepted connection");

        let session_handle = stream.try_clone().map_err(TransportError::AcceptFailed)?;
        self.stream = Some(stream);
        if self.listener.take().is_some() {
            debug!("listener released after accept");
        }
        Ok(session_handle)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match (&self.stream, &self.listener) {
            (Some(stream), _) => stream.local_addr().ok(),
            (None, Some(listener)) => listener.local_addr().ok(),
            (None, None) => None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some() || self.listener.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Shut down and release the connected stream, keeping any listener.
    pub fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "stream shutdown");
            }
        }
    }

    /// Shut down and release the stream and listener. Safe to repeat.
    pub fn close(&mut self) {
        self.close_stream();
        if self.listener.take().is_some() {
            debug!("listener released");
        }
    }
}
