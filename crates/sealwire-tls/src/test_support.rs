//! Shared fixtures for unit tests: generated identities and an in-memory
//! duplex pipe that behaves like a non-blocking socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Connection, ServerConnection};
use sealwire_core::DEFAULT_MAX_BODY_LEN;

use crate::channel::Channel;
use crate::config::TlsVersions;
use crate::context::CryptoContext;
use crate::identity::{load_identity, IdentityPem};
use crate::stream::ByteStream;

pub(crate) fn generate_identity() -> IdentityPem {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate test certificate");
    IdentityPem::new(generated.cert.pem(), generated.key_pair.serialize_pem())
}

#[derive(Default)]
struct Queue {
    data: VecDeque<u8>,
    closed: bool,
    blocked: bool,
    blocking: bool,
    mode_changes: Vec<bool>,
    max_write: usize,
    write_calls: usize,
}

type Shared = Rc<RefCell<Queue>>;

/// One end of the pipe. Reads an empty open queue as `WouldBlock` and an
/// empty closed queue as EOF.
pub(crate) struct PipeEnd {
    inbox: Shared,
    outbox: Shared,
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbox = self.inbox.borrow_mut();
        if inbox.data.is_empty() {
            if inbox.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(inbox.data.len());
        for (slot, byte) in buf.iter_mut().zip(inbox.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut outbox = self.outbox.borrow_mut();
        if outbox.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if outbox.blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(outbox.max_write);
        outbox.data.extend(&buf[..n]);
        outbox.write_calls += 1;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking mode lifts backpressure on the writing side, standing in for a
/// peer that drains its socket while we wait.
impl ByteStream for PipeEnd {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        let mut outbox = self.outbox.borrow_mut();
        if blocking {
            outbox.blocked = false;
        }
        outbox.blocking = blocking;
        outbox.mode_changes.push(blocking);
        Ok(())
    }
}

/// Control handle over both directions of a pipe.
pub(crate) struct Pipes {
    client_to_server: Shared,
}

impl Pipes {
    /// Number of successful writes made by the client end.
    pub(crate) fn client_writes(&self) -> usize {
        self.client_to_server.borrow().write_calls
    }

    /// Simulate the client's socket going away without close_notify.
    pub(crate) fn close_client(&self) {
        self.client_to_server.borrow_mut().closed = true;
    }

    pub(crate) fn set_client_blocked(&self, blocked: bool) {
        self.client_to_server.borrow_mut().blocked = blocked;
    }

    pub(crate) fn client_blocking(&self) -> bool {
        self.client_to_server.borrow().blocking
    }

    /// Every `set_blocking` call made by the client end, in order.
    pub(crate) fn client_mode_changes(&self) -> Vec<bool> {
        self.client_to_server.borrow().mode_changes.clone()
    }
}

fn pipe(max_write: usize) -> (PipeEnd, PipeEnd, Pipes) {
    let queue = || {
        Rc::new(RefCell::new(Queue {
            max_write,
            ..Queue::default()
        }))
    };
    let client_to_server = queue();
    let server_to_client = queue();

    let client = PipeEnd {
        inbox: server_to_client.clone(),
        outbox: client_to_server.clone(),
    };
    let server = PipeEnd {
        inbox: client_to_server.clone(),
        outbox: server_to_client,
    };
    (client, server, Pipes { client_to_server })
}

fn pump(conn: &mut Connection, io: &mut PipeEnd) {
    while conn.wants_write() {
        conn.write_tls(io).expect("pipe write");
    }
    loop {
        match conn.read_tls(io) {
            Ok(0) => break,
            Ok(_) => {
                conn.process_new_packets().expect("handshake records");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("pipe read failed: {e}"),
        }
    }
}

/// Two connected channels sharing one self-signed identity.
pub(crate) fn channel_pair() -> (Channel<PipeEnd>, Channel<PipeEnd>, Pipes) {
    channel_pair_limits(usize::MAX, DEFAULT_MAX_BODY_LEN, DEFAULT_MAX_BODY_LEN)
}

pub(crate) fn channel_pair_limits(
    max_write: usize,
    client_max_body: usize,
    server_max_body: usize,
) -> (Channel<PipeEnd>, Channel<PipeEnd>, Pipes) {
    let identity = generate_identity();
    let mut ctx = CryptoContext::new(TlsVersions::default()).expect("crypto context");
    load_identity(&mut ctx, identity.cert_pem(), identity.key_pem()).expect("identity");

    let name = ServerName::try_from("localhost").expect("server name");
    let mut client: Connection =
        ClientConnection::new(ctx.client_config().expect("client config"), name)
            .expect("client connection")
            .into();
    let mut server: Connection = ServerConnection::new(ctx.server_config().expect("server config"))
        .expect("server connection")
        .into();

    let (mut client_io, mut server_io, pipes) = pipe(max_write);
    for _ in 0..16 {
        pump(&mut client, &mut client_io);
        pump(&mut server, &mut server_io);
        if !client.is_handshaking() && !server.is_handshaking() {
            break;
        }
    }
    assert!(!client.is_handshaking() && !server.is_handshaking());
    // Settle post-handshake records such as session tickets.
    pump(&mut server, &mut server_io);
    pump(&mut client, &mut client_io);

    (
        Channel::new(client, client_io, client_max_body),
        Channel::new(server, server_io, server_max_body),
        pipes,
    )
}
