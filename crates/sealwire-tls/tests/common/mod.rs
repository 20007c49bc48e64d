//! Loopback fixtures shared by the integration tests.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use sealwire_tls::{IdentityPem, Message, RecvOutcome, Transport, TransportConfig};

const RECV_DEADLINE: Duration = Duration::from_secs(10);

pub fn generate_identity() -> IdentityPem {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    IdentityPem::new(generated.cert.pem(), generated.key_pair.serialize_pem())
}

/// An acceptor already listening on an ephemeral loopback port.
pub fn bound_acceptor(identity: IdentityPem, mut config: TransportConfig) -> (Transport, u16) {
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    let mut transport = Transport::with_config(identity, config);
    let port = transport.bind().unwrap().port();
    (transport, port)
}

pub fn initiator_config(port: u16) -> TransportConfig {
    TransportConfig::new("127.0.0.1", port)
}

/// Poll `recv` until it reports something other than `Empty`.
pub fn recv_blocking(transport: &mut Transport, msg: &mut Message) -> RecvOutcome {
    let deadline = Instant::now() + RECV_DEADLINE;
    loop {
        match transport.recv(msg).unwrap() {
            RecvOutcome::Empty => {
                assert!(Instant::now() < deadline, "timed out waiting for peer");
                thread::sleep(Duration::from_millis(2));
            }
            outcome => return outcome,
        }
    }
}
