//! Sealwire CLI tools: identity generation, echo listener, test client.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sealwire_core::Message;
use sealwire_tls::identity::{decode_certificates, fingerprint};
use sealwire_tls::{IdentityPem, RecvOutcome, Role, Transport, TransportConfig, TransportOption};
use tracing::info;

/// Frame kind used for text messages sent by `connect`.
const TEXT_KIND: u8 = 1;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(name = "sealwire")]
#[command(about = "Sealwire secure transport tools")]
struct Args {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a self-signed PEM identity
    GenCert {
        /// Output path prefix; writes <out>.crt and <out>.key
        #[arg(short, long, default_value = "sealwire")]
        out: String,

        /// Subject alternative names
        #[arg(long = "san", default_value = "localhost")]
        sans: Vec<String>,
    },

    /// Accept one peer and echo every message back until it closes
    Listen {
        #[command(flatten)]
        conn: ConnArgs,
    },

    /// Connect, send each message and print its echo
    Connect {
        #[command(flatten)]
        conn: ConnArgs,

        /// Messages to send
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Show version information
    Version,
}

#[derive(clap::Args, Debug)]
struct ConnArgs {
    /// JSON transport config; flags and env override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "SEALWIRE_HOST")]
    host: Option<String>,

    #[arg(long, env = "SEALWIRE_PORT")]
    port: Option<String>,

    /// Certificate chain (PEM)
    #[arg(long, env = "SEALWIRE_CERT")]
    cert: PathBuf,

    /// Private key (PEM)
    #[arg(long, env = "SEALWIRE_KEY")]
    key: PathBuf,

    /// Peer certificate to pin (PEM); defaults to our own certificate
    #[arg(long, env = "SEALWIRE_TRUST")]
    trust: Option<PathBuf>,

    #[arg(long)]
    max_body_len: Option<String>,
}

impl ConnArgs {
    fn transport(&self) -> Result<Transport> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str::<TransportConfig>(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => TransportConfig::default(),
        };

        if let Some(pem) = self.trust.as_deref().map(read_pem).transpose()? {
            config.trusted_peer_pem = Some(pem);
        }

        let identity = IdentityPem::new(read_pem(&self.cert)?, read_pem(&self.key)?);
        let mut transport = Transport::with_config(identity, config);

        let overrides = [
            (TransportOption::Host, &self.host),
            (TransportOption::Port, &self.port),
            (TransportOption::MaxBodyLen, &self.max_body_len),
        ];
        for (option, value) in overrides {
            if let Some(value) = value {
                transport
                    .set_option(option, value)
                    .with_context(|| format!("invalid {option:?}"))?;
            }
        }
        Ok(transport)
    }
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Poll until a message or close arrives.
fn recv_wait(transport: &mut Transport, msg: &mut Message) -> Result<Option<usize>> {
    loop {
        match transport.recv(msg)? {
            RecvOutcome::Received(len) => return Ok(Some(len)),
            RecvOutcome::Closed => return Ok(None),
            RecvOutcome::Empty => thread::sleep(POLL_INTERVAL),
        }
    }
}

fn gen_cert(out: &str, sans: Vec<String>) -> Result<()> {
    let generated =
        rcgen::generate_simple_self_signed(sans).context("generating self-signed certificate")?;
    let cert_pem = generated.cert.pem();
    let key_pem = generated.key_pair.serialize_pem();

    let cert_path = format!("{}.crt", out);
    let key_path = format!("{}.key", out);
    fs::write(&cert_path, &cert_pem).with_context(|| format!("writing {}", cert_path))?;
    fs::write(&key_path, &key_pem).with_context(|| format!("writing {}", key_path))?;

    let chain = decode_certificates(cert_pem.as_bytes())?;
    println!("Certificate: {}", cert_path);
    println!("Private key: {}", key_path);
    println!("SHA-256:     {}", fingerprint(chain[0].as_ref()));
    Ok(())
}

fn listen(conn: ConnArgs) -> Result<()> {
    let mut transport = conn.transport()?;
    let addr = transport.bind()?;
    println!("Listening on {}", addr);

    transport.init(Role::Acceptor)?;
    if let Some(peer) = transport.peer_info() {
        println!(
            "Peer connected: {}",
            peer.subject.as_deref().unwrap_or("<unknown subject>")
        );
    }

    let mut msg = Message::new(0);
    let mut echoed = 0usize;
    while let Some(len) = recv_wait(&mut transport, &mut msg)? {
        info!(kind = msg.kind(), len, "echoing message");
        transport.send(&msg)?;
        echoed += 1;
    }

    println!("Peer closed after {} message(s)", echoed);
    transport.close();
    Ok(())
}

fn connect(conn: ConnArgs, messages: Vec<String>) -> Result<()> {
    let mut transport = conn.transport()?;
    transport.init(Role::Initiator)?;

    let mut reply = Message::new(0);
    for text in messages {
        let sent = transport.send(&Message::with_body(TEXT_KIND, text.as_bytes())?)?;
        info!(bytes = sent, "sent message");

        match recv_wait(&mut transport, &mut reply)? {
            Some(_) => println!("{}", String::from_utf8_lossy(reply.body())),
            None => bail!("peer closed before echoing {:?}", text),
        }
    }

    transport.close();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match args.command {
        Command::GenCert { out, sans } => gen_cert(&out, sans)?,
        Command::Listen { conn } => listen(conn)?,
        Command::Connect { conn, messages } => connect(conn, messages)?,
        Command::Version => {
            println!("sealwire {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
