//! Framed message channel over an established TLS session.
//!
//! The stream is non-blocking once a channel exists. Receiving reassembles
//! frames across calls: bytes are pulled from the session into `rx_buf`
//! until a full header is present, the header's body length is checked
//! against `max_body_len`, and only then is the body waited for and copied
//! into the caller's message (resized to exactly that length).
//!
//! Sending hands the whole frame to the session, then drains encrypted
//! records to the stream. A short write just means another pass through the
//! drain loop; "would block" is reported or waited out, never spun on.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};
use rustls::Connection;
use sealwire_core::{FrameHeader, Message, HEADER_LEN};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::stream::ByteStream;

const READ_CHUNK: usize = 16 * 1024;

/// Result of a `recv` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A full message was read; carries its body length.
    Received(usize),
    /// The peer ended the stream.
    Closed,
    /// Nothing complete yet; try again later.
    Empty,
}

/// Result of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Frame fully written to the stream.
    Complete(usize),
    /// Frame accepted by the session, but the stream is backpressured.
    /// Call `flush` later.
    WouldBlock { queued: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Drained,
    WouldBlock,
}

enum Drain {
    Data,
    Nothing,
    Closed,
}

enum Pull {
    Progress,
    Idle,
    Eof,
}

pub struct Channel<S> {
    conn: Connection,
    io: S,
    rx_buf: BytesMut,
    max_body_len: usize,
}

impl<S: ByteStream> Channel<S> {
    /// Wrap a session whose handshake has completed.
    pub fn new(mut conn: Connection, io: S, max_body_len: usize) -> Self {
        // Whole frames are queued at once; backpressure is handled at the
        // stream, not by the session's plaintext buffer.
        conn.set_buffer_limit(None);
        Self {
            conn,
            io,
            rx_buf: BytesMut::new(),
            max_body_len,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn max_body_len(&self) -> usize {
        self.max_body_len
    }

    /// True while encrypted records are waiting for the stream.
    pub fn has_pending_output(&self) -> bool {
        self.conn.wants_write()
    }

    /// Send a message, waiting out backpressure. Returns frame bytes sent.
    pub fn send(&mut self, msg: &Message) -> Result<usize, TransportError> {
        let len = self.queue(msg)?;
        if self.flush()? == FlushStatus::WouldBlock {
            self.drain_blocking()?;
        }
        Ok(len)
    }

    /// Send a message without waiting on the stream.
    pub fn try_send(&mut self, msg: &Message) -> Result<SendStatus, TransportError> {
        let len = self.queue(msg)?;
        Ok(match self.flush()? {
            FlushStatus::Drained => SendStatus::Complete(len),
            FlushStatus::WouldBlock => SendStatus::WouldBlock { queued: len },
        })
    }

    /// Write queued records to the stream until done or it would block.
    pub fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.io) {
                Ok(0) => {
                    return Err(TransportError::SendFailed(io::ErrorKind::WriteZero.into()));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::SendFailed(e)),
            }
        }
        Ok(FlushStatus::Drained)
    }

    /// Receive one message into `msg`.
    pub fn recv(&mut self, msg: &mut Message) -> Result<RecvOutcome, TransportError> {
        loop {
            if let Some(len) = self.take_frame(msg)? {
                return Ok(RecvOutcome::Received(len));
            }

            match self.pull()? {
                Pull::Progress => continue,
                Pull::Idle => return Ok(RecvOutcome::Empty),
                Pull::Eof => {
                    if !self.rx_buf.is_empty() {
                        warn!(
                            pending = self.rx_buf.len(),
                            "peer closed mid-frame, discarding partial frame"
                        );
                        self.rx_buf.clear();
                    }
                    return Ok(RecvOutcome::Closed);
                }
            }
        }
    }

    /// Queue close_notify and push it out if the stream allows.
    pub fn shutdown(&mut self) {
        self.conn.send_close_notify();
        match self.flush() {
            Ok(FlushStatus::Drained) => {}
            Ok(FlushStatus::WouldBlock) => debug!("close_notify left queued"),
            Err(e) => debug!(error = %e, "close_notify not delivered"),
        }
    }

    fn queue(&mut self, msg: &Message) -> Result<usize, TransportError> {
        msg.validate()?;
        let body_len = msg.body_len();
        if body_len > self.max_body_len {
            return Err(TransportError::OversizedMessage {
                len: body_len,
                max: self.max_body_len,
            });
        }

        let frame = msg.encode();
        let mut written = 0;
        while written < frame.len() {
            let n = self
                .conn
                .writer()
                .write(&frame[written..])
                .map_err(TransportError::SendFailed)?;
            if n == 0 {
                return Err(TransportError::SendFailed(io::ErrorKind::WriteZero.into()));
            }
            written += n;
        }
        Ok(written)
    }

    fn drain_blocking(&mut self) -> Result<(), TransportError> {
        self.io
            .set_blocking(true)
            .map_err(TransportError::SendFailed)?;
        let drained = self.flush();
        let restored = self.io.set_blocking(false);

        match drained? {
            FlushStatus::Drained => restored.map_err(TransportError::SendFailed),
            FlushStatus::WouldBlock => Err(TransportError::SendFailed(io::Error::new(
                io::ErrorKind::WouldBlock,
                "stream still blocked in blocking mode",
            ))),
        }
    }

    fn take_frame(&mut self, msg: &mut Message) -> Result<Option<usize>, TransportError> {
        if self.rx_buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = FrameHeader::decode(&self.rx_buf[..HEADER_LEN])?;
        let body_len = header.body_len as usize;
        if body_len > self.max_body_len {
            return Err(TransportError::OversizedMessage {
                len: body_len,
                max: self.max_body_len,
            });
        }

        let needed = HEADER_LEN + body_len;
        if self.rx_buf.len() < needed {
            self.rx_buf.reserve(needed - self.rx_buf.len());
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&self.rx_buf[..HEADER_LEN]);
        self.rx_buf.advance(HEADER_LEN);

        msg.set_header(raw)?;
        msg.resize(msg.body_len())?;
        msg.body_mut().copy_from_slice(&self.rx_buf[..body_len]);
        self.rx_buf.advance(body_len);

        Ok(Some(body_len))
    }

    /// Move decrypted bytes from the session into `rx_buf`.
    fn drain_plaintext(&mut self) -> Result<Drain, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut got = false;
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => return Ok(if got { Drain::Data } else { Drain::Closed }),
                Ok(n) => {
                    self.rx_buf.extend_from_slice(&chunk[..n]);
                    got = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if got { Drain::Data } else { Drain::Nothing });
                }
                // Transport EOF without close_notify.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(if got { Drain::Data } else { Drain::Closed });
                }
                Err(e) => return Err(TransportError::RecvFailed(e)),
            }
        }
    }

    fn pull(&mut self) -> Result<Pull, TransportError> {
        match self.drain_plaintext()? {
            Drain::Data => return Ok(Pull::Progress),
            Drain::Closed => return Ok(Pull::Eof),
            Drain::Nothing => {}
        }

        match self.conn.read_tls(&mut self.io) {
            // Ok(0) is EOF; the session records it and the next drain reports it.
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Pull::Idle),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Pull::Progress),
            Err(e) => return Err(TransportError::RecvFailed(e)),
        }

        if let Err(err) = self.conn.process_new_packets() {
            // Best effort: let the peer see our alert.
            let _ = self.flush();
            return Err(TransportError::RecvFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                err,
            )));
        }

        if self.conn.wants_write() {
            if let Err(e) = self.flush() {
                debug!(error = %e, "post-read flush failed");
            }
        }

        Ok(Pull::Progress)
    }
}
