//! Core sealwire wire types, framing, and constants.
//!
//! This crate provides:
//! - The fixed-size frame header and its codec
//! - `Message`, the header + body buffer moved across a secure channel
//!
//! # Wire Format
//!
//! ```text
//! [Magic (2B)][Version (1B)][Kind (1B)][BodyLen (4B, BE)][Body (BodyLen B)]
//! ```
//!
//! Both ends of a connection must agree on this layout; it is carried inside
//! TLS application data and never seen in the clear.

#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const SEALWIRE_VERSION: u8 = 1;

pub const SEALWIRE_MAGIC: [u8; 2] = [0x53, 0x57]; // 'SW'

/// Frame header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Default upper bound on a single message body (16 MiB).
/// Receivers reject larger declared lengths before allocating.
pub const DEFAULT_MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("header too short: {0}")]
    TooShort(usize),
    #[error("invalid magic: {0:?}")]
    InvalidMagic([u8; 2]),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("body length {len} exceeds limit {max}")]
    TooLarge { len: usize, max: usize },
    #[error("header declares {header} body bytes but buffer holds {body}")]
    LengthMismatch { header: usize, body: usize },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Application-defined message tag, carried verbatim.
    pub kind: u8,
    pub body_len: u32,
}

impl FrameHeader {
    pub fn new(kind: u8, body_len: u32) -> Self {
        Self { kind, body_len }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(&SEALWIRE_MAGIC);
        buf.put_u8(SEALWIRE_VERSION);
        buf.put_u8(self.kind);
        buf.put_u32(self.body_len);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }

        let mut buf = &bytes[..HEADER_LEN];
        let magic = [buf.get_u8(), buf.get_u8()];
        if magic != SEALWIRE_MAGIC {
            return Err(FrameError::InvalidMagic(magic));
        }

        let version = buf.get_u8();
        if version != SEALWIRE_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let kind = buf.get_u8();
        let body_len = buf.get_u32();

        Ok(Self { kind, body_len })
    }
}

/// A framed message: fixed header plus variable body.
///
/// The header is the single source of truth for the body length. `resize`
/// keeps the two in sync, and the receive path calls `resize` with the
/// length it decoded before filling the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: [u8; HEADER_LEN],
    body: BytesMut,
}

impl Message {
    /// Empty message of the given kind.
    pub fn new(kind: u8) -> Self {
        Self {
            header: FrameHeader::new(kind, 0).encode(),
            body: BytesMut::new(),
        }
    }

    /// Message carrying a copy of `body`.
    pub fn with_body(kind: u8, body: impl AsRef<[u8]>) -> Result<Self, FrameError> {
        let body = body.as_ref();
        let body_len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
            len: body.len(),
            max: u32::MAX as usize,
        })?;

        Ok(Self {
            header: FrameHeader::new(kind, body_len).encode(),
            body: BytesMut::from(body),
        })
    }

    pub fn kind(&self) -> u8 {
        self.header[3]
    }

    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    /// Replace the header with raw bytes received from the wire.
    ///
    /// The body is left untouched; callers follow up with
    /// `resize(self.body_len())`.
    pub fn set_header(&mut self, raw: [u8; HEADER_LEN]) -> Result<FrameHeader, FrameError> {
        let header = FrameHeader::decode(&raw)?;
        self.header = raw;
        Ok(header)
    }

    /// Body length as declared by the header.
    pub fn body_len(&self) -> usize {
        u32::from_be_bytes([self.header[4], self.header[5], self.header[6], self.header[7]])
            as usize
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Resize the body to exactly `len` bytes and record `len` in the header.
    ///
    /// New bytes are zeroed.
    pub fn resize(&mut self, len: usize) -> Result<(), FrameError> {
        let body_len = u32::try_from(len).map_err(|_| FrameError::TooLarge {
            len,
            max: u32::MAX as usize,
        })?;
        self.body.resize(len, 0);
        self.header = FrameHeader::new(self.kind(), body_len).encode();
        Ok(())
    }

    /// Check that the header's declared length matches the body buffer.
    ///
    /// Only fails between `set_header` and the matching `resize`.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.body.len() != self.body_len() {
            return Err(FrameError::LengthMismatch {
                header: self.body_len(),
                body: self.body.len(),
            });
        }
        Ok(())
    }

    /// Total serialized length (header + body).
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// Serialize header and body into one contiguous frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_slice(&self.header);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}
