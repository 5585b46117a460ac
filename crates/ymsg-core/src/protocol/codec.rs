//! Binary codec for encoding and decoding YMSG packets.
//!
//! Wire format:
//! ```text
//! [magic "YMSG":4][version:2][vendor:2][body_len:2][service:2][status:4][session_id:4][body:N]
//! ```
//! Total header size: 20 bytes. All multi-byte integers are big-endian.
//!
//! The body is a run of `key C0 80 value C0 80` pairs.  Pairs are written in
//! insertion order and read back in wire order; a key may occur any number of
//! times.

use thiserror::Error;

use crate::protocol::messages::{ServiceType, FIELD_SEPARATOR, HEADER_SIZE, MAGIC, MAX_BODY_SIZE};
use crate::protocol::packet::{Packet, PacketBody};

/// Errors that can occur during packet encoding or decoding.
///
/// Every variant describes a malformed packet.  A caller reading a stream
/// drops the offending packet and keeps the session alive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame does not start with `"YMSG"`.
    #[error("bad magic: expected \"YMSG\", got {0:02X?}")]
    BadMagic([u8; 4]),

    /// The byte slice is shorter than the header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The header declares more body bytes than are available.
    #[error("body length mismatch: header says {declared}, available is {available}")]
    BodyLengthMismatch { declared: usize, available: usize },

    /// A key or value is not followed by the `C0 80` separator.
    #[error("unterminated field at body offset {offset}")]
    UnterminatedField { offset: usize },

    /// A key or value is not valid UTF-8.
    #[error("field at body offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    /// A key is the empty string.
    #[error("empty key at body offset {offset}")]
    EmptyKey { offset: usize },

    /// The encoded body does not fit the two-byte length field.
    #[error("body of {0} bytes exceeds the {MAX_BODY_SIZE}-byte limit")]
    BodyTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into a byte vector including the 20-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::EmptyKey`] for an empty key and
/// [`ProtocolError::BodyTooLarge`] when the body exceeds 65535 bytes.
///
/// # Examples
///
/// ```rust
/// use ymsg_core::protocol::{decode_packet, encode_packet, Packet, PacketBody, ServiceType};
///
/// let packet = Packet::new(ServiceType::Message, PacketBody::new().with("1", "alice"));
/// let bytes = encode_packet(&packet).unwrap();
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = encode_body(&packet.body)?;
    if body.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(body.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());

    // Header: magic (4) + version (2) + vendor (2) + body_len (2) +
    //         service (2) + status (4) + session_id (4) = 20 bytes
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&packet.version.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // vendor
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(&packet.service.code().to_be_bytes());
    buf.extend_from_slice(&packet.status.to_be_bytes());
    buf.extend_from_slice(&packet.session_id.to_be_bytes());

    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decodes one [`Packet`] from the beginning of `bytes`.
///
/// Returns the decoded packet and the total number of bytes consumed
/// (header + body), so the caller can advance their read cursor.  `bytes`
/// may hold more than one frame: anything past the declared body is not an
/// error, it is simply not counted in `consumed`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let body_len = body_length(bytes)?;

    let total_needed = HEADER_SIZE + body_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::BodyLengthMismatch {
            declared: body_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let version = read_u16(bytes, 4);
    // bytes[6..8] are the vendor id – ignored on decode
    let service = ServiceType::from(read_u16(bytes, 10));
    let status = read_u32(bytes, 12);
    let session_id = read_u32(bytes, 16);

    let body = decode_body(&bytes[HEADER_SIZE..total_needed])?;
    Ok((
        Packet {
            version,
            service,
            status,
            session_id,
            body,
        },
        total_needed,
    ))
}

/// Validates the header at the start of `bytes` and returns its declared
/// body length.
///
/// Stream readers call this after reading exactly [`HEADER_SIZE`] bytes to
/// learn how many more to read.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] for a short header and
/// [`ProtocolError::BadMagic`] when the magic token mismatches.
pub fn body_length(bytes: &[u8]) -> Result<usize, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    declared_body_length(bytes)
}

/// Returns the body-length field of a header without checking the magic.
///
/// Stream readers use this to consume a whole frame before decoding it, so
/// a frame with a bad magic token is skipped instead of desyncing the stream.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] for a short header.
pub fn declared_body_length(bytes: &[u8]) -> Result<usize, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    Ok(read_u16(bytes, 8) as usize)
}

// ── Body encoding ─────────────────────────────────────────────────────────────

fn encode_body(body: &PacketBody) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    for (key, value) in body.iter() {
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey { offset: buf.len() });
        }
        write_field(&mut buf, key);
        write_field(&mut buf, value);
    }
    Ok(buf)
}

fn write_field(buf: &mut Vec<u8>, field: &str) {
    buf.extend_from_slice(field.as_bytes());
    buf.extend_from_slice(&FIELD_SEPARATOR);
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_body(bytes: &[u8]) -> Result<PacketBody, ProtocolError> {
    let mut body = PacketBody::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let key_offset = offset;
        let (key, next) = read_field(bytes, offset)?;
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey { offset: key_offset });
        }
        let (value, next) = read_field(bytes, next)?;
        body.push(key, value);
        offset = next;
    }

    Ok(body)
}

/// Reads one separator-terminated field starting at `offset`.  Returns the
/// field and the offset just past its separator.
fn read_field(bytes: &[u8], offset: usize) -> Result<(&str, usize), ProtocolError> {
    let rest = &bytes[offset..];
    let end = rest
        .windows(FIELD_SEPARATOR.len())
        .position(|w| w == FIELD_SEPARATOR)
        .ok_or(ProtocolError::UnterminatedField { offset })?;

    let field =
        std::str::from_utf8(&rest[..end]).map_err(|_| ProtocolError::InvalidUtf8 { offset })?;
    Ok((field, offset + end + FIELD_SEPARATOR.len()))
}

// ── Primitive readers ─────────────────────────────────────────────────────────

// Callers have already checked `bytes.len() >= HEADER_SIZE`.

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
