//! Binary codec for encoding and decoding ClipSync protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//!
//! Payload field encodings:
//!
//! | Field kind | Encoding                              |
//! |------------|---------------------------------------|
//! | string     | `u16` length + UTF-8 bytes            |
//! | byte blob  | `u32` length + raw bytes              |
//! | list       | `u16` count + items                   |

use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::close_signal::CloseReason;
use crate::protocol::messages::{
    ErrorCode, ErrorMessage, InfoReplyMessage, MessageHeader, MessageType, PeerSummary,
    ReportMessage, SyncMessage, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use thiserror::Error;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload of {size} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// A string or list does not fit its length prefix.
    #[error("{field} is too long to encode ({len} > {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`SyncMessage`] into a byte vector including the 24-byte header.
///
/// The sequence number is **not** set by this function – pass a pre-incremented
/// value from a [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if a field does not fit its length prefix or the
/// payload exceeds [`MAX_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```rust
/// use clipsync_core::protocol::{encode_message, decode_message, SyncMessage};
///
/// let msg = SyncMessage::Ping { address: "10.0.0.2:7000".into() };
/// let bytes = encode_message(&msg, 0, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &SyncMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    // Header: version (1) + msg_type (1) + reserved (2) + payload_len (4) +
    //         seq (8) + timestamp_us (8) = 24 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`SyncMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
pub fn encode_message_now(
    msg: &SyncMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    encode_message(msg, sequence_number, current_timestamp_us())
}

/// Microseconds since the Unix epoch, or 0 if the system clock is before it.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Parses and validates the 24-byte header at the start of `bytes`.
///
/// Used by the async frame reader, which reads the header first and then
/// exactly `payload_length` more bytes.
///
/// # Errors
///
/// Returns [`ProtocolError`] for a short buffer, unknown version or type, or
/// a declared payload larger than [`MAX_PAYLOAD_SIZE`].
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let message_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if payload_length as usize > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_length as usize,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(MessageHeader {
        version,
        message_type,
        payload_length,
        sequence_number: read_u64(bytes, 8)?,
        timestamp_us: read_u64(bytes, 16)?,
    })
}

/// Decodes one [`SyncMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(SyncMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let payload_len = header.payload_length as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(header.message_type, payload)?;
    Ok((msg, total_needed))
}

/// Decodes a payload whose header has already been parsed.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload does not match
/// the layout of `message_type`.
pub fn decode_payload(
    message_type: MessageType,
    payload: &[u8],
) -> Result<SyncMessage, ProtocolError> {
    match message_type {
        MessageType::Register => {
            let (address, _) = read_length_prefixed_string(payload, 0)?;
            Ok(SyncMessage::Register { address })
        }
        MessageType::Report => decode_report(payload).map(SyncMessage::Report),
        MessageType::Ping => {
            let (address, _) = read_length_prefixed_string(payload, 0)?;
            Ok(SyncMessage::Ping { address })
        }
        MessageType::Ack => Ok(SyncMessage::Ack),
        MessageType::Payload => {
            let (content, _) = read_length_prefixed_bytes(payload, 0)?;
            Ok(SyncMessage::Payload { content })
        }
        MessageType::SessionClosed => {
            require_len(payload, 1, "SessionClosed")?;
            let reason = CloseReason::try_from(payload[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown close reason: {}", payload[0]))
            })?;
            Ok(SyncMessage::SessionClosed { reason })
        }
        MessageType::Info => Ok(SyncMessage::Info),
        MessageType::InfoReply => decode_info_reply(payload).map(SyncMessage::InfoReply),
        MessageType::Error => decode_error(payload).map(SyncMessage::Error),
    }
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &SyncMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match msg {
        SyncMessage::Register { address } => {
            write_length_prefixed_string(&mut buf, address, "Register.address")?
        }
        SyncMessage::Report(m) => encode_report(&mut buf, m)?,
        SyncMessage::Ping { address } => {
            write_length_prefixed_string(&mut buf, address, "Ping.address")?
        }
        SyncMessage::Ack | SyncMessage::Info => {} // empty payload
        SyncMessage::Payload { content } => write_length_prefixed_bytes(&mut buf, content),
        SyncMessage::SessionClosed { reason } => buf.push(*reason as u8),
        SyncMessage::InfoReply(m) => encode_info_reply(&mut buf, m)?,
        SyncMessage::Error(m) => {
            buf.push(m.code as u8);
            write_length_prefixed_string(&mut buf, &m.description, "Error.description")?;
        }
    }
    Ok(buf)
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn encode_report(buf: &mut Vec<u8>, m: &ReportMessage) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.address, "Report.address")?;
    write_length_prefixed_bytes(buf, &m.content);
    Ok(())
}

fn encode_info_reply(buf: &mut Vec<u8>, m: &InfoReplyMessage) -> Result<(), ProtocolError> {
    write_count(buf, m.sessions.len(), "InfoReply.sessions")?;
    for address in &m.sessions {
        write_length_prefixed_string(buf, address, "InfoReply.sessions[]")?;
    }
    write_count(buf, m.peers.len(), "InfoReply.peers")?;
    for peer in &m.peers {
        write_length_prefixed_string(buf, &peer.address, "InfoReply.peers[].address")?;
        buf.extend_from_slice(&peer.ttl_secs.to_be_bytes());
        buf.extend_from_slice(&peer.idle_secs.to_be_bytes());
    }
    Ok(())
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_report(p: &[u8]) -> Result<ReportMessage, ProtocolError> {
    let (address, offset) = read_length_prefixed_string(p, 0)?;
    let (content, _) = read_length_prefixed_bytes(p, offset)?;
    Ok(ReportMessage { address, content })
}

fn decode_info_reply(p: &[u8]) -> Result<InfoReplyMessage, ProtocolError> {
    let (session_count, mut offset) = read_count(p, 0)?;
    let mut sessions = Vec::with_capacity(session_count);
    for _ in 0..session_count {
        let (address, next) = read_length_prefixed_string(p, offset)?;
        sessions.push(address);
        offset = next;
    }

    let (peer_count, next) = read_count(p, offset)?;
    offset = next;
    let mut peers = Vec::with_capacity(peer_count);
    for _ in 0..peer_count {
        let (address, next) = read_length_prefixed_string(p, offset)?;
        require_len(p, next + 8, "InfoReply.peers[]")?;
        let ttl_secs = u32::from_be_bytes([p[next], p[next + 1], p[next + 2], p[next + 3]]);
        let idle_secs = u32::from_be_bytes([p[next + 4], p[next + 5], p[next + 6], p[next + 7]]);
        peers.push(PeerSummary {
            address,
            ttl_secs,
            idle_secs,
        });
        offset = next + 8;
    }

    Ok(InfoReplyMessage { sessions, peers })
}

fn decode_error(p: &[u8]) -> Result<ErrorMessage, ProtocolError> {
    require_len(p, 1, "Error")?;
    let code = ErrorCode::try_from(p[0])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown error code: {}", p[0])))?;
    let (description, _) = read_length_prefixed_string(p, 1)?;
    Ok(ErrorMessage { code, description })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        })?;
    Ok(u64::from_be_bytes(bytes))
}

fn write_count(buf: &mut Vec<u8>, count: usize, field: &'static str) -> Result<(), ProtocolError> {
    let count = u16::try_from(count).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: count,
        max: u16::MAX as usize,
    })?;
    buf.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

fn read_count(buf: &[u8], offset: usize) -> Result<(usize, usize), ProtocolError> {
    require_len(buf, offset + 2, "list count")?;
    let count = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    Ok((count, offset + 2))
}

/// Writes a 2-byte length prefix followed by the UTF-8 bytes of `s`.
fn write_length_prefixed_string(
    buf: &mut Vec<u8>,
    s: &str,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: bytes.len(),
        max: u16::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

/// Writes a 4-byte length prefix followed by `bytes`.
///
/// Oversized blobs are caught by the [`MAX_PAYLOAD_SIZE`] check in
/// [`encode_message`], which is far below `u32::MAX`.
fn write_length_prefixed_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_length_prefixed_bytes(buf: &[u8], offset: usize) -> Result<(Vec<u8>, usize), ProtocolError> {
    require_len(buf, offset + 4, "blob length")?;
    let len = u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]) as usize;
    let start = offset + 4;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "blob of length {len} at offset {start} exceeds buffer"
        )));
    }
    Ok((buf[start..start + len].to_vec(), start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
