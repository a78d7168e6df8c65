//! All ClipSync protocol message types.
//!
//! The logical RPC surface is three calls – `Register`, `Report`, `Ping` –
//! plus a diagnostic `Info` call.  On the wire every call and every reply is
//! one [`SyncMessage`] frame.

use crate::domain::close_signal::CloseReason;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Largest payload accepted by the decoder (16 MiB).
///
/// Clipboard content is usually tiny; the limit stops a corrupt length field
/// from making the reader allocate gigabytes.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Calls (slave → master)
    Register = 0x01,
    Report = 0x02,
    Ping = 0x03,
    // Replies and stream items (master → slave)
    Ack = 0x04,
    Payload = 0x05,
    SessionClosed = 0x06,
    // Diagnostics
    Info = 0x07,
    InfoReply = 0x08,
    Error = 0x09,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Register),
            0x02 => Ok(MessageType::Report),
            0x03 => Ok(MessageType::Ping),
            0x04 => Ok(MessageType::Ack),
            0x05 => Ok(MessageType::Payload),
            0x06 => Ok(MessageType::SessionClosed),
            0x07 => Ok(MessageType::Info),
            0x08 => Ok(MessageType::InfoReply),
            0x09 => Ok(MessageType::Error),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 24-byte header prepended to every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Identifies the payload type.
    pub message_type: MessageType,
    /// Length of the payload in bytes (not including this header).
    pub payload_length: u32,
    /// Monotonically increasing per-connection counter.
    pub sequence_number: u64,
    /// Microseconds since Unix epoch at time of generation.
    pub timestamp_us: u64,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// REPORT (0x02): new local clipboard content for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMessage {
    /// Advertised address of the reporting slave (the originator).
    pub address: String,
    /// Raw clipboard bytes.
    pub content: Vec<u8>,
}

/// One known peer inside an [`InfoReplyMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    /// Advertised address of the peer.
    pub address: String,
    /// Time-to-live of the membership record, in seconds.
    pub ttl_secs: u32,
    /// Seconds since the peer was last seen.
    pub idle_secs: u32,
}

/// INFO_REPLY (0x08): snapshot of the master's registries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoReplyMessage {
    /// Addresses with a live session stream.
    pub sessions: Vec<String>,
    /// Known peers from the membership registry.
    pub peers: Vec<PeerSummary>,
}

/// Error codes carried by an [`ErrorMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The frame was understood but is not valid in this position.
    UnexpectedMessage = 0x01,
    /// The frame could not be decoded.
    Malformed = 0x02,
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ErrorCode::UnexpectedMessage),
            0x02 => Ok(ErrorCode::Malformed),
            _ => Err(()),
        }
    }
}

/// ERROR (0x09): the master rejected a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub description: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All ClipSync protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Opens a session stream for the advertised address.
    Register { address: String },
    /// Submits clipboard content for fan-out.
    Report(ReportMessage),
    /// Heartbeat for the advertised address.
    Ping { address: String },
    /// Unary acknowledgement.
    Ack,
    /// Clipboard content pushed down a session stream.
    Payload { content: Vec<u8> },
    /// Last frame on a session stream before the master closes it.
    SessionClosed { reason: CloseReason },
    /// Requests a registry snapshot.
    Info,
    /// Registry snapshot.
    InfoReply(InfoReplyMessage),
    /// Call rejected.
    Error(ErrorMessage),
}

impl SyncMessage {
    /// Returns the [`MessageType`] code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::Register { .. } => MessageType::Register,
            SyncMessage::Report(_) => MessageType::Report,
            SyncMessage::Ping { .. } => MessageType::Ping,
            SyncMessage::Ack => MessageType::Ack,
            SyncMessage::Payload { .. } => MessageType::Payload,
            SyncMessage::SessionClosed { .. } => MessageType::SessionClosed,
            SyncMessage::Info => MessageType::Info,
            SyncMessage::InfoReply(_) => MessageType::InfoReply,
            SyncMessage::Error(_) => MessageType::Error,
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            SyncMessage::Register { .. } => "Register",
            SyncMessage::Report(_) => "Report",
            SyncMessage::Ping { .. } => "Ping",
            SyncMessage::Ack => "Ack",
            SyncMessage::Payload { .. } => "Payload",
            SyncMessage::SessionClosed { .. } => "SessionClosed",
            SyncMessage::Info => "Info",
            SyncMessage::InfoReply(_) => "InfoReply",
            SyncMessage::Error(_) => "Error",
        }
    }
}
