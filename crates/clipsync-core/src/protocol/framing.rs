//! Async frame I/O over any byte stream.
//!
//! A frame is exactly one encoded [`SyncMessage`]: the 24-byte header
//! followed by `payload_len` bytes.  TCP delivers a byte stream, not
//! messages, so the reader first pulls the fixed-size header, learns the
//! payload length from it, and then pulls exactly that many bytes.
//!
//! ```text
//!  read_exact(24)          read_exact(payload_len)
//! ┌──────────────────────┐┌─────────────────────────┐
//! │ ver type rsv len seq ││         payload         │  → decode_payload
//! └──────────────────────┘└─────────────────────────┘
//! ```

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::codec::{decode_header, decode_payload, encode_message_now, ProtocolError};
use crate::protocol::messages::{SyncMessage, HEADER_SIZE};

/// Errors produced while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed, or closed in the middle of a frame.
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The bytes on the stream are not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl FrameError {
    /// Returns `true` when the peer closed the stream mid-frame.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
///
/// # Errors
///
/// Returns [`FrameError::Io`] when the stream fails or ends inside a frame,
/// and [`FrameError::Protocol`] when the header or payload is invalid.  An
/// oversized declared length is rejected before any payload is read.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<SyncMessage>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];

    // Peek at the first byte separately so that EOF before a frame starts
    // is distinguishable from EOF inside one.
    let first = reader.read(&mut header_buf[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header_buf[1..]).await?;

    let header = decode_header(&header_buf)?;
    let mut payload = vec![0u8; header.payload_length as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(decode_payload(header.message_type, &payload)?))
}

/// Encodes `msg` with the given sequence number and writes it to `writer`.
///
/// The writer is flushed so the frame is on the wire when this returns.
///
/// # Errors
///
/// Returns [`FrameError::Protocol`] if the message cannot be encoded and
/// [`FrameError::Io`] if the write fails.
pub async fn write_message<W>(
    writer: &mut W,
    msg: &SyncMessage,
    sequence_number: u64,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message_now(msg, sequence_number)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::close_signal::CloseReason;
    use crate::protocol::codec::encode_message;
    use crate::protocol::messages::{ReportMessage, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_written_back_to_back_are_read_in_order() {
        // Arrange
        let (mut client, mut server) = duplex(1024);
        let sent = vec![
            SyncMessage::Register {
                address: "10.0.0.2:7000".into(),
            },
            SyncMessage::Report(ReportMessage {
                address: "10.0.0.2:7000".into(),
                content: b"hello".to_vec(),
            }),
            SyncMessage::SessionClosed {
                reason: CloseReason::Expired,
            },
        ];

        // Act
        for (seq, msg) in sent.iter().enumerate() {
            write_message(&mut client, msg, seq as u64).await.unwrap();
        }
        drop(client);

        // Assert
        for expected in &sent {
            let got = read_message(&mut server).await.unwrap();
            assert_eq!(got.as_ref(), Some(expected));
        }
        assert!(
            read_message(&mut server).await.unwrap().is_none(),
            "clean EOF after the last frame must yield None"
        );
    }

    #[tokio::test]
    async fn test_eof_inside_a_frame_is_an_error() {
        // Arrange – write only half a header
        let (mut client, mut server) = duplex(64);
        let bytes = encode_message(&SyncMessage::Ack, 0, 0).unwrap();
        client.write_all(&bytes[..10]).await.unwrap();
        drop(client);

        // Act
        let err = read_message(&mut server).await.unwrap_err();

        // Assert
        assert!(err.is_unexpected_eof(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected_before_reading_payload() {
        // Arrange – a header that claims more than the limit, and no payload
        let (mut client, mut server) = duplex(64);
        let mut header = [0u8; HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[1] = 0x05;
        header[4..8].copy_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_be_bytes());
        client.write_all(&header).await.unwrap();

        // Act
        let err = read_message(&mut server).await.unwrap_err();

        // Assert
        assert!(matches!(
            err,
            FrameError::Protocol(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
