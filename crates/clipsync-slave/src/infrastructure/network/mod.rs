//! Network infrastructure for the slave: the TCP [`MasterLink`].
//!
//! Architecture:
//! - Every `register` opens its own TCP connection.  That connection *is*
//!   the session: the master pushes `Payload` frames down it and closes it
//!   when the session ends.  Dropping the returned stream closes the socket,
//!   which the master sees as a disconnect.
//! - `report`, `ping` and `info` share one long-lived control connection,
//!   dialled lazily and re-dialled after any failure.  Calls on it are
//!   strictly request → reply, serialised by a mutex.

use std::time::Duration;

use async_trait::async_trait;
use clipsync_core::protocol::{InfoReplyMessage, ReportMessage, SequenceCounter};
use clipsync_core::{read_message, write_message, CloseReason, SyncMessage};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::application::master_link::{InboundStream, LinkError, MasterLink};

/// Default bound on connecting and on each unary call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the link to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterLinkConfig {
    /// `host:port` of the master's relay listener.
    pub master_addr: String,
    /// Upper bound on connecting and on each unary call.
    pub call_timeout: Duration,
}

impl MasterLinkConfig {
    pub fn new(master_addr: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// [`MasterLink`] over TCP.
#[derive(Debug)]
pub struct TcpMasterLink {
    config: MasterLinkConfig,
    control: Mutex<Option<TcpStream>>,
    sequence: SequenceCounter,
}

impl TcpMasterLink {
    pub fn new(config: MasterLinkConfig) -> Self {
        Self {
            config,
            control: Mutex::new(None),
            sequence: SequenceCounter::new(),
        }
    }

    /// Asks the master for a snapshot of its registries.
    pub async fn info(&self) -> Result<InfoReplyMessage, LinkError> {
        match self.call(SyncMessage::Info).await? {
            SyncMessage::InfoReply(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    async fn connect(&self) -> Result<TcpStream, LinkError> {
        let addr = self.config.master_addr.as_str();
        let stream = timeout(self.config.call_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| LinkError::Timeout(self.config.call_timeout))?
            .map_err(|source| LinkError::ConnectFailed {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Sends one call on the control connection and returns the reply.
    async fn call(&self, msg: SyncMessage) -> Result<SyncMessage, LinkError> {
        let mut control = self.control.lock().await;
        let mut stream = match control.take() {
            Some(stream) => stream,
            None => {
                debug!(master = %self.config.master_addr, "dialling control connection");
                self.connect().await?
            }
        };

        let result = timeout(
            self.config.call_timeout,
            exchange(&mut stream, &msg, self.sequence.next()),
        )
        .await
        .unwrap_or(Err(LinkError::Timeout(self.config.call_timeout)));

        // A failed exchange may leave half a frame on the wire; only a clean
        // connection goes back into the slot.
        if result.is_ok() {
            *control = Some(stream);
        }
        result
    }
}

async fn exchange(
    stream: &mut TcpStream,
    msg: &SyncMessage,
    sequence_number: u64,
) -> Result<SyncMessage, LinkError> {
    write_message(stream, msg, sequence_number).await?;
    read_message(stream).await?.ok_or(LinkError::Closed)
}

fn expect_ack(reply: SyncMessage) -> Result<(), LinkError> {
    match reply {
        SyncMessage::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: SyncMessage) -> LinkError {
    match reply {
        SyncMessage::Error(e) => LinkError::Rejected(e.description),
        other => LinkError::UnexpectedReply(other.name()),
    }
}

#[async_trait]
impl MasterLink for TcpMasterLink {
    async fn register(&self, address: &str) -> Result<Box<dyn InboundStream>, LinkError> {
        let mut stream = self.connect().await?;
        let frame = SyncMessage::Register {
            address: address.to_string(),
        };
        timeout(self.config.call_timeout, write_message(&mut stream, &frame, 0))
            .await
            .map_err(|_| LinkError::Timeout(self.config.call_timeout))??;
        info!(master = %self.config.master_addr, %address, "session stream opened");
        Ok(Box::new(TcpInboundStream::new(stream)))
    }

    async fn report(&self, content: &[u8], address: &str) -> Result<(), LinkError> {
        let call = SyncMessage::Report(ReportMessage {
            address: address.to_string(),
            content: content.to_vec(),
        });
        expect_ack(self.call(call).await?)
    }

    async fn ping(&self, address: &str) -> Result<(), LinkError> {
        let call = SyncMessage::Ping {
            address: address.to_string(),
        };
        expect_ack(self.call(call).await?)
    }
}

// ── Session stream ────────────────────────────────────────────────────────────

/// The slave end of a session stream.
///
/// Owns the whole socket: keeping the write half open is what tells the
/// master the slave is still there.
#[derive(Debug)]
pub struct TcpInboundStream {
    stream: TcpStream,
    close_reason: Option<CloseReason>,
}

impl TcpInboundStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            close_reason: None,
        }
    }

    /// The reason the master gave when it ended the session, if it did.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }
}

#[async_trait]
impl InboundStream for TcpInboundStream {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        loop {
            match read_message(&mut self.stream).await? {
                Some(SyncMessage::Payload { content }) => return Ok(Some(content)),
                Some(SyncMessage::SessionClosed { reason }) => {
                    info!(%reason, "master closed the session");
                    self.close_reason = Some(reason);
                    return Ok(None);
                }
                Some(other) => debug!("ignoring {} on session stream", other.name()),
                None => return Ok(None),
            }
        }
    }
}
