//! TCP relay server.
//!
//! # Connection kinds (for beginners)
//!
//! Every accepted connection is classified by its first frame:
//!
//! ```text
//! first frame = Register ──► session stream
//!     master ─ Payload ─► Payload ─► … ─► SessionClosed(reason) ─► FIN
//!
//! first frame = anything else ──► unary call channel
//!     slave ─ Report ─► master ─ Ack ─►
//!     slave ─ Ping   ─► master ─ Ack ─►
//!     slave ─ Info   ─► master ─ InfoReply ─►
//! ```
//!
//! A session stream carries no further frames from the slave; the master
//! only watches its read half for EOF, which means the slave went away.
//!
//! # Threading model
//!
//! One Tokio task per accepted connection.  The accept loop polls a shared
//! `running` flag every 200 ms so it can stop without being woken by a
//! connection.

use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use clipsync_core::protocol::{ErrorCode, ErrorMessage, SequenceCounter};
use clipsync_core::{read_message, write_message, CloseReason, FrameError, SyncMessage};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::connection_registry::{PayloadSink, SinkError};
use crate::application::relay_session::RelayService;

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors from setting up the relay listener.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The listen address could not be bound (in use, no permission, …).
    #[error("failed to bind relay listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The bound socket did not report its local address.
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}

// ── Outbound session sink ─────────────────────────────────────────────────────

/// [`PayloadSink`] writing `Payload` frames to the write half of a session
/// stream.
#[derive(Debug)]
pub struct TcpPayloadSink {
    writer: Mutex<OwnedWriteHalf>,
    sequence: SequenceCounter,
    send_timeout: Duration,
}

impl TcpPayloadSink {
    pub fn new(writer: OwnedWriteHalf, send_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            sequence: SequenceCounter::new(),
            send_timeout,
        }
    }

    /// Best-effort `SessionClosed` frame followed by a write shutdown.
    pub async fn finish(&self, reason: CloseReason) {
        let mut writer = self.writer.lock().await;
        let frame = SyncMessage::SessionClosed { reason };
        match timeout(
            self.send_timeout,
            write_message(&mut *writer, &frame, self.sequence.next()),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "could not send SessionClosed"),
            Err(_) => debug!("SessionClosed write timed out"),
        }
        let _ = writer.shutdown().await;
    }
}

#[async_trait]
impl PayloadSink for TcpPayloadSink {
    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        let frame = SyncMessage::Payload {
            content: payload.to_vec(),
        };
        let mut writer = self.writer.lock().await;
        timeout(
            self.send_timeout,
            write_message(&mut *writer, &frame, self.sequence.next()),
        )
        .await
        .map_err(|_| SinkError::Timeout(self.send_timeout))??;
        Ok(())
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A bound relay listener.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<RelayService>,
    send_timeout: Duration,
}

impl RelayServer {
    /// Binds the relay listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        relay: Arc<RelayService>,
        send_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        Ok(Self {
            listener,
            relay,
            send_timeout,
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::LocalAddr)
    }

    /// Accepts connections until `running` is cleared.
    ///
    /// Connection tasks that are already running are not awaited; they end
    /// when their session closes (see `RelayService::shutdown`) or their
    /// peer disconnects.
    pub async fn run(self, running: Arc<AtomicBool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!("relay listening on {addr}"),
            Err(_) => info!("relay listening"),
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("accepted connection from {peer_addr}");
                    let relay = Arc::clone(&self.relay);
                    let send_timeout = self.send_timeout;
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, relay, send_timeout).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {
                    // No connection in the last poll interval.
                }
            }
        }
    }
}

// ── Per-connection handling ───────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<RelayService>,
    send_timeout: Duration,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let first = match read_message(&mut reader).await {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            debug!("{peer_addr} closed before sending a frame");
            return;
        }
        Err(e) => {
            warn!("{peer_addr}: unreadable first frame: {e}");
            reply_malformed(&mut writer, &e, 0).await;
            return;
        }
    };

    match first {
        SyncMessage::Register { address } => {
            serve_session(address, peer_addr, reader, writer, relay, send_timeout).await
        }
        call => serve_calls(call, peer_addr, reader, writer, relay).await,
    }
}

/// Runs one registration: the call stays open until the session ends.
async fn serve_session(
    address: String,
    peer_addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    relay: Arc<RelayService>,
    send_timeout: Duration,
) {
    info!(%address, "{peer_addr} registered");
    let sink = Arc::new(TcpPayloadSink::new(writer, send_timeout));

    let reason = relay
        .register(
            &address,
            Arc::clone(&sink) as Arc<dyn PayloadSink>,
            wait_for_eof(reader),
        )
        .await;

    if reason != CloseReason::Disconnected {
        sink.finish(reason).await;
    }
    info!(%address, %reason, "{peer_addr} session ended");
}

/// Completes when the peer closes its side of the stream.
async fn wait_for_eof(mut reader: OwnedReadHalf) {
    let mut scratch = [0u8; 256];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                // Slaves send nothing after `Register`; ignore stray bytes.
            }
        }
    }
}

/// Serves sequential unary calls until the peer closes the channel.
async fn serve_calls(
    first: SyncMessage,
    peer_addr: SocketAddr,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    relay: Arc<RelayService>,
) {
    let sequence = SequenceCounter::new();
    let mut pending = Some(first);

    loop {
        let call = match pending.take() {
            Some(call) => call,
            None => match read_message(&mut reader).await {
                Ok(Some(call)) => call,
                Ok(None) => break,
                Err(e) => {
                    warn!("{peer_addr}: bad call frame: {e}");
                    reply_malformed(&mut writer, &e, sequence.next()).await;
                    break;
                }
            },
        };

        let reply = dispatch_call(&relay, call).await;
        if let Err(e) = write_message(&mut writer, &reply, sequence.next()).await {
            debug!("{peer_addr}: reply failed: {e}");
            break;
        }
    }
    debug!("{peer_addr}: call channel closed");
}

async fn dispatch_call(relay: &RelayService, call: SyncMessage) -> SyncMessage {
    match call {
        SyncMessage::Report(report) => {
            relay.report(report.content, &report.address).await;
            SyncMessage::Ack
        }
        SyncMessage::Ping { address } => {
            relay.ping(&address);
            SyncMessage::Ack
        }
        SyncMessage::Info => SyncMessage::InfoReply(relay.info().into()),
        SyncMessage::Register { .. } => unexpected("Register must open its own connection"),
        other => unexpected(&format!("{} is not a call", other.name())),
    }
}

fn unexpected(description: &str) -> SyncMessage {
    SyncMessage::Error(ErrorMessage {
        code: ErrorCode::UnexpectedMessage,
        description: description.to_string(),
    })
}

async fn reply_malformed(writer: &mut OwnedWriteHalf, error: &FrameError, seq: u64) {
    if !matches!(error, FrameError::Protocol(_)) {
        return;
    }
    let reply = SyncMessage::Error(ErrorMessage {
        code: ErrorCode::Malformed,
        description: error.to_string(),
    });
    let _ = write_message(writer, &reply, seq).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection_registry::ConnectionRegistry;
    use crate::application::membership::MembershipRegistry;
    use clipsync_core::protocol::ReportMessage;

    fn relay() -> Arc<RelayService> {
        RelayService::start(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(MembershipRegistry::default()),
        )
    }

    #[tokio::test]
    async fn test_dispatch_acks_report_and_ping() {
        let relay = relay();

        let report = dispatch_call(
            &relay,
            SyncMessage::Report(ReportMessage {
                address: "a:1".into(),
                content: b"x".to_vec(),
            }),
        )
        .await;
        let ping = dispatch_call(
            &relay,
            SyncMessage::Ping {
                address: "a:1".into(),
            },
        )
        .await;

        assert_eq!(report, SyncMessage::Ack);
        assert_eq!(ping, SyncMessage::Ack);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_non_calls() {
        let relay = relay();

        let reply = dispatch_call(&relay, SyncMessage::Ack).await;

        match reply {
            SyncMessage::Error(e) => {
                assert_eq!(e.code, ErrorCode::UnexpectedMessage);
                assert!(e.description.contains("Ack"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        // Arrange – occupy a port
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        // Act
        let result = RelayServer::bind(addr, relay(), Duration::from_secs(1)).await;

        // Assert
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, NetworkError::BindFailed { .. }));
    }
}
