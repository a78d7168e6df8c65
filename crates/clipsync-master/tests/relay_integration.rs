//! Integration tests for the relay server over real TCP sockets.
//!
//! # Purpose
//!
//! These tests speak the wire protocol directly, as a slave would, against a
//! `RelayServer` bound to `127.0.0.1:0`.  They verify:
//!
//! - Fan-out: a report from A reaches B's session stream and never A's.
//! - Replacement: a second `Register` from the same address ends the first
//!   stream with `SessionClosed(Replaced)`.
//! - Disconnect: closing a session socket removes the session.
//! - Unary calls: `Ping` for an unknown address is acknowledged, `Info`
//!   reflects the registries, non-call frames are rejected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clipsync_core::protocol::{ErrorCode, ReportMessage};
use clipsync_core::{read_message, write_message, CloseReason, SyncMessage};
use clipsync_master::application::connection_registry::ConnectionRegistry;
use clipsync_master::application::membership::MembershipRegistry;
use clipsync_master::application::relay_session::RelayService;
use clipsync_master::infrastructure::network::RelayServer;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const STEP: Duration = Duration::from_secs(2);

struct Harness {
    addr: SocketAddr,
    relay: Arc<RelayService>,
    running: Arc<AtomicBool>,
}

impl Harness {
    async fn start() -> Self {
        let relay = RelayService::start(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(MembershipRegistry::default()),
        );
        let server = RelayServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&relay),
            Duration::from_secs(1),
        )
        .await
        .expect("bind");
        let addr = server.local_addr().expect("local addr");
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(server.run(Arc::clone(&running)));
        Self {
            addr,
            relay,
            running,
        }
    }

    async fn register(&self, address: &str) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        write_message(
            &mut stream,
            &SyncMessage::Register {
                address: address.into(),
            },
            0,
        )
        .await
        .expect("send Register");
        stream
    }

    async fn call(&self, msg: SyncMessage) -> SyncMessage {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        write_message(&mut stream, &msg, 0).await.expect("send call");
        timeout(STEP, read_message(&mut stream))
            .await
            .expect("reply in time")
            .expect("readable reply")
            .expect("reply before EOF")
    }

    async fn wait_until(&self, what: &str, cond: impl Fn(&RelayService) -> bool) {
        timeout(STEP, async {
            while !cond(&self.relay) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn test_report_fans_out_to_other_slave_only() {
    // Arrange
    let h = Harness::start().await;
    let mut a = h.register("10.0.0.1:7000").await;
    let mut b = h.register("10.0.0.2:7000").await;
    h.wait_until("two sessions", |r| r.connections().len() == 2).await;

    // Act
    let reply = h
        .call(SyncMessage::Report(ReportMessage {
            address: "10.0.0.1:7000".into(),
            content: b"hello".to_vec(),
        }))
        .await;

    // Assert
    assert_eq!(reply, SyncMessage::Ack);
    let got = timeout(STEP, read_message(&mut b)).await.unwrap().unwrap();
    assert_eq!(
        got,
        Some(SyncMessage::Payload {
            content: b"hello".to_vec()
        })
    );
    assert!(
        timeout(Duration::from_millis(200), read_message(&mut a))
            .await
            .is_err(),
        "originator must not receive its own report"
    );
}

#[tokio::test]
async fn test_second_register_replaces_first_stream() {
    // Arrange
    let h = Harness::start().await;
    let mut first = h.register("10.0.0.1:7000").await;
    h.wait_until("first session", |r| r.connections().len() == 1).await;

    // Act
    let _second = h.register("10.0.0.1:7000").await;

    // Assert – the old stream is told why, then closed
    let closed = timeout(STEP, read_message(&mut first)).await.unwrap().unwrap();
    assert_eq!(
        closed,
        Some(SyncMessage::SessionClosed {
            reason: CloseReason::Replaced
        })
    );
    let eof = timeout(STEP, read_message(&mut first)).await.unwrap().unwrap();
    assert_eq!(eof, None);
    assert_eq!(h.relay.connections().len(), 1);
}

#[tokio::test]
async fn test_closing_session_socket_removes_session() {
    let h = Harness::start().await;
    let stream = h.register("10.0.0.1:7000").await;
    h.wait_until("session", |r| r.connections().len() == 1).await;

    drop(stream);

    h.wait_until("session removal", |r| r.connections().is_empty())
        .await;
    assert!(h.relay.membership().contains("10.0.0.1:7000"));
}

#[tokio::test]
async fn test_ping_unknown_address_is_acknowledged() {
    let h = Harness::start().await;

    let reply = h
        .call(SyncMessage::Ping {
            address: "ghost:1".into(),
        })
        .await;

    assert_eq!(reply, SyncMessage::Ack);
    assert!(h.relay.connections().is_empty());
}

#[tokio::test]
async fn test_info_reports_live_sessions() {
    // Arrange
    let h = Harness::start().await;
    let _a = h.register("10.0.0.1:7000").await;
    h.wait_until("session", |r| r.connections().len() == 1).await;

    // Act
    let reply = h.call(SyncMessage::Info).await;

    // Assert
    match reply {
        SyncMessage::InfoReply(info) => {
            assert_eq!(info.sessions, vec!["10.0.0.1:7000".to_string()]);
            assert_eq!(info.peers.len(), 1);
            assert_eq!(info.peers[0].ttl_secs, 180);
        }
        other => panic!("expected InfoReply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unary_channel_serves_sequential_calls() {
    // Arrange
    let h = Harness::start().await;
    let mut channel = TcpStream::connect(h.addr).await.unwrap();

    // Act / Assert – several calls over one connection, in order
    for seq in 0..3u64 {
        write_message(
            &mut channel,
            &SyncMessage::Ping {
                address: "a:1".into(),
            },
            seq,
        )
        .await
        .unwrap();
        let reply = timeout(STEP, read_message(&mut channel)).await.unwrap().unwrap();
        assert_eq!(reply, Some(SyncMessage::Ack));
    }

    write_message(&mut channel, &SyncMessage::Ack, 3).await.unwrap();
    let reply = timeout(STEP, read_message(&mut channel)).await.unwrap().unwrap();
    assert!(matches!(
        reply,
        Some(SyncMessage::Error(ref e)) if e.code == ErrorCode::UnexpectedMessage
    ));
}

#[tokio::test]
async fn test_shutdown_closes_session_streams() {
    let h = Harness::start().await;
    let mut a = h.register("10.0.0.1:7000").await;
    h.wait_until("session", |r| r.connections().len() == 1).await;

    h.relay.shutdown();

    let closed = timeout(STEP, read_message(&mut a)).await.unwrap().unwrap();
    assert_eq!(
        closed,
        Some(SyncMessage::SessionClosed {
            reason: CloseReason::Shutdown
        })
    );
}
