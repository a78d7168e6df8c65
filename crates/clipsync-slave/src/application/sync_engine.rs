//! SyncEngine: keeps the local clipboard in sync through the master.
//!
//! # One session, two loops (for beginners)
//!
//! After registering, a session runs two loops side by side:
//!
//! ```text
//!            ┌──────────── receive loop ─────────────┐
//! master ───►│ inbound payload ─► clipboard.write    │
//!            └───────────────────┬───────────────────┘
//!                                │ "session ended" (either direction)
//!            ┌───────────────────┴───────────────────┐
//! clipboard ►│ change ─► report   tick ─► ping        │───► master
//!            └──────────── send loop ────────────────┘
//! ```
//!
//! When either loop stops (the master closed the stream, a read failed, the
//! engine was stopped) it raises a per-session signal so the other loop stops
//! too.  [`SyncEngine::start`] returns once both have finished, and
//! [`SyncEngine::run`] decides whether to register again.
//!
//! # Stopping
//!
//! [`SyncEngine::stop`] flips `active` and publishes `true` on a `watch`
//! channel that both loops (and the reconnect back-off) select on.  It can be
//! called any number of times, from any task, before or during a session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::clipboard::ClipboardCapability;
use crate::application::master_link::{InboundStream, LinkError, MasterLink};

/// Default heartbeat period.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest heartbeat period; a zero `ping_interval` is raised to this.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Default pause between a session ending and the next registration.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Errors that end the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Registration with the master failed.
    #[error("registration with master failed: {0}")]
    Register(#[source] LinkError),

    /// The local clipboard change stream closed; it cannot be reopened.
    #[error("local clipboard watch stream closed")]
    WatchClosed,
}

/// Why one session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// [`SyncEngine::stop`] was called.
    Stopped,
    /// The master ended the session stream.
    StreamEnded,
    /// Reading from the session stream failed.
    StreamFailed,
    /// The local clipboard change stream closed.
    WatchClosed,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// The address this slave registers under.
    pub advertise_address: String,
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
}

impl SyncConfig {
    /// Settings with default timings for `advertise_address`.
    pub fn new(advertise_address: impl Into<String>) -> Self {
        Self {
            advertise_address: advertise_address.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Slave-side synchronization engine.
pub struct SyncEngine {
    config: SyncConfig,
    link: Arc<dyn MasterLink>,
    clipboard: Arc<dyn ClipboardCapability>,
    active: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        link: Arc<dyn MasterLink>,
        clipboard: Arc<dyn ClipboardCapability>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            link,
            clipboard,
            active: AtomicBool::new(true),
            shutdown,
        }
    }

    /// `false` once [`stop`](Self::stop) has been called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the engine.  Idempotent; safe before any session started.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("sync engine stopping");
            self.shutdown.send_replace(true);
        }
    }

    /// Runs sessions until stopped.
    ///
    /// Takes the clipboard's change stream once and reuses it across
    /// sessions.  The first registration failure is returned; once a session
    /// has been established, later failures are logged and retried after
    /// `reconnect_interval`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Register`] if the very first registration fails,
    /// [`SyncError::WatchClosed`] if the clipboard stops producing changes.
    pub async fn run(&self) -> Result<(), SyncError> {
        let mut changes = self.clipboard.watch();
        let mut established_once = false;

        loop {
            match self.start(&mut changes).await {
                Ok(SessionEnd::Stopped) => return Ok(()),
                Ok(SessionEnd::WatchClosed) => return Err(SyncError::WatchClosed),
                Ok(end) => {
                    established_once = true;
                    info!(
                        ?end,
                        "session ended; re-registering in {:?}", self.config.reconnect_interval
                    );
                }
                Err(e) if !established_once => return Err(e),
                Err(e) => warn!(error = %e, "re-registration failed; will retry"),
            }

            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                _ = sleep(self.config.reconnect_interval) => {}
                _ = raised(&mut shutdown) => return Ok(()),
            }
        }
    }

    /// Registers and runs one session until it ends.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Register`] if registration fails.  Everything
    /// that goes wrong after registration ends the session instead and is
    /// reported as a [`SessionEnd`].
    pub async fn start(
        &self,
        changes: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<SessionEnd, SyncError> {
        if !self.is_active() {
            return Ok(SessionEnd::Stopped);
        }

        let address = self.config.advertise_address.as_str();
        let mut inbound = self
            .link
            .register(address)
            .await
            .map_err(SyncError::Register)?;
        info!(%address, "registered with master");

        let (ended, _) = watch::channel(false);
        let (received, sent) = tokio::join!(
            self.receive_loop(inbound.as_mut(), &ended),
            self.send_loop(changes, &ended),
        );

        Ok(received.or(sent).unwrap_or(SessionEnd::Stopped))
    }

    /// Applies inbound payloads until the stream ends or the session is over.
    ///
    /// Returns `Some` when this loop decided the session's end.
    async fn receive_loop(
        &self,
        inbound: &mut dyn InboundStream,
        ended: &watch::Sender<bool>,
    ) -> Option<SessionEnd> {
        let mut shutdown = self.shutdown.subscribe();
        let mut session = ended.subscribe();

        let end = loop {
            tokio::select! {
                _ = raised(&mut shutdown) => break Some(SessionEnd::Stopped),
                _ = raised(&mut session) => break None,
                next = inbound.next_payload() => match next {
                    Ok(Some(content)) => {
                        debug!(bytes = content.len(), "applying payload from master");
                        if let Err(e) = self.clipboard.write(&content).await {
                            warn!(error = %e, "failed to apply payload to clipboard");
                        }
                    }
                    Ok(None) => {
                        info!("master ended the session stream");
                        break Some(SessionEnd::StreamEnded);
                    }
                    Err(e) => {
                        warn!(error = %e, "session stream read failed");
                        break Some(SessionEnd::StreamFailed);
                    }
                },
            }
        };

        ended.send_replace(true);
        end
    }

    /// Reports local changes and sends heartbeats until the session is over.
    ///
    /// Returns `Some` when this loop decided the session's end.
    async fn send_loop(
        &self,
        changes: &mut mpsc::Receiver<Vec<u8>>,
        ended: &watch::Sender<bool>,
    ) -> Option<SessionEnd> {
        let address = self.config.advertise_address.as_str();
        let mut shutdown = self.shutdown.subscribe();
        let mut session = ended.subscribe();
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;
                _ = raised(&mut shutdown) => break Some(SessionEnd::Stopped),
                _ = raised(&mut session) => break None,
                change = changes.recv() => match change {
                    Some(content) => match self.link.report(&content, address).await {
                        Ok(()) => debug!(bytes = content.len(), "reported local change"),
                        Err(e) => warn!(error = %e, "report failed; change dropped"),
                    },
                    None => {
                        warn!("clipboard watch stream closed");
                        break Some(SessionEnd::WatchClosed);
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = self.link.ping(address).await {
                        warn!(error = %e, "ping failed");
                    }
                }
            }
        };

        ended.send_replace(true);
        end
    }
}

/// Completes once the watched flag is `true`.
async fn raised(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|raised| *raised).await.is_err() {
        // Sender dropped without raising: never complete.
        std::future::pending::<()>().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clipboard::{ClipboardError, MockClipboardCapability};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::timeout;

    const ADDR: &str = "10.0.0.2:7000";
    const STEP: Duration = Duration::from_secs(2);

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Inbound stream fed from a channel; closing the sender ends the stream.
    struct ChannelInbound {
        rx: mpsc::UnboundedReceiver<Result<Vec<u8>, LinkError>>,
    }

    #[async_trait]
    impl InboundStream for ChannelInbound {
        async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            match self.rx.recv().await {
                Some(item) => item.map(Some),
                None => Ok(None),
            }
        }
    }

    /// Records calls; hands out scripted registration results in order.
    #[derive(Default)]
    struct RecordingLink {
        sessions: Mutex<VecDeque<Result<ChannelInbound, LinkError>>>,
        registrations: Mutex<Vec<String>>,
        reports: Mutex<Vec<(Vec<u8>, String)>>,
        pings: Mutex<Vec<String>>,
    }

    impl RecordingLink {
        /// Queues a session and returns the handle that feeds it.
        fn push_session(&self) -> mpsc::UnboundedSender<Result<Vec<u8>, LinkError>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions
                .lock()
                .unwrap()
                .push_back(Ok(ChannelInbound { rx }));
            tx
        }

        fn push_failure(&self) {
            self.sessions
                .lock()
                .unwrap()
                .push_back(Err(LinkError::Closed));
        }

        fn registrations(&self) -> usize {
            self.registrations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MasterLink for RecordingLink {
        async fn register(&self, address: &str) -> Result<Box<dyn InboundStream>, LinkError> {
            self.registrations.lock().unwrap().push(address.to_string());
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(Ok(inbound)) => Ok(Box::new(inbound)),
                Some(Err(e)) => Err(e),
                None => Err(LinkError::Closed),
            }
        }

        async fn report(&self, content: &[u8], address: &str) -> Result<(), LinkError> {
            self.reports
                .lock()
                .unwrap()
                .push((content.to_vec(), address.to_string()));
            Ok(())
        }

        async fn ping(&self, address: &str) -> Result<(), LinkError> {
            self.pings.lock().unwrap().push(address.to_string());
            Ok(())
        }
    }

    /// A clipboard mock whose writes land on a channel.
    fn recording_clipboard() -> (MockClipboardCapability, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clipboard = MockClipboardCapability::new();
        clipboard.expect_write().returning(move |content| {
            let _ = tx.send(content.to_vec());
            Ok(())
        });
        (clipboard, rx)
    }

    fn engine(
        link: Arc<RecordingLink>,
        clipboard: MockClipboardCapability,
        ping_interval: Duration,
    ) -> Arc<SyncEngine> {
        let config = SyncConfig {
            advertise_address: ADDR.to_string(),
            ping_interval,
            reconnect_interval: Duration::from_millis(10),
        };
        Arc::new(SyncEngine::new(config, link, Arc::new(clipboard)))
    }

    // ── Receive loop ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_inbound_payload_is_written_to_clipboard() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let feed = link.push_session();
        let (clipboard, mut written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);

        // Act
        let session = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start(&mut changes).await })
        };
        feed.send(Ok(b"hello".to_vec())).unwrap();

        // Assert
        let got = timeout(STEP, written.recv()).await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
        assert_eq!(
            link.registrations.lock().unwrap().as_slice(),
            &[ADDR.to_string()]
        );

        engine.stop();
        let end = timeout(STEP, session).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::Stopped);
    }

    #[tokio::test]
    async fn test_stream_end_ends_session_and_stops_send_loop() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);

        // Act – the master closes the stream
        drop(feed);
        let end = timeout(STEP, engine.start(&mut changes)).await;

        // Assert – both loops returned, no deadlock
        assert_eq!(end.unwrap().unwrap(), SessionEnd::StreamEnded);
    }

    #[tokio::test]
    async fn test_read_failure_ends_session() {
        let link = Arc::new(RecordingLink::default());
        let feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);

        feed.send(Err(LinkError::Timeout(Duration::from_secs(1))))
            .unwrap();
        let end = timeout(STEP, engine.start(&mut changes)).await;

        assert_eq!(end.unwrap().unwrap(), SessionEnd::StreamFailed);
    }

    #[tokio::test]
    async fn test_clipboard_write_failure_keeps_session_alive() {
        // Arrange – the first write fails, the second succeeds
        let link = Arc::new(RecordingLink::default());
        let feed = link.push_session();
        let (ok_tx, mut ok_rx) = mpsc::unbounded_channel();
        let mut clipboard = MockClipboardCapability::new();
        let mut seq = mockall::Sequence::new();
        clipboard
            .expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ClipboardError::NotText));
        clipboard
            .expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |content| {
                let _ = ok_tx.send(content.to_vec());
                Ok(())
            });
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);
        let session = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start(&mut changes).await })
        };

        // Act
        feed.send(Ok(vec![0xFF])).unwrap();
        feed.send(Ok(b"second".to_vec())).unwrap();

        // Assert
        let got = timeout(STEP, ok_rx.recv()).await.unwrap();
        assert_eq!(got, Some(b"second".to_vec()));
        engine.stop();
        timeout(STEP, session).await.unwrap().unwrap().unwrap();
    }

    // ── Send loop ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_local_change_is_reported_with_advertised_address() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let _feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (changes_tx, mut changes) = mpsc::channel(4);
        let session = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start(&mut changes).await })
        };

        // Act
        changes_tx.send(b"copied".to_vec()).await.unwrap();
        timeout(STEP, async {
            while link.reports.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("report must be sent");

        // Assert
        assert_eq!(
            link.reports.lock().unwrap().as_slice(),
            &[(b"copied".to_vec(), ADDR.to_string())]
        );
        engine.stop();
        timeout(STEP, session).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_every_interval() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let _feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(30));
        let (_changes_tx, mut changes) = mpsc::channel(4);
        let session = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start(&mut changes).await })
        };

        // Act – no ping before the first period, one per period after
        tokio::time::sleep(Duration::from_secs(29)).await;
        let before = link.pings.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(62)).await;
        let after = link.pings.lock().unwrap().len();

        // Assert
        assert_eq!(before, 0);
        assert_eq!(after, 3);
        assert!(link.pings.lock().unwrap().iter().all(|a| a == ADDR));
        engine.stop();
        session.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ping_interval_still_pings() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let _feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::ZERO);
        let (_changes_tx, mut changes) = mpsc::channel(4);
        let session = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start(&mut changes).await })
        };

        // Act
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.stop();

        // Assert – the session ran and ended normally
        let end = session.await.expect("send loop must not panic").unwrap();
        assert_eq!(end, SessionEnd::Stopped);
        assert!(!link.pings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_watch_stream_ends_session() {
        let link = Arc::new(RecordingLink::default());
        let _feed = link.push_session();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (changes_tx, mut changes) = mpsc::channel(4);

        drop(changes_tx);
        let end = timeout(STEP, engine.start(&mut changes)).await;

        assert_eq!(end.unwrap().unwrap(), SessionEnd::WatchClosed);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_returns_registration_error() {
        let link = Arc::new(RecordingLink::default());
        link.push_failure();
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);

        let result = engine.start(&mut changes).await;

        assert!(matches!(result, Err(SyncError::Register(LinkError::Closed))));
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_registration() {
        let link = Arc::new(RecordingLink::default());
        let (clipboard, _written) = recording_clipboard();
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let (_changes_tx, mut changes) = mpsc::channel(4);

        engine.stop();
        engine.stop();
        let end = engine.start(&mut changes).await.unwrap();

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(link.registrations(), 0);
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_first_registration_error() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        link.push_failure();
        let (mut clipboard, _written) = recording_clipboard();
        let (_changes_tx, changes) = mpsc::channel(4);
        clipboard.expect_watch().times(1).return_once(move || changes);
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));

        // Act
        let result = timeout(STEP, engine.run()).await.unwrap();

        // Assert
        assert!(matches!(result, Err(SyncError::Register(_))));
        assert_eq!(link.registrations(), 1);
    }

    #[tokio::test]
    async fn test_run_reregisters_after_stream_ends_and_retries_failures() {
        // Arrange – session 1 ends, registration 2 fails, session 3 stays up
        let link = Arc::new(RecordingLink::default());
        let first = link.push_session();
        link.push_failure();
        let _third = link.push_session();
        let (mut clipboard, _written) = recording_clipboard();
        let (_changes_tx, changes) = mpsc::channel(4);
        clipboard.expect_watch().times(1).return_once(move || changes);
        let engine = engine(Arc::clone(&link), clipboard, Duration::from_secs(60));
        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run().await })
        };

        // Act
        drop(first);
        timeout(STEP, async {
            while link.registrations() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine must re-register");
        engine.stop();

        // Assert
        let result = timeout(STEP, runner).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(link.registrations(), 3);
    }
}
