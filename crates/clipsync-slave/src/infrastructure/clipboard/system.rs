//! OS clipboard adapter backed by `arboard`.
//!
//! # Why a dedicated thread? (for beginners)
//!
//! `arboard::Clipboard` is a blocking, platform handle: on X11 it owns a
//! connection and a serving thread, on Windows it must not be hammered from
//! many threads at once.  The adapter therefore gives the handle to a single
//! OS thread that does everything with it:
//!
//! ```text
//!            ┌──────────── clipboard thread ────────────┐
//! write() ──►│ command ─► set_text ─► last_seen = text  │
//!            │                                          │
//!            │ every poll interval:                     │
//!            │   get_text != last_seen ─► emit change ──┼──► watch()
//!            └──────────────────────────────────────────┘
//! ```
//!
//! Because a write updates `last_seen` on the same thread that polls, the
//! next poll sees no difference and the write is never echoed as a change.
//! Content already on the clipboard at startup is treated as seen.

use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use arboard::Clipboard;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::application::clipboard::{closed_watch, ClipboardCapability, ClipboardError};

/// Default clipboard poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Changes buffered for a slow consumer before new ones are dropped.
const CHANGE_BUFFER: usize = 32;

enum Command {
    Write {
        text: String,
        reply: oneshot::Sender<Result<(), ClipboardError>>,
    },
}

/// The OS text clipboard.
pub struct SystemClipboard {
    commands: std_mpsc::Sender<Command>,
    changes: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl SystemClipboard {
    /// Opens the OS clipboard and starts the polling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ClipboardError::Unavailable`] if the clipboard cannot be
    /// opened (for example, no display server) or the thread cannot start.
    pub fn start(poll_interval: Duration) -> Result<Self, ClipboardError> {
        let (commands, command_rx) = std_mpsc::channel();
        let (change_tx, changes) = mpsc::channel(CHANGE_BUFFER);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("clipsync-clipboard".into())
            .spawn(move || clipboard_thread(command_rx, change_tx, poll_interval, ready_tx))
            .map_err(|e| ClipboardError::Unavailable(format!("cannot spawn thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| ClipboardError::WorkerStopped)??;
        info!("system clipboard ready (polling every {poll_interval:?})");

        Ok(Self {
            commands,
            changes: Mutex::new(Some(changes)),
        })
    }
}

#[async_trait]
impl ClipboardCapability for SystemClipboard {
    async fn write(&self, content: &[u8]) -> Result<(), ClipboardError> {
        let text = String::from_utf8(content.to_vec()).map_err(|_| ClipboardError::NotText)?;
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Write { text, reply })
            .map_err(|_| ClipboardError::WorkerStopped)?;
        reply_rx.await.map_err(|_| ClipboardError::WorkerStopped)?
    }

    fn watch(&self) -> mpsc::Receiver<Vec<u8>> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(closed_watch)
    }
}

/// The two blocking clipboard calls the polling thread needs.
trait TextBoard {
    /// Current text, or `None` for non-text content and transient errors.
    fn read_text(&mut self) -> Option<String>;

    fn write_text(&mut self, text: String) -> Result<(), ClipboardError>;
}

impl TextBoard for Clipboard {
    fn read_text(&mut self) -> Option<String> {
        self.get_text().ok()
    }

    fn write_text(&mut self, text: String) -> Result<(), ClipboardError> {
        self.set_text(text)
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

fn clipboard_thread(
    commands: std_mpsc::Receiver<Command>,
    changes: mpsc::Sender<Vec<u8>>,
    poll_interval: Duration,
    ready: std_mpsc::Sender<Result<(), ClipboardError>>,
) {
    let mut clipboard = match Clipboard::new() {
        Ok(clipboard) => clipboard,
        Err(e) => {
            let _ = ready.send(Err(ClipboardError::Unavailable(e.to_string())));
            return;
        }
    };
    let last_seen = clipboard.read_text();
    let _ = ready.send(Ok(()));

    serve(clipboard, last_seen, &commands, &changes, poll_interval);
    debug!("clipboard thread stopped");
}

/// Applies write commands and polls for changes until `commands` disconnects.
///
/// Polls run on a fixed schedule: a steady stream of writes delays a poll
/// by at most one write, never indefinitely.
fn serve<B: TextBoard>(
    mut board: B,
    mut last_seen: Option<String>,
    commands: &std_mpsc::Receiver<Command>,
    changes: &mpsc::Sender<Vec<u8>>,
    poll_interval: Duration,
) {
    let mut next_poll = Instant::now() + poll_interval;
    loop {
        match commands.recv_timeout(next_poll.saturating_duration_since(Instant::now())) {
            Ok(Command::Write { text, reply }) => {
                let result = board.write_text(text.clone());
                if result.is_ok() {
                    last_seen = Some(text);
                }
                let _ = reply.send(result);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now() < next_poll {
            continue;
        }
        next_poll = Instant::now() + poll_interval;
        let Some(current) = board.read_text() else {
            continue;
        };
        if last_seen.as_deref() == Some(current.as_str()) {
            continue;
        }
        debug!(bytes = current.len(), "local clipboard changed");
        if changes.try_send(current.clone().into_bytes()).is_err() {
            warn!("clipboard change dropped: watcher is slow or gone");
        }
        last_seen = Some(current);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
