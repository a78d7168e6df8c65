//! Application layer of the relay.
//!
//! Nothing in here opens a socket.  The registries and the relay service
//! depend only on the [`connection_registry::PayloadSink`] abstraction, so the
//! TCP server in `infrastructure` and the in-process tests drive exactly the
//! same code.
//!
//! # Sub-modules
//!
//! - **`membership`** – Which slave addresses are known to be alive, with a
//!   TTL per address.  Purely advisory; used for diagnostics.
//!
//! - **`connection_registry`** – The live session streams, one per address,
//!   and the broadcast that fans a payload out to all of them except the
//!   originator.
//!
//! - **`relay_session`** – The `Register` / `Report` / `Ping` / `Info` call
//!   handlers that tie both registries together.

pub mod connection_registry;
pub mod membership;
pub mod relay_session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

/// Shortest period [`run_sweeper`] will tick at.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Runs `sweep` every `period` until `running` is cleared.
///
/// Shared by both registries' background loops.  A zero `period` is raised
/// to one millisecond.
pub(crate) async fn run_sweeper<F>(period: Duration, running: Arc<AtomicBool>, mut sweep: F)
where
    F: FnMut(),
{
    let mut ticker = interval(period.max(MIN_SWEEP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_sweeps_instead_of_panicking() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let sweeps = Arc::new(AtomicUsize::new(0));
        let task = {
            let running = Arc::clone(&running);
            let sweeps = Arc::clone(&sweeps);
            tokio::spawn(run_sweeper(Duration::ZERO, running, move || {
                sweeps.fetch_add(1, Ordering::Relaxed);
            }))
        };

        // Act
        tokio::time::sleep(Duration::from_millis(5)).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper must stop")
            .expect("sweeper must not panic");
        assert!(sweeps.load(Ordering::Relaxed) >= 1);
    }
}
