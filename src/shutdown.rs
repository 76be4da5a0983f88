//! Bounded drain of a background worker when the host is about to exit.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::worker::BackgroundWorker;

/// First, short wait before telling the user that deliveries are pending.
const INITIAL_WAIT: Duration = Duration::from_millis(100);

/// Outcome of a shutdown drain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    /// Approximate number of deliveries abandoned (queued or in flight).
    pub undelivered: usize,
    /// `true` when the drain gave up because the timeout elapsed.
    pub timed_out: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.undelivered == 0
    }
}

/// Exit hook bound to one worker.
///
/// Call [`ExitHook::fire`] once the application is done, typically as the
/// last statement of `main`. Firing twice is harmless; the second call
/// reports nothing.
#[derive(Debug)]
pub struct ExitHook {
    worker: BackgroundWorker,
    fired: AtomicBool,
}

impl ExitHook {
    pub(crate) fn new(worker: BackgroundWorker) -> Self {
        Self {
            worker,
            fired: AtomicBool::new(false),
        }
    }

    /// Stops the worker and waits, at most the configured shutdown timeout,
    /// for pending deliveries to finish.
    pub async fn fire(&self) -> ShutdownReport {
        if self.fired.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        let worker = &self.worker;
        if !worker.state().is_alive() {
            return ShutdownReport::default();
        }
        worker.begin_drain();

        let timeout = worker.config().shutdown_timeout;
        let deadline = Instant::now() + timeout;
        let queue = worker.queue();

        let initial = timeout.min(INITIAL_WAIT);
        if !queue.wait_drained(initial).await {
            let pending = queue.outstanding();
            eprintln!("Bitcaster is attempting to send {pending} pending notifications");
            eprintln!("Waiting up to {} seconds", timeout.as_secs_f64());
            warn!(
                pending,
                timeout_ms = timeout.as_millis() as u64,
                "waiting for pending deliveries before exit"
            );

            let remaining = deadline.saturating_duration_since(Instant::now());
            if !queue.wait_drained(remaining).await {
                let undelivered = queue.outstanding();
                eprintln!("Bitcaster gave up on {undelivered} undelivered notifications");
                warn!(undelivered, "shutdown timeout elapsed, abandoning deliveries");
                worker.abandon();
                return ShutdownReport {
                    undelivered,
                    timed_out: true,
                };
            }
        }

        // The stop marker trails the drained work; let the loop consume it.
        if timeout_at(deadline, worker.join()).await.is_err() {
            worker.abandon();
        }
        info!("pending deliveries flushed");
        ShutdownReport::default()
    }
}
