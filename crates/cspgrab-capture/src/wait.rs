//! Sleep-then-recheck polling, the only way to wait on the producer.
//!
//! The shared table offers no event or lock, so both waits in the protocol
//! (a source being published, a frame request being acknowledged) are polls.
//! [`Poller`] bounds them with an optional deadline and a cancellation token
//! that another thread may trigger.

use std::thread;
use std::time::{Duration, Instant};

use cspgrab_core::CaptureError;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct Poller {
    waiting_for: &'static str,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Poller {
    /// Unbounded poller; `waiting_for` names the condition in errors and logs.
    pub fn new(waiting_for: &'static str, interval: Duration) -> Self {
        Self { waiting_for, interval, timeout: None, cancel: CancellationToken::new() }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Call `ready` until it returns `true`, sleeping `interval` between calls.
    ///
    /// `ready` runs once before any sleep, so an already-satisfied condition
    /// returns immediately. Returns the number of sleeps performed.
    pub fn poll_until<F>(&self, mut ready: F) -> Result<u64, CaptureError>
    where
        F: FnMut() -> bool,
    {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let mut sleeps = 0u64;

        loop {
            if ready() {
                if sleeps > 0 {
                    trace!(waiting_for = self.waiting_for, sleeps, "poll satisfied");
                }
                return Ok(sleeps);
            }
            if self.cancel.is_cancelled() {
                return Err(CaptureError::Cancelled { waiting_for: self.waiting_for });
            }

            let mut nap = self.interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CaptureError::Timeout {
                        waiting_for: self.waiting_for,
                        ms: started.elapsed().as_millis() as u64,
                    });
                }
                nap = nap.min(deadline - now);
            }

            thread::sleep(nap);
            sleeps += 1;
        }
    }
}
