//! Single-timer adaptive poll scheduling.
//!
//! The controller holds at most one pending deadline. Arming while armed
//! replaces the deadline, so no code path can leave two polls queued.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PollController {
    interval: Duration,
    deadline: Option<Instant>,
    stopped: bool,
}

impl PollController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            stopped: false,
        }
    }

    /// Arm the timer with `interval`.
    pub fn start(&mut self, interval: Duration) {
        self.stopped = false;
        self.interval = interval;
        self.schedule();
    }

    /// Arm the timer one interval from now, replacing any pending deadline.
    pub fn schedule(&mut self) {
        if self.stopped {
            return;
        }
        self.deadline = Some(Instant::now() + self.interval);
    }

    /// Change the interval; a pending timer is re-armed with it.
    pub fn reschedule(&mut self, interval: Duration) {
        if interval != self.interval {
            debug!(
                from_ms = self.interval.as_millis() as u64,
                to_ms = interval.as_millis() as u64,
                "Poll interval changed"
            );
        }
        self.interval = interval;
        if self.deadline.is_some() {
            self.schedule();
        }
    }

    /// Consume the pending timer, if any. Called when a poll begins.
    pub fn disarm(&mut self) -> Option<Instant> {
        self.deadline.take()
    }

    /// Cancel for good. Idempotent.
    pub fn stop(&mut self) {
        if !self.stopped {
            debug!("Polling stopped");
        }
        self.deadline = None;
        self.stopped = true;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of armed timers: 0 or 1.
    pub fn pending(&self) -> usize {
        usize::from(self.deadline.is_some())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Resolve at `deadline`, or never when nothing is armed.
pub async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
