//! Backoff policies used by the deleter.
//!
//! Two delays are composed: a constant spacing between consecutive delete
//! requests, and a server-directed wait whenever the platform answers with a
//! flood-control signal. Both are tokio timers, so a sleeping run never blocks
//! other flows on the runtime.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Time left until the current slot opens.
    fn remaining(&self) -> Duration {
        self.next.saturating_duration_since(Instant::now())
    }

    /// Open the next slot one interval from now.
    fn arm(&mut self) {
        self.next = Instant::now() + self.interval;
    }
}

/// Whether a timer ran to completion or was interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

/// Constant spacing between requests plus server-directed flood waits.
#[derive(Debug)]
pub struct Pacer {
    limiter: IntervalLimiter,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            limiter: IntervalLimiter::new(interval),
        }
    }

    /// Wait for the next request slot.
    pub async fn ready(&mut self, cancel: &CancellationToken) -> Wait {
        let wait = self.limiter.remaining();
        sleep_or_cancel(wait, cancel).await
    }

    /// A request went through; the next one waits a full interval.
    ///
    /// Failed requests never arm the spacing, so the following one goes out
    /// right away.
    pub fn succeeded(&mut self) {
        self.limiter.arm();
    }

    /// Honour a flood-control signal: sleep exactly `wait`. The retried
    /// request goes out immediately after.
    pub async fn flood_wait(&mut self, wait: Duration, cancel: &CancellationToken) -> Wait {
        sleep_or_cancel(wait, cancel).await
    }
}

async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Wait {
    if cancel.is_cancelled() {
        return Wait::Cancelled;
    }
    if wait.is_zero() {
        return Wait::Elapsed;
    }
    tokio::select! {
        _ = sleep(wait) => Wait::Elapsed,
        _ = cancel.cancelled() => Wait::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_slot_is_immediate_then_spaced() {
        let cancel = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(1));
        let start = Instant::now();

        assert_eq!(p.ready(&cancel).await, Wait::Elapsed);
        assert_eq!(start.elapsed(), Duration::ZERO);
        p.succeeded();

        assert_eq!(p.ready(&cancel).await, Wait::Elapsed);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_leave_the_slot_open() {
        let cancel = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..5 {
            assert_eq!(p.ready(&cancel).await, Wait::Elapsed);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_sleeps_exactly_and_retry_is_immediate() {
        let cancel = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(1));
        let start = Instant::now();

        p.ready(&cancel).await;
        p.succeeded();
        p.flood_wait(Duration::from_secs(7), &cancel).await;
        assert_eq!(start.elapsed(), Duration::from_secs(7));

        p.ready(&cancel).await;
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_long_wait() {
        let cancel = CancellationToken::new();
        let mut p = Pacer::new(Duration::from_secs(1));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let res = p.flood_wait(Duration::from_secs(3600), &cancel).await;
        assert_eq!(res, Wait::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(3600));
    }
}
