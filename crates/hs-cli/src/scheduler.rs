//! Periodic tick scheduling.
//!
//! Wakes the sampler on a fixed period, on demand through a
//! [`RefreshHandle`], and on a slower cadence to poll for changed settings.
//! Wakeups are handled one at a time, so ticks never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Why the scheduler woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// The sampling period elapsed.
    Scheduled,
    /// An immediate refresh was requested.
    Refresh,
    /// Time to check for changed settings.
    PollOptions,
}

/// Requests an out-of-band tick.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    /// Requests a refresh; repeated requests before it runs collapse into one.
    pub fn request(&self) {
        self.notify.notify_one();
    }
}

pub struct Scheduler {
    ticks: Interval,
    polls: Interval,
    refresh: Arc<Notify>,
}

impl Scheduler {
    /// Creates a scheduler whose first tick fires immediately.
    pub fn new(period: Duration, poll_period: Duration) -> Self {
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = tokio::time::interval_at(Instant::now() + poll_period, poll_period);
        polls.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticks,
            polls,
            refresh: Arc::new(Notify::new()),
        }
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            notify: Arc::clone(&self.refresh),
        }
    }

    /// Dispatches wakeups to `handler` until `shutdown` completes.
    ///
    /// A handler error is logged and the loop continues. Shutdown is only
    /// observed between wakeups, so an in-flight round always completes.
    pub async fn run<F, H>(&mut self, shutdown: F, mut handler: H)
    where
        F: Future<Output = ()>,
        H: FnMut(Wakeup) -> Result<()>,
    {
        tokio::pin!(shutdown);
        loop {
            let wakeup = tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("shutting down scheduler");
                    return;
                }
                () = self.refresh.notified() => Wakeup::Refresh,
                _ = self.ticks.tick() => Wakeup::Scheduled,
                _ = self.polls.tick() => Wakeup::PollOptions,
            };
            if let Err(err) = handler(wakeup) {
                tracing::error!(?wakeup, error = %format!("{err:#}"), "round failed");
            }
        }
    }
}
