use braid_core::types::Timestamp;
use braid_events::reactor::{Callback, RepeatingCallback};
use braid_events::{Reactor, TimerHandle};
use std::cell::Cell;
use std::time::Duration;

/// [`Reactor`] on a tokio current-thread runtime. Callbacks are spawned with
/// `spawn_local`, so every method must be called from inside a
/// `tokio::task::LocalSet`.
#[derive(Debug)]
pub struct TokioReactor {
    running: Cell<bool>,
}

impl TokioReactor {
    pub fn new() -> Self {
        Self {
            running: Cell::new(true),
        }
    }

    /// Stop reporting as running. Pending timers still fire unless their
    /// owners cancel them.
    pub fn shutdown(&self) {
        self.running.set(false);
    }
}

impl Default for TokioReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for TokioReactor {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn call_later(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let handle = TimerHandle::new();
        let h = handle.clone();
        tokio::task::spawn_local(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            if !h.is_cancelled() {
                callback();
            }
        });
        handle
    }

    fn call_every(&self, interval: Duration, mut callback: RepeatingCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let h = handle.clone();
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if h.is_cancelled() {
                    break;
                }
                callback();
            }
        });
        handle
    }
}
