//! Scheduling seam for the single-threaded event loop.
//!
//! Every timer in the node (PoA sync wait, PoA production tick, event bus
//! drain) goes through [`Reactor`]. The node binary backs it with tokio;
//! tests use [`ManualReactor`], whose clock only moves when told to.

use braid_core::types::Timestamp;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

pub type Callback = Box<dyn FnOnce()>;
pub type RepeatingCallback = Box<dyn FnMut()>;

/// Handle to a scheduled callback. Cancelling is idempotent and a cancelled
/// callback never runs again.
#[derive(Clone, Debug, Default)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

pub trait Reactor {
    /// Wall-clock time in Unix seconds as seen by the loop.
    fn now(&self) -> Timestamp;

    /// Whether the loop is dispatching callbacks. Before start-up and after
    /// shutdown it is not.
    fn is_running(&self) -> bool;

    /// Run `callback` once after `delay`. A zero delay means "on the next
    /// loop turn", never inline.
    fn call_later(&self, delay: Duration, callback: Callback) -> TimerHandle;

    /// Run `callback` on the next loop turn and then every `interval` until
    /// the returned handle is cancelled.
    fn call_every(&self, interval: Duration, callback: RepeatingCallback) -> TimerHandle;
}

// ── ManualReactor ────────────────────────────────────────────────────────────

enum Scheduled {
    Once(Callback),
    Every {
        interval: Duration,
        callback: RepeatingCallback,
    },
}

struct Entry {
    handle: TimerHandle,
    task: Scheduled,
}

struct ManualInner {
    now: Duration,
    seq: u64,
    running: bool,
    queue: BTreeMap<(Duration, u64), Entry>,
}

/// Deterministic reactor driven by explicit [`ManualReactor::advance`] calls.
pub struct ManualReactor {
    inner: RefCell<ManualInner>,
}

impl ManualReactor {
    /// A running reactor whose clock reads `start` Unix seconds.
    pub fn new(start: Timestamp) -> Self {
        Self {
            inner: RefCell::new(ManualInner {
                now: Duration::from_secs(start.max(0) as u64),
                seq: 0,
                running: true,
                queue: BTreeMap::new(),
            }),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.inner.borrow_mut().running = running;
    }

    /// Exact clock reading, including sub-second progress.
    pub fn elapsed(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Callbacks still waiting to fire, cancelled ones included.
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Run everything due now, including work scheduled by those callbacks.
    pub fn run_pending(&self) {
        self.advance(Duration::ZERO);
    }

    /// Move the clock forward by `by`, firing every callback that comes due
    /// in order of due time and then scheduling order.
    pub fn advance(&self, by: Duration) {
        let target = self.inner.borrow().now + by;
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let due = match inner.queue.keys().next() {
                    Some(key) if key.0 <= target => *key,
                    _ => break,
                };
                let entry = inner.queue.remove(&due);
                inner.now = inner.now.max(due.0);
                entry.map(|e| (due.0, e))
            };
            let Some((due, entry)) = next else { continue };
            if entry.handle.is_cancelled() {
                continue;
            }
            match entry.task {
                Scheduled::Once(callback) => callback(),
                Scheduled::Every {
                    interval,
                    mut callback,
                } => {
                    callback();
                    if !entry.handle.is_cancelled() {
                        self.schedule(
                            due + interval,
                            entry.handle,
                            Scheduled::Every { interval, callback },
                        );
                    }
                }
            }
        }
        let mut inner = self.inner.borrow_mut();
        inner.now = inner.now.max(target);
    }

    /// Advance the clock to Unix second `ts`. Does nothing if `ts` is in the
    /// past.
    pub fn advance_to(&self, ts: Timestamp) {
        let target = Duration::from_secs(ts.max(0) as u64);
        let now = self.elapsed();
        if target > now {
            self.advance(target - now);
        }
    }

    fn schedule(&self, due: Duration, handle: TimerHandle, task: Scheduled) {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.seq;
        inner.seq += 1;
        inner.queue.insert((due, seq), Entry { handle, task });
    }
}

impl Reactor for ManualReactor {
    fn now(&self) -> Timestamp {
        self.inner.borrow().now.as_secs() as Timestamp
    }

    fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    fn call_later(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let handle = TimerHandle::new();
        let due = self.elapsed() + delay;
        self.schedule(due, handle.clone(), Scheduled::Once(callback));
        handle
    }

    fn call_every(&self, interval: Duration, callback: RepeatingCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let due = self.elapsed();
        self.schedule(due, handle.clone(), Scheduled::Every { interval, callback });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let make = move |name: &'static str| -> Callback {
            let l = l.clone();
            Box::new(move || l.borrow_mut().push(name))
        };
        (log, make)
    }

    #[test]
    fn callbacks_fire_in_due_order() {
        let r = ManualReactor::new(1_000);
        let (log, cb) = log();
        r.call_later(Duration::from_secs(5), cb("late"));
        r.call_later(Duration::from_secs(1), cb("early"));
        r.call_later(Duration::from_secs(1), cb("early-2"));
        r.advance(Duration::from_secs(2));
        assert_eq!(*log.borrow(), vec!["early", "early-2"]);
        assert_eq!(r.now(), 1_002);
        r.advance(Duration::from_secs(10));
        assert_eq!(*log.borrow(), vec!["early", "early-2", "late"]);
    }

    #[test]
    fn zero_delay_is_deferred() {
        let r = ManualReactor::new(0);
        let (log, cb) = log();
        r.call_later(Duration::ZERO, cb("next-turn"));
        assert!(log.borrow().is_empty());
        r.run_pending();
        assert_eq!(*log.borrow(), vec!["next-turn"]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let r = ManualReactor::new(0);
        let (log, cb) = log();
        let h = r.call_later(Duration::from_secs(1), cb("never"));
        h.cancel();
        h.cancel();
        r.advance(Duration::from_secs(5));
        assert!(log.borrow().is_empty());
        assert!(h.is_cancelled());
    }

    #[test]
    fn looping_call_fires_immediately_then_every_interval() {
        let r = Rc::new(ManualReactor::new(0));
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let h = r.call_every(Duration::from_secs(10), Box::new(move || c.set(c.get() + 1)));
        r.run_pending();
        assert_eq!(count.get(), 1);
        r.advance(Duration::from_secs(25));
        assert_eq!(count.get(), 3);
        h.cancel();
        r.advance(Duration::from_secs(100));
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn callbacks_may_schedule_more_work() {
        let r = Rc::new(ManualReactor::new(0));
        let (log, cb) = log();
        let r2 = r.clone();
        let inner = cb("inner");
        r.call_later(
            Duration::from_secs(1),
            Box::new(move || {
                r2.call_later(Duration::ZERO, inner);
            }),
        );
        r.advance(Duration::from_secs(1));
        assert_eq!(*log.borrow(), vec!["inner"]);
    }
}
