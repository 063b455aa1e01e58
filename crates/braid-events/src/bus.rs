use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use crate::event::{Event, EventKind};
use crate::reactor::Reactor;

type HandlerPtr = Rc<dyn Fn(&Event)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct BusInner {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, HandlerPtr)>>,
    queue: VecDeque<(HandlerPtr, Event)>,
    drain_scheduled: bool,
    next_id: u64,
    remote_tx: mpsc::UnboundedSender<Event>,
    /// Taken by `forward_remote` for the lifetime of the forwarding task.
    remote_rx: Option<mpsc::UnboundedReceiver<Event>>,
    remote_stop: Rc<Notify>,
}

/// In-process publish/subscribe.
///
/// `publish` never calls a handler directly while the reactor runs: each
/// `(handler, event)` pair is queued and delivered one per loop turn, in
/// publish order. When the reactor is not running (start-up, shutdown)
/// handlers are called inline.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
    reactor: Rc<dyn Reactor>,
}

struct WeakBus {
    inner: Weak<RefCell<BusInner>>,
    reactor: Weak<dyn Reactor>,
}

impl WeakBus {
    fn upgrade(&self) -> Option<EventBus> {
        Some(EventBus {
            inner: self.inner.upgrade()?,
            reactor: self.reactor.upgrade()?,
        })
    }
}

impl EventBus {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                handlers: HashMap::new(),
                queue: VecDeque::new(),
                drain_scheduled: false,
                next_id: 0,
                remote_tx,
                remote_rx: Some(remote_rx),
                remote_stop: Rc::new(Notify::new()),
            })),
            reactor,
        }
    }

    fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Rc::downgrade(&self.inner),
            reactor: Rc::downgrade(&self.reactor),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + 'static,
    {
        self.subscribe_kinds(&[kind], handler)
    }

    /// One handler for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + 'static,
    {
        self.subscribe_kinds(&EventKind::ALL, handler)
    }

    pub fn subscribe_kinds<F>(&self, kinds: &[EventKind], handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + 'static,
    {
        let handler: HandlerPtr = Rc::new(handler);
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        for kind in kinds {
            inner
                .handlers
                .entry(*kind)
                .or_default()
                .push((id, handler.clone()));
        }
        id
    }

    /// Remove a subscription. Deliveries already queued for it still happen.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut removed = false;
        for list in inner.handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    // ── Publishing ───────────────────────────────────────────────────────────

    pub fn publish(&self, event: Event) {
        let handlers: Vec<HandlerPtr> = {
            let inner = self.inner.borrow();
            match inner.handlers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };
        if handlers.is_empty() {
            return;
        }

        if !self.reactor.is_running() {
            trace!(kind = ?event.kind(), "delivering event inline");
            for handler in handlers {
                handler(&event);
            }
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            for handler in handlers {
                inner.queue.push_back((handler, event.clone()));
            }
        }
        self.schedule_drain();
    }

    fn schedule_drain(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.drain_scheduled || inner.queue.is_empty() {
                return;
            }
            inner.drain_scheduled = true;
        }
        let weak = self.downgrade();
        self.reactor.call_later(
            Duration::ZERO,
            Box::new(move || {
                if let Some(bus) = weak.upgrade() {
                    bus.deliver_next();
                }
            }),
        );
    }

    fn deliver_next(&self) {
        let next = {
            let mut inner = self.inner.borrow_mut();
            inner.drain_scheduled = false;
            inner.queue.pop_front()
        };
        if let Some((handler, event)) = next {
            handler(&event);
        }
        self.schedule_drain();
    }

    /// Deliveries still waiting for a loop turn.
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    // ── Cross-thread hand-off ────────────────────────────────────────────────

    /// A `Send` handle other threads use to publish on this bus. Events it
    /// sends are republished on the loop thread, either by the task from
    /// [`EventBus::forward_remote`] or by [`EventBus::drain_remote`].
    pub fn remote_publisher(&self) -> RemotePublisher {
        RemotePublisher {
            tx: self.inner.borrow().remote_tx.clone(),
        }
    }

    /// A task that republishes cross-thread events the moment they arrive.
    /// Spawn it with `spawn_local` on the loop's `LocalSet`; it ends on
    /// [`EventBus::shutdown`] or when the bus is dropped.
    pub fn forward_remote(&self) -> impl Future<Output = ()> + 'static {
        let (rx, stop) = {
            let mut inner = self.inner.borrow_mut();
            (inner.remote_rx.take(), inner.remote_stop.clone())
        };
        let weak = self.downgrade();
        async move {
            let Some(mut rx) = rx else {
                debug!("cross-thread events are already being forwarded");
                return;
            };
            loop {
                let event = tokio::select! {
                    _ = stop.notified() => break,
                    event = rx.recv() => event,
                };
                let (Some(event), Some(bus)) = (event, weak.upgrade()) else {
                    break;
                };
                trace!(kind = ?event.kind(), "republishing event from another thread");
                bus.publish(event);
            }
            if let Some(bus) = weak.upgrade() {
                bus.inner.borrow_mut().remote_rx = Some(rx);
            }
        }
    }

    /// Republish every event received from other threads so far. For loops
    /// that do not run the forwarding task.
    pub fn drain_remote(&self) -> usize {
        let received: Vec<Event> = {
            let mut inner = self.inner.borrow_mut();
            let mut out = Vec::new();
            if let Some(rx) = inner.remote_rx.as_mut() {
                while let Ok(event) = rx.try_recv() {
                    out.push(event);
                }
            }
            out
        };
        let n = received.len();
        if n > 0 {
            debug!(count = n, "republishing events from other threads");
        }
        for event in received {
            self.publish(event);
        }
        n
    }

    /// Stop the forwarding task.
    pub fn shutdown(&self) {
        self.inner.borrow().remote_stop.notify_one();
    }
}

/// Thread-safe publishing end of an [`EventBus`].
#[derive(Clone)]
pub struct RemotePublisher {
    tx: mpsc::UnboundedSender<Event>,
}

impl RemotePublisher {
    /// Returns `false` once the bus is gone.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}
