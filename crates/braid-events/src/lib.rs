pub mod bus;
pub mod event;
pub mod reactor;

pub use bus::{EventBus, RemotePublisher, SubscriptionId};
pub use event::{Event, EventKind};
pub use reactor::{Callback, ManualReactor, Reactor, RepeatingCallback, TimerHandle};
