//! Observer registry: three independent notification channels the session
//! manager publishes to and the rendering layer subscribes to.
//!
//! Callbacks run synchronously on the publishing task, in registration
//! order. A callback that panics is logged and skipped; the remaining
//! callbacks still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

use crate::message::ChatMessage;

/// A named notification stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Connected flag changed.
    Connection,
    /// Unread set changed.
    Unread,
    /// Message log changed.
    Messages,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Connection, Channel::Unread, Channel::Messages];

    fn index(self) -> usize {
        match self {
            Channel::Connection => 0,
            Channel::Unread => 1,
            Channel::Messages => 2,
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

#[derive(Default)]
struct Inner {
    slots: [Mutex<Slot>; 3],
}

/// Registry of zero-argument callbacks, one list per [`Channel`].
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Inner>,
}

/// Handle returned by [`ObserverRegistry::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`Observer::unsubscribe`] to remove it.
pub struct Observer {
    registry: Weak<Inner>,
    channel: Channel,
    id: u64,
}

impl Observer {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Remove the callback. A no-op if the registry is already gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut slot = inner.slots[self.channel.index()].lock();
            slot.callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> Observer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slot = self.inner.slots[channel.index()].lock();
        let id = slot.next_id;
        slot.next_id += 1;
        slot.callbacks.push((id, Arc::new(callback)));
        Observer {
            registry: Arc::downgrade(&self.inner),
            channel,
            id,
        }
    }

    /// Invoke every callback registered on `channel`.
    ///
    /// The list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe while being notified.
    pub fn notify(&self, channel: Channel) {
        let callbacks: Vec<Callback> = self.inner.slots[channel.index()]
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!("Observer on {:?} channel panicked", channel);
            }
        }
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.inner.slots[channel.index()].lock().callbacks.len()
    }

    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }
}

/// Identifies a per-message subscriber within one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

pub type MessageCallback = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    callbacks: Vec<(SubscriberId, MessageCallback)>,
}

/// Session-owned list of per-message callbacks.
///
/// Handles hold a weak reference to the list, so once the session that
/// owns it is torn down, unsubscribing is a no-op and can never reach a
/// later session.
#[derive(Clone, Default)]
pub struct MessageSubscribers {
    inner: Arc<Mutex<SubscriberList>>,
}

/// Handle returned when subscribing to inbound messages.
pub struct MessageSubscription {
    list: Weak<Mutex<SubscriberList>>,
    id: SubscriberId,
}

impl MessageSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the owning session still exists.
    pub fn is_live(&self) -> bool {
        self.list.strong_count() > 0
    }

    pub fn unsubscribe(self) {
        if let Some(list) = self.list.upgrade() {
            list.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl MessageSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: MessageCallback) -> MessageSubscription {
        let mut list = self.inner.lock();
        let id = SubscriberId(list.next_id);
        list.next_id += 1;
        list.callbacks.push((id, callback));
        MessageSubscription {
            list: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver a message to every subscriber, in subscription order,
    /// isolating panics.
    pub fn dispatch(&self, msg: &ChatMessage) {
        let callbacks: Vec<(SubscriberId, MessageCallback)> =
            self.inner.lock().callbacks.clone();
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
                error!("Message subscriber {:?} panicked on {}", id, msg.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().callbacks.clear();
    }
}
