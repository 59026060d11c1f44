//! Change Notification
//!
//! A [`Signal`] is an ordered list of subscriber callbacks. Emitting calls
//! every slot in registration order. A slot that returns an error or panics
//! does not stop delivery: the failure is logged, collected into the
//! returned report, and the next slot runs.
//!
//! The slot list is snapshotted before delivery, so a slot may subscribe or
//! unsubscribe (itself or others) while the signal is being emitted; the
//! change takes effect from the next emission.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Error a slot may return to report that it could not handle an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotError(pub String);

impl SlotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SlotError {}

/// A slot that failed during one emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    pub subscriber: SubscriberId,
    pub error: SlotError,
}

type Slot<E> = Arc<dyn Fn(&E) -> Result<(), SlotError> + Send + Sync>;

struct Slots<E> {
    slots: RwLock<Vec<(SubscriberId, Slot<E>)>>,
}

/// An ordered broadcast of events of type `E`.
pub struct Signal<E> {
    inner: Arc<Slots<E>>,
}

impl<E: 'static> Signal<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Slots {
                slots: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a slot. It stays connected until the returned
    /// [`Subscription`] is dropped (or detached and later unsubscribed).
    pub fn subscribe<F>(&self, slot: F) -> Subscription
    where
        F: Fn(&E) -> Result<(), SlotError> + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.inner.slots.write().push((id, Arc::new(slot)));

        let weak: Weak<Slots<E>> = Arc::downgrade(&self.inner);
        let weak: Weak<dyn Disconnect> = weak;
        Subscription {
            id,
            signal: Some(weak),
        }
    }

    /// Remove a slot. Returns `false` if it was not connected.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.disconnect(id)
    }

    /// Deliver `event` to every slot in registration order.
    pub fn emit(&self, event: &E) -> Vec<SlotFailure> {
        let slots: Vec<(SubscriberId, Slot<E>)> = self.inner.slots.read().clone();
        let mut failures = Vec::new();

        for (id, slot) in slots {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| slot(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => SlotError(panic_message(payload.as_ref())),
            };
            warn!(subscriber = ?id, error = %error, "signal slot failed");
            failures.push(SlotFailure {
                subscriber: id,
                error,
            });
        }

        failures
    }

    /// Number of connected slots.
    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.read().len()
    }
}

impl<E: 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscriber_count", &self.inner.slots.read().len())
            .finish()
    }
}

trait Disconnect: Send + Sync {
    fn disconnect(&self, id: SubscriberId) -> bool;
}

impl<E> Disconnect for Slots<E> {
    fn disconnect(&self, id: SubscriberId) -> bool {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|(s, _)| *s != id);
        slots.len() != before
    }
}

/// Handle to a connected slot.
///
/// Dropping the handle disconnects the slot.
pub struct Subscription {
    id: SubscriberId,
    signal: Option<Weak<dyn Disconnect>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Keep the slot connected for the lifetime of the signal.
    pub fn detach(mut self) -> SubscriberId {
        self.signal = None;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take().and_then(|w| w.upgrade()) {
            signal.disconnect(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "slot panicked".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn slots_run_in_registration_order() {
        let signal: Signal<i32> = Signal::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = log.clone();
        let _a = signal.subscribe(move |e| {
            first.lock().push(("a", *e));
            Ok(())
        });
        let second = log.clone();
        let _b = signal.subscribe(move |e| {
            second.lock().push(("b", *e));
            Ok(())
        });

        assert!(signal.emit(&7).is_empty());
        assert_eq!(*log.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn failing_slots_do_not_stop_delivery() {
        let signal: Signal<()> = Signal::new();
        let reached = Arc::new(AtomicI32::new(0));

        let _err = signal.subscribe(|_| Err(SlotError::new("nope")));
        let _panics = signal.subscribe(|_| panic!("boom"));
        let counter = reached.clone();
        let _ok = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let failures = signal.emit(&());
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].error, SlotError::new("nope"));
        assert_eq!(failures[1].error, SlotError::new("boom"));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_disconnects() {
        let signal: Signal<()> = Signal::new();
        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();

        let sub = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        signal.emit(&());
        drop(sub);
        signal.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn detached_subscription_stays_connected() {
        let signal: Signal<()> = Signal::new();
        let id = signal.subscribe(|_| Ok(())).detach();
        assert_eq!(signal.subscriber_count(), 1);
        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
    }
}
