//! # Observable Values
//!
//! Reactive observer primitive used by the vehicle state store.
//!
//! Writes always notify, even when the value is unchanged, so consumers
//! can treat an update as a "fresh data" tick and not merely a change
//! signal. Notification iterates over a snapshot of the subscriber list
//! (copy-on-notify), and cancellation through a [`SubscriptionHandle`] is
//! deferred, so a subscriber may cancel itself or others from inside its
//! own callback without corrupting the list.

use std::sync::{Arc, Mutex};

/// Identifies one subscription on one observable
pub type SubscriptionId = u64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registration handle returned by [`ObservableValue::subscribe`]
///
/// The handle never owns the subscriber or the observable; dropping it
/// does nothing. Cancellation is deferred and applied before the next
/// notification.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    pending_cancel: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl SubscriptionHandle {
    /// Cancel this subscription; safe to call from inside a callback
    pub fn cancel(&self) {
        self.pending_cancel.lock().unwrap().push(self.id);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}

/// A value plus an ordered list of subscriber callbacks
pub struct ObservableValue<T> {
    value: T,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    next_id: SubscriptionId,
    pending_cancel: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("value", &self.value)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T> ObservableValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            subscribers: Vec::new(),
            next_id: 0,
            pending_cancel: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Borrow the current value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Register a callback, invoked synchronously on every write in
    /// subscription order
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Arc::new(callback)));

        SubscriptionHandle {
            id,
            pending_cancel: Arc::clone(&self.pending_cancel),
        }
    }

    /// Remove a subscription immediately
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        self.subscribers.retain(|(id, _)| *id != handle.id);
    }

    /// Write the value and notify every subscriber (write-always)
    ///
    /// Subscribers must not block or do long work; they schedule further
    /// work if needed.
    pub fn set(&mut self, value: T) {
        self.apply_pending_cancels();
        self.value = value;

        // Snapshot so callbacks see a stable list even if cancellations
        // are queued while notifying.
        let snapshot: Vec<Callback<T>> =
            self.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback(&self.value);
        }

        self.apply_pending_cancels();
    }

    /// Number of live subscribers (cancellations may still be pending)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn apply_pending_cancels(&mut self) {
        let mut pending = self.pending_cancel.lock().unwrap();
        if pending.is_empty() {
            return;
        }
        let cancelled: Vec<SubscriptionId> = pending.drain(..).collect();
        drop(pending);
        self.subscribers.retain(|(id, _)| !cancelled.contains(id));
    }
}

impl<T: Clone> ObservableValue<T> {
    /// Clone out the current value
    pub fn value(&self) -> T {
        self.value.clone()
    }
}

impl<T: Default> Default for ObservableValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_write_always_notifies_even_when_unchanged() {
        let mut value = ObservableValue::new(12.0_f64);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        value.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        value.set(12.0);
        value.set(12.0);
        value.set(11.5);

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscribers_notified_in_subscription_order() {
        let mut value = ObservableValue::new(0_i32);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            value.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        value.set(1);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut value = ObservableValue::new(0_i32);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let handle = value.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        value.set(1);
        value.unsubscribe(&handle);
        value.set(2);

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_from_inside_own_callback() {
        let mut value = ObservableValue::new(0_i32);
        let ticks = Arc::new(AtomicUsize::new(0));

        let handle_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let counter = Arc::clone(&ticks);
        let slot = Arc::clone(&handle_slot);
        let handle = value.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.cancel();
            }
        });
        *handle_slot.lock().unwrap() = Some(handle);

        value.set(1); // fires once, cancels itself
        value.set(2); // no longer subscribed

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(value.subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_other_during_notification_is_deferred() {
        let mut value = ObservableValue::new(0_i32);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let second_handle: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let log = Arc::clone(&seen);
        let target = Arc::clone(&second_handle);
        value.subscribe(move |_| {
            log.lock().unwrap().push("canceller");
            if let Some(handle) = target.lock().unwrap().as_ref() {
                handle.cancel();
            }
        });

        let log = Arc::clone(&seen);
        let handle = value.subscribe(move |_| log.lock().unwrap().push("victim"));
        *second_handle.lock().unwrap() = Some(handle);

        // The victim still sees this notification (snapshot), then goes away
        value.set(1);
        value.set(2);

        assert_eq!(*seen.lock().unwrap(), vec!["canceller", "victim", "canceller"]);
    }

    #[test]
    fn test_get_and_value() {
        let mut value = ObservableValue::new(String::from("idle"));
        assert_eq!(value.get(), "idle");
        value.set(String::from("armed"));
        assert_eq!(value.value(), "armed");
    }
}
