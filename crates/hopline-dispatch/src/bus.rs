//! Instance-scoped lifecycle event fan-out.
//!
//! Every control and session owns its own `EventBus`; subscribers get an
//! unbounded receiver and drain it at their own pace. Emission never
//! blocks, and a dropped receiver is pruned on the next emit.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// A fan-out channel for lifecycle events.
///
/// Events are cloned per subscriber and delivered in emission order.
/// Emitting with no subscribers drops the event silently; notifications
/// are fire-and-forget.
pub struct EventBus<E> {
    senders: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }

    /// Delivers a clone of the event to every live subscriber, pruning
    /// subscribers whose receiver is gone.
    pub fn emit(&self, event: E) {
        self.senders
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers at the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit("hello");

        assert_eq!(a.try_recv().ok(), Some("hello"));
        assert_eq!(b.try_recv().ok(), Some("hello"));
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(42); // must not panic
    }

    #[test]
    fn test_events_arrive_in_emission_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(1);
        bus.emit(2);
        bus.emit(3);

        assert_eq!(rx.try_recv().ok(), Some(1));
        assert_eq!(rx.try_recv().ok(), Some(2));
        assert_eq!(rx.try_recv().ok(), Some(3));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _keep = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.emit(1);

        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit("early");

        let mut rx = bus.subscribe();
        bus.emit("late");

        assert_eq!(rx.try_recv().ok(), Some("late"));
        assert!(rx.try_recv().is_err());
    }
}
