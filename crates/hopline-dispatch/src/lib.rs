//! Type-keyed action dispatch for Hopline.
//!
//! [`ActionDispatcher`] routes a type-erased action to every handler
//! subscribed for its exact runtime type. Subscriptions are scoped to the
//! dispatcher instance that created them; there is no global bus, and each
//! connection or control owns its own dispatcher.
//!
//! Dispatch semantics:
//!
//! - handlers run in subscription order;
//! - dispatch invokes a snapshot of the handler list, so handlers added or
//!   removed concurrently never affect an in-flight dispatch;
//! - an action type with no handlers dispatches to nobody, silently;
//! - handler panics are not caught here; the caller owns that policy.
//!
//! The crate also provides [`EventBus`], the channel-backed fan-out used
//! for lifecycle events (`Connected`, `Disconnected`, ...).

mod bus;

pub use bus::EventBus;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type ErasedHandler = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

struct Registration {
    id: u64,
    handler: ErasedHandler,
}

#[derive(Default)]
struct DispatchInner {
    handlers: Mutex<HashMap<TypeId, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// Routes actions to handlers subscribed by concrete type.
///
/// Cheap to clone; clones share the same handler table. All operations are
/// safe to call concurrently from any thread.
#[derive(Clone, Default)]
pub struct ActionDispatcher {
    inner: Arc<DispatchInner>,
}

impl ActionDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a handler for every dispatched action whose runtime type
    /// is exactly `T`.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    /// Dropping it without calling [`Subscription::unsubscribe`] leaves
    /// the handler registered for the dispatcher's lifetime.
    pub fn subscribe<T, F>(&self, handler: F) -> Subscription
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |action| {
            if let Some(typed) = action.downcast_ref::<T>() {
                handler(typed);
            }
        });

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<T>();
        self.inner
            .handlers
            .lock()
            .unwrap()
            .entry(type_id)
            .or_default()
            .push(Registration {
                id,
                handler: erased,
            });

        Subscription {
            inner: Arc::downgrade(&self.inner),
            type_id,
            id,
        }
    }

    /// Dispatches an action to every handler subscribed for its runtime
    /// type, in subscription order. No-op if nothing is subscribed.
    ///
    /// Pass the erased value itself (`action.as_ref()` for an `Arc`), not
    /// a reference to the container.
    pub fn dispatch(&self, action: &(dyn Any + Send + Sync)) {
        // Snapshot under the lock, invoke outside it.
        let snapshot: Option<Vec<ErasedHandler>> = {
            let handlers = self.inner.handlers.lock().unwrap();
            handlers.get(&action.type_id()).map(|list| {
                list.iter().map(|r| Arc::clone(&r.handler)).collect()
            })
        };

        if let Some(handlers) = snapshot {
            for handler in handlers {
                handler(action);
            }
        }
    }

    /// Returns the number of handlers subscribed for `T`.
    pub fn handler_count<T: Any>(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }
}

/// Disposer for one [`ActionDispatcher::subscribe`] registration.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once is a no-op,
/// as is calling it after the dispatcher has been dropped.
#[must_use = "dropping a Subscription does not remove the handler; call unsubscribe()"]
pub struct Subscription {
    inner: Weak<DispatchInner>,
    type_id: TypeId,
    id: u64,
}

impl Subscription {
    /// Removes the registration this subscription was returned for.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut handlers = inner.handlers.lock().unwrap();
        if let Some(list) = handlers.get_mut(&self.type_id) {
            list.retain(|r| r.id != self.id);
            if list.is_empty() {
                handlers.remove(&self.type_id);
            }
        }
    }
}
