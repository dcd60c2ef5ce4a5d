//! Subscriptions for the side-effect system.
//!
//! A Subscription represents one live observation of a side effect. It is the
//! only handle through which an observation can be torn down, and the place
//! where asynchronous work registers the teardown that stops it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Unique identifier for a subscription.
///
/// Each subscription gets a unique ID when created. Stores use it to key
/// their in-flight and observer registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

struct Inner {
    id: SubscriptionId,
    cancelled: AtomicBool,
    /// Run exactly once, on the first call to `cancel`.
    teardown: Mutex<SmallVec<[Teardown; 2]>>,
}

/// A cancellable handle to one observation of a side effect.
///
/// Clones share the same cancellation state. Dropping a `Subscription` does
/// not cancel it; use [`Subscription::guard`] for cancel-on-drop.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    /// Create a new, live subscription.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: SubscriptionId::new(),
                cancelled: AtomicBool::new(false),
                teardown: Mutex::new(SmallVec::new()),
            }),
        }
    }

    /// Get the subscription's unique ID.
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Check if the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the subscription.
    ///
    /// Runs every registered teardown once. Later calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let teardown = std::mem::take(&mut *self.inner.teardown.lock());
        for run in teardown {
            run();
        }
    }

    /// Register work to run when the subscription is cancelled.
    ///
    /// If the subscription is already cancelled, `teardown` runs immediately.
    pub fn on_cancel<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut pending = self.inner.teardown.lock();
            if !self.is_cancelled() {
                pending.push(Box::new(teardown));
                return;
            }
        }
        teardown();
    }

    /// Create a subscription that is cancelled whenever this one is.
    ///
    /// Cancelling the child leaves the parent untouched.
    pub fn child(&self) -> Subscription {
        let child = Subscription::new();
        let weak: Weak<Inner> = Arc::downgrade(&child.inner);
        self.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                Subscription { inner }.cancel();
            }
        });
        child
    }

    /// Wrap this subscription in a guard that cancels it when dropped.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard { subscription: self }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle that owns a subscription.
///
/// Dropping this handle cancels the subscription.
#[derive(Debug)]
pub struct SubscriptionGuard {
    subscription: Subscription,
}

impl SubscriptionGuard {
    /// Get the guarded subscription.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}
