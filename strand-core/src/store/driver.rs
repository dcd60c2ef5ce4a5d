//! Store Driver
//!
//! The driver runs the action → mutation → state cycle for a [`Store`].
//!
//! # How Dispatch Works
//!
//! 1. `send(action)` reads the current state and asks the store to `mutate`
//!    it into a side effect of mutations.
//!
//! 2. The side effect is subscribed and recorded as in flight.
//!
//! 3. Every mutation it emits is folded into the state current at that
//!    moment with `reduce`, and the result is published.
//!
//! 4. When the side effect completes, it is removed from the in-flight set.
//!
//! Effects from different dispatches may overlap. Their mutations are
//! applied in arrival order, so a slow early effect can land after a fast
//! later one. [`DispatchPolicy::CancelPrevious`] opts out of overlap.
//!
//! # Lifetime
//!
//! Pending effects hold only a weak reference to the driver. Dropping the
//! last driver handle cancels everything in flight and completes every state
//! observer; a delivery that still arrives finds the driver gone and is
//! ignored.
//!
//! A state observer that dispatches actions must hold a [`WeakStoreDriver`].
//! A strong handle captured by an observer keeps the driver alive through
//! its own observer list, so it would never be torn down.

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};

use super::config::{DispatchPolicy, StoreConfig};
use super::state::StateCell;
use crate::effect::{Event, SideEffect, Subscription, SubscriptionId};

/// The logic of a unidirectional store.
///
/// `mutate` turns an action into a side effect of mutations. Its failure type
/// is `Infallible`, so any fallible step must be resolved with the catch
/// family before the effect is returned. `reduce` is a pure fold.
pub trait Store: Send + Sync + 'static {
    type State: Clone + PartialEq + Send + Sync + 'static;
    type Action: Send + 'static;
    type Mutation: Send + 'static;

    /// The state the driver starts from.
    fn initial_state(&self) -> Self::State;

    fn mutate(
        &self,
        state: &Self::State,
        action: Self::Action,
    ) -> SideEffect<Self::Mutation, Infallible>;

    fn reduce(&self, state: Self::State, mutation: Self::Mutation) -> Self::State;
}

struct Shared<S: Store> {
    store: S,
    config: StoreConfig,
    initial: S::State,
    state: Arc<StateCell<S::State>>,
    in_flight: Mutex<IndexMap<SubscriptionId, Subscription>>,
    /// Serializes reduce + publish. Reentrant so an observer may `send`.
    delivery: ReentrantMutex<()>,
}

impl<S: Store> Shared<S> {
    fn apply(&self, mutation: S::Mutation) {
        let _delivery = self.delivery.lock();
        let current = self.state.get();

        let next = if self.config.skip_duplicate_states {
            let next = self.store.reduce(current.clone(), mutation);
            if next == current {
                tracing::trace!(store = %self.config.name, "state unchanged; not publishing");
                return;
            }
            next
        } else {
            self.store.reduce(current, mutation)
        };

        tracing::trace!(store = %self.config.name, "publishing state");
        self.state.publish(next);
    }

    fn finish(&self, id: SubscriptionId) {
        self.in_flight.lock().shift_remove(&id);
    }

    fn cancel_all(&self) {
        let in_flight = std::mem::take(&mut *self.in_flight.lock());
        for (_, subscription) in in_flight {
            subscription.cancel();
        }
    }
}

impl<S: Store> Drop for Shared<S> {
    fn drop(&mut self) {
        let in_flight = std::mem::take(self.in_flight.get_mut());
        tracing::debug!(store = %self.config.name, in_flight = in_flight.len(), "store dropped");
        for (_, subscription) in in_flight {
            subscription.cancel();
        }
        self.state.complete_all();
    }
}

/// Drives a [`Store`]: holds its state, dispatches actions, and publishes
/// every reduced state.
///
/// # Example
///
/// ```rust,ignore
/// let driver = StoreDriver::new(Counter);
///
/// let _updates = driver.state().subscribe(|event| println!("{event:?}"));
/// driver.send(CounterAction::Increase);
///
/// assert_eq!(driver.current_state().count, 1);
/// ```
pub struct StoreDriver<S: Store> {
    inner: Arc<Shared<S>>,
}

impl<S: Store> StoreDriver<S> {
    /// Create a driver with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, StoreConfig::default())
    }

    pub fn with_config(store: S, config: StoreConfig) -> Self {
        let initial = store.initial_state();
        Self {
            inner: Arc::new(Shared {
                state: Arc::new(StateCell::new(initial.clone())),
                initial,
                store,
                config,
                in_flight: Mutex::new(IndexMap::new()),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Get the store logic.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Get the most recently published state.
    pub fn current_state(&self) -> S::State {
        self.inner.state.get()
    }

    /// Get the state the driver was created with.
    pub fn initial_state(&self) -> &S::State {
        &self.inner.initial
    }

    /// Observe the state stream.
    ///
    /// The returned effect emits the current state on subscription, then
    /// every published state. It never fails, and completes when the driver
    /// is dropped. Observers that call back into the driver should capture a
    /// [`downgrade`](Self::downgrade)d handle.
    pub fn state(&self) -> SideEffect<S::State, Infallible> {
        let shared: Weak<Shared<S>> = Arc::downgrade(&self.inner);
        SideEffect::new(move |emitter| match shared.upgrade() {
            Some(shared) => {
                let _delivery = shared.delivery.lock();
                shared.state.attach(emitter);
            }
            None => emitter.complete(),
        })
    }

    /// Dispatch an action.
    ///
    /// Returns immediately; results are observable only through the state
    /// stream.
    pub fn send(&self, action: S::Action) {
        dispatch(&self.inner, action);
    }

    /// Create a handle that does not keep the driver alive.
    pub fn downgrade(&self) -> WeakStoreDriver<S> {
        WeakStoreDriver {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the number of dispatched effects that have not completed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Cancel every effect still in flight.
    pub fn cancel_all(&self) {
        tracing::debug!(store = %self.inner.config.name, "cancelling in-flight effects");
        self.inner.cancel_all();
    }
}

fn dispatch<S: Store>(shared: &Arc<Shared<S>>, action: S::Action) {
    if shared.config.dispatch == DispatchPolicy::CancelPrevious {
        shared.cancel_all();
    }

    let effect = shared.store.mutate(&shared.state.get(), action);
    let subscription = Subscription::new();
    let id = subscription.id();

    tracing::debug!(store = %shared.config.name, subscription = ?id, "dispatching action");
    shared.in_flight.lock().insert(id, subscription.clone());

    let weak = Arc::downgrade(shared);
    effect.subscribe_on(&subscription, move |event| {
        let Some(shared) = weak.upgrade() else {
            tracing::debug!(subscription = ?id, "store dropped; ignoring delivery");
            return;
        };
        match event {
            Event::Next(mutation) => shared.apply(mutation),
            Event::Completed => shared.finish(id),
            Event::Failed(never) => match never {},
        }
    });
}

/// A non-owning [`StoreDriver`] handle.
///
/// Dispatching through it is a no-op once every strong handle is gone.
pub struct WeakStoreDriver<S: Store> {
    inner: Weak<Shared<S>>,
}

impl<S: Store> WeakStoreDriver<S> {
    /// Get a strong handle if the driver is still alive.
    pub fn upgrade(&self) -> Option<StoreDriver<S>> {
        self.inner.upgrade().map(|inner| StoreDriver { inner })
    }

    /// Dispatch an action if the driver is still alive.
    ///
    /// Returns whether the action was dispatched.
    pub fn send(&self, action: S::Action) -> bool {
        match self.inner.upgrade() {
            Some(shared) => {
                dispatch(&shared, action);
                true
            }
            None => {
                tracing::debug!("store dropped; ignoring action");
                false
            }
        }
    }
}

impl<S: Store> Clone for WeakStoreDriver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S: Store> fmt::Debug for WeakStoreDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStoreDriver")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<S: Store> Clone for StoreDriver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for StoreDriver<S>
where
    S: Store,
    S::State: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDriver")
            .field("name", &self.inner.config.name)
            .field("state", &self.current_state())
            .field("in_flight", &self.in_flight())
            .field("observers", &self.inner.state.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
