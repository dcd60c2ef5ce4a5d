//! State Cell Implementation
//!
//! A StateCell holds a store's current state and the observers of its state
//! stream.
//!
//! # How State Cells Work
//!
//! 1. Reading the current value is synchronous and always returns the most
//!    recently published state.
//!
//! 2. Publishing replaces the value wholesale, then pushes it to every
//!    observer in registration order. A publish made from inside an observer
//!    is queued and delivered after the current value has reached every
//!    observer, so all observers see the same ordered sequence.
//!
//! 3. A new observer first receives the current value, then every later
//!    publication.
//!
//! # Thread Safety
//!
//! The value is protected by a RwLock and the observer registry by a Mutex.
//! Neither lock is held while an observer runs.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::effect::{Emitter, SubscriptionId};

/// Values waiting to be pushed to observers.
struct Outbox<T> {
    pending: VecDeque<T>,
    publishing: bool,
}

pub(crate) struct StateCell<T> {
    value: RwLock<T>,
    observers: Mutex<IndexMap<SubscriptionId, Emitter<T, Infallible>>>,
    outbox: Mutex<Outbox<T>>,
}

impl<T> StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            observers: Mutex::new(IndexMap::new()),
            outbox: Mutex::new(Outbox {
                pending: VecDeque::new(),
                publishing: false,
            }),
        }
    }

    /// Get the current value.
    pub(crate) fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value and notify observers.
    ///
    /// The value is current as soon as this is called. If another publish is
    /// already notifying observers, the value is queued and that caller
    /// delivers it once the earlier value has reached everyone.
    pub(crate) fn publish(&self, value: T) {
        *self.value.write() = value.clone();

        {
            let mut outbox = self.outbox.lock();
            outbox.pending.push_back(value);
            if outbox.publishing {
                return;
            }
            outbox.publishing = true;
        }

        loop {
            let value = {
                let mut outbox = self.outbox.lock();
                match outbox.pending.pop_front() {
                    Some(value) => value,
                    None => {
                        outbox.publishing = false;
                        return;
                    }
                }
            };

            let observers: Vec<_> = self.observers.lock().values().cloned().collect();
            for observer in observers {
                observer.next(value.clone());
            }
        }
    }

    /// Register an observer and replay the current value to it.
    ///
    /// The observer is removed when its subscription is cancelled.
    pub(crate) fn attach(self: &Arc<Self>, emitter: Emitter<T, Infallible>) {
        let id = emitter.subscription().id();
        self.observers.lock().insert(id, emitter.clone());

        let cell = Arc::downgrade(self);
        emitter.subscription().on_cancel(move || {
            if let Some(cell) = cell.upgrade() {
                cell.observers.lock().shift_remove(&id);
            }
        });

        emitter.next(self.get());
    }

    /// Complete and forget every observer.
    pub(crate) fn complete_all(&self) {
        let observers = std::mem::take(&mut *self.observers.lock());
        for (_, observer) in observers {
            observer.complete();
        }
    }

    /// Get the number of live observers.
    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
