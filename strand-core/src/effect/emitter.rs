//! Emitter Implementation
//!
//! An Emitter is the downstream end of one subscription: producers push
//! events into it and it forwards them to the observer.
//!
//! # Delivery Rules
//!
//! 1. At most one terminal event (completed or failed) is ever delivered.
//!    Anything pushed after it is dropped.
//!
//! 2. Once the subscription is cancelled, nothing more is delivered.
//!
//! 3. Events are delivered one at a time, in push order, even when several
//!    threads push concurrently.
//!
//! # Reentrancy
//!
//! Pushing into an emitter from inside its own observer does not deadlock.
//! Events are queued, and whichever caller is already draining the queue
//! delivers them after the current observer call returns.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::subscription::Subscription;

/// One observable event of a side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<O, F> {
    /// A value was emitted.
    Next(O),

    /// The effect finished without error.
    Completed,

    /// The effect terminated with a failure.
    Failed(F),
}

impl<O, F> Event<O, F> {
    /// Check if this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Next(_))
    }
}

pub(crate) type Observer<O, F> = Box<dyn FnMut(Event<O, F>) + Send>;

struct Queue<O, F> {
    pending: VecDeque<Event<O, F>>,
    draining: bool,
    terminated: bool,
}

struct EmitterInner<O, F> {
    subscription: Subscription,
    queue: Mutex<Queue<O, F>>,
    /// Only locked by the thread currently draining.
    observer: Mutex<Option<Observer<O, F>>>,
}

/// The sink a side effect's producer pushes events into.
///
/// Cloning an emitter yields another handle to the same sink.
pub struct Emitter<O, F> {
    inner: Arc<EmitterInner<O, F>>,
}

impl<O, F> Clone for Emitter<O, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O, F> Emitter<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    pub(crate) fn new(subscription: Subscription, observer: Observer<O, F>) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                subscription,
                queue: Mutex::new(Queue {
                    pending: VecDeque::new(),
                    draining: false,
                    terminated: false,
                }),
                observer: Mutex::new(Some(observer)),
            }),
        }
    }

    /// Get the subscription this emitter delivers for.
    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// Check if further events would be dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.subscription.is_cancelled() || self.inner.queue.lock().terminated
    }

    /// Emit a value.
    pub fn next(&self, value: O) {
        self.send(Event::Next(value));
    }

    /// Complete successfully.
    pub fn complete(&self) {
        self.send(Event::Completed);
    }

    /// Terminate with a failure.
    pub fn fail(&self, error: F) {
        self.send(Event::Failed(error));
    }

    /// Push an event of any kind.
    pub fn send(&self, event: Event<O, F>) {
        if self.inner.subscription.is_cancelled() {
            return;
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.terminated {
                return;
            }
            queue.terminated = event.is_terminal();
            queue.pending.push_back(event);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        self.drain();
    }

    fn drain(&self) {
        loop {
            let event = {
                let mut queue = self.inner.queue.lock();
                if self.inner.subscription.is_cancelled() {
                    queue.pending.clear();
                    queue.draining = false;
                    drop(queue);
                    self.inner.observer.lock().take();
                    return;
                }
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };

            let mut slot = self.inner.observer.lock();
            if event.is_terminal() {
                // Release the observer once it has seen the end of the stream.
                let observer = slot.take();
                drop(slot);
                if let Some(mut observer) = observer {
                    observer(event);
                }
            } else if let Some(observer) = slot.as_mut() {
                observer(event);
            }
        }
    }
}

impl<O, F> fmt::Debug for Emitter<O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscription", &self.inner.subscription)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
