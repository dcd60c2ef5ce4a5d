//! Side Effects
//!
//! This module implements the composable side-effect abstraction that every
//! store mutation flows through.
//!
//! # Concepts
//!
//! ## Side Effects
//!
//! A [`SideEffect<O, F>`] is a cold producer of `O` values. Nothing happens
//! until it is subscribed. Once subscribed it emits zero or more values and
//! then either completes or fails with an `F`. A constant, a callback, a
//! concurrent fan-in and a long-running background task all expose the same
//! three events, so consumers never special-case the shape of the work.
//!
//! ## Subscriptions
//!
//! Subscribing returns a [`Subscription`]. Cancelling it stops delivery
//! immediately and runs any teardown the producer registered, such as
//! aborting a spawned task. Cancellation is never reported as a failure.
//!
//! ## Composition
//!
//! - `none`, `just`, `fail`, `future` build effects from immediate values or
//!   callbacks.
//! - `spawn` and `try_spawn` run async operations on an [`Executor`].
//! - `merge` and `concat` combine effects concurrently or sequentially.
//! - `map`, `map_err` and the `catch` family transform values and failures.
//!   The catch family is how a fallible effect becomes a
//!   `SideEffect<O, Infallible>`.

mod compose;
mod emitter;
mod side_effect;
mod stream;
mod subscription;
mod task;

pub use compose::MergePolicy;
pub use emitter::{Emitter, Event};
pub use side_effect::{Promise, SideEffect};
pub use stream::EffectStream;
pub use subscription::{Subscription, SubscriptionGuard, SubscriptionId};
pub use task::{Executor, Priority, TaskHandle, TokioExecutor};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{Event, SideEffect, Subscription};

    pub(crate) type Recorded<O, F> = Arc<Mutex<Vec<Event<O, F>>>>;

    /// Subscribe and record every delivered event.
    pub(crate) fn record<O, F>(effect: SideEffect<O, F>) -> (Recorded<O, F>, Subscription)
    where
        O: Send + 'static,
        F: Send + 'static,
    {
        let events: Recorded<O, F> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = effect.subscribe(move |event| sink.lock().push(event));
        (events, subscription)
    }
}
