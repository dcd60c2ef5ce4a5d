//! Side Effect Implementation
//!
//! A SideEffect is a cold description of work that, once subscribed, emits
//! zero or more values and then terminates with either completion or a
//! failure.
//!
//! # How Side Effects Work
//!
//! 1. A side effect wraps a producer: a one-shot function that receives an
//!    [`Emitter`] and pushes events into it, now or later, from any thread.
//!
//! 2. Subscribing consumes the side effect and runs the producer exactly once.
//!
//! 3. Operators (`map`, `catch`, ...) build a new producer that subscribes
//!    the upstream effect on the same subscription and rewrites its events.
//!
//! # Failure Types
//!
//! The failure channel is a type parameter. `SideEffect<O, Infallible>`
//! cannot fail, and the compiler proves it: the `Failed` arm of its events
//! carries an uninhabited value.

use std::convert::Infallible;
use std::fmt;

use super::emitter::{Emitter, Event};
use super::subscription::Subscription;

type Producer<O, F> = Box<dyn FnOnce(Emitter<O, F>) + Send>;

/// A composable producer of `O` values that may fail with `F`.
///
/// # Example
///
/// ```rust,ignore
/// let effect = SideEffect::<i32, String>::just(1)
///     .map(|n| n * 10)
///     .catch_and_return(0);
///
/// let subscription = effect.subscribe(|event| println!("{event:?}"));
/// // Prints: Next(10), Completed
/// ```
#[must_use = "side effects do nothing unless subscribed"]
pub struct SideEffect<O, F> {
    producer: Producer<O, F>,
}

impl<O, F> SideEffect<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    /// Create a side effect from a producer function.
    ///
    /// The producer runs once per subscription and may hand the emitter off
    /// to other threads or callbacks.
    pub fn new<P>(producer: P) -> Self
    where
        P: FnOnce(Emitter<O, F>) + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
        }
    }

    /// Emit nothing and complete immediately.
    pub fn none() -> Self {
        Self::new(|emitter| emitter.complete())
    }

    /// Emit exactly `value`, then complete.
    pub fn just(value: O) -> Self {
        Self::new(move |emitter| {
            emitter.next(value);
            emitter.complete();
        })
    }

    /// Terminate immediately with `error`.
    pub fn fail(error: F) -> Self {
        Self::new(move |emitter| emitter.fail(error))
    }

    /// Wrap a single callback-driven result.
    ///
    /// `resolver` is invoked once, at subscription time, with a [`Promise`]
    /// that it must eventually resolve. A promise that is dropped unresolved
    /// leaves the effect pending forever.
    pub fn future<R>(resolver: R) -> Self
    where
        R: FnOnce(Promise<O, F>) + Send + 'static,
    {
        Self::new(move |emitter| resolver(Promise { emitter }))
    }

    /// Subscribe with an observer, returning a handle that can cancel it.
    ///
    /// Synchronous effects deliver all of their events before this returns.
    pub fn subscribe<Obs>(self, observer: Obs) -> Subscription
    where
        Obs: FnMut(Event<O, F>) + Send + 'static,
    {
        let subscription = Subscription::new();
        self.subscribe_on(&subscription, observer);
        subscription
    }

    /// Subscribe using an existing subscription for cancellation.
    pub fn subscribe_on<Obs>(self, subscription: &Subscription, observer: Obs)
    where
        Obs: FnMut(Event<O, F>) + Send + 'static,
    {
        let emitter = Emitter::new(subscription.clone(), Box::new(observer));
        (self.producer)(emitter);
    }

    /// Transform every emitted value.
    pub fn map<T, M>(self, transform: M) -> SideEffect<T, F>
    where
        T: Send + 'static,
        M: FnMut(O) -> T + Send + 'static,
    {
        let mut transform = transform;
        SideEffect::new(move |downstream: Emitter<T, F>| {
            let subscription = downstream.subscription().clone();
            self.subscribe_on(&subscription, move |event| match event {
                Event::Next(value) => downstream.next(transform(value)),
                Event::Completed => downstream.complete(),
                Event::Failed(error) => downstream.fail(error),
            });
        })
    }

    /// Transform the failure value.
    pub fn map_err<E, M>(self, transform: M) -> SideEffect<O, E>
    where
        E: Send + 'static,
        M: FnOnce(F) -> E + Send + 'static,
    {
        let mut transform = Some(transform);
        SideEffect::new(move |downstream: Emitter<O, E>| {
            let subscription = downstream.subscription().clone();
            self.subscribe_on(&subscription, move |event| match event {
                Event::Next(value) => downstream.next(value),
                Event::Completed => downstream.complete(),
                Event::Failed(error) => {
                    if let Some(transform) = transform.take() {
                        downstream.fail(transform(error));
                    }
                }
            });
        })
    }

    /// Replace the remainder of a failed effect with the effect `handler`
    /// returns for the failure.
    pub fn catch<E, H>(self, handler: H) -> SideEffect<O, E>
    where
        E: Send + 'static,
        H: FnOnce(F) -> SideEffect<O, E> + Send + 'static,
    {
        let mut handler = Some(handler);
        SideEffect::new(move |downstream: Emitter<O, E>| {
            let subscription = downstream.subscription().clone();
            self.subscribe_on(&subscription.clone(), move |event| match event {
                Event::Next(value) => downstream.next(value),
                Event::Completed => downstream.complete(),
                Event::Failed(error) => {
                    if let Some(handler) = handler.take() {
                        let forward = downstream.clone();
                        handler(error)
                            .subscribe_on(&subscription, move |event| forward.send(event));
                    }
                }
            });
        })
    }

    /// On failure, emit `transform(failure)` and complete.
    pub fn catch_map<M>(self, transform: M) -> SideEffect<O, Infallible>
    where
        M: FnOnce(F) -> O + Send + 'static,
    {
        self.catch(move |error| SideEffect::just(transform(error)))
    }

    /// On failure, complete silently.
    pub fn catch_to_never(self) -> SideEffect<O, Infallible> {
        self.catch(|_| SideEffect::none())
    }

    /// On failure, emit `value` and complete.
    pub fn catch_and_return(self, value: O) -> SideEffect<O, Infallible> {
        self.catch_map(move |_| value)
    }
}

impl<O> SideEffect<O, Infallible>
where
    O: Send + 'static,
{
    /// Widen a non-failing effect to any failure type.
    pub fn set_failure_type<F>(self) -> SideEffect<O, F>
    where
        F: Send + 'static,
    {
        self.map_err(|never| match never {})
    }
}

impl<O, F> fmt::Debug for SideEffect<O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffect").finish_non_exhaustive()
    }
}

/// The one-shot callback handed to a [`SideEffect::future`] resolver.
pub struct Promise<O, F> {
    emitter: Emitter<O, F>,
}

impl<O, F> Promise<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    /// Report the result: a value followed by completion, or a failure.
    pub fn resolve(self, result: Result<O, F>) {
        match result {
            Ok(value) => {
                self.emitter.next(value);
                self.emitter.complete();
            }
            Err(error) => self.emitter.fail(error),
        }
    }

    /// Check if the subscriber has gone away.
    pub fn is_cancelled(&self) -> bool {
        self.emitter.subscription().is_cancelled()
    }
}

impl<O, F> fmt::Debug for Promise<O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("emitter", &self.emitter)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
