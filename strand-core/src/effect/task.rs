//! Asynchronous Side Effects
//!
//! `spawn` and `try_spawn` run an async operation on an [`Executor`] and
//! emit its result.
//!
//! # Cancellation
//!
//! Cancellation is cooperative and checked twice:
//!
//! 1. Before the operation starts. A cancelled task never calls it.
//!
//! 2. After the operation finishes, before its result is emitted. A task
//!    cancelled mid-flight never delivers a stale value.
//!
//! In both cases the effect ends with silent completion, never a failure.
//! Cancelling the subscription also aborts the spawned task through the
//! [`TaskHandle`] the executor returned.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::Instrument;

use super::emitter::Emitter;
use super::side_effect::SideEffect;
use crate::error::{Error, Result};

/// Scheduling hint passed to the executor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Background,
    Low,
    #[default]
    Medium,
    High,
    UserInitiated,
}

/// Handle to a task scheduled on an [`Executor`].
pub struct TaskHandle {
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskHandle {
    /// Create a handle that runs `abort` when the task should stop.
    pub fn new<A>(abort: A) -> Self
    where
        A: FnOnce() + Send + 'static,
    {
        Self {
            abort: Some(Box::new(abort)),
        }
    }

    /// A handle for a task that cannot be aborted.
    pub fn detached() -> Self {
        Self { abort: None }
    }

    /// Ask the executor to stop the task.
    pub fn abort(mut self) {
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("abortable", &self.abort.is_some())
            .finish()
    }
}

/// Something that can run futures to completion off the calling context.
pub trait Executor: Send + Sync {
    /// Schedule `task`, returning a handle that can abort it.
    fn spawn(&self, priority: Priority, task: BoxFuture<'static, ()>) -> TaskHandle;
}

/// Executor backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, priority: Priority, task: BoxFuture<'static, ()>) -> TaskHandle {
        tracing::debug!(?priority, "scheduling task");
        let span = tracing::debug_span!("strand_task", ?priority);
        let join = self.handle.spawn(task.instrument(span));
        TaskHandle::new(move || join.abort())
    }
}

impl<O> SideEffect<O, std::convert::Infallible>
where
    O: Send + 'static,
{
    /// Run `operation` on `executor` and emit its output.
    ///
    /// This effect cannot fail.
    pub fn spawn<E, Op, Fut>(executor: &Arc<E>, priority: Priority, operation: Op) -> Self
    where
        E: Executor + ?Sized + 'static,
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let executor = Arc::clone(executor);
        Self::new(move |emitter: Emitter<O, std::convert::Infallible>| {
            let subscription = emitter.subscription().clone();
            let task = async move {
                if emitter.is_closed() {
                    tracing::debug!("task cancelled before start");
                    emitter.complete();
                    return;
                }
                let output = operation().await;
                if emitter.is_closed() {
                    tracing::debug!("task cancelled before delivery");
                    emitter.complete();
                    return;
                }
                emitter.next(output);
                emitter.complete();
            };

            let handle = executor.spawn(priority, Box::pin(task));
            subscription.on_cancel(move || handle.abort());
        })
    }
}

impl<O, F> SideEffect<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    /// Run a fallible `operation` on `executor`.
    ///
    /// An `Err` becomes the effect's failure. Cancellation is never reported
    /// as a failure.
    pub fn try_spawn<E, Op, Fut>(executor: &Arc<E>, priority: Priority, operation: Op) -> Self
    where
        E: Executor + ?Sized + 'static,
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<O, F>> + Send + 'static,
    {
        let executor = Arc::clone(executor);
        Self::new(move |emitter: Emitter<O, F>| {
            let subscription = emitter.subscription().clone();
            let task = async move {
                if emitter.is_closed() {
                    tracing::debug!("task cancelled before start");
                    emitter.complete();
                    return;
                }
                let result = operation().await;
                if emitter.is_closed() {
                    tracing::debug!("task cancelled before delivery");
                    emitter.complete();
                    return;
                }
                match result {
                    Ok(output) => {
                        emitter.next(output);
                        emitter.complete();
                    }
                    Err(error) => emitter.fail(error),
                }
            };

            let handle = executor.spawn(priority, Box::pin(task));
            subscription.on_cancel(move || handle.abort());
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::testing::record;
    use crate::effect::{Event, Subscription};
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Queues tasks until the test runs them. Aborting is a no-op, so only
    /// the cooperative checkpoints can stop a task.
    #[derive(Default)]
    struct ManualExecutor {
        queued: Mutex<Vec<(Priority, BoxFuture<'static, ()>)>>,
    }

    impl ManualExecutor {
        fn run_all(&self) {
            let tasks: Vec<_> = std::mem::take(&mut *self.queued.lock());
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            for (_, task) in tasks {
                runtime.block_on(task);
            }
        }
    }

    impl Executor for ManualExecutor {
        fn spawn(&self, priority: Priority, task: BoxFuture<'static, ()>) -> TaskHandle {
            self.queued.lock().push((priority, task));
            TaskHandle::detached()
        }
    }

    #[test]
    fn spawn_emits_operation_output() {
        let executor = Arc::new(ManualExecutor::default());
        let (events, _) = record(SideEffect::spawn(&executor, Priority::High, || async { 42 }));

        assert!(events.lock().is_empty());
        assert_eq!(executor.queued.lock()[0].0, Priority::High);

        executor.run_all();
        assert_eq!(*events.lock(), vec![Event::Next(42), Event::Completed]);
    }

    #[test]
    fn cancel_before_start_skips_the_operation() {
        let executor = Arc::new(ManualExecutor::default());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let effect = SideEffect::spawn(&executor, Priority::default(), move || async move {
            ran_clone.store(true, Ordering::SeqCst);
            1
        });
        let (events, subscription) = record(effect);

        subscription.cancel();
        executor.run_all();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn cancel_during_operation_drops_the_result() {
        let executor = Arc::new(ManualExecutor::default());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let effect = SideEffect::spawn(&executor, Priority::default(), move || async move {
            if let Some(subscription) = slot_clone.lock().clone() {
                subscription.cancel();
            }
            1
        });
        let (events, subscription) = record(effect);
        *slot.lock() = Some(subscription);

        executor.run_all();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn try_spawn_forwards_errors() {
        let executor = Arc::new(ManualExecutor::default());
        let effect = SideEffect::<i32, String>::try_spawn(&executor, Priority::Low, || async {
            Err("unreachable host".to_string())
        });
        let (events, _) = record(effect);

        executor.run_all();
        assert_eq!(*events.lock(), vec![Event::Failed("unreachable host".to_string())]);
    }

    #[test]
    fn try_spawn_cancelled_never_fails() {
        let executor = Arc::new(ManualExecutor::default());
        let effect = SideEffect::<i32, String>::try_spawn(&executor, Priority::Low, || async {
            Err("too late".to_string())
        });
        let (events, subscription) = record(effect);

        subscription.cancel();
        executor.run_all();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn current_requires_a_runtime() {
        assert!(matches!(TokioExecutor::current(), Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn tokio_executor_runs_operations() {
        let executor = Arc::new(TokioExecutor::current().unwrap());

        let effect = SideEffect::<_, String>::try_spawn(&executor, Priority::Medium, || async {
            Ok::<_, String>("done")
        });
        let values: Vec<_> = effect.into_stream().collect().await;

        assert_eq!(values, vec![Ok("done")]);
    }

    #[tokio::test]
    async fn cancelling_aborts_the_tokio_task() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let executor: Arc<dyn Executor> = Arc::new(TokioExecutor::current().unwrap());
        let dropped = Arc::new(AtomicBool::new(false));
        let dropped_clone = dropped.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let operation = move || async move {
            let _guard = SetOnDrop(dropped_clone);
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
        };
        let effect =
            SideEffect::<(), Infallible>::spawn(&executor, Priority::Background, operation);
        let (events, subscription) = record(effect);

        started_rx.await.unwrap();
        subscription.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(dropped.load(Ordering::SeqCst));
        assert!(events.lock().is_empty());
    }
}
