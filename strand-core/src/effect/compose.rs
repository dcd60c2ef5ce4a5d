//! Composition of side effects.
//!
//! `merge` runs effects side by side and interleaves their values by arrival
//! time. `concat` runs them one after another. Both complete once every
//! member has completed, and both stop at the first failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::emitter::{Emitter, Event};
use super::side_effect::SideEffect;

/// What happens to the other members of a merge when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Forward the failure; siblings keep running in the background and
    /// their later events are dropped.
    #[default]
    ForwardFailure,

    /// Forward the failure, then cancel every sibling.
    CancelSiblings,
}

impl<O, F> SideEffect<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    /// Run all effects concurrently with [`MergePolicy::ForwardFailure`].
    pub fn merge<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::merge_with(MergePolicy::default(), effects)
    }

    /// Run all effects concurrently.
    ///
    /// Values are forwarded as they arrive; each member's own order is kept.
    /// Completes after the last member completes. An empty merge completes
    /// immediately.
    pub fn merge_with<I>(policy: MergePolicy, effects: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let effects: Vec<Self> = effects.into_iter().collect();

        Self::new(move |downstream: Emitter<O, F>| {
            if effects.is_empty() {
                downstream.complete();
                return;
            }

            let remaining = Arc::new(AtomicUsize::new(effects.len()));
            let siblings = downstream.subscription().child();

            for effect in effects {
                if siblings.is_cancelled() {
                    break;
                }

                let downstream = downstream.clone();
                let remaining = Arc::clone(&remaining);
                let group = siblings.clone();

                effect.subscribe_on(&siblings, move |event| match event {
                    Event::Next(value) => downstream.next(value),
                    Event::Completed => {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            downstream.complete();
                        }
                    }
                    Event::Failed(error) => {
                        downstream.fail(error);
                        if policy == MergePolicy::CancelSiblings {
                            group.cancel();
                        }
                    }
                });
            }
        })
    }

    /// Run effects strictly in sequence.
    ///
    /// Each effect is subscribed only after the previous one completes. A
    /// failure ends the chain without subscribing the rest.
    pub fn concat<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let remaining: VecDeque<Self> = effects.into_iter().collect();

        Self::new(move |downstream| {
            let chain = Arc::new(Chain {
                state: Mutex::new(ChainState {
                    remaining,
                    running: false,
                    advance: false,
                }),
            });
            subscribe_next(chain, downstream);
        })
    }
}

/// Shared progress of one `concat` subscription.
struct Chain<O, F> {
    state: Mutex<ChainState<O, F>>,
}

struct ChainState<O, F> {
    remaining: VecDeque<SideEffect<O, F>>,
    /// A caller is inside the subscribe loop below.
    running: bool,
    /// The member subscribed last has completed.
    advance: bool,
}

/// Subscribe the next member of a chain.
///
/// A member that completes while it is still being subscribed only flags
/// `advance`; the loop already on the stack picks up the next member. Long
/// chains of synchronous members therefore run in constant stack depth.
fn subscribe_next<O, F>(chain: Arc<Chain<O, F>>, downstream: Emitter<O, F>)
where
    O: Send + 'static,
    F: Send + 'static,
{
    {
        let mut state = chain.state.lock();
        if state.running {
            state.advance = true;
            return;
        }
        state.running = true;
    }

    loop {
        let next = {
            let mut state = chain.state.lock();
            if downstream.subscription().is_cancelled() {
                state.running = false;
                return;
            }
            state.advance = false;
            let next = state.remaining.pop_front();
            if next.is_none() {
                state.running = false;
            }
            next
        };
        let Some(effect) = next else {
            downstream.complete();
            return;
        };

        let subscription = downstream.subscription().clone();
        let member_chain = Arc::clone(&chain);
        let member_downstream = downstream.clone();
        effect.subscribe_on(&subscription, move |event| match event {
            Event::Next(value) => member_downstream.next(value),
            Event::Completed => {
                subscribe_next(Arc::clone(&member_chain), member_downstream.clone())
            }
            Event::Failed(error) => member_downstream.fail(error),
        });

        let mut state = chain.state.lock();
        if !state.advance {
            state.running = false;
            return;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::testing::record;
    use crate::effect::{Priority, Promise, TokioExecutor};
    use std::convert::Infallible;
    use std::sync::atomic::AtomicBool;

    type Slot<O, F> = Arc<Mutex<Option<Promise<O, F>>>>;

    /// A future effect whose promise is parked in a slot for the test to
    /// resolve later.
    fn pending<O, F>() -> (SideEffect<O, F>, Slot<O, F>)
    where
        O: Send + 'static,
        F: Send + 'static,
    {
        let slot: Slot<O, F> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let effect = SideEffect::future(move |promise| {
            *slot_clone.lock() = Some(promise);
        });
        (effect, slot)
    }

    fn resolve<O, F>(slot: &Slot<O, F>, result: Result<O, F>)
    where
        O: Send + 'static,
        F: Send + 'static,
    {
        let promise = slot.lock().take().expect("promise not yet parked");
        promise.resolve(result);
    }

    #[test]
    fn empty_merge_and_concat_complete() {
        let (events, _) = record(SideEffect::<i32, Infallible>::merge(Vec::new()));
        assert_eq!(*events.lock(), vec![Event::Completed]);

        let (events, _) = record(SideEffect::<i32, Infallible>::concat(Vec::new()));
        assert_eq!(*events.lock(), vec![Event::Completed]);
    }

    #[test]
    fn merge_waits_for_every_member() {
        let (a, a_slot) = pending::<&str, Infallible>();
        let (b, b_slot) = pending::<&str, Infallible>();

        let (events, _) = record(SideEffect::merge([a, b]));
        assert!(events.lock().is_empty());

        resolve(&b_slot, Ok("b"));
        assert_eq!(*events.lock(), vec![Event::Next("b")]);

        resolve(&a_slot, Ok("a"));
        assert_eq!(
            *events.lock(),
            vec![Event::Next("b"), Event::Next("a"), Event::Completed]
        );
    }

    #[test]
    fn merge_preserves_each_members_order() {
        let a = SideEffect::<i32, Infallible>::concat([
            SideEffect::just(1),
            SideEffect::just(2),
            SideEffect::just(3),
        ]);
        let (b, b_slot) = pending::<i32, Infallible>();

        let (events, _) = record(SideEffect::merge([a, b]));
        resolve(&b_slot, Ok(10));

        let values: Vec<i32> = events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Next(value) => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3, 10]);
        assert_eq!(events.lock().last(), Some(&Event::Completed));
    }

    #[test]
    fn merge_forwards_failure_without_cancelling_siblings() {
        let (sibling, sibling_slot) = pending::<i32, &str>();

        let (events, _) = record(SideEffect::merge([sibling, SideEffect::fail("boom")]));
        assert_eq!(*events.lock(), vec![Event::Failed("boom")]);

        // The sibling is still live, but anything it emits is dropped.
        let promise = sibling_slot.lock().take().unwrap();
        assert!(!promise.is_cancelled());
        promise.resolve(Ok(1));
        assert_eq!(*events.lock(), vec![Event::Failed("boom")]);
    }

    #[test]
    fn merge_can_cancel_siblings_on_failure() {
        let (sibling, sibling_slot) = pending::<i32, &str>();

        let effect = SideEffect::merge_with(
            MergePolicy::CancelSiblings,
            [sibling, SideEffect::fail("boom")],
        );
        let (events, subscription) = record(effect);

        assert_eq!(*events.lock(), vec![Event::Failed("boom")]);
        assert!(sibling_slot.lock().as_ref().unwrap().is_cancelled());
        assert!(!subscription.is_cancelled());
    }

    #[test]
    fn cancelling_a_merge_cancels_its_members() {
        let (a, a_slot) = pending::<i32, Infallible>();
        let (b, b_slot) = pending::<i32, Infallible>();

        let (events, subscription) = record(SideEffect::merge([a, b]));
        subscription.cancel();

        assert!(a_slot.lock().as_ref().unwrap().is_cancelled());
        assert!(b_slot.lock().as_ref().unwrap().is_cancelled());
        assert!(events.lock().is_empty());
    }

    #[test]
    fn concat_starts_next_only_after_previous_completes() {
        let (a, a_slot) = pending::<&str, Infallible>();
        let started = Arc::new(AtomicBool::new(false));
        let started_clone = started.clone();
        let b = SideEffect::new(move |emitter| {
            started_clone.store(true, Ordering::SeqCst);
            emitter.next("b");
            emitter.complete();
        });

        let (events, _) = record(SideEffect::concat([a, b]));
        assert!(!started.load(Ordering::SeqCst));
        assert!(events.lock().is_empty());

        resolve(&a_slot, Ok("a"));
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(
            *events.lock(),
            vec![Event::Next("a"), Event::Next("b"), Event::Completed]
        );
    }

    #[test]
    fn concat_failure_skips_the_rest() {
        let started = Arc::new(AtomicBool::new(false));
        let started_clone = started.clone();
        let tail = SideEffect::<i32, &str>::future(move |promise| {
            started_clone.store(true, Ordering::SeqCst);
            promise.resolve(Ok(2));
        });

        let effect = SideEffect::concat([SideEffect::just(1), SideEffect::fail("boom"), tail]);
        let (events, _) = record(effect);

        assert_eq!(*events.lock(), vec![Event::Next(1), Event::Failed("boom")]);
        assert!(!started.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_concat_does_not_start_the_next_member() {
        let (a, a_slot) = pending::<i32, Infallible>();
        let started = Arc::new(AtomicBool::new(false));
        let started_clone = started.clone();
        let b = SideEffect::<i32, Infallible>::new(move |emitter| {
            started_clone.store(true, Ordering::SeqCst);
            emitter.complete();
        });

        let (events, subscription) = record(SideEffect::concat([a, b]));
        subscription.cancel();
        resolve(&a_slot, Ok(1));

        assert!(!started.load(Ordering::SeqCst));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn long_synchronous_concat_runs_to_completion() {
        const MEMBERS: usize = 10_000;

        let members = (0..MEMBERS).map(SideEffect::just);
        let effect = SideEffect::<usize, Infallible>::concat(members);
        let (events, _) = record(effect);

        let events = events.lock();
        assert_eq!(events.len(), MEMBERS + 1);
        assert_eq!(events[0], Event::Next(0));
        assert_eq!(events[MEMBERS - 1], Event::Next(MEMBERS - 1));
        assert_eq!(events[MEMBERS], Event::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn merge_of_concurrent_sources_keeps_each_sources_order() {
        const SOURCES: usize = 4;
        const STEPS: usize = 50;

        let executor = Arc::new(TokioExecutor::current().unwrap());
        let sources = (0..SOURCES).map(|source| {
            SideEffect::concat((0..STEPS).map(|step| {
                SideEffect::spawn(&executor, Priority::default(), move || async move {
                    tokio::task::yield_now().await;
                    (source, step)
                })
            }))
        });

        let events: Arc<Mutex<Vec<Event<(usize, usize), Infallible>>>> = Arc::default();
        let sink = events.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut done_tx = Some(done_tx);
        let _subscription = SideEffect::merge(sources).subscribe(move |event| {
            let terminal = event.is_terminal();
            sink.lock().push(event);
            if terminal {
                if let Some(done) = done_tx.take() {
                    let _ = done.send(());
                }
            }
        });

        done_rx.await.unwrap();

        let events = events.lock();
        assert_eq!(events.len(), SOURCES * STEPS + 1);
        assert_eq!(events.last(), Some(&Event::Completed));

        let mut next_step = [0; SOURCES];
        for event in &events[..SOURCES * STEPS] {
            let Event::Next((source, step)) = event else {
                panic!("unexpected event {event:?}");
            };
            assert_eq!(*step, next_step[*source]);
            next_step[*source] += 1;
        }
        assert_eq!(next_step, [STEPS; SOURCES]);
    }
}
