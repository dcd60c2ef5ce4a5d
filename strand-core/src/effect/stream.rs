//! Adapting side effects to async streams.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use super::emitter::Event;
use super::side_effect::SideEffect;
use super::subscription::SubscriptionGuard;

/// A side effect observed as a [`Stream`].
///
/// Yields `Ok` for each value and a final `Err` if the effect fails, then
/// ends. Dropping the stream cancels the underlying subscription.
#[derive(Debug)]
pub struct EffectStream<O, F> {
    receiver: mpsc::UnboundedReceiver<Event<O, F>>,
    guard: SubscriptionGuard,
    finished: bool,
}

impl<O, F> EffectStream<O, F> {
    /// Check if the stream has seen its terminal event.
    pub fn is_finished(&self) -> bool {
        self.finished || self.guard.subscription().is_cancelled()
    }
}

impl<O, F> Stream for EffectStream<O, F> {
    type Item = Result<O, F>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.receiver.poll_recv(cx)) {
            Some(Event::Next(value)) => Poll::Ready(Some(Ok(value))),
            Some(Event::Failed(error)) => {
                this.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Some(Event::Completed) | None => {
                this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<O, F> SideEffect<O, F>
where
    O: Send + 'static,
    F: Send + 'static,
{
    /// Subscribe and observe the events as a [`Stream`].
    pub fn into_stream(self) -> EffectStream<O, F> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            // The stream may already be gone; the guard cancels us shortly.
            let _ = sender.send(event);
        });

        EffectStream {
            receiver,
            guard: subscription.guard(),
            finished: false,
        }
    }
}
