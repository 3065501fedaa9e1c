//! Cancellable push subscriptions.
//!
//! A backend exposes a live listener as a [`Subscription`]: a [`Stream`] that opens the
//! listener when it is first polled and releases it exactly once, whichever way the consumer
//! stops. The backend side receives a [`SubscriptionSink`] to push events into and hands back
//! a [`ListenerRegistration`] that knows how to unsubscribe.
//!
//! ```ignore
//! Subscription::new(move |sink| async move {
//!     let id = registry.insert(sink);
//!     Ok(ListenerRegistration::new(move || registry.remove(id)))
//! })
//! ```

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    FutureExt, Stream, StreamExt,
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    future::BoxFuture,
};

use crate::error::{ModelError, ModelResult};

/// Handle that unsubscribes a backend listener when released.
///
/// The unsubscribe callback runs at most once: on [`remove`](Self::remove) or on drop.
pub struct ListenerRegistration {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A registration with nothing to release.
    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }

    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// The producing half of a subscription, held by the backend listener.
pub struct SubscriptionSink<T> {
    sender: UnboundedSender<ModelResult<T>>,
}

impl<T> SubscriptionSink<T> {
    /// Pushes an event. Returns `false` once the consumer has gone away.
    pub fn next(&self, item: T) -> bool {
        self.sender.unbounded_send(Ok(item)).is_ok()
    }

    /// Pushes a terminal error.
    pub fn error(&self, err: ModelError) -> bool {
        self.sender.unbounded_send(Err(err)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> Clone for SubscriptionSink<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for SubscriptionSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Opener<T> =
    Box<dyn FnOnce(SubscriptionSink<T>) -> BoxFuture<'static, ModelResult<ListenerRegistration>> + Send>;

enum State<T> {
    Idle(Opener<T>),
    Opening {
        receiver: UnboundedReceiver<ModelResult<T>>,
        opening: BoxFuture<'static, ModelResult<ListenerRegistration>>,
    },
    Listening {
        receiver: UnboundedReceiver<ModelResult<T>>,
        registration: ListenerRegistration,
    },
    Failed(ModelError),
    Closed,
}

/// A lazily opened, cancellable sequence of backend events.
///
/// The stream ends after the first error it yields. Dropping it, calling
/// [`close`](Self::close), reaching the end of the backend's events or yielding an error all
/// release the listener, and the listener is released exactly once.
pub struct Subscription<T> {
    state: State<T>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Creates a subscription whose listener is opened by `open` on first poll.
    pub fn new<F, Fut>(open: F) -> Self
    where
        F: FnOnce(SubscriptionSink<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ModelResult<ListenerRegistration>> + Send + 'static,
    {
        Self {
            state: State::Idle(Box::new(move |sink| open(sink).boxed())),
        }
    }

    /// A subscription that yields `err` once and ends.
    pub fn failed(err: ModelError) -> Self {
        Self {
            state: State::Failed(err),
        }
    }
}

impl<T> Subscription<T> {
    /// Whether the backend listener is currently registered.
    pub fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening { .. })
    }

    /// Releases the listener now. Further polls yield nothing.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Stream for Subscription<T> {
    type Item = ModelResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Closed) {
                State::Idle(open) => {
                    let (sender, receiver) = mpsc::unbounded();
                    let opening = open(SubscriptionSink { sender });
                    this.state = State::Opening { receiver, opening };
                }
                State::Opening {
                    receiver,
                    mut opening,
                } => match opening.poll_unpin(cx) {
                    Poll::Pending => {
                        this.state = State::Opening { receiver, opening };
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(registration)) => {
                        this.state = State::Listening {
                            receiver,
                            registration,
                        };
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err))),
                },
                State::Listening {
                    mut receiver,
                    registration,
                } => match receiver.poll_next_unpin(cx) {
                    Poll::Pending => {
                        this.state = State::Listening {
                            receiver,
                            registration,
                        };
                        return Poll::Pending;
                    }
                    Poll::Ready(Some(Ok(item))) => {
                        this.state = State::Listening {
                            receiver,
                            registration,
                        };
                        return Poll::Ready(Some(Ok(item)));
                    }
                    Poll::Ready(Some(Err(err))) => {
                        registration.remove();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        registration.remove();
                        return Poll::Ready(None);
                    }
                },
                State::Failed(err) => return Poll::Ready(Some(Err(err))),
                State::Closed => return Poll::Ready(None),
            }
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Opening { .. } => "opening",
            State::Listening { .. } => "listening",
            State::Failed(_) => "failed",
            State::Closed => "closed",
        };
        f.debug_struct("Subscription").field("state", &state).finish()
    }
}
