//! Real-time subscription capability.
//!
//! A [`Subscription`] is the receiving half of a backend event channel: items
//! arrive in server order as `Result<T, BackendError>`, and disposing it (via
//! [`Subscription::unsubscribe`] or drop) tells the producing side to stop.
//! Backends hold the matching [`SubscriptionSink`].
//!
//! [`spawn_listener`] turns a subscription into a running task that feeds a
//! [`SubscriptionHandler`], returning a [`ListenerHandle`] that disposes both.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BackendError;

pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Result<T, BackendError>>,
    cancel: CancellationToken,
}

/// Producer side of a [`Subscription`].
pub struct SubscriptionSink<T> {
    tx: mpsc::UnboundedSender<Result<T, BackendError>>,
    cancel: CancellationToken,
}

// Manual impl: T itself need not be Clone.
impl<T> Clone for SubscriptionSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Create a connected sink/subscription pair.
pub fn channel<T>() -> (SubscriptionSink<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        SubscriptionSink {
            tx,
            cancel: cancel.clone(),
        },
        Subscription { rx, cancel },
    )
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the source has ended or the subscription was disposed.
    pub async fn next(&mut self) -> Option<Result<T, BackendError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> SubscriptionSink<T> {
    /// Deliver an item. Returns false if the subscriber is gone.
    pub fn send(&self, item: T) -> bool {
        !self.is_closed() && self.tx.send(Ok(item)).is_ok()
    }

    /// Deliver an error to the subscriber. Returns false if the subscriber is gone.
    pub fn fail(&self, error: BackendError) -> bool {
        !self.is_closed() && self.tx.send(Err(error)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Callbacks driven by [`spawn_listener`].
#[async_trait]
pub trait SubscriptionHandler<T>: Send + Sync + 'static {
    async fn on_event(&self, item: T);
    async fn on_error(&self, error: BackendError);
}

/// Owns a running listener task. Dropping or disposing it stops the task and
/// unsubscribes.
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn dispose(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start delivering `subscription` items to `handler` on a new task.
///
/// Each item is handled to completion before the next is read, so a single
/// subscription's events are processed in server order. Errors are handed to
/// `on_error` and the listener keeps reading; it stops when the source ends or
/// the handle is disposed.
pub fn spawn_listener<T, H>(
    name: &'static str,
    mut subscription: Subscription<T>,
    handler: Arc<H>,
) -> ListenerHandle
where
    T: Send + 'static,
    H: SubscriptionHandler<T>,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => break,
                item = subscription.next() => item,
            };

            match item {
                Some(Ok(event)) => handler.on_event(event).await,
                Some(Err(e)) => {
                    warn!("{} subscription error: {}", name, e);
                    handler.on_error(e).await;
                }
                None => {
                    debug!("{} subscription ended", name);
                    break;
                }
            }
        }
        subscription.unsubscribe();
    });

    ListenerHandle { cancel, task }
}
