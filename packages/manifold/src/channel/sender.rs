// sending half of a channel attachment.

use super::{core::Core, error::ChannelError, queue::Queue};
use std::{
    panic::resume_unwind,
    sync::{Arc, Mutex, Weak},
};
use tokio::task::AbortHandle;

/// Handle for sending values into a channel.
///
/// Each sender carries its own bounded buffer. `send` completes as soon as the value is
/// buffered; the channel's dispatch loop drains the buffer and broadcasts each value to every
/// attached getter. Clones of a sender are the same sender: they share the buffer and compare
/// equal.
pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    channel: Weak<Core<T>>,
    queue: Queue<T>,
    // the in-flight enqueue issued by send(), abortable by detach.
    pending_self: Mutex<Option<AbortHandle>>,
    // the dispatch loop's in-flight dequeue from this sender, abortable by detach.
    pending_channel: Mutex<Option<AbortHandle>>,
}

impl<T: Clone + Send + 'static> Sender<T> {
    pub(crate) fn new(core: &Arc<Core<T>>) -> Self {
        Sender {
            inner: Arc::new(Inner {
                channel: Arc::downgrade(core),
                queue: Queue::bounded(core.buffer_size),
                pending_self: Mutex::new(None),
                pending_channel: Mutex::new(None),
            }),
        }
    }

    /// Send a value into the channel.
    ///
    /// Suspends while this sender's buffer is full. Errors if the channel has stopped, with the
    /// fault that stopped it if there was one, or if this sender is detached while the send is
    /// suspended.
    pub async fn send(&self, value: T) -> Result<(), ChannelError> {
        let Some(core) = self.inner.channel.upgrade() else {
            return Err(ChannelError::closed(None));
        };
        if core.is_stopped() {
            return Err(core.closed_error());
        }

        let queue = self.inner.queue.clone();
        let enqueue = tokio::spawn(async move { queue.put(value).await });
        *self.inner.pending_self.lock().unwrap() = Some(enqueue.abort_handle());
        match enqueue.await {
            Ok(()) => {}
            Err(join) if join.is_cancelled() => {
                return Err(if core.is_stopped() {
                    core.closed_error()
                } else {
                    ChannelError::Cancelled
                });
            }
            Err(join) => resume_unwind(join.into_panic()),
        }

        if core.is_stopped() {
            return Err(core.closed_error());
        }
        Ok(())
    }

    /// Whether this sender is currently on its channel's roster.
    pub fn is_attached(&self) -> bool {
        self.inner
            .channel
            .upgrade()
            .is_some_and(|core| core.senders.contains(self))
    }

    /// Re-attach a detached sender to its channel. No-op if already attached or if the channel
    /// has been dropped.
    pub async fn attach(&self) {
        let Some(core) = self.inner.channel.upgrade() else { return };
        if !core.senders.contains(self) {
            core.senders.push_back(self.clone()).await;
        }
    }

    /// Detach this sender from its channel, cancelling any suspended send and any in-progress
    /// pickup by the dispatch loop. Values already buffered stay in this sender's queue.
    pub async fn detach(&self) {
        let Some(core) = self.inner.channel.upgrade() else { return };
        if core.senders.contains(self) {
            self.abort_pending();
            core.senders.remove_first_equal(self.clone()).await;
        }
    }

    fn abort_pending(&self) {
        if let Some(op) = self.inner.pending_self.lock().unwrap().take() {
            op.abort();
        }
        if let Some(op) = self.inner.pending_channel.lock().unwrap().take() {
            op.abort();
        }
    }

    pub(crate) fn queue(&self) -> &Queue<T> {
        &self.inner.queue
    }

    pub(crate) fn set_pending_channel(&self, op: AbortHandle) {
        *self.inner.pending_channel.lock().unwrap() = Some(op);
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender { inner: self.inner.clone() }
    }
}

impl<T> PartialEq for Sender<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Sender<T> {}
