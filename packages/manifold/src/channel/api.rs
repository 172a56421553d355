// the channel's public handle.

use super::{
    core::{monitor, run_dispatch, Core},
    getter::Getter,
    sender::Sender,
};
use crate::util::abort_on_drop::AbortOnDrop;
use livelist::Traversal;
use std::sync::Arc;

/// A broadcast channel.
///
/// Values sent through any attached [`Sender`] are delivered, in order, to every attached
/// [`Getter`]. Each party buffers up to `buffer_size` values privately; an internal dispatch
/// loop moves values from sender buffers into getter buffers one at a time, so a full getter
/// buffer exerts backpressure on the whole channel.
///
/// The channel handle owns the dispatch loop: dropping the handle, or calling
/// [`close`][Self::close], stops the loop and detaches every party. Parties outlive the handle
/// harmlessly; their operations fail with [`ChannelError::Closed`][super::error::ChannelError]
/// rather than hanging.
pub struct Channel<T> {
    core: Arc<Core<T>>,
    _loop_guard: AbortOnDrop,
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Create a channel whose parties each buffer up to `buffer_size` values, and spawn its
    /// dispatch loop onto the current tokio runtime.
    ///
    /// Panics if `buffer_size` is zero.
    pub fn new(buffer_size: usize) -> Self {
        assert!(buffer_size >= 1, "buffer_size must be at least 1");
        let core = Arc::new(Core::new(buffer_size));
        let dispatch = tokio::spawn(run_dispatch(core.clone()));
        let loop_abort = dispatch.abort_handle();
        let _ = core.loop_abort.set(loop_abort.clone());
        tokio::spawn(monitor(core.clone(), dispatch));
        Channel { core, _loop_guard: AbortOnDrop::new(loop_abort) }
    }

    /// Create and attach a new sender.
    pub async fn new_sender(&self) -> Sender<T> {
        let sender = Sender::new(&self.core);
        self.core.senders.push_back(sender.clone()).await;
        sender
    }

    /// Create and attach a new getter.
    pub async fn new_getter(&self) -> Getter<T> {
        self.attach_getter(false).await
    }

    /// Create and attach a new silent getter: one which takes delivery by itself in a
    /// background task, so its callbacks fire without anyone calling `get`.
    pub async fn new_silent_getter(&self) -> Getter<T> {
        self.attach_getter(true).await
    }

    async fn attach_getter(&self, silent: bool) -> Getter<T> {
        let getter = Getter::new(&self.core, silent);
        self.core.getters.push_back(getter.clone()).await;
        if silent {
            getter.spawn_silent_loop();
        }
        getter
    }

    /// Stop the dispatch loop and detach every party. Suspended sends and gets resolve to the
    /// closed error. Idempotent.
    pub fn close(&self) {
        if let Some(abort) = self.core.loop_abort.get() {
            abort.abort();
        }
    }

    /// Take values directly out of sender buffers, bypassing broadcast.
    ///
    /// Each [`Drain::next`] makes one pass over the sender roster and takes the first value it
    /// finds buffered. While the dispatch loop is running it competes for the same values;
    /// close the channel first for a deterministic drain.
    pub fn drain(&self) -> Drain<T> {
        Drain { senders: self.core.senders.traverse() }
    }

    #[cfg(test)]
    pub(crate) fn trip(&self, error: anyhow::Error) {
        self.core.trip(error);
    }
}

/// Takes buffered values directly out of a channel's senders. Constructed by
/// [`Channel::drain`].
pub struct Drain<T> {
    senders: Traversal<Sender<T>>,
}

impl<T: Clone + Send + 'static> Drain<T> {
    /// The next buffered value, scanning senders in attach order from wherever the previous
    /// call left off. `None` once the roster is exhausted with nothing found.
    pub async fn next(&mut self) -> Option<T> {
        while let Some(sender) = self.senders.next().await {
            if let Some(value) = sender.queue().try_get() {
                return Some(value);
            }
        }
        None
    }

    /// Adapt into a [`futures::Stream`].
    #[cfg(feature = "futures")]
    pub fn into_stream(self) -> impl futures::Stream<Item = T> {
        futures::stream::unfold(self, |mut drain| async move {
            drain.next().await.map(|value| (value, drain))
        })
    }
}
