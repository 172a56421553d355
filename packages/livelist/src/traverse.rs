// forward traversal that tolerates concurrent structural edits.
//
// per step: wait for pending edits issued before the traversal's owner (all pending edits, for a
// standalone traversal), then under the state lock confirm the cursor slot is still live --
// recovering forward along the abandoned `next` chain if it was detached -- clone the value out,
// and yield a scheduling turn before the following step so interleaved mutations get a chance to
// run. a detached node is never yielded; a live node is only skipped if it was removed before the
// cursor reached it.

use crate::{
    state::{LEFT, RIGHT},
    Shared,
};
use std::sync::Arc;
use tokio::task::yield_now;

enum Cursor {
    Start,
    At(usize),
    Done,
}

/// Forward traversal over a [`LiveList`](crate::LiveList), safe to run while the list is edited.
///
/// Obtained from [`LiveList::traverse`](crate::LiveList::traverse). The traversal is finite: it
/// ends when the cursor reaches the end of the chain, even if nodes are appended behind it
/// forever.
pub struct Traversal<T> {
    shared: Arc<Shared<T>>,
    cursor: Cursor,
    // pending edits with ids at or above this are not waited on. None waits on everything.
    exclude_from: Option<u64>,
}

impl<T> Traversal<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, exclude_from: Option<u64>) -> Self {
        shared.state.lock().unwrap().register_cursor();
        Traversal { shared, cursor: Cursor::Start, exclude_from }
    }
}

impl<T: Clone> Traversal<T> {
    // one traversal step, also exposing the slot index for positional lookups.
    pub(crate) async fn next_entry(&mut self) -> Option<(usize, T)> {
        let at = match self.cursor {
            Cursor::Done => return None,
            Cursor::Start => self.shared.state.lock().unwrap().slots[LEFT].next,
            Cursor::At(prev) => {
                // release control so interleaved mutations run before we advance. reading the
                // yielded slot's `next` afterwards is fine even if it was detached meanwhile:
                // tombstone links are frozen and the slot cannot be recycled while this cursor
                // is registered.
                yield_now().await;
                self.shared.state.lock().unwrap().slots[prev].next
            }
        };

        self.shared.wait_preceding(self.exclude_from.unwrap_or(u64::MAX)).await;

        let state = self.shared.state.lock().unwrap();
        let live = state.recover(at);
        if live == RIGHT {
            drop(state);
            self.cursor = Cursor::Done;
            return None;
        }
        let value = state.slots[live].value.clone().expect("live node without value");
        drop(state);
        self.cursor = Cursor::At(live);
        Some((live, value))
    }

    /// Produce the next surviving value, or `None` once the end of the chain is reached.
    pub async fn next(&mut self) -> Option<T> {
        self.next_entry().await.map(|(_, value)| value)
    }

    /// Adapt this traversal into a [`futures::Stream`].
    #[cfg(feature = "futures")]
    pub fn into_stream(self) -> impl futures::Stream<Item = T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut traversal| async move {
            traversal.next().await.map(|value| (value, traversal))
        })
    }
}

impl<T> Drop for Traversal<T> {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().release_cursor();
    }
}
