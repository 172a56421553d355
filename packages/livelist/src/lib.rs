//! Doubly linked sequence that stays safe to traverse while it is edited.
//!
//! A [`LiveList`] is a deque-like container whose structural mutations are issued as queued,
//! serialized edit tasks and whose forward [`Traversal`] tolerates concurrent edits: a traversal
//! never yields a detached element, and a cursor sitting on a removed element recovers at the
//! next surviving position instead of failing. This makes the list usable as a roster that one
//! task iterates while other tasks attach and detach entries, with no external locking.
//!
//! Mutating operations return an [`Edit`] handle. The edit is spawned as its own tokio task when
//! the method is called, so it applies in issuance order whether or not the handle is awaited;
//! awaiting the handle yields the operation's result. All operations therefore require a tokio
//! runtime context.

mod edits;
mod state;
mod traverse;

pub use crate::edits::Edit;
pub use crate::traverse::Traversal;

use crate::edits::{EditGuard, PendingEdit};
use crate::state::State;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tokio::sync::watch;

/// Error for [`LiveList`] operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ListError {
    /// Indexed access did not reach the requested position before the sequence ended.
    #[error("index out of range")]
    IndexOutOfRange,
    /// Pop from an empty sequence.
    #[error("pop from empty list")]
    EmptyPop,
}

// state shared between list handles, edit tasks, and traversals.
pub(crate) struct Shared<T> {
    // short critical section around the chain itself.
    pub(crate) state: Mutex<State<T>>,
    // edits issued but not yet applied, in issuance (id) order.
    pub(crate) pending: Mutex<Vec<PendingEdit>>,
    next_edit_id: AtomicU64,
}

/// Handle to a shared, traversal-safe linked sequence.
///
/// Cloning produces another handle to the same sequence.
pub struct LiveList<T> {
    shared: Arc<Shared<T>>,
}

impl<T> LiveList<T> {
    /// Construct an empty list.
    pub fn new() -> Self {
        LiveList {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                pending: Mutex::new(Vec::new()),
                next_edit_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of elements currently in the list.
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().len()
    }

    /// Whether the list is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any element currently equals `value`.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.shared.state.lock().unwrap().find_equal(value).is_some()
    }

    /// Begin a forward traversal.
    ///
    /// The traversal is safe to run while any mutating operation executes; see [`Traversal`].
    pub fn traverse(&self) -> Traversal<T> {
        Traversal::new(self.shared.clone(), None)
    }
}

impl<T: Send + 'static> LiveList<T> {
    // register an edit in the pending set, then spawn its task. registration happens here, in
    // the caller's turn, so issuance order and id order agree.
    fn spawn_edit<R, F, Fut>(&self, body: F) -> Edit<R>
    where
        R: Send + 'static,
        F: FnOnce(Arc<Shared<T>>, u64) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        let shared = self.shared.clone();
        let id = shared.next_edit_id.fetch_add(1, Relaxed);
        let (done_tx, done_rx) = watch::channel(false);
        shared.pending.lock().unwrap().push(PendingEdit { id, done: done_rx });
        let guard = EditGuard { shared: shared.clone(), id, done: Some(done_tx) };
        let body = body(shared, id);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            body.await
        });
        Edit { handle }
    }

    /// Append `value` at the back.
    pub fn push_back(&self, value: T) -> Edit<()> {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            shared.state.lock().unwrap().attach_back(value);
        })
    }

    /// Append `value` at the front.
    pub fn push_front(&self, value: T) -> Edit<()> {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            shared.state.lock().unwrap().attach_front(value);
        })
    }

    /// Detach and return the back element.
    pub fn pop_back(&self) -> Edit<Result<T, ListError>> {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            let mut state = shared.state.lock().unwrap();
            let idx = state.pop_back_idx().ok_or(ListError::EmptyPop)?;
            Ok(state.detach(idx))
        })
    }

    /// Detach and return the front element.
    pub fn pop_front(&self) -> Edit<Result<T, ListError>> {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            let mut state = shared.state.lock().unwrap();
            let idx = state.pop_front_idx().ok_or(ListError::EmptyPop)?;
            Ok(state.detach(idx))
        })
    }

    /// Detach the first element equal to `value`, in list order. Returns whether one was found.
    pub fn remove_first_equal(&self, value: T) -> Edit<bool>
    where
        T: PartialEq,
    {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            let mut state = shared.state.lock().unwrap();
            match state.find_equal(&value) {
                Some(idx) => {
                    state.detach(idx);
                    true
                }
                None => false,
            }
        })
    }

    /// Insert `value` before the element at `index` (negative indices count from the back).
    ///
    /// The index lookup shares traversal semantics, so the position is resolved against the list
    /// as it stands when this edit executes. If the target element is detached between lookup and
    /// splice, the insert lands before the next surviving position.
    pub fn insert_before(&self, index: isize, value: T) -> Edit<Result<(), ListError>>
    where
        T: Clone,
    {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            let mut traversal = Traversal::new(shared.clone(), Some(id));
            let (slot, _) = locate(&mut traversal, &shared, index).await?;
            let mut state = shared.state.lock().unwrap();
            let at = state.recover(slot);
            state.attach_before(at, value);
            Ok(())
        })
    }

    /// Materialize the current contents, in order.
    pub fn to_vec(&self) -> Edit<Vec<T>>
    where
        T: Clone,
    {
        self.spawn_edit(move |shared, id| async move {
            shared.wait_preceding(id).await;
            let mut traversal = Traversal::new(shared.clone(), Some(id));
            let mut out = Vec::new();
            while let Some(value) = traversal.next().await {
                out.push(value);
            }
            out
        })
    }

    /// Clone out the element at `index` (negative indices count from the back).
    ///
    /// Built on traversal: bounds are re-validated on every step, since the length may change
    /// while the lookup is in flight.
    pub async fn get(&self, index: isize) -> Result<T, ListError>
    where
        T: Clone,
    {
        let mut traversal = self.traverse();
        let (_, value) = locate(&mut traversal, &self.shared, index).await?;
        Ok(value)
    }
}

// walk `traversal` until `index` is reached, failing if the position is never reached or falls
// out of the current bounds along the way. negative indices are normalized against the length at
// entry.
async fn locate<T: Clone>(
    traversal: &mut Traversal<T>,
    shared: &Arc<Shared<T>>,
    index: isize,
) -> Result<(usize, T), ListError> {
    let expected = if index < 0 {
        shared.state.lock().unwrap().len() as isize + index
    } else {
        index
    };
    let mut position: isize = 0;
    while let Some(entry) = traversal.next_entry().await {
        let len = shared.state.lock().unwrap().len() as isize;
        if expected < 0 || expected > len - 1 {
            return Err(ListError::IndexOutOfRange);
        }
        if position == expected {
            return Ok(entry);
        }
        position += 1;
    }
    Err(ListError::IndexOutOfRange)
}

impl<T> Clone for LiveList<T> {
    fn clone(&self) -> Self {
        LiveList { shared: self.shared.clone() }
    }
}

impl<T> Default for LiveList<T> {
    fn default() -> Self {
        LiveList::new()
    }
}

impl<T> FromIterator<T> for LiveList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let list = LiveList::new();
        {
            let mut state = list.shared.state.lock().unwrap();
            for value in iter {
                state.attach_back(value);
            }
        }
        list
    }
}
