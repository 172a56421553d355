// edit tasks and their serialization.
//
// every public mutating operation is spawned as a tokio task at call time. the caller gets back
// an `Edit` handle it may await for the result, but the edit runs to completion even if the
// handle is dropped immediately.
//
// edits serialize in issuance order: each edit is registered in the pending set synchronously,
// before its task is spawned, and its task begins by waiting for every pending edit with a
// smaller id. a traversal running on behalf of an edit (an index lookup inside `insert_before`,
// the collection walk inside `to_vec`) waits only for edits issued before its own, which keeps an
// edit from deadlocking on itself or on later edits that are in turn waiting on it.

use crate::Shared;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{sync::watch, task::JoinHandle};

pub(crate) struct PendingEdit {
    pub(crate) id: u64,
    pub(crate) done: watch::Receiver<bool>,
}

// deregisters an edit when its task finishes, whether normally or by panic.
pub(crate) struct EditGuard<T> {
    pub(crate) shared: Arc<Shared<T>>,
    pub(crate) id: u64,
    pub(crate) done: Option<watch::Sender<bool>>,
}

impl<T> Drop for EditGuard<T> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(true);
        }
        self.shared.pending.lock().unwrap().retain(|edit| edit.id != self.id);
    }
}

impl<T> Shared<T> {
    // wait until no pending edit with id below `before` remains.
    pub(crate) async fn wait_preceding(&self, before: u64) {
        loop {
            let waits: Vec<watch::Receiver<bool>> = self
                .pending
                .lock()
                .unwrap()
                .iter()
                .filter(|edit| edit.id < before)
                .map(|edit| edit.done.clone())
                .collect();
            if waits.is_empty() {
                return;
            }
            for mut done in waits {
                // a closed sender means the edit task is gone, which also counts as done
                let _ = done.wait_for(|&applied| applied).await;
            }
        }
    }
}

/// Handle to an in-flight mutation of a [`LiveList`](crate::LiveList).
///
/// The mutation runs as its own task and completes whether or not this handle is awaited.
/// Awaiting it yields the operation's result once the edit has been applied.
pub struct Edit<R> {
    pub(crate) handle: JoinHandle<R>,
}

impl<R> Future for Edit<R> {
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(out)) => Poll::Ready(out),
            Poll::Ready(Err(err)) => {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
                unreachable!("edit task aborted");
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
