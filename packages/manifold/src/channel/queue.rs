// bounded queue part of a party.
//
// every sender and getter owns one of these as its private buffer. it is touched from several
// tasks (the owning party's operation, the dispatch loop's counterpart operation, and the
// channel's direct drain), so handles clone cheaply and the element storage sits behind a short
// mutex with a semaphore pair carrying the suspension.
//
// operations are issued as abortable tasks by their callers; a put or get aborted while
// suspended releases its permit and perturbs no queue state.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::sync::Semaphore;

pub(crate) struct Queue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    // permits for buffered elements.
    filled: Semaphore,
    // permits for remaining capacity.
    space: Semaphore,
}

impl<T> Queue<T> {
    pub(crate) fn bounded(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Queue {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                filled: Semaphore::new(0),
                space: Semaphore::new(capacity),
            }),
        }
    }

    // enqueue `value`, suspending while the queue is full.
    pub(crate) async fn put(&self, value: T) {
        let permit = self.shared.space.acquire().await.unwrap();
        permit.forget();
        self.shared.items.lock().unwrap().push_back(value);
        self.shared.filled.add_permits(1);
    }

    // dequeue the front element, suspending while the queue is empty.
    pub(crate) async fn get(&self) -> T {
        let permit = self.shared.filled.acquire().await.unwrap();
        permit.forget();
        let value = self.shared.items.lock().unwrap().pop_front()
            .expect("filled permit without buffered element");
        self.shared.space.add_permits(1);
        value
    }

    // dequeue the front element if one is buffered right now.
    pub(crate) fn try_get(&self) -> Option<T> {
        let Ok(permit) = self.shared.filled.try_acquire() else { return None };
        permit.forget();
        let value = self.shared.items.lock().unwrap().pop_front()
            .expect("filled permit without buffered element");
        self.shared.space.add_permits(1);
        Some(value)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shared.items.lock().unwrap().is_empty()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue { shared: self.shared.clone() }
    }
}
