// receiving half of a channel attachment, plus its callback machinery.

use super::{core::Core, error::ChannelError, queue::Queue};
use smallvec::SmallVec;
use std::{
    any::Any,
    future::Future,
    iter,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex, Weak,
    },
};
use tokio::task::{yield_now, AbortHandle};

type DeferredFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A callback a getter runs against each value it takes delivery of.
pub enum Callback<T> {
    /// Runs synchronously within the delivering `get` before it returns the value.
    Immediate(Box<dyn FnMut(T) + Send>),
    /// Produces a future which is spawned as its own task; the delivering `get` does not wait
    /// for it.
    Deferred(Box<dyn FnMut(T) -> DeferredFuture + Send>),
}

impl<T> Callback<T> {
    pub fn immediate(callback: impl FnMut(T) + Send + 'static) -> Self {
        Callback::Immediate(Box::new(callback))
    }

    pub fn deferred<F>(mut callback: impl FnMut(T) -> F + Send + 'static) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Callback::Deferred(Box::new(move |value| Box::pin(callback(value))))
    }
}

/// Token for removing a previously added callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct CallbackEntry<T> {
    id: CallbackId,
    callback: Callback<T>,
}

// registered callbacks, plus the bookkeeping that keeps removal honest while a delivery has the
// entries taken out to fire them.
struct CallbackSet<T> {
    entries: SmallVec<[CallbackEntry<T>; 4]>,
    // ids of entries currently taken out by fire_callbacks.
    firing: SmallVec<[CallbackId; 4]>,
    // removals issued against taken-out entries, applied on merge-back.
    removed: SmallVec<[CallbackId; 4]>,
}

impl<T> CallbackSet<T> {
    fn new() -> Self {
        CallbackSet {
            entries: SmallVec::new(),
            firing: SmallVec::new(),
            removed: SmallVec::new(),
        }
    }
}

/// Handle for receiving values from a channel.
///
/// Each getter carries its own bounded buffer which the channel's dispatch loop broadcasts
/// into; `get` takes delivery of the next buffered value. Clones of a getter are the same
/// getter: they share the buffer and compare equal.
///
/// A silent getter takes delivery by itself in a background task, so its callbacks fire
/// without anyone calling `get`.
pub struct Getter<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    channel: Weak<Core<T>>,
    queue: Queue<T>,
    callbacks: Mutex<CallbackSet<T>>,
    next_callback_id: AtomicU64,
    silent: bool,
    // the in-flight dequeue issued by get(), abortable by detach.
    pending_self: Mutex<Option<AbortHandle>>,
    // the dispatch loop's in-flight delivery into this getter, abortable by detach.
    pending_channel: Mutex<Option<AbortHandle>>,
    // a silent getter's background delivery task.
    silent_loop: Mutex<Option<AbortHandle>>,
}

impl<T: Clone + Send + 'static> Getter<T> {
    pub(crate) fn new(core: &Arc<Core<T>>, silent: bool) -> Self {
        Getter {
            inner: Arc::new(Inner {
                channel: Arc::downgrade(core),
                queue: Queue::bounded(core.buffer_size),
                callbacks: Mutex::new(CallbackSet::new()),
                next_callback_id: AtomicU64::new(0),
                silent,
                pending_self: Mutex::new(None),
                pending_channel: Mutex::new(None),
                silent_loop: Mutex::new(None),
            }),
        }
    }

    /// Take delivery of the next value broadcast to this getter.
    ///
    /// Suspends while this getter's buffer is empty. Fires this getter's callbacks against the
    /// value before returning it. Errors if the channel has stopped, with the fault that
    /// stopped it if there was one, or if this getter is detached while the get is suspended.
    pub async fn get(&self) -> Result<T, ChannelError> {
        let Some(core) = self.inner.channel.upgrade() else {
            return Err(ChannelError::closed(None));
        };
        if core.is_stopped() {
            return Err(core.closed_error());
        }

        // signal the dispatch loop that someone is ready for a delivery
        core.getters_awaiting.set();

        let queue = self.inner.queue.clone();
        let dequeue = tokio::spawn(async move { queue.get().await });
        *self.inner.pending_self.lock().unwrap() = Some(dequeue.abort_handle());
        let value = match dequeue.await {
            Ok(value) => value,
            Err(join) if join.is_cancelled() => {
                return Err(if core.is_stopped() {
                    core.closed_error()
                } else {
                    ChannelError::Cancelled
                });
            }
            Err(join) => resume_unwind(join.into_panic()),
        };

        self.fire_callbacks(&value);

        if core.is_stopped() {
            return Err(core.closed_error());
        }
        Ok(value)
    }

    /// Repeated delivery: yields values until this getter detaches or its channel stops.
    pub fn get_forever(&self) -> GetForever<T> {
        GetForever { getter: self.clone() }
    }

    /// Synchronously drain whatever is buffered for this getter right now, without suspending
    /// and without firing callbacks.
    pub fn iterate_pending(&self) -> impl Iterator<Item = T> + '_ {
        iter::from_fn(move || self.inner.queue.try_get())
    }

    /// Register a callback to run against every value this getter takes delivery of.
    pub fn add_callback(&self, callback: Callback<T>) -> CallbackId {
        let id = CallbackId(self.inner.next_callback_id.fetch_add(1, Relaxed));
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .entries
            .push(CallbackEntry { id, callback });
        id
    }

    /// Remove a callback by its id. Returns whether it was present. Removal takes effect even
    /// for a delivery that is firing callbacks right now.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut set = self.inner.callbacks.lock().unwrap();
        let before = set.entries.len();
        set.entries.retain(|entry| entry.id != id);
        if set.entries.len() != before {
            return true;
        }
        // the entry may be taken out by a delivery firing it right now; record the removal so
        // the merge-back drops it.
        if let Some(at) = set.firing.iter().position(|&firing| firing == id) {
            set.firing.remove(at);
            set.removed.push(id);
            return true;
        }
        false
    }

    // run every registered callback against `value`. a panicking callback is logged; it stays
    // registered, and its siblings still run.
    fn fire_callbacks(&self, value: &T) {
        let mut entries = {
            let mut set = self.inner.callbacks.lock().unwrap();
            let entries = std::mem::take(&mut set.entries);
            set.firing = entries.iter().map(|entry| entry.id).collect();
            entries
        };
        for entry in entries.iter_mut() {
            // removed since this delivery took the entries out
            if self.inner.callbacks.lock().unwrap().removed.contains(&entry.id) {
                continue;
            }
            match &mut entry.callback {
                Callback::Immediate(callback) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value.clone()))) {
                        error!(
                            callback = entry.id.0,
                            "getter callback panicked: {}",
                            panic_message(&panic),
                        );
                    }
                }
                Callback::Deferred(callback) => {
                    match catch_unwind(AssertUnwindSafe(|| callback(value.clone()))) {
                        Ok(task) => {
                            tokio::spawn(task);
                        }
                        Err(panic) => {
                            error!(
                                callback = entry.id.0,
                                "getter callback panicked: {}",
                                panic_message(&panic),
                            );
                        }
                    }
                }
            }
        }
        // merge back: apply removals issued while firing, then anything registered meanwhile
        let mut set = self.inner.callbacks.lock().unwrap();
        set.firing.clear();
        let removed = std::mem::take(&mut set.removed);
        entries.retain(|entry| !removed.contains(&entry.id));
        let registered_meanwhile = std::mem::replace(&mut set.entries, entries);
        set.entries.extend(registered_meanwhile);
    }

    /// Whether this getter is currently on its channel's roster.
    pub fn is_attached(&self) -> bool {
        self.inner
            .channel
            .upgrade()
            .is_some_and(|core| core.getters.contains(self))
    }

    /// Re-attach a detached getter to its channel. No-op if already attached or if the channel
    /// has been dropped. A silent getter resumes its background deliveries.
    pub async fn attach(&self) {
        let Some(core) = self.inner.channel.upgrade() else { return };
        if !core.getters.contains(self) {
            core.getters.push_back(self.clone()).await;
            if self.inner.silent {
                self.spawn_silent_loop();
            }
        }
    }

    /// Detach this getter from its channel, cancelling any suspended get and any in-progress
    /// delivery by the dispatch loop. Values already buffered are kept for `iterate_pending`.
    pub async fn detach(&self) {
        let Some(core) = self.inner.channel.upgrade() else { return };
        if core.getters.contains(self) {
            self.abort_pending();
            core.getters.remove_first_equal(self.clone()).await;
        }
    }

    fn abort_pending(&self) {
        if let Some(op) = self.inner.pending_self.lock().unwrap().take() {
            op.abort();
        }
        if let Some(op) = self.inner.pending_channel.lock().unwrap().take() {
            op.abort();
        }
        if let Some(silent) = self.inner.silent_loop.lock().unwrap().take() {
            silent.abort();
        }
    }

    // callers must have the getter on the roster already, so the loop's attachment check holds
    // from its first iteration.
    pub(crate) fn spawn_silent_loop(&self) {
        let getter = self.clone();
        let task = tokio::spawn(async move {
            // let the creating task finish its setup before the first pull
            yield_now().await;
            while getter.is_attached() {
                if getter.get().await.is_err() {
                    break;
                }
            }
        });
        *self.inner.silent_loop.lock().unwrap() = Some(task.abort_handle());
    }

    pub(crate) fn queue(&self) -> &Queue<T> {
        &self.inner.queue
    }

    pub(crate) fn set_pending_channel(&self, op: AbortHandle) {
        *self.inner.pending_channel.lock().unwrap() = Some(op);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl<T> Clone for Getter<T> {
    fn clone(&self) -> Self {
        Getter { inner: self.inner.clone() }
    }
}

impl<T> PartialEq for Getter<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Getter<T> {}

/// Yields successive deliveries to a getter. Constructed by [`Getter::get_forever`].
pub struct GetForever<T> {
    getter: Getter<T>,
}

impl<T: Clone + Send + 'static> GetForever<T> {
    /// The next delivery. `None` once the getter is detached; a stopped channel's fault
    /// surfaces as `Some(Err(_))` before the stream ends.
    pub async fn next(&mut self) -> Option<Result<T, ChannelError>> {
        if !self.getter.is_attached() {
            return None;
        }
        match self.getter.get().await {
            Ok(value) => Some(Ok(value)),
            Err(ChannelError::Cancelled) => None,
            Err(error) => Some(Err(error)),
        }
    }

    /// Adapt into a [`futures::Stream`].
    #[cfg(feature = "futures")]
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<T, ChannelError>> {
        futures::stream::unfold(self, |mut deliveries| async move {
            deliveries.next().await.map(|item| (item, deliveries))
        })
    }
}
