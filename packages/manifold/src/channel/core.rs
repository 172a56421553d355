// channel core state and the dispatch loop.

use super::{
    error::{ChannelError, Fault},
    getter::Getter,
    sender::Sender,
};
use crate::util::event::Event;
use livelist::LiveList;
use std::sync::{
    atomic::{
        AtomicBool,
        Ordering::{Acquire, Release},
    },
    Arc, Mutex, OnceLock,
};
use tokio::task::{yield_now, AbortHandle, JoinHandle};

// state shared between the channel handle, its parties, the dispatch loop, and the monitor.
pub(crate) struct Core<T> {
    // attached senders, in attach order. the dispatch loop traverses this while attach/detach
    // edit it; the list's own serialization is the only synchronization around it.
    pub(crate) senders: LiveList<Sender<T>>,
    // attached getters, likewise.
    pub(crate) getters: LiveList<Getter<T>>,
    // bound for every party's private queue.
    pub(crate) buffer_size: usize,
    // set by every Getter::get, cleared once a broadcast begins. the dispatch loop parks on
    // this between passes.
    pub(crate) getters_awaiting: Event,
    // abort handle for the dispatch loop task, installed right after spawning it.
    pub(crate) loop_abort: OnceLock<AbortHandle>,
    // true once the dispatch loop has halted, for any reason. never reset.
    stopped: AtomicBool,
    // the fault that halted the loop, if one did. written once by the monitor.
    fault: Mutex<Option<Fault>>,
    // error injected to force the next dispatch pass to fail. test seam for fault containment.
    trip: Mutex<Option<anyhow::Error>>,
}

impl<T> Core<T> {
    pub(crate) fn new(buffer_size: usize) -> Self {
        Core {
            senders: LiveList::new(),
            getters: LiveList::new(),
            buffer_size,
            getters_awaiting: Event::new(),
            loop_abort: OnceLock::new(),
            stopped: AtomicBool::new(false),
            fault: Mutex::new(None),
            trip: Mutex::new(None),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Acquire)
    }

    // the error every send/get observes once the loop has halted.
    pub(crate) fn closed_error(&self) -> ChannelError {
        ChannelError::closed(self.fault.lock().unwrap().clone())
    }

    #[cfg(test)]
    pub(crate) fn trip(&self, error: anyhow::Error) {
        *self.trip.lock().unwrap() = Some(error);
        // wake the loop so it notices even if no getter is awaiting
        self.getters_awaiting.set();
    }
}

// the dispatch loop. parks on the "getters awaiting" gate; per wake, makes one pass over the
// sender roster, moving at most one value per ready sender and broadcasting it sequentially into
// every attached getter's queue. runs until aborted or until an unrecovered error escapes, in
// which case the monitor takes over.
pub(crate) async fn run_dispatch<T>(core: Arc<Core<T>>) -> anyhow::Result<()>
where
    T: Clone + Send + 'static,
{
    loop {
        core.getters_awaiting.wait().await;
        if let Some(error) = core.trip.lock().unwrap().take() {
            return Err(error);
        }

        let mut senders = core.senders.traverse();
        while let Some(sender) = senders.next().await {
            // an empty sender is skipped for this pass. if it is enqueued into concurrently, the
            // gate is still set, so the value is picked up on a following pass.
            if sender.queue().is_empty() {
                continue;
            }

            // dequeue one value, as an operation the sender's detach can cancel
            let queue = sender.queue().clone();
            let dequeue = tokio::spawn(async move { queue.get().await });
            sender.set_pending_channel(dequeue.abort_handle());
            let value = match dequeue.await {
                Ok(value) => value,
                // sender detached mid-dequeue
                Err(join) if join.is_cancelled() => continue,
                Err(join) => {
                    return Err(anyhow::Error::new(join).context("sender dequeue task failed"))
                }
            };

            core.getters_awaiting.clear();

            // deliver sequentially: a single slow getter throttles this value for all others
            let mut getters = core.getters.traverse();
            while let Some(getter) = getters.next().await {
                let queue = getter.queue().clone();
                let value = value.clone();
                let deliver = tokio::spawn(async move { queue.put(value).await });
                getter.set_pending_channel(deliver.abort_handle());
                match deliver.await {
                    Ok(()) => {}
                    // getter detached mid-delivery
                    Err(join) if join.is_cancelled() => continue,
                    Err(join) => {
                        return Err(anyhow::Error::new(join).context("getter delivery task failed"))
                    }
                }
            }
        }

        yield_now().await;
    }
}

// awaits the dispatch loop's termination. records the fault (if any), marks the channel stopped,
// and detaches every attached party, which unblocks anyone suspended against the dead loop: their
// cancelled operations resolve to the closed error rather than hanging.
pub(crate) async fn monitor<T>(core: Arc<Core<T>>, dispatch: JoinHandle<anyhow::Result<()>>)
where
    T: Clone + Send + 'static,
{
    let fault: Option<Fault> = match dispatch.await {
        Ok(Ok(())) => None,
        Ok(Err(error)) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = error.into();
            Some(Arc::from(boxed))
        }
        Err(join) if join.is_cancelled() => None,
        Err(join) => {
            let fault: Fault = Arc::new(join);
            Some(fault)
        }
    };

    match &fault {
        Some(error) => error!(%error, "channel dispatch loop halted with error"),
        None => debug!("channel dispatch loop stopped"),
    }

    *core.fault.lock().unwrap() = fault;
    core.stopped.store(true, Release);

    let mut senders = core.senders.traverse();
    while let Some(sender) = senders.next().await {
        sender.detach().await;
    }
    let mut getters = core.getters.traverse();
    while let Some(getter) = getters.next().await {
        getter.detach().await;
    }
}
