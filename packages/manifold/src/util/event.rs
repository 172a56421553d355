//! Level-triggered set/clear/wait signal.

use tokio::sync::watch;

// wait resolves as long as the flag is set; it does not consume the flag. clear is explicit.
pub(crate) struct Event {
    flag: watch::Sender<bool>,
}

impl Event {
    pub(crate) fn new() -> Self {
        Event { flag: watch::channel(false).0 }
    }

    pub(crate) fn set(&self) {
        self.flag.send_replace(true);
    }

    pub(crate) fn clear(&self) {
        self.flag.send_replace(false);
    }

    pub(crate) async fn wait(&self) {
        let mut flag = self.flag.subscribe();
        // the sender lives in self, so this cannot fail while we borrow it
        let _ = flag.wait_for(|&set| set).await;
    }
}
