//! A cloneable handle for poking a tab's driver from the host.

use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{TabId, TabMessage};

/// A cloneable handle for poking a tab's driver.
///
/// All fields are `Arc`-backed, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct TabHandle {
    tab_id: TabId,
    inbox: mpsc::UnboundedSender<TabMessage>,
    mutations: Arc<Notify>,
    cancel: CancellationToken,
}

/// The driver's end of a [`TabHandle`]
pub(crate) struct TabInbox {
    pub(crate) messages: mpsc::UnboundedReceiver<TabMessage>,
    pub(crate) mutations: Arc<Notify>,
    pub(crate) cancel: CancellationToken,
}

impl TabHandle {
    pub(crate) fn new(tab_id: TabId) -> (Self, TabInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mutations = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let handle = Self {
            tab_id,
            inbox: tx,
            mutations: Arc::clone(&mutations),
            cancel: cancel.clone(),
        };
        let inbox = TabInbox {
            messages: rx,
            mutations,
            cancel,
        };
        (handle, inbox)
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Deliver a message; fails once the tab's driver is gone
    pub fn send(&self, message: TabMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::TabGone(self.tab_id));
        }
        self.inbox
            .send(message)
            .map_err(|_| Error::TabGone(self.tab_id))
    }

    /// Report a DOM mutation
    ///
    /// Bursts collapse into a single pending tick.
    pub fn notify_mutation(&self) {
        self.mutations.notify_one();
    }

    /// Stop the driver and drop its engine state
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.inbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_driver_dropped_fails() {
        let (handle, inbox) = TabHandle::new(TabId(3));
        assert!(handle.send(TabMessage::Pulse).is_ok());
        drop(inbox);
        let err = handle.send(TabMessage::Pulse).unwrap_err();
        assert!(err.is_tab_gone());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_close_rejects_messages() {
        let (handle, mut inbox) = TabHandle::new(TabId(3));
        handle.close();
        assert!(handle.send(TabMessage::NetworkDone).is_err());
        assert!(inbox.cancel.is_cancelled());
        assert!(inbox.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mutations_coalesce() {
        let (handle, inbox) = TabHandle::new(TabId(1));
        for _ in 0..50 {
            handle.notify_mutation();
        }
        // one stored permit, no matter how many notifications
        inbox.mutations.notified().await;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            inbox.mutations.notified(),
        )
        .await;
        assert!(second.is_err());
    }
}
