//! Listener fan-out over the job event stream (section 4.6.2).
//!
//! Backed by a single `tokio::sync::broadcast` channel: a listener that
//! falls too far behind gets `RecvError::Lagged` from the channel itself,
//! which maps directly onto the "deliver a lagged sentinel, then close"
//! contract without any bookkeeping of our own.

use flynn_core::job::JobId;
use tokio::sync::broadcast;

use crate::store::StateStore;

pub type ListenerEvent = flynn_core::event::JobEvent;

/// What a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenTarget {
    /// Every job on this host.
    All,
    /// Only events for one job.
    Job(JobId),
}

impl ListenTarget {
    fn matches(self, event: &ListenerEvent) -> bool {
        match self {
            ListenTarget::All => true,
            ListenTarget::Job(id) => id == event.job_id,
        }
    }
}

/// One item produced by a [`ListenerStream`].
#[derive(Debug, Clone)]
pub enum ListenerItem {
    Event(ListenerEvent),
    /// The listener fell behind by `skipped` events and has been closed.
    /// The caller should re-fetch current state over the HTTP API rather
    /// than attempt to resume the stream.
    Lagged { skipped: u64 },
}

/// A single subscriber's view of the job event stream, filtered to its
/// [`ListenTarget`].
pub struct ListenerStream {
    target: ListenTarget,
    rx: broadcast::Receiver<ListenerEvent>,
    closed: bool,
}

impl ListenerStream {
    pub(crate) fn new(target: ListenTarget, rx: broadcast::Receiver<ListenerEvent>) -> Self {
        Self { target, rx, closed: false }
    }

    /// Await the next matching event. Returns `None` once the stream has
    /// been closed, either because the store was dropped or because a
    /// `Lagged` item was already delivered.
    pub async fn next(&mut self) -> Option<ListenerItem> {
        if self.closed {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.target.matches(&event) {
                        return Some(ListenerItem::Event(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.closed = true;
                    return Some(ListenerItem::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }
}

impl StateStore {
    /// Subscribe to the job event stream (section 4.6.2).
    pub fn listen(&self, target: ListenTarget) -> ListenerStream {
        ListenerStream::new(target, self.events.subscribe())
    }

    pub(crate) fn publish(&self, event: ListenerEvent) {
        // No receivers is the common case between clients polling the
        // stream endpoint; the send failing just means nobody's listening.
        let _ = self.events.send(event);
    }
}
