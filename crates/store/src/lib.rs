#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-store: the authoritative local record of jobs, persistent
//! singleton slots, and the webhook list (section 4.2).
//!
//! Backed by an embedded `sled` tree opened on [`StateStore::open`] and
//! flushed on [`StateStore::close`]; reopening at the same path restores
//! every record verbatim. All mutating operations serialize through a
//! single writer lock (`Acquire`/`Release`) so that a status transition is
//! durably written before its event is published to listeners.

mod jobs;
mod listeners;
mod slots;
mod store;
mod webhooks;

pub use jobs::JobsError;
pub use listeners::{ListenTarget, ListenerEvent, ListenerItem, ListenerStream};
pub use slots::SlotName;
pub use store::StateStore;
