use flynn_core::job::JobId;
use flynn_core::HostError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::broadcast;

use crate::listeners::ListenerEvent;

/// The broadcast channel's bounded capacity. A listener that falls this far
/// behind the producer receives a `Lagged` sentinel on its next poll and is
/// dropped, per section 4.2 / section 4.6.2.
pub const LISTENER_CHANNEL_CAPACITY: usize = 1024;

/// The authoritative local state: jobs, persistent singleton slots, and
/// webhooks, backed by a `sled` database.
///
/// `Acquire`/`Release` (section 4.2) are realized as a single writer lock
/// (`write_lock`) held across every mutating sequence: sled itself allows
/// concurrent access, but the store's invariants (status legality, exactly
/// one active holder per slot, monotonic per-job event sequence numbers)
/// require that read-modify-write sequences are atomic with respect to each
/// other.
pub struct StateStore {
    pub(crate) db: sled::Db,
    pub(crate) jobs: sled::Tree,
    pub(crate) slots: sled::Tree,
    pub(crate) webhooks: sled::Tree,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) seqs: Mutex<HashMap<JobId, u64>>,
    pub(crate) events: broadcast::Sender<ListenerEvent>,
}

/// A held writer-lock guard. Dropping it releases the lock (`Release`).
pub struct WriteGuard<'a>(parking_lot::MutexGuard<'a, ()>);

impl StateStore {
    /// `OpenDB`: open (creating if absent) the embedded database at `path`.
    /// Reopening at the same path restores every job, slot, and webhook
    /// record exactly as it was left.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let db = sled::open(path).map_err(|e| HostError::Fatal(format!("opening state db: {e}")))?;
        let jobs = db.open_tree("jobs").map_err(|e| HostError::Fatal(e.to_string()))?;
        let slots = db.open_tree("slots").map_err(|e| HostError::Fatal(e.to_string()))?;
        let webhooks = db.open_tree("webhooks").map_err(|e| HostError::Fatal(e.to_string()))?;
        let (events, _rx) = broadcast::channel(LISTENER_CHANNEL_CAPACITY);
        Ok(Self {
            db,
            jobs,
            slots,
            webhooks,
            write_lock: Mutex::new(()),
            seqs: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// In-memory store for tests that don't need durability across process
    /// restarts.
    #[cfg(any(test, feature = "test-support"))]
    pub fn open_temp() -> Result<(Self, tempfile::TempDir), HostError> {
        let dir = tempfile::tempdir().map_err(|e| HostError::Fatal(e.to_string()))?;
        let store = Self::open(dir.path())?;
        Ok((store, dir))
    }

    /// `Acquire`: take the single-writer lock for a mutating sequence.
    pub(crate) fn acquire(&self) -> WriteGuard<'_> {
        WriteGuard(self.write_lock.lock())
    }

    /// Flush to disk and drop the handle. A subsequent `open` at the same
    /// path restores the prior state verbatim.
    pub fn close(self) -> Result<(), HostError> {
        self.db.flush().map_err(|e| HostError::Fatal(format!("closing state db: {e}")))?;
        Ok(())
    }

    pub(crate) fn next_seq(&self, id: JobId) -> u64 {
        let mut seqs = self.seqs.lock();
        let seq = seqs.entry(id).or_insert(0);
        *seq += 1;
        *seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_and_reopen_restores_trees() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            store.jobs.insert(b"k", b"v").unwrap();
            store.close().unwrap();
        }
        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.jobs.get(b"k").unwrap().as_deref(), Some(b"v".as_slice()));
    }

    #[test]
    fn next_seq_is_monotonic_per_job() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let id = JobId::new();
        let other = JobId::new();
        assert_eq!(store.next_seq(id), 1);
        assert_eq!(store.next_seq(id), 2);
        assert_eq!(store.next_seq(other), 1);
        assert_eq!(store.next_seq(id), 3);
    }
}
