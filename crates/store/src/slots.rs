//! Persistent singleton slots (section 4.2): at most one job may hold
//! "flannel" or "discoverd" at a time. Re-assigning a held slot returns the
//! previous holder so the caller can stop it before starting the new one.

use flynn_core::HostError;

use crate::store::StateStore;

/// The fixed set of persistent singleton slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotName {
    Flannel,
    Discoverd,
}

flynn_core::simple_display! {
    SlotName {
        Flannel => "flannel",
        Discoverd => "discoverd",
    }
}

impl SlotName {
    fn key(self) -> &'static [u8] {
        match self {
            SlotName::Flannel => b"flannel",
            SlotName::Discoverd => b"discoverd",
        }
    }
}

impl StateStore {
    /// Current holder of `slot`, if any.
    pub fn slot_holder(&self, slot: SlotName) -> Result<Option<String>, HostError> {
        let _guard = self.acquire();
        self.read_slot(slot)
    }

    fn read_slot(&self, slot: SlotName) -> Result<Option<String>, HostError> {
        let bytes = self.slots.get(slot.key()).map_err(|e| HostError::Fatal(e.to_string()))?;
        bytes
            .map(|b| String::from_utf8(b.to_vec()).map_err(|e| HostError::Fatal(e.to_string())))
            .transpose()
    }

    /// Assign `holder_id` to `slot`, returning the previous holder (if
    /// different) so the caller can stop that job before the new one takes
    /// over the slot.
    pub fn assign_slot(&self, slot: SlotName, holder_id: impl Into<String>) -> Result<Option<String>, HostError> {
        let _guard = self.acquire();
        let holder_id = holder_id.into();
        let previous = self.read_slot(slot)?;
        self.slots.insert(slot.key(), holder_id.as_bytes()).map_err(|e| HostError::Fatal(e.to_string()))?;
        Ok(previous.filter(|p| p != &holder_id))
    }

    /// Release `slot` only if `holder_id` currently holds it. A mismatched
    /// release is a no-op: the caller lost the race and should not clear a
    /// slot it no longer owns.
    pub fn release_slot(&self, slot: SlotName, holder_id: &str) -> Result<(), HostError> {
        let _guard = self.acquire();
        if self.read_slot(slot)?.as_deref() == Some(holder_id) {
            self.slots.remove(slot.key()).map_err(|e| HostError::Fatal(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigning_an_empty_slot_has_no_previous_holder() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let previous = store.assign_slot(SlotName::Flannel, "job-a").unwrap();
        assert_eq!(previous, None);
        assert_eq!(store.slot_holder(SlotName::Flannel).unwrap().as_deref(), Some("job-a"));
    }

    #[test]
    fn reassigning_returns_the_displaced_holder() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        store.assign_slot(SlotName::Discoverd, "job-a").unwrap();
        let previous = store.assign_slot(SlotName::Discoverd, "job-b").unwrap();
        assert_eq!(previous.as_deref(), Some("job-a"));
        assert_eq!(store.slot_holder(SlotName::Discoverd).unwrap().as_deref(), Some("job-b"));
    }

    #[test]
    fn reassigning_the_same_holder_reports_no_previous() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        store.assign_slot(SlotName::Flannel, "job-a").unwrap();
        let previous = store.assign_slot(SlotName::Flannel, "job-a").unwrap();
        assert_eq!(previous, None);
    }

    #[test]
    fn release_ignores_mismatched_holder() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        store.assign_slot(SlotName::Flannel, "job-a").unwrap();
        store.release_slot(SlotName::Flannel, "job-b").unwrap();
        assert_eq!(store.slot_holder(SlotName::Flannel).unwrap().as_deref(), Some("job-a"));
    }

    #[test]
    fn release_clears_matching_holder() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        store.assign_slot(SlotName::Flannel, "job-a").unwrap();
        store.release_slot(SlotName::Flannel, "job-a").unwrap();
        assert_eq!(store.slot_holder(SlotName::Flannel).unwrap(), None);
    }
}
