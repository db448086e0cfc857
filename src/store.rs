//! # Track Store
//!
//! The persistence collaborator. The engine only needs an object store with
//! insert, fetch-by-ID, fetch-by-predicate and save; [`TrackStore`] is that
//! seam. [`MemoryStore`] is the in-process implementation used by the app
//! shell before it plugs in a durable engine, and by the tests.
//!
//! The store is owned by the primary context (the coordinator's lock). Other
//! components receive [`TrackId`]s, never references into it.

use std::collections::BTreeMap;

use log::warn;

use crate::{Result, Sailor, SailorId, SyncError, Track, TrackId, TrackState, Vessel, VesselId};

/// Object store for tracks, sailors and vessels.
pub trait TrackStore: Send + 'static {
    fn insert_track(&mut self, track: Track) -> TrackId;
    fn track(&self, id: TrackId) -> Option<&Track>;
    fn track_mut(&mut self, id: TrackId) -> Option<&mut Track>;
    /// Delete a track together with its points.
    fn delete_track(&mut self, id: TrackId) -> Option<Track>;
    /// All track IDs in ascending order.
    fn track_ids(&self) -> Vec<TrackId>;

    fn insert_sailor(&mut self, sailor: Sailor) -> SailorId;
    fn sailor(&self, id: SailorId) -> Option<&Sailor>;

    fn insert_vessel(&mut self, vessel: Vessel) -> VesselId;
    fn vessel(&self, id: VesselId) -> Option<&Vessel>;
    fn vessel_ids(&self) -> Vec<VesselId>;

    /// Persist pending changes.
    fn save(&mut self) -> Result<()>;

    fn sailor_by_username(&self, username: &str) -> Option<SailorId>;

    fn find_by_remote_id(&self, remote_id: &str) -> Option<TrackId> {
        self.track_ids().into_iter().find(|id| {
            self.track(*id)
                .and_then(|t| t.remote_id.as_deref())
                .is_some_and(|r| r == remote_id)
        })
    }

    fn tracks_with_state(&self, state: TrackState) -> Vec<TrackId> {
        self.track_ids()
            .into_iter()
            .filter(|id| self.track(*id).is_some_and(|t| t.state == state))
            .collect()
    }

    fn tracks_by_creator(&self, creator: SailorId) -> Vec<TrackId> {
        self.track_ids()
            .into_iter()
            .filter(|id| self.track(*id).is_some_and(|t| t.creator == Some(creator)))
            .collect()
    }

    fn vessels_owned_by(&self, owner: SailorId) -> Vec<VesselId> {
        self.vessel_ids()
            .into_iter()
            .filter(|id| self.vessel(*id).is_some_and(|v| v.owner == Some(owner)))
            .collect()
    }
}

/// Save, logging a failure instead of propagating it.
///
/// In-memory state stays the source of truth for the session; nothing is
/// rolled back.
pub(crate) fn save_logged<S: TrackStore + ?Sized>(store: &mut S, context: &str) -> bool {
    match store.save() {
        Ok(()) => true,
        Err(e) => {
            warn!("[TrackStore] Save failed after {}: {}", context, e);
            false
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory [`TrackStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tracks: BTreeMap<TrackId, Track>,
    sailors: BTreeMap<SailorId, Sailor>,
    vessels: BTreeMap<VesselId, Vessel>,
    next_id: u64,
    save_count: u32,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u32 {
        self.save_count
    }

    /// Make subsequent saves fail (simulates a full disk).
    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl TrackStore for MemoryStore {
    fn insert_track(&mut self, track: Track) -> TrackId {
        let id = TrackId(self.allocate_id());
        self.tracks.insert(id, track);
        id
    }

    fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    fn delete_track(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.remove(&id)
    }

    fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    fn insert_sailor(&mut self, sailor: Sailor) -> SailorId {
        let id = SailorId(self.allocate_id());
        self.sailors.insert(id, sailor);
        id
    }

    fn sailor(&self, id: SailorId) -> Option<&Sailor> {
        self.sailors.get(&id)
    }

    fn insert_vessel(&mut self, vessel: Vessel) -> VesselId {
        let id = VesselId(self.allocate_id());
        self.vessels.insert(id, vessel);
        id
    }

    fn vessel(&self, id: VesselId) -> Option<&Vessel> {
        self.vessels.get(&id)
    }

    fn vessel_ids(&self) -> Vec<VesselId> {
        self.vessels.keys().copied().collect()
    }

    fn save(&mut self) -> Result<()> {
        if self.fail_saves {
            return Err(SyncError::PersistenceError {
                message: "store is read-only".to_string(),
            });
        }
        self.save_count += 1;
        Ok(())
    }

    fn sailor_by_username(&self, username: &str) -> Option<SailorId> {
        self.sailors
            .iter()
            .find(|(_, s)| s.username == username)
            .map(|(id, _)| *id)
    }
}
