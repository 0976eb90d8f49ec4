use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::SharedSlotState;

/// Owns the slot-id → slot-state mapping and its secondary indexes.
///
/// Each slot sits behind its own `RwLock`, so operations on different slots
/// never contend. The schedule index is the uniqueness authority for
/// `(experience_id, date, time)`; the experience index serves range queries.
pub struct InventoryStore {
    slots: DashMap<Ulid, SharedSlotState>,
    schedule: DashMap<ScheduleKey, Ulid>,
    by_experience: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            schedule: DashMap::new(),
            by_experience: DashMap::new(),
        }
    }

    // ── Slot map ─────────────────────────────────────────────

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_ids(&self) -> Vec<Ulid> {
        self.slots.iter().map(|e| *e.key()).collect()
    }

    /// Insert a slot and index it. The schedule key must already be reserved.
    pub fn insert(&self, id: Ulid, experience_id: Ulid, state: SharedSlotState) {
        self.slots.insert(id, state);
        self.by_experience.entry(experience_id).or_default().push(id);
    }

    /// Remove a slot and drop every index entry pointing at it.
    pub fn remove(&self, id: &Ulid, key: &ScheduleKey) {
        self.slots.remove(id);
        self.release_schedule_key(key);
        if let Some(mut ids) = self.by_experience.get_mut(&key.0) {
            ids.retain(|s| s != id);
        }
    }

    // ── Schedule index ───────────────────────────────────────

    /// Claim a schedule key for `id`. Fails with the occupying slot's id when
    /// another slot already holds the key — this is the duplicate check, and
    /// the entry API makes it atomic under concurrent creates.
    pub fn reserve_schedule_key(&self, key: ScheduleKey, id: Ulid) -> Result<(), Ulid> {
        match self.schedule.entry(key) {
            Entry::Occupied(existing) => Err(*existing.get()),
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                Ok(())
            }
        }
    }

    pub fn release_schedule_key(&self, key: &ScheduleKey) {
        self.schedule.remove(key);
    }

    pub fn slot_for_schedule(&self, key: &ScheduleKey) -> Option<Ulid> {
        self.schedule.get(key).map(|e| *e.value())
    }

    // ── Experience index ─────────────────────────────────────

    pub fn experience_slot_ids(&self, experience_id: &Ulid) -> Vec<Ulid> {
        self.by_experience
            .get(experience_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}
