use std::sync::Arc;

use serde_json::json;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::audit::{Actor, AuditEventType};
use crate::limits::*;
use crate::model::*;
use crate::schedule::now_ms;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_slot(
        &self,
        spec: SlotSpec,
        actor: &Actor,
    ) -> Result<SlotInfo, EngineError> {
        if self.store.slot_count() >= MAX_SLOTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if spec.total_capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }

        // Reserving the schedule key is the duplicate check. It happens
        // before the WAL append so two concurrent creates for the same
        // (experience, date, time) can never both reach the log.
        let key = (spec.experience_id, spec.date, spec.time);
        if self.store.reserve_schedule_key(key, spec.id).is_err() {
            return Err(EngineError::Duplicate {
                experience_id: spec.experience_id,
                date: spec.date,
                time: spec.time,
            });
        }

        let at = now_ms();
        let event = Event::SlotCreated {
            id: spec.id,
            experience_id: spec.experience_id,
            date: spec.date,
            time: spec.time,
            total_capacity: spec.total_capacity,
            price_override: spec.price_override,
            at,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_schedule_key(&key);
            return Err(e);
        }

        let slot = SlotState::new(
            spec.id,
            spec.experience_id,
            spec.date,
            spec.time,
            spec.total_capacity,
            spec.price_override,
            at,
        );
        let info = SlotInfo::from(&slot);
        self.store
            .insert(spec.id, spec.experience_id, Arc::new(RwLock::new(slot)));
        self.notify.send(spec.experience_id, &event);

        self.audit_best_effort(
            AuditEventType::SlotCreated,
            spec.id,
            actor,
            json!({
                "date": spec.date.to_string(),
                "time": spec.time.to_string(),
                "total_capacity": spec.total_capacity,
                "price_override": spec.price_override,
            }),
        );
        Ok(info)
    }

    /// Create a batch of slots with per-item outcomes. A failing spec never
    /// aborts the batch, and the slots created before it stay created.
    pub async fn create_bulk_slots(
        &self,
        specs: Vec<SlotSpec>,
        actor: &Actor,
    ) -> Result<BulkOutcome, EngineError> {
        if specs.len() > MAX_BULK_SLOTS {
            return Err(EngineError::LimitExceeded("bulk batch too large"));
        }

        let mut outcome = BulkOutcome::default();
        for spec in specs {
            let date = spec.date;
            let time = spec.time;
            match self.create_slot(spec, actor).await {
                Ok(_) => outcome.created += 1,
                Err(e) => outcome.failures.push(BulkFailure {
                    date,
                    time,
                    error: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    /// Edit a slot's schedule, capacity, or price. A capacity change keeps
    /// sold units intact: the new `available` is `new_total - committed`,
    /// and shrinking below `committed` is rejected.
    pub async fn update_slot(
        &self,
        id: Ulid,
        patch: SlotPatch,
        actor: &Actor,
    ) -> Result<SlotInfo, EngineError> {
        let rs = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        if patch.is_empty() {
            return Ok(SlotInfo::from(&*guard));
        }

        let total_capacity = patch.total_capacity.unwrap_or(guard.total_capacity);
        if total_capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }
        let committed = guard.committed();
        if total_capacity < committed {
            return Err(EngineError::InvalidCapacity {
                requested: total_capacity,
                committed,
            });
        }

        let date = patch.date.unwrap_or(guard.date);
        let time = patch.time.unwrap_or(guard.time);
        let old_key = guard.schedule_key();
        let new_key = (guard.experience_id, date, time);
        let rekeyed = new_key != old_key;
        if rekeyed && self.store.reserve_schedule_key(new_key, id).is_err() {
            return Err(EngineError::Duplicate {
                experience_id: guard.experience_id,
                date,
                time,
            });
        }

        let event = Event::SlotUpdated {
            id,
            date,
            time,
            total_capacity,
            available: total_capacity - committed,
            price_override: patch.price_override.unwrap_or(guard.price_override),
            at: now_ms(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            if rekeyed {
                self.store.release_schedule_key(&new_key);
            }
            return Err(e);
        }
        if rekeyed {
            self.store.release_schedule_key(&old_key);
        }

        self.audit_best_effort(
            AuditEventType::SlotUpdated,
            id,
            actor,
            json!({
                "date": date.to_string(),
                "time": time.to_string(),
                "total_capacity": total_capacity,
                "available": guard.available,
                "price_override": guard.price_override,
            }),
        );
        Ok(SlotInfo::from(&*guard))
    }

    /// Take a slot off sale without touching its count. Blocking an already
    /// blocked slot replaces the reason.
    pub async fn block_slot(
        &self,
        id: Ulid,
        reason: String,
        actor: &Actor,
    ) -> Result<SlotInfo, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("block reason too long"));
        }
        let rs = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::SlotBlocked {
            id,
            reason: reason.clone(),
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        self.audit_best_effort(
            AuditEventType::SlotBlocked,
            id,
            actor,
            json!({ "reason": reason }),
        );
        Ok(SlotInfo::from(&*guard))
    }

    /// Put a blocked slot back on sale with whatever count it had.
    pub async fn unblock_slot(&self, id: Ulid, actor: &Actor) -> Result<SlotInfo, EngineError> {
        let rs = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::SlotUnblocked { id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;

        self.audit_best_effort(AuditEventType::SlotUnblocked, id, actor, json!({}));
        Ok(SlotInfo::from(&*guard))
    }

    /// Remove a slot. Refused while any unit is sold, so a delete can never
    /// orphan a committed booking.
    pub async fn delete_slot(&self, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        let rs = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if guard.committed() > 0 {
            return Err(EngineError::HasBookings(id));
        }
        let key = guard.schedule_key();
        let experience_id = guard.experience_id;

        // The write guard stays held across the append and the removal:
        // a concurrent decrement must not slip a booking in between the
        // committed-check and the slot disappearing.
        let event = Event::SlotDeleted { id, at: now_ms() };
        self.wal_append(&event).await?;
        self.store.remove(&id, &key);
        drop(guard);
        self.notify.send(experience_id, &event);
        if self.store.experience_slot_ids(&experience_id).is_empty() {
            self.notify.remove(&experience_id);
        }

        self.audit_best_effort(AuditEventType::SlotDeleted, id, actor, json!({}));
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one create per slot, plus a decrement for
    /// sold units and a block marker where applicable.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for id in self.store.slot_ids() {
            let entry = match self.store.get(&id) {
                Some(e) => e,
                None => continue,
            };
            // Waits out any in-flight counter write; the guard is dropped
            // before the compact command is sent, so nothing deadlocks
            // against the WAL writer.
            let guard = entry.read().await;

            events.push(Event::SlotCreated {
                id: guard.id,
                experience_id: guard.experience_id,
                date: guard.date,
                time: guard.time,
                total_capacity: guard.total_capacity,
                price_override: guard.price_override,
                at: guard.created_at,
            });
            if guard.available < guard.total_capacity {
                events.push(Event::AvailabilityDecremented {
                    id: guard.id,
                    quantity: guard.committed(),
                    remaining: guard.available,
                    at: guard.updated_at,
                });
            }
            if guard.blocked {
                events.push(Event::SlotBlocked {
                    id: guard.id,
                    reason: guard.block_reason.clone().unwrap_or_default(),
                    at: guard.updated_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
