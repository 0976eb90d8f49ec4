use serde_json::json;
use tokio::time::timeout;
use ulid::Ulid;

use crate::audit::{Actor, AuditEventType};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::schedule::now_ms;

use super::{Engine, EngineError};

/// Counter operations. Every path that touches `available` acquires the
/// slot's write lock and holds it across WAL append + in-memory apply, so a
/// successful decrement is durable before any other writer can observe the
/// new count. Check-and-decrement is a single critical section: no window
/// between reading `available` and writing it back.
impl Engine {
    /// Atomically consume `quantity` units of a slot's availability.
    /// Returns the remaining count on success. Never drives `available`
    /// below zero: an insufficient slot fails with the current count and
    /// is left untouched.
    pub async fn decrement_availability(
        &self,
        slot_id: Ulid,
        quantity: i64,
        actor: &Actor,
    ) -> Result<u32, EngineError> {
        validate_quantity(quantity)?;
        let rs = self
            .store
            .get(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = rs.write_owned().await;
        self.apply_decrement(&mut guard, quantity as u32, actor)
            .await
    }

    /// Same operation, but bounds the wait for the slot lock. Under heavy
    /// contention on one slot this fails fast with `LockTimeout` instead of
    /// queueing indefinitely behind other writers.
    pub async fn decrement_availability_with_lock(
        &self,
        slot_id: Ulid,
        quantity: i64,
        actor: &Actor,
    ) -> Result<u32, EngineError> {
        validate_quantity(quantity)?;
        let rs = self
            .store
            .get(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = timeout(self.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| EngineError::LockTimeout(slot_id))?;
        self.apply_decrement(&mut guard, quantity as u32, actor)
            .await
    }

    /// Return `quantity` units to a slot, clamped at `total_capacity`.
    /// Restoring more than was consumed is not an error: cancellation flows
    /// legitimately race with capacity edits, so the count saturates instead.
    pub async fn increment_availability(
        &self,
        slot_id: Ulid,
        quantity: i64,
        actor: &Actor,
    ) -> Result<u32, EngineError> {
        validate_quantity(quantity)?;
        let rs = self
            .store
            .get(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = rs.write_owned().await;

        let remaining = guard
            .available
            .saturating_add(quantity as u32)
            .min(guard.total_capacity);
        let event = Event::AvailabilityIncremented {
            id: slot_id,
            quantity: quantity as u32,
            remaining,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::INCREMENTS_TOTAL).increment(1);
        self.audit_best_effort(
            AuditEventType::AvailabilityIncremented,
            slot_id,
            actor,
            json!({ "quantity": quantity, "resulting_count": remaining }),
        );
        Ok(remaining)
    }

    /// The shared decrement body, called with the slot write lock held.
    async fn apply_decrement(
        &self,
        guard: &mut SlotState,
        quantity: u32,
        actor: &Actor,
    ) -> Result<u32, EngineError> {
        if guard.blocked {
            return Err(EngineError::Blocked(guard.id));
        }
        if guard.available < quantity {
            metrics::counter!(observability::DECREMENTS_SOLD_OUT_TOTAL).increment(1);
            return Err(EngineError::Insufficient {
                requested: quantity,
                available: guard.available,
            });
        }

        let remaining = guard.available - quantity;
        let event = Event::AvailabilityDecremented {
            id: guard.id,
            quantity,
            remaining,
            at: now_ms(),
        };
        self.persist_and_apply(guard, &event).await?;

        metrics::counter!(observability::DECREMENTS_TOTAL).increment(1);
        self.audit_best_effort(
            AuditEventType::AvailabilityDecremented,
            guard.id,
            actor,
            json!({ "quantity": quantity, "resulting_count": remaining }),
        );
        Ok(remaining)
    }
}

fn validate_quantity(quantity: i64) -> Result<(), EngineError> {
    if quantity <= 0 || quantity > MAX_ADJUST_QUANTITY {
        return Err(EngineError::InvalidQuantity(quantity));
    }
    Ok(())
}
