use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::schedule::{Ms, SlotDate, SlotTime};

/// Uniqueness key for a slot: one experience cannot offer two slots at the
/// same date and time.
pub type ScheduleKey = (Ulid, SlotDate, SlotTime);

/// In-memory state of one bookable slot. `available` is only ever written
/// while holding the slot's write lock, via a WAL-backed event.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub experience_id: Ulid,
    pub date: SlotDate,
    pub time: SlotTime,
    /// Total bookable units. Fixed at creation, changed only by an explicit
    /// capacity edit.
    pub total_capacity: u32,
    /// Remaining bookable units. Invariant: `available <= total_capacity`.
    pub available: u32,
    /// Vendor maintenance flag. A blocked slot refuses decrements but keeps
    /// its count.
    pub blocked: bool,
    pub block_reason: Option<String>,
    /// Price in cents overriding the experience base price. Orthogonal to
    /// availability.
    pub price_override: Option<i64>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl SlotState {
    pub fn new(
        id: Ulid,
        experience_id: Ulid,
        date: SlotDate,
        time: SlotTime,
        total_capacity: u32,
        price_override: Option<i64>,
        at: Ms,
    ) -> Self {
        Self {
            id,
            experience_id,
            date,
            time,
            total_capacity,
            available: total_capacity,
            blocked: false,
            block_reason: None,
            price_override,
            created_at: at,
            updated_at: at,
        }
    }

    /// Units already sold: the part of capacity no longer available.
    pub fn committed(&self) -> u32 {
        self.total_capacity - self.available
    }

    pub fn is_bookable(&self) -> bool {
        !self.blocked && self.available > 0
    }

    pub fn schedule_key(&self) -> ScheduleKey {
        (self.experience_id, self.date, self.time)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// Every variant carries `at` so replay reproduces timestamps exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        experience_id: Ulid,
        date: SlotDate,
        time: SlotTime,
        total_capacity: u32,
        price_override: Option<i64>,
        at: Ms,
    },
    /// Carries the post-edit values of every mutable field, including the
    /// recomputed `available`, so replay needs no arithmetic.
    SlotUpdated {
        id: Ulid,
        date: SlotDate,
        time: SlotTime,
        total_capacity: u32,
        available: u32,
        price_override: Option<i64>,
        at: Ms,
    },
    SlotBlocked {
        id: Ulid,
        reason: String,
        at: Ms,
    },
    SlotUnblocked {
        id: Ulid,
        at: Ms,
    },
    AvailabilityDecremented {
        id: Ulid,
        quantity: u32,
        remaining: u32,
        at: Ms,
    },
    AvailabilityIncremented {
        id: Ulid,
        quantity: u32,
        remaining: u32,
        at: Ms,
    },
    SlotDeleted {
        id: Ulid,
        at: Ms,
    },
}

impl Event {
    pub fn slot_id(&self) -> Ulid {
        match self {
            Event::SlotCreated { id, .. }
            | Event::SlotUpdated { id, .. }
            | Event::SlotBlocked { id, .. }
            | Event::SlotUnblocked { id, .. }
            | Event::AvailabilityDecremented { id, .. }
            | Event::AvailabilityIncremented { id, .. }
            | Event::SlotDeleted { id, .. } => *id,
        }
    }
}

// ── Operation inputs / query result types ────────────────────────

/// Input for creating one slot. Bulk creation takes a list of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub id: Ulid,
    pub experience_id: Ulid,
    pub date: SlotDate,
    pub time: SlotTime,
    pub total_capacity: u32,
    pub price_override: Option<i64>,
}

/// Patch for `update_slot`. `None` leaves a field untouched; the outer
/// `Option` on `price_override` distinguishes "don't touch" from "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPatch {
    pub total_capacity: Option<u32>,
    pub price_override: Option<Option<i64>>,
    pub date: Option<SlotDate>,
    pub time: Option<SlotTime>,
}

impl SlotPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Inclusive calendar range for slot queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: SlotDate,
    pub end: SlotDate,
}

/// Snapshot of a slot returned from queries and successful mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub experience_id: Ulid,
    pub date: SlotDate,
    pub time: SlotTime,
    pub total_capacity: u32,
    pub available: u32,
    pub blocked: bool,
    pub price_override: Option<i64>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl From<&SlotState> for SlotInfo {
    fn from(s: &SlotState) -> Self {
        Self {
            id: s.id,
            experience_id: s.experience_id,
            date: s.date,
            time: s.time,
            total_capacity: s.total_capacity,
            available: s.available,
            blocked: s.blocked,
            price_override: s.price_override,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// One spec that failed during bulk creation. The rest of the batch is
/// unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub date: SlotDate,
    pub time: SlotTime,
    pub error: String,
}

/// Per-item outcome of `create_bulk_slots` — never all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub created: usize,
    pub failures: Vec<BulkFailure>,
}
