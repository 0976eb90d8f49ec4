use ulid::Ulid;

use crate::schedule::{SlotDate, SlotTime};

/// The closed error taxonomy of the inventory engine.
///
/// Everything except `Storage` is a business-expected outcome that callers
/// branch on as ordinary control flow; `Storage` is the one category worth
/// retrying with backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No slot with this id.
    NotFound(Ulid),
    /// A slot already exists for this (experience, date, time).
    Duplicate {
        experience_id: Ulid,
        date: SlotDate,
        time: SlotTime,
    },
    /// Fewer units remain than the decrement requested.
    Insufficient { requested: u32, available: u32 },
    /// The slot is blocked by its vendor, regardless of remaining count.
    Blocked(Ulid),
    /// Adjustment quantity must be positive (and within the adjust limit).
    InvalidQuantity(i64),
    /// A capacity edit may never cut below the units already sold.
    InvalidCapacity { requested: u32, committed: u32 },
    /// Deleting a slot with sold units would orphan their bookings.
    HasBookings(Ulid),
    /// The slot-scoped lock could not be acquired within the timeout.
    LockTimeout(Ulid),
    /// WAL or audit storage failed; the mutation did not commit.
    Storage(String),
    /// An ambient guard rail from `limits` was hit.
    LimitExceeded(&'static str),
}

impl EngineError {
    /// True for the outcomes callers should treat as retryable-with-backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "slot not found: {id}"),
            EngineError::Duplicate {
                experience_id,
                date,
                time,
            } => write!(
                f,
                "a slot already exists for experience {experience_id} on {date} at {time}"
            ),
            EngineError::Insufficient {
                requested,
                available,
            } => write!(
                f,
                "insufficient availability: requested {requested}, {available} remaining"
            ),
            EngineError::Blocked(id) => write!(f, "slot is blocked: {id}"),
            EngineError::InvalidQuantity(q) => write!(f, "invalid quantity: {q}"),
            EngineError::InvalidCapacity {
                requested,
                committed,
            } => write!(
                f,
                "invalid capacity: {requested} is below the {committed} units already booked"
            ),
            EngineError::HasBookings(id) => {
                write!(f, "slot has active bookings and cannot be deleted: {id}")
            }
            EngineError::LockTimeout(id) => write!(f, "timed out waiting for slot lock: {id}"),
            EngineError::Storage(e) => write!(f, "storage unavailable: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
