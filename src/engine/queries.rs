use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::{within_cutoff, Ms};

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_slot(&self, id: Ulid) -> Result<SlotInfo, EngineError> {
        let rs = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(SlotInfo::from(&*guard))
    }

    /// Bookable slots for one experience in a date range, sorted by schedule.
    /// Excludes blocked and sold-out slots, and — when a booking cutoff is
    /// given — slots whose booking window has already closed at `now`.
    pub async fn available_slots(
        &self,
        experience_id: Ulid,
        range: DateRange,
        cutoff_hours: Option<i64>,
        now: Ms,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        if range.start > range.end {
            return Ok(Vec::new());
        }
        if range.end.days_from_epoch() - range.start.days_from_epoch() > MAX_DATE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("date range too large"));
        }

        let mut out = Vec::new();
        for id in self.store.experience_slot_ids(&experience_id) {
            let Some(rs) = self.store.get(&id) else {
                continue;
            };
            let guard = rs.read().await;
            if !guard.is_bookable() {
                continue;
            }
            if guard.date < range.start || guard.date > range.end {
                continue;
            }
            if let Some(hours) = cutoff_hours
                && within_cutoff(guard.date, guard.time, hours, now)
            {
                continue;
            }
            out.push(SlotInfo::from(&*guard));
        }
        out.sort_by_key(|s| (s.date, s.time));
        Ok(out)
    }

    /// Every slot, bookable or not — the vendor management view. Optionally
    /// restricted to one experience.
    pub async fn all_slots(&self, experience_id: Option<Ulid>) -> Vec<SlotInfo> {
        let ids = match experience_id {
            Some(eid) => self.store.experience_slot_ids(&eid),
            None => self.store.slot_ids(),
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(rs) = self.store.get(&id) else {
                continue;
            };
            let guard = rs.read().await;
            out.push(SlotInfo::from(&*guard));
        }
        out.sort_by_key(|s| (s.date, s.time, s.id));
        out
    }
}
