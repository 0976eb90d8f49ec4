mod counter;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use store::InventoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::audit::{Actor, AuditEntry, AuditEventType, AuditLog};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::schedule::now_ms;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// Default bound on waiting for a slot lock in the with-lock decrement path.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's inventory engine: the explicit store behind per-slot locks,
/// the WAL writer channel, the audit trail, and the realtime hub.
///
/// `available` is only ever written through the counter operations in
/// `counter.rs` and the capacity recompute in `mutations.rs`, both of which
/// hold the slot's write lock across WAL append + apply.
pub struct Engine {
    pub store: InventoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub audit: Arc<AuditLog>,
    pub(super) lock_timeout: Duration,
}

/// Apply an event directly to a SlotState (no locking — caller holds the lock).
/// Create/delete are handled at the store level, not here.
fn apply_to_slot(slot: &mut SlotState, event: &Event) {
    match event {
        Event::SlotUpdated {
            date,
            time,
            total_capacity,
            available,
            price_override,
            at,
            ..
        } => {
            slot.date = *date;
            slot.time = *time;
            slot.total_capacity = *total_capacity;
            slot.available = *available;
            slot.price_override = *price_override;
            slot.updated_at = *at;
        }
        Event::SlotBlocked { reason, at, .. } => {
            slot.blocked = true;
            slot.block_reason = Some(reason.clone());
            slot.updated_at = *at;
        }
        Event::SlotUnblocked { at, .. } => {
            slot.blocked = false;
            slot.block_reason = None;
            slot.updated_at = *at;
        }
        Event::AvailabilityDecremented { remaining, at, .. }
        | Event::AvailabilityIncremented { remaining, at, .. } => {
            slot.available = *remaining;
            slot.updated_at = *at;
        }
        Event::SlotCreated { .. } | Event::SlotDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        audit: Arc<AuditLog>,
        notify: Arc<NotifyHub>,
        lock_timeout: Duration,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InventoryStore::new(),
            wal_tx,
            notify,
            audit,
            lock_timeout,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::SlotCreated {
                    id,
                    experience_id,
                    date,
                    time,
                    total_capacity,
                    price_override,
                    at,
                } => {
                    let slot = SlotState::new(
                        *id,
                        *experience_id,
                        *date,
                        *time,
                        *total_capacity,
                        *price_override,
                        *at,
                    );
                    let key = slot.schedule_key();
                    let _ = engine.store.reserve_schedule_key(key, *id);
                    engine
                        .store
                        .insert(*id, *experience_id, Arc::new(RwLock::new(slot)));
                }
                Event::SlotDeleted { id, .. } => {
                    if let Some(entry) = engine.store.get(id) {
                        let key = entry
                            .try_read()
                            .expect("replay: uncontended read")
                            .schedule_key();
                        engine.store.remove(id, &key);
                    }
                }
                other => {
                    if let Some(entry) = engine.store.get(&other.slot_id()) {
                        let mut guard = entry.try_write().expect("replay: uncontended write");
                        // Schedule edits move the slot under a new key.
                        let old_key = guard.schedule_key();
                        apply_to_slot(&mut guard, other);
                        let new_key = guard.schedule_key();
                        if new_key != old_key {
                            engine.store.release_schedule_key(&old_key);
                            let _ = engine.store.reserve_schedule_key(new_key, guard.id);
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append + apply + notify in one call, inside the caller's slot lock.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        // The caller may have cloned the slot's Arc before a concurrent
        // delete committed. The deletion removes the slot from the store
        // under its write lock, so once we hold the lock this check settles
        // whether the slot still exists.
        if !self.store.contains(&slot.id) {
            return Err(EngineError::NotFound(slot.id));
        }
        self.wal_append(event).await?;
        let experience_id = slot.experience_id;
        apply_to_slot(slot, event);
        self.notify.send(experience_id, event);
        Ok(())
    }

    /// Append one audit entry. Best-effort by contract: a failure is reported
    /// to the operator channel and counted, the business mutation stands.
    pub(super) fn audit_best_effort(
        &self,
        event_type: AuditEventType,
        entity_id: Ulid,
        actor: &Actor,
        metadata: serde_json::Value,
    ) {
        let entry = AuditEntry {
            id: Ulid::new(),
            event_type,
            entity_type: "slot".into(),
            entity_id,
            actor_id: actor.id.clone(),
            actor_type: actor.kind,
            metadata,
            created_at: now_ms(),
        };
        if let Err(e) = self.audit.record(entry) {
            metrics::counter!(crate::observability::AUDIT_FAILURES_TOTAL).increment(1);
            tracing::error!(
                event_type = event_type.as_str(),
                %entity_id,
                "failed to record audit entry: {e}"
            );
        }
    }
}
