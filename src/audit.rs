use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_AUDIT_QUERY_RESULTS;
use crate::schedule::Ms;

/// Closed set of audit event types this service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    #[serde(rename = "slot.created")]
    SlotCreated,
    #[serde(rename = "slot.updated")]
    SlotUpdated,
    #[serde(rename = "slot.deleted")]
    SlotDeleted,
    #[serde(rename = "slot.blocked")]
    SlotBlocked,
    #[serde(rename = "slot.unblocked")]
    SlotUnblocked,
    #[serde(rename = "slot.availability_decremented")]
    AvailabilityDecremented,
    #[serde(rename = "slot.availability_incremented")]
    AvailabilityIncremented,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SlotCreated => "slot.created",
            AuditEventType::SlotUpdated => "slot.updated",
            AuditEventType::SlotDeleted => "slot.deleted",
            AuditEventType::SlotBlocked => "slot.blocked",
            AuditEventType::SlotUnblocked => "slot.unblocked",
            AuditEventType::AvailabilityDecremented => "slot.availability_decremented",
            AuditEventType::AvailabilityIncremented => "slot.availability_incremented",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "vendor")]
    Vendor,
    #[serde(rename = "system")]
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Vendor => "vendor",
            ActorType::System => "system",
        }
    }
}

/// Who performed a mutating action. Slot operations arriving over the wire
/// carry the connecting user name; background tasks act as `System`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<String>,
    pub kind: ActorType,
}

impl Actor {
    pub fn vendor(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), kind: ActorType::Vendor }
    }

    pub fn system() -> Self {
        Self { id: None, kind: ActorType::System }
    }
}

/// One immutable compliance record. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    pub event_type: AuditEventType,
    pub entity_type: String,
    pub entity_id: Ulid,
    pub actor_id: Option<String>,
    pub actor_type: ActorType,
    /// Stored on disk as a JSON string: `serde_json::Value` is self-describing
    /// and cannot pass through bincode's non-self-describing format directly.
    #[serde(with = "metadata_as_json_string")]
    pub metadata: serde_json::Value,
    pub created_at: Ms,
}

mod metadata_as_json_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        v.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let raw = String::deserialize(d)?;
        serde_json::from_str(&raw).map_err(D::Error::custom)
    }
}

/// Metadata keys redacted before persistence so payment/PII data can never
/// leak into the compliance trail.
const SENSITIVE_KEYS: &[&str] = &[
    "payment_method_id",
    "card_number",
    "cvv",
    "cvc",
    "password",
    "token",
    "secret",
    "api_key",
    "access_token",
    "refresh_token",
    "ssn",
    "bank_account",
    "routing_number",
];

/// Replace values under sensitive keys with `"[REDACTED]"`, recursing into
/// nested objects.
pub fn redact_metadata(metadata: serde_json::Value) -> serde_json::Value {
    match metadata {
        serde_json::Value::Object(map) => {
            let redacted = map
                .into_iter()
                .map(|(key, value)| {
                    let lower = key.to_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (key, serde_json::Value::String("[REDACTED]".into()))
                    } else {
                        (key, redact_metadata(value))
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        other => other,
    }
}

/// Append-only audit log: one file per tenant, same
/// `[u32: len][bincode][u32: crc32]` framing as the WAL, plus an in-memory
/// index for compliance queries.
///
/// Writes are best-effort by contract: the caller reports failures to the
/// operator channel but never rolls back the business mutation.
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
    entries: RwLock<Vec<AuditEntry>>,
    path: PathBuf,
}

impl AuditLog {
    /// Open (or create) the audit file at `path`, replaying existing entries
    /// into the in-memory index. Truncated/corrupt tails are discarded.
    pub fn open(path: &Path) -> io::Result<Self> {
        let entries = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            entries: RwLock::new(entries),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("audit index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one entry. Metadata is redacted before it touches disk.
    /// The entry only enters the queryable index once the file write
    /// succeeded, so index and file can never disagree.
    pub fn record(&self, mut entry: AuditEntry) -> io::Result<()> {
        entry.metadata = redact_metadata(entry.metadata);

        {
            let mut writer = self.writer.lock().expect("audit writer poisoned");
            let payload = bincode::serialize(&entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writer.write_all(&(payload.len() as u32).to_le_bytes())?;
            writer.write_all(&payload)?;
            writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            writer.flush()?;
        }

        self.entries
            .write()
            .expect("audit index poisoned")
            .push(entry);
        Ok(())
    }

    /// Entries for one entity, newest first.
    pub fn by_entity(&self, entity_id: Ulid) -> Vec<AuditEntry> {
        self.filter(|e| e.entity_id == entity_id)
    }

    /// Entries recorded by one actor, newest first.
    pub fn by_actor(&self, actor_id: &str) -> Vec<AuditEntry> {
        self.filter(|e| e.actor_id.as_deref() == Some(actor_id))
    }

    /// Entries within an inclusive `created_at` range, newest first,
    /// optionally narrowed to one entity type.
    pub fn by_range(&self, start: Ms, end: Ms, entity_type: Option<&str>) -> Vec<AuditEntry> {
        self.filter(|e| {
            e.created_at >= start
                && e.created_at <= end
                && entity_type.is_none_or(|t| e.entity_type == t)
        })
    }

    fn filter(&self, pred: impl Fn(&AuditEntry) -> bool) -> Vec<AuditEntry> {
        let entries = self.entries.read().expect("audit index poisoned");
        entries
            .iter()
            .rev()
            .filter(|e| pred(e))
            .take(MAX_AUDIT_QUERY_RESULTS)
            .cloned()
            .collect()
    }

    fn replay(path: &Path) -> io::Result<Vec<AuditEntry>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<AuditEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
        }

        Ok(entries)
    }
}
