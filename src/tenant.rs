use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::audit::AuditLog;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine, WAL, audit
/// trail and compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    lock_timeout: Duration,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, lock_timeout: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            lock_timeout,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let audit_path = self.data_dir.join(format!("{safe_name}.audit"));
        let audit = Arc::new(AuditLog::open(&audit_path)?);
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, audit, notify, self.lock_timeout)?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Actor;
    use crate::engine::DEFAULT_LOCK_TIMEOUT;
    use crate::model::SlotSpec;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tally_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn mk_manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, DEFAULT_LOCK_TIMEOUT)
    }

    fn spec(experience_id: Ulid) -> SlotSpec {
        SlotSpec {
            id: Ulid::new(),
            experience_id,
            date: "2026-06-01".parse().unwrap(),
            time: "10:00".parse().unwrap(),
            total_capacity: 10,
            price_override: None,
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = mk_manager(dir);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        // The same schedule in two tenants never collides, and a decrement
        // in one tenant is invisible to the other.
        let eid = Ulid::new();
        let a = eng_a.create_slot(spec(eid), &Actor::system()).await.unwrap();
        let b = eng_b.create_slot(spec(eid), &Actor::system()).await.unwrap();

        eng_a
            .decrement_availability(a.id, 4, &Actor::system())
            .await
            .unwrap();

        assert_eq!(eng_a.get_slot(a.id).await.unwrap().available, 6);
        assert_eq!(eng_b.get_slot(b.id).await.unwrap().available, 10);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = mk_manager(dir.clone());

        // No files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();

        assert!(dir.join("my_db.wal").exists());
        assert!(dir.join("my_db.audit").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = mk_manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = mk_manager(dir.clone());

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = mk_manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result
            .err()
            .unwrap()
            .to_string()
            .contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_state_survives_reload() {
        let dir = test_data_dir("reload");
        let eid = Ulid::new();
        let slot_id;

        {
            let tm = mk_manager(dir.clone());
            let eng = tm.get_or_create("durable").unwrap();
            let info = eng.create_slot(spec(eid), &Actor::system()).await.unwrap();
            slot_id = info.id;
            eng.decrement_availability(slot_id, 3, &Actor::system())
                .await
                .unwrap();
        }

        let tm = mk_manager(dir);
        let eng = tm.get_or_create("durable").unwrap();
        let slot = eng.get_slot(slot_id).await.unwrap();
        assert_eq!(slot.available, 7);

        // The audit trail came back too.
        assert_eq!(eng.audit.by_entity(slot_id).len(), 2);
    }
}
