//! Guard-rail constants. Every externally reachable allocation or loop is
//! bounded by one of these.

/// Max slots a single tenant may hold.
pub const MAX_SLOTS_PER_TENANT: usize = 100_000;

/// Max slot specs accepted in one bulk create.
pub const MAX_BULK_SLOTS: usize = 500;

/// Max capacity a single slot may be created or resized to.
pub const MAX_SLOT_CAPACITY: u32 = 100_000;

/// Max units a single decrement/increment may adjust by.
pub const MAX_ADJUST_QUANTITY: i64 = 10_000;

/// Max length of a vendor-supplied block reason.
pub const MAX_REASON_LEN: usize = 512;

/// Widest inclusive date range an availability query may span, in days.
pub const MAX_DATE_RANGE_DAYS: i64 = 366;

/// Max entries returned by a single audit query.
pub const MAX_AUDIT_QUERY_RESULTS: usize = 1_000;

/// Max lazily created tenants per process.
pub const MAX_TENANTS: usize = 1024;

/// Max tenant (database) name length.
pub const MAX_TENANT_NAME_LEN: usize = 256;
