/// Counter buckets younger than this are never garbage-collected,
/// regardless of their window length.
pub const COUNTER_RETENTION_FLOOR_SECONDS: i64 = 7200;

/// How often the background retention sweep runs.
pub const CLEANUP_INTERVAL_SECONDS: u64 = 3600;

/// Reputation statistics older than this are trimmed by the sweep.
pub const STATS_RETENTION_DAYS: i64 = 90;
