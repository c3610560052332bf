//! Configuration for the sync and heartbeat layers.

use std::time::Duration;

/// Tunables for [`StatusSyncManager`](crate::StatusSyncManager).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the deferred queue is drained.
    pub drain_interval: Duration,

    /// Apply attempts per queued update before it is dropped.
    pub max_apply_attempts: u32,

    /// Chunk size for bulk updates. Updates inside a chunk run with full
    /// parallelism; chunks run sequentially.
    pub bulk_chunk_size: usize,

    /// Failure ratio above which a bulk update rolls back its successes.
    pub bulk_rollback_threshold: f64,

    /// Minimum gap between store writes for one player's heartbeat. Beats
    /// inside the gap only touch the in-memory record.
    pub heartbeat_persist_interval: Duration,

    /// How often stale-heartbeat detection runs.
    pub disconnect_sweep_interval: Duration,

    /// Silence after which a tracked heartbeat counts as a disconnect.
    pub heartbeat_stale_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(5),
            max_apply_attempts: 3,
            bulk_chunk_size: 5,
            bulk_rollback_threshold: 0.5,
            heartbeat_persist_interval: Duration::from_secs(15),
            disconnect_sweep_interval: Duration::from_secs(30),
            heartbeat_stale_after: Duration::from_secs(60),
        }
    }
}

/// Tunables for [`HeartbeatManager`](crate::HeartbeatManager).
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Silence after which a connection is stale. Roughly twice the
    /// expected client ping interval.
    pub timeout: Duration,

    /// Extended window for a member who was just promoted to host, so the
    /// failover itself doesn't re-trigger on their first missed beat.
    /// Recent-transfer entries self-expire after this long.
    pub recent_host_grace: Duration,

    /// How often the in-memory sweep runs.
    pub sweep_interval: Duration,

    /// `last_ping` age at which the secondary store sweep flags a row.
    /// Must comfortably exceed the heartbeat persist interval or freshly
    /// beating members would be flagged between persists.
    pub store_stale_after: Duration,

    /// How often the secondary store sweep runs.
    pub store_sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            recent_host_grace: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(5),
            store_stale_after: Duration::from_secs(60),
            store_sweep_interval: Duration::from_secs(30),
        }
    }
}
