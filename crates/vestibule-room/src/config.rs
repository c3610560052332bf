//! Configuration for the lobby and lifecycle layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`LobbyManager`](crate::LobbyManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// How many collision retries room-code allocation gets before giving
    /// up. Generation itself is unbounded-retry in spirit; this ceiling
    /// turns a pathologically full code space into an error instead of a
    /// spin.
    pub max_code_attempts: usize,

    /// Room capacity used when the creator doesn't specify one.
    pub default_max_participants: usize,

    /// Join attempts allowed per transport inside the rolling rate window.
    pub join_attempts_per_window: usize,

    /// How long an untouched snapshot-cache entry survives.
    pub snapshot_ttl: Duration,

    /// Idle threshold for the connection stale-sweep run by maintenance.
    pub connection_idle_timeout: Duration,

    /// How long a group return is expected to take; stamped into room
    /// metadata as `return_in_progress_until`.
    pub group_return_window: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_code_attempts: 32,
            default_max_participants: 8,
            join_attempts_per_window: 10,
            snapshot_ttl: Duration::from_secs(30 * 60),
            connection_idle_timeout: Duration::from_secs(10 * 60),
            group_return_window: Duration::from_secs(60),
        }
    }
}

/// Tunables for [`RoomLifecycleManager`](crate::RoomLifecycleManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long a room with zero active members gets before being marked
    /// abandoned. Short — this only needs to ride out reconnect flaps.
    pub abandonment_grace: Duration,

    /// How long a disconnected host keeps their role before the room
    /// transfers it to the oldest connected member.
    pub host_transfer_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            abandonment_grace: Duration::from_secs(10),
            host_transfer_grace: Duration::from_secs(30),
        }
    }
}
