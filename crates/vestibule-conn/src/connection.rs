//! Connection record types and configuration.

use std::time::{Duration, Instant};

use vestibule_protocol::{PlayerId, RoomCode, RoomId, TransportId};

use crate::SessionToken;

// ---------------------------------------------------------------------------
// ConnConfig
// ---------------------------------------------------------------------------

/// Timeouts and windows for the connection layer.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Age under which a join lock held by another transport blocks the
    /// caller. An older lock is treated as abandoned (crashed join) and
    /// silently reclaimed.
    pub join_lock_ttl: Duration,

    /// Age at which the stale-sweep removes a lock outright.
    pub lock_reap_after: Duration,

    /// Width of the rolling rate-limit window.
    pub rate_window: Duration,

    /// Absolute session lifetime from issuance.
    pub session_ttl: Duration,

    /// How long after its connection dropped a session stays recoverable.
    pub session_disconnect_grace: Duration,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            join_lock_ttl: Duration::from_secs(5),
            lock_reap_after: Duration::from_secs(10),
            rate_window: Duration::from_secs(60),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            session_disconnect_grace: Duration::from_secs(5 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionRecord
// ---------------------------------------------------------------------------

/// How a connection entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// A live bidirectional transport connection.
    Live,
    /// An out-of-band call from an external activity server.
    ExternalApi,
    /// A connection rebound through session recovery.
    Recovered,
}

/// One tracked transport connection, bound to a (user, room).
///
/// Purely ephemeral — never persisted. A member survives the loss of their
/// connection; the connection never survives the process.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub transport_id: TransportId,
    pub user_id: PlayerId,
    pub username: String,
    pub room_id: RoomId,
    pub room_code: RoomCode,
    pub session_token: Option<SessionToken>,
    pub kind: ConnectionKind,
    /// When a user holds several connections (duplicate tabs), exactly one
    /// is primary after consolidation.
    pub is_primary: bool,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl ConnectionRecord {
    pub fn new(
        transport_id: TransportId,
        user_id: PlayerId,
        username: impl Into<String>,
        room_id: RoomId,
        room_code: RoomCode,
        kind: ConnectionKind,
    ) -> Self {
        let now = Instant::now();
        Self {
            transport_id,
            user_id,
            username: username.into(),
            room_id,
            room_code,
            session_token: None,
            kind,
            is_primary: true,
            connected_at: now,
            last_activity: now,
        }
    }
}

/// An advisory join lock. Not a real mutex: exclusivity holds only within
/// this process, and only for [`ConnConfig::join_lock_ttl`].
#[derive(Debug, Clone)]
pub(crate) struct JoinLock {
    pub(crate) holder: TransportId,
    pub(crate) acquired_at: Instant,
}
