//! The connection manager: registry, join locks, rate windows, sessions.
//!
//! This is the single coordinator for all ephemeral connection state —
//! one type, with the session/recovery bookkeeping always present rather
//! than bolted on as an extended tier.
//!
//! # Concurrency note
//!
//! `ConnectionManager` is NOT thread-safe by itself — plain `HashMap`s,
//! `&mut self` methods. It is owned by the engine behind one async mutex
//! and every method completes without suspending, so mutations are
//! race-free between suspension points. The join LOCKS it hands out exist
//! precisely because the join sequence *does* suspend (store calls)
//! between its steps.
//!
//! # Scaling boundary
//!
//! The advisory TTL locks are a single-process design. A multi-instance
//! deployment must replace them with a conditional write in the store;
//! nothing else in this type survives that move either.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use vestibule_protocol::{PlayerId, RoomCode, RoomId, TransportId};

use crate::connection::JoinLock;
use crate::{
    ConnConfig, ConnectionRecord, PlayerSession, SessionError, SessionStatus,
    SessionToken,
};

type LockKey = (String, RoomCode);
type SessionKey = (PlayerId, RoomId);

/// Tracks live transport connections, advisory join locks, rate windows,
/// and recoverable sessions.
pub struct ConnectionManager {
    /// All tracked connections, keyed by transport id.
    connections: HashMap<TransportId, ConnectionRecord>,

    /// Per-user connection index (a user can hold several tabs at once).
    user_connections: HashMap<PlayerId, HashSet<TransportId>>,

    /// Advisory join locks, keyed by (username, room code).
    join_locks: HashMap<LockKey, JoinLock>,

    /// Rolling attempt windows, keyed by (transport, action).
    rate_windows: HashMap<(TransportId, String), VecDeque<Instant>>,

    /// Recoverable sessions, one per (user, room).
    sessions: HashMap<SessionKey, PlayerSession>,

    /// Token → session-key index, kept in sync with `sessions`.
    tokens: HashMap<SessionToken, SessionKey>,

    config: ConnConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnConfig) -> Self {
        Self {
            connections: HashMap::new(),
            user_connections: HashMap::new(),
            join_locks: HashMap::new(),
            rate_windows: HashMap::new(),
            sessions: HashMap::new(),
            tokens: HashMap::new(),
            config,
        }
    }

    // -- Connection registry ----------------------------------------------

    /// Registers a connection. Replaces any record under the same transport
    /// id (a transport id is never reused while live).
    pub fn add_connection(&mut self, record: ConnectionRecord) {
        self.user_connections
            .entry(record.user_id.clone())
            .or_default()
            .insert(record.transport_id.clone());
        tracing::debug!(
            transport = %record.transport_id,
            user = %record.user_id,
            room = %record.room_code,
            "connection registered"
        );
        self.connections
            .insert(record.transport_id.clone(), record);
    }

    /// Bumps a connection's activity stamp.
    pub fn touch_connection(&mut self, transport: &TransportId) {
        if let Some(record) = self.connections.get_mut(transport) {
            record.last_activity = Instant::now();
        }
    }

    /// Attaches a session token to a connection record.
    pub fn bind_session_token(
        &mut self,
        transport: &TransportId,
        token: SessionToken,
    ) {
        if let Some(record) = self.connections.get_mut(transport) {
            record.session_token = Some(token);
        }
    }

    pub fn connection(
        &self,
        transport: &TransportId,
    ) -> Option<&ConnectionRecord> {
        self.connections.get(transport)
    }

    /// All connections currently held by a user.
    pub fn connections_for_user(
        &self,
        user: &PlayerId,
    ) -> Vec<&ConnectionRecord> {
        self.user_connections
            .get(user)
            .into_iter()
            .flatten()
            .filter_map(|t| self.connections.get(t))
            .collect()
    }

    /// Removes a connection and everything hanging off it: the user index
    /// entry, any join lock it holds, and the session's disconnect clock
    /// starts ticking.
    pub fn remove_connection(
        &mut self,
        transport: &TransportId,
    ) -> Option<ConnectionRecord> {
        let record = self.connections.remove(transport)?;

        if let Some(set) = self.user_connections.get_mut(&record.user_id) {
            set.remove(transport);
            if set.is_empty() {
                self.user_connections.remove(&record.user_id);
            }
        }

        let lock_key =
            (record.username.clone(), record.room_code.clone());
        if self
            .join_locks
            .get(&lock_key)
            .is_some_and(|l| &l.holder == transport)
        {
            self.join_locks.remove(&lock_key);
        }

        let session_key =
            (record.user_id.clone(), record.room_id);
        if let Some(session) = self.sessions.get_mut(&session_key) {
            if &session.transport_id == transport
                && session.disconnected_at.is_none()
            {
                session.disconnected_at = Some(Instant::now());
            }
        }

        tracing::debug!(
            transport = %record.transport_id,
            user = %record.user_id,
            "connection removed"
        );
        Some(record)
    }

    /// Marks all but the most-recently-active of a user's connections for
    /// termination and returns their transport ids. The survivor becomes
    /// the primary connection. The caller actually closes the transports
    /// and calls [`remove_connection`](Self::remove_connection) for each.
    pub fn consolidate_connections(
        &mut self,
        user: &PlayerId,
    ) -> Vec<TransportId> {
        let Some(ids) = self.user_connections.get(user) else {
            return Vec::new();
        };

        let survivor = ids
            .iter()
            .filter_map(|t| self.connections.get(t))
            .max_by_key(|r| r.last_activity)
            .map(|r| r.transport_id.clone());
        let Some(survivor) = survivor else {
            return Vec::new();
        };

        let mut doomed = Vec::new();
        for id in ids.clone() {
            let Some(record) = self.connections.get_mut(&id) else {
                continue;
            };
            if id == survivor {
                record.is_primary = true;
            } else {
                record.is_primary = false;
                doomed.push(id);
            }
        }
        if !doomed.is_empty() {
            tracing::info!(
                %user,
                kept = %survivor,
                dropping = doomed.len(),
                "consolidated duplicate connections"
            );
        }
        doomed
    }

    // -- Join locks --------------------------------------------------------

    /// Tries to take the advisory join lock for (username, room code).
    ///
    /// Returns `false` when another transport holds a lock younger than
    /// the TTL — the caller must abort its join. An older lock is treated
    /// as abandoned by a crashed join and silently reclaimed. Re-entry by
    /// the same transport refreshes the lock.
    pub fn acquire_join_lock(
        &mut self,
        username: &str,
        code: &RoomCode,
        transport: &TransportId,
    ) -> bool {
        let key = (username.to_string(), code.clone());
        if let Some(existing) = self.join_locks.get(&key) {
            let contended = &existing.holder != transport
                && existing.acquired_at.elapsed()
                    < self.config.join_lock_ttl;
            if contended {
                tracing::debug!(
                    username,
                    room = %code,
                    holder = %existing.holder,
                    "join lock contended"
                );
                return false;
            }
        }
        self.join_locks.insert(
            key,
            JoinLock {
                holder: transport.clone(),
                acquired_at: Instant::now(),
            },
        );
        true
    }

    /// Releases the join lock for (username, room code), if any.
    pub fn release_join_lock(&mut self, username: &str, code: &RoomCode) {
        self.join_locks
            .remove(&(username.to_string(), code.clone()));
    }

    // -- Rate limiting -----------------------------------------------------

    /// Records an attempt at `action` by `transport`, pruning entries that
    /// fell out of the rolling window.
    pub fn record_attempt(&mut self, transport: &TransportId, action: &str) {
        let window = self.config.rate_window;
        let entries = self
            .rate_windows
            .entry((transport.clone(), action.to_string()))
            .or_default();
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            entries.pop_front();
        }
        entries.push_back(now);
    }

    /// Whether `transport` has hit `threshold` attempts at `action` within
    /// the window. The threshold is the caller's — different actions get
    /// different budgets.
    pub fn is_rate_limited(
        &self,
        transport: &TransportId,
        action: &str,
        threshold: usize,
    ) -> bool {
        let Some(entries) = self
            .rate_windows
            .get(&(transport.clone(), action.to_string()))
        else {
            return false;
        };
        let window = self.config.rate_window;
        let now = Instant::now();
        let recent = entries
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count();
        recent >= threshold
    }

    // -- Sessions ----------------------------------------------------------

    /// Issues a session for (user, room), overwriting any previous one.
    pub fn create_session(
        &mut self,
        user: PlayerId,
        room: RoomId,
        room_code: RoomCode,
        transport: TransportId,
    ) -> PlayerSession {
        let key = (user.clone(), room);
        if let Some(old) = self.sessions.remove(&key) {
            self.tokens.remove(&old.token);
        }

        let token = SessionToken::generate();
        let now = Instant::now();
        let session = PlayerSession {
            user_id: user.clone(),
            room_id: room,
            room_code,
            token: token.clone(),
            transport_id: transport,
            status: SessionStatus::Active,
            issued_at: now,
            expires_at: now + self.config.session_ttl,
            disconnected_at: None,
        };
        self.tokens.insert(token, key.clone());
        self.sessions.insert(key, session.clone());
        tracing::info!(%user, %room, "session issued");
        session
    }

    /// Deletes a (user, room) session outright — explicit leave, no
    /// recovery afterwards.
    pub fn remove_session(&mut self, user: &PlayerId, room: RoomId) {
        if let Some(old) = self.sessions.remove(&(user.clone(), room)) {
            self.tokens.remove(&old.token);
        }
    }

    pub fn session(
        &self,
        user: &PlayerId,
        room: RoomId,
    ) -> Option<&PlayerSession> {
        self.sessions.get(&(user.clone(), room))
    }

    pub fn session_by_token(
        &self,
        token: &SessionToken,
    ) -> Option<&PlayerSession> {
        self.tokens
            .get(token)
            .and_then(|key| self.sessions.get(key))
    }

    /// Redeems a token, rebinding the session to a fresh transport.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] — token unknown to this process
    /// - [`SessionError::Expired`] — absolute lifetime or post-disconnect
    ///   grace window elapsed (the session is marked expired so a retry
    ///   fails the same way)
    pub fn recover_session(
        &mut self,
        token: &SessionToken,
        new_transport: TransportId,
    ) -> Result<PlayerSession, SessionError> {
        let key = self
            .tokens
            .get(token)
            .cloned()
            .ok_or(SessionError::NotFound)?;
        let session = self
            .sessions
            .get_mut(&key)
            .ok_or(SessionError::NotFound)?;

        let absolute_gone = Instant::now() >= session.expires_at;
        let grace_gone = session.disconnected_at.is_some_and(|at| {
            at.elapsed() > self.config.session_disconnect_grace
        });
        if session.status == SessionStatus::Expired
            || absolute_gone
            || grace_gone
        {
            session.status = SessionStatus::Expired;
            return Err(SessionError::Expired(session.user_id.clone()));
        }

        session.transport_id = new_transport;
        session.disconnected_at = None;
        tracing::info!(
            user = %session.user_id,
            room = %session.room_id,
            "session recovered"
        );
        Ok(session.clone())
    }

    /// Deletes sessions past either expiry clock. Returns the (user, room)
    /// keys removed so the caller can reconcile.
    pub fn expire_sessions(&mut self) -> Vec<(PlayerId, RoomId)> {
        let grace = self.config.session_disconnect_grace;
        let mut expired = Vec::new();
        self.sessions.retain(|key, session| {
            let dead = session.status == SessionStatus::Expired
                || Instant::now() >= session.expires_at
                || session
                    .disconnected_at
                    .is_some_and(|at| at.elapsed() > grace);
            if dead {
                self.tokens.remove(&session.token);
                expired.push(key.clone());
            }
            !dead
        });
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired sessions swept");
        }
        expired
    }

    // -- Stale sweep -------------------------------------------------------

    /// Removes connections idle past `max_idle`, locks older than the reap
    /// threshold, and rate windows with no recent entries. Side effect
    /// only: returns the removed transport ids for the caller to reconcile
    /// externally (close transports, flip members).
    pub fn cleanup_stale(&mut self, max_idle: Duration) -> Vec<TransportId> {
        let stale: Vec<TransportId> = self
            .connections
            .values()
            .filter(|r| r.last_activity.elapsed() > max_idle)
            .map(|r| r.transport_id.clone())
            .collect();
        for id in &stale {
            self.remove_connection(id);
        }

        let reap = self.config.lock_reap_after;
        self.join_locks
            .retain(|_, lock| lock.acquired_at.elapsed() <= reap);

        let window = self.config.rate_window;
        self.rate_windows.retain(|_, entries| {
            entries
                .iter()
                .any(|t| t.elapsed() <= window)
        });

        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "stale connections swept");
        }
        stale
    }

    // -- Introspection -----------------------------------------------------

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn lock_count(&self) -> usize {
        self.join_locks.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Time-dependent behavior is tested the same way the session layer's
    //! grandparents did it: zero thresholds to make things expire
    //! immediately, hour-long thresholds to make them never expire during
    //! a test. No sleeps.

    use vestibule_protocol::RoomId;

    use super::*;
    use crate::ConnectionKind;

    // -- Helpers ----------------------------------------------------------

    fn pid(id: &str) -> PlayerId {
        PlayerId::new(id)
    }

    fn tid(id: &str) -> TransportId {
        TransportId::new(id)
    }

    fn code(c: &str) -> RoomCode {
        RoomCode::new(c)
    }

    fn record(transport: &str, user: &str) -> ConnectionRecord {
        ConnectionRecord::new(
            tid(transport),
            pid(user),
            user,
            RoomId(1),
            code("AB2CD3"),
            ConnectionKind::Live,
        )
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ConnConfig::default())
    }

    /// Locks are instantly reclaimable, sessions instantly expired.
    fn manager_with_zero_ttls() -> ConnectionManager {
        ConnectionManager::new(ConnConfig {
            join_lock_ttl: Duration::ZERO,
            session_ttl: Duration::ZERO,
            session_disconnect_grace: Duration::ZERO,
            ..ConnConfig::default()
        })
    }

    // =====================================================================
    // Registry
    // =====================================================================

    #[test]
    fn test_add_and_remove_connection_round_trip() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        assert_eq!(mgr.connection_count(), 1);
        assert!(mgr.connection(&tid("t1")).is_some());

        let removed = mgr.remove_connection(&tid("t1")).unwrap();
        assert_eq!(removed.user_id, pid("u1"));
        assert_eq!(mgr.connection_count(), 0);
        assert!(mgr.connections_for_user(&pid("u1")).is_empty());
    }

    #[test]
    fn test_remove_connection_releases_held_lock() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        assert!(mgr.acquire_join_lock("u1", &code("AB2CD3"), &tid("t1")));
        assert_eq!(mgr.lock_count(), 1);

        mgr.remove_connection(&tid("t1"));

        assert_eq!(mgr.lock_count(), 0, "lock released with connection");
    }

    #[test]
    fn test_remove_connection_keeps_other_holders_lock() {
        // A lock held by a DIFFERENT transport must survive the removal.
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        mgr.add_connection(record("t2", "u1"));
        assert!(mgr.acquire_join_lock("u1", &code("AB2CD3"), &tid("t2")));

        mgr.remove_connection(&tid("t1"));

        assert_eq!(mgr.lock_count(), 1);
    }

    #[test]
    fn test_consolidate_keeps_most_recently_active() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        mgr.add_connection(record("t2", "u1"));
        mgr.add_connection(record("t3", "u1"));
        // t2 is the most recently active.
        mgr.touch_connection(&tid("t2"));

        let doomed = mgr.consolidate_connections(&pid("u1"));

        assert_eq!(doomed.len(), 2);
        assert!(!doomed.contains(&tid("t2")));
        assert!(mgr.connection(&tid("t2")).unwrap().is_primary);
        assert!(!mgr.connection(&tid("t1")).unwrap().is_primary);
    }

    #[test]
    fn test_consolidate_unknown_user_returns_empty() {
        let mut mgr = manager();
        assert!(mgr.consolidate_connections(&pid("ghost")).is_empty());
    }

    // =====================================================================
    // Join locks
    // =====================================================================

    #[test]
    fn test_acquire_join_lock_exclusive_between_transports() {
        // Two simultaneous joins for the same (username, room): exactly
        // one acquires; the other must abort.
        let mut mgr = manager();
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
        assert!(!mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t2")));
    }

    #[test]
    fn test_acquire_join_lock_reentrant_for_same_transport() {
        let mut mgr = manager();
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
    }

    #[test]
    fn test_acquire_join_lock_different_keys_independent() {
        let mut mgr = manager();
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
        // Different username, same room — no contention.
        assert!(mgr.acquire_join_lock("bob", &code("AB2CD3"), &tid("t2")));
        // Same username, different room — no contention.
        assert!(mgr.acquire_join_lock("ada", &code("XYZ234"), &tid("t3")));
    }

    #[test]
    fn test_acquire_join_lock_reclaims_abandoned_lock() {
        // With a zero TTL every existing lock counts as abandoned, so a
        // contender reclaims it instead of failing.
        let mut mgr = manager_with_zero_ttls();
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t2")));
    }

    #[test]
    fn test_release_join_lock_frees_key() {
        let mut mgr = manager();
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));
        mgr.release_join_lock("ada", &code("AB2CD3"));
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t2")));
    }

    // =====================================================================
    // Rate limiting
    // =====================================================================

    #[test]
    fn test_is_rate_limited_below_threshold() {
        let mut mgr = manager();
        mgr.record_attempt(&tid("t1"), "join");
        mgr.record_attempt(&tid("t1"), "join");
        assert!(!mgr.is_rate_limited(&tid("t1"), "join", 3));
    }

    #[test]
    fn test_is_rate_limited_at_threshold() {
        let mut mgr = manager();
        for _ in 0..3 {
            mgr.record_attempt(&tid("t1"), "join");
        }
        assert!(mgr.is_rate_limited(&tid("t1"), "join", 3));
    }

    #[test]
    fn test_rate_windows_are_per_action_and_transport() {
        let mut mgr = manager();
        for _ in 0..5 {
            mgr.record_attempt(&tid("t1"), "join");
        }
        assert!(!mgr.is_rate_limited(&tid("t1"), "status", 3));
        assert!(!mgr.is_rate_limited(&tid("t2"), "join", 3));
    }

    #[test]
    fn test_attempts_outside_window_dont_count() {
        let mut mgr = ConnectionManager::new(ConnConfig {
            rate_window: Duration::from_nanos(1),
            ..ConnConfig::default()
        });
        for _ in 0..10 {
            mgr.record_attempt(&tid("t1"), "join");
        }
        // Let the 1 ns window lapse; every attempt is now stale.
        std::thread::sleep(Duration::from_millis(1));
        assert!(!mgr.is_rate_limited(&tid("t1"), "join", 1));
    }

    // =====================================================================
    // Sessions
    // =====================================================================

    #[test]
    fn test_create_session_overwrites_previous() {
        let mut mgr = manager();
        let first = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));
        let second = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t2"));

        assert_ne!(first.token, second.token);
        assert_eq!(mgr.session_count(), 1);
        // The replaced token no longer resolves.
        assert!(mgr.session_by_token(&first.token).is_none());
        assert!(mgr.session_by_token(&second.token).is_some());
    }

    #[test]
    fn test_sessions_are_per_room() {
        let mut mgr = manager();
        mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));
        mgr.create_session(pid("u1"), RoomId(2), code("AB2CD3"), tid("t1"));
        assert_eq!(mgr.session_count(), 2);
    }

    #[test]
    fn test_recover_session_rebinds_transport() {
        let mut mgr = manager();
        let session = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));

        let recovered =
            mgr.recover_session(&session.token, tid("t2")).unwrap();

        assert_eq!(recovered.transport_id, tid("t2"));
        assert!(recovered.disconnected_at.is_none());
        assert_eq!(recovered.status, SessionStatus::Active);
    }

    #[test]
    fn test_recover_session_unknown_token_not_found() {
        let mut mgr = manager();
        let result = mgr.recover_session(
            &SessionToken::from_string("bogus"),
            tid("t2"),
        );
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[test]
    fn test_recover_session_past_absolute_expiry_fails() {
        let mut mgr = manager_with_zero_ttls();
        let session = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));

        let result = mgr.recover_session(&session.token, tid("t2"));

        assert!(
            matches!(result, Err(SessionError::Expired(u)) if u == pid("u1"))
        );
    }

    #[test]
    fn test_recover_session_past_disconnect_grace_fails() {
        let mut mgr = ConnectionManager::new(ConnConfig {
            session_disconnect_grace: Duration::ZERO,
            ..ConnConfig::default()
        });
        mgr.add_connection(record("t1", "u1"));
        let session = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));
        // Dropping the bound connection starts the disconnect clock; with
        // a zero grace the session is immediately unrecoverable.
        mgr.remove_connection(&tid("t1"));

        let result = mgr.recover_session(&session.token, tid("t2"));
        assert!(matches!(result, Err(SessionError::Expired(_))));
    }

    #[test]
    fn test_recover_session_within_grace_succeeds() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        let session = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));
        mgr.remove_connection(&tid("t1"));

        let recovered =
            mgr.recover_session(&session.token, tid("t2")).unwrap();
        assert_eq!(recovered.transport_id, tid("t2"));
    }

    #[test]
    fn test_expire_sessions_removes_dead_and_keeps_live() {
        let mut mgr = ConnectionManager::new(ConnConfig {
            session_disconnect_grace: Duration::ZERO,
            ..ConnConfig::default()
        });
        mgr.add_connection(record("t1", "u1"));
        mgr.add_connection(record("t2", "u2"));
        let dead = mgr.create_session(pid("u1"), RoomId(1), code("AB2CD3"), tid("t1"));
        mgr.create_session(pid("u2"), RoomId(1), code("AB2CD3"), tid("t2"));
        mgr.remove_connection(&tid("t1"));

        let expired = mgr.expire_sessions();

        assert_eq!(expired, vec![(pid("u1"), RoomId(1))]);
        assert_eq!(mgr.session_count(), 1);
        assert!(mgr.session_by_token(&dead.token).is_none());
    }

    // =====================================================================
    // Stale sweep
    // =====================================================================

    #[test]
    fn test_cleanup_stale_removes_idle_connections() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));
        mgr.add_connection(record("t2", "u2"));

        // Zero idle budget — everything is stale.
        let removed = mgr.cleanup_stale(Duration::ZERO);

        assert_eq!(removed.len(), 2);
        assert_eq!(mgr.connection_count(), 0);
    }

    #[test]
    fn test_cleanup_stale_keeps_fresh_connections() {
        let mut mgr = manager();
        mgr.add_connection(record("t1", "u1"));

        let removed = mgr.cleanup_stale(Duration::from_secs(3600));

        assert!(removed.is_empty());
        assert_eq!(mgr.connection_count(), 1);
    }

    #[test]
    fn test_cleanup_stale_reaps_old_locks() {
        let mut mgr = ConnectionManager::new(ConnConfig {
            lock_reap_after: Duration::ZERO,
            ..ConnConfig::default()
        });
        assert!(mgr.acquire_join_lock("ada", &code("AB2CD3"), &tid("t1")));

        mgr.cleanup_stale(Duration::from_secs(3600));

        assert_eq!(mgr.lock_count(), 0);
    }
}
