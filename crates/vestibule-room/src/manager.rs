//! The lobby manager: the write path for room membership.
//!
//! Every mutation follows the same arc: load the authoritative rows from
//! the store, validate, persist, refresh the in-memory snapshot, broadcast
//! to the room topic, append an audit event. The audit append is
//! fire-and-forget — a dead audit trail never fails a live operation.
//!
//! # The join sequence and its lock
//!
//! `join_room` suspends at several store calls between "check capacity"
//! and "insert member", so two concurrent joins can interleave. The
//! advisory join lock serializes joins per (username, room code); the
//! post-insert capacity re-check catches the remaining case of two
//! DIFFERENT users racing past the same capacity check. The re-check
//! DETECTS the overflow and logs it but does not evict; clients treat an
//! over-capacity roster as display-only until someone leaves.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::SystemTime;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use vestibule_conn::{
    Broadcaster, ConnectionKind, ConnectionManager, ConnectionRecord,
    PlayerSession, SessionToken,
};
use vestibule_protocol::{
    LobbyEvent, MemberLocation, MemberRole, PlayerId, PlayerStatus,
    PlayerSummary, Presence, RoomCode, RoomId, RoomStatus, StatusConflict,
    SyncType, TransportId,
};
use vestibule_store::{MemberRow, RoomDraft, RoomRow, RoomStore, StoreError};

use crate::snapshot::SnapshotCache;
use crate::{
    LobbyConfig, LobbyError, RoomLifecycleManager, RoomSnapshot, conflict,
    generate_room_code,
};

/// The connection manager as shared by every component that binds or
/// releases transports.
pub type SharedConnections = Arc<Mutex<ConnectionManager>>;

/// Result of creating a room.
pub struct CreateOutcome {
    pub room: RoomRow,
    pub host: MemberRow,
    pub session: PlayerSession,
    /// The creator's event stream for this room.
    pub events: UnboundedReceiver<LobbyEvent>,
}

/// Result of joining (or rejoining) a room.
pub struct JoinOutcome {
    pub room: RoomRow,
    pub member: MemberRow,
    pub players: Vec<PlayerSummary>,
    pub session: PlayerSession,
    /// `true` when an existing member reconnected rather than a new row
    /// being inserted.
    pub rejoined: bool,
    pub events: UnboundedReceiver<LobbyEvent>,
}

/// Result of a status update: the persisted row plus any conflicts that
/// were detected and resolved along the way.
pub struct StatusOutcome {
    pub member: MemberRow,
    pub conflicts: Vec<StatusConflict>,
}

/// Result of redeeming a session token.
pub struct RecoveryOutcome {
    pub session: PlayerSession,
    pub room: RoomRow,
    pub member: MemberRow,
    pub events: UnboundedReceiver<LobbyEvent>,
}

/// Counters from a maintenance pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub stale_connections: usize,
    pub evicted_snapshots: usize,
}

/// Coordinates room membership against the store, the connection
/// registry, the lifecycle timers, and the broadcast bus.
pub struct LobbyManager<S> {
    store: Arc<S>,
    connections: SharedConnections,
    bus: Broadcaster,
    lifecycle: Arc<RoomLifecycleManager<S>>,
    snapshots: StdMutex<SnapshotCache>,
    config: LobbyConfig,
}

impl<S: RoomStore> LobbyManager<S> {
    pub fn new(
        store: Arc<S>,
        connections: SharedConnections,
        bus: Broadcaster,
        lifecycle: Arc<RoomLifecycleManager<S>>,
        config: LobbyConfig,
    ) -> Self {
        let snapshots = StdMutex::new(SnapshotCache::new(config.snapshot_ttl));
        Self {
            store,
            connections,
            bus,
            lifecycle,
            snapshots,
            config,
        }
    }

    // -- Room creation -----------------------------------------------------

    /// Creates a room with the caller as host.
    ///
    /// Room codes are generated and retried on collision against the
    /// store, up to the configured attempt ceiling.
    pub async fn create_room(
        &self,
        host: &PlayerId,
        username: &str,
        transport: &TransportId,
        activity_type: Option<String>,
        settings: Map<String, Value>,
        max_participants: Option<usize>,
        display_name: Option<String>,
    ) -> Result<CreateOutcome, LobbyError> {
        let max_participants = max_participants
            .unwrap_or(self.config.default_max_participants);

        let mut room = None;
        for _ in 0..self.config.max_code_attempts {
            let draft = RoomDraft {
                code: generate_room_code(),
                host_id: host.clone(),
                activity_type: activity_type.clone(),
                max_participants,
                settings: settings.clone(),
            };
            match self.store.insert_room(draft).await {
                Ok(row) => {
                    room = Some(row);
                    break;
                }
                Err(StoreError::DuplicateCode(code)) => {
                    tracing::debug!(%code, "room code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let room = room.ok_or(LobbyError::CodeSpaceExhausted(
            self.config.max_code_attempts,
        ))?;

        let mut member = MemberRow::new_joined(
            room.id,
            host.clone(),
            username,
            MemberRole::Host,
            transport.clone(),
        );
        member.display_name = display_name;
        self.store.insert_member(member.clone()).await?;

        let session = {
            let mut conn = self.connections.lock().await;
            conn.add_connection(ConnectionRecord::new(
                transport.clone(),
                host.clone(),
                username,
                room.id,
                room.code.clone(),
                ConnectionKind::Live,
            ));
            let session = conn.create_session(
                host.clone(),
                room.id,
                room.code.clone(),
                transport.clone(),
            );
            conn.bind_session_token(transport, session.token.clone());
            session
        };

        let events = self.bus.subscribe(&room.code, transport);
        self.refresh_snapshot(&room, std::slice::from_ref(&member));
        self.audit(
            room.id,
            Some(host),
            "room_created",
            serde_json::json!({
                "code": room.code.as_str(),
                "activity_type": room.activity_type,
            }),
        )
        .await;
        tracing::info!(room = %room.id, code = %room.code, %host, "room created");

        Ok(CreateOutcome {
            room,
            host: member,
            session,
            events,
        })
    }

    // -- Join --------------------------------------------------------------

    /// Joins a user to a room, serialized by the advisory join lock.
    ///
    /// A user with an existing member row is REJOINED: flipped back to
    /// connected, relocated to the lobby, display name refreshed. No
    /// duplicate row is ever inserted. Either way a fresh session is
    /// issued. On any failure after the lock is acquired, the lock is
    /// released before the error propagates.
    pub async fn join_room(
        &self,
        user: &PlayerId,
        username: &str,
        code: &RoomCode,
        transport: &TransportId,
        session_token: Option<&SessionToken>,
        display_name: Option<String>,
    ) -> Result<JoinOutcome, LobbyError> {
        {
            let mut conn = self.connections.lock().await;
            conn.record_attempt(transport, "join");
            if conn.is_rate_limited(
                transport,
                "join",
                self.config.join_attempts_per_window,
            ) {
                return Err(LobbyError::RateLimited {
                    action: "join".into(),
                });
            }
            if !conn.acquire_join_lock(username, code, transport) {
                return Err(LobbyError::JoinLockContended {
                    username: username.to_string(),
                    code: code.clone(),
                });
            }
        }

        let result = self
            .join_room_locked(
                user,
                username,
                code,
                transport,
                session_token,
                display_name,
            )
            .await;

        self.connections
            .lock()
            .await
            .release_join_lock(username, code);
        result
    }

    async fn join_room_locked(
        &self,
        user: &PlayerId,
        username: &str,
        code: &RoomCode,
        transport: &TransportId,
        session_token: Option<&SessionToken>,
        display_name: Option<String>,
    ) -> Result<JoinOutcome, LobbyError> {
        let room = self
            .store
            .room_by_code(code)
            .await?
            .ok_or_else(|| LobbyError::RoomNotFound(code.clone()))?;
        if !room.status.accepts_joins() {
            return Err(LobbyError::RoomNotAvailable {
                code: code.clone(),
                status: room.status,
            });
        }

        let mut members = self.store.members(room.id).await?;
        let existing_idx =
            members.iter().position(|m| &m.user_id == user);

        let (member, rejoined) = match existing_idx {
            Some(idx) => {
                // Rejoin: never insert a duplicate row.
                let member = &mut members[idx];
                member.set_presence(Presence::in_lobby());
                if display_name.is_some() {
                    member.display_name = display_name;
                }
                member.transport_id = Some(transport.clone());
                member.last_ping = SystemTime::now();
                self.store.update_member(member).await?;

                self.lifecycle
                    .cancel(room.id, crate::GraceKind::Abandonment);
                self.lifecycle
                    .cancel_host_transfer_if_original(room.id, user);
                if session_token.is_some() {
                    tracing::debug!(
                        %user,
                        room = %code,
                        "rejoin presented a session token, reissuing"
                    );
                }
                tracing::info!(%user, room = %code, "player rejoined");
                (member.clone(), true)
            }
            None => {
                let connected =
                    members.iter().filter(|m| m.is_connected).count();
                if connected >= room.max_participants {
                    return Err(LobbyError::RoomFull {
                        code: code.clone(),
                        max: room.max_participants,
                    });
                }

                let mut member = MemberRow::new_joined(
                    room.id,
                    user.clone(),
                    username,
                    MemberRole::Player,
                    transport.clone(),
                );
                member.display_name = display_name;
                self.store.insert_member(member.clone()).await?;

                // Capacity re-check: a concurrent join can slip past the
                // count above across the insert await. Detected and
                // logged only; the overflow member is not evicted.
                members = self.store.members(room.id).await?;
                let connected_now =
                    members.iter().filter(|m| m.is_connected).count();
                if connected_now > room.max_participants {
                    tracing::warn!(
                        room = %code,
                        connected = connected_now,
                        max = room.max_participants,
                        "room over capacity after concurrent join"
                    );
                }

                self.lifecycle
                    .cancel(room.id, crate::GraceKind::Abandonment);
                tracing::info!(
                    %user,
                    room = %code,
                    players = members.len(),
                    "player joined"
                );
                let member = members
                    .iter()
                    .find(|m| &m.user_id == user)
                    .cloned()
                    .unwrap_or(member);
                (member, false)
            }
        };

        let session = {
            let mut conn = self.connections.lock().await;
            conn.add_connection(ConnectionRecord::new(
                transport.clone(),
                user.clone(),
                username,
                room.id,
                code.clone(),
                ConnectionKind::Live,
            ));
            let session = conn.create_session(
                user.clone(),
                room.id,
                code.clone(),
                transport.clone(),
            );
            conn.bind_session_token(transport, session.token.clone());
            session
        };

        let events = self.bus.subscribe(code, transport);
        self.store.touch_room(room.id).await?;
        let players = self.refresh_snapshot(&room, &members);
        self.bus.broadcast(
            code,
            LobbyEvent::PlayerJoined {
                player: member.summary(),
                room: room.summary(),
                players: players.clone(),
            },
        );
        self.audit(
            room.id,
            Some(user),
            if rejoined { "player_rejoined" } else { "player_joined" },
            serde_json::json!({ "username": username }),
        )
        .await;

        Ok(JoinOutcome {
            room,
            member,
            players,
            session,
            rejoined,
            events,
        })
    }

    // -- Status updates ----------------------------------------------------

    /// Applies a status/location report to a member.
    ///
    /// Recomputes the canonical presence triple, runs conflict
    /// detection/resolution against the stored row, persists, appends a
    /// status-history audit record carrying both the raw request and the
    /// conflicts, refreshes the snapshot, and broadcasts.
    pub async fn update_player_status(
        &self,
        user: &PlayerId,
        code: &RoomCode,
        status: PlayerStatus,
        location: MemberLocation,
        metadata: Option<Value>,
    ) -> Result<StatusOutcome, LobbyError> {
        let (room, mut members) = self.room_with_members(code).await?;
        let idx = members
            .iter()
            .position(|m| &m.user_id == user)
            .ok_or_else(|| LobbyError::PlayerNotFound {
                user: user.clone(),
                code: code.clone(),
            })?;

        let requested = Presence::derive(status, location);
        let conflicts = conflict::detect(&members[idx], requested);
        let resolved = conflict::resolve(requested, &conflicts);
        if !conflicts.is_empty() {
            tracing::info!(
                %user,
                room = %code,
                conflicts = conflicts.len(),
                "status conflicts resolved"
            );
        }

        {
            let member = &mut members[idx];
            member.set_presence(resolved);
            member.last_ping = SystemTime::now();
            if !resolved.is_connected
                || resolved.location == MemberLocation::Game
            {
                // No live transport while disconnected or inside the
                // external activity.
                member.transport_id = None;
            }
            self.store.update_member(member).await?;
        }
        self.store.touch_room(room.id).await?;

        self.audit(
            room.id,
            Some(user),
            "status_update",
            serde_json::json!({
                "requested": { "status": status, "location": location },
                "resolved": resolved,
                "conflicts": conflicts,
                "metadata": metadata,
            }),
        )
        .await;

        let players = self.refresh_snapshot(&room, &members);
        self.bus.broadcast(
            code,
            LobbyEvent::PlayerStatusUpdated {
                player_id: user.clone(),
                status: resolved,
                players,
                conflicts: conflicts.clone(),
            },
        );

        if room.status == RoomStatus::Returning {
            self.maybe_complete_return(&room, &members).await?;
        }
        if !members.iter().any(|m| m.is_active()) {
            self.lifecycle.start_abandonment(room.id, code.clone());
        }

        Ok(StatusOutcome {
            member: members[idx].clone(),
            conflicts,
        })
    }

    /// Convenience: a player coming back from the activity to the lobby.
    pub async fn handle_player_return(
        &self,
        user: &PlayerId,
        code: &RoomCode,
    ) -> Result<StatusOutcome, LobbyError> {
        self.update_player_status(
            user,
            code,
            PlayerStatus::Connected,
            MemberLocation::Lobby,
            None,
        )
        .await
    }

    /// Host-initiated return of the whole group to the lobby.
    ///
    /// Flips the room to `Returning` (stamping the expected completion
    /// time into metadata), walks every connected member through the
    /// status-update path, and — once all connected members are back in
    /// the lobby — flips the room to `Lobby`.
    pub async fn initiate_group_return(
        &self,
        host: &PlayerId,
        code: &RoomCode,
    ) -> Result<usize, LobbyError> {
        let (mut room, members) = self.room_with_members(code).await?;
        let requester = members
            .iter()
            .find(|m| &m.user_id == host)
            .ok_or_else(|| LobbyError::PlayerNotFound {
                user: host.clone(),
                code: code.clone(),
            })?;
        if requester.role != MemberRole::Host {
            return Err(LobbyError::NotHost(host.clone()));
        }

        let until = SystemTime::now() + self.config.group_return_window;
        let until_ms = until
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        room.status = RoomStatus::Returning;
        room.metadata.insert(
            "return_in_progress_until".into(),
            Value::from(until_ms),
        );
        room.last_activity = SystemTime::now();
        self.store.update_room(&room).await?;
        self.bus.broadcast(
            code,
            LobbyEvent::RoomStatusChanged {
                room_code: code.clone(),
                new_status: RoomStatus::Returning,
                reason: "group_return".into(),
            },
        );
        self.audit(room.id, Some(host), "group_return_started", Value::Null)
            .await;

        let mut returned = 0;
        for member in members.iter().filter(|m| m.is_connected) {
            match self.handle_player_return(&member.user_id, code).await {
                Ok(_) => returned += 1,
                Err(e) => tracing::warn!(
                    user = %member.user_id,
                    room = %code,
                    error = %e,
                    "group return failed for member"
                ),
            }
        }
        Ok(returned)
    }

    /// When every connected member is back in the lobby, the returning
    /// room flips back to `Lobby`. Called from the status-update path so
    /// stragglers completing later still finish the return.
    async fn maybe_complete_return(
        &self,
        room: &RoomRow,
        members: &[MemberRow],
    ) -> Result<(), LobbyError> {
        let connected: Vec<_> =
            members.iter().filter(|m| m.is_connected).collect();
        let all_back = !connected.is_empty()
            && connected
                .iter()
                .all(|m| m.location == MemberLocation::Lobby);
        if !all_back {
            return Ok(());
        }

        let applied = self
            .store
            .set_room_status_if(
                room.id,
                RoomStatus::Returning,
                RoomStatus::Lobby,
            )
            .await?;
        if applied {
            tracing::info!(room = %room.code, "group return complete");
            self.bus.broadcast(
                &room.code,
                LobbyEvent::RoomStatusChanged {
                    room_code: room.code.clone(),
                    new_status: RoomStatus::Lobby,
                    reason: "group_return_complete".into(),
                },
            );
        }
        Ok(())
    }

    // -- Sessions ----------------------------------------------------------

    /// Issues a fresh session for (user, room). Overwrites any previous
    /// one — there is exactly one active session per pair.
    pub async fn create_player_session(
        &self,
        user: &PlayerId,
        code: &RoomCode,
        transport: &TransportId,
    ) -> Result<PlayerSession, LobbyError> {
        let room = self
            .store
            .room_by_code(code)
            .await?
            .ok_or_else(|| LobbyError::RoomNotFound(code.clone()))?;
        let session = {
            let mut conn = self.connections.lock().await;
            let session = conn.create_session(
                user.clone(),
                room.id,
                code.clone(),
                transport.clone(),
            );
            conn.bind_session_token(transport, session.token.clone());
            session
        };
        self.audit(room.id, Some(user), "session_created", Value::Null)
            .await;
        Ok(session)
    }

    /// Redeems a session token: rebinds the session and the member row to
    /// a fresh transport and flips the member back to connected.
    pub async fn recover_session(
        &self,
        token: &SessionToken,
        new_transport: &TransportId,
    ) -> Result<RecoveryOutcome, LobbyError> {
        let session = {
            let mut conn = self.connections.lock().await;
            conn.recover_session(token, new_transport.clone())?
        };

        let room = self
            .store
            .room_by_id(session.room_id)
            .await?
            .ok_or_else(|| {
                LobbyError::RoomNotFound(session.room_code.clone())
            })?;
        let mut member = self
            .store
            .member(room.id, &session.user_id)
            .await?
            .ok_or_else(|| LobbyError::PlayerNotFound {
                user: session.user_id.clone(),
                code: room.code.clone(),
            })?;

        if member.location == MemberLocation::Disconnected {
            member.set_presence(Presence::in_lobby());
        } else {
            member.is_connected = true;
        }
        member.transport_id = Some(new_transport.clone());
        member.last_ping = SystemTime::now();
        self.store.update_member(&member).await?;

        {
            let mut conn = self.connections.lock().await;
            conn.add_connection(ConnectionRecord::new(
                new_transport.clone(),
                member.user_id.clone(),
                member.username.clone(),
                room.id,
                room.code.clone(),
                ConnectionKind::Recovered,
            ));
            conn.bind_session_token(new_transport, token.clone());
        }

        self.lifecycle
            .cancel(room.id, crate::GraceKind::Abandonment);
        self.lifecycle
            .cancel_host_transfer_if_original(room.id, &member.user_id);

        let events = self.bus.subscribe(&room.code, new_transport);
        let members = self.store.members(room.id).await?;
        let players = self.refresh_snapshot(&room, &members);
        self.bus.broadcast(
            &room.code,
            LobbyEvent::PlayerStatusUpdated {
                player_id: member.user_id.clone(),
                status: member.presence(),
                players,
                conflicts: Vec::new(),
            },
        );
        self.audit(
            room.id,
            Some(&member.user_id),
            "session_recovered",
            Value::Null,
        )
        .await;
        tracing::info!(
            user = %member.user_id,
            room = %room.code,
            "session recovery complete"
        );

        Ok(RecoveryOutcome {
            session,
            room,
            member,
            events,
        })
    }

    // -- Leaving and disconnects -------------------------------------------

    /// Explicit leave: the member row is DELETED (unlike a disconnect,
    /// which only flips connectivity). A leaving host hands the role to
    /// the oldest-joined connected member immediately — no grace period.
    pub async fn leave_room(
        &self,
        user: &PlayerId,
        code: &RoomCode,
    ) -> Result<(), LobbyError> {
        let (room, members) = self.room_with_members(code).await?;
        let member = members
            .iter()
            .find(|m| &m.user_id == user)
            .ok_or_else(|| LobbyError::PlayerNotFound {
                user: user.clone(),
                code: code.clone(),
            })?
            .clone();
        let was_host = member.role == MemberRole::Host;

        self.store.delete_member(room.id, user).await?;

        {
            let mut conn = self.connections.lock().await;
            let bound: Vec<TransportId> = conn
                .connections_for_user(user)
                .into_iter()
                .filter(|r| r.room_id == room.id)
                .map(|r| r.transport_id.clone())
                .collect();
            for transport in &bound {
                conn.remove_connection(transport);
                self.bus.unsubscribe(code, transport);
            }
            conn.remove_session(user, room.id);
        }

        if was_host {
            if let Some(new_host) =
                self.store.auto_transfer_host(room.id, user).await?
            {
                let name = new_host.summary().visible_name().to_string();
                self.bus.broadcast(
                    code,
                    LobbyEvent::HostTransferred {
                        room_code: code.clone(),
                        old_host_id: user.clone(),
                        new_host_id: new_host.user_id.clone(),
                        new_host_name: name,
                        reason: "host_left".into(),
                    },
                );
            }
        }
        self.bus.broadcast(
            code,
            LobbyEvent::PlayerDisconnected {
                player_id: user.clone(),
                was_host,
                reason: "left".into(),
            },
        );

        let remaining = self.store.members(room.id).await?;
        if remaining.is_empty() {
            // Last member out deletes the room and frees the code.
            self.lifecycle.cancel(room.id, crate::GraceKind::Abandonment);
            self.lifecycle
                .cancel(room.id, crate::GraceKind::HostTransfer);
            self.store.delete_room(room.id).await?;
            self.snapshots
                .lock()
                .expect("snapshot cache lock poisoned")
                .remove(code);
            self.audit(room.id, Some(user), "room_deleted", Value::Null)
                .await;
            tracing::info!(room = %code, "room deleted, last member left");
        } else {
            self.refresh_snapshot(&room, &remaining);
            if !remaining.iter().any(|m| m.is_active()) {
                self.lifecycle.start_abandonment(room.id, code.clone());
            }
        }
        self.audit(room.id, Some(user), "player_left", Value::Null)
            .await;
        tracing::info!(%user, room = %code, was_host, "player left");
        Ok(())
    }

    /// Transport-level disconnect: flips connectivity but never deletes
    /// the member row. Starts the host-transfer and abandonment grace
    /// timers as appropriate. Returns the affected user, if the transport
    /// was bound to one.
    pub async fn handle_transport_disconnect(
        &self,
        transport: &TransportId,
    ) -> Result<Option<PlayerId>, LobbyError> {
        let record = {
            let mut conn = self.connections.lock().await;
            conn.remove_connection(transport)
        };
        let Some(record) = record else {
            return Ok(None);
        };
        self.bus.drop_transport(transport);

        let Some(mut member) =
            self.store.member(record.room_id, &record.user_id).await?
        else {
            return Ok(None);
        };
        let room = self
            .store
            .room_by_id(record.room_id)
            .await?
            .ok_or_else(|| {
                LobbyError::RoomNotFound(record.room_code.clone())
            })?;

        if member.is_connected {
            member.is_connected = false;
            // A member inside the external activity stays located there —
            // they are reachable through the activity server and still
            // count as active.
            if member.location == MemberLocation::Lobby {
                member.location = MemberLocation::Disconnected;
            }
            member.transport_id = None;
            self.store.update_member(&member).await?;
        }
        let was_host = member.role == MemberRole::Host;

        self.bus.broadcast(
            &room.code,
            LobbyEvent::PlayerDisconnected {
                player_id: member.user_id.clone(),
                was_host,
                reason: "transport_closed".into(),
            },
        );

        if was_host {
            self.lifecycle.start_host_transfer(
                room.id,
                room.code.clone(),
                member.user_id.clone(),
            );
        }
        let members = self.store.members(room.id).await?;
        self.refresh_snapshot(&room, &members);
        if !members.iter().any(|m| m.is_active()) {
            self.lifecycle
                .start_abandonment(room.id, room.code.clone());
        }
        self.audit(
            room.id,
            Some(&member.user_id),
            "player_disconnected",
            serde_json::json!({ "was_host": was_host }),
        )
        .await;
        tracing::info!(
            user = %member.user_id,
            room = %room.code,
            was_host,
            "transport disconnected"
        );
        Ok(Some(member.user_id))
    }

    // -- Maintenance and reads ---------------------------------------------

    /// Periodic housekeeping: expired sessions, idle connections, stale
    /// snapshot-cache entries.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let (expired_sessions, stale_connections) = {
            let mut conn = self.connections.lock().await;
            let expired = conn.expire_sessions().len();
            let stale = conn
                .cleanup_stale(self.config.connection_idle_timeout)
                .len();
            (expired, stale)
        };
        let evicted_snapshots = self
            .snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .evict_stale();
        if expired_sessions + stale_connections + evicted_snapshots > 0 {
            tracing::debug!(
                expired_sessions,
                stale_connections,
                evicted_snapshots,
                "maintenance pass"
            );
        }
        MaintenanceReport {
            expired_sessions,
            stale_connections,
            evicted_snapshots,
        }
    }

    /// The current room view: cached if fresh, loaded from the store
    /// otherwise.
    pub async fn snapshot(
        &self,
        code: &RoomCode,
    ) -> Result<RoomSnapshot, LobbyError> {
        if let Some(snap) = self
            .snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .get(code)
        {
            return Ok(snap);
        }
        let (room, members) = self.room_with_members(code).await?;
        Ok(self.refresh_snapshot_full(&room, &members))
    }

    /// Validation read for external activity servers: the room must exist
    /// and not be abandoned.
    pub async fn validate_room(
        &self,
        code: &RoomCode,
    ) -> Result<RoomSnapshot, LobbyError> {
        let (room, members) = self.room_with_members(code).await?;
        if room.status == RoomStatus::Abandoned {
            return Err(LobbyError::RoomNotAvailable {
                code: code.clone(),
                status: room.status,
            });
        }
        Ok(self.refresh_snapshot_full(&room, &members))
    }

    /// Loads the room row and its members in one call.
    pub async fn room_with_members(
        &self,
        code: &RoomCode,
    ) -> Result<(RoomRow, Vec<MemberRow>), LobbyError> {
        let room = self
            .store
            .room_by_code(code)
            .await?
            .ok_or_else(|| LobbyError::RoomNotFound(code.clone()))?;
        let members = self.store.members(room.id).await?;
        Ok((room, members))
    }

    /// Broadcasts a full room resync to every subscriber.
    pub async fn resync_room(
        &self,
        code: &RoomCode,
    ) -> Result<(), LobbyError> {
        let (room, members) = self.room_with_members(code).await?;
        let players = self.refresh_snapshot(&room, &members);
        self.bus.broadcast(
            code,
            LobbyEvent::RoomStatusSync {
                room: room.summary(),
                players,
                sync_type: SyncType::Full,
            },
        );
        Ok(())
    }

    /// Handle to the shared connection registry.
    pub fn connections(&self) -> &SharedConnections {
        &self.connections
    }

    /// Handle to the lifecycle timers.
    pub fn lifecycle(&self) -> &Arc<RoomLifecycleManager<S>> {
        &self.lifecycle
    }

    // -- Internals ---------------------------------------------------------

    fn refresh_snapshot(
        &self,
        room: &RoomRow,
        members: &[MemberRow],
    ) -> Vec<PlayerSummary> {
        self.refresh_snapshot_full(room, members).players
    }

    fn refresh_snapshot_full(
        &self,
        room: &RoomRow,
        members: &[MemberRow],
    ) -> RoomSnapshot {
        let snapshot = RoomSnapshot::new(
            room.summary(),
            members.iter().map(MemberRow::summary).collect(),
        );
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .put(snapshot.clone());
        snapshot
    }

    /// Fire-and-forget audit append. Failures are logged, never
    /// propagated.
    async fn audit(
        &self,
        room: RoomId,
        user: Option<&PlayerId>,
        kind: &str,
        data: Value,
    ) {
        if let Err(e) = self.store.log_event(room, user, kind, data).await {
            tracing::warn!(%room, kind, error = %e, "audit log failed");
        }
    }
}
