//! Connection-level liveness tracking and host failover.
//!
//! Per tracked connection the state machine is
//! `registered → (refreshed on ping) → stale (silent past timeout) →
//! handled`. Handling marks the member disconnected in the store and, when
//! the member was host, runs the store's atomic host transfer — refreshing
//! the new host's beat and granting them an extended window so the
//! failover doesn't immediately re-trigger on their first missed ping.
//!
//! A secondary sweep reads `last_ping`-stale rows straight from the store
//! to cover connections the in-memory path never saw (process restarts,
//! missed timers). It runs the identical transfer logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Instant, SystemTime};

use vestibule_conn::Broadcaster;
use vestibule_protocol::{
    LobbyEvent, MemberLocation, MemberRole, PlayerId, RoomCode, RoomId,
    TransportId,
};
use vestibule_room::SharedConnections;
use vestibule_store::{MemberRow, RoomStore};

use crate::HeartbeatConfig;

#[derive(Debug, Clone)]
struct BeatRecord {
    player: PlayerId,
    room_id: RoomId,
    room_code: RoomCode,
    last_beat: Instant,
}

/// Tracks connection liveness and performs host failover.
pub struct HeartbeatManager<S> {
    store: Arc<S>,
    connections: SharedConnections,
    bus: Broadcaster,
    beats: StdMutex<HashMap<TransportId, BeatRecord>>,
    /// Members promoted to host recently enough to deserve the extended
    /// timeout. Entries self-expire after the grace window.
    recent_transfers: StdMutex<HashMap<PlayerId, Instant>>,
    config: HeartbeatConfig,
}

impl<S: RoomStore> HeartbeatManager<S> {
    pub fn new(
        store: Arc<S>,
        connections: SharedConnections,
        bus: Broadcaster,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            connections,
            bus,
            beats: StdMutex::new(HashMap::new()),
            recent_transfers: StdMutex::new(HashMap::new()),
            config,
        }
    }

    fn beats_guard(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<TransportId, BeatRecord>> {
        self.beats.lock().expect("heartbeat map lock poisoned")
    }

    fn transfers_guard(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<PlayerId, Instant>> {
        self.recent_transfers
            .lock()
            .expect("recent-transfer map lock poisoned")
    }

    // -- Registration and refresh -------------------------------------------

    /// Starts tracking a connection.
    pub fn register(
        &self,
        transport: &TransportId,
        player: &PlayerId,
        room_id: RoomId,
        room_code: &RoomCode,
    ) {
        self.beats_guard().insert(
            transport.clone(),
            BeatRecord {
                player: player.clone(),
                room_id,
                room_code: room_code.clone(),
                last_beat: Instant::now(),
            },
        );
    }

    /// Refreshes a connection's beat. Returns `false` for untracked
    /// transports.
    pub async fn beat(&self, transport: &TransportId) -> bool {
        let known = {
            match self.beats_guard().get_mut(transport) {
                Some(record) => {
                    record.last_beat = Instant::now();
                    true
                }
                None => false,
            }
        };
        if known {
            self.connections.lock().await.touch_connection(transport);
        }
        known
    }

    /// Stops tracking a connection (clean close or explicit leave).
    pub fn forget(&self, transport: &TransportId) {
        self.beats_guard().remove(transport);
    }

    /// Grants a freshly promoted host the extended timeout window.
    pub fn mark_recent_transfer(&self, player: &PlayerId) {
        self.transfers_guard()
            .insert(player.clone(), Instant::now());
    }

    /// Whether a player is inside the post-promotion grace window.
    /// Expires old recent-transfer entries along the way.
    fn in_transfer_grace(&self, player: &PlayerId) -> bool {
        let mut transfers = self.transfers_guard();
        let grace = self.config.recent_host_grace;
        transfers.retain(|_, at| at.elapsed() <= grace);
        transfers.contains_key(player)
    }

    /// The timeout that applies to a player right now.
    fn timeout_for(&self, player: &PlayerId) -> std::time::Duration {
        if self.in_transfer_grace(player) {
            self.config.recent_host_grace
        } else {
            self.config.timeout
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.beats_guard().len()
    }

    // -- Primary sweep -------------------------------------------------------

    /// Sweeps tracked connections and handles every stale one. Returns
    /// how many went stale.
    pub async fn sweep(&self) -> usize {
        let stale: Vec<(TransportId, BeatRecord)> = {
            let mut beats = self.beats_guard();
            let stale: Vec<_> = beats
                .iter()
                .filter(|(_, r)| {
                    r.last_beat.elapsed() > self.timeout_for(&r.player)
                })
                .map(|(t, r)| (t.clone(), r.clone()))
                .collect();
            for (transport, _) in &stale {
                beats.remove(transport);
            }
            stale
        };

        for (transport, record) in &stale {
            tracing::info!(
                %transport,
                player = %record.player,
                room = %record.room_code,
                "heartbeat timeout"
            );
            {
                let mut conn = self.connections.lock().await;
                conn.remove_connection(transport);
            }
            self.bus.drop_transport(transport);

            let member = match self
                .store
                .member(record.room_id, &record.player)
                .await
            {
                Ok(Some(member)) => member,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        player = %record.player,
                        error = %e,
                        "stale member lookup failed"
                    );
                    continue;
                }
            };
            self.handle_stale_member(member, &record.room_code).await;
        }
        stale.len()
    }

    // -- Secondary store sweep ------------------------------------------------

    /// Queries the store for connected rows whose `last_ping` went stale
    /// without the in-memory path noticing, and handles them identically.
    pub async fn sweep_store(&self) -> usize {
        let cutoff = SystemTime::now() - self.config.store_stale_after;
        let rows = match self.store.members_with_stale_ping(cutoff).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "store liveness sweep failed");
                return 0;
            }
        };

        let mut handled = 0;
        for member in rows {
            // The in-memory path knows better when it has a fresh beat —
            // last_ping in the store lags by the persist interval.
            let fresh_beat = self.beats_guard().values().any(|r| {
                r.player == member.user_id
                    && r.room_id == member.room_id
                    && r.last_beat.elapsed() < self.config.timeout
            });
            if fresh_beat {
                continue;
            }
            // Freshly promoted hosts are off-limits until their grace
            // window expires.
            if self.in_transfer_grace(&member.user_id) {
                continue;
            }

            let room_code = match self.store.room_by_id(member.room_id).await
            {
                Ok(Some(room)) => room.code,
                _ => continue,
            };
            tracing::info!(
                player = %member.user_id,
                room = %room_code,
                "stale last_ping found by store sweep"
            );
            self.handle_stale_member(member, &room_code).await;
            handled += 1;
        }
        handled
    }

    // -- Shared handling -------------------------------------------------------

    /// Marks a stale member disconnected and runs host failover when the
    /// member held the host role. Broadcasts either `hostTransferred` or
    /// `playerDisconnected` — never both.
    async fn handle_stale_member(
        &self,
        mut member: MemberRow,
        room_code: &RoomCode,
    ) {
        if !member.is_connected {
            return;
        }
        let was_host = member.role == MemberRole::Host;

        member.is_connected = false;
        if member.location == MemberLocation::Lobby {
            member.location = MemberLocation::Disconnected;
        }
        member.transport_id = None;
        if let Err(e) = self.store.update_member(&member).await {
            tracing::warn!(
                player = %member.user_id,
                error = %e,
                "failed to persist heartbeat disconnect"
            );
            return;
        }

        let mut transferred = false;
        if was_host {
            match self
                .store
                .auto_transfer_host(member.room_id, &member.user_id)
                .await
            {
                Ok(Some(new_host)) => {
                    // Give the new host a fresh beat and the extended
                    // window before anything can judge their silence.
                    self.refresh_player_beats(&new_host.user_id);
                    self.mark_recent_transfer(&new_host.user_id);
                    let name =
                        new_host.summary().visible_name().to_string();
                    self.bus.broadcast(
                        room_code,
                        LobbyEvent::HostTransferred {
                            room_code: room_code.clone(),
                            old_host_id: member.user_id.clone(),
                            new_host_id: new_host.user_id.clone(),
                            new_host_name: name,
                            reason: "heartbeat_timeout".into(),
                        },
                    );
                    transferred = true;
                    tracing::info!(
                        room = %room_code,
                        old = %member.user_id,
                        new = %new_host.user_id,
                        "host failover complete"
                    );
                }
                Ok(None) => {
                    tracing::info!(
                        room = %room_code,
                        host = %member.user_id,
                        "host went silent, no successor connected"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        room = %room_code,
                        error = %e,
                        "host failover failed"
                    );
                }
            }
        }

        if !transferred {
            self.bus.broadcast(
                room_code,
                LobbyEvent::PlayerDisconnected {
                    player_id: member.user_id.clone(),
                    was_host,
                    reason: "heartbeat_timeout".into(),
                },
            );
        }

        if let Err(e) = self
            .store
            .log_event(
                member.room_id,
                Some(&member.user_id),
                "heartbeat_disconnect",
                serde_json::json!({
                    "was_host": was_host,
                    "transferred": transferred,
                }),
            )
            .await
        {
            tracing::warn!(room = %member.room_id, error = %e, "audit log failed");
        }
    }

    /// Resets the beat clock on every tracked connection of a player.
    fn refresh_player_beats(&self, player: &PlayerId) {
        let mut beats = self.beats_guard();
        for record in beats.values_mut() {
            if &record.player == player {
                record.last_beat = Instant::now();
            }
        }
    }
}
