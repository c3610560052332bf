//! Grace-period timers for room abandonment and host transfer.
//!
//! Both timers follow the same shape: an event starts the clock, the
//! deadline RE-CHECKS the world before acting (the situation usually
//! resolves itself), and a reconnection inside the window cancels the
//! timer outright. At most one timer exists per (room, kind); starting a
//! new one replaces — and aborts — the old one.
//!
//! Timers run as spawned Tokio tasks sleeping until their deadline. They
//! cannot propagate errors to anyone, so failures inside a firing are
//! logged and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use vestibule_conn::Broadcaster;
use vestibule_protocol::{
    LobbyEvent, PlayerId, RoomCode, RoomId, RoomStatus,
};
use vestibule_store::RoomStore;

use crate::LifecycleConfig;

/// The two grace periods a room can be under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraceKind {
    /// The last active member disappeared; the room will be marked
    /// abandoned unless someone comes back.
    Abandonment,
    /// The host disconnected; the role will transfer unless they return.
    HostTransfer,
}

struct TimerEntry {
    /// For host-transfer timers: whose reconnection cancels this.
    original_host: Option<PlayerId>,
    handle: JoinHandle<()>,
}

/// Owns all live grace timers. One per engine.
pub struct RoomLifecycleManager<S> {
    store: Arc<S>,
    bus: Broadcaster,
    timers: Mutex<HashMap<(RoomId, GraceKind), TimerEntry>>,
    config: LifecycleConfig,
}

impl<S: RoomStore> RoomLifecycleManager<S> {
    pub fn new(
        store: Arc<S>,
        bus: Broadcaster,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            bus,
            timers: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn guard(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(RoomId, GraceKind), TimerEntry>>
    {
        self.timers.lock().expect("lifecycle timer lock poisoned")
    }

    fn install(
        &self,
        room: RoomId,
        kind: GraceKind,
        original_host: Option<PlayerId>,
        handle: JoinHandle<()>,
    ) {
        let replaced = self.guard().insert(
            (room, kind),
            TimerEntry {
                original_host,
                handle,
            },
        );
        if let Some(old) = replaced {
            old.handle.abort();
        }
    }

    /// Starts (or restarts) the abandonment clock for a room.
    ///
    /// Call whenever the last connected-or-in-game member of a room
    /// disappears. Harmless if the room repopulates before the deadline:
    /// the firing re-checks.
    pub fn start_abandonment(
        self: &Arc<Self>,
        room: RoomId,
        code: RoomCode,
    ) {
        tracing::info!(%room, %code, "abandonment grace period started");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.abandonment_grace).await;
            this.fire_abandonment(room, code).await;
        });
        self.install(room, GraceKind::Abandonment, None, handle);
    }

    /// Starts (or restarts) the host-transfer clock for a room.
    pub fn start_host_transfer(
        self: &Arc<Self>,
        room: RoomId,
        code: RoomCode,
        original_host: PlayerId,
    ) {
        tracing::info!(
            %room,
            %code,
            host = %original_host,
            "host-transfer grace period started"
        );
        let this = Arc::clone(self);
        let host = original_host.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.host_transfer_grace).await;
            this.fire_host_transfer(room, code, host).await;
        });
        self.install(
            room,
            GraceKind::HostTransfer,
            Some(original_host),
            handle,
        );
    }

    /// Cancels a timer outright. Returns whether one was running.
    pub fn cancel(&self, room: RoomId, kind: GraceKind) -> bool {
        match self.guard().remove(&(room, kind)) {
            Some(entry) => {
                entry.handle.abort();
                tracing::debug!(%room, ?kind, "grace timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels the host-transfer timer only if `user` is the host whose
    /// disconnect started it. Reconnection by anyone else leaves the
    /// clock running.
    pub fn cancel_host_transfer_if_original(
        &self,
        room: RoomId,
        user: &PlayerId,
    ) -> bool {
        let mut timers = self.guard();
        let is_original = timers
            .get(&(room, GraceKind::HostTransfer))
            .is_some_and(|e| e.original_host.as_ref() == Some(user));
        if !is_original {
            return false;
        }
        if let Some(entry) =
            timers.remove(&(room, GraceKind::HostTransfer))
        {
            entry.handle.abort();
        }
        tracing::info!(
            %room,
            host = %user,
            "original host reconnected, host transfer cancelled"
        );
        true
    }

    /// Whether a timer is currently pending.
    pub fn has_timer(&self, room: RoomId, kind: GraceKind) -> bool {
        self.guard().contains_key(&(room, kind))
    }

    /// Aborts every pending timer. Engine teardown.
    pub fn shutdown(&self) {
        let mut timers = self.guard();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
    }

    // -- Firing paths ------------------------------------------------------

    async fn fire_abandonment(&self, room: RoomId, code: RoomCode) {
        self.guard().remove(&(room, GraceKind::Abandonment));

        let members = match self.store.members(room).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(%room, error = %e, "abandonment check failed");
                return;
            }
        };
        // Members inside the external activity count as active even with
        // no live connection.
        if members.iter().any(|m| m.is_active()) {
            tracing::debug!(%room, "room active again, not abandoning");
            return;
        }

        let current = match self.store.room_by_id(room).await {
            Ok(Some(row)) => row.status,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(%room, error = %e, "abandonment check failed");
                return;
            }
        };
        if current == RoomStatus::Abandoned {
            return;
        }

        match self
            .store
            .set_room_status_if(room, current, RoomStatus::Abandoned)
            .await
        {
            Ok(true) => {
                tracing::info!(%room, %code, "room abandoned");
                self.bus.broadcast(
                    &code,
                    LobbyEvent::RoomStatusChanged {
                        room_code: code.clone(),
                        new_status: RoomStatus::Abandoned,
                        reason: "grace_period_expired".into(),
                    },
                );
                if let Err(e) = self
                    .store
                    .log_event(
                        room,
                        None,
                        "room_abandoned",
                        serde_json::json!({ "code": code.as_str() }),
                    )
                    .await
                {
                    tracing::warn!(%room, error = %e, "audit log failed");
                }
            }
            Ok(false) => {
                // Someone changed the status while we slept — leave it.
                tracing::debug!(%room, "status changed mid-grace, skipping");
            }
            Err(e) => {
                tracing::warn!(%room, error = %e, "abandonment write failed");
            }
        }
    }

    async fn fire_host_transfer(
        &self,
        room: RoomId,
        code: RoomCode,
        original: PlayerId,
    ) {
        self.guard().remove(&(room, GraceKind::HostTransfer));

        let member = match self.store.member(room, &original).await {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(%room, error = %e, "host-transfer check failed");
                return;
            }
        };
        // The original host reconnected (or left entirely, in which case
        // the leave path already transferred). Either way: nothing to do.
        match member {
            Some(m) if !m.is_connected => {}
            _ => return,
        }

        let members = match self.store.members(room).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(%room, error = %e, "host-transfer check failed");
                return;
            }
        };
        let any_other_connected = members
            .iter()
            .any(|m| m.user_id != original && m.is_connected);
        if !any_other_connected {
            // Nobody to transfer to — the disconnected host keeps the
            // role until they return or someone else joins.
            tracing::info!(
                %room,
                host = %original,
                "no connected members, host keeps role"
            );
            return;
        }

        match self.store.auto_transfer_host(room, &original).await {
            Ok(Some(new_host)) => {
                tracing::info!(
                    %room,
                    old = %original,
                    new = %new_host.user_id,
                    "host transferred after grace period"
                );
                let summary = new_host.summary();
                self.bus.broadcast(
                    &code,
                    LobbyEvent::HostTransferred {
                        room_code: code.clone(),
                        old_host_id: original.clone(),
                        new_host_id: new_host.user_id.clone(),
                        new_host_name: summary.visible_name().to_string(),
                        reason: "grace_period_expired".into(),
                    },
                );
                if let Err(e) = self
                    .store
                    .log_event(
                        room,
                        Some(&original),
                        "host_transferred",
                        serde_json::json!({
                            "new_host": new_host.user_id,
                            "reason": "grace_period_expired",
                        }),
                    )
                    .await
                {
                    tracing::warn!(%room, error = %e, "audit log failed");
                }
            }
            Ok(None) => {
                tracing::debug!(%room, "no transfer candidate at deadline");
            }
            Err(e) => {
                tracing::warn!(%room, error = %e, "host transfer failed");
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
