//! The status-sync manager: sequencing, deferred application, bulk
//! updates with rollback, and reconciliation of disagreeing reports.
//!
//! Many sources report a player's location concurrently — the live client,
//! the activity server, liveness sweeps — and reports can arrive out of
//! order relative to when they were generated. Every submission is stamped
//! from one atomic counter; the per-(player, room) queue slot plus the
//! applied watermark guarantee that a lower-sequence update never
//! overwrites the effect of a higher one, no matter the arrival order.
//!
//! Updates flagged immediate — and every disconnection — bypass the
//! deferred queue and apply synchronously, but take the same
//! sequence-comparison path, so a LATE immediate update is still
//! discarded.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use futures_util::future::join_all;
use serde_json::Value;
use vestibule_conn::Broadcaster;
use vestibule_protocol::{
    BulkStatusEntry, LobbyEvent, MemberLocation, PlayerId, PlayerStatus,
    Presence, ResolutionStrategy, RoomCode, RoomStatus, StatusConflict,
};
use vestibule_room::conflict::{StatusReport, reconcile};
use vestibule_room::{LobbyError, LobbyManager};
use vestibule_store::RoomStore;

use crate::queue::StatusUpdate;
use crate::{SyncConfig, SyncError, UpdateQueue};

/// What happened to a submitted update.
#[derive(Debug)]
pub enum UpdateDisposition {
    /// Applied synchronously (immediate path).
    Applied {
        seq: u64,
        conflicts: Vec<StatusConflict>,
    },
    /// Parked in the deferred queue; the drain loop will apply it.
    Queued { seq: u64 },
    /// Discarded: a higher sequence number was already queued or applied
    /// for this (player, room).
    Superseded { seq: u64 },
}

/// Result of a bulk update that was NOT rolled back.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub updated: usize,
    pub failed: usize,
}

struct HeartbeatRecord {
    last_beat: Instant,
    last_persisted: Instant,
}

enum EntryResult {
    Applied,
    Noop,
    Failed,
}

/// The ordering and reconciliation engine.
pub struct StatusSyncManager<S> {
    lobby: Arc<LobbyManager<S>>,
    store: Arc<S>,
    bus: Broadcaster,
    /// The global sequence counter. A field, not a process global — the
    /// engine owns exactly one of these.
    seq: AtomicU64,
    queue: StdMutex<UpdateQueue>,
    heartbeats: StdMutex<
        std::collections::HashMap<(PlayerId, RoomCode), HeartbeatRecord>,
    >,
    config: SyncConfig,
}

impl<S: RoomStore> StatusSyncManager<S> {
    pub fn new(
        lobby: Arc<LobbyManager<S>>,
        store: Arc<S>,
        bus: Broadcaster,
        config: SyncConfig,
    ) -> Self {
        Self {
            lobby,
            store,
            bus,
            seq: AtomicU64::new(0),
            queue: StdMutex::new(UpdateQueue::new()),
            heartbeats: StdMutex::new(std::collections::HashMap::new()),
            config,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn queue_guard(&self) -> std::sync::MutexGuard<'_, UpdateQueue> {
        self.queue.lock().expect("status queue lock poisoned")
    }

    // -- Submission --------------------------------------------------------

    /// Submits a location report for a player.
    ///
    /// Immediate updates — and anything targeting disconnection — apply
    /// synchronously; everything else parks in the deferred queue for the
    /// next drain.
    pub async fn update_player_location(
        &self,
        player: &PlayerId,
        code: &RoomCode,
        status: PlayerStatus,
        location: MemberLocation,
        metadata: Option<Value>,
        immediate: bool,
    ) -> Result<UpdateDisposition, SyncError> {
        self.submit(player, code, status, location, metadata, immediate, None)
            .await
    }

    async fn submit(
        &self,
        player: &PlayerId,
        code: &RoomCode,
        status: PlayerStatus,
        location: MemberLocation,
        metadata: Option<Value>,
        immediate: bool,
        reason: Option<&str>,
    ) -> Result<UpdateDisposition, SyncError> {
        let update = StatusUpdate {
            player_id: player.clone(),
            room_code: code.clone(),
            status,
            location,
            metadata,
            seq: self.next_seq(),
            retry_count: 0,
            queued_at: Instant::now(),
            reason: reason.map(str::to_string),
        };

        let apply_now = immediate
            || status == PlayerStatus::Disconnected
            || location == MemberLocation::Disconnected;
        if apply_now {
            return self.apply_immediate(update).await;
        }

        let seq = update.seq;
        if self.queue_guard().offer(update) {
            Ok(UpdateDisposition::Queued { seq })
        } else {
            Ok(UpdateDisposition::Superseded { seq })
        }
    }

    async fn apply_immediate(
        &self,
        update: StatusUpdate,
    ) -> Result<UpdateDisposition, SyncError> {
        let key = update.key();
        let seq = update.seq;
        if self.queue_guard().is_superseded(&key, seq) {
            tracing::debug!(
                player = %update.player_id,
                room = %update.room_code,
                seq,
                "late immediate update discarded"
            );
            return Ok(UpdateDisposition::Superseded { seq });
        }

        let outcome = self.apply(&update).await?;
        self.queue_guard().mark_applied(&key, seq);
        Ok(UpdateDisposition::Applied {
            seq,
            conflicts: outcome,
        })
    }

    /// Runs one update through the lobby's status path.
    async fn apply(
        &self,
        update: &StatusUpdate,
    ) -> Result<Vec<StatusConflict>, SyncError> {
        let outcome = self
            .lobby
            .update_player_status(
                &update.player_id,
                &update.room_code,
                update.status,
                update.location,
                update.metadata.clone(),
            )
            .await?;
        if let Some(reason) = &update.reason {
            tracing::debug!(
                player = %update.player_id,
                room = %update.room_code,
                seq = update.seq,
                reason,
                "tagged update applied"
            );
        }
        Ok(outcome.conflicts)
    }

    // -- Drain loop --------------------------------------------------------

    /// Drains the deferred queue, applying every surviving entry. Entries
    /// that fail are retried on later drains, up to the attempt limit.
    /// Returns how many updates were applied.
    pub async fn drain_queue(&self) -> usize {
        let pending = self.queue_guard().drain();
        if pending.is_empty() {
            return 0;
        }

        let mut applied = 0;
        for mut update in pending {
            let key = update.key();
            if self.queue_guard().is_superseded(&key, update.seq) {
                continue;
            }
            match self.apply(&update).await {
                Ok(_) => {
                    self.queue_guard().mark_applied(&key, update.seq);
                    applied += 1;
                }
                Err(e) => {
                    update.retry_count += 1;
                    if update.retry_count >= self.config.max_apply_attempts
                    {
                        tracing::warn!(
                            player = %update.player_id,
                            room = %update.room_code,
                            seq = update.seq,
                            attempts = update.retry_count,
                            error = %e,
                            "status update dropped after retries"
                        );
                    } else {
                        tracing::debug!(
                            player = %update.player_id,
                            seq = update.seq,
                            error = %e,
                            "status update failed, will retry"
                        );
                        // Re-offer: a newer queued update wins the slot.
                        self.queue_guard().offer(update);
                    }
                }
            }
        }
        applied
    }

    /// Pending queue depth.
    pub fn queue_len(&self) -> usize {
        self.queue_guard().len()
    }

    // -- Reconciliation ----------------------------------------------------

    /// Reconciles a server-observed and a client-observed status against
    /// the stored row, applies the winner, and broadcasts the resolution.
    ///
    /// # Errors
    /// [`SyncError::ConflictUnresolved`] when no strategy produces a
    /// coherent presence — escalated instead of guessed.
    pub async fn reconcile_status(
        &self,
        player: &PlayerId,
        code: &RoomCode,
        server: StatusReport,
        client: StatusReport,
    ) -> Result<(Presence, ResolutionStrategy), SyncError> {
        let (room, members) = self.lobby.room_with_members(code).await?;
        let member = members
            .iter()
            .find(|m| &m.user_id == player)
            .ok_or_else(|| {
                SyncError::Lobby(LobbyError::PlayerNotFound {
                    user: player.clone(),
                    code: code.clone(),
                })
            })?;

        let (resolved, strategy) = reconcile(member, server, client);
        if !resolved.is_coherent() {
            return Err(SyncError::ConflictUnresolved(player.clone()));
        }

        let (status, location) = presence_to_report(resolved);
        self.submit(player, code, status, location, None, true, Some("reconcile"))
            .await?;

        let requires_action = resolved != client.presence;
        self.bus.broadcast(
            code,
            LobbyEvent::StatusConflictResolved {
                player_id: player.clone(),
                resolved_status: resolved,
                strategy,
                requires_action,
            },
        );
        if let Err(e) = self
            .store
            .log_event(
                room.id,
                Some(player),
                "status_reconciled",
                serde_json::json!({
                    "strategy": strategy,
                    "resolved": resolved,
                }),
            )
            .await
        {
            tracing::warn!(room = %room.id, error = %e, "audit log failed");
        }
        tracing::info!(
            %player,
            room = %code,
            %strategy,
            "status reports reconciled"
        );
        Ok((resolved, strategy))
    }

    // -- Bulk updates ------------------------------------------------------

    /// Applies a batch of per-player location changes with bounded
    /// concurrency, snapshotting each player's prior location first.
    ///
    /// If more than the configured ratio of the batch fails, every update
    /// that DID succeed is rolled back to its pre-batch location and the
    /// call fails with [`SyncError::BulkRolledBack`]. A successful batch
    /// finishes with a full room resync broadcast.
    pub async fn bulk_update(
        &self,
        code: &RoomCode,
        entries: Vec<BulkStatusEntry>,
        reason: &str,
    ) -> Result<BulkOutcome, SyncError> {
        if entries.is_empty() {
            return Ok(BulkOutcome::default());
        }

        // Snapshot prior presence before touching anything — this is the
        // rollback target.
        let (room, members) = self.lobby.room_with_members(code).await?;
        let prior: std::collections::HashMap<PlayerId, Presence> = members
            .iter()
            .map(|m| (m.user_id.clone(), m.presence()))
            .collect();

        let mut results: Vec<(BulkStatusEntry, EntryResult)> =
            Vec::with_capacity(entries.len());
        for chunk in entries.chunks(self.config.bulk_chunk_size) {
            let outcomes = join_all(chunk.iter().map(|entry| {
                self.submit(
                    &entry.player_id,
                    code,
                    entry.status,
                    entry.location,
                    None,
                    true,
                    Some(reason),
                )
            }))
            .await;
            for (entry, outcome) in chunk.iter().zip(outcomes) {
                let result = match outcome {
                    Ok(UpdateDisposition::Applied { .. }) => {
                        EntryResult::Applied
                    }
                    Ok(_) => EntryResult::Noop,
                    Err(e) => {
                        tracing::warn!(
                            player = %entry.player_id,
                            room = %code,
                            error = %e,
                            "bulk entry failed"
                        );
                        EntryResult::Failed
                    }
                };
                results.push((entry.clone(), result));
            }
        }

        let total = results.len();
        let failed = results
            .iter()
            .filter(|(_, r)| matches!(r, EntryResult::Failed))
            .count();
        let ratio = failed as f64 / total as f64;

        if ratio > self.config.bulk_rollback_threshold {
            tracing::warn!(
                room = %code,
                failed,
                total,
                "bulk failure ratio exceeded, rolling back"
            );
            for (entry, result) in &results {
                if !matches!(result, EntryResult::Applied) {
                    continue;
                }
                let Some(previous) = prior.get(&entry.player_id) else {
                    continue;
                };
                let (status, location) = presence_to_report(*previous);
                if let Err(e) = self
                    .submit(
                        &entry.player_id,
                        code,
                        status,
                        location,
                        None,
                        true,
                        Some("rollback"),
                    )
                    .await
                {
                    tracing::warn!(
                        player = %entry.player_id,
                        room = %code,
                        error = %e,
                        "rollback update failed"
                    );
                }
            }
            if let Err(e) = self
                .store
                .log_event(
                    room.id,
                    None,
                    "bulk_update_rolled_back",
                    serde_json::json!({
                        "reason": reason,
                        "failed": failed,
                        "total": total,
                    }),
                )
                .await
            {
                tracing::warn!(room = %room.id, error = %e, "audit log failed");
            }
            return Err(SyncError::BulkRolledBack { failed, total });
        }

        self.lobby.resync_room(code).await?;
        Ok(BulkOutcome {
            updated: total - failed,
            failed,
        })
    }

    // -- Game end ----------------------------------------------------------

    /// Returns every connected in-game member to the lobby and flips the
    /// room status back to `Lobby`.
    pub async fn handle_game_end(
        &self,
        code: &RoomCode,
        result: Value,
    ) -> Result<BulkOutcome, SyncError> {
        let (room, members) = self.lobby.room_with_members(code).await?;
        let entries: Vec<BulkStatusEntry> = members
            .iter()
            .filter(|m| {
                m.location == MemberLocation::Game && m.is_connected
            })
            .map(|m| BulkStatusEntry {
                player_id: m.user_id.clone(),
                status: PlayerStatus::Connected,
                location: MemberLocation::Lobby,
            })
            .collect();

        let outcome = self.bulk_update(code, entries, "game_end").await?;

        if room.status != RoomStatus::Lobby {
            let applied = self
                .store
                .set_room_status_if(room.id, room.status, RoomStatus::Lobby)
                .await?;
            if applied {
                self.bus.broadcast(
                    code,
                    LobbyEvent::RoomStatusChanged {
                        room_code: code.clone(),
                        new_status: RoomStatus::Lobby,
                        reason: "game_ended".into(),
                    },
                );
            }
        }
        if let Err(e) = self
            .store
            .log_event(
                room.id,
                None,
                "game_ended",
                serde_json::json!({ "result": result }),
            )
            .await
        {
            tracing::warn!(room = %room.id, error = %e, "audit log failed");
        }
        tracing::info!(
            room = %code,
            returned = outcome.updated,
            "game ended, group returned to lobby"
        );
        Ok(outcome)
    }

    // -- Heartbeats --------------------------------------------------------

    /// Records a heartbeat for (player, room). Always touches the
    /// in-memory record; only writes `last_ping` through to the store when
    /// the persist interval elapsed, to bound write volume.
    pub async fn handle_heartbeat(
        &self,
        player: &PlayerId,
        code: &RoomCode,
    ) -> Result<(), SyncError> {
        let persist = {
            let mut beats = self
                .heartbeats
                .lock()
                .expect("heartbeat map lock poisoned");
            let now = Instant::now();
            match beats.get_mut(&(player.clone(), code.clone())) {
                Some(record) => {
                    record.last_beat = now;
                    let due = record.last_persisted.elapsed()
                        >= self.config.heartbeat_persist_interval;
                    if due {
                        record.last_persisted = now;
                    }
                    due
                }
                None => {
                    beats.insert(
                        (player.clone(), code.clone()),
                        HeartbeatRecord {
                            last_beat: now,
                            last_persisted: now,
                        },
                    );
                    true
                }
            }
        };
        if !persist {
            return Ok(());
        }

        let Some(room) = self.store.room_by_code(code).await? else {
            return Ok(());
        };
        let Some(mut member) = self.store.member(room.id, player).await?
        else {
            return Ok(());
        };
        member.last_ping = SystemTime::now();
        self.store.update_member(&member).await?;
        Ok(())
    }

    /// Sweeps tracked heartbeats and synthesizes an immediate
    /// disconnected update for every player silent past the threshold.
    /// Returns how many disconnections were synthesized.
    pub async fn detect_disconnections(&self) -> usize {
        let stale: Vec<(PlayerId, RoomCode)> = {
            let mut beats = self
                .heartbeats
                .lock()
                .expect("heartbeat map lock poisoned");
            let threshold = self.config.heartbeat_stale_after;
            let stale: Vec<_> = beats
                .iter()
                .filter(|(_, r)| r.last_beat.elapsed() > threshold)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &stale {
                beats.remove(key);
            }
            stale
        };

        let mut detected = 0;
        for (player, code) in stale {
            tracing::info!(
                %player,
                room = %code,
                "heartbeat silence, synthesizing disconnect"
            );
            match self
                .submit(
                    &player,
                    &code,
                    PlayerStatus::Disconnected,
                    MemberLocation::Disconnected,
                    None,
                    true,
                    Some("heartbeat_timeout"),
                )
                .await
            {
                Ok(UpdateDisposition::Applied { .. }) => detected += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    %player,
                    room = %code,
                    error = %e,
                    "synthesized disconnect failed"
                ),
            }
        }
        detected
    }

    /// Drops heartbeat tracking for a (player, room) — explicit leave.
    pub fn forget_heartbeat(&self, player: &PlayerId, code: &RoomCode) {
        self.heartbeats
            .lock()
            .expect("heartbeat map lock poisoned")
            .remove(&(player.clone(), code.clone()));
        self.queue_guard().forget(&(player.clone(), code.clone()));
    }
}

/// Collapses a presence triple back into the (status, location) report
/// shape the update path consumes.
fn presence_to_report(p: Presence) -> (PlayerStatus, MemberLocation) {
    if !p.is_connected {
        (PlayerStatus::Disconnected, MemberLocation::Disconnected)
    } else if p.in_game {
        (PlayerStatus::InGame, MemberLocation::Game)
    } else {
        (PlayerStatus::Connected, MemberLocation::Lobby)
    }
}
