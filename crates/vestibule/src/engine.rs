//! The engine: process-scoped coordinator for all lobby state.
//!
//! One `Engine` exists per process. It owns every in-memory registry
//! (connections, locks, queue, heartbeats, snapshots, timers) and wires
//! the background loops that keep them honest. Created at startup, torn
//! down with [`Engine::shutdown`] — no module-level globals anywhere.
//!
//! The engine also carries the 1:1 request surface
//! ([`Engine::handle_request`]) that the out-of-scope transport and HTTP
//! layers call into. None of those layers contain business logic; every
//! request maps onto exactly one manager method.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use vestibule_conn::{
    Broadcaster, ConnConfig, ConnectionManager, SessionToken,
};
use vestibule_protocol::{ClientRequest, PlayerId, TransportId};
use vestibule_room::{
    CreateOutcome, JoinOutcome, LifecycleConfig, LobbyConfig, LobbyManager,
    RecoveryOutcome, RoomLifecycleManager, RoomSnapshot, SharedConnections,
    StatusOutcome,
};
use vestibule_store::RoomStore;
use vestibule_sync::{
    BulkOutcome, HeartbeatConfig, HeartbeatManager, StatusSyncManager,
    SyncConfig, UpdateDisposition,
};

use crate::VestibuleError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Aggregate configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub conn: ConnConfig,
    pub lobby: LobbyConfig,
    pub lifecycle: LifecycleConfig,
    pub sync: SyncConfig,
    pub heartbeat: HeartbeatConfig,
    /// How often session/snapshot/connection maintenance runs.
    pub maintenance_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conn: ConnConfig::default(),
            lobby: LobbyConfig::default(),
            lifecycle: LifecycleConfig::default(),
            sync: SyncConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            maintenance_interval: Duration::from_secs(5 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Request outcomes
// ---------------------------------------------------------------------------

/// Typed result of [`Engine::handle_request`], one variant per request
/// family. The transport layer maps these into protocol responses.
pub enum RequestOutcome {
    Joined(Box<JoinOutcome>),
    Left,
    HeartbeatAck,
    StatusUpdated(UpdateDisposition),
    StatusApplied(StatusOutcome),
    BulkCompleted(BulkOutcome),
    Recovered(Box<RecoveryOutcome>),
    RoomValidated(RoomSnapshot),
    GameEnded(BulkOutcome),
    GroupReturnStarted { returned: usize },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The process-scoped coordinator.
pub struct Engine<S: RoomStore> {
    store: Arc<S>,
    bus: Broadcaster,
    connections: SharedConnections,
    lifecycle: Arc<RoomLifecycleManager<S>>,
    lobby: Arc<LobbyManager<S>>,
    sync: Arc<StatusSyncManager<S>>,
    heartbeats: Arc<HeartbeatManager<S>>,
    tasks: Vec<JoinHandle<()>>,
    config: EngineConfig,
}

impl<S: RoomStore> Engine<S> {
    /// Wires up an engine over the given store. Background loops are NOT
    /// started yet; call [`start`](Self::start).
    pub fn new(store: S, config: EngineConfig) -> Self {
        let store = Arc::new(store);
        let bus = Broadcaster::new();
        let connections: SharedConnections = Arc::new(Mutex::new(
            ConnectionManager::new(config.conn.clone()),
        ));
        let lifecycle = Arc::new(RoomLifecycleManager::new(
            Arc::clone(&store),
            bus.clone(),
            config.lifecycle.clone(),
        ));
        let lobby = Arc::new(LobbyManager::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            bus.clone(),
            Arc::clone(&lifecycle),
            config.lobby.clone(),
        ));
        let sync = Arc::new(StatusSyncManager::new(
            Arc::clone(&lobby),
            Arc::clone(&store),
            bus.clone(),
            config.sync.clone(),
        ));
        let heartbeats = Arc::new(HeartbeatManager::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            bus.clone(),
            config.heartbeat.clone(),
        ));

        Self {
            store,
            bus,
            connections,
            lifecycle,
            lobby,
            sync,
            heartbeats,
            tasks: Vec::new(),
            config,
        }
    }

    /// Spawns the background loops: queue drain, disconnection detection,
    /// heartbeat sweeps (in-memory and store-side), and maintenance.
    /// Idempotent — a second call is a no-op.
    ///
    /// All loops act on older-than-threshold predicates, so they tolerate
    /// being delayed or skipped; none of them block each other.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        tracing::info!("engine background tasks starting");

        let sync = Arc::clone(&self.sync);
        let period = self.config.sync.drain_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await; // first tick fires immediately; skip it
            loop {
                tick.tick().await;
                sync.drain_queue().await;
            }
        }));

        let sync = Arc::clone(&self.sync);
        let period = self.config.sync.disconnect_sweep_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                sync.detect_disconnections().await;
            }
        }));

        let heartbeats = Arc::clone(&self.heartbeats);
        let period = self.config.heartbeat.sweep_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                heartbeats.sweep().await;
            }
        }));

        let heartbeats = Arc::clone(&self.heartbeats);
        let period = self.config.heartbeat.store_sweep_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                heartbeats.sweep_store().await;
            }
        }));

        let lobby = Arc::clone(&self.lobby);
        let period = self.config.maintenance_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                lobby.run_maintenance().await;
            }
        }));
    }

    /// Stops every background loop and pending grace timer. The engine is
    /// consumed; room state in the store is left as-is.
    pub async fn shutdown(self) {
        tracing::info!("engine shutting down");
        for task in &self.tasks {
            task.abort();
        }
        self.lifecycle.shutdown();
    }

    // -- Request surface ---------------------------------------------------

    /// Creates a room hosted by `host`, registering the creator's
    /// connection for liveness tracking.
    pub async fn create_room(
        &self,
        host: &PlayerId,
        username: &str,
        transport: &TransportId,
        activity_type: Option<String>,
        settings: Map<String, Value>,
        max_participants: Option<usize>,
        display_name: Option<String>,
    ) -> Result<CreateOutcome, VestibuleError> {
        let outcome = self
            .lobby
            .create_room(
                host,
                username,
                transport,
                activity_type,
                settings,
                max_participants,
                display_name,
            )
            .await?;
        self.heartbeats.register(
            transport,
            host,
            outcome.room.id,
            &outcome.room.code,
        );
        Ok(outcome)
    }

    /// Dispatches one inbound request to the owning manager.
    pub async fn handle_request(
        &self,
        user: &PlayerId,
        transport: &TransportId,
        request: ClientRequest,
    ) -> Result<RequestOutcome, VestibuleError> {
        match request {
            ClientRequest::JoinRoom {
                room_code,
                player_name,
                session_token,
                display_name,
            } => {
                let token = session_token.map(SessionToken::from_string);
                let outcome = self
                    .lobby
                    .join_room(
                        user,
                        &player_name,
                        &room_code,
                        transport,
                        token.as_ref(),
                        display_name,
                    )
                    .await?;
                self.heartbeats.register(
                    transport,
                    user,
                    outcome.room.id,
                    &room_code,
                );
                Ok(RequestOutcome::Joined(Box::new(outcome)))
            }
            ClientRequest::LeaveRoom { room_code } => {
                self.sync.forget_heartbeat(user, &room_code);
                self.heartbeats.forget(transport);
                self.lobby.leave_room(user, &room_code).await?;
                Ok(RequestOutcome::Left)
            }
            ClientRequest::Heartbeat { room_code } => {
                self.heartbeats.beat(transport).await;
                self.sync.handle_heartbeat(user, &room_code).await?;
                Ok(RequestOutcome::HeartbeatAck)
            }
            ClientRequest::UpdateStatus {
                room_code,
                status,
                location,
                metadata,
                immediate,
            } => {
                let disposition = self
                    .sync
                    .update_player_location(
                        user, &room_code, status, location, metadata,
                        immediate,
                    )
                    .await?;
                Ok(RequestOutcome::StatusUpdated(disposition))
            }
            ClientRequest::BulkUpdate {
                room_code,
                players,
                reason,
            } => {
                let outcome = self
                    .sync
                    .bulk_update(&room_code, players, &reason)
                    .await?;
                Ok(RequestOutcome::BulkCompleted(outcome))
            }
            ClientRequest::RecoverSession { session_token } => {
                let token = SessionToken::from_string(session_token);
                let outcome =
                    self.lobby.recover_session(&token, transport).await?;
                self.heartbeats.register(
                    transport,
                    &outcome.member.user_id,
                    outcome.room.id,
                    &outcome.room.code,
                );
                Ok(RequestOutcome::Recovered(Box::new(outcome)))
            }
            ClientRequest::ValidateRoom { room_code } => {
                let snapshot = self.lobby.validate_room(&room_code).await?;
                Ok(RequestOutcome::RoomValidated(snapshot))
            }
            ClientRequest::GameEnd { room_code, result } => {
                let outcome =
                    self.sync.handle_game_end(&room_code, result).await?;
                Ok(RequestOutcome::GameEnded(outcome))
            }
            ClientRequest::ReturnAll { room_code } => {
                let returned = self
                    .lobby
                    .initiate_group_return(user, &room_code)
                    .await?;
                Ok(RequestOutcome::GroupReturnStarted { returned })
            }
            ClientRequest::PlayerReturn { room_code } => {
                let outcome =
                    self.lobby.handle_player_return(user, &room_code).await?;
                Ok(RequestOutcome::StatusApplied(outcome))
            }
        }
    }

    /// Transport-level teardown: the socket died without a leave.
    pub async fn handle_transport_disconnect(
        &self,
        transport: &TransportId,
    ) -> Result<Option<PlayerId>, VestibuleError> {
        self.heartbeats.forget(transport);
        Ok(self.lobby.handle_transport_disconnect(transport).await?)
    }

    /// Collapses duplicate tabs: keeps the user's most-recently-active
    /// connection and removes the rest. Returns the transports the
    /// caller must actually close.
    pub async fn consolidate_user(
        &self,
        user: &PlayerId,
    ) -> Vec<TransportId> {
        let doomed = {
            let mut conn = self.connections.lock().await;
            let doomed = conn.consolidate_connections(user);
            for transport in &doomed {
                conn.remove_connection(transport);
            }
            doomed
        };
        for transport in &doomed {
            self.bus.drop_transport(transport);
            self.heartbeats.forget(transport);
        }
        doomed
    }

    // -- Accessors ---------------------------------------------------------

    pub fn lobby(&self) -> &Arc<LobbyManager<S>> {
        &self.lobby
    }

    pub fn sync(&self) -> &Arc<StatusSyncManager<S>> {
        &self.sync
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatManager<S>> {
        &self.heartbeats
    }

    pub fn lifecycle(&self) -> &Arc<RoomLifecycleManager<S>> {
        &self.lifecycle
    }

    pub fn connections(&self) -> &SharedConnections {
        &self.connections
    }

    pub fn bus(&self) -> &Broadcaster {
        &self.bus
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
