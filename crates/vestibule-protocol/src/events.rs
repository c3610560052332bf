//! Wire messages: what enters the engine and what it broadcasts.
//!
//! Inbound, [`ClientRequest`] is the union of the real-time transport
//! events and the out-of-band HTTP calls from external activity servers —
//! both surfaces map 1:1 onto engine methods, so they share one enum.
//!
//! Outbound, [`LobbyEvent`] is what gets published to every subscriber of
//! a room's topic. The engine never addresses individual sockets; it
//! publishes to the room and the transport layer fans out.
//!
//! Both enums are internally tagged (`#[serde(tag = "type")]`) so the JSON
//! is `{ "type": "join_room", ... }` — flat and easy to switch on in a
//! JavaScript client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    MemberLocation, MemberRole, PlayerId, PlayerStatus, Presence,
    ResolutionStrategy, RoomCode, RoomId, RoomStatus, StatusConflict,
};

// ---------------------------------------------------------------------------
// Summaries carried inside events
// ---------------------------------------------------------------------------

/// A member as seen in broadcasts and room snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub user_id: PlayerId,
    pub username: String,
    /// Custom display-name override, if the player set one.
    pub display_name: Option<String>,
    pub role: MemberRole,
    pub presence: Presence,
}

impl PlayerSummary {
    /// The name clients should render: the override if present, else the
    /// account username.
    pub fn visible_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// A room as seen in broadcasts and room snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub code: RoomCode,
    pub status: RoomStatus,
    pub host_id: PlayerId,
    pub activity_type: Option<String>,
    pub max_participants: usize,
}

/// Granularity of a room resync broadcast. Only full resyncs exist today;
/// the tag is on the wire so clients can distinguish future delta syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
}

// ---------------------------------------------------------------------------
// Inbound requests
// ---------------------------------------------------------------------------

/// One entry of a bulk status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkStatusEntry {
    pub player_id: PlayerId,
    pub status: PlayerStatus,
    pub location: MemberLocation,
}

/// Requests entering the engine, from the live transport or from external
/// activity servers over HTTP. Each variant maps onto exactly one engine
/// method; none carry business logic of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    JoinRoom {
        room_code: RoomCode,
        player_name: String,
        session_token: Option<String>,
        display_name: Option<String>,
    },
    LeaveRoom {
        room_code: RoomCode,
    },
    Heartbeat {
        room_code: RoomCode,
    },
    UpdateStatus {
        room_code: RoomCode,
        status: PlayerStatus,
        location: MemberLocation,
        #[serde(default)]
        metadata: Option<Value>,
        /// Apply synchronously instead of through the deferred queue.
        #[serde(default)]
        immediate: bool,
    },
    BulkUpdate {
        room_code: RoomCode,
        players: Vec<BulkStatusEntry>,
        reason: String,
    },
    RecoverSession {
        session_token: String,
    },
    ValidateRoom {
        room_code: RoomCode,
    },
    GameEnd {
        room_code: RoomCode,
        #[serde(default)]
        result: Value,
    },
    ReturnAll {
        room_code: RoomCode,
    },
    PlayerReturn {
        room_code: RoomCode,
    },
}

// ---------------------------------------------------------------------------
// Outbound broadcasts
// ---------------------------------------------------------------------------

/// Events broadcast to every subscriber of a room's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    PlayerJoined {
        player: PlayerSummary,
        room: RoomSummary,
        players: Vec<PlayerSummary>,
    },
    PlayerStatusUpdated {
        player_id: PlayerId,
        status: Presence,
        players: Vec<PlayerSummary>,
        /// Conflicts detected and resolved while applying the update.
        /// Empty on the happy path.
        conflicts: Vec<StatusConflict>,
    },
    RoomStatusChanged {
        room_code: RoomCode,
        new_status: RoomStatus,
        reason: String,
    },
    RoomStatusSync {
        room: RoomSummary,
        players: Vec<PlayerSummary>,
        sync_type: SyncType,
    },
    HostTransferred {
        room_code: RoomCode,
        old_host_id: PlayerId,
        new_host_id: PlayerId,
        new_host_name: String,
        reason: String,
    },
    PlayerDisconnected {
        player_id: PlayerId,
        was_host: bool,
        reason: String,
    },
    StatusConflictResolved {
        player_id: PlayerId,
        resolved_status: Presence,
        strategy: ResolutionStrategy,
        /// `true` when the client must act on the resolution (e.g. its
        /// own view of the world was overruled).
        requires_action: bool,
    },
}

// =========================================================================
// Tests
// =========================================================================
