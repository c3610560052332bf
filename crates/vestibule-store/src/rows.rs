//! Row types: what the store persists for rooms and members.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vestibule_protocol::{
    MemberLocation, MemberRole, PlayerId, PlayerSummary, Presence, RoomCode,
    RoomId, RoomStatus, RoomSummary, TransportId,
};

// ---------------------------------------------------------------------------
// RoomRow
// ---------------------------------------------------------------------------

/// A persisted room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRow {
    pub id: RoomId,
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub status: RoomStatus,
    pub activity_type: Option<String>,
    pub max_participants: usize,
    /// Opaque room configuration chosen by the host.
    pub settings: Map<String, Value>,
    /// Opaque engine bookkeeping (e.g. a return-in-progress-until stamp).
    pub metadata: Map<String, Value>,
    pub last_activity: SystemTime,
    pub created_at: SystemTime,
}

impl RoomRow {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            code: self.code.clone(),
            status: self.status,
            host_id: self.host_id.clone(),
            activity_type: self.activity_type.clone(),
            max_participants: self.max_participants,
        }
    }
}

/// A room awaiting insertion. The store assigns the [`RoomId`].
#[derive(Debug, Clone)]
pub struct RoomDraft {
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub activity_type: Option<String>,
    pub max_participants: usize,
    pub settings: Map<String, Value>,
}

impl RoomDraft {
    /// Materializes the draft into a row with the store-assigned id.
    pub(crate) fn into_row(self, id: RoomId) -> RoomRow {
        let now = SystemTime::now();
        RoomRow {
            id,
            code: self.code,
            host_id: self.host_id,
            status: RoomStatus::Lobby,
            activity_type: self.activity_type,
            max_participants: self.max_participants,
            settings: self.settings,
            metadata: Map::new(),
            last_activity: now,
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// MemberRow
// ---------------------------------------------------------------------------

/// A persisted room membership. Unique per (room, user).
///
/// Created on first join, updated on every reconnect and status change,
/// deleted only on explicit leave — a transport drop merely flips
/// `is_connected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRow {
    pub room_id: RoomId,
    pub user_id: PlayerId,
    pub username: String,
    /// Custom display-name override, refreshed on rejoin.
    pub display_name: Option<String>,
    pub role: MemberRole,
    pub is_connected: bool,
    pub in_game: bool,
    pub location: MemberLocation,
    pub last_ping: SystemTime,
    /// `None` while the member is inside the external activity or
    /// disconnected.
    pub transport_id: Option<TransportId>,
    pub joined_at: SystemTime,
}

impl MemberRow {
    /// Creates a fresh member row in the connected-in-lobby state.
    pub fn new_joined(
        room_id: RoomId,
        user_id: PlayerId,
        username: impl Into<String>,
        role: MemberRole,
        transport_id: TransportId,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            room_id,
            user_id,
            username: username.into(),
            display_name: None,
            role,
            is_connected: true,
            in_game: false,
            location: MemberLocation::Lobby,
            last_ping: now,
            transport_id: Some(transport_id),
            joined_at: now,
        }
    }

    /// The member's canonical presence triple.
    pub fn presence(&self) -> Presence {
        Presence {
            is_connected: self.is_connected,
            in_game: self.in_game,
            location: self.location,
        }
    }

    /// Overwrites the presence triple on this row.
    pub fn set_presence(&mut self, presence: Presence) {
        self.is_connected = presence.is_connected;
        self.in_game = presence.in_game;
        self.location = presence.location;
    }

    /// Whether the member counts as active for abandonment purposes.
    /// Members inside the external activity are active even with no live
    /// transport connection.
    pub fn is_active(&self) -> bool {
        self.is_connected || self.in_game
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            presence: self.presence(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventRecord — the audit trail
// ---------------------------------------------------------------------------

/// One appended audit event. Write-only from the engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub room_id: RoomId,
    pub user_id: Option<PlayerId>,
    pub kind: String,
    pub data: Value,
    pub recorded_at: SystemTime,
}
