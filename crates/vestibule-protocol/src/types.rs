//! Identity and presence types shared by every Vestibule layer.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a user, issued by the external identity provider.
///
/// Newtype over `String` rather than an integer: user ids arrive from
/// outside this system (platform snowflakes, auth subjects) and are opaque
/// to the engine. `#[serde(transparent)]` keeps the JSON representation a
/// plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique identifier for a room row, assigned by the persistent store.
///
/// Distinct from [`RoomCode`]: the id is the stable storage key, the code is
/// the short human-enterable handle that can be reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// The short human-enterable room code (6 characters, unambiguous alphabet).
///
/// Codes are normalized to uppercase on construction so that user input
/// like `"abc234"` matches the stored `"ABC234"`. Generation and alphabet
/// validation live in the room layer; this type is just the handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a transport connection (socket id, request id).
///
/// The engine never creates these — the transport layer outside this
/// repository does — so the inner representation is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(pub String);

impl TransportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Room lifecycle status
// ---------------------------------------------------------------------------

/// The lifecycle status of a room.
///
/// ```text
/// Lobby ⇄ InGame → Returning → Lobby
///   │
///   └──(no active members for the grace period)──→ Abandoned
/// ```
///
/// Unlike a strict state machine, rooms move freely between the three live
/// states as groups launch and leave activities; `Abandoned` is terminal
/// until the row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    InGame,
    Returning,
    Abandoned,
}

impl RoomStatus {
    /// Returns `true` if the room accepts joins in this status.
    ///
    /// Joining mid-game and mid-return is allowed (late joiners and
    /// reconnecting players land in the lobby); only abandoned rooms
    /// reject joins.
    pub fn accepts_joins(&self) -> bool {
        matches!(self, Self::Lobby | Self::InGame | Self::Returning)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "lobby"),
            Self::InGame => write!(f, "in_game"),
            Self::Returning => write!(f, "returning"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

// ---------------------------------------------------------------------------
// Member role / location
// ---------------------------------------------------------------------------

/// A member's role within a room. Exactly one host per active room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Host,
    Player,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Player => write!(f, "player"),
        }
    }
}

/// Where a member currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberLocation {
    /// In the lobby, connected over the live transport.
    Lobby,
    /// Inside an external activity. The member may have no live transport
    /// connection while here and still counts as active.
    Game,
    /// No live transport and not in an activity.
    Disconnected,
}

impl fmt::Display for MemberLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "lobby"),
            Self::Game => write!(f, "game"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// The status half of a status report: what the reporter believes the
/// player is doing.
///
/// Deliberately separate from [`MemberLocation`] — the two halves of a
/// report come from different observers (the client knows its connection,
/// the activity server knows the game) and CAN disagree. The conflict
/// rules exist for exactly those disagreements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Connected,
    InGame,
    Disconnected,
}

// ---------------------------------------------------------------------------
// Presence — the canonical triple
// ---------------------------------------------------------------------------

/// The canonical `{is_connected, in_game, location}` triple stored on a
/// member row.
///
/// Status updates arrive as a `(PlayerStatus, MemberLocation)` pair from
/// several independent sources; [`Presence::derive`] recomputes the triple
/// so every write path stores the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub is_connected: bool,
    pub in_game: bool,
    pub location: MemberLocation,
}

impl Presence {
    /// Recomputes the canonical triple from a reported (status, location)
    /// pair.
    ///
    /// A disconnected report collapses to the disconnected triple
    /// regardless of the claimed location. The result is NOT guaranteed
    /// coherent: `(InGame, Lobby)` yields `in_game = true` in the lobby,
    /// which is precisely the shape conflict resolution normalizes.
    pub fn derive(status: PlayerStatus, location: MemberLocation) -> Self {
        let is_connected = status != PlayerStatus::Disconnected
            && location != MemberLocation::Disconnected;
        if !is_connected {
            return Self::disconnected();
        }
        Self {
            is_connected: true,
            in_game: status == PlayerStatus::InGame
                || location == MemberLocation::Game,
            location,
        }
    }

    /// The triple for a member with no live connection and no activity.
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            in_game: false,
            location: MemberLocation::Disconnected,
        }
    }

    /// The triple for a connected member sitting in the lobby.
    pub fn in_lobby() -> Self {
        Self {
            is_connected: true,
            in_game: false,
            location: MemberLocation::Lobby,
        }
    }

    /// The triple for a member inside the external activity.
    pub fn in_game() -> Self {
        Self {
            is_connected: true,
            in_game: true,
            location: MemberLocation::Game,
        }
    }

    /// Returns `true` if the triple is internally consistent.
    ///
    /// Incoherent triples (claiming game activity while disconnected) can
    /// only be produced by merging independent reports; the reconciliation
    /// logic uses this to reject a bad merge.
    pub fn is_coherent(&self) -> bool {
        match self.location {
            MemberLocation::Game => self.is_connected && self.in_game,
            MemberLocation::Lobby => self.is_connected && !self.in_game,
            MemberLocation::Disconnected => {
                !self.is_connected && !self.in_game
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict vocabulary
// ---------------------------------------------------------------------------

/// A detected disagreement between a requested status and the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConflict {
    pub kind: ConflictKind,
    /// Human-readable description for logs and client display.
    pub detail: String,
}

/// The kinds of status conflict the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The update claims game activity but the stored row says the member
    /// is disconnected.
    GameWhileDisconnected,
    /// The update claims the lobby with the in-game flag still set while
    /// the stored row locates the member in the activity.
    LobbyGameMismatch,
}

/// Which rule reconciled a pair of disagreeing status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Both reports disagreed with the store; the store wins.
    TrustStore,
    /// Client's connectivity bit merged with the server's activity bit.
    SplitTrust,
    /// The report with the newer timestamp wins.
    NewestReport,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustStore => write!(f, "trust_store"),
            Self::SplitTrust => write!(f, "split_trust"),
            Self::NewestReport => write!(f, "newest_report"),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
