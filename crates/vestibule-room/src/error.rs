//! Error types for the lobby layer.

use vestibule_conn::SessionError;
use vestibule_protocol::{PlayerId, RoomCode, RoomStatus};
use vestibule_store::StoreError;

/// Errors that can occur during lobby operations.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// No room exists for this code.
    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    /// The room has no free participant slot.
    #[error("room {code} is full ({max} participants)")]
    RoomFull { code: RoomCode, max: usize },

    /// The room's status doesn't allow the requested operation (e.g.
    /// joining an abandoned room).
    #[error("room {code} is not available while {status}")]
    RoomNotAvailable { code: RoomCode, status: RoomStatus },

    /// Another join for the same (username, room) is in progress. The
    /// caller should retry shortly.
    #[error("a join for {username} in room {code} is already in progress")]
    JoinLockContended { username: String, code: RoomCode },

    /// The user has no member row in this room.
    #[error("player {user} not found in room {code}")]
    PlayerNotFound { user: PlayerId, code: RoomCode },

    /// A host-only operation was attempted by a non-host.
    #[error("player {0} is not the host of this room")]
    NotHost(PlayerId),

    /// Code allocation collided too many times in a row.
    #[error("could not allocate a unique room code after {0} attempts")]
    CodeSpaceExhausted(usize),

    /// The transport exceeded its attempt budget for this action.
    #[error("rate limit exceeded for {action}")]
    RateLimited { action: String },

    /// A session-layer failure (unknown or expired token).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A store-layer failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
