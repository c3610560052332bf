//! Error types for the store layer.

use vestibule_protocol::{PlayerId, RoomCode, RoomId};

/// Errors a [`RoomStore`](crate::RoomStore) implementation can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The room row does not exist.
    #[error("room {0} not found in store")]
    RoomMissing(RoomId),

    /// The member row does not exist.
    #[error("member {user} not found in room {room}")]
    MemberMissing { room: RoomId, user: PlayerId },

    /// A room with this code already exists. The caller retries with a
    /// freshly generated code.
    #[error("room code {0} already in use")]
    DuplicateCode(RoomCode),

    /// A member row for this (room, user) pair already exists.
    #[error("member {user} already in room {room}")]
    DuplicateMember { room: RoomId, user: PlayerId },

    /// The backend is unreachable or failed internally. The in-memory
    /// backend never produces this; real backends map their driver errors
    /// here.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
