//! Unified error type for the Vestibule engine.

use vestibule_conn::SessionError;
use vestibule_room::LobbyError;
use vestibule_store::StoreError;
use vestibule_sync::SyncError;

/// Top-level error that wraps all crate-specific errors.
///
/// When driving the engine through the `vestibule` meta-crate, callers
/// deal with this single type; the `#[from]` conversions let `?` lift
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum VestibuleError {
    /// A session-layer error (unknown or expired token).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A lobby-layer error (room/member lookups, joins, capacity).
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// A sync-layer error (reconciliation, bulk rollback).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A store-layer error.
    #[error(transparent)]
    Store(#[from] StoreError),
}
