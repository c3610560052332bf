//! Error types for the sync layer.

use vestibule_protocol::PlayerId;
use vestibule_room::LobbyError;
use vestibule_store::StoreError;

/// Errors that can occur during status synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Reconciliation could not produce a coherent presence; the caller
    /// decides instead of the engine guessing.
    #[error("status conflict could not be resolved for player {0}")]
    ConflictUnresolved(PlayerId),

    /// A bulk update failed past the threshold; every update that had
    /// succeeded was reverted to its pre-batch location.
    #[error("bulk update rolled back: {failed}/{total} updates failed")]
    BulkRolledBack { failed: usize, total: usize },

    /// A lobby-layer failure (room/player lookups, status application).
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// A store-layer failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
