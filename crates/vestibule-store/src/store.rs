//! The [`RoomStore`] trait — the engine's contract with its durable backend.

use std::future::Future;
use std::time::SystemTime;

use serde_json::Value;
use vestibule_protocol::{PlayerId, RoomCode, RoomId, RoomStatus};

use crate::{MemberRow, RoomDraft, RoomRow, StoreError};

/// Durable storage for rooms and members.
///
/// Consumed generically (`LobbyManager<S: RoomStore>`) rather than through
/// trait objects, so implementations can use plain `async fn`. The engine
/// never assumes multi-statement transactions; every method is a single
/// row-level operation, and the two "compound" operations
/// ([`auto_transfer_host`](Self::auto_transfer_host),
/// [`set_room_status_if`](Self::set_room_status_if)) are the backend's
/// responsibility to make atomic.
pub trait RoomStore: Send + Sync + 'static {
    // -- Rooms ------------------------------------------------------------

    /// Inserts a new room, assigning its id.
    ///
    /// # Errors
    /// [`StoreError::DuplicateCode`] if a live room already owns the code;
    /// the caller regenerates and retries.
    fn insert_room(
        &self,
        draft: RoomDraft,
    ) -> impl Future<Output = Result<RoomRow, StoreError>> + Send;

    fn room_by_id(
        &self,
        id: RoomId,
    ) -> impl Future<Output = Result<Option<RoomRow>, StoreError>> + Send;

    fn room_by_code(
        &self,
        code: &RoomCode,
    ) -> impl Future<Output = Result<Option<RoomRow>, StoreError>> + Send;

    /// Overwrites a room row (status, metadata, settings, timestamps).
    fn update_room(&self, room: &RoomRow) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Equality-filtered status write: sets `status = new` only where
    /// `status == expected`. Returns whether the write applied.
    ///
    /// This is the store-side compare-and-set the grace-period timers use
    /// to avoid clobbering a status that changed while they slept.
    fn set_room_status_if(
        &self,
        id: RoomId,
        expected: RoomStatus,
        new: RoomStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Bumps the room's `last_activity` stamp.
    fn touch_room(&self, id: RoomId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes the room and all its members, freeing the code for reuse.
    fn delete_room(&self, id: RoomId) -> impl Future<Output = Result<(), StoreError>> + Send;

    // -- Members ----------------------------------------------------------

    /// Inserts a member row.
    ///
    /// # Errors
    /// [`StoreError::DuplicateMember`] if the (room, user) pair exists.
    fn insert_member(
        &self,
        member: MemberRow,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn member(
        &self,
        room: RoomId,
        user: &PlayerId,
    ) -> impl Future<Output = Result<Option<MemberRow>, StoreError>> + Send;

    /// All members of a room, ordered by `joined_at` ascending. The order
    /// matters: host failover promotes the FIRST connected row.
    fn members(
        &self,
        room: RoomId,
    ) -> impl Future<Output = Result<Vec<MemberRow>, StoreError>> + Send;

    fn update_member(
        &self,
        member: &MemberRow,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_member(
        &self,
        room: RoomId,
        user: &PlayerId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    // -- Compound operations ----------------------------------------------

    /// Demotes the departing host and promotes the oldest-joined connected
    /// member (excluding `leaving`) in one operation.
    ///
    /// Returns the promoted row, or `None` when no connected candidate
    /// exists — in that case every host row is still demoted but
    /// `RoomRow::host_id` is left pointing at the departed host, anchoring
    /// the "pending reconnection" state.
    fn auto_transfer_host(
        &self,
        room: RoomId,
        leaving: &PlayerId,
    ) -> impl Future<Output = Result<Option<MemberRow>, StoreError>> + Send;

    /// Connected members whose `last_ping` is older than `cutoff`, across
    /// all rooms. Backs the secondary liveness sweep that catches rows the
    /// in-memory heartbeat path missed (process restarts, dropped timers).
    fn members_with_stale_ping(
        &self,
        cutoff: SystemTime,
    ) -> impl Future<Output = Result<Vec<MemberRow>, StoreError>> + Send;

    // -- Audit ------------------------------------------------------------

    /// Appends an audit event. Callers treat this as fire-and-forget:
    /// failures are logged and swallowed, never propagated into the
    /// primary operation.
    fn log_event(
        &self,
        room: RoomId,
        user: Option<&PlayerId>,
        kind: &str,
        data: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
