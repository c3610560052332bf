//! Shared vocabulary for Vestibule.
//!
//! This crate defines every type the engine's layers agree on:
//!
//! - **Identity** ([`PlayerId`], [`RoomId`], [`RoomCode`], [`TransportId`]) —
//!   newtype wrappers so a room id can never be passed where a player id
//!   is expected.
//! - **Presence** ([`RoomStatus`], [`MemberRole`], [`MemberLocation`],
//!   [`Presence`]) — the canonical "where is this member" vocabulary.
//! - **Conflicts** ([`StatusConflict`], [`ConflictKind`],
//!   [`ResolutionStrategy`]) — how disagreeing status reports are described.
//! - **Wire messages** ([`ClientRequest`] inbound, [`LobbyEvent`] outbound) —
//!   what transports and out-of-band HTTP callers exchange with the engine.
//!
//! The protocol layer sits below everything else. It doesn't know about
//! connections, rooms, or the store — it only defines the shapes that travel
//! between them.

mod events;
mod types;

pub use events::{
    BulkStatusEntry, ClientRequest, LobbyEvent, PlayerSummary, RoomSummary,
    SyncType,
};
pub use types::{
    ConflictKind, MemberLocation, MemberRole, PlayerId, PlayerStatus,
    Presence, ResolutionStrategy, RoomCode, RoomId, RoomStatus,
    StatusConflict, TransportId,
};
