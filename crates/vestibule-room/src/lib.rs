//! Room and lobby management for Vestibule.
//!
//! Two coordinators live here:
//!
//! - [`LobbyManager`] — the write path for room membership: create, join,
//!   rejoin, status updates, player/group return, session issue/recover,
//!   leave, transport disconnect. Every mutation persists through the
//!   store, refreshes the in-memory snapshot cache, and broadcasts to the
//!   room topic.
//! - [`RoomLifecycleManager`] — grace-period timers that delay acting on
//!   an absence: room abandonment and host transfer. Timers are
//!   cancel-by-replacement and re-check the world when they fire.
//!
//! Conflict detection/resolution ([`conflict`]) also lives here so the
//! lobby's single-update path and the status-sync engine share one
//! implementation.

#![allow(async_fn_in_trait)]

pub mod conflict;

mod code;
mod config;
mod error;
mod lifecycle;
mod manager;
mod snapshot;

pub use code::{CODE_ALPHABET, CODE_LEN, generate_room_code, is_valid_code};
pub use config::{LifecycleConfig, LobbyConfig};
pub use error::LobbyError;
pub use lifecycle::{GraceKind, RoomLifecycleManager};
pub use manager::{
    CreateOutcome, JoinOutcome, LobbyManager, MaintenanceReport,
    RecoveryOutcome, SharedConnections, StatusOutcome,
};
pub use snapshot::RoomSnapshot;
