//! Status synchronization for Vestibule.
//!
//! Two engines live here:
//!
//! - [`StatusSyncManager`] — the ordering and reconciliation engine. Every
//!   location report is stamped with a globally increasing sequence number
//!   and flows through a per-(player, room) queue slot; only the highest
//!   sequence ever applies, which is what stops a delayed "disconnected"
//!   from clobbering a later "reconnected". Also: bulk updates with
//!   snapshot-and-rollback, room resyncs, game-end returns, heartbeat
//!   recording with bounded store writes, and stale-heartbeat
//!   disconnection detection.
//! - [`HeartbeatManager`] — connection-level liveness. Tracks
//!   per-connection beats, marks silent members disconnected, and performs
//!   automatic host failover with a grace window for freshly promoted
//!   hosts. A secondary sweep reads `last_ping` from the store to catch
//!   rows the in-memory path missed.

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod heartbeat;
mod manager;
mod queue;

pub use config::{HeartbeatConfig, SyncConfig};
pub use error::SyncError;
pub use heartbeat::HeartbeatManager;
pub use manager::{BulkOutcome, StatusSyncManager, UpdateDisposition};
pub use queue::{StatusUpdate, UpdateQueue};
