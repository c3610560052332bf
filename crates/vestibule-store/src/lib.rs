//! Persistent store contract for Vestibule.
//!
//! The engine treats its durable backend as an external collaborator: this
//! crate defines WHAT the backend must do ([`RoomStore`]), not HOW. A real
//! deployment implements the trait over its relational store; tests and
//! single-process deployments use the bundled [`MemoryStore`].
//!
//! # Contract shape
//!
//! - Row-level CRUD on rooms and members — no cross-row transactions are
//!   assumed anywhere in the engine.
//! - One conditional update ([`RoomStore::set_room_status_if`], an
//!   equality-filtered write) for the places that need compare-and-set.
//! - An atomic-ish [`RoomStore::auto_transfer_host`] that demotes the
//!   departing host and promotes the oldest-joined connected member in one
//!   call.
//! - A fire-and-forget [`RoomStore::log_event`] audit append whose failures
//!   callers swallow.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
mod rows;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use rows::{EventRecord, MemberRow, RoomDraft, RoomRow};
pub use store::RoomStore;
