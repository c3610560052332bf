//! Connection tracking for Vestibule.
//!
//! This crate owns the ephemeral, in-process side of presence:
//!
//! 1. **Connection registry** — which transport connections exist and which
//!    (user, room) each is bound to ([`ConnectionManager`])
//! 2. **Join locks** — advisory TTL-based mutual exclusion that serializes
//!    the join sequence per (username, room code)
//! 3. **Rate windows** — rolling 60 s attempt counters per (transport, action)
//! 4. **Sessions** — opaque recovery tokens that re-associate a fresh
//!    connection with an existing member after a transport drop
//! 5. **Broadcast bus** — publish-to-a-room-topic fan-out ([`Broadcaster`]),
//!    independent of the underlying transport
//!
//! Nothing here touches the persistent store; everything in this crate dies
//! with the process (sessions included — recovery is a within-process
//! convenience, not durable state).

mod bus;
mod connection;
mod error;
mod manager;
mod session;

pub use bus::Broadcaster;
pub use connection::{ConnConfig, ConnectionKind, ConnectionRecord};
pub use error::SessionError;
pub use manager::ConnectionManager;
pub use session::{PlayerSession, SessionStatus, SessionToken};
