//! # Vestibule
//!
//! Presence and coordination engine for multi-party game lobbies: who is
//! in a room, who hosts it, where every participant currently is, and how
//! the group recovers when sockets drop, activities crash, or tabs
//! duplicate.
//!
//! The engine assumes a bidirectional message channel per connection and
//! a durable row store reachable over async calls; it implements neither.
//! Transports feed [`ClientRequest`]s in, subscribe to room topics, and
//! fan the resulting [`LobbyEvent`]s out.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vestibule::{Engine, EngineConfig};
//! use vestibule_store::MemoryStore;
//!
//! # async fn run() {
//! let mut engine = Engine::new(MemoryStore::new(), EngineConfig::default());
//! engine.start();
//! // feed requests through engine.handle_request(...)
//! engine.shutdown().await;
//! # }
//! ```

mod engine;
mod error;

pub use engine::{Engine, EngineConfig, RequestOutcome};
pub use error::VestibuleError;

pub use vestibule_protocol::{ClientRequest, LobbyEvent};

/// Installs a global tracing subscriber driven by `RUST_LOG`, defaulting
/// to `info`. Call once at process start; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
