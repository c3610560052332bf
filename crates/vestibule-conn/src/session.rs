//! Session types: the recovery credential behind reconnection.
//!
//! A session lets a player resume their membership after a transport drop
//! without rejoining: the server hands the client an opaque token at join
//! time, and a fresh connection presenting that token is rebound to the
//! existing member.

use std::fmt;
use std::time::Instant;

use rand::Rng;
use vestibule_protocol::{PlayerId, RoomCode, RoomId, TransportId};

// ---------------------------------------------------------------------------
// SessionToken
// ---------------------------------------------------------------------------

/// An opaque random credential (32 hex chars, 128 bits of entropy).
///
/// Only the server and the specific client know it; guessing a valid token
/// is computationally infeasible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 16] = rng.random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Wraps a token string received from a client.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    /// Tokens are secrets — Display shows only a prefix so they can be
    /// logged without leaking the credential.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", &self.0[..self.0.len().min(6)])
    }
}

// ---------------------------------------------------------------------------
// PlayerSession
// ---------------------------------------------------------------------------

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
}

/// One player's recovery session for one room.
///
/// One active session per (user, room); re-creation overwrites the previous
/// one. Two clocks bound its life: an absolute expiry from issuance, and a
/// shorter grace window that starts when the bound connection drops.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub user_id: PlayerId,
    pub room_id: RoomId,
    pub room_code: RoomCode,
    pub token: SessionToken,
    pub transport_id: TransportId,
    pub status: SessionStatus,
    pub issued_at: Instant,
    pub expires_at: Instant,
    /// Set when the bound connection dropped; cleared on recovery.
    pub disconnected_at: Option<Instant>,
}
