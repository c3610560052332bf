//! The sequence-ordered status update queue.
//!
//! One slot per (player, room): a newly arriving update replaces the
//! queued one only if its sequence number is higher, and nothing with a
//! sequence at or below the last APPLIED number for the key is ever
//! accepted again. Together these give the engine's ordering invariant:
//! for any key, only the update with the highest sequence number observed
//! is ever the one applied.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use vestibule_protocol::{MemberLocation, PlayerId, PlayerStatus, RoomCode};

type Key = (PlayerId, RoomCode);

/// One pending (or in-flight) status update.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub player_id: PlayerId,
    pub room_code: RoomCode,
    pub status: PlayerStatus,
    pub location: MemberLocation,
    pub metadata: Option<Value>,
    /// Globally increasing stamp assigned at submission.
    pub seq: u64,
    pub retry_count: u32,
    pub queued_at: Instant,
    /// Why this update exists, when it wasn't a plain report (e.g.
    /// "rollback", "heartbeat_timeout").
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub(crate) fn key(&self) -> Key {
        (self.player_id.clone(), self.room_code.clone())
    }
}

/// Per-key slots plus the last-applied watermark per key.
#[derive(Default)]
pub struct UpdateQueue {
    slots: HashMap<Key, StatusUpdate>,
    last_applied: HashMap<Key, u64>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers an update to its slot. Returns `false` — and drops the
    /// update — when it is superseded: a higher-or-equal sequence was
    /// already applied for the key, or a higher-sequence update already
    /// occupies the slot.
    pub fn offer(&mut self, update: StatusUpdate) -> bool {
        let key = update.key();
        if self.is_superseded(&key, update.seq) {
            tracing::debug!(
                player = %update.player_id,
                room = %update.room_code,
                seq = update.seq,
                "update superseded by applied state, dropped"
            );
            return false;
        }
        if let Some(queued) = self.slots.get(&key) {
            if queued.seq >= update.seq {
                tracing::debug!(
                    player = %update.player_id,
                    room = %update.room_code,
                    seq = update.seq,
                    queued_seq = queued.seq,
                    "newer update already queued, dropped"
                );
                return false;
            }
        }
        self.slots.insert(key, update);
        true
    }

    /// Whether `seq` is at or below the last applied sequence for `key`.
    pub fn is_superseded(&self, key: &Key, seq: u64) -> bool {
        self.last_applied
            .get(key)
            .is_some_and(|applied| *applied >= seq)
    }

    /// Records a successful apply and purges any slot the apply
    /// superseded.
    pub fn mark_applied(&mut self, key: &Key, seq: u64) {
        let watermark = self.last_applied.entry(key.clone()).or_insert(0);
        if seq > *watermark {
            *watermark = seq;
        }
        if self
            .slots
            .get(key)
            .is_some_and(|queued| queued.seq <= seq)
        {
            self.slots.remove(key);
        }
    }

    /// Takes every queued update, leaving the slots empty.
    pub fn drain(&mut self) -> Vec<StatusUpdate> {
        self.slots.drain().map(|(_, update)| update).collect()
    }

    /// Forgets all bookkeeping for a key (member left the room).
    pub fn forget(&mut self, key: &Key) {
        self.slots.remove(key);
        self.last_applied.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
