//! In-memory room snapshot cache.
//!
//! Broadcasts and validation reads want the room-plus-members view without
//! a store round trip per event. The cache holds the last assembled view
//! per room code; every write path refreshes it, and maintenance evicts
//! entries nobody touched for the TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use vestibule_protocol::{PlayerSummary, RoomCode, RoomSummary};

/// The assembled view of one room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room: RoomSummary,
    pub players: Vec<PlayerSummary>,
    pub refreshed_at: Instant,
}

impl RoomSnapshot {
    pub fn new(room: RoomSummary, players: Vec<PlayerSummary>) -> Self {
        Self {
            room,
            players,
            refreshed_at: Instant::now(),
        }
    }
}

pub(crate) struct SnapshotCache {
    entries: HashMap<RoomCode, RoomSnapshot>,
    ttl: Duration,
}

impl SnapshotCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub(crate) fn put(&mut self, snapshot: RoomSnapshot) {
        self.entries
            .insert(snapshot.room.code.clone(), snapshot);
    }

    pub(crate) fn get(&self, code: &RoomCode) -> Option<RoomSnapshot> {
        self.entries.get(code).cloned()
    }

    pub(crate) fn remove(&mut self, code: &RoomCode) {
        self.entries.remove(code);
    }

    /// Evicts entries untouched for the TTL. Returns how many were dropped.
    pub(crate) fn evict_stale(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, snap| snap.refreshed_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use vestibule_protocol::{PlayerId, RoomId, RoomStatus};

    use super::*;

    fn snapshot(code: &str) -> RoomSnapshot {
        RoomSnapshot::new(
            RoomSummary {
                id: RoomId(1),
                code: RoomCode::new(code),
                status: RoomStatus::Lobby,
                host_id: PlayerId::new("u1"),
                activity_type: None,
                max_participants: 8,
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_put_get_remove_round_trip() {
        let mut cache = SnapshotCache::new(Duration::from_secs(3600));
        cache.put(snapshot("AB2CD3"));

        assert!(cache.get(&RoomCode::new("AB2CD3")).is_some());
        cache.remove(&RoomCode::new("AB2CD3"));
        assert!(cache.get(&RoomCode::new("AB2CD3")).is_none());
    }

    #[test]
    fn test_evict_stale_drops_only_expired_entries() {
        // Zero TTL: everything inserted is immediately stale.
        let mut cache = SnapshotCache::new(Duration::ZERO);
        cache.put(snapshot("AAAAAA"));
        cache.put(snapshot("BBBBBB"));

        assert_eq!(cache.evict_stale(), 2);
        assert_eq!(cache.len(), 0);

        // Hour-long TTL: nothing is stale.
        let mut cache = SnapshotCache::new(Duration::from_secs(3600));
        cache.put(snapshot("AAAAAA"));
        assert_eq!(cache.evict_stale(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_replaces_entry_for_same_code() {
        let mut cache = SnapshotCache::new(Duration::from_secs(3600));
        cache.put(snapshot("AB2CD3"));
        let mut newer = snapshot("AB2CD3");
        newer.room.status = RoomStatus::InGame;
        cache.put(newer);

        assert_eq!(cache.len(), 1);
        let got = cache.get(&RoomCode::new("AB2CD3")).unwrap();
        assert_eq!(got.room.status, RoomStatus::InGame);
    }
}
