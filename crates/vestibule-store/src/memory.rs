//! In-memory [`RoomStore`] backend.
//!
//! Backs every test in the workspace and is a legitimate backend for
//! single-process deployments where room state is allowed to die with the
//! process. All state lives in one mutex-guarded struct; no method holds
//! the guard across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde_json::Value;
use tokio::sync::Mutex;
use vestibule_protocol::{MemberRole, PlayerId, RoomCode, RoomId, RoomStatus};

use crate::{EventRecord, MemberRow, RoomDraft, RoomRow, RoomStore, StoreError};

#[derive(Default)]
struct Inner {
    rooms: HashMap<RoomId, RoomRow>,
    /// Code → id index. Kept in sync with `rooms`; a code is freed the
    /// moment its room is deleted.
    codes: HashMap<RoomCode, RoomId>,
    /// Members per room, in insertion order.
    members: HashMap<RoomId, Vec<MemberRow>>,
    events: Vec<EventRecord>,
}

/// HashMap-backed store. Cheap to construct per test.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_room_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_room_id: AtomicU64::new(1),
        }
    }

    /// Snapshot of the audit trail. Test helper — the trait contract is
    /// write-only.
    pub async fn events(&self) -> Vec<EventRecord> {
        self.inner.lock().await.events.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for MemoryStore {
    async fn insert_room(
        &self,
        draft: RoomDraft,
    ) -> Result<RoomRow, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.codes.contains_key(&draft.code) {
            return Err(StoreError::DuplicateCode(draft.code));
        }
        let id = RoomId(self.next_room_id.fetch_add(1, Ordering::Relaxed));
        let row = draft.into_row(id);
        inner.codes.insert(row.code.clone(), id);
        inner.rooms.insert(id, row.clone());
        inner.members.insert(id, Vec::new());
        tracing::debug!(room = %id, code = %row.code, "room row inserted");
        Ok(row)
    }

    async fn room_by_id(
        &self,
        id: RoomId,
    ) -> Result<Option<RoomRow>, StoreError> {
        Ok(self.inner.lock().await.rooms.get(&id).cloned())
    }

    async fn room_by_code(
        &self,
        code: &RoomCode,
    ) -> Result<Option<RoomRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.rooms.get(id))
            .cloned())
    }

    async fn update_room(&self, room: &RoomRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.rooms.get_mut(&room.id) {
            Some(existing) => {
                *existing = room.clone();
                Ok(())
            }
            None => Err(StoreError::RoomMissing(room.id)),
        }
    }

    async fn set_room_status_if(
        &self,
        id: RoomId,
        expected: RoomStatus,
        new: RoomStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let room = inner
            .rooms
            .get_mut(&id)
            .ok_or(StoreError::RoomMissing(id))?;
        if room.status != expected {
            return Ok(false);
        }
        room.status = new;
        room.last_activity = SystemTime::now();
        Ok(true)
    }

    async fn touch_room(&self, id: RoomId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let room = inner
            .rooms
            .get_mut(&id)
            .ok_or(StoreError::RoomMissing(id))?;
        room.last_activity = SystemTime::now();
        Ok(())
    }

    async fn delete_room(&self, id: RoomId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let room = inner
            .rooms
            .remove(&id)
            .ok_or(StoreError::RoomMissing(id))?;
        inner.codes.remove(&room.code);
        inner.members.remove(&id);
        tracing::debug!(room = %id, code = %room.code, "room row deleted");
        Ok(())
    }

    async fn insert_member(
        &self,
        member: MemberRow,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(&member.room_id) {
            return Err(StoreError::RoomMissing(member.room_id));
        }
        let rows = inner.members.entry(member.room_id).or_default();
        if rows.iter().any(|m| m.user_id == member.user_id) {
            return Err(StoreError::DuplicateMember {
                room: member.room_id,
                user: member.user_id,
            });
        }
        rows.push(member);
        Ok(())
    }

    async fn member(
        &self,
        room: RoomId,
        user: &PlayerId,
    ) -> Result<Option<MemberRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .members
            .get(&room)
            .and_then(|rows| rows.iter().find(|m| &m.user_id == user))
            .cloned())
    }

    async fn members(
        &self,
        room: RoomId,
    ) -> Result<Vec<MemberRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows = inner.members.get(&room).cloned().unwrap_or_default();
        rows.sort_by_key(|m| m.joined_at);
        Ok(rows)
    }

    async fn update_member(
        &self,
        member: &MemberRow,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let rows = inner.members.get_mut(&member.room_id).ok_or(
            StoreError::RoomMissing(member.room_id),
        )?;
        match rows.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => {
                *existing = member.clone();
                Ok(())
            }
            None => Err(StoreError::MemberMissing {
                room: member.room_id,
                user: member.user_id.clone(),
            }),
        }
    }

    async fn delete_member(
        &self,
        room: RoomId,
        user: &PlayerId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let rows = inner
            .members
            .get_mut(&room)
            .ok_or(StoreError::RoomMissing(room))?;
        let before = rows.len();
        rows.retain(|m| &m.user_id != user);
        if rows.len() == before {
            return Err(StoreError::MemberMissing {
                room,
                user: user.clone(),
            });
        }
        Ok(())
    }

    async fn auto_transfer_host(
        &self,
        room: RoomId,
        leaving: &PlayerId,
    ) -> Result<Option<MemberRow>, StoreError> {
        let mut inner = self.inner.lock().await;
        let rows = inner
            .members
            .get_mut(&room)
            .ok_or(StoreError::RoomMissing(room))?;

        // Demote first, then promote — a reader can observe zero hosts
        // mid-operation, but never two.
        for m in rows.iter_mut() {
            if m.role == MemberRole::Host {
                m.role = MemberRole::Player;
            }
        }

        let mut candidate: Option<usize> = None;
        for (idx, m) in rows.iter().enumerate() {
            if &m.user_id == leaving || !m.is_connected {
                continue;
            }
            match candidate {
                Some(best) if rows[best].joined_at <= m.joined_at => {}
                _ => candidate = Some(idx),
            }
        }

        let promoted = match candidate {
            Some(idx) => {
                rows[idx].role = MemberRole::Host;
                Some(rows[idx].clone())
            }
            None => None,
        };

        if let Some(new_host) = &promoted {
            if let Some(r) = inner.rooms.get_mut(&room) {
                r.host_id = new_host.user_id.clone();
                r.last_activity = SystemTime::now();
            }
        }

        Ok(promoted)
    }

    async fn members_with_stale_ping(
        &self,
        cutoff: SystemTime,
    ) -> Result<Vec<MemberRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .members
            .values()
            .flatten()
            .filter(|m| m.is_connected && m.last_ping < cutoff)
            .cloned()
            .collect())
    }

    async fn log_event(
        &self,
        room: RoomId,
        user: Option<&PlayerId>,
        kind: &str,
        data: Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.events.push(EventRecord {
            room_id: room,
            user_id: user.cloned(),
            kind: kind.to_string(),
            data,
            recorded_at: SystemTime::now(),
        });
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================
