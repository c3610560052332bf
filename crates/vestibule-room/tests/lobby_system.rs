//! Integration tests for the lobby write path against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::sync::Mutex;
use vestibule_conn::{Broadcaster, ConnConfig, ConnectionManager};
use vestibule_protocol::{
    LobbyEvent, MemberLocation, MemberRole, PlayerId, PlayerStatus,
    RoomCode, RoomStatus, TransportId,
};
use vestibule_room::{
    GraceKind, LifecycleConfig, LobbyConfig, LobbyError, LobbyManager,
    RoomLifecycleManager, is_valid_code,
};
use vestibule_store::{MemoryStore, RoomStore};

// =========================================================================
// Harness
// =========================================================================

struct Harness {
    store: Arc<MemoryStore>,
    lobby: LobbyManager<MemoryStore>,
    bus: Broadcaster,
}

fn harness() -> Harness {
    harness_with(LobbyConfig::default(), LifecycleConfig::default())
}

fn harness_with(
    lobby_config: LobbyConfig,
    lifecycle_config: LifecycleConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Broadcaster::new();
    let connections = Arc::new(Mutex::new(ConnectionManager::new(
        ConnConfig::default(),
    )));
    let lifecycle = Arc::new(RoomLifecycleManager::new(
        Arc::clone(&store),
        bus.clone(),
        lifecycle_config,
    ));
    let lobby = LobbyManager::new(
        Arc::clone(&store),
        connections,
        bus.clone(),
        lifecycle,
        lobby_config,
    );
    Harness { store, lobby, bus }
}

fn pid(id: &str) -> PlayerId {
    PlayerId::new(id)
}

fn tid(id: &str) -> TransportId {
    TransportId::new(id)
}

impl Harness {
    /// Creates a room hosted by `host` and returns its code.
    async fn room(&self, host: &str) -> RoomCode {
        let outcome = self
            .lobby
            .create_room(
                &pid(host),
                host,
                &tid(&format!("t-{host}")),
                Some("quiz".into()),
                Map::new(),
                None,
                None,
            )
            .await
            .expect("create_room");
        outcome.room.code
    }

    async fn join(&self, user: &str, code: &RoomCode) {
        self.lobby
            .join_room(
                &pid(user),
                user,
                code,
                &tid(&format!("t-{user}")),
                None,
                None,
            )
            .await
            .expect("join_room");
    }
}

// =========================================================================
// Room creation
// =========================================================================

#[tokio::test]
async fn test_create_room_code_shape_and_host_member() {
    let h = harness();
    let code = h.room("host").await;

    assert!(is_valid_code(code.as_str()), "bad code: {code}");

    let room = h.store.room_by_code(&code).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Lobby);
    assert_eq!(room.host_id, pid("host"));

    let members = h.store.members(room.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, MemberRole::Host);
    assert_eq!(members[0].location, MemberLocation::Lobby);
    assert!(members[0].is_connected);
}

#[tokio::test]
async fn test_create_room_issues_session() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    let conn = h.lobby.connections().lock().await;
    let session = conn.session(&pid("host"), room.id).expect("session");
    assert_eq!(session.room_code, code);
}

// =========================================================================
// Join / rejoin
// =========================================================================

#[tokio::test]
async fn test_join_room_adds_member_and_broadcasts() {
    let h = harness();
    let code = h.room("host").await;

    // The host's subscription sees the join broadcast.
    let mut host_events = h.bus.subscribe(&code, &tid("t-host"));
    h.join("ada", &code).await;

    let room = h.store.room_by_code(&code).await.unwrap().unwrap();
    let members = h.store.members(room.id).await.unwrap();
    assert_eq!(members.len(), 2);

    let event = host_events.try_recv().expect("playerJoined broadcast");
    match event {
        LobbyEvent::PlayerJoined { player, players, .. } => {
            assert_eq!(player.user_id, pid("ada"));
            assert_eq!(players.len(), 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_join_unknown_code_is_room_not_found() {
    let h = harness();
    let result = h
        .lobby
        .join_room(
            &pid("ada"),
            "ada",
            &RoomCode::new("NOSUCH"),
            &tid("t-ada"),
            None,
            None,
        )
        .await;
    assert!(matches!(result, Err(LobbyError::RoomNotFound(_))));
}

#[tokio::test]
async fn test_join_abandoned_room_is_not_available() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();
    h.store
        .set_room_status_if(room.id, RoomStatus::Lobby, RoomStatus::Abandoned)
        .await
        .unwrap();

    let result = h
        .lobby
        .join_room(&pid("ada"), "ada", &code, &tid("t-ada"), None, None)
        .await;
    assert!(matches!(
        result,
        Err(LobbyError::RoomNotAvailable {
            status: RoomStatus::Abandoned,
            ..
        })
    ));
}

#[tokio::test]
async fn test_join_full_room_rejected() {
    let h = harness();
    let outcome = h
        .lobby
        .create_room(
            &pid("host"),
            "host",
            &tid("t-host"),
            None,
            Map::new(),
            Some(2),
            None,
        )
        .await
        .unwrap();
    let code = outcome.room.code;
    h.join("ada", &code).await;

    let result = h
        .lobby
        .join_room(&pid("bob"), "bob", &code, &tid("t-bob"), None, None)
        .await;
    assert!(matches!(
        result,
        Err(LobbyError::RoomFull { max: 2, .. })
    ));
}

#[tokio::test]
async fn test_rejoin_flips_member_instead_of_duplicating() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    // Ada drops, then joins again from a new tab.
    h.lobby
        .handle_transport_disconnect(&tid("t-ada"))
        .await
        .unwrap();
    let before = h.store.member(room.id, &pid("ada")).await.unwrap().unwrap();
    assert!(!before.is_connected);

    let outcome = h
        .lobby
        .join_room(
            &pid("ada"),
            "ada",
            &code,
            &tid("t-ada-2"),
            None,
            Some("Lady A".into()),
        )
        .await
        .unwrap();

    assert!(outcome.rejoined);
    let members = h.store.members(room.id).await.unwrap();
    assert_eq!(members.len(), 2, "no duplicate member row");
    let ada = members.iter().find(|m| m.user_id == pid("ada")).unwrap();
    assert!(ada.is_connected);
    assert_eq!(ada.location, MemberLocation::Lobby);
    assert_eq!(ada.display_name.as_deref(), Some("Lady A"));
}

#[tokio::test]
async fn test_join_lock_contention_fails_fast() {
    let h = harness();
    let code = h.room("host").await;

    // Simulate a join in progress on another transport by holding the
    // lock directly.
    {
        let mut conn = h.lobby.connections().lock().await;
        assert!(conn.acquire_join_lock("ada", &code, &tid("t-other")));
    }

    let result = h
        .lobby
        .join_room(&pid("ada"), "ada", &code, &tid("t-ada"), None, None)
        .await;
    assert!(matches!(
        result,
        Err(LobbyError::JoinLockContended { .. })
    ));
}

#[tokio::test]
async fn test_join_releases_lock_on_failure() {
    let h = harness();
    // Joining a nonexistent room fails AFTER the lock was taken; the lock
    // must be released so a retry can proceed.
    let code = RoomCode::new("NOSUCH");
    let result = h
        .lobby
        .join_room(&pid("ada"), "ada", &code, &tid("t-ada"), None, None)
        .await;
    assert!(result.is_err());

    let mut conn = h.lobby.connections().lock().await;
    assert!(
        conn.acquire_join_lock("ada", &code, &tid("t-ada-2")),
        "lock must be free after the failed join"
    );
}

#[tokio::test]
async fn test_join_rate_limited_after_budget() {
    let h = harness_with(
        LobbyConfig {
            join_attempts_per_window: 2,
            ..LobbyConfig::default()
        },
        LifecycleConfig::default(),
    );
    let code = RoomCode::new("NOSUCH");
    for _ in 0..2 {
        let _ = h
            .lobby
            .join_room(&pid("ada"), "ada", &code, &tid("t-ada"), None, None)
            .await;
    }

    let result = h
        .lobby
        .join_room(&pid("ada"), "ada", &code, &tid("t-ada"), None, None)
        .await;
    assert!(matches!(result, Err(LobbyError::RateLimited { .. })));
}

// =========================================================================
// Status updates
// =========================================================================

#[tokio::test]
async fn test_update_player_status_moves_member_into_game() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;

    let outcome = h
        .lobby
        .update_player_status(
            &pid("ada"),
            &code,
            PlayerStatus::InGame,
            MemberLocation::Game,
            None,
        )
        .await
        .unwrap();

    assert!(outcome.conflicts.is_empty());
    assert!(outcome.member.in_game);
    assert_eq!(outcome.member.location, MemberLocation::Game);
    assert!(
        outcome.member.transport_id.is_none(),
        "no live transport binding while inside the activity"
    );
}

#[tokio::test]
async fn test_update_player_status_resolves_conflict_and_reports_it() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    // Persisted state says ada is disconnected.
    let mut ada =
        h.store.member(room.id, &pid("ada")).await.unwrap().unwrap();
    ada.set_presence(vestibule_protocol::Presence::disconnected());
    h.store.update_member(&ada).await.unwrap();

    // A delayed activity callback claims she's in the game.
    let outcome = h
        .lobby
        .update_player_status(
            &pid("ada"),
            &code,
            PlayerStatus::InGame,
            MemberLocation::Game,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.conflicts.len(), 1);
    assert!(!outcome.member.in_game);
    assert_eq!(outcome.member.location, MemberLocation::Disconnected);
}

#[tokio::test]
async fn test_update_unknown_player_is_player_not_found() {
    let h = harness();
    let code = h.room("host").await;
    let result = h
        .lobby
        .update_player_status(
            &pid("ghost"),
            &code,
            PlayerStatus::Connected,
            MemberLocation::Lobby,
            None,
        )
        .await;
    assert!(matches!(result, Err(LobbyError::PlayerNotFound { .. })));
}

// =========================================================================
// Group return
// =========================================================================

#[tokio::test]
async fn test_group_return_flips_room_back_to_lobby() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    // Everyone is in the game; room marked in_game.
    for user in ["host", "ada"] {
        h.lobby
            .update_player_status(
                &pid(user),
                &code,
                PlayerStatus::InGame,
                MemberLocation::Game,
                None,
            )
            .await
            .unwrap();
    }
    h.store
        .set_room_status_if(room.id, RoomStatus::Lobby, RoomStatus::InGame)
        .await
        .unwrap();

    let returned =
        h.lobby.initiate_group_return(&pid("host"), &code).await.unwrap();
    assert_eq!(returned, 2);

    let row = h.store.room_by_id(room.id).await.unwrap().unwrap();
    assert_eq!(row.status, RoomStatus::Lobby, "return completed");
    assert!(row.metadata.contains_key("return_in_progress_until"));

    let members = h.store.members(room.id).await.unwrap();
    assert!(members
        .iter()
        .all(|m| m.location == MemberLocation::Lobby));
}

#[tokio::test]
async fn test_group_return_requires_host() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;

    let result = h.lobby.initiate_group_return(&pid("ada"), &code).await;
    assert!(matches!(result, Err(LobbyError::NotHost(_))));
}

// =========================================================================
// Session recovery
// =========================================================================

#[tokio::test]
async fn test_session_recovery_round_trip() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();
    let outcome = h
        .lobby
        .join_room(&pid("ada"), "ada", &code, &tid("t-1"), None, None)
        .await
        .unwrap();
    let token = outcome.session.token.clone();

    // Transport drops; member flips disconnected.
    h.lobby.handle_transport_disconnect(&tid("t-1")).await.unwrap();

    let recovery = h
        .lobby
        .recover_session(&token, &tid("t-2"))
        .await
        .expect("recovery");

    assert_eq!(recovery.session.transport_id, tid("t-2"));
    assert!(recovery.member.is_connected);
    assert_eq!(
        recovery.member.transport_id,
        Some(tid("t-2")),
        "member rebound to the new transport"
    );
    let row = h.store.member(room.id, &pid("ada")).await.unwrap().unwrap();
    assert!(row.is_connected);
}

#[tokio::test]
async fn test_session_recovery_expired_token_fails() {
    let store = Arc::new(MemoryStore::new());
    let bus = Broadcaster::new();
    let connections = Arc::new(Mutex::new(ConnectionManager::new(
        ConnConfig {
            session_ttl: Duration::ZERO,
            ..ConnConfig::default()
        },
    )));
    let lifecycle = Arc::new(RoomLifecycleManager::new(
        Arc::clone(&store),
        bus.clone(),
        LifecycleConfig::default(),
    ));
    let lobby = LobbyManager::new(
        Arc::clone(&store),
        connections,
        bus,
        lifecycle,
        LobbyConfig::default(),
    );

    let outcome = lobby
        .create_room(
            &pid("host"),
            "host",
            &tid("t-1"),
            None,
            Map::new(),
            None,
            None,
        )
        .await
        .unwrap();

    let result = lobby
        .recover_session(&outcome.session.token, &tid("t-2"))
        .await;
    assert!(matches!(
        result,
        Err(LobbyError::Session(
            vestibule_conn::SessionError::Expired(_)
        ))
    ));
}

// =========================================================================
// Leave and disconnect
// =========================================================================

#[tokio::test]
async fn test_leave_room_deletes_member_and_transfers_host() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    let mut ada_events = h.bus.subscribe(&code, &tid("t-ada"));
    h.lobby.leave_room(&pid("host"), &code).await.unwrap();

    let members = h.store.members(room.id).await.unwrap();
    assert_eq!(members.len(), 1, "host row deleted");
    assert_eq!(members[0].user_id, pid("ada"));
    assert_eq!(members[0].role, MemberRole::Host, "host transferred");

    // Ada saw the transfer before the departure notice.
    let first = ada_events.try_recv().expect("hostTransferred");
    assert!(matches!(
        first,
        LobbyEvent::HostTransferred { ref reason, .. }
            if reason == "host_left"
    ));
    let second = ada_events.try_recv().expect("playerDisconnected");
    assert!(matches!(
        second,
        LobbyEvent::PlayerDisconnected { was_host: true, .. }
    ));
}

#[tokio::test]
async fn test_last_leave_deletes_room_and_frees_code() {
    let h = harness();
    let code = h.room("host").await;

    h.lobby.leave_room(&pid("host"), &code).await.unwrap();

    assert!(h.store.room_by_code(&code).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_starts_grace_timers_for_host() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    h.lobby
        .handle_transport_disconnect(&tid("t-host"))
        .await
        .unwrap();

    assert!(h
        .lobby
        .lifecycle()
        .has_timer(room.id, GraceKind::HostTransfer));

    // After the grace period, ada is host.
    tokio::time::sleep(Duration::from_secs(31)).await;
    let ada = h.store.member(room.id, &pid("ada")).await.unwrap().unwrap();
    assert_eq!(ada.role, MemberRole::Host);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_prevents_abandonment() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    h.lobby
        .handle_transport_disconnect(&tid("t-host"))
        .await
        .unwrap();
    assert!(h
        .lobby
        .lifecycle()
        .has_timer(room.id, GraceKind::Abandonment));

    // Reconnect (rejoin) inside the 10 s window.
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.lobby
        .join_room(&pid("host"), "host", &code, &tid("t-host-2"), None, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    let row = h.store.room_by_id(room.id).await.unwrap().unwrap();
    assert_eq!(row.status, RoomStatus::Lobby, "never abandoned");
}

#[tokio::test(start_paused = true)]
async fn test_unattended_room_is_abandoned() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    h.lobby
        .handle_transport_disconnect(&tid("t-host"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    let row = h.store.room_by_id(room.id).await.unwrap().unwrap();
    assert_eq!(row.status, RoomStatus::Abandoned);
}

// =========================================================================
// Reads
// =========================================================================

#[tokio::test]
async fn test_validate_room_rejects_abandoned() {
    let h = harness();
    let code = h.room("host").await;
    let room = h.store.room_by_code(&code).await.unwrap().unwrap();

    assert!(h.lobby.validate_room(&code).await.is_ok());

    h.store
        .set_room_status_if(room.id, RoomStatus::Lobby, RoomStatus::Abandoned)
        .await
        .unwrap();
    let result = h.lobby.validate_room(&code).await;
    assert!(matches!(
        result,
        Err(LobbyError::RoomNotAvailable { .. })
    ));
}

#[tokio::test]
async fn test_resync_broadcasts_full_room_state() {
    let h = harness();
    let code = h.room("host").await;
    h.join("ada", &code).await;

    let mut events = h.bus.subscribe(&code, &tid("t-watch"));
    h.lobby.resync_room(&code).await.unwrap();

    let event = events.try_recv().expect("roomStatusSync");
    match event {
        LobbyEvent::RoomStatusSync { players, .. } => {
            assert_eq!(players.len(), 2);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
