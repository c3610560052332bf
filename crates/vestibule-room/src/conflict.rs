//! Status conflict detection, resolution, and report reconciliation.
//!
//! Several independent sources report where a player is — the client over
//! the live transport, the activity server over HTTP, liveness sweeps —
//! and their reports can disagree with each other and with the stored
//! member row. The rules here are deliberately narrow: two known-bad
//! shapes are detected and forced sane ([`detect`] / [`resolve`]), and the
//! explicit two-report reconciliation path escalates through three fixed
//! strategies ([`reconcile`]). Anything else is applied as requested.

use std::time::SystemTime;

use vestibule_protocol::{
    ConflictKind, MemberLocation, Presence, ResolutionStrategy,
    StatusConflict,
};
use vestibule_store::MemberRow;

/// A timestamped presence report from one observer.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport {
    pub presence: Presence,
    pub reported_at: SystemTime,
}

/// Checks a requested presence against the authoritative member row.
///
/// Rule (a): claiming game activity while the stored row says the member
/// is disconnected. A delayed activity callback typically causes this.
///
/// Rule (b): claiming the lobby with the in-game flag still set while the
/// stored row locates the member in the activity — a half-updated report.
pub fn detect(
    member: &MemberRow,
    requested: Presence,
) -> Vec<StatusConflict> {
    let mut conflicts = Vec::new();

    if requested.in_game
        && member.location == MemberLocation::Disconnected
    {
        conflicts.push(StatusConflict {
            kind: ConflictKind::GameWhileDisconnected,
            detail: format!(
                "update claims game activity but {} is disconnected",
                member.user_id
            ),
        });
    }

    if requested.location == MemberLocation::Lobby
        && requested.in_game
        && member.location == MemberLocation::Game
    {
        conflicts.push(StatusConflict {
            kind: ConflictKind::LobbyGameMismatch,
            detail: format!(
                "update places {} in the lobby with in_game still set",
                member.user_id
            ),
        });
    }

    conflicts
}

/// Applies the fixed per-rule corrections to a requested presence.
///
/// Rule (a) forces the full disconnected triple; rule (b) forces the
/// in-game flag to follow the requested location. With no conflicts the
/// request passes through untouched.
pub fn resolve(
    requested: Presence,
    conflicts: &[StatusConflict],
) -> Presence {
    let mut result = requested;
    for conflict in conflicts {
        match conflict.kind {
            ConflictKind::GameWhileDisconnected => {
                result = Presence::disconnected();
            }
            ConflictKind::LobbyGameMismatch => {
                result.in_game =
                    result.location == MemberLocation::Game;
            }
        }
    }
    result
}

/// Reconciles a server-observed and a client-observed report against the
/// stored row, escalating through three strategies in order:
///
/// 1. Both reports disagree with the store → trust the store.
/// 2. Merge the client's connectivity bit with the server's activity bit
///    (each observer is authoritative for its own half) — accepted only
///    when the merge is coherent.
/// 3. Otherwise the report with the newer timestamp wins.
pub fn reconcile(
    member: &MemberRow,
    server: StatusReport,
    client: StatusReport,
) -> (Presence, ResolutionStrategy) {
    let stored = member.presence();

    if server.presence != stored && client.presence != stored {
        return (stored, ResolutionStrategy::TrustStore);
    }

    let is_connected = client.presence.is_connected;
    let in_game = server.presence.in_game;
    let merged = Presence {
        is_connected,
        in_game,
        location: if in_game {
            MemberLocation::Game
        } else if is_connected {
            MemberLocation::Lobby
        } else {
            MemberLocation::Disconnected
        },
    };
    if merged.is_coherent() {
        return (merged, ResolutionStrategy::SplitTrust);
    }

    let newest = if client.reported_at >= server.reported_at {
        client.presence
    } else {
        server.presence
    };
    (newest, ResolutionStrategy::NewestReport)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vestibule_protocol::{
        MemberRole, PlayerId, PlayerStatus, RoomId, TransportId,
    };

    use super::*;

    fn member_at(location: MemberLocation) -> MemberRow {
        let mut m = MemberRow::new_joined(
            RoomId(1),
            PlayerId::new("u1"),
            "u1",
            MemberRole::Player,
            TransportId::new("t1"),
        );
        m.set_presence(match location {
            MemberLocation::Lobby => Presence::in_lobby(),
            MemberLocation::Game => Presence::in_game(),
            MemberLocation::Disconnected => Presence::disconnected(),
        });
        m
    }

    fn report(presence: Presence, age: Duration) -> StatusReport {
        StatusReport {
            presence,
            reported_at: SystemTime::now() - age,
        }
    }

    // =====================================================================
    // detect / resolve
    // =====================================================================

    #[test]
    fn test_detect_clean_update_has_no_conflicts() {
        let member = member_at(MemberLocation::Lobby);
        let requested = Presence::in_game();
        assert!(detect(&member, requested).is_empty());
    }

    #[test]
    fn test_detect_game_while_disconnected() {
        let member = member_at(MemberLocation::Disconnected);
        let requested = Presence::in_game();

        let conflicts = detect(&member, requested);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].kind,
            ConflictKind::GameWhileDisconnected
        );
    }

    #[test]
    fn test_resolve_game_while_disconnected_forces_disconnect() {
        let member = member_at(MemberLocation::Disconnected);
        let requested = Presence::in_game();
        let conflicts = detect(&member, requested);

        let resolved = resolve(requested, &conflicts);

        assert_eq!(resolved, Presence::disconnected());
    }

    #[test]
    fn test_detect_lobby_game_mismatch() {
        // The (InGame, Lobby) report shape: lobby location with the
        // in-game flag still set, while the store says they're in-game.
        let member = member_at(MemberLocation::Game);
        let requested = Presence::derive(
            PlayerStatus::InGame,
            MemberLocation::Lobby,
        );

        let conflicts = detect(&member, requested);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::LobbyGameMismatch);
    }

    #[test]
    fn test_resolve_lobby_game_mismatch_clears_in_game() {
        let member = member_at(MemberLocation::Game);
        let requested = Presence::derive(
            PlayerStatus::InGame,
            MemberLocation::Lobby,
        );
        let conflicts = detect(&member, requested);

        let resolved = resolve(requested, &conflicts);

        assert!(!resolved.in_game);
        assert_eq!(resolved.location, MemberLocation::Lobby);
        assert!(resolved.is_coherent());
    }

    #[test]
    fn test_resolve_without_conflicts_passes_through() {
        let requested = Presence::in_game();
        assert_eq!(resolve(requested, &[]), requested);
    }

    // =====================================================================
    // reconcile
    // =====================================================================

    #[test]
    fn test_reconcile_both_disagree_with_store_trusts_store() {
        let member = member_at(MemberLocation::Lobby);
        let server =
            report(Presence::in_game(), Duration::from_secs(1));
        let client =
            report(Presence::disconnected(), Duration::from_secs(2));

        let (resolved, strategy) = reconcile(&member, server, client);

        assert_eq!(resolved, Presence::in_lobby());
        assert_eq!(strategy, ResolutionStrategy::TrustStore);
    }

    #[test]
    fn test_reconcile_split_trust_merges_bits() {
        // Server still thinks the player is in-game (it agrees with the
        // store); the client reports lobby. Client owns connectivity,
        // server owns activity → connected and in-game.
        let member = member_at(MemberLocation::Game);
        let server = report(Presence::in_game(), Duration::from_secs(1));
        let client = report(Presence::in_lobby(), Duration::from_secs(0));

        let (resolved, strategy) = reconcile(&member, server, client);

        assert_eq!(strategy, ResolutionStrategy::SplitTrust);
        assert!(resolved.is_connected);
        assert!(resolved.in_game);
        assert_eq!(resolved.location, MemberLocation::Game);
    }

    #[test]
    fn test_reconcile_incoherent_merge_falls_to_newest() {
        // Client says disconnected, server (agreeing with the store) says
        // in-game. The bit merge would claim game activity with no
        // connection — incoherent — so the newer report wins.
        let member = member_at(MemberLocation::Game);
        let server = report(Presence::in_game(), Duration::from_secs(5));
        let client =
            report(Presence::disconnected(), Duration::from_secs(0));

        let (resolved, strategy) = reconcile(&member, server, client);

        assert_eq!(strategy, ResolutionStrategy::NewestReport);
        assert_eq!(resolved, Presence::disconnected());
    }

    #[test]
    fn test_reconcile_newest_prefers_server_when_newer() {
        let member = member_at(MemberLocation::Game);
        let server = report(Presence::in_game(), Duration::from_secs(0));
        let client =
            report(Presence::disconnected(), Duration::from_secs(5));

        let (resolved, strategy) = reconcile(&member, server, client);

        assert_eq!(strategy, ResolutionStrategy::NewestReport);
        assert_eq!(resolved, Presence::in_game());
    }
}
