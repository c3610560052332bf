//! The room broadcast bus.
//!
//! "Broadcast to a room" is modeled as publish-to-a-topic: every transport
//! currently associated with a room code holds a subscription, and the
//! engine publishes [`LobbyEvent`]s to the code. The bus knows nothing
//! about the underlying transport — subscribers are plain unbounded
//! channels whose receiving halves the transport layer drains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use vestibule_protocol::{LobbyEvent, RoomCode, TransportId};

type Subscribers =
    HashMap<RoomCode, HashMap<TransportId, mpsc::UnboundedSender<LobbyEvent>>>;

/// Cheap-to-clone handle to the room topic table.
///
/// All methods are synchronous; sends are fire-and-forget and a subscriber
/// whose receiver is gone is pruned on the next publish.
#[derive(Clone, Default)]
pub struct Broadcaster {
    inner: Arc<Mutex<Subscribers>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        // The bus is never locked across anything that can panic, so
        // poisoning indicates a bug severe enough to die loudly.
        self.inner.lock().expect("broadcast bus lock poisoned")
    }

    /// Subscribes a transport to a room topic, returning the event stream.
    /// A re-subscription replaces the previous channel.
    pub fn subscribe(
        &self,
        code: &RoomCode,
        transport: &TransportId,
    ) -> mpsc::UnboundedReceiver<LobbyEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.guard()
            .entry(code.clone())
            .or_default()
            .insert(transport.clone(), tx);
        rx
    }

    /// Drops a transport's subscription to one room.
    pub fn unsubscribe(&self, code: &RoomCode, transport: &TransportId) {
        let mut map = self.guard();
        if let Some(subs) = map.get_mut(code) {
            subs.remove(transport);
            if subs.is_empty() {
                map.remove(code);
            }
        }
    }

    /// Drops a transport from every room topic (connection teardown).
    pub fn drop_transport(&self, transport: &TransportId) {
        let mut map = self.guard();
        for subs in map.values_mut() {
            subs.remove(transport);
        }
        map.retain(|_, subs| !subs.is_empty());
    }

    /// Publishes an event to every subscriber of a room topic. Returns the
    /// number of subscribers the event was delivered to; dead subscribers
    /// are pruned along the way.
    pub fn broadcast(&self, code: &RoomCode, event: LobbyEvent) -> usize {
        let mut map = self.guard();
        let Some(subs) = map.get_mut(code) else {
            return 0;
        };
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = subs.len();
        if delivered == 0 {
            map.remove(code);
        }
        tracing::trace!(room = %code, delivered, "event broadcast");
        delivered
    }

    pub fn subscriber_count(&self, code: &RoomCode) -> usize {
        self.guard().get(code).map_or(0, HashMap::len)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use vestibule_protocol::RoomStatus;

    use super::*;

    fn tid(id: &str) -> TransportId {
        TransportId::new(id)
    }

    fn code(c: &str) -> RoomCode {
        RoomCode::new(c)
    }

    fn status_changed(c: &RoomCode) -> LobbyEvent {
        LobbyEvent::RoomStatusChanged {
            room_code: c.clone(),
            new_status: RoomStatus::InGame,
            reason: "test".into(),
        }
    }

    #[test]
    fn test_broadcast_reaches_all_subscribers() {
        let bus = Broadcaster::new();
        let room = code("AB2CD3");
        let mut rx1 = bus.subscribe(&room, &tid("t1"));
        let mut rx2 = bus.subscribe(&room, &tid("t2"));

        let delivered = bus.broadcast(&room, status_changed(&room));

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_scoped_to_room() {
        let bus = Broadcaster::new();
        let room_a = code("AAAAAA");
        let room_b = code("BBBBBB");
        let mut rx_a = bus.subscribe(&room_a, &tid("t1"));
        let mut rx_b = bus.subscribe(&room_b, &tid("t2"));

        bus.broadcast(&room_a, status_changed(&room_a));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err(), "other room must not see it");
    }

    #[test]
    fn test_broadcast_prunes_dead_subscribers() {
        let bus = Broadcaster::new();
        let room = code("AB2CD3");
        let rx = bus.subscribe(&room, &tid("t1"));
        drop(rx);

        let delivered = bus.broadcast(&room, status_changed(&room));

        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count(&room), 0);
    }

    #[test]
    fn test_resubscribe_replaces_channel() {
        let bus = Broadcaster::new();
        let room = code("AB2CD3");
        let mut old_rx = bus.subscribe(&room, &tid("t1"));
        let mut new_rx = bus.subscribe(&room, &tid("t1"));

        bus.broadcast(&room, status_changed(&room));

        assert!(old_rx.try_recv().is_err(), "old channel was replaced");
        assert!(new_rx.try_recv().is_ok());
        assert_eq!(bus.subscriber_count(&room), 1);
    }

    #[test]
    fn test_drop_transport_removes_from_every_room() {
        let bus = Broadcaster::new();
        let _rx1 = bus.subscribe(&code("AAAAAA"), &tid("t1"));
        let _rx2 = bus.subscribe(&code("BBBBBB"), &tid("t1"));

        bus.drop_transport(&tid("t1"));

        assert_eq!(bus.subscriber_count(&code("AAAAAA")), 0);
        assert_eq!(bus.subscriber_count(&code("BBBBBB")), 0);
    }

    #[test]
    fn test_broadcast_empty_room_delivers_zero() {
        let bus = Broadcaster::new();
        let room = code("EMPTY2");
        assert_eq!(bus.broadcast(&room, status_changed(&room)), 0);
    }
}
