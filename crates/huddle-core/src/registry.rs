use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::events::ServerEvent;

/// A serialized channel frame queued for one connection. Events are encoded
/// once per broadcast and shared by every device of the identity.
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Address of the fan-out scope holding every live connection of `identity`.
pub fn room_name(identity: Uuid) -> String {
    format!("room:{}", identity)
}

/// Result of one live fan-out attempt. Never surfaced to the requester; the
/// durable store stays authoritative whatever this says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// No live connection for the identity
    Offline,
    /// Queued on this many connections
    Delivered(usize),
    /// Some or all connections could not accept the frame
    Degraded { delivered: usize, failed: usize },
}

impl FanoutOutcome {
    pub fn log(&self, event: &str, identity: Uuid) {
        match self {
            Self::Offline => debug!("{} for {} dropped: offline", event, room_name(identity)),
            Self::Delivered(n) => debug!("{} fanned out to {} connection(s) in {}", event, n, room_name(identity)),
            Self::Degraded { delivered, failed } => warn!(
                "{} fan-out to {} degraded: {} delivered, {} failed",
                event,
                room_name(identity),
                delivered,
                failed
            ),
        }
    }
}

/// Seam between the delivery pipelines and whatever carries live events.
/// The in-process [`SessionRegistry`] is the only implementation; a
/// multi-process deployment would put a pub/sub backplane behind this.
pub trait Fanout: Send + Sync {
    fn broadcast(&self, identity: Uuid, event: &ServerEvent) -> FanoutOutcome;
}

/// Live connections grouped into one room per identity.
///
/// Constructed once at startup and shared by handle. Each operation takes
/// the lock once, so register/unregister/broadcast are atomic relative to
/// each other; nothing awaits while the lock is held.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Rooms>>,
}

#[derive(Default)]
struct Rooms {
    /// identity -> (connection -> outbound queue)
    rooms: HashMap<Uuid, HashMap<ConnectionId, mpsc::UnboundedSender<OutboundFrame>>>,
    /// connection -> identity, so unregister only needs the handle
    owners: HashMap<ConnectionId, Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `identity`'s room. Multiple devices per identity
    /// are allowed. Returns the connection handle and its outbound queue.
    pub fn register(&self, identity: Uuid) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundFrame>) {
        let conn_id = ConnectionId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        rooms.rooms.entry(identity).or_default().insert(conn_id, tx);
        rooms.owners.insert(conn_id, identity);

        (conn_id, rx)
    }

    /// Remove a connection from whatever room holds it. Unknown or already
    /// removed handles are a no-op. Returns the owning identity, if any.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<Uuid> {
        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let identity = rooms.owners.remove(&conn_id)?;

        if let Some(room) = rooms.rooms.get_mut(&identity) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.rooms.remove(&identity);
            }
        }

        Some(identity)
    }

    /// Queue a pre-serialized frame on every connection of `identity`.
    pub fn send_frame(&self, identity: Uuid, frame: OutboundFrame) -> FanoutOutcome {
        let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.rooms.get(&identity) else {
            return FanoutOutcome::Offline;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for tx in room.values() {
            // A closed queue means the socket task already exited; its
            // unregister is in flight.
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        if failed == 0 {
            FanoutOutcome::Delivered(delivered)
        } else {
            FanoutOutcome::Degraded { delivered, failed }
        }
    }

    pub fn connection_count(&self, identity: Uuid) -> usize {
        let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        rooms.rooms.get(&identity).map_or(0, HashMap::len)
    }

    pub fn is_online(&self, identity: Uuid) -> bool {
        self.connection_count(identity) > 0
    }

    /// Number of identities with at least one live connection.
    pub fn online_identities(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).rooms.len()
    }
}

impl Fanout for SessionRegistry {
    fn broadcast(&self, identity: Uuid, event: &ServerEvent) -> FanoutOutcome {
        match serde_json::to_string(event) {
            Ok(json) => self.send_frame(identity, Arc::from(json)),
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                FanoutOutcome::Degraded {
                    delivered: 0,
                    failed: self.connection_count(identity),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(from: Uuid) -> ServerEvent {
        ServerEvent::Typing {
            from_user_id: from,
            is_typing: true,
        }
    }

    #[test]
    fn broadcast_reaches_every_device() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (_, mut phone) = registry.register(user);
        let (_, mut laptop) = registry.register(user);

        let outcome = registry.broadcast(user, &typing(Uuid::nil()));
        assert_eq!(outcome, FanoutOutcome::Delivered(2));

        let a = phone.try_recv().unwrap();
        let b = laptop.try_recv().unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"type\":\"typing\""));
    }

    #[test]
    fn offline_identity_drops_silently() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.broadcast(Uuid::new_v4(), &typing(Uuid::nil())),
            FanoutOutcome::Offline
        );
    }

    #[test]
    fn unregister_is_idempotent_and_scoped_to_the_handle() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = registry.register(user);
        let (_second, mut rx2) = registry.register(user);

        assert_eq!(registry.unregister(first), Some(user));
        assert_eq!(registry.unregister(first), None);
        assert_eq!(registry.connection_count(user), 1);

        registry.broadcast(user, &typing(Uuid::nil()));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn room_is_removed_with_its_last_connection() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = registry.register(user);
        assert!(registry.is_online(user));
        assert_eq!(registry.online_identities(), 1);

        registry.unregister(conn);
        assert!(!registry.is_online(user));
        assert_eq!(registry.online_identities(), 0);
    }

    #[test]
    fn closed_queue_reports_degraded() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (_, rx) = registry.register(user);
        let (_, _live) = registry.register(user);
        drop(rx);

        assert_eq!(
            registry.broadcast(user, &typing(Uuid::nil())),
            FanoutOutcome::Degraded { delivered: 1, failed: 1 }
        );
    }

    #[test]
    fn room_names_are_deterministic() {
        let id = Uuid::nil();
        assert_eq!(room_name(id), "room:00000000-0000-0000-0000-000000000000");
    }
}
