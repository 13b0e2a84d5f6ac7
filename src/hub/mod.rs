//! Realtime relay over ephemeral room membership.
//!
//! Rooms are keyed either by user (personal notifications) or by match
//! (conversation traffic). The hub owns no durable state: broadcasts are
//! best-effort to whichever connections are joined right now, and a
//! connection's memberships disappear with it.

mod dispatch;
mod ws;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Mutex,
};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

pub use dispatch::{Outcome, dispatch};
pub use ws::hub_ws;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(Uuid),
    Match(Uuid),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoomKey::User(id) => write!(f, "{id}"),
            RoomKey::Match(id) => write!(f, "match-{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

struct Connection {
    user_id: Uuid,
    outbox: mpsc::Sender<ServerEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

pub struct Hub {
    registry: Mutex<Registry>,
    outbox_capacity: usize,
}

impl Hub {
    pub fn new(outbox_capacity: usize) -> Hub {
        Hub {
            registry: Mutex::default(),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // bookkeeping stays consistent even if a holder panicked
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connect(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);
        let conn = ConnectionId(Uuid::now_v7());
        self.registry().connections.insert(
            conn,
            Connection {
                user_id,
                outbox,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(%conn, %user_id, "connection registered");
        (conn, rx)
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.registry().connections.get(&conn).map(|c| c.user_id)
    }

    pub fn is_member(&self, conn: ConnectionId, room: RoomKey) -> bool {
        self.registry()
            .connections
            .get(&conn)
            .is_some_and(|c| c.rooms.contains(&room))
    }

    pub fn join(&self, conn: ConnectionId, room: RoomKey) -> bool {
        let mut registry = self.registry();
        let Some(connection) = registry.connections.get_mut(&conn) else {
            return false;
        };
        if connection.rooms.insert(room) {
            registry.rooms.entry(room).or_default().insert(conn);
            tracing::debug!(%conn, %room, "joined room");
        }
        true
    }

    pub fn join_user(&self, conn: ConnectionId, user_id: Uuid) -> bool {
        self.join(conn, RoomKey::User(user_id))
    }

    pub fn join_chat(&self, conn: ConnectionId, match_id: Uuid, user_id: Uuid) -> bool {
        self.join(conn, RoomKey::Match(match_id)) && self.join(conn, RoomKey::User(user_id))
    }

    /// Fans `event` out to every connection in `room`, in one critical section
    /// so each subscriber sees a room's events in emission order. Full or
    /// closed outboxes miss the event. Returns how many outboxes accepted it.
    pub fn broadcast(&self, room: RoomKey, event: ServerEvent) -> usize {
        let registry = self.registry();
        let Some(members) = registry.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in members {
            let Some(connection) = registry.connections.get(conn) else {
                continue;
            };
            match connection.outbox.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%conn, %room, "outbox full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        let mut registry = self.registry();
        let Some(connection) = registry.connections.remove(&conn) else {
            return;
        };
        for room in &connection.rooms {
            if let Some(members) = registry.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    registry.rooms.remove(room);
                }
            }
        }
        tracing::debug!(%conn, user_id = %connection.user_id, "connection dropped");
    }

    pub fn room_size(&self, room: RoomKey) -> usize {
        self.registry().rooms.get(&room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.registry().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: Uuid) -> ServerEvent {
        ServerEvent::UserTyping { user_id, is_typing: true }
    }

    #[test]
    fn join_chat_is_idempotent() {
        let hub = Hub::new(8);
        let (match_id, user_id) = (Uuid::now_v7(), Uuid::now_v7());
        let (conn, _rx) = hub.connect(user_id);

        assert!(hub.join_chat(conn, match_id, user_id));
        assert!(hub.join_chat(conn, match_id, user_id));

        assert_eq!(hub.room_size(RoomKey::Match(match_id)), 1);
        assert_eq!(hub.room_size(RoomKey::User(user_id)), 1);
        assert!(hub.is_member(conn, RoomKey::Match(match_id)));
    }

    #[test]
    fn broadcast_reaches_members_only() {
        let hub = Hub::new(8);
        let match_id = Uuid::now_v7();
        let (u1, u2, u3) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

        let (c1, mut rx1) = hub.connect(u1);
        let (c1_phone, mut rx1_phone) = hub.connect(u1);
        let (c2, mut rx2) = hub.connect(u2);
        let (_c3, mut rx3) = hub.connect(u3);

        hub.join_chat(c1, match_id, u1);
        hub.join_chat(c1_phone, match_id, u1);
        hub.join_chat(c2, match_id, u2);

        assert_eq!(hub.broadcast(RoomKey::Match(match_id), typing(u1)), 3);
        assert_eq!(rx1.try_recv().unwrap(), typing(u1));
        assert_eq!(rx1_phone.try_recv().unwrap(), typing(u1));
        assert_eq!(rx2.try_recv().unwrap(), typing(u1));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn personal_room_is_separate_from_match_room() {
        let hub = Hub::new(8);
        let user_id = Uuid::now_v7();
        let (conn, mut rx) = hub.connect(user_id);
        hub.join_user(conn, user_id);

        assert_eq!(hub.broadcast(RoomKey::Match(Uuid::now_v7()), typing(user_id)), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(hub.broadcast(RoomKey::User(user_id), typing(user_id)), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn broadcast_to_an_empty_room_is_silent() {
        let hub = Hub::new(8);
        assert_eq!(hub.broadcast(RoomKey::Match(Uuid::now_v7()), typing(Uuid::now_v7())), 0);
    }

    #[test]
    fn disconnect_leaves_every_room_without_notifying_peers() {
        let hub = Hub::new(8);
        let match_id = Uuid::now_v7();
        let (u1, u2) = (Uuid::now_v7(), Uuid::now_v7());
        let (c1, _rx1) = hub.connect(u1);
        let (c2, mut rx2) = hub.connect(u2);
        hub.join_chat(c1, match_id, u1);
        hub.join_chat(c2, match_id, u2);

        hub.disconnect(c1);

        assert!(rx2.try_recv().is_err());
        assert_eq!(hub.room_size(RoomKey::Match(match_id)), 1);
        assert_eq!(hub.room_size(RoomKey::User(u1)), 0);
        assert_eq!(hub.connection_count(), 1);
        assert!(!hub.join(c1, RoomKey::Match(match_id)));
    }

    #[test]
    fn full_outbox_drops_instead_of_blocking() {
        let hub = Hub::new(1);
        let user_id = Uuid::now_v7();
        let (conn, mut rx) = hub.connect(user_id);
        hub.join_user(conn, user_id);

        assert_eq!(hub.broadcast(RoomKey::User(user_id), typing(user_id)), 1);
        assert_eq!(hub.broadcast(RoomKey::User(user_id), typing(user_id)), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_keep_emission_order() {
        let hub = Hub::new(16);
        let match_id = Uuid::now_v7();
        let user_id = Uuid::now_v7();
        let (conn, mut rx) = hub.connect(user_id);
        hub.join_chat(conn, match_id, user_id);

        for is_typing in [true, false, true] {
            hub.broadcast(RoomKey::Match(match_id), ServerEvent::UserTyping { user_id, is_typing });
        }
        let seen: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                ServerEvent::UserTyping { is_typing, .. } => is_typing,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seen, vec![true, false, true]);
    }

    #[test]
    fn room_keys_render_like_the_wire_names() {
        let id = Uuid::nil();
        assert_eq!(RoomKey::Match(id).to_string(), format!("match-{id}"));
        assert_eq!(RoomKey::User(id).to_string(), id.to_string());
    }
}
