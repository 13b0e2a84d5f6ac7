use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db, matches,
    protocol::{ClientEvent, Location, Message, MessageType, ServerEvent},
};

use super::{ConnectionId, Hub, RoomKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Joined,
    /// Broadcast accepted by this many outboxes (possibly zero).
    Broadcast(usize),
    /// Event refused; nothing was sent to anyone.
    Dropped(&'static str),
}

/// Applies one client event on behalf of `conn`.
///
/// Identity comes from the connection, never from the payload: a payload
/// naming another user is refused, and chat traffic requires that this
/// connection joined the match room, which in turn requires that its user
/// is one of the match's participants.
pub async fn dispatch(hub: &Hub, db_pool: &SqlitePool, conn: ConnectionId, event: ClientEvent) -> Outcome {
    let Some(user_id) = hub.user_of(conn) else {
        return Outcome::Dropped("unknown connection");
    };

    let outcome = match event {
        ClientEvent::JoinRoom(claimed) => {
            if claimed != user_id {
                Outcome::Dropped("personal room of another user")
            } else {
                hub.join_user(conn, user_id);
                Outcome::Joined
            }
        }

        ClientEvent::JoinChat { match_id, user_id: claimed } => {
            if claimed != user_id {
                Outcome::Dropped("join on behalf of another user")
            } else {
                join_chat(hub, db_pool, conn, match_id, user_id).await
            }
        }

        ClientEvent::SendMessage { match_id, sender_id, message, message_type, id } => {
            match check(hub, conn, user_id, match_id, sender_id) {
                Err(reason) => Outcome::Dropped(reason),
                Ok(()) if message_type != MessageType::Text => {
                    Outcome::Dropped("locations go through share-location")
                }
                Ok(()) if message.trim().is_empty() => Outcome::Dropped("empty message"),
                Ok(()) => {
                    let envelope = envelope(match_id, user_id, id, Some(message), None);
                    tracing::debug!(%match_id, %user_id, message_id = %envelope.id, "message relayed");
                    Outcome::Broadcast(hub.broadcast(RoomKey::Match(match_id), ServerEvent::NewMessage(envelope)))
                }
            }
        }

        ClientEvent::TypingStart { match_id, user_id: claimed } => typing(hub, conn, user_id, match_id, claimed, true),
        ClientEvent::TypingStop { match_id, user_id: claimed } => typing(hub, conn, user_id, match_id, claimed, false),

        ClientEvent::MarkRead { match_id, message_id, user_id: claimed } => {
            match check(hub, conn, user_id, match_id, claimed) {
                Err(reason) => Outcome::Dropped(reason),
                Ok(()) => Outcome::Broadcast(hub.broadcast(
                    RoomKey::Match(match_id),
                    ServerEvent::MessageRead { message_id, user_id },
                )),
            }
        }

        ClientEvent::ShareLocation { match_id, sender_id, location, id } => {
            match check(hub, conn, user_id, match_id, sender_id) {
                Err(reason) => Outcome::Dropped(reason),
                Ok(()) if !location.is_valid() => Outcome::Dropped("coordinates out of range"),
                Ok(()) => {
                    let envelope = envelope(match_id, user_id, id, None, Some(location));
                    tracing::debug!(%match_id, %user_id, message_id = %envelope.id, "location relayed");
                    Outcome::Broadcast(hub.broadcast(RoomKey::Match(match_id), ServerEvent::NewMessage(envelope)))
                }
            }
        }
    };

    if let Outcome::Dropped(reason) = outcome {
        tracing::warn!(%conn, %user_id, reason, "realtime event dropped");
    }
    outcome
}

async fn join_chat(hub: &Hub, db_pool: &SqlitePool, conn: ConnectionId, match_id: Uuid, user_id: Uuid) -> Outcome {
    match matches::get_participants(db_pool, match_id).await {
        Ok(participants) if participants.contains(user_id) => {
            hub.join_chat(conn, match_id, user_id);
            Outcome::Joined
        }
        Ok(_) => Outcome::Dropped("not a participant of this match"),
        Err(err) => {
            tracing::debug!(%match_id, error = %err, "join-chat lookup failed");
            Outcome::Dropped("match unavailable")
        }
    }
}

fn typing(hub: &Hub, conn: ConnectionId, user_id: Uuid, match_id: Uuid, claimed: Uuid, is_typing: bool) -> Outcome {
    match check(hub, conn, user_id, match_id, claimed) {
        Err(reason) => Outcome::Dropped(reason),
        Ok(()) => Outcome::Broadcast(hub.broadcast(
            RoomKey::Match(match_id),
            ServerEvent::UserTyping { user_id, is_typing },
        )),
    }
}

fn check(hub: &Hub, conn: ConnectionId, user_id: Uuid, match_id: Uuid, claimed: Uuid) -> Result<(), &'static str> {
    if claimed != user_id {
        return Err("sender does not match the connection");
    }
    if !hub.is_member(conn, RoomKey::Match(match_id)) {
        return Err("connection has not joined this match");
    }
    Ok(())
}

fn envelope(match_id: Uuid, sender_id: Uuid, id: Option<Uuid>, message: Option<String>, location: Option<Location>) -> Message {
    Message {
        id: id.unwrap_or_else(Uuid::now_v7),
        match_id,
        sender_id,
        message_type: if location.is_some() { MessageType::Location } else { MessageType::Text },
        message,
        location,
        timestamp: db::now(),
        read: false,
    }
}
