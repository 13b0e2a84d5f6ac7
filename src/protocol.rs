//! Wire types shared by the server and the client session.
//!
//! Realtime traffic is JSON text frames of the form
//! `{"event": "send-message", "data": {...}}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::matches::Match;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Location,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Location => "location",
        }
    }

    pub fn parse(raw: &str) -> Option<MessageType> {
        match raw {
            "text" => Some(MessageType::Text),
            "location" => Some(MessageType::Location),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A chat message, both as the realtime envelope and as the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub match_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom(Uuid),
    JoinChat {
        match_id: Uuid,
        user_id: Uuid,
    },
    SendMessage {
        match_id: Uuid,
        sender_id: Uuid,
        message: String,
        #[serde(default)]
        message_type: MessageType,
        /// Client-chosen id, shared with the REST write so both copies merge.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
    },
    TypingStart {
        match_id: Uuid,
        user_id: Uuid,
    },
    TypingStop {
        match_id: Uuid,
        user_id: Uuid,
    },
    MarkRead {
        match_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },
    ShareLocation {
        match_id: Uuid,
        sender_id: Uuid,
        location: Location,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    UserTyping {
        user_id: Uuid,
        is_typing: bool,
    },
    MessageRead {
        message_id: Uuid,
        user_id: Uuid,
    },
    NewMatch(Match),
}

/// `GET /api/chat/match/{id}`: the pair and one page of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub match_id: Uuid,
    #[serde(default)]
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// `POST /api/chat/send`. The sender is the authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub match_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}
