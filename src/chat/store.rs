use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    ChatError, ChatResult, db,
    matches::{self, Participants},
    protocol::{ChatHistory, Location, Message, MessageType, SendMessageRequest},
};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Page 1 holds the most recent messages; each page is returned oldest first.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl Pagination {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn offset(&self) -> u32 {
        self.page.unwrap_or(1).max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    pub total_chats: u64,
    pub messages_sent: u64,
    pub unread: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub match_id: Uuid,
    pub other_user_id: Uuid,
    pub destination: String,
    pub last_message: Option<Message>,
    pub unread: u64,
}

type MessageRow = (String, String, String, String, Option<String>, Option<f64>, Option<f64>, i64, bool);

const MESSAGE_COLUMNS: &str = "id,match_id,sender_id,message_type,body,latitude,longitude,created_at,read";

fn from_row(
    (id, match_id, sender_id, message_type, body, latitude, longitude, created_at, read): MessageRow,
) -> ChatResult<Message> {
    let message_type = MessageType::parse(&message_type)
        .ok_or_else(|| ChatError::Transient(format!("unknown message type {message_type}")))?;
    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Location { latitude, longitude }),
        _ => None,
    };

    Ok(Message {
        id: db::parse_id(&id)?,
        match_id: db::parse_id(&match_id)?,
        sender_id: db::parse_id(&sender_id)?,
        message: body,
        message_type,
        location,
        timestamp: db::from_millis(created_at),
        read,
    })
}

async fn participants_of(db_pool: &SqlitePool, match_id: Uuid, user_id: Uuid) -> ChatResult<Participants> {
    let participants = matches::get_participants(db_pool, match_id).await?;
    if !participants.contains(user_id) {
        return Err(ChatError::Forbidden("not a participant of this match".to_owned()));
    }
    Ok(participants)
}

fn validate(req: &SendMessageRequest) -> ChatResult<()> {
    match req.message_type {
        MessageType::Text => {
            if req.message.as_deref().is_none_or(|m| m.trim().is_empty()) {
                return Err(ChatError::validation("message must not be empty"));
            }
        }
        MessageType::Location => match req.location {
            Some(location) if location.is_valid() => {}
            Some(_) => return Err(ChatError::validation("coordinates out of range")),
            None => return Err(ChatError::validation("location message without coordinates")),
        },
    }
    Ok(())
}

async fn find_message(db_pool: &SqlitePool, id: Uuid) -> ChatResult<Option<Message>> {
    let row: Option<MessageRow> = sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(from_row).transpose()
}

/// Persists one message. The sender must belong to the match. A repeated
/// client-chosen id from the same sender returns the record already stored.
pub async fn append_message(db_pool: &SqlitePool, sender_id: Uuid, req: SendMessageRequest) -> ChatResult<Message> {
    let participants = matches::get_participants(db_pool, req.match_id).await?;
    if !participants.contains(sender_id) {
        return Err(ChatError::validation("sender is not a participant of this match"));
    }
    validate(&req)?;

    if let Some(id) = req.id {
        if let Some(existing) = find_message(db_pool, id).await? {
            return resend(existing, req.match_id, sender_id);
        }
    }

    let message = Message {
        id: req.id.unwrap_or_else(Uuid::now_v7),
        match_id: req.match_id,
        sender_id,
        message: match req.message_type {
            MessageType::Text => req.message,
            MessageType::Location => None,
        },
        message_type: req.message_type,
        location: match req.message_type {
            MessageType::Text => None,
            MessageType::Location => req.location,
        },
        timestamp: db::now(),
        read: false,
    };

    let inserted = sqlx::query(
        "INSERT INTO messages (id,match_id,sender_id,message_type,body,latitude,longitude,created_at,read) \
         VALUES (?,?,?,?,?,?,?,?,0) ON CONFLICT(id) DO NOTHING",
    )
    .bind(message.id.to_string())
    .bind(message.match_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(message.message_type.as_str())
    .bind(&message.message)
    .bind(message.location.map(|l| l.latitude))
    .bind(message.location.map(|l| l.longitude))
    .bind(db::to_millis(message.timestamp))
    .execute(db_pool)
    .await?
    .rows_affected();

    if inserted == 0 {
        // a concurrent write with the same id got there first
        return match find_message(db_pool, message.id).await? {
            Some(existing) => resend(existing, message.match_id, sender_id),
            None => Err(ChatError::Transient(format!("message {} vanished", message.id))),
        };
    }

    tracing::debug!(match_id = %message.match_id, %sender_id, message_id = %message.id, "message stored");
    Ok(message)
}

fn resend(existing: Message, match_id: Uuid, sender_id: Uuid) -> ChatResult<Message> {
    if existing.match_id == match_id && existing.sender_id == sender_id {
        Ok(existing)
    } else {
        Err(ChatError::validation("message id already in use"))
    }
}

pub async fn list_messages(db_pool: &SqlitePool, match_id: Uuid, pagination: Pagination) -> ChatResult<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE match_id=? ORDER BY created_at DESC, seq DESC LIMIT ? OFFSET ?"
    ))
    .bind(match_id.to_string())
    .bind(i64::from(pagination.limit()))
    .bind(i64::from(pagination.offset()))
    .fetch_all(db_pool)
    .await?;

    let mut messages = rows.into_iter().map(from_row).collect::<ChatResult<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

pub async fn load_chat(
    db_pool: &SqlitePool,
    match_id: Uuid,
    user_id: Uuid,
    pagination: Pagination,
) -> ChatResult<ChatHistory> {
    let participants = participants_of(db_pool, match_id, user_id).await?;
    Ok(ChatHistory {
        match_id,
        participants: participants.to_vec(),
        messages: list_messages(db_pool, match_id, pagination).await?,
    })
}

/// Flips `read` on messages the reader received. Already-read messages and
/// the reader's own messages are left alone. Returns how many flipped.
pub async fn mark_read(db_pool: &SqlitePool, match_id: Uuid, message_ids: &[Uuid], reader: Uuid) -> ChatResult<u64> {
    participants_of(db_pool, match_id, reader).await?;

    let mut tx = db_pool.begin().await?;
    let mut updated = 0;
    for id in message_ids {
        updated += sqlx::query("UPDATE messages SET read=1 WHERE id=? AND match_id=? AND sender_id<>? AND read=0")
            .bind(id.to_string())
            .bind(match_id.to_string())
            .bind(reader.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;

    Ok(updated)
}

pub async fn chat_stats(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<ChatStats> {
    let user = user_id.to_string();

    let (total_chats,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM matches WHERE participant_a=? OR participant_b=?")
            .bind(&user)
            .bind(&user)
            .fetch_one(db_pool)
            .await?;

    let (messages_sent,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE sender_id=?")
        .bind(&user)
        .fetch_one(db_pool)
        .await?;

    let (unread,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages JOIN matches ON matches.id=messages.match_id \
         WHERE (matches.participant_a=? OR matches.participant_b=?) AND messages.sender_id<>? AND messages.read=0",
    )
    .bind(&user)
    .bind(&user)
    .bind(&user)
    .fetch_one(db_pool)
    .await?;

    Ok(ChatStats {
        total_chats: total_chats as u64,
        messages_sent: messages_sent as u64,
        unread: unread as u64,
    })
}

pub async fn list_chats(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<Vec<ChatSummary>> {
    let mut chats = Vec::new();
    for found in matches::list_for_user(db_pool, user_id).await? {
        let Some(other_user_id) = found.participants().other(user_id) else {
            continue;
        };

        let last: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE match_id=? ORDER BY created_at DESC, seq DESC LIMIT 1"
        ))
        .bind(found.id.to_string())
        .fetch_optional(db_pool)
        .await?;

        let (unread,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE match_id=? AND sender_id<>? AND read=0")
                .bind(found.id.to_string())
                .bind(user_id.to_string())
                .fetch_one(db_pool)
                .await?;

        chats.push(ChatSummary {
            match_id: found.id,
            other_user_id,
            destination: found.destination,
            last_message: last.map(from_row).transpose()?,
            unread: unread as u64,
        });
    }
    Ok(chats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::registry::tests::matched_pair;

    fn text(match_id: Uuid, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            match_id,
            id: None,
            message: Some(body.to_owned()),
            message_type: MessageType::Text,
            location: None,
        }
    }

    #[tokio::test]
    async fn history_is_oldest_first() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;

        append_message(&db_pool, u1, text(found.id, "hello")).await.unwrap();
        append_message(&db_pool, u2, text(found.id, "hi there")).await.unwrap();
        append_message(&db_pool, u1, text(found.id, "ready for Diani?")).await.unwrap();

        let history = list_messages(&db_pool, found.id, Pagination::default()).await.unwrap();
        let bodies: Vec<_> = history.iter().filter_map(|m| m.message.as_deref()).collect();
        assert_eq!(bodies, vec!["hello", "hi there", "ready for Diani?"]);
        assert!(history.iter().all(|m| !m.read));
    }

    #[tokio::test]
    async fn first_page_is_the_most_recent() {
        let db_pool = db::memory().await.unwrap();
        let (u1, _, found) = matched_pair(&db_pool).await;
        for n in 0..5 {
            append_message(&db_pool, u1, text(found.id, &format!("m{n}"))).await.unwrap();
        }

        let latest = list_messages(&db_pool, found.id, Pagination { page: Some(1), limit: Some(2) })
            .await
            .unwrap();
        let bodies: Vec<_> = latest.iter().filter_map(|m| m.message.clone()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);

        let older = list_messages(&db_pool, found.id, Pagination { page: Some(3), limit: Some(2) })
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].message.as_deref(), Some("m0"));
    }

    #[tokio::test]
    async fn outsiders_and_empty_bodies_are_rejected() {
        let db_pool = db::memory().await.unwrap();
        let (_, _, found) = matched_pair(&db_pool).await;
        let outsider = crate::auth::create_user(&db_pool, "Chege", false).await.unwrap();

        assert!(matches!(
            append_message(&db_pool, outsider, text(found.id, "let me in")).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            append_message(&db_pool, found.participant_a, text(found.id, "  ")).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            append_message(&db_pool, found.participant_a, text(Uuid::now_v7(), "hi")).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_client_id_is_idempotent() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;
        let id = Uuid::now_v7();
        let req = SendMessageRequest { id: Some(id), ..text(found.id, "once") };

        let first = append_message(&db_pool, u1, req.clone()).await.unwrap();
        let second = append_message(&db_pool, u1, req.clone()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(list_messages(&db_pool, found.id, Pagination::default()).await.unwrap().len(), 1);

        assert!(matches!(
            append_message(&db_pool, u2, req).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn overlapping_writes_of_one_id_both_succeed() {
        let db_pool = db::memory().await.unwrap();
        let (u1, _, found) = matched_pair(&db_pool).await;
        let req = SendMessageRequest { id: Some(Uuid::now_v7()), ..text(found.id, "twice at once") };

        let (a, b) = tokio::join!(
            append_message(&db_pool, u1, req.clone()),
            append_message(&db_pool, u1, req.clone()),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(list_messages(&db_pool, found.id, Pagination::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn location_messages_keep_coordinates() {
        let db_pool = db::memory().await.unwrap();
        let (u1, _, found) = matched_pair(&db_pool).await;
        let location = Location { latitude: -4.28, longitude: 39.59 };

        let stored = append_message(&db_pool, u1, SendMessageRequest {
            match_id: found.id,
            id: None,
            message: None,
            message_type: MessageType::Location,
            location: Some(location),
        })
        .await
        .unwrap();
        assert_eq!(stored.location, Some(location));

        let history = list_messages(&db_pool, found.id, Pagination::default()).await.unwrap();
        assert_eq!(history, vec![stored]);

        let missing = SendMessageRequest {
            match_id: found.id,
            id: None,
            message: None,
            message_type: MessageType::Location,
            location: None,
        };
        assert!(matches!(append_message(&db_pool, u1, missing).await, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn mark_read_is_one_way_and_idempotent() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;
        let from_u1 = append_message(&db_pool, u1, text(found.id, "hello")).await.unwrap();
        let from_u2 = append_message(&db_pool, u2, text(found.id, "hey")).await.unwrap();

        // own messages are not marked by their sender
        assert_eq!(mark_read(&db_pool, found.id, &[from_u1.id, from_u2.id], u2).await.unwrap(), 1);
        assert_eq!(mark_read(&db_pool, found.id, &[from_u1.id], u2).await.unwrap(), 0);

        let history = list_messages(&db_pool, found.id, Pagination::default()).await.unwrap();
        assert!(history[0].read);
        assert!(!history[1].read);
    }

    #[tokio::test]
    async fn stats_and_summaries_count_unread() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;
        append_message(&db_pool, u1, text(found.id, "one")).await.unwrap();
        let last = append_message(&db_pool, u1, text(found.id, "two")).await.unwrap();

        let stats = chat_stats(&db_pool, u2).await.unwrap();
        assert_eq!(stats, ChatStats { total_chats: 1, messages_sent: 0, unread: 2 });
        assert_eq!(chat_stats(&db_pool, u1).await.unwrap().messages_sent, 2);

        let chats = list_chats(&db_pool, u2).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].other_user_id, u1);
        assert_eq!(chats[0].unread, 2);
        assert_eq!(chats[0].last_message.as_ref(), Some(&last));
    }

    #[tokio::test]
    async fn deleting_a_match_takes_its_history() {
        let db_pool = db::memory().await.unwrap();
        let (u1, _, found) = matched_pair(&db_pool).await;
        append_message(&db_pool, u1, text(found.id, "bye")).await.unwrap();

        matches::delete_match(&db_pool, found.id).await.unwrap();

        let (left,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn only_participants_load_history() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;
        let outsider = crate::auth::create_user(&db_pool, "Chege", false).await.unwrap();

        let history = load_chat(&db_pool, found.id, u1, Pagination::default()).await.unwrap();
        assert_eq!(history.participants, vec![u1, u2]);
        assert!(matches!(
            load_chat(&db_pool, found.id, outsider, Pagination::default()).await,
            Err(ChatError::Forbidden(_))
        ));
    }
}
