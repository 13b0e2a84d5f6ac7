use time::OffsetDateTime;
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

use super::{Notify, Persist, typing::TypingDebouncer};
use crate::{
    ChatError, ChatResult,
    protocol::{ChatHistory, ClientEvent, Location, Message, MessageType, SendMessageRequest, ServerEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Shown locally, store write in flight.
    Pending,
    Confirmed,
    /// Store write failed; the message stays visible and can be retried.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub message: Message,
    pub is_own: bool,
    pub delivery: Delivery,
}

/// Things the UI should surface. Drained with [`ChatSession::drain_notices`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    LoadFailed(ChatError),
    SendFailed { id: Uuid, error: ChatError },
    ReadFailed(ChatError),
    Incoming { from: Uuid, message_id: Uuid },
}

#[derive(Clone, Copy)]
enum Source {
    Local,
    Realtime,
    Store,
}

pub struct ChatSession<N, P> {
    match_id: Uuid,
    user_id: Uuid,
    state: SessionState,
    entries: Vec<ChatEntry>,
    other_user: Option<Uuid>,
    peer_typing: bool,
    typing: TypingDebouncer,
    notices: Vec<Notice>,
    notify: N,
    persist: P,
}

impl<N: Notify, P: Persist> ChatSession<N, P> {
    pub fn new(match_id: Uuid, user_id: Uuid, notify: N, persist: P) -> Self {
        Self {
            match_id,
            user_id,
            state: SessionState::Uninitialized,
            entries: Vec::new(),
            other_user: None,
            peer_typing: false,
            typing: TypingDebouncer::default(),
            notices: Vec::new(),
            notify,
            persist,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn entry(&self, id: Uuid) -> Option<&ChatEntry> {
        self.entries.iter().find(|e| e.message.id == id)
    }

    pub fn other_user(&self) -> Option<Uuid> {
        self.other_user
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Joins the match room and loads history. A failed load still ends in
    /// `Ready`, with an empty list and a [`Notice::LoadFailed`].
    pub async fn open(&mut self) {
        if self.state != SessionState::Uninitialized {
            return;
        }
        self.state = SessionState::Loading;
        self.notify.emit(ClientEvent::JoinChat {
            match_id: self.match_id,
            user_id: self.user_id,
        });

        match self.persist.load_chat(self.match_id).await {
            Ok(history) => {
                if self.other_user.is_none() {
                    self.other_user = counterpart(&history, self.user_id);
                }
                for message in history.messages {
                    self.merge(message, Source::Store);
                }
            }
            Err(error) => {
                tracing::warn!(match_id = %self.match_id, %error, "chat history unavailable");
                self.notices.push(Notice::LoadFailed(error));
            }
        }

        self.state = SessionState::Ready;
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) => {
                if message.match_id != self.match_id {
                    return;
                }
                let (from, message_id) = (message.sender_id, message.id);
                let inserted = self.merge(message, Source::Realtime);
                if from != self.user_id {
                    self.other_user.get_or_insert(from);
                    if inserted {
                        self.notices.push(Notice::Incoming { from, message_id });
                    }
                }
            }
            ServerEvent::UserTyping { user_id, is_typing } => {
                // typing carries no match id; a shared socket may be in other match rooms
                let from_peer = match self.other_user {
                    Some(other) => other == user_id,
                    None => user_id != self.user_id,
                };
                if from_peer {
                    self.peer_typing = is_typing;
                }
            }
            ServerEvent::MessageRead { message_id, user_id } => {
                if user_id != self.user_id {
                    if let Some(entry) = self.entry_mut(message_id) {
                        entry.message.read = true;
                    }
                }
            }
            ServerEvent::NewMatch(_) => {}
        }
    }

    /// Shows `text` immediately, relays it, then persists it. Persistence
    /// failures leave the message in place as [`Delivery::Failed`].
    pub async fn send(&mut self, text: &str) -> ChatResult<Uuid> {
        if text.trim().is_empty() {
            return Err(ChatError::validation("message is empty"));
        }

        let id = Uuid::now_v7();
        let draft = self.draft(id, Some(text.to_owned()), None);
        self.merge(draft, Source::Local);
        self.notify.emit(ClientEvent::SendMessage {
            match_id: self.match_id,
            sender_id: self.user_id,
            message: text.to_owned(),
            message_type: MessageType::Text,
            id: Some(id),
        });

        let _ = self.persist_entry(id).await;
        Ok(id)
    }

    pub async fn share_location(&mut self, location: Location) -> ChatResult<Uuid> {
        if !location.is_valid() {
            return Err(ChatError::validation("coordinates out of range"));
        }

        let id = Uuid::now_v7();
        let draft = self.draft(id, None, Some(location));
        self.merge(draft, Source::Local);
        self.notify.emit(ClientEvent::ShareLocation {
            match_id: self.match_id,
            sender_id: self.user_id,
            location,
            id: Some(id),
        });

        let _ = self.persist_entry(id).await;
        Ok(id)
    }

    pub async fn retry(&mut self, id: Uuid) -> ChatResult<()> {
        match self.entry_mut(id) {
            Some(entry) if entry.delivery == Delivery::Failed => entry.delivery = Delivery::Pending,
            Some(_) => return Err(ChatError::validation("message is not awaiting retry")),
            None => return Err(ChatError::NotFound(format!("message {id}"))),
        }
        self.persist_entry(id).await
    }

    pub async fn mark_all_read(&mut self) -> ChatResult<u64> {
        let unread: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| !e.is_own && !e.message.read)
            .map(|e| e.message.id)
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }

        for &message_id in &unread {
            self.notify.emit(ClientEvent::MarkRead {
                match_id: self.match_id,
                message_id,
                user_id: self.user_id,
            });
        }

        match self.persist.mark_read(self.match_id, unread.clone()).await {
            Ok(updated) => {
                for entry in self.entries.iter_mut().filter(|e| unread.contains(&e.message.id)) {
                    entry.message.read = true;
                }
                Ok(updated)
            }
            Err(error) => {
                tracing::warn!(match_id = %self.match_id, %error, "read receipts not persisted");
                self.notices.push(Notice::ReadFailed(error.clone()));
                Err(error)
            }
        }
    }

    /// Call on every input change. Emits `typing-start` once per burst.
    pub fn keystroke(&mut self) {
        if self.typing.keystroke(Instant::now()) {
            self.emit_typing(true);
        }
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    pub fn flush_typing(&mut self) {
        if self.typing.expire(Instant::now()) {
            self.emit_typing(false);
        }
    }

    /// Waits for the next realtime event or the typing deadline, whichever
    /// comes first. Returns false once the realtime channel is closed.
    pub async fn pump(&mut self, inbound: &mut mpsc::UnboundedReceiver<ServerEvent>) -> bool {
        let deadline = self.typing.deadline();
        tokio::select! {
            event = inbound.recv() => match event {
                Some(event) => {
                    self.handle_event(event);
                    true
                }
                None => false,
            },
            _ = quiet_elapsed(deadline) => {
                self.flush_typing();
                true
            }
        }
    }

    pub fn close(mut self) {
        self.typing.reset();
        self.emit_typing(false);
    }

    fn emit_typing(&self, is_typing: bool) {
        let (match_id, user_id) = (self.match_id, self.user_id);
        self.notify.emit(if is_typing {
            ClientEvent::TypingStart { match_id, user_id }
        } else {
            ClientEvent::TypingStop { match_id, user_id }
        });
    }

    fn draft(&self, id: Uuid, text: Option<String>, location: Option<Location>) -> Message {
        Message {
            id,
            match_id: self.match_id,
            sender_id: self.user_id,
            message_type: if location.is_some() {
                MessageType::Location
            } else {
                MessageType::Text
            },
            message: text,
            location,
            timestamp: OffsetDateTime::now_utc(),
            read: false,
        }
    }

    fn entry_mut(&mut self, id: Uuid) -> Option<&mut ChatEntry> {
        self.entries.iter_mut().find(|e| e.message.id == id)
    }

    async fn persist_entry(&mut self, id: Uuid) -> ChatResult<()> {
        let Some(entry) = self.entry(id) else {
            return Err(ChatError::NotFound(format!("message {id}")));
        };
        let req = SendMessageRequest {
            match_id: self.match_id,
            id: Some(id),
            message: entry.message.message.clone(),
            message_type: entry.message.message_type,
            location: entry.message.location,
        };

        match self.persist.send_message(req).await {
            Ok(saved) => {
                self.merge(saved, Source::Store);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%id, %error, "message not persisted");
                if let Some(entry) = self.entry_mut(id) {
                    entry.delivery = Delivery::Failed;
                }
                self.notices.push(Notice::SendFailed { id, error: error.clone() });
                Err(error)
            }
        }
    }

    /// Upserts by id. The store copy is authoritative; a realtime copy of a
    /// known message only contributes its read flag. Returns true on insert.
    fn merge(&mut self, message: Message, source: Source) -> bool {
        if let Some(entry) = self.entry_mut(message.id) {
            match source {
                Source::Store => {
                    let read = entry.message.read || message.read;
                    entry.message = message;
                    entry.message.read = read;
                    entry.delivery = Delivery::Confirmed;
                    self.entries.sort_by_key(|e| e.message.timestamp);
                }
                Source::Realtime | Source::Local => entry.message.read |= message.read,
            }
            return false;
        }

        let entry = ChatEntry {
            is_own: message.sender_id == self.user_id,
            delivery: match source {
                Source::Local => Delivery::Pending,
                Source::Realtime | Source::Store => Delivery::Confirmed,
            },
            message,
        };
        let at = self
            .entries
            .partition_point(|e| e.message.timestamp <= entry.message.timestamp);
        self.entries.insert(at, entry);
        true
    }
}

fn counterpart(history: &ChatHistory, user_id: Uuid) -> Option<Uuid> {
    history
        .participants
        .iter()
        .copied()
        .find(|&p| p != user_id)
        .or_else(|| history.messages.iter().map(|m| m.sender_id).find(|&s| s != user_id))
}

async fn quiet_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
