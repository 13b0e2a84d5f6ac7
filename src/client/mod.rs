//! Client side of a single chat: optimistic sends, history merge, typing
//! debounce and read receipts.
//!
//! The controller is transport-agnostic. [`Notify`] carries fire-and-forget
//! realtime events and [`Persist`] the REST round-trips; [`RealtimeClient`]
//! and [`HttpPersist`] are the production implementations.

mod realtime;
mod rest;
mod session;
mod typing;

use std::future::Future;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    ChatResult,
    protocol::{ChatHistory, ClientEvent, Message, SendMessageRequest},
};

pub use realtime::RealtimeClient;
pub use rest::HttpPersist;
pub use session::{ChatEntry, ChatSession, Delivery, Notice, SessionState};
pub use typing::{TYPING_QUIET, TypingDebouncer};

/// Outbound realtime events. Delivery is best-effort and never reported back.
pub trait Notify {
    fn emit(&self, event: ClientEvent);
}

impl Notify for mpsc::UnboundedSender<ClientEvent> {
    fn emit(&self, event: ClientEvent) {
        if self.send(event).is_err() {
            tracing::debug!("realtime channel closed, event dropped");
        }
    }
}

/// Durable chat operations against the message store.
pub trait Persist {
    fn load_chat(&self, match_id: Uuid) -> impl Future<Output = ChatResult<ChatHistory>> + Send;

    fn send_message(&self, req: SendMessageRequest) -> impl Future<Output = ChatResult<Message>> + Send;

    fn mark_read(&self, match_id: Uuid, message_ids: Vec<Uuid>) -> impl Future<Output = ChatResult<u64>> + Send;
}
