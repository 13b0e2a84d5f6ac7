use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use uuid::Uuid;

use super::Persist;
use crate::{
    ChatError, ChatResult,
    protocol::{ChatHistory, MarkReadRequest, MarkReadResponse, Message, SendMessageRequest},
};

/// [`Persist`] over the `/api/chat` REST routes.
#[derive(Debug, Clone)]
pub struct HttpPersist {
    http: Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpPersist {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> ChatResult<T> {
        let resp = req.bearer_auth(&self.token).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

async fn check(resp: Response) -> ChatResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };

    Err(error_for(status, &message))
}

/// Rebuilds the server's `ChatError` from its rendered message, undoing the
/// variant's display wording so it is not applied twice.
fn error_for(status: StatusCode, message: &str) -> ChatError {
    let detail = |prefix: &str, suffix: &str| {
        let inner = message.strip_prefix(prefix).unwrap_or(message);
        inner.strip_suffix(suffix).unwrap_or(inner).to_owned()
    };

    match status {
        StatusCode::NOT_FOUND => ChatError::NotFound(detail("", " not found")),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChatError::Validation(message.to_owned()),
        StatusCode::UNAUTHORIZED => ChatError::Authentication(detail("authentication failed: ", "")),
        StatusCode::FORBIDDEN => ChatError::Forbidden(detail("forbidden: ", "")),
        _ => ChatError::Transient(detail("temporarily unavailable: ", "")),
    }
}

impl Persist for HttpPersist {
    async fn load_chat(&self, match_id: Uuid) -> ChatResult<ChatHistory> {
        self.call(self.http.get(self.url(&format!("/api/chat/match/{match_id}"))))
            .await
    }

    async fn send_message(&self, req: SendMessageRequest) -> ChatResult<Message> {
        self.call(self.http.post(self.url("/api/chat/send")).json(&req)).await
    }

    async fn mark_read(&self, match_id: Uuid, message_ids: Vec<Uuid>) -> ChatResult<u64> {
        let body = MarkReadRequest { message_ids };
        let resp: MarkReadResponse = self
            .call(self.http.put(self.url(&format!("/api/chat/{match_id}/read"))).json(&body))
            .await?;
        Ok(resp.updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;

    #[test]
    fn server_errors_come_back_unchanged() {
        let sent = [
            ChatError::NotFound("match 42".to_owned()),
            ChatError::validation("message must not be empty"),
            ChatError::Authentication("unknown bearer credential".to_owned()),
            ChatError::Forbidden("not a participant of this match".to_owned()),
            ChatError::Transient("database is locked".to_owned()),
        ];
        for err in sent {
            let status = AppError::from(err.clone()).status();
            let received = error_for(status, &err.to_string());
            assert_eq!(received.to_string(), err.to_string());
            assert_eq!(received, err);
        }
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let persist = HttpPersist::new("http://localhost:5000/", "token");
        assert_eq!(persist.url("/api/chat/send"), "http://localhost:5000/api/chat/send");
    }
}
