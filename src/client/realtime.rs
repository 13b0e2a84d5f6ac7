use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message as Frame,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};

use crate::{
    ChatError, ChatResult,
    protocol::{ClientEvent, ServerEvent},
};

/// One realtime connection to the hub.
///
/// `outgoing` doubles as the session's [`super::Notify`]. Dropping the client
/// closes the socket.
pub struct RealtimeClient {
    pub outgoing: mpsc::UnboundedSender<ClientEvent>,
    pub incoming: mpsc::UnboundedReceiver<ServerEvent>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// `url` is the hub endpoint, e.g. `ws://localhost:5000/ws`.
    pub async fn connect(url: &str, token: &str) -> ChatResult<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|err| ChatError::Transient(err.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ChatError::Authentication("malformed token".to_owned()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| ChatError::Transient(err.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<ServerEvent>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = outgoing_rx.recv() => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::warn!(%err, "could not encode client event");
                                continue;
                            }
                        };
                        if sink.send(Frame::text(text)).await.is_err() {
                            break;
                        }
                    }
                    frame = stream.next() => match frame {
                        Some(Ok(Frame::Text(text))) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if incoming_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(err) => tracing::debug!(%err, "ignoring unrecognised frame"),
                        },
                        Some(Ok(Frame::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                }
            }
            let _ = sink.close().await;
        });

        Ok(Self { outgoing, incoming, task })
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}
