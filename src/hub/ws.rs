use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;

use crate::{auth::AuthUser, protocol::ClientEvent};

use super::{Hub, dispatch};

#[debug_handler(state = crate::AppState)]
pub async fn hub_ws(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    user: AuthUser,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| serve_connection(stream, hub, db_pool, user).await)
}

async fn serve_connection(stream: WebSocket, hub: Arc<Hub>, db_pool: SqlitePool, user: AuthUser) {
    let (conn, mut outbox) = hub.connect(user.user_id);
    let (mut sender, mut receiver) = stream.split();
    tracing::info!(%conn, user_id = %user.user_id, "realtime connection opened");

    let mut outbound_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "unserializable server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let inbound = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let event: ClientEvent = match msg {
                Message::Text(text) => match serde_json::from_str(text.as_str()) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::debug!(%conn, error = %err, "unparseable realtime event");
                        continue;
                    }
                },
                Message::Close(_) => break,
                _ => continue,
            };

            dispatch(&hub, &db_pool, conn, event).await;
        }
    };

    tokio::select! {
        _ = inbound => outbound_task.abort(),
        _ = &mut outbound_task => {},
    };

    hub.disconnect(conn);
    tracing::info!(%conn, user_id = %user.user_id, "realtime connection closed");
}
