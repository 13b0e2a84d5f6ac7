mod store;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    auth::AuthUser,
    protocol::{ChatHistory, MarkReadRequest, MarkReadResponse, Message, SendMessageRequest},
};

pub use store::{
    ChatStats, ChatSummary, Pagination, append_message, chat_stats, list_chats, list_messages, load_chat,
    mark_read,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(user_chats))
        .route("/stats", get(stats))
        .route("/send", post(send))
        .route("/match/{match_id}", get(chat_for_match))
        .route("/{match_id}/read", put(read))
}

#[debug_handler(state = AppState)]
async fn user_chats(State(db_pool): State<SqlitePool>, user: AuthUser) -> AppResult<Json<Vec<ChatSummary>>> {
    Ok(Json(list_chats(&db_pool, user.user_id).await?))
}

#[debug_handler(state = AppState)]
async fn chat_for_match(
    Path(match_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
) -> AppResult<Json<ChatHistory>> {
    Ok(Json(load_chat(&db_pool, match_id, user.user_id, pagination).await?))
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<Message>> {
    Ok(Json(append_message(&db_pool, user.user_id, req).await?))
}

#[debug_handler(state = AppState)]
async fn read(
    Path(match_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
    Json(MarkReadRequest { message_ids }): Json<MarkReadRequest>,
) -> AppResult<Json<MarkReadResponse>> {
    let updated = mark_read(&db_pool, match_id, &message_ids, user.user_id).await?;
    Ok(Json(MarkReadResponse { updated }))
}

#[debug_handler(state = AppState)]
async fn stats(State(db_pool): State<SqlitePool>, user: AuthUser) -> AppResult<Json<ChatStats>> {
    Ok(Json(chat_stats(&db_pool, user.user_id).await?))
}
