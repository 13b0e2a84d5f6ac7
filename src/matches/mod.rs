pub mod registry;

use std::sync::Arc;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    auth::AuthUser,
    hub::{Hub, RoomKey},
    protocol::ServerEvent,
};

pub use registry::{
    Match, NewMatch, Participants, create_match, delete_match, get_match, get_participants, list_for_user,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(my_matches).post(new_match))
        .route("/{match_id}", delete(remove_match))
}

#[debug_handler(state = AppState)]
async fn my_matches(State(db_pool): State<SqlitePool>, user: AuthUser) -> AppResult<Json<Vec<Match>>> {
    Ok(Json(list_for_user(&db_pool, user.user_id).await?))
}

#[debug_handler(state = AppState)]
async fn new_match(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    user: AuthUser,
    Json(new): Json<NewMatch>,
) -> AppResult<(StatusCode, Json<Match>)> {
    let found = create_match(&db_pool, user.user_id, new).await?;

    for participant in found.participants().to_vec() {
        hub.broadcast(RoomKey::User(participant), ServerEvent::NewMatch(found.clone()));
    }

    Ok((StatusCode::CREATED, Json(found)))
}

#[debug_handler(state = AppState)]
async fn remove_match(
    Path(match_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    delete_match(&db_pool, match_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
