mod store;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppResult, AppState, auth::AuthUser, chat::Pagination};

pub use store::{NewRating, Rating, RatingSummary, StarCount, rate_user, ratings_for, summary_for};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(rate))
        .route("/user/{user_id}", get(user_ratings))
        .route("/user/{user_id}/summary", get(user_summary))
}

#[derive(Serialize)]
struct RatingsPage {
    ratings: Vec<Rating>,
}

#[debug_handler(state = AppState)]
async fn rate(
    State(db_pool): State<SqlitePool>,
    user: AuthUser,
    Json(new): Json<NewRating>,
) -> AppResult<(StatusCode, Json<Rating>)> {
    Ok((StatusCode::CREATED, Json(rate_user(&db_pool, user.user_id, new).await?)))
}

#[debug_handler(state = AppState)]
async fn user_ratings(
    Path(user_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
    State(db_pool): State<SqlitePool>,
    _user: AuthUser,
) -> AppResult<Json<RatingsPage>> {
    Ok(Json(RatingsPage {
        ratings: ratings_for(&db_pool, user_id, pagination).await?,
    }))
}

#[debug_handler(state = AppState)]
async fn user_summary(
    Path(user_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    _user: AuthUser,
) -> AppResult<Json<RatingSummary>> {
    Ok(Json(summary_for(&db_pool, user_id).await?))
}
