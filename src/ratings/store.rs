use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{ChatError, ChatResult, chat::Pagination, db, matches};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRating {
    pub ratee_id: Uuid,
    pub match_id: Uuid,
    pub score: u8,
    pub review: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: Uuid,
    pub match_id: Uuid,
    pub rater_id: Uuid,
    pub rater_name: String,
    pub ratee_id: Uuid,
    pub score: u8,
    pub review: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarCount {
    pub star: u8,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub avg: f64,
    pub count: u64,
    pub breakdown: Vec<StarCount>,
}

pub async fn rate_user(db_pool: &SqlitePool, rater_id: Uuid, new: NewRating) -> ChatResult<Rating> {
    if !(1..=5).contains(&new.score) {
        return Err(ChatError::validation("score must be between 1 and 5"));
    }

    let participants = matches::get_participants(db_pool, new.match_id).await?;
    if participants.other(rater_id) != Some(new.ratee_id) {
        return Err(ChatError::validation("only your match partner can be rated"));
    }

    let review = new.review.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty());
    let id = Uuid::now_v7();
    let created_at = db::now();

    let inserted = sqlx::query(
        "INSERT INTO ratings (id,match_id,rater_id,ratee_id,score,review,created_at) VALUES (?,?,?,?,?,?,?) \
         ON CONFLICT(match_id,rater_id) DO NOTHING",
    )
    .bind(id.to_string())
    .bind(new.match_id.to_string())
    .bind(rater_id.to_string())
    .bind(new.ratee_id.to_string())
    .bind(new.score as i64)
    .bind(&review)
    .bind(db::to_millis(created_at))
    .execute(db_pool)
    .await?
    .rows_affected();
    if inserted == 0 {
        return Err(ChatError::validation("you already rated this match"));
    }

    let (rater_name,): (String,) = sqlx::query_as("SELECT name FROM users WHERE id=?")
        .bind(rater_id.to_string())
        .fetch_one(db_pool)
        .await?;

    Ok(Rating {
        id,
        match_id: new.match_id,
        rater_id,
        rater_name,
        ratee_id: new.ratee_id,
        score: new.score,
        review,
        created_at,
    })
}

pub async fn ratings_for(db_pool: &SqlitePool, ratee_id: Uuid, pagination: Pagination) -> ChatResult<Vec<Rating>> {
    let limit = pagination.limit.unwrap_or(10).clamp(1, 100);
    let offset = (pagination.page.unwrap_or(1).max(1) - 1).saturating_mul(limit);

    let rows: Vec<(String, String, String, String, i64, Option<String>, i64)> = sqlx::query_as(
        "SELECT ratings.id,ratings.match_id,ratings.rater_id,users.name,ratings.score,ratings.review,ratings.created_at \
         FROM ratings JOIN users ON users.id=ratings.rater_id \
         WHERE ratings.ratee_id=? ORDER BY ratings.created_at DESC, ratings.id DESC LIMIT ? OFFSET ?",
    )
    .bind(ratee_id.to_string())
    .bind(i64::from(limit))
    .bind(i64::from(offset))
    .fetch_all(db_pool)
    .await?;

    rows.into_iter()
        .map(|(id, match_id, rater_id, rater_name, score, review, created_at)| {
            Ok(Rating {
                id: db::parse_id(&id)?,
                match_id: db::parse_id(&match_id)?,
                rater_id: db::parse_id(&rater_id)?,
                rater_name,
                ratee_id,
                score: score.clamp(1, 5) as u8,
                review,
                created_at: db::from_millis(created_at),
            })
        })
        .collect()
}

pub async fn summary_for(db_pool: &SqlitePool, ratee_id: Uuid) -> ChatResult<RatingSummary> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT score,COUNT(*) FROM ratings WHERE ratee_id=? GROUP BY score")
            .bind(ratee_id.to_string())
            .fetch_all(db_pool)
            .await?;

    let breakdown: Vec<StarCount> = (1..=5u8)
        .rev()
        .map(|star| StarCount {
            star,
            count: rows
                .iter()
                .find(|(score, _)| *score == i64::from(star))
                .map_or(0, |(_, count)| *count as u64),
        })
        .collect();

    let count: u64 = breakdown.iter().map(|b| b.count).sum();
    let total: u64 = breakdown.iter().map(|b| b.count * u64::from(b.star)).sum();
    let avg = if count == 0 {
        0.0
    } else {
        (total as f64 / count as f64 * 10.0).round() / 10.0
    };

    Ok(RatingSummary { avg, count, breakdown })
}
