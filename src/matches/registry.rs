use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{ChatError, ChatResult, db};

const DEFAULT_COMPATIBILITY: u8 = 70;

/// Two travellers bound together. Immutable once created; only deletion
/// changes it, and deletion takes the chat history with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub destination: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    pub compatibility_score: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub matched_at: OffsetDateTime,
}

impl Match {
    pub fn participants(&self) -> Participants {
        Participants {
            a: self.participant_a,
            b: self.participant_b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub a: Uuid,
    pub b: Uuid,
}

impl Participants {
    pub fn contains(&self, user_id: Uuid) -> bool {
        self.a == user_id || self.b == user_id
    }

    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if self.a == user_id {
            Some(self.b)
        } else if self.b == user_id {
            Some(self.a)
        } else {
            None
        }
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        vec![self.a, self.b]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    pub partner_id: Uuid,
    pub destination: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    pub compatibility_score: Option<u8>,
}

type MatchRow = (String, String, String, String, Option<i64>, i64, i64);

const MATCH_COLUMNS: &str =
    "id,participant_a,participant_b,destination,date,compatibility_score,matched_at";

fn from_row((id, a, b, destination, date, score, matched_at): MatchRow) -> ChatResult<Match> {
    Ok(Match {
        id: db::parse_id(&id)?,
        participant_a: db::parse_id(&a)?,
        participant_b: db::parse_id(&b)?,
        destination,
        date: date.map(db::from_millis),
        compatibility_score: score.clamp(0, 100) as u8,
        matched_at: db::from_millis(matched_at),
    })
}

pub async fn create_match(db_pool: &SqlitePool, user_id: Uuid, new: NewMatch) -> ChatResult<Match> {
    if new.partner_id == user_id {
        return Err(ChatError::validation("cannot match a user with themselves"));
    }

    let compatibility_score = new.compatibility_score.unwrap_or(DEFAULT_COMPATIBILITY);
    if compatibility_score > 100 {
        return Err(ChatError::validation("compatibility score must be between 0 and 100"));
    }

    let destination = new.destination.trim();
    if destination.is_empty() {
        return Err(ChatError::validation("destination must not be empty"));
    }

    if sqlx::query("SELECT 1 FROM users WHERE id=?")
        .bind(new.partner_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .is_none()
    {
        return Err(ChatError::NotFound(format!("user {}", new.partner_id)));
    }

    if sqlx::query(
        "SELECT 1 FROM matches WHERE (participant_a=? AND participant_b=?) OR (participant_a=? AND participant_b=?)",
    )
    .bind(user_id.to_string())
    .bind(new.partner_id.to_string())
    .bind(new.partner_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(db_pool)
    .await?
    .is_some()
    {
        return Err(ChatError::validation("these users are already matched"));
    }

    let found = Match {
        id: Uuid::now_v7(),
        participant_a: user_id,
        participant_b: new.partner_id,
        destination: destination.to_owned(),
        date: new.date,
        compatibility_score,
        matched_at: db::now(),
    };

    sqlx::query(
        "INSERT INTO matches (id,participant_a,participant_b,destination,date,compatibility_score,matched_at) VALUES (?,?,?,?,?,?,?)",
    )
    .bind(found.id.to_string())
    .bind(found.participant_a.to_string())
    .bind(found.participant_b.to_string())
    .bind(&found.destination)
    .bind(found.date.map(db::to_millis))
    .bind(found.compatibility_score as i64)
    .bind(db::to_millis(found.matched_at))
    .execute(db_pool)
    .await
    .map_err(|err| {
        // lost a race with a concurrent create of the same pair
        if db::is_unique_violation(&err) {
            ChatError::validation("these users are already matched")
        } else {
            err.into()
        }
    })?;

    tracing::info!(match_id = %found.id, a = %found.participant_a, b = %found.participant_b, "match created");
    Ok(found)
}

pub async fn get_match(db_pool: &SqlitePool, match_id: Uuid) -> ChatResult<Match> {
    let row: Option<MatchRow> = sqlx::query_as(&format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id=?"))
        .bind(match_id.to_string())
        .fetch_optional(db_pool)
        .await?;

    match row {
        Some(row) => from_row(row),
        None => Err(ChatError::NotFound(format!("match {match_id}"))),
    }
}

pub async fn get_participants(db_pool: &SqlitePool, match_id: Uuid) -> ChatResult<Participants> {
    Ok(get_match(db_pool, match_id).await?.participants())
}

pub async fn list_for_user(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<Vec<Match>> {
    let rows: Vec<MatchRow> = sqlx::query_as(&format!(
        "SELECT {MATCH_COLUMNS} FROM matches WHERE participant_a=? OR participant_b=? ORDER BY matched_at DESC, id DESC"
    ))
    .bind(user_id.to_string())
    .bind(user_id.to_string())
    .fetch_all(db_pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

pub async fn delete_match(db_pool: &SqlitePool, match_id: Uuid) -> ChatResult<()> {
    let result = sqlx::query("DELETE FROM matches WHERE id=?")
        .bind(match_id.to_string())
        .execute(db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ChatError::NotFound(format!("match {match_id}")));
    }

    tracing::info!(%match_id, "match deleted");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::create_user;

    pub(crate) async fn matched_pair(db_pool: &SqlitePool) -> (Uuid, Uuid, Match) {
        let u1 = create_user(db_pool, "Amani", false).await.unwrap();
        let u2 = create_user(db_pool, "Baraka", false).await.unwrap();
        let found = create_match(
            db_pool,
            u1,
            NewMatch {
                partner_id: u2,
                destination: "Diani".to_owned(),
                date: None,
                compatibility_score: Some(88),
            },
        )
        .await
        .unwrap();
        (u1, u2, found)
    }

    #[tokio::test]
    async fn created_match_round_trips() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;

        let fetched = get_match(&db_pool, found.id).await.unwrap();
        assert_eq!(fetched, found);

        let participants = get_participants(&db_pool, found.id).await.unwrap();
        assert!(participants.contains(u1));
        assert_eq!(participants.other(u1), Some(u2));
        assert_eq!(participants.other(u2), Some(u1));
        assert_eq!(participants.other(Uuid::now_v7()), None);
    }

    #[tokio::test]
    async fn self_match_and_duplicates_are_rejected() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, _) = matched_pair(&db_pool).await;

        let self_match = NewMatch {
            partner_id: u1,
            destination: "Lamu".to_owned(),
            date: None,
            compatibility_score: None,
        };
        assert!(matches!(
            create_match(&db_pool, u1, self_match).await,
            Err(ChatError::Validation(_))
        ));

        let reversed = NewMatch {
            partner_id: u1,
            destination: "Lamu".to_owned(),
            date: None,
            compatibility_score: None,
        };
        assert!(matches!(
            create_match(&db_pool, u2, reversed).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_creates_of_one_pair_yield_one_match() {
        let db_pool = db::memory().await.unwrap();
        let u1 = create_user(&db_pool, "Amani", false).await.unwrap();
        let u2 = create_user(&db_pool, "Baraka", false).await.unwrap();
        let to = |partner_id| NewMatch {
            partner_id,
            destination: "Zanzibar".to_owned(),
            date: None,
            compatibility_score: None,
        };

        let (a, b) = tokio::join!(
            create_match(&db_pool, u1, to(u2)),
            create_match(&db_pool, u2, to(u1)),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let lost = if a.is_ok() { b } else { a };
        assert!(matches!(lost, Err(ChatError::Validation(_))));
        assert_eq!(list_for_user(&db_pool, u1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_match_is_not_found() {
        let db_pool = db::memory().await.unwrap();
        assert!(matches!(
            get_participants(&db_pool, Uuid::now_v7()).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            delete_match(&db_pool, Uuid::now_v7()).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_covers_both_sides() {
        let db_pool = db::memory().await.unwrap();
        let (u1, u2, found) = matched_pair(&db_pool).await;

        assert_eq!(list_for_user(&db_pool, u1).await.unwrap(), vec![found.clone()]);
        assert_eq!(list_for_user(&db_pool, u2).await.unwrap(), vec![found]);
        assert!(list_for_user(&db_pool, Uuid::now_v7()).await.unwrap().is_empty());
    }
}
