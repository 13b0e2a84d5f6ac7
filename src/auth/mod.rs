mod token;

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppError, ChatError, ChatResult, db};

pub use token::{hash_token, issue_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn require_admin(&self) -> ChatResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ChatError::Forbidden("admin only".to_owned()))
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    SqlitePool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let db_pool = SqlitePool::from_ref(state);
        Ok(authenticate(&db_pool, &token).await?)
    }
}

/// `Authorization: Bearer` first, then `?token=` for websocket upgrades.
fn bearer_token(parts: &Parts) -> ChatResult<String> {
    if let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        let header = header
            .to_str()
            .map_err(|_| ChatError::Authentication("unreadable Authorization header".to_owned()))?;
        return header
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChatError::Authentication("expected a Bearer credential".to_owned()));
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ChatError::Authentication("missing bearer credential".to_owned()))
}

pub async fn authenticate(db_pool: &SqlitePool, token: &str) -> ChatResult<AuthUser> {
    let row: Option<(String, bool)> = sqlx::query_as(
        "SELECT users.id,users.is_admin FROM auth_tokens JOIN users ON users.id=auth_tokens.user_id WHERE auth_tokens.token_hash=?",
    )
    .bind(hash_token(token))
    .fetch_optional(db_pool)
    .await?;

    let Some((user_id, is_admin)) = row else {
        return Err(ChatError::Authentication("unknown bearer credential".to_owned()));
    };

    Ok(AuthUser {
        user_id: db::parse_id(&user_id)?,
        is_admin,
    })
}

pub async fn create_user(db_pool: &SqlitePool, name: &str, is_admin: bool) -> ChatResult<Uuid> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("user name must not be empty"));
    }

    let user_id = Uuid::now_v7();
    sqlx::query("INSERT INTO users (id,name,is_admin,created_at) VALUES (?,?,?,?)")
        .bind(user_id.to_string())
        .bind(name)
        .bind(is_admin)
        .bind(db::to_millis(db::now()))
        .execute(db_pool)
        .await?;

    tracing::info!(%user_id, name, is_admin, "user created");
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn bearer_header_wins_over_query() {
        let parts = parts(
            Request::builder()
                .uri("/ws?token=from-query")
                .header("Authorization", "Bearer from-header")
                .body(())
                .unwrap(),
        );
        assert_eq!(bearer_token(&parts).unwrap(), "from-header");
    }

    #[test]
    fn query_token_is_accepted_without_header() {
        let parts = parts(Request::builder().uri("/ws?token=abc").body(()).unwrap());
        assert_eq!(bearer_token(&parts).unwrap(), "abc");
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let parts = parts(
            Request::builder()
                .uri("/api/chat")
                .header("Authorization", "Basic dXNlcjpwYXNz")
                .body(())
                .unwrap(),
        );
        assert!(matches!(bearer_token(&parts), Err(ChatError::Authentication(_))));
    }

    #[tokio::test]
    async fn issued_tokens_authenticate_their_user() {
        let db_pool = db::memory().await.unwrap();
        let user_id = create_user(&db_pool, "Wanjiru", false).await.unwrap();
        let token = issue_token(&db_pool, user_id).await.unwrap();

        let user = authenticate(&db_pool, &token).await.unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(!user.is_admin);
        assert!(user.require_admin().is_err());

        assert!(matches!(
            authenticate(&db_pool, "not-a-token").await,
            Err(ChatError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let db_pool = db::memory().await.unwrap();
        assert!(matches!(
            create_user(&db_pool, "   ", false).await,
            Err(ChatError::Validation(_))
        ));
    }
}
