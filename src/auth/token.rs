use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{ChatResult, db};

/// Lowercase hex SHA-256; only hashes are stored.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Mints an opaque bearer token for `user_id`. The plaintext is returned
/// once and never persisted.
pub async fn issue_token(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<String> {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    sqlx::query("INSERT INTO auth_tokens (token_hash,user_id,created_at) VALUES (?,?,?)")
        .bind(hash_token(&token))
        .bind(user_id.to_string())
        .bind(db::to_millis(db::now()))
        .execute(db_pool)
        .await?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("safari");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("safari"));
        assert_ne!(hash, hash_token("Safari"));
    }
}
