use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Server-side record of an issued refresh token. `id` doubles as the token's `jti`.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 hex digest of the encoded token
    pub token_hash: String,
    pub remember_me: bool,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new_with_id(
        id: Uuid,
        user_id: Uuid,
        token: &str,
        remember_me: bool,
        expires_in_days: i64,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            user_id,
            token_hash: Self::hash_token(token),
            remember_me,
            expires_at: now + Duration::days(expires_in_days),
            revoked: false,
            created_at: now,
        }
    }

    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn matches(&self, token: &str) -> bool {
        self.token_hash == Self::hash_token(token)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Not expired and not revoked
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.revoked
    }
}
