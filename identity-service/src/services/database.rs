//! Durable storage for accounts and refresh-token records.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RefreshToken, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("conflict on {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::Conflict(
                    db.constraint().unwrap_or("unique constraint").to_string(),
                );
            }
        }
        StoreError::Backend(anyhow::anyhow!(err))
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// `email` must already be normalized
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;

    /// `StoreError::Conflict` when the email or Google id is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Attach a Google identity, marking the account verified. With
    /// `clear_password` the local password stops working.
    async fn link_google_identity(
        &self,
        user_id: Uuid,
        google_id: &str,
        clear_password: bool,
    ) -> Result<(), StoreError>;

    /// Returns the new total.
    async fn add_experience(&self, user_id: Uuid, delta: i64) -> Result<i64, StoreError>;

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    async fn find_refresh_token(&self, id: Uuid) -> Result<Option<RefreshToken>, StoreError>;

    /// `true` only if this call flipped the record from live to revoked.
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Revoke `old_id` and insert `new_token` atomically. `false` means the
    /// old record was already revoked and nothing was written.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError>;

    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError>;

    /// Returns how many live records were revoked.
    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_REFRESH_TOKEN: &str = r#"
    INSERT INTO refresh_tokens (id, user_id, token_hash, remember_me, expires_at, revoked, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE google_id = $1")
            .bind(google_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, verified, google_id, experience, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.verified)
        .bind(&user.google_id)
        .bind(user.experience)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET verified = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_google_identity(
        &self,
        user_id: Uuid,
        google_id: &str,
        clear_password: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET google_id = $2,
                verified = TRUE,
                password_hash = CASE WHEN $3 THEN NULL ELSE password_hash END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(google_id)
        .bind(clear_password)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_experience(&self, user_id: Uuid, delta: i64) -> Result<i64, StoreError> {
        let total: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET experience = experience + $2, updated_at = NOW() WHERE id = $1 RETURNING experience",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        total.ok_or_else(|| StoreError::Backend(anyhow::anyhow!("user {} not found", user_id)))
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        sqlx::query(INSERT_REFRESH_TOKEN)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.remember_me)
            .bind(token.expires_at)
            .bind(token.revoked)
            .bind(token.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, id: Uuid) -> Result<Option<RefreshToken>, StoreError> {
        Ok(
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Conditional revoke serializes concurrent rotations of the same record
        let revoked =
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(INSERT_REFRESH_TOKEN)
            .bind(new_token.id)
            .bind(new_token.user_id)
            .bind(&new_token.token_hash)
            .bind(new_token.remember_me)
            .bind(new_token.expires_at)
            .bind(new_token.revoked)
            .bind(new_token.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError> {
        Ok(sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }
}
