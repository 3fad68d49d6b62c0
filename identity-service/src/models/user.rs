//! User accounts, owned by the credential store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Always stored lower-cased
    pub email: String,
    /// `None` for accounts created through Google
    pub password_hash: Option<String>,
    pub verified: bool,
    pub google_id: Option<String>,
    pub experience: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when an account is first created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub verified: bool,
    pub google_id: Option<String>,
}

impl User {
    /// Build an account row with a time-ordered id.
    pub fn new(new_user: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: new_user.name,
            email: normalize_email(&new_user.email),
            password_hash: new_user.password_hash,
            verified: new_user.verified,
            google_id: new_user.google_id,
            experience: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn profile(&self, active_sessions: usize) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            verified: self.verified,
            google_linked: self.google_id.is_some(),
            experience: self.experience,
            active_sessions,
            created_at: self.created_at,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub verified: bool,
    pub google_linked: bool,
    pub experience: i64,
    pub active_sessions: usize,
    pub created_at: DateTime<Utc>,
}
