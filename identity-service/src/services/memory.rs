//! In-process `CredentialStore` for tests and local runs without Postgres.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::database::{CredentialStore, StoreError};
use crate::models::{RefreshToken, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    tables: Mutex<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("credential store lock poisoned")))
    }

    fn user_mut(tables: &mut Tables, user_id: Uuid) -> Result<&mut User, StoreError> {
        tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("user {} not found", user_id)))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        if let Some(google_id) = &user.google_id {
            if tables
                .users
                .values()
                .any(|u| u.google_id.as_ref() == Some(google_id))
            {
                return Err(StoreError::Conflict("users_google_id_key".to_string()));
            }
        }

        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn mark_verified(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let user = Self::user_mut(&mut tables, user_id)?;
        user.verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn link_google_identity(
        &self,
        user_id: Uuid,
        google_id: &str,
        clear_password: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        if tables
            .users
            .values()
            .any(|u| u.id != user_id && u.google_id.as_deref() == Some(google_id))
        {
            return Err(StoreError::Conflict("users_google_id_key".to_string()));
        }

        let user = Self::user_mut(&mut tables, user_id)?;
        user.google_id = Some(google_id.to_string());
        user.verified = true;
        if clear_password {
            user.password_hash = None;
        }
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn add_experience(&self, user_id: Uuid, delta: i64) -> Result<i64, StoreError> {
        let mut tables = self.lock()?;
        let user = Self::user_mut(&mut tables, user_id)?;
        user.experience += delta;
        user.updated_at = Utc::now();
        Ok(user.experience)
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.refresh_tokens.contains_key(&token.id) {
            return Err(StoreError::Conflict("refresh_tokens_pkey".to_string()));
        }
        tables.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, id: Uuid) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.lock()?.refresh_tokens.get(&id).cloned())
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        match tables.refresh_tokens.get_mut(&id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        new_token: &RefreshToken,
    ) -> Result<bool, StoreError> {
        // One lock guard covers both writes
        let mut tables = self.lock()?;

        match tables.refresh_tokens.get_mut(&old_id) {
            Some(record) if !record.revoked => record.revoked = true,
            _ => return Ok(false),
        }

        tables.refresh_tokens.insert(new_token.id, new_token.clone());
        Ok(true)
    }

    async fn list_refresh_tokens(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, StoreError> {
        let tables = self.lock()?;
        let mut tokens: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let mut count = 0;
        for record in tables
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            record.revoked = true;
            count += 1;
        }
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
