use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo::{StoreError, UserStore};
use crate::auth::repo_types::User;

/// In-process store used when no database is configured, and by tests.
/// Enforces the same unique constraints as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_where<F>(&self, pred: F) -> Result<Option<User>, StoreError>
    where
        F: Fn(&User) -> bool + Send,
    {
        let users = self.users.read().await;
        Ok(users.values().find(|u| pred(u)).cloned())
    }
}

fn clashes(existing: &User, candidate: &User) -> bool {
    existing.id != candidate.id
        && (existing.username == candidate.username || existing.email == candidate.email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| clashes(u, user)) {
            return Err(StoreError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn rotate_account_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        digest: &str,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.password_hash == expected_hash => {
                u.account_token = digest.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_verified(&self, digest: &str) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let found = users
            .values_mut()
            .find(|u| u.email_verification_token.as_deref() == Some(digest));
        Ok(found.map(|u| {
            u.email_verified = true;
            u.email_verification_token = None;
            u.clone()
        }))
    }

    async fn set_reset(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let Some(u) = users.get_mut(&id) else {
            return Ok(false);
        };
        u.reset_password_token = Some(digest.to_string());
        u.reset_password_expires = Some(expires);
        Ok(true)
    }

    async fn complete_reset(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        account_digest: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut users = self.users.write().await;
        let found = users.values_mut().find(|u| {
            u.reset_password_token.as_deref() == Some(digest) && u.reset_window_open(now)
        });
        Ok(found.map(|u| {
            u.password_hash = password_hash.to_string();
            u.account_token = account_digest.to_string();
            u.clear_reset();
            u.id
        }))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.username == username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.email == email).await
    }

    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.username == username || u.email == email)
            .await
    }

    async fn find_by_verification_token(&self, digest: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.email_verification_token.as_deref() == Some(digest))
            .await
    }

    async fn find_by_account_token(&self, digest: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.account_token == digest).await
    }

    async fn find_by_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        self.find_where(|u| {
            u.reset_password_token.as_deref() == Some(digest) && u.reset_window_open(now)
        })
        .await
    }
}
