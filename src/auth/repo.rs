use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Username or email already belongs to another record.
    #[error("username or email already exists")]
    Conflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            StoreError::Conflict
        } else {
            StoreError::Backend(err.into())
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Credential store. Every call touches a single user record.
///
/// Token arguments are digests, never raw tokens. Mutations only write the
/// columns they own and carry their own precondition, so a caller holding a
/// stale `User` cannot overwrite a concurrent change.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    /// Replaces the account token digest, but only while the password hash is
    /// still `expected_hash`. Returns `false` if the password changed meanwhile.
    async fn rotate_account_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        digest: &str,
    ) -> Result<bool, StoreError>;
    /// Consumes a verification token. `None` if no record holds it.
    async fn mark_verified(&self, digest: &str) -> Result<Option<User>, StoreError>;
    /// Opens a reset window. Returns `false` if the user no longer exists.
    async fn set_reset(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> Result<bool, StoreError>;
    /// Consumes a live reset token: stores the new password hash and account
    /// token digest and closes the window. `None` if the token is unknown,
    /// expired or already spent.
    async fn complete_reset(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        account_digest: &str,
    ) -> Result<Option<Uuid>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError>;
    async fn find_by_verification_token(&self, digest: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_account_token(&self, digest: &str) -> Result<Option<User>, StoreError>;
    /// Only matches while the reset window is still open at `now`.
    async fn find_by_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, email_verified, \
     email_verification_token, account_token, reset_password_token, \
     reset_password_expires, created_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, email_verified,
                               email_verification_token, account_token,
                               reset_password_token, reset_password_expires, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(&user.email_verification_token)
        .bind(&user.account_token)
        .bind(&user.reset_password_token)
        .bind(user.reset_password_expires)
        .bind(user.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn rotate_account_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        digest: &str,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            "UPDATE users SET account_token = $3 WHERE id = $1 AND password_hash = $2",
        )
        .bind(id)
        .bind(expected_hash)
        .bind(digest)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn mark_verified(&self, digest: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET email_verified = TRUE, email_verification_token = NULL \
             WHERE email_verification_token = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(digest)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn set_reset(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE users
            SET reset_password_token = $2,
                reset_password_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(digest)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn complete_reset(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        account_digest: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE users
            SET password_hash = $3,
                account_token = $4,
                reset_password_token = NULL,
                reset_password_expires = NULL
            WHERE reset_password_token = $1 AND reset_password_expires > $2
            RETURNING id
            "#,
        )
        .bind(digest)
        .bind(now)
        .bind(password_hash)
        .bind(account_digest)
        .fetch_optional(&self.db)
        .await?;
        Ok(id)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email", email).await
    }

    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 LIMIT 1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_verification_token(&self, digest: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email_verification_token", digest).await
    }

    async fn find_by_account_token(&self, digest: &str) -> Result<Option<User>, StoreError> {
        self.find_one("account_token", digest).await
    }

    async fn find_by_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE reset_password_token = $1 AND reset_password_expires > $2"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(digest)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}
