use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        errors::{AuthError, AuthResult},
        password, tokens,
        repo::UserStore,
        repo_types::User,
    },
    mail::Mailer,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn link(base_url: &str, path: &str, token: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), path, token)
}

/// A user together with the raw account token to hand out as a cookie.
#[derive(Debug)]
pub struct SignedIn {
    pub user: User,
    pub account_token: String,
}

/// A stored signup. The account token is handed out even when the
/// verification mail could not be sent; `mail` carries that failure.
#[derive(Debug)]
pub struct Signup {
    pub signed: SignedIn,
    pub mail: AuthResult<()>,
}

/// Signup, login, email verification and password reset over one credential store.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    reset_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Arc<dyn UserStore>, mailer: Arc<dyn Mailer>, reset_ttl: Duration) -> Self {
        Self {
            store,
            mailer,
            reset_ttl,
        }
    }

    /// Hashes a new password and mints the account token that goes with it.
    /// Every password change rotates the account token.
    async fn new_credentials(plain: &str) -> AuthResult<(String, tokens::IssuedToken)> {
        let hash = password::hash_password_blocking(plain.to_string()).await?;
        Ok((hash, tokens::issue()?))
    }

    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        plain_password: &str,
        base_url: &str,
    ) -> AuthResult<Signup> {
        let username = username.trim();
        let email = normalize_email(email);

        if username.is_empty() || email.is_empty() || plain_password.is_empty() {
            return Err(AuthError::Validation("Please fill in all fields".into()));
        }
        if !is_valid_username(username) {
            return Err(AuthError::Validation(
                "Username must be 3-32 characters of letters, digits, '.', '_' or '-'".into(),
            ));
        }
        if !is_valid_email(&email) {
            return Err(AuthError::Validation("Invalid email".into()));
        }
        password::check_strength(plain_password).map_err(|m| AuthError::Validation(m.into()))?;

        if self
            .store
            .find_by_username_or_email(username, &email)
            .await?
            .is_some()
        {
            warn!(username = %username, email = %email, "signup conflict");
            return Err(AuthError::Conflict);
        }

        let verification = tokens::issue()?;
        let (password_hash, account) = Self::new_credentials(plain_password).await?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email,
            password_hash,
            email_verified: false,
            email_verification_token: Some(verification.digest),
            account_token: account.digest,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };

        // A concurrent signup can still win the race; the unique index reports it as Conflict.
        self.store.insert(&user).await?;
        info!(user_id = %user.id, username = %user.username, "user created");

        let text = format!(
            "Welcome! Please confirm your email address by opening the link below:\n\n\
             {}\n\n\
             If you did not sign up for this service, you can ignore this email.",
            link(base_url, "verify-email", &verification.raw)
        );
        let mail = self
            .mailer
            .send(&user.email, "Email Verification", &text)
            .await
            .map_err(AuthError::Mail);
        if mail.is_ok() {
            info!(user_id = %user.id, "verification email sent");
        }

        Ok(Signup {
            signed: SignedIn {
                user,
                account_token: account.raw,
            },
            mail,
        })
    }

    pub async fn verify_email(&self, token: &str) -> AuthResult<User> {
        if !tokens::is_well_formed(token) {
            warn!("malformed verification token");
            return Err(AuthError::InvalidToken);
        }
        let digest = tokens::digest(token);
        let user = match self.store.find_by_verification_token(&digest).await? {
            Some(u) => u,
            None => {
                warn!("unknown verification token");
                return Err(AuthError::InvalidToken);
            }
        };
        let confirmed = user
            .email_verification_token
            .as_deref()
            .is_some_and(|stored| tokens::matches(token, stored));
        if !confirmed {
            return Err(AuthError::InvalidToken);
        }

        // A concurrent request may have consumed the token since the lookup.
        let Some(user) = self.store.mark_verified(&digest).await? else {
            return Err(AuthError::InvalidToken);
        };
        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    /// `identifier` is tried as a username first, then as an email address.
    pub async fn login(&self, identifier: &str, plain_password: &str) -> AuthResult<SignedIn> {
        let identifier = identifier.trim();
        if identifier.is_empty() || plain_password.is_empty() {
            return Err(AuthError::Validation("Please fill in all fields".into()));
        }

        let user = match self.store.find_by_username(identifier).await? {
            Some(u) => Some(u),
            None => self.store.find_by_email(&normalize_email(identifier)).await?,
        };
        let Some(mut user) = user else {
            warn!("login for unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = password::verify_password_blocking(
            plain_password.to_string(),
            user.password_hash.clone(),
        )
        .await?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.email_verified {
            warn!(user_id = %user.id, "login before email verification");
            return Err(AuthError::EmailNotVerified);
        }

        // Only the digest is stored, so each login mints a fresh account token.
        // The rotation is refused if a reset changed the password after the
        // hash above was verified.
        let account = tokens::issue()?;
        if !self
            .store
            .rotate_account_token(user.id, &user.password_hash, &account.digest)
            .await?
        {
            warn!(user_id = %user.id, "password changed during login");
            return Err(AuthError::InvalidCredentials);
        }
        user.account_token = account.digest;
        info!(user_id = %user.id, "user logged in");

        Ok(SignedIn {
            user,
            account_token: account.raw,
        })
    }

    /// Resolves an account cookie to its user. Unknown or malformed tokens yield `None`.
    pub async fn authenticate(&self, account_token: &str) -> AuthResult<Option<User>> {
        if !tokens::is_well_formed(account_token) {
            return Ok(None);
        }
        let digest = tokens::digest(account_token);
        let user = self
            .store
            .find_by_account_token(&digest)
            .await?
            .filter(|u| tokens::matches(account_token, &u.account_token));
        if let Some(u) = &user {
            debug!(user_id = %u.id, "account token accepted");
        }
        Ok(user)
    }

    pub async fn forgot_password(&self, email: &str, base_url: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::Validation("Please fill in all fields".into()));
        }
        if !is_valid_email(&email) {
            return Err(AuthError::Validation("Invalid email".into()));
        }

        let Some(user) = self.store.find_by_email(&email).await? else {
            warn!(email = %email, "password reset for unknown email");
            return Err(AuthError::NotFound);
        };

        let reset = tokens::issue()?;
        let expires = OffsetDateTime::now_utc() + self.reset_ttl;
        if !self.store.set_reset(user.id, &reset.digest, expires).await? {
            return Err(AuthError::NotFound);
        }

        let text = format!(
            "Someone (hopefully you) asked to reset the password of your account.\n\n\
             Open the link below to choose a new password. It stays valid for {} minutes:\n\n\
             {}\n\n\
             If you did not request this, ignore this email and your password will stay unchanged.\n",
            self.reset_ttl.whole_minutes(),
            link(base_url, "reset-password", &reset.raw)
        );
        self.mailer
            .send(&user.email, "Password Reset", &text)
            .await
            .map_err(AuthError::Mail)?;
        info!(user_id = %user.id, "password reset email sent");
        Ok(())
    }

    /// Looks up the user owning a live reset token.
    pub async fn check_reset_token(&self, token: &str) -> AuthResult<User> {
        if !tokens::is_well_formed(token) {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        let digest = tokens::digest(token);
        let now = OffsetDateTime::now_utc();
        self.store
            .find_by_reset_token(&digest, now)
            .await?
            .filter(|u| {
                u.reset_window_open(now)
                    && u.reset_password_token
                        .as_deref()
                        .is_some_and(|stored| tokens::matches(token, stored))
            })
            .ok_or_else(|| {
                warn!("invalid or expired reset token");
                AuthError::InvalidOrExpiredToken
            })
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        if new_password.is_empty() {
            return Err(AuthError::Validation("Please fill in all fields".into()));
        }
        password::check_strength(new_password).map_err(|m| AuthError::Validation(m.into()))?;

        self.check_reset_token(token).await?;
        let (password_hash, account) = Self::new_credentials(new_password).await?;

        // The window is re-checked by the write itself, so two requests racing
        // on one token cannot both succeed.
        let completed = self
            .store
            .complete_reset(
                &tokens::digest(token),
                OffsetDateTime::now_utc(),
                &password_hash,
                &account.digest,
            )
            .await?;
        let Some(user_id) = completed else {
            warn!("reset token spent or expired during reset");
            return Err(AuthError::InvalidOrExpiredToken);
        };
        info!(user_id = %user_id, "password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryUserStore;
    use crate::auth::repo::StoreError;
    use crate::mail::testing::{FailingMailer, RecordingMailer};

    const BASE: &str = "http://localhost:8080";

    struct Harness {
        service: AuthService,
        store: Arc<MemoryUserStore>,
        mailer: Arc<RecordingMailer>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let service = AuthService::new(store.clone(), mailer.clone(), Duration::hours(1));
        Harness {
            service,
            store,
            mailer,
        }
    }

    async fn signed_up_and_verified(h: &Harness) -> User {
        h.service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .expect("signup");
        let token = h.mailer.last_token("/verify-email/").expect("token mailed");
        h.service.verify_email(&token).await.expect("verify")
    }

    #[test]
    fn email_and_username_rules() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@x.com"));
        assert!(is_valid_username("alice_01"));
        assert!(!is_valid_username("al"));
        assert!(!is_valid_username("<script>"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn link_joins_without_double_slash() {
        assert_eq!(link("http://h/", "verify-email", "t"), "http://h/verify-email/t");
        assert_eq!(link("http://h", "reset-password", "t"), "http://h/reset-password/t");
    }

    #[tokio::test]
    async fn signup_persists_hashed_secrets_and_mails_link() {
        let h = harness();
        let outcome = h
            .service
            .signup("alice", " A@X.com ", "Abcd1234!", BASE)
            .await
            .expect("signup");
        assert!(outcome.mail.is_ok());
        let signed = outcome.signed;

        let stored = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.email, "a@x.com");
        assert!(!stored.email_verified);
        assert_ne!(stored.password_hash, "Abcd1234!");
        assert!(password::verify_password("Abcd1234!", &stored.password_hash).unwrap());
        assert_ne!(stored.account_token, signed.account_token);
        assert_eq!(stored.account_token, tokens::digest(&signed.account_token));

        let mail = h.mailer.last().expect("mail sent");
        assert_eq!(mail.to, "a@x.com");
        assert_eq!(mail.subject, "Email Verification");
        assert!(mail.text.contains("http://localhost:8080/verify-email/"));
        let token = h.mailer.last_token("/verify-email/").unwrap();
        assert_eq!(
            stored.email_verification_token.as_deref(),
            Some(tokens::digest(&token).as_str())
        );
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts_without_mutation() {
        let h = harness();
        h.service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .unwrap();
        let before = h.store.find_by_username("alice").await.unwrap().unwrap();

        let err = h
            .service
            .signup("alice", "other@x.com", "Abcd1234!", BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));

        let err = h
            .service
            .signup("bob", "A@x.com", "Abcd1234!", BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));

        let after = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(before.account_token, after.account_token);
        assert_eq!(before.password_hash, after.password_hash);
        assert!(h.store.find_by_username("bob").await.unwrap().is_none());
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn signup_rejects_weak_password_and_bad_input() {
        let h = harness();
        for (u, e, p) in [
            ("alice", "a@x.com", "short"),
            ("alice", "a@x.com", "alllowercase1!"),
            ("alice", "not-an-email", "Abcd1234!"),
            ("a", "a@x.com", "Abcd1234!"),
            ("", "a@x.com", "Abcd1234!"),
        ] {
            let err = h.service.signup(u, e, p, BASE).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "{u} {e} {p}");
        }
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn signup_mail_failure_keeps_record() {
        let store = Arc::new(MemoryUserStore::new());
        let service = AuthService::new(store.clone(), Arc::new(FailingMailer), Duration::hours(1));

        let outcome = service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .expect("record stored");
        assert!(matches!(outcome.mail, Err(AuthError::Mail(_))));
        let stored = store.find_by_username("alice").await.unwrap().unwrap();
        assert!(!stored.email_verified);
        // The account token is still issued for the stored record.
        assert_eq!(
            stored.account_token,
            tokens::digest(&outcome.signed.account_token)
        );
    }

    #[tokio::test]
    async fn login_requires_verified_email() {
        let h = harness();
        h.service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .unwrap();

        let err = h.service.login("alice", "Abcd1234!").await.unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));

        let token = h.mailer.last_token("/verify-email/").unwrap();
        let verified = h.service.verify_email(&token).await.unwrap();
        assert!(verified.email_verified);
        assert!(verified.email_verification_token.is_none());

        let signed = h.service.login("alice", "Abcd1234!").await.unwrap();
        assert_eq!(signed.user.username, "alice");
        let who = h.service.authenticate(&signed.account_token).await.unwrap();
        assert_eq!(who.map(|u| u.username).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn verification_token_is_single_use() {
        let h = harness();
        h.service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .unwrap();
        let token = h.mailer.last_token("/verify-email/").unwrap();
        h.service.verify_email(&token).await.unwrap();

        let err = h.service.verify_email(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        let err = h.service.verify_email("garbage").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn login_by_email_and_bad_credentials() {
        let h = harness();
        signed_up_and_verified(&h).await;

        assert!(h.service.login("A@x.com", "Abcd1234!").await.is_ok());

        let err = h.service.login("alice", "Wrong1234!").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let err = h.service.login("nobody", "Abcd1234!").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn authenticate_ignores_unknown_and_malformed_tokens() {
        let h = harness();
        signed_up_and_verified(&h).await;
        assert!(h.service.authenticate("").await.unwrap().is_none());
        assert!(h
            .service
            .authenticate(&tokens::generate_token().unwrap())
            .await
            .unwrap()
            .is_none());
        // The stored digest itself is not a usable cookie.
        let stored = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert!(h
            .service
            .authenticate(&stored.account_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn forgot_password_unknown_email_is_not_found() {
        let h = harness();
        let err = h
            .service
            .forgot_password("ghost@x.com", BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_password_rotates_account_token() {
        let h = harness();
        signed_up_and_verified(&h).await;
        let old = h.service.login("alice", "Abcd1234!").await.unwrap();

        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        let mail = h.mailer.last().unwrap();
        assert_eq!(mail.subject, "Password Reset");
        let reset = h.mailer.last_token("/reset-password/").unwrap();

        let pending = h.store.find_by_username("alice").await.unwrap().unwrap();
        let expires = pending.reset_password_expires.unwrap();
        let ttl = expires - OffsetDateTime::now_utc();
        assert!(ttl > Duration::minutes(59) && ttl <= Duration::hours(1));

        assert!(h.service.check_reset_token(&reset).await.is_ok());
        h.service.reset_password(&reset, "Newpass123$").await.unwrap();

        let stored = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert!(stored.reset_password_token.is_none());
        assert!(stored.reset_password_expires.is_none());
        assert!(h
            .service
            .authenticate(&old.account_token)
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            h.service.login("alice", "Abcd1234!").await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
        assert!(h.service.login("alice", "Newpass123$").await.is_ok());

        // Reset tokens are single use.
        let err = h
            .service
            .reset_password(&reset, "Another123$")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn expired_or_unknown_reset_token_never_mutates() {
        let h = harness();
        signed_up_and_verified(&h).await;
        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        let reset = h.mailer.last_token("/reset-password/").unwrap();

        let user = h.store.find_by_username("alice").await.unwrap().unwrap();
        h.store
            .set_reset(
                user.id,
                &tokens::digest(&reset),
                OffsetDateTime::now_utc() - Duration::seconds(1),
            )
            .await
            .unwrap();
        let before = h.store.find_by_username("alice").await.unwrap().unwrap();

        let err = h
            .service
            .reset_password(&reset, "Newpass123$")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
        let err = h
            .service
            .reset_password(&tokens::generate_token().unwrap(), "Newpass123$")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));

        let after = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
        assert_eq!(before.account_token, after.account_token);
        assert_eq!(before.reset_password_token, after.reset_password_token);
    }

    #[tokio::test]
    async fn reset_password_rejects_weak_password() {
        let h = harness();
        signed_up_and_verified(&h).await;
        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        let reset = h.mailer.last_token("/reset-password/").unwrap();

        let err = h.service.reset_password(&reset, "weak").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        // The window is still open after a rejected attempt.
        assert!(h.service.check_reset_token(&reset).await.is_ok());
    }

    /// Wraps a store so that `find_by_username` hands out its snapshot only
    /// after a password reset has been committed behind it.
    struct ResetBehindLookup {
        inner: Arc<MemoryUserStore>,
        pending: std::sync::Mutex<Option<(String, String, String)>>,
    }

    #[async_trait::async_trait]
    impl UserStore for ResetBehindLookup {
        async fn insert(&self, user: &User) -> Result<(), StoreError> {
            self.inner.insert(user).await
        }
        async fn rotate_account_token(
            &self,
            id: Uuid,
            expected_hash: &str,
            digest: &str,
        ) -> Result<bool, StoreError> {
            self.inner.rotate_account_token(id, expected_hash, digest).await
        }
        async fn mark_verified(&self, digest: &str) -> Result<Option<User>, StoreError> {
            self.inner.mark_verified(digest).await
        }
        async fn set_reset(
            &self,
            id: Uuid,
            digest: &str,
            expires: OffsetDateTime,
        ) -> Result<bool, StoreError> {
            self.inner.set_reset(id, digest, expires).await
        }
        async fn complete_reset(
            &self,
            digest: &str,
            now: OffsetDateTime,
            password_hash: &str,
            account_digest: &str,
        ) -> Result<Option<Uuid>, StoreError> {
            self.inner
                .complete_reset(digest, now, password_hash, account_digest)
                .await
        }
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            let snapshot = self.inner.find_by_username(username).await?;
            let pending = self.pending.lock().unwrap().take();
            if let Some((digest, hash, account)) = pending {
                let done = self
                    .inner
                    .complete_reset(&digest, OffsetDateTime::now_utc(), &hash, &account)
                    .await?;
                assert!(done.is_some(), "reset behind lookup did not apply");
            }
            Ok(snapshot)
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_email(email).await
        }
        async fn find_by_username_or_email(
            &self,
            username: &str,
            email: &str,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_by_username_or_email(username, email).await
        }
        async fn find_by_verification_token(
            &self,
            digest: &str,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_by_verification_token(digest).await
        }
        async fn find_by_account_token(&self, digest: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_account_token(digest).await
        }
        async fn find_by_reset_token(
            &self,
            digest: &str,
            now: OffsetDateTime,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_by_reset_token(digest, now).await
        }
    }

    #[tokio::test]
    async fn login_racing_a_reset_cannot_restore_old_password() {
        let h = harness();
        signed_up_and_verified(&h).await;
        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        let reset = h.mailer.last_token("/reset-password/").unwrap();

        let new_hash = password::hash_password("Newpass123$").unwrap();
        let new_account = tokens::issue().unwrap();
        let racing = Arc::new(ResetBehindLookup {
            inner: h.store.clone(),
            pending: std::sync::Mutex::new(Some((
                tokens::digest(&reset),
                new_hash,
                new_account.digest.clone(),
            ))),
        });
        let service = AuthService::new(racing, h.mailer.clone(), Duration::hours(1));

        // The login verified the old password against a snapshot taken before the reset.
        let err = service.login("alice", "Abcd1234!").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let stored = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.account_token, new_account.digest);
        assert!(matches!(
            h.service.login("alice", "Abcd1234!").await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
        assert!(h.service.login("alice", "Newpass123$").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_resets_with_one_token_succeed_once() {
        let h = harness();
        signed_up_and_verified(&h).await;
        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        let reset = h.mailer.last_token("/reset-password/").unwrap();

        let (first, second) = tokio::join!(
            h.service.reset_password(&reset, "Newpass123$"),
            h.service.reset_password(&reset, "Other1234$"),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuthError::InvalidOrExpiredToken))));

        let winner = if results[0].is_ok() { "Newpass123$" } else { "Other1234$" };
        let loser = if results[0].is_ok() { "Other1234$" } else { "Newpass123$" };
        assert!(h.service.login("alice", winner).await.is_ok());
        assert!(matches!(
            h.service.login("alice", loser).await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn forgot_password_keeps_verification_state() {
        let h = harness();
        h.service
            .signup("alice", "a@x.com", "Abcd1234!", BASE)
            .await
            .unwrap();
        let verify = h.mailer.last_token("/verify-email/").unwrap();

        // Requesting a reset does not touch the verification columns.
        h.service.forgot_password("a@x.com", BASE).await.unwrap();
        h.service.verify_email(&verify).await.unwrap();
        h.service.forgot_password("a@x.com", BASE).await.unwrap();

        let stored = h.store.find_by_username("alice").await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert!(stored.email_verification_token.is_none());
        assert!(stored.reset_password_token.is_some());
    }
}
