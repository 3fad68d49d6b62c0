use std::sync::Arc;

use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::cache::{oauth_state_key, otp_key, EphemeralStore};
use super::database::{CredentialStore, StoreError};
use super::email::EmailProvider;
use super::error::ServiceError;
use super::google::{FederatedProfile, IdentityProvider};
use super::jwt::TokenCodec;
use crate::config::AuthSettings;
use crate::dtos::auth::{GoogleCallbackQuery, TokenPair};
use crate::models::user::normalize_email;
use crate::models::{NewUser, OAuthStateData, RefreshToken, User, UserProfile};
use crate::utils::password::{hash_password, verify_password, Password, PasswordHashString};
use crate::utils::random;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Result of a completed Google callback.
#[derive(Debug, Clone)]
pub struct GoogleLoginOutcome {
    pub tokens: TokenPair,
    pub is_new_user: bool,
}

/// Drives registration, verification, login, federated login and the
/// refresh-token lifecycle over injected collaborators.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn EphemeralStore>,
    tokens: Arc<dyn TokenCodec>,
    email: Arc<dyn EmailProvider>,
    identity: Arc<dyn IdentityProvider>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn EphemeralStore>,
        tokens: Arc<dyn TokenCodec>,
        email: Arc<dyn EmailProvider>,
        identity: Arc<dyn IdentityProvider>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            store,
            cache,
            tokens,
            email,
            identity,
            settings,
        }
    }

    /// Create an unverified account and email it a fresh OTP.
    #[tracing::instrument(skip_all)]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Name is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ServiceError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        let email = normalize_email(email);

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password(&Password::new(password.to_string()))?;

        let user = User::new(NewUser {
            name: name.to_string(),
            email: email.clone(),
            password_hash: Some(password_hash.into_string()),
            verified: false,
            google_id: None,
        });

        match self.store.insert_user(&user).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(ServiceError::EmailAlreadyRegistered),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, "User registered");

        self.issue_otp(&email).await
    }

    /// Confirm the emailed code, verify the account and start a session.
    #[tracing::instrument(skip_all)]
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<TokenPair, ServiceError> {
        let email = normalize_email(email);
        let key = otp_key(&email);

        let stored = self
            .cache
            .get(&key)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        if !bool::from(stored.as_bytes().ct_eq(code.as_bytes())) {
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        // Whoever removes the entry owns the code
        if !self.cache.delete(&key).await? {
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        self.store.mark_verified(user.id).await?;
        tracing::info!(user_id = %user.id, "Email verified");

        self.start_session(&user, false).await
    }

    /// Send a new code to an account still awaiting verification. Unknown
    /// and already verified emails succeed silently.
    #[tracing::instrument(skip_all)]
    pub async fn resend_otp(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        match self.store.find_user_by_email(&email).await? {
            Some(user) if !user.verified => {
                tracing::info!(user_id = %user.id, "Resending OTP");
                self.issue_otp(&email).await
            }
            _ => {
                tracing::debug!("OTP resend skipped");
                Ok(())
            }
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<TokenPair, ServiceError> {
        let email = normalize_email(email);

        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if !user.verified {
            tracing::info!(user_id = %user.id, "Login refused for unverified account");
            return Err(ServiceError::InvalidCredentials);
        }

        let hash = user
            .password_hash
            .clone()
            .ok_or(ServiceError::InvalidCredentials)?;

        verify_password(
            &Password::new(password.to_string()),
            &PasswordHashString::new(hash),
        )
        .map_err(|_| ServiceError::InvalidCredentials)?;

        tracing::info!(user_id = %user.id, remember_me, "User logged in");

        self.start_session(&user, remember_me).await
    }

    /// Begin the Google flow; returns the consent-page URL.
    #[tracing::instrument(skip_all)]
    pub async fn google_login(&self) -> Result<String, ServiceError> {
        let state = random::random_url_token(self.settings.oauth_state_length);
        let verifier = random::generate_pkce_verifier();
        let challenge = random::pkce_challenge(&verifier);

        let data = serde_json::to_string(&OAuthStateData::new(verifier))
            .map_err(|e| ServiceError::Internal(e.into()))?;

        self.cache
            .set(&oauth_state_key(&state), &data, self.settings.oauth_state_ttl)
            .await?;

        Ok(self.identity.authorization_url(&state, &challenge))
    }

    #[tracing::instrument(skip_all)]
    pub async fn google_callback(
        &self,
        params: GoogleCallbackQuery,
    ) -> Result<GoogleLoginOutcome, ServiceError> {
        // A returned state is spent even when the provider reports an error
        let state_data = match params.state.as_deref().filter(|s| !s.is_empty()) {
            Some(state) => self.consume_oauth_state(state).await?,
            None => None,
        };

        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            tracing::warn!(error = %error, "Google OAuth returned an error");
            return Err(ServiceError::OAuthStateInvalid);
        }

        let state_data = state_data.ok_or(ServiceError::OAuthStateInvalid)?;

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::Validation("Missing authorization code".to_string()))?;

        let provider_token = self
            .identity
            .exchange_code(code, &state_data.code_verifier)
            .await
            .map_err(ServiceError::OAuthFailure)?;

        let profile = self
            .identity
            .fetch_profile(&provider_token)
            .await
            .map_err(ServiceError::OAuthFailure)?;

        if !profile.email_verified {
            return Err(ServiceError::OAuthFailure(anyhow::anyhow!(
                "Google account email is not verified"
            )));
        }

        let (user, is_new_user) = self.resolve_federated_user(&profile).await?;
        tracing::info!(user_id = %user.id, is_new_user, "Google login completed");

        let tokens = self.start_session(&user, false).await?;
        Ok(GoogleLoginOutcome {
            tokens,
            is_new_user,
        })
    }

    /// Exchange a live refresh token for a new pair; the presented token
    /// is revoked in the same store operation.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let record = self.resolve_refresh_token(refresh_token).await?;

        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(ServiceError::InvalidRefreshToken)?;

        let (pair, replacement) = self.mint_pair(&user, record.remember_me)?;

        if !self
            .store
            .rotate_refresh_token(record.id, &replacement)
            .await?
        {
            tracing::warn!(user_id = %user.id, token_id = %record.id, "Concurrent refresh token rotation lost");
            return Err(ServiceError::InvalidRefreshToken);
        }

        tracing::info!(user_id = %user.id, "Refresh token rotated");
        Ok(pair)
    }

    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        let record = self.resolve_refresh_token(refresh_token).await?;

        if !self.store.revoke_refresh_token(record.id).await? {
            return Err(ServiceError::InvalidRefreshToken);
        }

        tracing::info!(user_id = %record.user_id, "User logged out");
        Ok(())
    }

    /// Revoke every live refresh token the user holds.
    #[tracing::instrument(skip_all)]
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let revoked = self.store.revoke_all_refresh_tokens(user_id).await?;
        tracing::info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    #[tracing::instrument(skip_all)]
    pub async fn current_user(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let active_sessions = self
            .store
            .list_refresh_tokens(user_id)
            .await?
            .iter()
            .filter(|t| t.is_valid())
            .count();

        Ok(user.profile(active_sessions))
    }

    async fn issue_otp(&self, email: &str) -> Result<(), ServiceError> {
        let otp = random::generate_otp();

        self.cache
            .set(&otp_key(email), &otp, self.settings.otp_ttl)
            .await?;

        self.email
            .send_otp_email(email, &otp)
            .await
            .map_err(|e| ServiceError::EmailDelivery(e.to_string()))
    }

    /// Look up and remove a pending OAuth state. `None` unless this call
    /// removed a live entry.
    async fn consume_oauth_state(
        &self,
        state: &str,
    ) -> Result<Option<OAuthStateData>, ServiceError> {
        let key = oauth_state_key(state);

        let Some(raw) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        if !self.cache.delete(&key).await? {
            return Ok(None);
        }

        Ok(serde_json::from_str(&raw).ok())
    }

    /// Access token plus a refresh record that has not been stored yet.
    fn mint_pair(
        &self,
        user: &User,
        remember_me: bool,
    ) -> Result<(TokenPair, RefreshToken), ServiceError> {
        let user_id = user.id.to_string();
        let access_token = self.tokens.issue_access(&user_id, &user.name, &user.email)?;
        let issued = self.tokens.issue_refresh(&user_id, remember_me)?;

        let record = RefreshToken::new_with_id(
            issued.jti,
            user.id,
            &issued.token,
            remember_me,
            issued.expires_in_days,
        );

        Ok((
            TokenPair {
                access_token,
                refresh_token: issued.token,
            },
            record,
        ))
    }

    async fn start_session(&self, user: &User, remember_me: bool) -> Result<TokenPair, ServiceError> {
        let (pair, record) = self.mint_pair(user, remember_me)?;
        self.store.insert_refresh_token(&record).await?;
        Ok(pair)
    }

    /// Decode a presented refresh token and return its live record.
    async fn resolve_refresh_token(&self, token: &str) -> Result<RefreshToken, ServiceError> {
        let claims = self
            .tokens
            .verify_refresh(token)
            .map_err(|_| ServiceError::InvalidRefreshToken)?;

        let token_id =
            Uuid::parse_str(&claims.jti).map_err(|_| ServiceError::InvalidRefreshToken)?;

        let record = self
            .store
            .find_refresh_token(token_id)
            .await?
            .ok_or(ServiceError::InvalidRefreshToken)?;

        if !record.matches(token) || record.user_id.to_string() != claims.sub {
            return Err(ServiceError::InvalidRefreshToken);
        }

        if record.revoked {
            tracing::warn!(user_id = %record.user_id, token_id = %record.id, "Revoked refresh token presented");
            return Err(ServiceError::InvalidRefreshToken);
        }

        if record.is_expired() {
            return Err(ServiceError::InvalidRefreshToken);
        }

        Ok(record)
    }

    /// Match by Google id, then by email (linking), else create.
    async fn resolve_federated_user(
        &self,
        profile: &FederatedProfile,
    ) -> Result<(User, bool), ServiceError> {
        if let Some(user) = self
            .store
            .find_user_by_google_id(&profile.subject_id)
            .await?
        {
            return Ok((user, false));
        }

        if let Some(user) = self.store.find_user_by_email(&profile.email).await? {
            return Ok((self.link_federated_account(&user, profile).await?, false));
        }

        let user = User::new(NewUser {
            name: profile.name.clone(),
            email: profile.email.clone(),
            password_hash: None,
            verified: true,
            google_id: Some(profile.subject_id.clone()),
        });

        match self.store.insert_user(&user).await {
            Ok(()) => Ok((user, true)),
            Err(StoreError::Conflict(_)) => {
                // Lost a race with a parallel callback or a password registration
                if let Some(existing) = self
                    .store
                    .find_user_by_google_id(&profile.subject_id)
                    .await?
                {
                    return Ok((existing, false));
                }

                let existing = self
                    .store
                    .find_user_by_email(&profile.email)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Internal(anyhow::anyhow!(
                            "account conflict while creating federated user"
                        ))
                    })?;
                Ok((self.link_federated_account(&existing, profile).await?, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach the Google identity to an existing account and reload it.
    async fn link_federated_account(
        &self,
        user: &User,
        profile: &FederatedProfile,
    ) -> Result<User, ServiceError> {
        // An unproven password must not survive the email owner's sign-in
        let clear_password = !user.verified;
        self.store
            .link_google_identity(user.id, &profile.subject_id, clear_password)
            .await?;
        tracing::info!(user_id = %user.id, clear_password, "Linked Google identity");

        self.store
            .find_user_by_id(user.id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::cache::InMemoryEphemeralStore;
    use crate::services::email::MockEmailService;
    use crate::services::google::MockIdentityProvider;
    use crate::services::jwt::JwtService;
    use crate::services::memory::InMemoryCredentialStore;
    use secrecy::SecretString;
    use std::time::Duration;

    struct Harness {
        auth: AuthService,
        store: Arc<InMemoryCredentialStore>,
        cache: Arc<InMemoryEphemeralStore>,
        email: Arc<MockEmailService>,
        identity: Arc<MockIdentityProvider>,
        jwt: Arc<JwtService>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        let cache = Arc::new(InMemoryEphemeralStore::new());
        let email = Arc::new(MockEmailService::new());
        let identity = Arc::new(MockIdentityProvider::new());
        let jwt = Arc::new(JwtService::new(&JwtConfig {
            access_secret: SecretString::new("unit-access-secret".to_string()),
            refresh_secret: SecretString::new("unit-refresh-secret".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            remember_me_expiry_days: 30,
        }));

        let auth = AuthService::new(
            store.clone(),
            cache.clone(),
            jwt.clone(),
            email.clone(),
            identity.clone(),
            AuthSettings {
                otp_ttl: Duration::from_secs(300),
                oauth_state_ttl: Duration::from_secs(600),
                oauth_state_length: 32,
            },
        );

        Harness {
            auth,
            store,
            cache,
            email,
            identity,
            jwt,
        }
    }

    async fn registered_and_verified(h: &Harness) -> TokenPair {
        h.auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap();
        let otp = h.email.last_otp_for("ada@example.com").unwrap();
        h.auth.verify_otp("ada@example.com", &otp).await.unwrap()
    }

    fn state_from_url(url: &str) -> String {
        url.split("state=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .map(|s| urlencoding::decode(s).unwrap().into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_creates_unverified_user_and_one_otp() {
        let h = harness();
        h.auth
            .register("Ada", "Ada@Example.com", "correcthorse")
            .await
            .unwrap();

        let user = h
            .store
            .find_user_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!user.verified);
        assert_eq!(h.email.sent_count(), 1);
        assert!(h.cache.get("otp:ada@example.com").await.unwrap().is_some());

        let err = h
            .auth
            .login("ada@example.com", "correcthorse", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts_regardless_of_verification() {
        let h = harness();
        h.auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap();

        let err = h
            .auth
            .register("Other", "ADA@example.com", "differentpw")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmailAlreadyRegistered));
    }

    #[tokio::test]
    async fn test_otp_is_single_use_and_wrong_code_rejected() {
        let h = harness();
        h.auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap();
        let otp = h.email.last_otp_for("ada@example.com").unwrap();
        let wrong = if otp == "000000" { "111111" } else { "000000" };

        assert!(matches!(
            h.auth.verify_otp("ada@example.com", wrong).await,
            Err(ServiceError::InvalidOrExpiredOtp)
        ));
        assert!(h.auth.verify_otp("ada@example.com", &otp).await.is_ok());
        assert!(matches!(
            h.auth.verify_otp("ada@example.com", &otp).await,
            Err(ServiceError::InvalidOrExpiredOtp)
        ));
    }

    #[tokio::test]
    async fn test_email_failure_surfaces_but_keeps_user_and_code() {
        let h = harness();
        h.email.set_failing(true);

        let err = h
            .auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmailDelivery(_)));
        assert!(h
            .store
            .find_user_by_email("ada@example.com")
            .await
            .unwrap()
            .is_some());
        assert!(h.cache.get("otp:ada@example.com").await.unwrap().is_some());

        h.email.set_failing(false);
        h.auth.resend_otp("ada@example.com").await.unwrap();
        let otp = h.email.last_otp_for("ada@example.com").unwrap();
        assert!(h.auth.verify_otp("ada@example.com", &otp).await.is_ok());
    }

    #[tokio::test]
    async fn test_resend_is_silent_for_unknown_and_verified() {
        let h = harness();
        h.auth.resend_otp("nobody@example.com").await.unwrap();
        assert_eq!(h.email.sent_count(), 0);

        registered_and_verified(&h).await;
        h.auth.resend_otp("ada@example.com").await.unwrap();
        assert_eq!(h.email.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_login_variants_share_one_error() {
        let h = harness();
        registered_and_verified(&h).await;

        for (email, password) in [
            ("ada@example.com", "wrongpassword"),
            ("nobody@example.com", "correcthorse"),
        ] {
            assert!(matches!(
                h.auth.login(email, password, false).await,
                Err(ServiceError::InvalidCredentials)
            ));
        }

        assert!(h
            .auth
            .login("ADA@example.com", "correcthorse", false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotation_is_single_use_and_keeps_remember_me() {
        let h = harness();
        registered_and_verified(&h).await;
        let pair = h
            .auth
            .login("ada@example.com", "correcthorse", true)
            .await
            .unwrap();

        let rotated = h.auth.refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert!(h.jwt.verify_refresh(&rotated.refresh_token).unwrap().rmb);

        assert!(matches!(
            h.auth.refresh(&pair.refresh_token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
        assert!(h.auth.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_twice_is_rejected() {
        let h = harness();
        let pair = registered_and_verified(&h).await;

        h.auth.logout(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            h.auth.logout(&pair.refresh_token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
        assert!(matches!(
            h.auth.refresh(&pair.refresh_token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let h = harness();
        let pair = registered_and_verified(&h).await;
        assert!(matches!(
            h.auth.refresh(&pair.access_token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_all_and_current_user() {
        let h = harness();
        let first = registered_and_verified(&h).await;
        h.auth
            .login("ada@example.com", "correcthorse", false)
            .await
            .unwrap();

        let claims = h.jwt.verify_access(&first.access_token).unwrap();
        let user_id = Uuid::parse_str(&claims.sub).unwrap();

        let profile = h.auth.current_user(user_id).await.unwrap();
        assert_eq!(profile.active_sessions, 2);
        assert!(profile.verified);

        assert_eq!(h.auth.logout_all(user_id).await.unwrap(), 2);
        assert_eq!(h.auth.current_user(user_id).await.unwrap().active_sessions, 0);
        assert!(matches!(
            h.auth.current_user(Uuid::now_v7()).await,
            Err(ServiceError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_google_state_is_single_use_and_carries_pkce() {
        let h = harness();
        h.identity.add_profile(
            "code-1",
            FederatedProfile::new("g-1", "grace@example.com", true, Some("Grace")),
        );

        let url = h.auth.google_login().await.unwrap();
        let state = state_from_url(&url);

        let params = || GoogleCallbackQuery {
            code: Some("code-1".to_string()),
            state: Some(state.clone()),
            error: None,
        };

        let outcome = h.auth.google_callback(params()).await.unwrap();
        assert!(outcome.is_new_user);

        let verifier = h.identity.received_verifiers().pop().unwrap();
        assert!(url.contains(&random::pkce_challenge(&verifier)));

        assert!(matches!(
            h.auth.google_callback(params()).await,
            Err(ServiceError::OAuthStateInvalid)
        ));
    }

    #[tokio::test]
    async fn test_google_callback_rejections() {
        let h = harness();
        h.identity.add_profile(
            "unverified",
            FederatedProfile::new("g-2", "eve@example.com", false, None),
        );

        let err = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: Some("x".into()),
                state: Some("never-issued".into()),
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OAuthStateInvalid));

        let url = h.auth.google_login().await.unwrap();
        let err = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: None,
                state: Some(state_from_url(&url)),
                error: Some("access_denied".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OAuthStateInvalid));

        let url = h.auth.google_login().await.unwrap();
        let err = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: None,
                state: Some(state_from_url(&url)),
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let url = h.auth.google_login().await.unwrap();
        let err = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: Some("unverified".into()),
                state: Some(state_from_url(&url)),
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OAuthFailure(_)));
    }

    #[tokio::test]
    async fn test_google_links_unverified_account_and_clears_password() {
        let h = harness();
        h.auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap();
        h.identity.add_profile(
            "code-ada",
            FederatedProfile::new("g-ada", "ada@example.com", true, Some("Ada L")),
        );

        let url = h.auth.google_login().await.unwrap();
        let outcome = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: Some("code-ada".into()),
                state: Some(state_from_url(&url)),
                error: None,
            })
            .await
            .unwrap();
        assert!(!outcome.is_new_user);

        let user = h
            .store
            .find_user_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(user.verified);
        assert_eq!(user.google_id.as_deref(), Some("g-ada"));
        assert!(user.password_hash.is_none());
        assert!(matches!(
            h.auth.login("ada@example.com", "correcthorse", false).await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_google_links_verified_account_keeping_password() {
        let h = harness();
        registered_and_verified(&h).await;
        h.identity.add_profile(
            "code-ada",
            FederatedProfile::new("g-ada", "ada@example.com", true, None),
        );

        let url = h.auth.google_login().await.unwrap();
        h.auth
            .google_callback(GoogleCallbackQuery {
                code: Some("code-ada".into()),
                state: Some(state_from_url(&url)),
                error: None,
            })
            .await
            .unwrap();

        assert!(h
            .auth
            .login("ada@example.com", "correcthorse", false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_google_error_redirect_spends_the_state() {
        let h = harness();
        h.identity.add_profile(
            "code-1",
            FederatedProfile::new("g-1", "grace@example.com", true, None),
        );

        let state = state_from_url(&h.auth.google_login().await.unwrap());
        let err = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: None,
                state: Some(state.clone()),
                error: Some("access_denied".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OAuthStateInvalid));
        assert_eq!(h.cache.get(&oauth_state_key(&state)).await.unwrap(), None);

        let replay = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: Some("code-1".into()),
                state: Some(state),
                error: None,
            })
            .await;
        assert!(matches!(replay, Err(ServiceError::OAuthStateInvalid)));
        assert!(h.identity.received_verifiers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_otp_never_validates() {
        let h = harness();
        h.auth
            .register("Ada", "ada@example.com", "correcthorse")
            .await
            .unwrap();
        let otp = h.email.last_otp_for("ada@example.com").unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(matches!(
            h.auth.verify_otp("ada@example.com", &otp).await,
            Err(ServiceError::InvalidOrExpiredOtp)
        ));
        let user = h
            .store
            .find_user_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!user.verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_google_state_fails_closed() {
        let h = harness();
        h.identity.add_profile(
            "code-1",
            FederatedProfile::new("g-1", "grace@example.com", true, None),
        );
        let state = state_from_url(&h.auth.google_login().await.unwrap());

        tokio::time::advance(Duration::from_secs(601)).await;

        let result = h
            .auth
            .google_callback(GoogleCallbackQuery {
                code: Some("code-1".into()),
                state: Some(state),
                error: None,
            })
            .await;
        assert!(matches!(result, Err(ServiceError::OAuthStateInvalid)));
        assert!(h
            .store
            .find_user_by_google_id("g-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_refresh_record_is_rejected() {
        let h = harness();
        let pair = registered_and_verified(&h).await;
        let user_id = Uuid::parse_str(&h.jwt.verify_access(&pair.access_token).unwrap().sub).unwrap();

        // Signature still valid, record already past its expiry
        let issued = h.jwt.issue_refresh(&user_id.to_string(), false).unwrap();
        let record = RefreshToken::new_with_id(issued.jti, user_id, &issued.token, false, -1);
        h.store.insert_refresh_token(&record).await.unwrap();

        assert!(matches!(
            h.auth.refresh(&issued.token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
        assert!(matches!(
            h.auth.logout(&issued.token).await,
            Err(ServiceError::InvalidRefreshToken)
        ));
        assert_eq!(h.auth.current_user(user_id).await.unwrap().active_sessions, 1);
    }

    /// Hides existing accounts from the first email lookup, as when a
    /// password registration commits between lookup and insert.
    struct LateRegistrationStore {
        inner: InMemoryCredentialStore,
        email_lookups: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CredentialStore for LateRegistrationStore {
        async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_id(id).await
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let seen = self
                .email_lookups
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if seen == 0 {
                return Ok(None);
            }
            self.inner.find_user_by_email(email).await
        }

        async fn find_user_by_google_id(
            &self,
            google_id: &str,
        ) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_google_id(google_id).await
        }

        async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.insert_user(user).await
        }

        async fn mark_verified(&self, user_id: Uuid) -> Result<(), StoreError> {
            self.inner.mark_verified(user_id).await
        }

        async fn link_google_identity(
            &self,
            user_id: Uuid,
            google_id: &str,
            clear_password: bool,
        ) -> Result<(), StoreError> {
            self.inner
                .link_google_identity(user_id, google_id, clear_password)
                .await
        }

        async fn add_experience(&self, user_id: Uuid, delta: i64) -> Result<i64, StoreError> {
            self.inner.add_experience(user_id, delta).await
        }

        async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
            self.inner.insert_refresh_token(token).await
        }

        async fn find_refresh_token(&self, id: Uuid) -> Result<Option<RefreshToken>, StoreError> {
            self.inner.find_refresh_token(id).await
        }

        async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.revoke_refresh_token(id).await
        }

        async fn rotate_refresh_token(
            &self,
            old_id: Uuid,
            new_token: &RefreshToken,
        ) -> Result<bool, StoreError> {
            self.inner.rotate_refresh_token(old_id, new_token).await
        }

        async fn list_refresh_tokens(
            &self,
            user_id: Uuid,
        ) -> Result<Vec<RefreshToken>, StoreError> {
            self.inner.list_refresh_tokens(user_id).await
        }

        async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
            self.inner.revoke_all_refresh_tokens(user_id).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn test_google_insert_conflict_on_email_links_account() {
        let h = harness();
        let racing = Arc::new(LateRegistrationStore {
            inner: InMemoryCredentialStore::new(),
            email_lookups: std::sync::atomic::AtomicUsize::new(0),
        });
        let existing = User::new(NewUser {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: Some("hash".into()),
            verified: false,
            google_id: None,
        });
        racing.inner.insert_user(&existing).await.unwrap();

        let auth = AuthService::new(
            racing.clone(),
            h.cache.clone(),
            h.jwt.clone(),
            h.email.clone(),
            h.identity.clone(),
            AuthSettings {
                otp_ttl: Duration::from_secs(300),
                oauth_state_ttl: Duration::from_secs(600),
                oauth_state_length: 32,
            },
        );
        h.identity.add_profile(
            "code-ada",
            FederatedProfile::new("g-ada", "ada@example.com", true, None),
        );

        let url = auth.google_login().await.unwrap();
        let outcome = auth
            .google_callback(GoogleCallbackQuery {
                code: Some("code-ada".into()),
                state: Some(state_from_url(&url)),
                error: None,
            })
            .await
            .unwrap();
        assert!(!outcome.is_new_user);

        let linked = racing
            .inner
            .find_user_by_google_id("g-ada")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.id, existing.id);
        assert!(linked.verified);
    }
}
