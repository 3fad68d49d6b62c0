use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GoogleOAuthConfig;
use crate::models::user::normalize_email;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_SCOPES: &str = "openid email profile";

/// Identity asserted by an external provider, already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedProfile {
    pub subject_id: String,
    /// Lower-cased
    pub email: String,
    pub email_verified: bool,
    /// Falls back to the email local part when the provider sends none
    pub name: String,
}

impl FederatedProfile {
    pub fn new(subject_id: &str, email: &str, email_verified: bool, name: Option<&str>) -> Self {
        let email = normalize_email(email);
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        Self {
            subject_id: subject_id.to_string(),
            email,
            email_verified,
            name,
        }
    }
}

/// Provider access token obtained from the code exchange.
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: SecretString,
}

/// Federated login provider (Google in production).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent-page URL carrying `state` and the S256 PKCE challenge.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderToken, anyhow::Error>;

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<FederatedProfile, anyhow::Error>;
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
}

pub struct GoogleOAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
}

impl GoogleOAuthClient {
    pub fn new(config: &GoogleOAuthConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleOAuthClient {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&state={}&code_challenge={}&code_challenge_method=S256",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(GOOGLE_SCOPES),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderToken, anyhow::Error> {
        let response = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to contact Google: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, error = %error_text, "Google token exchange failed");
            return Err(anyhow::anyhow!("Google token exchange failed with {}", status));
        }

        let tokens: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Google token response: {}", e))?;

        Ok(ProviderToken {
            access_token: SecretString::new(tokens.access_token),
        })
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<FederatedProfile, anyhow::Error> {
        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(token.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch Google profile: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Google userinfo request failed with {}",
                response.status()
            ));
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Google profile: {}", e))?;

        Ok(FederatedProfile::new(
            &info.id,
            &info.email,
            info.verified_email,
            info.name.as_deref(),
        ))
    }
}

/// Provider double: maps authorization codes to canned profiles and
/// remembers the PKCE verifier each exchange received. The provider token
/// it hands out is the code itself.
#[derive(Default)]
pub struct MockIdentityProvider {
    profiles: Mutex<HashMap<String, FederatedProfile>>,
    verifiers: Mutex<Vec<String>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&self, code: &str, profile: FederatedProfile) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.insert(code.to_string(), profile);
        }
    }

    pub fn received_verifiers(&self) -> Vec<String> {
        self.verifiers.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> String {
        format!(
            "https://accounts.example.test/auth?state={}&code_challenge={}",
            urlencoding::encode(state),
            urlencoding::encode(code_challenge)
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderToken, anyhow::Error> {
        if let Ok(mut verifiers) = self.verifiers.lock() {
            verifiers.push(code_verifier.to_string());
        }

        let known = self
            .profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("mock provider lock poisoned"))?
            .contains_key(code);
        if !known {
            return Err(anyhow::anyhow!("unknown authorization code"));
        }

        Ok(ProviderToken {
            access_token: SecretString::new(code.to_string()),
        })
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<FederatedProfile, anyhow::Error> {
        self.profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("mock provider lock poisoned"))?
            .get(token.access_token.expose_secret().as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown provider token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_exchange_then_profile() {
        let mock = MockIdentityProvider::new();
        mock.add_profile("code-1", FederatedProfile::new("g-1", "ada@example.com", true, None));

        let token = mock.exchange_code("code-1", "verifier-1").await.unwrap();
        let profile = mock.fetch_profile(&token).await.unwrap();
        assert_eq!(profile.subject_id, "g-1");
        assert_eq!(mock.received_verifiers(), vec!["verifier-1".to_string()]);

        assert!(mock.exchange_code("bogus", "verifier-2").await.is_err());
    }

    #[test]
    fn test_profile_normalization() {
        let profile = FederatedProfile::new("g-1", "Ada@Example.com", true, Some("  "));
        assert_eq!(profile.email, "ada@example.com");
        assert_eq!(profile.name, "ada");

        let named = FederatedProfile::new("g-1", "ada@example.com", true, Some("Ada Lovelace"));
        assert_eq!(named.name, "Ada Lovelace");
    }

    #[test]
    fn test_authorization_url_carries_state_and_pkce() {
        let client = GoogleOAuthClient::new(&GoogleOAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: SecretString::new("secret".to_string()),
            redirect_uri: "http://localhost:8080/auth/google/callback".to_string(),
            frontend_redirect_url: "http://localhost:3000".to_string(),
        })
        .unwrap();

        let url = client.authorization_url("state-abc", "challenge-xyz");
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=state-abc"));
        assert!(url.contains("code_challenge=challenge-xyz"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fgoogle%2Fcallback"));
    }
}
