use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

/// Claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User id
    pub sub: String,
    pub name: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Claims carried by refresh tokens. `jti` is the id of the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub jti: String,
    /// Remember-me class, carried across rotations
    pub rmb: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Freshly minted refresh token plus what the store needs to persist it.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_in_days: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    /// Bad signature, wrong secret, malformed or expired
    #[error("invalid token")]
    Invalid,
    #[error("failed to encode token: {0}")]
    Encode(String),
}

/// Signs and checks bearer tokens. Access and refresh tokens use
/// independent secrets so one can never stand in for the other.
pub trait TokenCodec: Send + Sync {
    fn issue_access(&self, user_id: &str, name: &str, email: &str) -> Result<String, TokenError>;

    fn issue_refresh(&self, user_id: &str, remember_me: bool)
        -> Result<IssuedRefreshToken, TokenError>;

    fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError>;

    fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenError>;
}

/// HS256 implementation.
#[derive(Clone)]
pub struct JwtService {
    access_encoding_key: EncodingKey,
    access_decoding_key: DecodingKey,
    refresh_encoding_key: EncodingKey,
    refresh_decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    remember_me_expiry_days: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        let access = config.access_secret.expose_secret().as_bytes();
        let refresh = config.refresh_secret.expose_secret().as_bytes();

        tracing::info!("JWT service initialized with HS256 secrets");

        Self {
            access_encoding_key: EncodingKey::from_secret(access),
            access_decoding_key: DecodingKey::from_secret(access),
            refresh_encoding_key: EncodingKey::from_secret(refresh),
            refresh_decoding_key: DecodingKey::from_secret(refresh),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            remember_me_expiry_days: config.remember_me_expiry_days,
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation
    }
}

impl TokenCodec for JwtService {
    fn issue_access(&self, user_id: &str, name: &str, email: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    fn issue_refresh(
        &self,
        user_id: &str,
        remember_me: bool,
    ) -> Result<IssuedRefreshToken, TokenError> {
        let expires_in_days = if remember_me {
            self.remember_me_expiry_days
        } else {
            self.refresh_token_expiry_days
        };

        let now = Utc::now();
        let jti = Uuid::new_v4();
        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            jti: jti.to_string(),
            rmb: remember_me,
            iat: now.timestamp(),
            exp: (now + Duration::days(expires_in_days)).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))?;

        Ok(IssuedRefreshToken {
            token,
            jti,
            expires_in_days,
        })
    }

    fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        decode::<AccessTokenClaims>(token, &self.access_decoding_key, &Self::validation())
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }

    fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        decode::<RefreshTokenClaims>(token, &self.refresh_decoding_key, &Self::validation())
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }
}
