#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::{AuthSettings, JwtConfig},
    services::{
        AuthService, InMemoryCredentialStore, InMemoryEphemeralStore, JwtService,
        MockEmailService, MockIdentityProvider,
    },
    AppState,
};
use secrecy::SecretString;
use serde_json::Value;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const FRONTEND_URL: &str = "http://localhost:3000/auth/callback";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryCredentialStore>,
    pub cache: Arc<InMemoryEphemeralStore>,
    pub email: Arc<MockEmailService>,
    pub identity: Arc<MockIdentityProvider>,
    pub jwt: Arc<JwtService>,
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: SecretString::new("integration-access-secret".to_string()),
        refresh_secret: SecretString::new("integration-refresh-secret".to_string()),
        access_token_expiry_minutes: 15,
        refresh_token_expiry_days: 7,
        remember_me_expiry_days: 30,
    }
}

pub fn spawn_app() -> TestApp {
    let store = Arc::new(InMemoryCredentialStore::new());
    let cache = Arc::new(InMemoryEphemeralStore::new());
    let email = Arc::new(MockEmailService::new());
    let identity = Arc::new(MockIdentityProvider::new());
    let jwt = Arc::new(JwtService::new(&jwt_config()));

    let auth = Arc::new(AuthService::new(
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
    ));

    let state = AppState {
        auth,
        tokens: jwt.clone(),
        store: store.clone(),
        cache: cache.clone(),
        frontend_redirect_url: FRONTEND_URL.to_string(),
        allowed_origins: vec!["http://localhost:3000".to_string()],
        swagger_enabled: false,
        login_rate_limiter: create_ip_rate_limiter(100, 60),
        register_rate_limiter: create_ip_rate_limiter(100, 60),
        otp_rate_limiter: create_ip_rate_limiter(100, 60),
    };

    TestApp {
        router: build_router(state),
        store,
        cache,
        email,
        identity,
        jwt,
    }
}

impl TestApp {
    pub async fn request(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .request(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        let status = res.status();
        (status, body_json(res).await)
    }

    pub async fn get_with_bearer(&self, uri: &str, authorization: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let res = self.request(builder.body(Body::empty()).unwrap()).await;
        let status = res.status();
        (status, body_json(res).await)
    }

    /// Register and verify through the HTTP surface; returns the token pair.
    pub async fn register_verified(&self, name: &str, email: &str, password: &str) -> Value {
        let (status, _) = self
            .post_json(
                "/auth/register",
                serde_json::json!({ "name": name, "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let otp = self.email.last_otp_for(&email.to_lowercase()).unwrap();
        let (status, body) = self
            .post_json(
                "/auth/verify-otp",
                serde_json::json!({ "email": email, "otp": otp }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["payload"].clone()
    }
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

/// Pull a query parameter out of a redirect `Location`.
pub fn query_param(location: &str, name: &str) -> Option<String> {
    let query = location.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| urlencoding::decode(value).ok().map(|v| v.into_owned()))?
    })
}
