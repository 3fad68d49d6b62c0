use identity_service::{
    build_router,
    config::{AuthConfig, AuthSettings, Environment, SwaggerMode},
    db,
    services::{
        AuthService, EmailService, GoogleOAuthClient, JwtService, PgCredentialStore, RedisStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("PostgreSQL connection failed: {}", e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Migrations failed: {}", e)))?;
    let store = Arc::new(PgCredentialStore::new(pool));

    let cache = Arc::new(RedisStore::new(&config.redis).await?);
    let email = Arc::new(EmailService::new(&config.smtp)?);
    let identity = Arc::new(GoogleOAuthClient::new(&config.google)?);
    let tokens = Arc::new(JwtService::new(&config.jwt));

    let auth = Arc::new(AuthService::new(
        store.clone(),
        cache.clone(),
        tokens.clone(),
        email,
        identity,
        AuthSettings::from(&config),
    ));

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );
    let otp_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.otp_attempts,
        config.rate_limit.otp_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login, Register, OTP");

    let swagger_enabled = match config.environment {
        Environment::Dev => true,
        Environment::Prod => config.swagger.enabled == SwaggerMode::Public,
    };

    let state = AppState {
        auth,
        tokens,
        store,
        cache,
        frontend_redirect_url: config.google.frontend_redirect_url.clone(),
        allowed_origins: config.security.allowed_origins.clone(),
        swagger_enabled,
        login_rate_limiter,
        register_rate_limiter,
        otp_rate_limiter,
    };

    let app = build_router(state);

    let addr = config.common.socket_addr();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
