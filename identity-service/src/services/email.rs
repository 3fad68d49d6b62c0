use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

pub const OTP_EMAIL_SUBJECT: &str = "Your OTP Code";

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_otp_email(&self, to_email: &str, otp: &str) -> Result<(), anyhow::Error>;
}

pub fn otp_email_body(otp: &str) -> String {
    format!("Your OTP code is: {}", otp)
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().to_string(),
        );

        // 465 is implicit TLS, anything else negotiates STARTTLS
        let builder = if config.port == 465 {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?;

        let mailer = builder
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.user.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_otp_email(&self, to_email: &str, otp: &str) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject(OTP_EMAIL_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(otp_email_body(otp))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, "OTP email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send OTP email");
                Err(anyhow::anyhow!(e))
            }
        }
    }
}

/// Records every delivery instead of sending it. `set_failing(true)`
/// makes subsequent sends return an error.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    /// Most recent OTP delivered to `email`.
    pub fn last_otp_for(&self, email: &str) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|(to, _)| to == email)
                .map(|(_, otp)| otp.clone())
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_otp_email(&self, to_email: &str, otp: &str) -> Result<(), anyhow::Error> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(anyhow::anyhow!("mock SMTP relay unavailable"));
        }

        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("mock mailbox lock poisoned"))?
            .push((to_email.to_string(), otp.to_string()));
        Ok(())
    }
}
