use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build email message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends verification and password-reset links. Without SMTP credentials it only logs.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    frontend_url: String,
}

impl Mailer {
    pub fn new(config: &AppConfig) -> Result<Self, MailError> {
        let frontend_url = config.frontend_url.trim_end_matches('/').to_string();
        let Some((username, password)) = config.mail_credentials() else {
            log::warn!("Mail credentials not configured; emails will be logged, not sent");
            return Ok(Self {
                transport: None,
                from: "no-reply@localhost".parse()?,
                frontend_url,
            });
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.mail_server)?
            .port(config.mail_port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self {
            transport: Some(Arc::new(transport)),
            from: username.parse()?,
            frontend_url,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn verification_link(&self, token: &str) -> String {
        format!("{}/confirm/{}", self.frontend_url, token)
    }

    pub fn password_reset_link(&self, token: &str) -> String {
        format!("{}/reset-password/{}", self.frontend_url, token)
    }

    pub async fn send_verification_email(&self, recipient: &str, token: &str) -> Result<(), MailError> {
        let body = format!("Your confirmation link is {}", self.verification_link(token));
        self.send(recipient, "Confirm Your Email", body).await
    }

    pub async fn send_password_reset_email(&self, recipient: &str, token: &str) -> Result<(), MailError> {
        let body = format!(
            "To reset your password, visit the following link: {}",
            self.password_reset_link(token)
        );
        self.send(recipient, "Password Reset Request", body).await
    }

    async fn send(&self, recipient: &str, subject: &str, body: String) -> Result<(), MailError> {
        let Some(transport) = &self.transport else {
            log::info!("Mail disabled; would send '{}' to {}: {}", subject, recipient, body);
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient.parse()?)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)?;

        transport.send(message).await?;
        log::info!("Sent '{}' to {}", subject, recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn links_point_at_frontend() {
        let mut config = test_config();
        config.frontend_url = "https://rent.example.com/".into();
        let mailer = Mailer::new(&config).unwrap();
        assert_eq!(
            mailer.verification_link("abc"),
            "https://rent.example.com/confirm/abc"
        );
        assert_eq!(
            mailer.password_reset_link("xyz"),
            "https://rent.example.com/reset-password/xyz"
        );
    }

    #[tokio::test]
    async fn unconfigured_mailer_only_logs() {
        let mailer = Mailer::new(&test_config()).unwrap();
        assert!(!mailer.is_enabled());
        mailer
            .send_verification_email("tenant@example.com", "token")
            .await
            .unwrap();
    }
}
