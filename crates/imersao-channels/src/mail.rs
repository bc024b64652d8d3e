//! SMTP mail transport (async lettre, STARTTLS relay).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use imersao_core::{EngineError, MailMessage, MailTransport, Result, SmtpConfig};

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    /// Builds the relay from config. Fails with a configuration error when
    /// required SMTP fields are missing.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        config.validate()?;
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config.host.trim())
            .map_err(|e| EngineError::Configuration(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self {
            transport,
            host: config.host.trim().to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// HTML message with optional Reply-To.
pub fn build_message(message: &MailMessage) -> Result<Message> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| EngineError::Validation(format!("Invalid from '{}': {e}", message.from)))?;
    let to: Mailbox = message
        .to
        .trim()
        .parse()
        .map_err(|e| EngineError::Validation(format!("Invalid to '{}': {e}", message.to)))?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_HTML);

    if let Some(reply_to) = message.reply_to.as_deref().filter(|r| !r.trim().is_empty()) {
        let mailbox: Mailbox = reply_to
            .trim()
            .parse()
            .map_err(|e| EngineError::Validation(format!("Invalid reply-to '{reply_to}': {e}")))?;
        builder = builder.reply_to(mailbox);
    }

    builder
        .body(message.html.clone())
        .map_err(|e| EngineError::Validation(format!("Build email: {e}")))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let email = build_message(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| EngineError::TransientIo(format!("SMTP send: {e}")))?;
        tracing::info!("📤 Email sent to: {}", message.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MailMessage {
        MailMessage {
            from: "Imersões <ops@example.com>".into(),
            to: "ana@example.com".into(),
            subject: "[Imersões] 2 tarefa(s) atrasada(s)".into(),
            html: "<p>Olá Ana</p>".into(),
            reply_to: Some("coord@example.com".into()),
        }
    }

    #[test]
    fn test_build_html_message() {
        let email = build_message(&message()).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("Reply-To: coord@example.com"));
        assert!(raw.contains("To: ana@example.com"));
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let mut msg = message();
        msg.to = "not an address".into();
        assert!(matches!(build_message(&msg), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_missing_config_is_configuration_error() {
        let err = SmtpMailer::new(&SmtpConfig::default()).err().unwrap();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_valid_config_builds_without_connecting() {
        let config = SmtpConfig {
            host: " smtp.example.com ".into(),
            username: "ops@example.com".into(),
            password: "secret".into(),
            from_email: "ops@example.com".into(),
            ..Default::default()
        };
        let mailer = SmtpMailer::new(&config).unwrap();
        assert_eq!(mailer.host(), "smtp.example.com");
    }
}
