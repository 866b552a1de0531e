use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::delivery::{HtmlMessageDelivery, ProviderError};
use crate::config::SmtpConfig;
use crate::models::EmailAddress;

/// HTML email delivery over SMTP with STARTTLS.
pub struct SmtpEmailDelivery {
    sender: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailDelivery {
    pub fn new(config: &SmtpConfig) -> Result<Self, ProviderError> {
        let sender: Mailbox = format!("{} <{}>", config.sender_name, config.sender_address)
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("Invalid sender address: {}", e)))?;

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { sender, transport })
    }
}

#[async_trait]
impl HtmlMessageDelivery for SmtpEmailDelivery {
    async fn send_html_message(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), ProviderError> {
        let to: Mailbox = recipient
            .to_string()
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| ProviderError::SendFailed(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ProviderError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(recipient = %recipient, "Verification email sent");
        Ok(())
    }
}
