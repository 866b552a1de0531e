use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::delivery::{ProviderError, TextMessageDelivery};
use crate::config::TwilioConfig;
use crate::models::PhoneNumber;

const TWILIO_API_BASE_URL: &str = "https://api.twilio.com/2010-04-01";

/// SMS delivery through the Twilio Messages API.
pub struct TwilioSmsDelivery {
    config: TwilioConfig,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

impl TwilioSmsDelivery {
    pub fn new(config: TwilioConfig) -> Result<Self, ProviderError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(ProviderError::Configuration(
                "Twilio account SID and auth token are required".to_string(),
            ));
        }
        if config.sender.is_empty() {
            return Err(ProviderError::Configuration(
                "Twilio sender number is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            client: Client::new(),
            base_url: TWILIO_API_BASE_URL.to_string(),
        })
    }

    /// Points the client at another API host (used against local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

/// Maps a Twilio error code to a provider error.
fn map_twilio_error(status: StatusCode, code: Option<i64>, message: String) -> ProviderError {
    match code {
        Some(20003) => ProviderError::Authentication(message),
        Some(21211) | Some(21614) => ProviderError::InvalidRecipient(message),
        Some(21408) => ProviderError::SendFailed(format!("region not supported: {message}")),
        _ if status == StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        _ => ProviderError::SendFailed(format!("Twilio returned {status}: {message}")),
    }
}

#[async_trait]
impl TextMessageDelivery for TwilioSmsDelivery {
    async fn send_text_message(
        &self,
        recipient: &PhoneNumber,
        body: &str,
    ) -> Result<(), ProviderError> {
        let to = recipient.to_string();
        let params = [
            ("To", to.as_str()),
            ("From", self.config.sender.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("Failed to connect to Twilio: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let parsed: Option<TwilioErrorResponse> = serde_json::from_str(&text).ok();
            let (code, message) = match parsed {
                Some(err) => (err.code, err.message.unwrap_or(text)),
                None => (None, text),
            };
            return Err(map_twilio_error(status, code, message));
        }

        let message: TwilioMessageResponse = response.json().await.map_err(|e| {
            ProviderError::SendFailed(format!("Failed to parse Twilio response: {}", e))
        })?;

        tracing::info!(
            recipient = %recipient,
            message_sid = %message.sid,
            "SMS sent via Twilio"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "token".to_string(),
            sender: "+15005550006".to_string(),
        }
    }

    #[test]
    fn test_requires_credentials() {
        let mut missing = config();
        missing.auth_token.clear();
        assert!(matches!(
            TwilioSmsDelivery::new(missing),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_messages_url() -> Result<(), ProviderError> {
        let twilio = TwilioSmsDelivery::new(config())?.with_base_url("http://localhost:9999/");
        assert_eq!(
            twilio.messages_url(),
            "http://localhost:9999/Accounts/AC123/Messages.json"
        );
        Ok(())
    }

    #[test]
    fn test_error_code_mapping() {
        let status = StatusCode::BAD_REQUEST;
        assert!(matches!(
            map_twilio_error(StatusCode::UNAUTHORIZED, Some(20003), String::new()),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            map_twilio_error(status, Some(21211), String::new()),
            ProviderError::InvalidRecipient(_)
        ));
        assert!(matches!(
            map_twilio_error(status, Some(21614), String::new()),
            ProviderError::InvalidRecipient(_)
        ));
        assert!(matches!(
            map_twilio_error(StatusCode::TOO_MANY_REQUESTS, None, String::new()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            map_twilio_error(status, Some(30001), String::new()),
            ProviderError::SendFailed(_)
        ));
    }
}
