//! Outbound delivery port and provider clients.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::error::MessagingError;

/// Abstract outbound SMS/email send. Returns the provider message id.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, MessagingError>;

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MessagingError>;
}

/// No-op messenger used when providers are unconfigured; webhook responses
/// still carry the reply text, so local development keeps working.
pub struct NullMessenger;

#[async_trait]
impl OutboundMessenger for NullMessenger {
    async fn send_sms(&self, to: &str, _body: &str) -> Result<String, MessagingError> {
        warn!("SMS provider unconfigured; skipping delivery to {}", to);
        Ok(format!("null-{}", shared_utils::new_id()))
    }

    async fn send_email(
        &self,
        to: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<String, MessagingError> {
        warn!("Email provider unconfigured; skipping delivery to {}", to);
        Ok(format!("null-{}", shared_utils::new_id()))
    }
}

/// REST messenger: Twilio-style SMS API plus a JSON email relay.
pub struct RestMessenger {
    client: Client,
    twilio_base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    email_relay_url: String,
    email_relay_token: String,
    from_email: String,
}

impl RestMessenger {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_twilio_base_url(config, "https://api.twilio.com")
    }

    pub fn with_twilio_base_url(config: &AppConfig, twilio_base_url: &str) -> Self {
        Self {
            client: Client::new(),
            twilio_base_url: twilio_base_url.trim_end_matches('/').to_string(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_phone_number.clone(),
            email_relay_url: config.email_relay_url.clone(),
            email_relay_token: config.email_relay_token.clone(),
            from_email: config.spa_email.clone(),
        }
    }
}

#[async_trait]
impl OutboundMessenger for RestMessenger {
    async fn send_sms(&self, to: &str, body: &str) -> Result<String, MessagingError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.twilio_base_url, self.account_sid
        );
        debug!("Sending SMS to {}", to);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| MessagingError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MessagingError::Delivery(format!("{}: {}", status, text)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| MessagingError::Delivery(e.to_string()))?;
        let sid = value
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("Sent SMS to {} (sid {})", to, sid);
        Ok(sid)
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MessagingError> {
        debug!("Sending email to {}", to);

        let response = self
            .client
            .post(&self.email_relay_url)
            .bearer_auth(&self.email_relay_token)
            .json(&json!({
                "from": self.from_email,
                "to": to,
                "subject": subject,
                "body_text": body,
            }))
            .send()
            .await
            .map_err(|e| MessagingError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MessagingError::Delivery(format!("{}: {}", status, text)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| MessagingError::Delivery(e.to_string()))?;
        let message_id = value
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("email-{}", shared_utils::new_id()));
        info!("Sent email to {} (id {})", to, message_id);
        Ok(message_id)
    }
}
