use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DispatchGateway, DispatchOutcome, OutgoingEmail};
use crate::config::EmailTransport;

#[derive(Error, Debug)]
enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("email API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Dispatch gateway backed by a JSON email API (bearer-key authenticated).
pub struct HttpEmailGateway {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailGateway {
    pub fn new(api_url: &str, api_key: &str, from: &str, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });
        Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }

    pub fn from_transport(transport: &EmailTransport, from: &str, timeout: Duration) -> Self {
        Self::new(&transport.api_url, &transport.api_key, from, timeout)
    }

    async fn try_send(&self, email: &OutgoingEmail) -> Result<Option<String>, GatewayError> {
        let request = EmailRequest {
            from: &self.from,
            to: &email.recipients,
            subject: &email.subject,
            html: &email.html_body,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Any 2xx means the provider took the message; the id is informational
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<EmailResponse>(&body) {
            Ok(parsed) => Ok(parsed.id),
            Err(e) => {
                debug!("Email API returned no usable message id: {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl DispatchGateway for HttpEmailGateway {
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome {
        info!(
            "Sending email '{}' to {} recipient(s)",
            email.subject,
            email.recipients.len()
        );

        match self.try_send(email).await {
            Ok(id) => {
                info!("Email accepted by provider, id={:?}", id);
                DispatchOutcome::delivered()
            }
            Err(e) => {
                error!("Email send failed: {}", e);
                DispatchOutcome::failed(e.to_string())
            }
        }
    }
}
