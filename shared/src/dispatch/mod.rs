use async_trait::async_trait;
use serde::Serialize;

use crate::config::EmailConfig;

pub mod fallback;
pub mod http;
pub mod message;

pub use fallback::FallbackGateway;
pub use http::HttpEmailGateway;
pub use message::{DispatchOrigin, MessageRenderer, RenderError};

/// A rendered email ready to hand to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub subject: String,
    pub html_body: String,
    pub recipients: Vec<String>,
}

/// Result of a single gateway send. `error_text` is empty on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub ok: bool,
    pub error_text: String,
}

impl DispatchOutcome {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            error_text: String::new(),
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_text: error_text.into(),
        }
    }
}

/// External email-sending capability.
///
/// Implementations must not return errors or panic on transport faults:
/// every failure is reported as `DispatchOutcome { ok: false, .. }`.
#[async_trait]
pub trait DispatchGateway: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome;
}

/// The gateway assembled from `EmailConfig`: a single HTTP transport, or a
/// primary/fallback pair when a fallback transport is configured.
pub enum ConfiguredGateway {
    Direct(HttpEmailGateway),
    WithFallback(FallbackGateway<HttpEmailGateway, HttpEmailGateway>),
}

impl ConfiguredGateway {
    pub fn from_config(config: &EmailConfig) -> Self {
        let primary = HttpEmailGateway::from_transport(&config.primary, &config.from, config.timeout);
        match &config.fallback {
            Some(fallback) => ConfiguredGateway::WithFallback(FallbackGateway::new(
                primary,
                HttpEmailGateway::from_transport(fallback, &config.from, config.timeout),
            )),
            None => ConfiguredGateway::Direct(primary),
        }
    }
}

#[async_trait]
impl DispatchGateway for ConfiguredGateway {
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome {
        match self {
            ConfiguredGateway::Direct(gateway) => gateway.send(email).await,
            ConfiguredGateway::WithFallback(gateway) => gateway.send(email).await,
        }
    }
}
