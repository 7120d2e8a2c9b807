use async_trait::async_trait;
use log::warn;

use super::{DispatchGateway, DispatchOutcome, OutgoingEmail};

/// Sends through `primary`, retrying once through `secondary` on failure.
pub struct FallbackGateway<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackGateway<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P, S> DispatchGateway for FallbackGateway<P, S>
where
    P: DispatchGateway,
    S: DispatchGateway,
{
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome {
        let first = self.primary.send(email).await;
        if first.ok {
            return first;
        }

        warn!(
            "Primary email transport failed ({}), trying fallback",
            first.error_text
        );
        let second = self.secondary.send(email).await;
        if second.ok {
            return second;
        }

        DispatchOutcome::failed(format!(
            "primary: {}; fallback: {}",
            first.error_text, second.error_text
        ))
    }
}
