use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;

use crate::dispatch::{DispatchGateway, DispatchOrigin, DispatchOutcome, MessageRenderer, OutgoingEmail};
use crate::error::{InviteError, InviteResult};
use crate::models::{DeliveryAttempt, Invitation};
use crate::selector::ResendSelector;
use crate::store::{DeliveryLog, InvitationStore};

/// Upper bound on a single gateway call, on top of the gateway's own timeout.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A delivery attempt whose log write failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub invitation_id: String,
    pub error: String,
}

/// Tally of one retry pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub record_failures: Vec<RecordFailure>,
}

impl RunSummary {
    /// Surfaces log write failures after the pass has completed. The error
    /// still carries the full tally.
    pub fn into_result(self) -> InviteResult<RunSummary> {
        if self.record_failures.is_empty() {
            Ok(self)
        } else {
            Err(InviteError::IncompleteRun(self))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Dispatches invitations through the gateway and records one attempt per call.
pub struct RetryRunner<S: ?Sized, L: ?Sized, G: ?Sized> {
    store: Arc<S>,
    log: Arc<L>,
    gateway: Arc<G>,
    renderer: MessageRenderer,
    dispatch_timeout: Duration,
}

impl<S: ?Sized, L: ?Sized, G: ?Sized> Clone for RetryRunner<S, L, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
            gateway: Arc::clone(&self.gateway),
            renderer: self.renderer.clone(),
            dispatch_timeout: self.dispatch_timeout,
        }
    }
}

impl<S, L, G> RetryRunner<S, L, G>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
    G: DispatchGateway + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, log: Arc<L>, gateway: Arc<G>, renderer: MessageRenderer) -> Self {
        Self {
            store,
            log,
            gateway,
            renderer,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    pub fn renderer(&self) -> &MessageRenderer {
        &self.renderer
    }

    /// Calls the gateway in its own task so a panic or a hung transport
    /// turns into a failed outcome instead of aborting the caller.
    async fn send_isolated(&self, email: OutgoingEmail) -> DispatchOutcome {
        let gateway = Arc::clone(&self.gateway);
        let timeout = self.dispatch_timeout;
        let task = tokio::spawn(async move { tokio::time::timeout(timeout, gateway.send(&email)).await });

        match task.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => DispatchOutcome::failed(format!("dispatch timed out after {:?}", timeout)),
            Err(e) if e.is_panic() => {
                DispatchOutcome::failed(format!("dispatch panicked: {}", panic_message(e.into_panic())))
            }
            Err(e) => DispatchOutcome::failed(format!("dispatch task aborted: {}", e)),
        }
    }

    /// Renders and sends one invitation. Never fails: every problem is
    /// captured in the returned (unrecorded) attempt.
    async fn attempt_delivery(&self, invitation: &Invitation, origin: DispatchOrigin) -> DeliveryAttempt {
        let email = match self.renderer.render(invitation, origin) {
            Ok(email) => email,
            Err(e) => {
                warn!("Could not build email for invitation {}: {}", invitation.id, e);
                return DeliveryAttempt::failed(
                    &invitation.id,
                    &invitation.child_email,
                    origin.exception_subject(),
                    Utc::now(),
                    e.to_string(),
                );
            }
        };

        let subject = email.subject.clone();
        let outcome = self.send_isolated(email).await;
        let sent_at = Utc::now();

        if outcome.ok {
            info!("Invitation {} delivered to {}", invitation.id, invitation.child_email);
            DeliveryAttempt::succeeded(&invitation.id, &invitation.child_email, &subject, sent_at)
        } else {
            warn!(
                "Invitation {} failed for {}: {}",
                invitation.id, invitation.child_email, outcome.error_text
            );
            DeliveryAttempt::failed(
                &invitation.id,
                &invitation.child_email,
                &subject,
                sent_at,
                outcome.error_text,
            )
        }
    }

    /// Sends a single invitation and records the attempt.
    ///
    /// A failed send is still `Ok`: inspect `attempt.success` (or call
    /// `ensure_delivered`). Only a failed log write is an error.
    pub async fn dispatch(
        &self,
        invitation: &Invitation,
        origin: DispatchOrigin,
    ) -> InviteResult<DeliveryAttempt> {
        let attempt = self.attempt_delivery(invitation, origin).await;
        self.log.record(attempt).await.map_err(|e| {
            error!(
                "Failed to record delivery attempt for invitation {}: {}",
                invitation.id, e
            );
            InviteError::StoreWriteFailure(e.to_string())
        })
    }

    /// Processes each invitation independently; one failure never blocks the rest.
    pub async fn run_for(&self, invitations: &[Invitation], origin: DispatchOrigin) -> RunSummary {
        let mut summary = RunSummary::default();

        for invitation in invitations {
            let attempt = self.attempt_delivery(invitation, origin).await;
            summary.processed += 1;
            if attempt.success {
                summary.sent += 1;
            } else {
                summary.failed += 1;
            }

            if let Err(e) = self.log.record(attempt).await {
                error!(
                    "Failed to record delivery attempt for invitation {}: {}",
                    invitation.id, e
                );
                summary.record_failures.push(RecordFailure {
                    invitation_id: invitation.id.clone(),
                    error: e.to_string(),
                });
            }
        }

        info!(
            "Resend complete: {} sent, {} failed (processed {} invites)",
            summary.sent, summary.failed, summary.processed
        );
        summary
    }

    /// Runs one pass over everything the selector picks from the store.
    pub async fn run(
        &self,
        selector: &ResendSelector,
        origin: DispatchOrigin,
    ) -> InviteResult<RunSummary> {
        let selected = selector
            .find_eligible(self.store.as_ref(), self.log.as_ref(), Utc::now())
            .await?;
        info!(
            "Starting resend pass: policy={}, selected={}",
            selector.policy(),
            selected.len()
        );
        Ok(self.run_for(&selected, origin).await)
    }

    /// Runs one pass over an explicit set of invitations, filtered by the selector.
    pub async fn run_selected(
        &self,
        selector: &ResendSelector,
        invitation_ids: &[String],
        origin: DispatchOrigin,
    ) -> InviteResult<RunSummary> {
        let selected = selector
            .find_among(self.store.as_ref(), self.log.as_ref(), invitation_ids, Utc::now())
            .await?;
        Ok(self.run_for(&selected, origin).await)
    }
}
