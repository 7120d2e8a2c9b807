use aws_lambda_events::event::sns::SnsEvent;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use log::{error, info, warn};
use parentlink_shared::config::{Branding, EmailConfig};
use parentlink_shared::dispatch::{
    ConfiguredGateway, DispatchGateway, DispatchOrigin, MessageRenderer,
};
use parentlink_shared::error::StoreError;
use parentlink_shared::models::events::{InvitationEvent, INVITATION_CREATED};
use parentlink_shared::runner::RetryRunner;
use parentlink_shared::store::dynamo::{DynamoDeliveryLog, DynamoInvitationStore};
use parentlink_shared::store::{DeliveryLog, InvitationStore};
use std::sync::Arc;

mod errors;

use errors::NotificationError;

type LiveRunner = RetryRunner<DynamoInvitationStore, DynamoDeliveryLog, ConfiguredGateway>;

/// What happened to one SNS message.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Delivered,
    /// The attempt was recorded as failed; later resend passes pick it up.
    DeliveryFailed(String),
    Skipped(&'static str),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize env_logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Notification Service Lambda");

    let email = EmailConfig::from_env()?;
    let runner: LiveRunner = RetryRunner::new(
        Arc::new(DynamoInvitationStore::new().await),
        Arc::new(DynamoDeliveryLog::new().await),
        Arc::new(ConfiguredGateway::from_config(&email)),
        MessageRenderer::new(Branding::from_env()),
    );

    lambda_runtime::run(service_fn(|event| handler(event, runner.clone()))).await?;
    Ok(())
}

/// Lambda handler function
async fn handler(event: LambdaEvent<SnsEvent>, runner: LiveRunner) -> Result<(), Error> {
    let sns_event = event.payload;

    for record in sns_event.records {
        let message = record.sns;
        info!("Processing SNS message: {:?}", message.message_id);

        // One bad message never blocks the rest of the batch
        match process_message(&runner, &message.message).await {
            Ok(outcome) => info!("SNS message {:?}: {:?}", message.message_id, outcome),
            Err(e) => error!(
                "Failed to process SNS message {:?}: {}",
                message.message_id, e
            ),
        }
    }

    Ok(())
}

async fn process_message<S, L, G>(
    runner: &RetryRunner<S, L, G>,
    message: &str,
) -> Result<Outcome, NotificationError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
    G: DispatchGateway + ?Sized + 'static,
{
    let event: InvitationEvent = serde_json::from_str(message)
        .map_err(|e| NotificationError::InvalidPayload(e.to_string()))?;

    if event.event_type != INVITATION_CREATED {
        warn!("Ignoring event type: {}", event.event_type);
        return Ok(Outcome::Skipped("not an invitation_created event"));
    }

    handle_invitation_created(runner, &event).await
}

/// Sends the first email for a freshly created invitation.
async fn handle_invitation_created<S, L, G>(
    runner: &RetryRunner<S, L, G>,
    event: &InvitationEvent,
) -> Result<Outcome, NotificationError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
    G: DispatchGateway + ?Sized + 'static,
{
    let invitation = match runner.store().get_invitation(&event.invitation_id).await {
        Ok(invitation) => invitation,
        Err(StoreError::NotFound(_)) => {
            warn!(
                "Invitation {} no longer exists, nothing to send",
                event.invitation_id
            );
            return Ok(Outcome::Skipped("invitation not found"));
        }
        Err(e) => return Err(e.into()),
    };

    if invitation.is_accepted {
        info!("Invitation {} already accepted, skipping send", invitation.id);
        return Ok(Outcome::Skipped("invitation already accepted"));
    }

    // SNS may redeliver; only the first delivery sends
    if !runner.log().attempts_for(&invitation.id).await?.is_empty() {
        info!(
            "Invitation {} already has delivery attempts, skipping initial send",
            invitation.id
        );
        return Ok(Outcome::Skipped("initial send already attempted"));
    }

    let attempt = runner.dispatch(&invitation, DispatchOrigin::Initial).await?;
    if attempt.success {
        Ok(Outcome::Delivered)
    } else {
        Ok(Outcome::DeliveryFailed(attempt.error_text))
    }
}
