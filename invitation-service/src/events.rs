use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use log::{debug, info};
use parentlink_shared::models::events::{
    InvitationEvent, INVITATION_ACCEPTED, INVITATION_CREATED,
};
use parentlink_shared::models::{now_str, Invitation};
use std::collections::HashMap;
use std::env;
use tokio::sync::OnceCell;

use crate::error::{AppError, Result};

// SNS publishing for invitation events
static SNS_CLIENT: OnceCell<SnsClient> = OnceCell::const_new();
static TOPIC_ARN: OnceCell<String> = OnceCell::const_new();

fn event_for(event_type: &str, invitation: &Invitation) -> InvitationEvent {
    InvitationEvent {
        event_type: event_type.to_string(),
        invitation_id: invitation.id.clone(),
        parent_id: invitation.parent_id.clone(),
        child_email: invitation.child_email.clone(),
        timestamp: now_str(),
    }
}

fn subject_for(event_type: &str) -> &'static str {
    if event_type == INVITATION_ACCEPTED {
        "Invitation Accepted"
    } else {
        "Invitation Created"
    }
}

/// Publishes `invitation_created`; the notification service performs the first send.
pub async fn publish_invitation_created(invitation: &Invitation) -> Result<()> {
    publish(event_for(INVITATION_CREATED, invitation)).await
}

pub async fn publish_invitation_accepted(invitation: &Invitation) -> Result<()> {
    publish(event_for(INVITATION_ACCEPTED, invitation)).await
}

async fn publish(event: InvitationEvent) -> Result<()> {
    debug!(
        "Publishing {} event for invitation_id={}",
        event.event_type, event.invitation_id
    );

    if env::var("TEST_SNS").map(|v| v == "true").unwrap_or(false) {
        debug!(
            "Test mode: Skipping SNS publishing for {} event, invitation_id={}",
            event.event_type, event.invitation_id
        );
        return Ok(());
    }

    let client = SNS_CLIENT
        .get_or_init(|| async {
            let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await;
            SnsClient::new(&config)
        })
        .await
        .clone();

    let topic_arn = TOPIC_ARN
        .get_or_try_init(|| async {
            env::var("SNS_TOPIC_ARN").map_err(|_| {
                AppError::internal_server_error("SNS_TOPIC_ARN environment variable not set".into())
            })
        })
        .await?;

    let message = serde_json::to_string(&event).map_err(|e| {
        AppError::internal_server_error(format!("Failed to serialize event payload: {}", e))
    })?;

    let event_type_attr = MessageAttributeValue::builder()
        .data_type("String")
        .string_value(&event.event_type)
        .build()
        .map_err(|e| {
            AppError::internal_server_error(format!("Failed to build message attribute: {}", e))
        })?;

    let mut message_attributes = HashMap::new();
    message_attributes.insert("eventType".to_string(), event_type_attr);

    client
        .publish()
        .topic_arn(topic_arn)
        .message(message)
        .subject(subject_for(&event.event_type))
        .set_message_attributes(Some(message_attributes))
        .send()
        .await
        .map_err(|e| {
            AppError::internal_server_error(format!("Failed to publish to SNS: {}", e))
        })?;

    info!(
        "Published {} event for invitation_id={}",
        event.event_type, event.invitation_id
    );
    Ok(())
}
