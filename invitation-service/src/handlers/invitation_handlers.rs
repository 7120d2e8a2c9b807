use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use log::{error, info};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::events::{publish_invitation_accepted, publish_invitation_created};
use crate::models::{
    AttemptResponse, CreateInvitationRequest, InvitationResponse, InvitationSummary,
};
use crate::routes::AppState;
use parentlink_shared::auth::AuthUser;
use parentlink_shared::dispatch::{DispatchGateway, DispatchOrigin};
use parentlink_shared::models::{normalize_email, DeliveryCounts, ParentRef};
use parentlink_shared::store::{DeliveryLog, InvitationStore};

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.contains('@')
        }
        None => false,
    }
}

// POST /invitations
pub async fn create_invitation<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let child_email = normalize_email(&request.child_email);
    if !looks_like_email(&child_email) {
        return Err(AppError::bad_request(format!(
            "Invalid child email: '{}'",
            request.child_email
        )));
    }

    let parent = ParentRef::new(user.user_id.clone(), user.email.clone());
    let invitation = state
        .store()
        .create_invitation(&parent, &child_email, request.child_name)
        .await?;

    info!(
        "Parent {} invited {} (invitation_id={})",
        parent.id, invitation.child_email, invitation.id
    );

    // The first email goes out from the notification service
    if let Err(e) = publish_invitation_created(&invitation).await {
        error!("Failed to publish invitation_created event: {:?}", e);
    }

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "invitation": InvitationResponse::from(invitation) })),
    ))
}

// GET /invitations
pub async fn list_invitations<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let mut invitations = state.store().get_invitations_by_parent(&user.user_id).await?;
    invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut summaries = Vec::with_capacity(invitations.len());
    for invitation in invitations {
        let attempts = state.log().attempts_for(&invitation.id).await?;
        let deliveries = DeliveryCounts::from_attempts(&attempts);
        summaries.push(InvitationSummary {
            invitation: InvitationResponse::from(invitation),
            deliveries,
            last_attempt: attempts.into_iter().next().map(AttemptResponse::from),
        });
    }

    Ok(Json(serde_json::json!({ "invitations": summaries })))
}

// POST /invitations/accept/:token
pub async fn accept_invitation<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(token): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let invitation = state.store().accept(&token).await?;
    info!(
        "Invitation {} accepted by user {}",
        invitation.id, user.user_id
    );

    if let Err(e) = publish_invitation_accepted(&invitation).await {
        error!("Failed to publish invitation_accepted event: {:?}", e);
    }

    Ok(Json(serde_json::json!({
        "message": "Invitation accepted",
        "invitation": InvitationResponse::from(invitation),
    })))
}

// POST /invitations/:id/resend
pub async fn resend_invitation<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let invitation = state.store().get_invitation(&id).await?;

    if invitation.parent_id != user.user_id {
        return Err(AppError::forbidden(
            "You can only resend your own invitations.".into(),
        ));
    }
    if invitation.is_accepted {
        return Err(AppError::conflict(format!(
            "Invitation {} has already been accepted",
            invitation.id
        )));
    }

    let attempt = state
        .runner
        .dispatch(&invitation, DispatchOrigin::ManualResend)
        .await?;
    // The attempt is already recorded; a failed send still reports 502
    attempt.ensure_delivered()?;

    Ok(Json(serde_json::json!({
        "message": "Invitation resent",
        "attempt": AttemptResponse::from(attempt),
    })))
}
