use axum::{
    extract::{Extension, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use log::info;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{AnalyticsQuery, BulkResendRequest, CleanupRequest};
use crate::routes::AppState;
use parentlink_shared::analytics::{AnalyticsReport, AnalyticsWindow};
use parentlink_shared::auth::AuthUser;
use parentlink_shared::cleanup::purge_for_emails;
use parentlink_shared::config::AnalyticsConfig;
use parentlink_shared::dispatch::{DispatchGateway, DispatchOrigin};
use parentlink_shared::export::{load_rows, to_csv};
use parentlink_shared::selector::{ResendPolicy, ResendSelector};
use parentlink_shared::store::{DeliveryLog, InvitationStore};

pub const EXPORT_FILENAME: &str = "invite_deliveries.csv";

fn window_for(config: &AnalyticsConfig, query: &AnalyticsQuery) -> AnalyticsWindow {
    AnalyticsWindow::last_days(query.days.unwrap_or(config.default_days))
}

// POST /admin/invitations/resend
pub async fn bulk_resend<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<BulkResendRequest>,
) -> Result<Json<serde_json::Value>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let policy: ResendPolicy = request.policy.parse().map_err(AppError::bad_request)?;
    let origin = match policy {
        ResendPolicy::HasFailure => DispatchOrigin::FailedOnlyResend,
        _ => DispatchOrigin::BulkResend,
    };
    let limit = match request.limit {
        Some(0) => None,
        Some(n) => Some(n),
        None => state.resend.limit,
    };
    let selector = ResendSelector::new(policy).limit(limit);

    info!(
        "Admin {} started bulk resend: policy={}, limit={:?}, explicit_ids={}",
        user.user_id,
        policy,
        limit,
        request.invitation_ids.as_ref().map_or(0, Vec::len)
    );

    let summary = match &request.invitation_ids {
        Some(ids) => state.runner.run_selected(&selector, ids, origin).await?,
        None => state.runner.run(&selector, origin).await?,
    };
    let summary = summary.into_result()?;

    Ok(Json(serde_json::json!({
        "policy": policy,
        "summary": summary,
    })))
}

// GET /admin/invitations/analytics?days=N
pub async fn get_analytics<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsReport>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let window = window_for(&state.analytics, &query);
    let report = AnalyticsReport::load(state.store(), state.log(), window, Utc::now()).await?;
    Ok(Json(report))
}

// GET /admin/invitations/analytics/export?days=N
pub async fn export_deliveries<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    let window = window_for(&state.analytics, &query);
    let rows = load_rows(state.store(), state.log(), window, Utc::now()).await?;
    info!("Exporting {} delivery rows ({}-day window)", rows.len(), window.days);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
            ),
        ],
        to_csv(&rows),
    )
        .into_response())
}

// POST /admin/invitations/cleanup
pub async fn cleanup<S, L, G>(
    State(state): State<Arc<AppState<S, L, G>>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<serde_json::Value>>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    if request.emails.iter().all(|e| e.trim().is_empty()) {
        return Err(AppError::bad_request(
            "At least one email address is required.".into(),
        ));
    }

    let summary = purge_for_emails(state.store(), state.log(), &request.emails).await?;
    info!(
        "Admin {} cleaned up {} invitations and {} deliveries",
        user.user_id, summary.invitations, summary.deliveries
    );

    Ok(Json(serde_json::json!({ "deleted": summary })))
}
