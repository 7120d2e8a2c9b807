use axum::{
    extract::Request,
    middleware,
    routing::{get, post},
    Router,
};
use log::{info, warn};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{
    admin_handlers::{bulk_resend, cleanup, export_deliveries, get_analytics},
    invitation_handlers::{accept_invitation, create_invitation, list_invitations, resend_invitation},
};
use parentlink_shared::auth::{auth_middleware, require_admin};
use parentlink_shared::config::{AnalyticsConfig, Branding, EmailConfig, ResendConfig};
use parentlink_shared::dispatch::{ConfiguredGateway, DispatchGateway, MessageRenderer};
use parentlink_shared::error::ConfigError;
use parentlink_shared::runner::RetryRunner;
use parentlink_shared::store::dynamo::{DynamoDeliveryLog, DynamoInvitationStore};
use parentlink_shared::store::{DeliveryLog, InvitationStore};

/// Shared by every handler: the runner owns the stores and the gateway.
pub struct AppState<S, L, G> {
    pub runner: RetryRunner<S, L, G>,
    pub resend: ResendConfig,
    pub analytics: AnalyticsConfig,
}

impl<S, L, G> AppState<S, L, G>
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    pub fn new(runner: RetryRunner<S, L, G>) -> Self {
        Self {
            runner,
            resend: ResendConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }

    pub fn with_config(mut self, resend: ResendConfig, analytics: AnalyticsConfig) -> Self {
        self.resend = resend;
        self.analytics = analytics;
        self
    }

    pub fn store(&self) -> &S {
        self.runner.store().as_ref()
    }

    pub fn log(&self) -> &L {
        self.runner.log().as_ref()
    }
}

/// Creates a router backed by DynamoDB and the configured email API
pub async fn create_router() -> Result<Router, ConfigError> {
    info!("Creating router with DynamoDB stores");

    let email = EmailConfig::from_env()?;
    let runner = RetryRunner::new(
        Arc::new(DynamoInvitationStore::new().await),
        Arc::new(DynamoDeliveryLog::new().await),
        Arc::new(ConfiguredGateway::from_config(&email)),
        MessageRenderer::new(Branding::from_env()),
    );
    let state = AppState::new(runner)
        .with_config(ResendConfig::from_env()?, AnalyticsConfig::from_env()?);

    // Check if we should remove the base path prefix
    let remove_base_path = std::env::var("REMOVE_BASE_PATH")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    let prefix = if remove_base_path { "" } else { "/Prod" };
    info!("Using API route prefix: {}", prefix);

    Ok(create_router_with_state(Arc::new(state), prefix))
}

/// Creates a router with the given stores and gateway
pub fn create_router_with_state<S, L, G>(state: Arc<AppState<S, L, G>>, prefix: &str) -> Router
where
    S: InvitationStore + 'static,
    L: DeliveryLog + 'static,
    G: DispatchGateway + 'static,
{
    info!("Setting up API routes with prefix: '{}'", prefix);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    async fn logging_middleware(
        req: Request,
        next: axum::middleware::Next,
    ) -> impl axum::response::IntoResponse {
        info!(
            "Router received request: method={}, uri={}",
            req.method(),
            req.uri()
        );
        next.run(req).await
    }

    let parent_routes = Router::new()
        .route(
            "/invitations",
            get(list_invitations::<S, L, G>).post(create_invitation::<S, L, G>),
        )
        .route("/invitations/accept/:token", post(accept_invitation::<S, L, G>))
        .route("/invitations/:id/resend", post(resend_invitation::<S, L, G>));

    let admin_routes = Router::new()
        .route("/admin/invitations/resend", post(bulk_resend::<S, L, G>))
        .route("/admin/invitations/analytics", get(get_analytics::<S, L, G>))
        .route(
            "/admin/invitations/analytics/export",
            get(export_deliveries::<S, L, G>),
        )
        .route("/admin/invitations/cleanup", post(cleanup::<S, L, G>))
        .layer(middleware::from_fn(require_admin));

    // The outer auth layer runs before the admin role check
    let api_routes = parent_routes
        .merge(admin_routes)
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state);

    let router = if prefix.is_empty() {
        api_routes
            .layer(cors)
            .layer(middleware::from_fn(logging_middleware))
    } else {
        Router::new()
            .nest(prefix, api_routes)
            .layer(cors)
            .layer(middleware::from_fn(logging_middleware))
    };

    router.fallback(|req: Request| async move {
        warn!("No route matched for: {} {}", req.method(), req.uri());
        (
            axum::http::StatusCode::NOT_FOUND,
            "The requested resource was not found".to_string(),
        )
    })
}
