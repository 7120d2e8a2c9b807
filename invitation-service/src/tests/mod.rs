use axum::Router;
use std::env;
use std::sync::Arc;

use crate::routes::{create_router_with_state, AppState};
use parentlink_shared::config::Branding;
use parentlink_shared::runner::RetryRunner;
use parentlink_shared::dispatch::MessageRenderer;
use parentlink_shared::store::memory::{MemoryDeliveryLog, MemoryInvitationStore};
use parentlink_shared::store::DeliveryLog;
use parentlink_shared::test_utils::mock_gateway::ScriptedGateway;
use parentlink_shared::test_utils::test_logging::init_test_logging;

mod invitation_handlers_test;

pub(crate) struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryInvitationStore>,
    pub log: Arc<MemoryDeliveryLog>,
    pub gateway: ScriptedGateway,
}

pub(crate) fn set_test_env() {
    init_test_logging();

    env::set_var(
        "SNS_TOPIC_ARN",
        "arn:aws:sns:us-east-1:123456789012:test-topic",
    );
    // Skip actual SNS publishing
    env::set_var("TEST_SNS", "true");
}

/// Router over in-memory stores and a scripted gateway that succeeds by default.
pub(crate) fn create_test_app() -> TestApp {
    set_test_env();

    let store = Arc::new(MemoryInvitationStore::new());
    let log = Arc::new(MemoryDeliveryLog::new());
    let gateway = ScriptedGateway::always_ok();
    let app = create_test_router(store.clone(), log.clone(), &gateway);
    TestApp {
        app,
        store,
        log,
        gateway,
    }
}

/// Router over the given stores, for tests that need a non-default delivery log.
pub(crate) fn create_test_router<L>(
    store: Arc<MemoryInvitationStore>,
    log: Arc<L>,
    gateway: &ScriptedGateway,
) -> Router
where
    L: DeliveryLog + 'static,
{
    let runner = RetryRunner::new(
        store,
        log,
        Arc::new(gateway.clone()),
        MessageRenderer::new(Branding::default()),
    );
    create_router_with_state(Arc::new(AppState::new(runner)), "")
}
