use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use log::{error, info};
use parentlink_shared::config::{Branding, EmailConfig, ResendConfig};
use parentlink_shared::dispatch::{
    ConfiguredGateway, DispatchGateway, DispatchOrigin, MessageRenderer,
};
use parentlink_shared::error::{InviteError, InviteResult};
use parentlink_shared::runner::{RetryRunner, RunSummary};
use parentlink_shared::selector::ResendSelector;
use parentlink_shared::store::dynamo::{DynamoDeliveryLog, DynamoInvitationStore};
use parentlink_shared::store::{DeliveryLog, InvitationStore};
use std::sync::Arc;

type LiveRunner = RetryRunner<DynamoInvitationStore, DynamoDeliveryLog, ConfiguredGateway>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Reminder Service Lambda");

    let email = EmailConfig::from_env()?;
    let resend = ResendConfig::from_env()?;
    info!(
        "Resend policy={}, limit={:?}, quiet period={:?}",
        resend.policy, resend.limit, resend.quiet_period
    );

    let runner: LiveRunner = RetryRunner::new(
        Arc::new(DynamoInvitationStore::new().await),
        Arc::new(DynamoDeliveryLog::new().await),
        Arc::new(ConfiguredGateway::from_config(&email)),
        MessageRenderer::new(Branding::from_env()),
    );

    lambda_runtime::run(service_fn(|event| {
        handler(event, runner.clone(), resend.clone())
    }))
    .await?;

    Ok(())
}

async fn handler(
    _event: LambdaEvent<CloudWatchEvent>,
    runner: LiveRunner,
    resend: ResendConfig,
) -> Result<(), Error> {
    info!("Reminder service triggered");

    match run_pass(&runner, &resend).await {
        Ok(summary) => {
            info!(
                "Reminder service completed. Processed {} invitations: {} sent, {} failed",
                summary.processed, summary.sent, summary.failed
            );
            Ok(())
        }
        Err(e) => {
            if let InviteError::IncompleteRun(summary) = &e {
                error!(
                    "Reminder pass lost {} delivery records. Processed {} invitations: {} sent, {} failed",
                    summary.record_failures.len(),
                    summary.processed,
                    summary.sent,
                    summary.failed
                );
            }
            error!("Reminder pass did not complete cleanly: {}", e);
            Err(Error::from(e.to_string()))
        }
    }
}

/// One scheduled resend pass. Dispatch failures are part of the summary;
/// only selection errors and lost delivery records fail the pass.
async fn run_pass<S, L, G>(
    runner: &RetryRunner<S, L, G>,
    resend: &ResendConfig,
) -> InviteResult<RunSummary>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
    G: DispatchGateway + ?Sized + 'static,
{
    let selector = ResendSelector::from_config(resend);
    runner
        .run(&selector, DispatchOrigin::AutomatedResend)
        .await?
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use parentlink_shared::selector::ResendPolicy;
    use parentlink_shared::store::memory::{MemoryDeliveryLog, MemoryInvitationStore};
    use parentlink_shared::test_utils::failing_log::FailingDeliveryLog;
    use parentlink_shared::test_utils::fixtures::{parent, seed_attempt, seed_invitation};
    use parentlink_shared::test_utils::mock_gateway::ScriptedGateway;
    use parentlink_shared::test_utils::test_logging::init_test_logging;

    fn test_runner(
        gateway: &ScriptedGateway,
    ) -> RetryRunner<MemoryInvitationStore, MemoryDeliveryLog, ScriptedGateway> {
        init_test_logging();
        RetryRunner::new(
            Arc::new(MemoryInvitationStore::new()),
            Arc::new(MemoryDeliveryLog::new()),
            Arc::new(gateway.clone()),
            MessageRenderer::new(Branding::default()),
        )
    }

    #[tokio::test]
    async fn test_pass_skips_recently_attempted_invitations() {
        let gateway = ScriptedGateway::always_ok();
        let runner = test_runner(&gateway);
        let store = runner.store().as_ref();
        let log = runner.log().as_ref();
        let now = Utc::now();

        let stale = seed_invitation(store, &parent(1), "stale@school.org").await;
        seed_attempt(log, &stale, false, now - Duration::hours(30)).await;
        let fresh = seed_invitation(store, &parent(1), "fresh@school.org").await;
        seed_attempt(log, &fresh, false, now - Duration::hours(2)).await;
        let delivered = seed_invitation(store, &parent(2), "ok@school.org").await;
        seed_attempt(log, &delivered, true, now - Duration::hours(30)).await;

        let summary = run_pass(&runner, &ResendConfig::default()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.sent, 1);
        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["stale@school.org".to_string()]);
        assert_eq!(sent[0].subject, "EduVanta Parent Invite (Automated Resend)");
    }

    #[tokio::test]
    async fn test_pass_tolerates_dispatch_failures() {
        let gateway = ScriptedGateway::always_ok();
        gateway.fail_recipient("b@school.org", "mailbox full");
        let runner = test_runner(&gateway);
        let store = runner.store().as_ref();
        for email in ["a@school.org", "b@school.org", "c@school.org"] {
            seed_invitation(store, &parent(1), email).await;
        }
        let config = ResendConfig {
            policy: ResendPolicy::AllPending,
            limit: None,
            quiet_period: None,
        };

        let summary = run_pass(&runner, &config).await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_pass_respects_limit() {
        let gateway = ScriptedGateway::always_ok();
        let runner = test_runner(&gateway);
        let store = runner.store().as_ref();
        for i in 0..5 {
            seed_invitation(store, &parent(1), &format!("kid{}@school.org", i)).await;
        }
        let config = ResendConfig {
            policy: ResendPolicy::NeverSucceeded,
            limit: Some(2),
            quiet_period: None,
        };

        let summary = run_pass(&runner, &config).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_lost_delivery_record_fails_the_pass() {
        init_test_logging();
        let gateway = ScriptedGateway::always_ok();
        let store = Arc::new(MemoryInvitationStore::new());
        let runner = RetryRunner::new(
            store.clone(),
            Arc::new(FailingDeliveryLog::failing_for(&["b@school.org"])),
            Arc::new(gateway.clone()),
            MessageRenderer::new(Branding::default()),
        );
        seed_invitation(store.as_ref(), &parent(1), "a@school.org").await;
        seed_invitation(store.as_ref(), &parent(1), "b@school.org").await;
        let config = ResendConfig {
            policy: ResendPolicy::AllPending,
            limit: None,
            quiet_period: None,
        };

        let result = run_pass(&runner, &config).await;

        match result {
            Err(InviteError::IncompleteRun(summary)) => {
                assert_eq!(summary.processed, 2);
                assert_eq!(summary.sent, 2);
                assert_eq!(summary.record_failures.len(), 1);
            }
            other => panic!("expected an incomplete run, got {:?}", other),
        }
        // The whole pass still ran
        assert_eq!(gateway.sent().len(), 2);
    }
}
