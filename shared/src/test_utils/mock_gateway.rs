use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::{DispatchGateway, DispatchOutcome, OutgoingEmail};

struct Script {
    default: DispatchOutcome,
    per_recipient: HashMap<String, DispatchOutcome>,
    queued: HashMap<String, VecDeque<DispatchOutcome>>,
    sent: Vec<OutgoingEmail>,
}

/// Gateway returning scripted outcomes and remembering everything it was asked to send.
///
/// Clones share state, so a test can keep a handle after giving one to a runner.
#[derive(Clone)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    fn with_default(default: DispatchOutcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                default,
                per_recipient: HashMap::new(),
                queued: HashMap::new(),
                sent: Vec::new(),
            })),
        }
    }

    pub fn always_ok() -> Self {
        Self::with_default(DispatchOutcome::delivered())
    }

    pub fn always_failing(error_text: &str) -> Self {
        Self::with_default(DispatchOutcome::failed(error_text))
    }

    pub fn set_default(&self, outcome: DispatchOutcome) {
        self.script.lock().unwrap().default = outcome;
    }

    /// Every send to `recipient` fails with `error_text`.
    pub fn fail_recipient(&self, recipient: &str, error_text: &str) {
        self.script
            .lock()
            .unwrap()
            .per_recipient
            .insert(recipient.to_string(), DispatchOutcome::failed(error_text));
    }

    /// Queues one-shot outcomes for `recipient`, consumed before any other rule.
    pub fn queue(&self, recipient: &str, outcomes: Vec<DispatchOutcome>) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(recipient.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.script.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl DispatchGateway for ScriptedGateway {
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome {
        let mut script = self.script.lock().unwrap();
        script.sent.push(email.clone());
        let recipient = email.recipients.first().cloned().unwrap_or_default();

        if let Some(next) = script.queued.get_mut(&recipient).and_then(|q| q.pop_front()) {
            return next;
        }
        script
            .per_recipient
            .get(&recipient)
            .cloned()
            .unwrap_or_else(|| script.default.clone())
    }
}

/// Gateway that violates the contract by panicking.
pub struct PanickingGateway;

#[async_trait]
impl DispatchGateway for PanickingGateway {
    async fn send(&self, email: &OutgoingEmail) -> DispatchOutcome {
        panic!("transport exploded while sending '{}'", email.subject);
    }
}

/// Gateway that takes `delay` before succeeding.
pub struct SlowGateway {
    delay: Duration,
}

impl SlowGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DispatchGateway for SlowGateway {
    async fn send(&self, _email: &OutgoingEmail) -> DispatchOutcome {
        tokio::time::sleep(self.delay).await;
        DispatchOutcome::delivered()
    }
}
