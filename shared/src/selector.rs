use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::ResendConfig;
use crate::error::StoreError;
use crate::models::{DeliveryCounts, Invitation};
use crate::store::{DeliveryLog, InvitationStore};

/// Which non-accepted invitations qualify for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResendPolicy {
    /// Every invitation not yet accepted.
    AllPending,
    /// At least one failed attempt on record.
    HasFailure,
    /// No successful attempt ever (includes never-attempted invitations).
    NeverSucceeded,
}

impl ResendPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResendPolicy::AllPending => "all-pending",
            ResendPolicy::HasFailure => "has-failure",
            ResendPolicy::NeverSucceeded => "never-succeeded",
        }
    }

    pub fn admits(self, invitation: &Invitation, counts: &DeliveryCounts) -> bool {
        if invitation.is_accepted {
            return false;
        }
        match self {
            ResendPolicy::AllPending => true,
            ResendPolicy::HasFailure => counts.failed > 0,
            ResendPolicy::NeverSucceeded => counts.succeeded() == 0,
        }
    }
}

impl fmt::Display for ResendPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "all-pending" | "all" => Ok(ResendPolicy::AllPending),
            "has-failure" | "failed-only" => Ok(ResendPolicy::HasFailure),
            "never-succeeded" | "only-never-success" => Ok(ResendPolicy::NeverSucceeded),
            other => Err(format!("unknown resend policy '{}'", other)),
        }
    }
}

/// Chooses invitations for a retry pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResendSelector {
    policy: ResendPolicy,
    limit: Option<usize>,
    quiet_period: Option<Duration>,
}

impl ResendSelector {
    pub fn new(policy: ResendPolicy) -> Self {
        Self {
            policy,
            limit: None,
            quiet_period: None,
        }
    }

    pub fn from_config(config: &ResendConfig) -> Self {
        Self::new(config.policy)
            .limit(config.limit)
            .quiet_period(config.quiet_period)
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Excludes invitations whose latest attempt is newer than `now - period`.
    pub fn quiet_period(mut self, period: Option<Duration>) -> Self {
        self.quiet_period = period;
        self
    }

    pub fn policy(&self) -> ResendPolicy {
        self.policy
    }

    /// Pure selection over a snapshot of invitations and their delivery counts.
    ///
    /// The result is ordered by creation time then id, has no duplicates and
    /// is capped at `limit`.
    pub fn select(
        &self,
        candidates: Vec<Invitation>,
        counts: &HashMap<String, DeliveryCounts>,
        now: DateTime<Utc>,
    ) -> Vec<Invitation> {
        let empty = DeliveryCounts::default();
        let quiet_since = self
            .quiet_period
            .map(|p| now.checked_sub_signed(p).unwrap_or(DateTime::<Utc>::MIN_UTC));
        let mut seen = HashSet::new();

        let mut selected: Vec<Invitation> = candidates
            .into_iter()
            .filter(|inv| {
                let c = counts.get(&inv.id).unwrap_or(&empty);
                if !self.policy.admits(inv, c) {
                    return false;
                }
                match (quiet_since, c.last_attempt_at) {
                    (Some(since), Some(last)) if last > since => {
                        debug!(
                            "Skipping invitation {}: last attempt {} inside quiet period",
                            inv.id, last
                        );
                        false
                    }
                    _ => true,
                }
            })
            .filter(|inv| seen.insert(inv.id.clone()))
            .collect();

        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// Selects from every pending invitation in the store.
    pub async fn find_eligible<S, L>(
        &self,
        store: &S,
        log: &L,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, StoreError>
    where
        S: InvitationStore + ?Sized,
        L: DeliveryLog + ?Sized,
    {
        let pending = store.pending_invitations().await?;
        let ids: Vec<String> = pending.iter().map(|inv| inv.id.clone()).collect();
        let counts = log.counts_for_many(&ids).await?;
        let selected = self.select(pending, &counts, now);
        debug!(
            "Policy {} selected {} of {} pending invitations",
            self.policy,
            selected.len(),
            ids.len()
        );
        Ok(selected)
    }

    /// Applies the policy to an explicit list of invitation ids. Unknown ids
    /// are skipped.
    pub async fn find_among<S, L>(
        &self,
        store: &S,
        log: &L,
        invitation_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, StoreError>
    where
        S: InvitationStore + ?Sized,
        L: DeliveryLog + ?Sized,
    {
        let mut candidates = Vec::with_capacity(invitation_ids.len());
        for id in invitation_ids {
            match store.get_invitation(id).await {
                Ok(inv) => candidates.push(inv),
                Err(StoreError::NotFound(_)) => warn!("Skipping unknown invitation {}", id),
                Err(e) => return Err(e),
            }
        }
        let ids: Vec<String> = candidates.iter().map(|inv| inv.id.clone()).collect();
        let counts = log.counts_for_many(&ids).await?;
        Ok(self.select(candidates, &counts, now))
    }
}

/// Selects eligible invitations under `policy`, capped at `limit`.
pub async fn find_eligible<S, L>(
    store: &S,
    log: &L,
    policy: ResendPolicy,
    limit: Option<usize>,
) -> Result<Vec<Invitation>, StoreError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
{
    ResendSelector::new(policy)
        .limit(limit)
        .find_eligible(store, log, Utc::now())
        .await
}
