use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use log::debug;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{normalize_email, DeliveryAttempt, ParentRef};
use crate::store::{DeliveryLog, InvitationStore};

/// Domain bucket for addresses without a usable `@domain` part.
pub const UNKNOWN_DOMAIN: &str = "(unknown)";
/// Parent bucket for attempts whose invitation no longer exists.
pub const UNKNOWN_PARENT: &str = "(unknown)";
pub const TOP_FAILING_LIMIT: usize = 10;

/// Percentage with a zero denominator reported as 0.
pub fn rate_percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Compares `a_part / a_total` with `b_part / b_total` without floating point.
fn cmp_ratio(a_part: usize, a_total: usize, b_part: usize, b_total: usize) -> Ordering {
    let a = a_part as u128 * b_total.max(1) as u128;
    let b = b_part as u128 * a_total.max(1) as u128;
    a.cmp(&b)
}

/// Reporting window: the last `days` days, or everything when `days` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalyticsWindow {
    pub days: u32,
}

impl AnalyticsWindow {
    pub fn last_days(days: u32) -> Self {
        Self { days }
    }

    pub fn unbounded() -> Self {
        Self { days: 0 }
    }

    /// Inclusive lower bound of the window. A window reaching past the
    /// earliest representable time is unbounded.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.days == 0 {
            return None;
        }
        Duration::try_days(i64::from(self.days)).and_then(|d| now.checked_sub_signed(d))
    }

    pub fn contains(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.since(now).map_or(true, |since| at >= since)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub success_rate: f64,
}

pub fn totals(attempts: &[DeliveryAttempt]) -> Totals {
    let success = attempts.iter().filter(|a| a.success).count();
    let total = attempts.len();
    Totals {
        total,
        success,
        failed: total - success,
        success_rate: rate_percent(success, total),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub start: NaiveDate,
    pub total: usize,
    pub success: usize,
    pub success_rate: f64,
}

fn bucketed<F>(attempts: &[DeliveryAttempt], key: F) -> Vec<Bucket>
where
    F: Fn(&DeliveryAttempt) -> NaiveDate,
{
    let mut buckets: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for attempt in attempts {
        let entry = buckets.entry(key(attempt)).or_default();
        entry.0 += 1;
        if attempt.success {
            entry.1 += 1;
        }
    }
    buckets
        .into_iter()
        .map(|(start, (total, success))| Bucket {
            start,
            total,
            success,
            success_rate: rate_percent(success, total),
        })
        .collect()
}

/// Start (Monday) of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Per calendar day (UTC), oldest first. Days without attempts are omitted.
pub fn by_day(attempts: &[DeliveryAttempt]) -> Vec<Bucket> {
    bucketed(attempts, |a| a.sent_at.date_naive())
}

/// Per ISO week, keyed by the week's Monday, oldest first.
pub fn by_week(attempts: &[DeliveryAttempt]) -> Vec<Bucket> {
    bucketed(attempts, |a| week_start(a.sent_at.date_naive()))
}

/// Case-folded text after the last `@`, or [`UNKNOWN_DOMAIN`].
pub fn domain_of(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((_, domain)) if !domain.trim().is_empty() => domain.trim().to_lowercase(),
        _ => UNKNOWN_DOMAIN.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStats {
    pub domain: String,
    pub total: usize,
    pub failed: usize,
    pub fail_rate: f64,
}

impl DomainStats {
    fn new(domain: String, total: usize, failed: usize) -> Self {
        Self {
            fail_rate: rate_percent(failed, total),
            domain,
            total,
            failed,
        }
    }
}

/// Per-domain totals, ordered by domain name.
pub fn domain_stats(attempts: &[DeliveryAttempt]) -> Vec<DomainStats> {
    let mut domains: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for attempt in attempts {
        let entry = domains.entry(domain_of(&attempt.to_email)).or_default();
        entry.0 += 1;
        if !attempt.success {
            entry.1 += 1;
        }
    }
    domains
        .into_iter()
        .map(|(domain, (total, failed))| DomainStats::new(domain, total, failed))
        .collect()
}

/// Domains with at least one failure, worst first, capped at [`TOP_FAILING_LIMIT`].
pub fn top_failing_domains(stats: &[DomainStats]) -> Vec<DomainStats> {
    let mut failing: Vec<DomainStats> = stats.iter().filter(|s| s.failed > 0).cloned().collect();
    failing.sort_by(|a, b| {
        b.failed
            .cmp(&a.failed)
            .then(b.total.cmp(&a.total))
            .then_with(|| a.domain.cmp(&b.domain))
    });
    failing.truncate(TOP_FAILING_LIMIT);
    failing
}

/// Thresholds for calling a domain's failures systemic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagPolicy {
    pub min_attempts: usize,
    pub min_fail_percent: usize,
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self {
            min_attempts: 5,
            min_fail_percent: 50,
        }
    }
}

impl FlagPolicy {
    pub fn flags(&self, stats: &DomainStats) -> bool {
        stats.total >= self.min_attempts
            && stats.failed * 100 >= self.min_fail_percent * stats.total
    }
}

/// Domains meeting `policy`, highest fail rate first, then by volume.
pub fn flagged_domains(stats: &[DomainStats], policy: &FlagPolicy) -> Vec<DomainStats> {
    let mut flagged: Vec<DomainStats> = stats.iter().filter(|s| policy.flags(s)).cloned().collect();
    flagged.sort_by(|a, b| {
        cmp_ratio(b.failed, b.total, a.failed, a.total)
            .then(b.total.cmp(&a.total))
            .then_with(|| a.domain.cmp(&b.domain))
    });
    flagged
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentOutcome {
    pub parent_id: String,
    pub parent_email: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Groups attempts by the parent that issued their invitation, busiest first.
///
/// `parents` maps invitation id to issuing parent.
pub fn per_parent(
    attempts: &[DeliveryAttempt],
    parents: &HashMap<String, ParentRef>,
) -> Vec<ParentOutcome> {
    let mut grouped: HashMap<&str, (&str, usize, usize)> = HashMap::new();
    for attempt in attempts {
        let (id, email) = match parents.get(&attempt.invitation_id) {
            Some(parent) => (parent.id.as_str(), parent.email.as_str()),
            None => (UNKNOWN_PARENT, ""),
        };
        let entry = grouped.entry(id).or_insert((email, 0, 0));
        entry.1 += 1;
        if attempt.success {
            entry.2 += 1;
        }
    }

    let mut outcomes: Vec<ParentOutcome> = grouped
        .into_iter()
        .map(|(id, (email, total, success))| ParentOutcome {
            parent_id: id.to_string(),
            parent_email: email.to_string(),
            total,
            success,
            failed: total - success,
            success_rate: rate_percent(success, total),
        })
        .collect();
    outcomes.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.parent_id.cmp(&b.parent_id)));
    outcomes
}

/// Parents with at least one failure, by failed then total descending.
pub fn top_failing_parents(outcomes: &[ParentOutcome], n: usize) -> Vec<ParentOutcome> {
    let mut failing: Vec<ParentOutcome> =
        outcomes.iter().filter(|o| o.failed > 0).cloned().collect();
    failing.sort_by(|a, b| {
        b.failed
            .cmp(&a.failed)
            .then(b.total.cmp(&a.total))
            .then_with(|| a.parent_id.cmp(&b.parent_id))
    });
    failing.truncate(n);
    failing
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientFailures {
    pub email: String,
    pub total: usize,
    pub failed: usize,
}

/// Addresses with at least one failure, by failed then total descending.
pub fn top_failing_recipients(attempts: &[DeliveryAttempt], n: usize) -> Vec<RecipientFailures> {
    let mut grouped: HashMap<String, (usize, usize)> = HashMap::new();
    for attempt in attempts {
        let entry = grouped.entry(normalize_email(&attempt.to_email)).or_default();
        entry.0 += 1;
        if !attempt.success {
            entry.1 += 1;
        }
    }

    let mut failing: Vec<RecipientFailures> = grouped
        .into_iter()
        .filter(|(_, (_, failed))| *failed > 0)
        .map(|(email, (total, failed))| RecipientFailures {
            email,
            total,
            failed,
        })
        .collect();
    failing.sort_by(|a, b| {
        b.failed
            .cmp(&a.failed)
            .then(b.total.cmp(&a.total))
            .then_with(|| a.email.cmp(&b.email))
    });
    failing.truncate(n);
    failing
}

/// Everything the admin dashboard shows for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub window_days: u32,
    pub since: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub totals: Totals,
    pub by_day: Vec<Bucket>,
    pub by_week: Vec<Bucket>,
    pub top_failing_domains: Vec<DomainStats>,
    pub flagged_domains: Vec<DomainStats>,
    pub per_parent: Vec<ParentOutcome>,
    pub top_failing_recipients: Vec<RecipientFailures>,
    pub top_failing_parents: Vec<ParentOutcome>,
}

impl AnalyticsReport {
    /// Builds the report from attempts (anything outside the window is ignored).
    pub fn build(
        window: AnalyticsWindow,
        now: DateTime<Utc>,
        attempts: &[DeliveryAttempt],
        parents: &HashMap<String, ParentRef>,
        flag_policy: &FlagPolicy,
    ) -> Self {
        let in_window: Vec<DeliveryAttempt> = attempts
            .iter()
            .filter(|a| window.contains(a.sent_at, now))
            .cloned()
            .collect();

        let domains = domain_stats(&in_window);
        let parent_outcomes = per_parent(&in_window, parents);

        Self {
            window_days: window.days,
            since: window.since(now),
            generated_at: now,
            totals: totals(&in_window),
            by_day: by_day(&in_window),
            by_week: by_week(&in_window),
            top_failing_domains: top_failing_domains(&domains),
            flagged_domains: flagged_domains(&domains, flag_policy),
            top_failing_recipients: top_failing_recipients(&in_window, TOP_FAILING_LIMIT),
            top_failing_parents: top_failing_parents(&parent_outcomes, TOP_FAILING_LIMIT),
            per_parent: parent_outcomes,
        }
    }

    pub async fn load<S, L>(
        store: &S,
        log: &L,
        window: AnalyticsWindow,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError>
    where
        S: InvitationStore + ?Sized,
        L: DeliveryLog + ?Sized,
    {
        let (attempts, parents) = load_window(store, log, window, now).await?;
        Ok(Self::build(
            window,
            now,
            &attempts,
            &parents,
            &FlagPolicy::default(),
        ))
    }
}

/// Attempts inside `window` plus the invitation-to-parent map needed to attribute them.
pub async fn load_window<S, L>(
    store: &S,
    log: &L,
    window: AnalyticsWindow,
    now: DateTime<Utc>,
) -> Result<(Vec<DeliveryAttempt>, HashMap<String, ParentRef>), StoreError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
{
    let attempts = log.attempts_since(window.since(now)).await?;
    let parents: HashMap<String, ParentRef> = store
        .list_invitations()
        .await?
        .into_iter()
        .map(|inv| {
            let parent = inv.parent();
            (inv.id, parent)
        })
        .collect();
    debug!(
        "Loaded {} attempts across {} invitations for a {}-day window",
        attempts.len(),
        parents.len(),
        window.days
    );
    Ok((attempts, parents))
}
