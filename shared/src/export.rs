use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::analytics::{load_window, AnalyticsWindow};
use crate::error::StoreError;
use crate::models::{DeliveryAttempt, ParentRef};
use crate::store::{DeliveryLog, InvitationStore};

pub const CSV_HEADER: &str =
    "sent_at,to_email,subject,success,error_text,invitation_id,parent_id,parent_email";

/// One delivery attempt joined to the parent that issued its invitation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub sent_at: DateTime<Utc>,
    pub to_email: String,
    pub subject: String,
    pub success: bool,
    pub error_text: String,
    pub invitation_id: String,
    pub parent_id: String,
    pub parent_email: String,
}

/// Newest attempts first. Attempts for deleted invitations keep empty parent columns.
pub fn build_rows(
    attempts: Vec<DeliveryAttempt>,
    parents: &HashMap<String, ParentRef>,
) -> Vec<ExportRow> {
    let mut rows: Vec<ExportRow> = attempts
        .into_iter()
        .map(|a| {
            let (parent_id, parent_email) = parents
                .get(&a.invitation_id)
                .map(|p| (p.id.clone(), p.email.clone()))
                .unwrap_or_default();
            ExportRow {
                sent_at: a.sent_at,
                to_email: a.to_email,
                subject: a.subject,
                success: a.success,
                error_text: a.error_text,
                invitation_id: a.invitation_id,
                parent_id,
                parent_email,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    rows
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");
    for row in rows {
        let fields = [
            row.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            csv_field(&row.to_email),
            csv_field(&row.subject),
            if row.success { "1" } else { "0" }.to_string(),
            csv_field(&single_line(&row.error_text)),
            csv_field(&row.invitation_id),
            csv_field(&row.parent_id),
            csv_field(&row.parent_email),
        ];
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Export rows for every attempt inside `window`.
pub async fn load_rows<S, L>(
    store: &S,
    log: &L,
    window: AnalyticsWindow,
    now: DateTime<Utc>,
) -> Result<Vec<ExportRow>, StoreError>
where
    S: InvitationStore + ?Sized,
    L: DeliveryLog + ?Sized,
{
    let (attempts, parents) = load_window(store, log, window, now).await?;
    Ok(build_rows(attempts, &parents))
}
