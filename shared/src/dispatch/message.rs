use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::OutgoingEmail;
use crate::config::Branding;
use crate::models::Invitation;

pub const ACCEPT_PATH: &str = "/invitations/accept";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Invitation {0} has no recipient address")]
    EmptyRecipient(String),

    #[error("Recipient address '{0}' is not a valid email address")]
    InvalidRecipient(String),
}

/// Which path triggered a dispatch. Determines the subject line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrigin {
    Initial,
    ManualResend,
    BulkResend,
    FailedOnlyResend,
    AutomatedResend,
}

impl DispatchOrigin {
    fn subject_label(self) -> Option<&'static str> {
        match self {
            DispatchOrigin::Initial => None,
            DispatchOrigin::ManualResend => Some("Resend"),
            DispatchOrigin::BulkResend => Some("Bulk Resend"),
            DispatchOrigin::FailedOnlyResend => Some("Bulk Resend: Failed Only"),
            DispatchOrigin::AutomatedResend => Some("Automated Resend"),
        }
    }

    /// Subject recorded when the message could not even be built.
    pub fn exception_subject(self) -> &'static str {
        match self {
            DispatchOrigin::Initial => "[INVITE] Send Exception",
            DispatchOrigin::ManualResend => "[PARENT] Resend Exception",
            DispatchOrigin::BulkResend => "[ADMIN] Resend Exception",
            DispatchOrigin::FailedOnlyResend => "[ADMIN] Resend Failed-Only Exception",
            DispatchOrigin::AutomatedResend => "[MGMT] Resend Exception",
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Builds invitation emails from the configured branding.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    branding: Branding,
}

impl MessageRenderer {
    pub fn new(branding: Branding) -> Self {
        Self { branding }
    }

    pub fn branding(&self) -> &Branding {
        &self.branding
    }

    /// Absolute acceptance link, or just the path when no site URL is configured.
    pub fn accept_url(&self, token: &str) -> String {
        let site = self.branding.site_url.trim_end_matches('/');
        format!("{}{}/{}", site, ACCEPT_PATH, token)
    }

    pub fn subject(&self, origin: DispatchOrigin) -> String {
        let base = format!("{} Parent Invite", self.branding.brand_name);
        let subject = match origin.subject_label() {
            Some(label) => format!("{} ({})", base, label),
            None => base,
        };
        let prefix = self.branding.subject_prefix.trim();
        if prefix.is_empty() {
            subject
        } else {
            format!("{} {}", prefix, subject)
        }
    }

    pub fn render(
        &self,
        invitation: &Invitation,
        origin: DispatchOrigin,
    ) -> Result<OutgoingEmail, RenderError> {
        let recipient = invitation.child_email.trim();
        if recipient.is_empty() {
            return Err(RenderError::EmptyRecipient(invitation.id.clone()));
        }
        match recipient.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(RenderError::InvalidRecipient(recipient.to_string())),
        }

        let b = &self.branding;
        let brand = escape_html(&b.brand_name);
        let color = escape_html(&b.brand_color);
        let accept_url = escape_html(&self.accept_url(&invitation.token));
        let greeting = escape_html(invitation.child_name.as_deref().unwrap_or(recipient));
        let parent = escape_html(&invitation.parent_email);

        let logo = if b.logo_url.is_empty() {
            String::new()
        } else {
            format!(
                r#"<img src="{}" alt="{}" style="max-height:48px" />"#,
                escape_html(&b.logo_url),
                brand
            )
        };

        let html_body = format!(
            r#"<div style="font-family:Arial,sans-serif;max-width:560px;margin:auto">
{logo}
<h2 style="color:{color}">{brand}</h2>
<p>Hi {greeting},</p>
<p>{parent} would like to link their parent account to your {brand} account so they can follow your progress.</p>
<p><a href="{accept_url}" style="background:{color};color:#ffffff;padding:10px 18px;border-radius:6px;text-decoration:none">Accept invitation</a></p>
<p style="font-size:12px;color:#6b7280">If the button does not work, open this link: {accept_url}</p>
</div>"#
        );

        Ok(OutgoingEmail {
            subject: self.subject(origin),
            html_body,
            recipients: vec![recipient.to_string()],
        })
    }
}
