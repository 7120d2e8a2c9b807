//! Environment-driven configuration.
//!
//! Every section has a `from_env` constructor and a `from_lookup` variant
//! that takes an arbitrary key lookup, which keeps tests independent of the
//! process environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::error::ConfigError;
use crate::selector::ResendPolicy;

pub const DEFAULT_BRAND_NAME: &str = "EduVanta";
pub const DEFAULT_BRAND_COLOR: &str = "#4f46e5";
pub const DEFAULT_EMAIL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RESEND_LIMIT: usize = 100;
pub const DEFAULT_QUIET_HOURS: i64 = 6;
pub const DEFAULT_ANALYTICS_DAYS: u32 = 30;

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: v,
        }),
    }
}

/// Site branding used when rendering invitation emails.
#[derive(Debug, Clone, PartialEq)]
pub struct Branding {
    pub brand_name: String,
    pub brand_color: String,
    pub logo_url: String,
    pub subject_prefix: String,
    /// Base URL for acceptance links. Empty means path-only links.
    pub site_url: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            brand_name: DEFAULT_BRAND_NAME.to_string(),
            brand_color: DEFAULT_BRAND_COLOR.to_string(),
            logo_url: String::new(),
            subject_prefix: String::new(),
            site_url: String::new(),
        }
    }
}

impl Branding {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            brand_name: string_or(&lookup, "SITE_BRAND_NAME", DEFAULT_BRAND_NAME),
            brand_color: string_or(&lookup, "SITE_BRAND_COLOR", DEFAULT_BRAND_COLOR),
            logo_url: string_or(&lookup, "SITE_BRAND_LOGO_URL", ""),
            subject_prefix: string_or(&lookup, "SITE_EMAIL_SUBJECT_PREFIX", ""),
            site_url: string_or(&lookup, "SITE_URL", ""),
        }
    }
}

/// One email API endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailTransport {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub primary: EmailTransport,
    pub fallback: Option<EmailTransport>,
    pub from: String,
    pub timeout: Duration,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let primary = EmailTransport {
            api_url: required(&lookup, "EMAIL_API_URL")?,
            api_key: required(&lookup, "EMAIL_API_KEY")?,
        };

        let fallback = match lookup("EMAIL_FALLBACK_API_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => Some(EmailTransport {
                api_url: url.trim().to_string(),
                api_key: required(&lookup, "EMAIL_FALLBACK_API_KEY")?,
            }),
            None => None,
        };

        let timeout_secs: u64 =
            parsed_or(&lookup, "EMAIL_TIMEOUT_SECS", DEFAULT_EMAIL_TIMEOUT_SECS)?;

        let config = Self {
            primary,
            fallback,
            from: required(&lookup, "EMAIL_FROM")?,
            timeout: Duration::from_secs(timeout_secs),
        };
        info!(
            "Email configured: api={}, fallback={}, timeout={:?}",
            config.primary.api_url,
            config.fallback.is_some(),
            config.timeout
        );
        Ok(config)
    }
}

/// Settings for a scheduled resend pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResendConfig {
    pub policy: ResendPolicy,
    /// `None` means uncapped.
    pub limit: Option<usize>,
    /// Skip invitations emailed more recently than this.
    pub quiet_period: Option<chrono::Duration>,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            policy: ResendPolicy::HasFailure,
            limit: Some(DEFAULT_RESEND_LIMIT),
            quiet_period: Some(chrono::Duration::hours(DEFAULT_QUIET_HOURS)),
        }
    }
}

impl ResendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let policy: ResendPolicy = parsed_or(&lookup, "RESEND_POLICY", ResendPolicy::HasFailure)?;
        let limit: usize = parsed_or(&lookup, "RESEND_LIMIT", DEFAULT_RESEND_LIMIT)?;
        let quiet_hours: i64 = parsed_or(&lookup, "RESEND_QUIET_HOURS", DEFAULT_QUIET_HOURS)?;
        let invalid_quiet = || ConfigError::Invalid {
            key: "RESEND_QUIET_HOURS".to_string(),
            value: quiet_hours.to_string(),
        };
        let quiet_period = match quiet_hours {
            h if h < 0 => return Err(invalid_quiet()),
            0 => None,
            // Must stay subtractable from the current time
            h => Some(
                chrono::Duration::try_hours(h)
                    .filter(|d| chrono::Utc::now().checked_sub_signed(*d).is_some())
                    .ok_or_else(invalid_quiet)?,
            ),
        };

        Ok(Self {
            policy,
            limit: (limit > 0).then_some(limit),
            quiet_period,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsConfig {
    pub default_days: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_days: DEFAULT_ANALYTICS_DAYS,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            default_days: parsed_or(&lookup, "ANALYTICS_DEFAULT_DAYS", DEFAULT_ANALYTICS_DAYS)?,
        })
    }
}
