//! Email service configuration

use crate::provider::{SendGridConfig, SmtpConfig};
use core_config::{ConfigError, FromEnv, env_opt, env_or_default};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Advisory send-rate settings. Reported at startup, not enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitHints {
    pub per_second: Option<u32>,
    pub burst: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailConfig {
    pub smtp: SmtpConfig,
    pub sendgrid: SendGridConfig,
    pub templates_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub rate_limit: RateLimitHints,
}

impl FromEnv for EmailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp: SmtpConfig::from_env()?,
            sendgrid: SendGridConfig::from_env()?,
            templates_dir: env_or_default("EMAIL_TEMPLATES_DIR", "templates").into(),
            samples_dir: env_or_default("EMAIL_SAMPLES_DIR", "data/samples").into(),
            rate_limit: RateLimitHints {
                per_second: env_parse_opt("EMAIL_RATE_LIMIT_PER_SECOND")?,
                burst: env_parse_opt("EMAIL_RATE_LIMIT_BURST")?,
            },
        })
    }
}

impl EmailConfig {
    /// Log the effective settings without secrets
    pub fn log_summary(&self) {
        info!(
            smtp_host = %self.smtp.host,
            smtp_port = self.smtp.port,
            smtp_tls = %self.smtp.tls_policy,
            smtp_configured = self.smtp.is_configured(),
            sendgrid_configured = self.sendgrid.is_configured(),
            templates_dir = %self.templates_dir.display(),
            rate_limit_per_second = ?self.rate_limit.per_second,
            rate_limit_burst = ?self.rate_limit.burst,
            "Email configuration loaded"
        );
    }
}

fn env_parse_opt<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            })
        })
        .transpose()
}
