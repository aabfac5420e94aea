//! Email provider implementations

pub mod mock;
pub mod sendgrid;
pub mod smtp;

pub use mock::RecordingProvider;
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{SmtpConfig, SmtpProvider, TlsPolicy};

use crate::error::EmailResult;
use crate::models::Email;
use amqp_worker::CancelSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Result of sending an email
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendResult {
    /// Provider-specific message ID, when the provider reports one
    pub message_id: Option<String>,
}

/// Provider selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Smtp,
    SendGrid,
}

/// Trait for email providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send one email. Must return [`crate::EmailError::Cancelled`] promptly
    /// once `cancel` fires.
    async fn send(&self, email: &Email, cancel: &CancelSignal) -> EmailResult<SendResult>;

    /// Get provider name
    fn name(&self) -> &'static str;

    /// Whether the provider has the settings it needs to send
    fn is_configured(&self) -> bool;
}
