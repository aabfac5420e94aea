//! Error types for the email service.

use thiserror::Error;

/// Result type for email operations.
pub type EmailResult<T> = Result<T, EmailError>;

/// Errors that can occur while normalizing, rendering, or sending mail.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Payload could not be decoded at all
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Required string field missing or not a string
    #[error("Payload field '{0}' is required and must be a non-empty string")]
    MissingField(&'static str),

    /// Every `to` entry was blank
    #[error("No valid recipient in 'to'")]
    NoRecipients,

    /// Attachment entry is not an object with string filename/content/contentType
    #[error("Attachment {index} is invalid: {reason}")]
    InvalidAttachment { index: usize, reason: String },

    /// Attachment content is not valid base64
    #[error("Attachment '{filename}' could not be decoded: {reason}")]
    AttachmentDecode { filename: String, reason: String },

    /// Address rejected by the mail builder
    #[error("Invalid {field} address '{address}': {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error("Invalid template name '{0}'")]
    InvalidTemplateName(String),

    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Template '{name}' failed to parse: {reason}")]
    TemplateParse { name: String, reason: String },

    #[error("Template '{name}' failed to render: {reason}")]
    TemplateRender { name: String, reason: String },

    /// MIME assembly failed
    #[error("Failed to build message: {0}")]
    MessageBuild(String),

    /// SMTP connect, auth, or send failure
    #[error("SMTP error: {0}")]
    Smtp(String),

    /// HTTP transport failure talking to the API provider
    #[error("HTTP error: {0}")]
    Http(String),

    /// API provider answered with status >= 400
    #[error("API returned status {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// Provider selected but missing required settings
    #[error("Provider '{0}' is not configured")]
    NotConfigured(&'static str),

    #[error("No email provider is configured (set SMTP_HOST/SMTP_FROM or SENDGRID_API_KEY/SENDGRID_FROM)")]
    NoProviderConfigured,

    /// Provider failure wrapped with the provider name
    #[error("{provider} provider failed: {source}")]
    Provider {
        provider: &'static str,
        #[source]
        source: Box<EmailError>,
    },

    #[error("Send cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmailError {
    pub fn provider(provider: &'static str, source: EmailError) -> Self {
        match source {
            // Keep cancellation recognizable through the wrapper
            EmailError::Cancelled => EmailError::Cancelled,
            source => EmailError::Provider {
                provider,
                source: Box::new(source),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EmailError::Cancelled)
    }

    /// Innermost error, looking through provider wrappers
    pub fn root(&self) -> &EmailError {
        match self {
            EmailError::Provider { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for EmailError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<EmailError> for amqp_worker::WorkerError {
    fn from(err: EmailError) -> Self {
        if err.is_cancelled() {
            amqp_worker::WorkerError::Cancelled
        } else {
            amqp_worker::WorkerError::handler(err)
        }
    }
}
