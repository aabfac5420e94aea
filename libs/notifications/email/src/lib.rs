//! Email notification library for the AMQP consumer
//!
//! Turns `email.send` envelopes into delivered mail.
//!
//! ## Components
//!
//! - **Payload**: [`EmailPayload`] plus [`payload::normalize`] for the loose map shape
//! - **Templates**: Handlebars-based [`TemplateRegistry`] with embedded defaults
//! - **Providers**: SMTP (lettre), SendGrid (HTTP API), and a recording provider
//! - **Factory**: [`ProviderFactory`] picks the default provider
//! - **Sender**: [`EmailSender`] normalizes, enriches, and delivers
//! - **Handler**: [`EmailSendHandler`] plugs the sender into `amqp-worker`
//! - **Dev server**: template editing UI with live preview (development only)
//!
//! ## Usage
//!
//! ```ignore
//! use email::{BodyRenderer, EmailSendHandler, EmailSender, ProviderFactory, TemplateRegistry};
//!
//! let registry = Arc::new(TemplateRegistry::new("templates"));
//! let factory = ProviderFactory::from_config(smtp, sendgrid, BodyRenderer::with_registry(registry))?;
//! factory.validate_config()?;
//! let handler = EmailSendHandler::new(EmailSender::new(factory));
//! consumer.register_handler(EmailSendHandler::message_type(), Arc::new(handler)).await;
//! ```

pub mod config;
pub mod dev_server;
pub mod error;
pub mod factory;
pub mod handler;
pub mod models;
pub mod payload;
pub mod provider;
pub mod render;
pub mod service;
pub mod templates;

pub use config::{EmailConfig, RateLimitHints};
pub use error::{EmailError, EmailResult};
pub use factory::ProviderFactory;
pub use handler::EmailSendHandler;
pub use models::{CUSTOM_TEMPLATE, Email, EmailAttachment, EmailPayload, EmailStatus};
pub use provider::{
    EmailProvider, ProviderType, RecordingProvider, SendGridConfig, SendGridProvider, SendResult,
    SmtpConfig, SmtpProvider, TlsPolicy,
};
pub use render::BodyRenderer;
pub use service::EmailSender;
pub use templates::TemplateRegistry;
