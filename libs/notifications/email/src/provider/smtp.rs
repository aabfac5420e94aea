//! SMTP email provider using lettre

use super::{EmailProvider, SendResult};
use crate::error::{EmailError, EmailResult};
use crate::models::{DecodedAttachment, Email, decode_attachments};
use crate::render::BodyRenderer;
use amqp_worker::CancelSignal;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_opt, env_or_default, env_parse};
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info};

/// Port where TLS starts before the SMTP greeting
const IMPLICIT_TLS_PORT: u16 = 465;

/// How the connection is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TlsPolicy {
    /// STARTTLS required (implicit TLS on port 465)
    #[default]
    Mandatory,
    /// STARTTLS when the server offers it
    Opportunistic,
    /// Plain text, for Mailpit and friends
    None,
}

/// SMTP provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub from_name: String,
    pub tls_policy: TlsPolicy,
    pub timeout: Duration,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            from_name: String::new(),
            tls_policy: TlsPolicy::Mandatory,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.from.is_empty()
    }
}

impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_opt("SMTP_HOST").unwrap_or_default(),
            port: env_parse("SMTP_PORT", 587)?,
            username: env_opt("SMTP_USER").unwrap_or_default(),
            password: env_or_default("SMTP_PASSWORD", ""),
            from: env_opt("SMTP_FROM").unwrap_or_default(),
            from_name: env_opt("SMTP_FROM_NAME").unwrap_or_default(),
            tls_policy: env_parse("SMTP_TLS_POLICY", TlsPolicy::Mandatory)?,
            timeout: Duration::from_secs(env_parse("SMTP_TIMEOUT_SECS", 10)?),
        })
    }
}

/// SMTP email provider
pub struct SmtpProvider {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    renderer: BodyRenderer,
}

impl SmtpProvider {
    /// Create a new SMTP provider. An unconfigured provider is valid and
    /// fails every send with [`EmailError::NotConfigured`].
    pub fn new(config: SmtpConfig, renderer: BodyRenderer) -> EmailResult<Self> {
        let transport = if config.is_configured() {
            Some(build_transport(&config)?)
        } else {
            None
        };

        Ok(Self {
            config,
            transport,
            renderer,
        })
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Assemble the MIME message: one HTML part plus one part per attachment.
    pub fn build_message(
        &self,
        email: &Email,
        html: String,
        attachments: Vec<DecodedAttachment>,
    ) -> EmailResult<Message> {
        let from_address = parse_address("from", &self.config.from)?;
        let from_name = Some(self.config.from_name.clone()).filter(|n| !n.is_empty());

        let mut builder = Message::builder()
            .from(Mailbox::new(from_name, from_address))
            .subject(email.subject.clone());

        for to in &email.to {
            builder = builder.to(Mailbox::new(None, parse_address("to", to)?));
        }
        for cc in &email.cc {
            builder = builder.cc(Mailbox::new(None, parse_address("cc", cc)?));
        }
        for bcc in &email.bcc {
            builder = builder.bcc(Mailbox::new(None, parse_address("bcc", bcc)?));
        }

        let html_part = SinglePart::builder().header(ContentType::TEXT_HTML).body(html);

        let message = if attachments.is_empty() {
            builder.singlepart(html_part)
        } else {
            let mut multipart = MultiPart::mixed().singlepart(html_part);
            for attachment in attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|e| EmailError::MessageBuild(e.to_string()))?;
                multipart = multipart
                    .singlepart(Attachment::new(attachment.filename).body(attachment.bytes, content_type));
            }
            builder.multipart(multipart)
        };

        message.map_err(|e| EmailError::MessageBuild(e.to_string()))
    }
}

fn parse_address(field: &'static str, address: &str) -> EmailResult<Address> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|e| EmailError::InvalidAddress {
            field,
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn build_transport(config: &SmtpConfig) -> EmailResult<AsyncSmtpTransport<Tokio1Executor>> {
    let tls_parameters =
        || TlsParameters::new(config.host.clone()).map_err(|e| EmailError::Smtp(e.to_string()));

    let tls = match config.tls_policy {
        TlsPolicy::Mandatory if config.port == IMPLICIT_TLS_PORT => Tls::Wrapper(tls_parameters()?),
        TlsPolicy::Mandatory => Tls::Required(tls_parameters()?),
        TlsPolicy::Opportunistic => Tls::Opportunistic(tls_parameters()?),
        TlsPolicy::None => Tls::None,
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        .port(config.port)
        .tls(tls)
        .timeout(Some(config.timeout));

    if !config.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ));
    }

    Ok(builder.build())
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &Email, cancel: &CancelSignal) -> EmailResult<SendResult> {
        let Some(transport) = &self.transport else {
            return Err(EmailError::NotConfigured(self.name()));
        };

        // Bad attachments fail before any connection is made
        let attachments = decode_attachments(&email.attachments)?;
        let html = self.renderer.render_or_fallback(email).await;
        let message = self.build_message(email, html, attachments)?;

        debug!(email_id = %email.id, host = %self.config.host, "Sending email via SMTP");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmailError::Cancelled),
            result = tokio::time::timeout(self.config.timeout, transport.send(message)) => match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(EmailError::Smtp(e.to_string())),
                Err(_) => {
                    return Err(EmailError::Smtp(format!(
                        "timed out after {}s",
                        self.config.timeout.as_secs()
                    )));
                }
            },
        };

        let message_id = response.message().next().map(str::to_string);

        info!(
            email_id = %email.id,
            recipients = email.to.len(),
            subject = %email.subject,
            "Email sent via SMTP"
        );

        Ok(SendResult { message_id })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}
