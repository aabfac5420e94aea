//! Provider selection

use crate::error::{EmailError, EmailResult};
use crate::provider::{
    EmailProvider, ProviderType, SendGridConfig, SendGridProvider, SmtpConfig, SmtpProvider,
};
use crate::render::BodyRenderer;
use std::sync::Arc;
use tracing::info;

/// Holds one instance of each provider and the default choice.
#[derive(Clone)]
pub struct ProviderFactory {
    smtp: Arc<dyn EmailProvider>,
    sendgrid: Arc<dyn EmailProvider>,
    default: ProviderType,
}

impl ProviderFactory {
    /// Default is SMTP when configured, else SendGrid when configured, else
    /// SMTP so the first send reports what is missing.
    pub fn new(smtp: Arc<dyn EmailProvider>, sendgrid: Arc<dyn EmailProvider>) -> Self {
        let default = if smtp.is_configured() {
            ProviderType::Smtp
        } else if sendgrid.is_configured() {
            ProviderType::SendGrid
        } else {
            ProviderType::Smtp
        };

        info!(
            default = %default,
            smtp_configured = smtp.is_configured(),
            sendgrid_configured = sendgrid.is_configured(),
            "Email providers initialized"
        );

        Self {
            smtp,
            sendgrid,
            default,
        }
    }

    /// Build both real providers sharing one renderer
    pub fn from_config(
        smtp: SmtpConfig,
        sendgrid: SendGridConfig,
        renderer: BodyRenderer,
    ) -> EmailResult<Self> {
        let smtp = SmtpProvider::new(smtp, renderer.clone())?;
        let sendgrid = SendGridProvider::new(sendgrid, renderer)?;
        Ok(Self::new(Arc::new(smtp), Arc::new(sendgrid)))
    }

    pub fn get(&self, provider: ProviderType) -> Arc<dyn EmailProvider> {
        match provider {
            ProviderType::Smtp => Arc::clone(&self.smtp),
            ProviderType::SendGrid => Arc::clone(&self.sendgrid),
        }
    }

    pub fn get_default(&self) -> Arc<dyn EmailProvider> {
        self.get(self.default)
    }

    pub fn default_type(&self) -> ProviderType {
        self.default
    }

    /// Fails when neither provider can send.
    pub fn validate_config(&self) -> EmailResult<()> {
        if self.smtp.is_configured() || self.sendgrid.is_configured() {
            Ok(())
        } else {
            Err(EmailError::NoProviderConfigured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockEmailProvider;

    fn mock(name: &'static str, configured: bool) -> Arc<dyn EmailProvider> {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const(name);
        provider.expect_is_configured().return_const(configured);
        Arc::new(provider)
    }

    #[test]
    fn test_smtp_preferred_when_both_configured() {
        let factory = ProviderFactory::new(mock("smtp", true), mock("sendgrid", true));
        assert_eq!(factory.default_type(), ProviderType::Smtp);
        assert_eq!(factory.get_default().name(), "smtp");
        assert!(factory.validate_config().is_ok());
    }

    #[test]
    fn test_sendgrid_when_only_api_configured() {
        let factory = ProviderFactory::new(mock("smtp", false), mock("sendgrid", true));
        assert_eq!(factory.default_type(), ProviderType::SendGrid);
        assert_eq!(factory.get_default().name(), "sendgrid");
        assert_eq!(factory.get(ProviderType::Smtp).name(), "smtp");
    }

    #[test]
    fn test_nothing_configured_defaults_to_smtp_and_fails_validation() {
        let factory = ProviderFactory::new(mock("smtp", false), mock("sendgrid", false));
        assert_eq!(factory.default_type(), ProviderType::Smtp);
        assert!(matches!(
            factory.validate_config(),
            Err(EmailError::NoProviderConfigured)
        ));
    }

    #[test]
    fn test_from_config_uses_real_providers() {
        let smtp = SmtpConfig::default();
        let sendgrid = SendGridConfig {
            api_key: "SG.key".to_string(),
            from: "noreply@trenova.app".to_string(),
            ..SendGridConfig::default()
        };

        let factory = ProviderFactory::from_config(smtp, sendgrid, BodyRenderer::default()).unwrap();

        assert_eq!(factory.default_type(), ProviderType::SendGrid);
        assert!(factory.validate_config().is_ok());
    }
}
