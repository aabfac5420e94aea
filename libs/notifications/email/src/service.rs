//! Sender service
//!
//! Canonical entry point for sending: normalizes the payload, fills in
//! default template data, and hands the resulting [`Email`] to a provider.

use crate::error::{EmailError, EmailResult};
use crate::factory::ProviderFactory;
use crate::models::{Email, EmailPayload};
use crate::payload::{normalize, normalize_typed};
use crate::provider::ProviderType;
use amqp_worker::CancelSignal;
use chrono::{Datelike, Utc};
use serde_json::{Map, Value, json};
use tracing::{error, info};
use uuid::Uuid;

/// Sends normalized payloads through the factory's providers.
#[derive(Clone)]
pub struct EmailSender {
    factory: ProviderFactory,
}

impl EmailSender {
    pub fn new(factory: ProviderFactory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Send a typed payload. `provider` overrides the factory default.
    ///
    /// Returns the id generated for this send.
    pub async fn send(
        &self,
        tenant_id: &str,
        payload: EmailPayload,
        provider: Option<ProviderType>,
        retry_count: u32,
        cancel: &CancelSignal,
    ) -> EmailResult<Uuid> {
        let payload = normalize_typed(payload)?;
        self.deliver(tenant_id, payload, provider, retry_count, cancel)
            .await
    }

    /// Send a raw JSON payload in either accepted shape.
    pub async fn send_value(
        &self,
        tenant_id: &str,
        payload: &Value,
        provider: Option<ProviderType>,
        retry_count: u32,
        cancel: &CancelSignal,
    ) -> EmailResult<Uuid> {
        let payload = normalize(payload)?;
        self.deliver(tenant_id, payload, provider, retry_count, cancel)
            .await
    }

    async fn deliver(
        &self,
        tenant_id: &str,
        mut payload: EmailPayload,
        provider: Option<ProviderType>,
        retry_count: u32,
        cancel: &CancelSignal,
    ) -> EmailResult<Uuid> {
        enrich_template_data(&mut payload, Utc::now().year());

        let provider = match provider {
            Some(kind) => self.factory.get(kind),
            None => self.factory.get_default(),
        };

        let mut email = Email::new(tenant_id, payload).with_retry_count(retry_count);

        match provider.send(&email, cancel).await {
            Ok(result) => {
                email.mark_sent(result.message_id);
                info!(
                    email_id = %email.id,
                    tenant_id = %email.tenant_id,
                    template = %email.template,
                    provider = provider.name(),
                    message_id = ?email.message_id,
                    retry_count,
                    "Email sent"
                );
                Ok(email.id)
            }
            Err(e) => {
                let err = EmailError::provider(provider.name(), e);
                email.mark_failed(err.to_string());
                if !err.is_cancelled() {
                    error!(
                        email_id = %email.id,
                        tenant_id = %email.tenant_id,
                        template = %email.template,
                        provider = provider.name(),
                        retry_count,
                        error = %err,
                        "Email send failed"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Default data for named templates: a missing `data` becomes
/// `{Subject, Body, Year}`, an existing one gains `Year` if absent.
pub fn enrich_template_data(payload: &mut EmailPayload, year: i32) {
    if payload.template.is_empty() || payload.is_custom() {
        return;
    }

    match &mut payload.data {
        None => {
            let mut data = Map::new();
            data.insert("Subject".to_string(), json!(payload.subject));
            data.insert(
                "Body".to_string(),
                json!(format!("This is a {} email.", payload.template)),
            );
            data.insert("Year".to_string(), json!(year));
            payload.data = Some(data);
        }
        Some(data) => {
            data.entry("Year").or_insert_with(|| json!(year));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmailProvider, MockEmailProvider, RecordingProvider};
    use std::sync::Arc;

    fn payload() -> EmailPayload {
        EmailPayload::new("welcome", "Hi", vec!["a@x.com".to_string()])
    }

    fn sender_with(smtp: Arc<dyn EmailProvider>) -> EmailSender {
        let mut sendgrid = MockEmailProvider::new();
        sendgrid.expect_is_configured().return_const(false);
        sendgrid.expect_name().return_const("sendgrid");
        EmailSender::new(ProviderFactory::new(smtp, Arc::new(sendgrid)))
    }

    #[test]
    fn test_enrich_missing_data() {
        let mut payload = payload();
        enrich_template_data(&mut payload, 2025);

        let data = payload.data.unwrap();
        assert_eq!(data["Subject"], "Hi");
        assert_eq!(data["Body"], "This is a welcome email.");
        assert_eq!(data["Year"], 2025);
    }

    #[test]
    fn test_enrich_keeps_existing_year() {
        let mut payload = payload().with_data(
            json!({"Name": "Ada", "Year": 1999}).as_object().cloned().unwrap(),
        );
        enrich_template_data(&mut payload, 2025);
        assert_eq!(payload.data.as_ref().unwrap()["Year"], 1999);

        let mut payload = self::payload()
            .with_data(json!({"Name": "Ada"}).as_object().cloned().unwrap());
        enrich_template_data(&mut payload, 2025);
        let data = payload.data.unwrap();
        assert_eq!(data["Year"], 2025);
        assert!(data.get("Body").is_none());
    }

    #[test]
    fn test_enrich_skips_custom() {
        let mut payload = EmailPayload::new("custom", "Hi", vec!["a@x.com".to_string()]);
        enrich_template_data(&mut payload, 2025);
        assert!(payload.data.is_none());
    }

    #[tokio::test]
    async fn test_send_value_normalizes_and_records() {
        let recording = Arc::new(RecordingProvider::new());
        let sender = sender_with(recording.clone());

        let id = sender
            .send_value(
                "org_1",
                &json!({"template": "welcome", "subject": "Hi", "to": ["", "a@x.com"]}),
                None,
                0,
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        let sent = recording.sent_emails().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email.id, id);
        assert_eq!(sent[0].email.to, vec!["a@x.com"]);
        assert_eq!(sent[0].email.tenant_id, "org_1");
        assert!(sent[0].email.data.contains_key("Year"));
    }

    #[tokio::test]
    async fn test_no_recipients_never_reaches_provider() {
        let mut smtp = MockEmailProvider::new();
        smtp.expect_is_configured().return_const(true);
        smtp.expect_name().return_const("smtp");
        smtp.expect_send().never();
        let sender = sender_with(Arc::new(smtp));

        let err = sender
            .send_value(
                "org_1",
                &json!({"template": "welcome", "subject": "Hi", "to": ["", ""]}),
                None,
                0,
                &CancelSignal::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::NoRecipients));
    }

    #[tokio::test]
    async fn test_provider_error_is_wrapped_with_name() {
        let mut smtp = MockEmailProvider::new();
        smtp.expect_is_configured().return_const(true);
        smtp.expect_name().return_const("smtp");
        smtp.expect_send()
            .times(1)
            .returning(|_, _| Err(EmailError::Smtp("connection refused".to_string())));
        let sender = sender_with(Arc::new(smtp));

        let err = sender
            .send("org_1", payload(), None, 1, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::Provider { provider: "smtp", .. }));
        assert!(matches!(err.root(), EmailError::Smtp(_)));
    }

    #[tokio::test]
    async fn test_explicit_provider_override() {
        let mut smtp = MockEmailProvider::new();
        smtp.expect_is_configured().return_const(true);
        smtp.expect_name().return_const("smtp");
        smtp.expect_send().never();

        let recording = Arc::new(RecordingProvider::new());
        let sender = EmailSender::new(ProviderFactory::new(Arc::new(smtp), recording.clone()));

        sender
            .send("org_1", payload(), Some(ProviderType::SendGrid), 0, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(recording.sent_count().await, 1);
    }
}
