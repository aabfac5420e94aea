//! SendGrid email provider
//!
//! Sends emails via the SendGrid v3 HTTP API. Template errors are returned
//! to the caller instead of degrading to the fallback body.

use crate::error::{EmailError, EmailResult};
use crate::models::{Email, decode_attachments};
use crate::provider::{EmailProvider, SendResult};
use crate::render::BodyRenderer;
use amqp_worker::CancelSignal;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use core_config::{ConfigError, FromEnv, env_opt, env_or_default, env_parse};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Default SendGrid API origin
pub const SENDGRID_BASE_URL: &str = "https://api.sendgrid.com";

const SEND_PATH: &str = "/v3/mail/send";

/// SendGrid provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from: String,
    pub from_name: String,
    /// API origin, overridable for tests and regional endpoints
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            from: String::new(),
            from_name: String::new(),
            base_url: SENDGRID_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl SendGridConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.from.is_empty()
    }

    fn send_url(&self) -> String {
        format!("{}{SEND_PATH}", self.base_url.trim_end_matches('/'))
    }
}

impl FromEnv for SendGridConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_opt("SENDGRID_API_KEY").unwrap_or_default(),
            from: env_opt("SENDGRID_FROM").unwrap_or_default(),
            from_name: env_opt("SENDGRID_NAME").unwrap_or_default(),
            base_url: env_or_default("SENDGRID_BASE_URL", SENDGRID_BASE_URL),
            timeout: Duration::from_secs(env_parse("SENDGRID_TIMEOUT_SECS", 10)?),
        })
    }
}

/// SendGrid email provider
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
    renderer: BodyRenderer,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig, renderer: BodyRenderer) -> EmailResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmailError::Http(e.to_string()))?;

        Ok(Self {
            config,
            client,
            renderer,
        })
    }

    pub fn config(&self) -> &SendGridConfig {
        &self.config
    }

    async fn build_request(&self, email: &Email) -> EmailResult<SendGridRequest> {
        let attachments = decode_attachments(&email.attachments)?
            .into_iter()
            .map(|a| SendGridAttachment {
                content: STANDARD.encode(&a.bytes),
                filename: a.filename,
                content_type: a.content_type,
                disposition: "attachment",
            })
            .collect();

        let html = self.renderer.render(email).await?;

        Ok(SendGridRequest {
            personalizations: vec![Personalization {
                to: addresses(&email.to),
                cc: addresses(&email.cc),
                bcc: addresses(&email.bcc),
            }],
            from: EmailAddress {
                email: self.config.from.clone(),
                name: Some(self.config.from_name.clone()).filter(|n| !n.is_empty()),
            },
            subject: email.subject.clone(),
            content: vec![Content {
                content_type: "text/html",
                value: html,
            }],
            attachments,
        })
    }

    async fn post(&self, request: &SendGridRequest) -> EmailResult<SendResult> {
        let response = self
            .client
            .post(self.config.send_url())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| EmailError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "SendGrid API error");
            return Err(EmailError::ApiStatus {
                status: status.as_u16(),
                body,
            });
        }

        // SendGrid returns message ID in X-Message-Id header
        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(SendResult { message_id })
    }
}

fn addresses(list: &[String]) -> Vec<EmailAddress> {
    list.iter()
        .map(|email| EmailAddress {
            email: email.clone(),
            name: None,
        })
        .collect()
}

/// SendGrid API request payload
#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendGridAttachment>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct SendGridAttachment {
    content: String,
    filename: String,
    #[serde(rename = "type")]
    content_type: String,
    disposition: &'static str,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &Email, cancel: &CancelSignal) -> EmailResult<SendResult> {
        if !self.config.is_configured() {
            return Err(EmailError::NotConfigured(self.name()));
        }

        let request = self.build_request(email).await?;

        debug!(
            email_id = %email.id,
            recipients = email.to.len(),
            subject = %email.subject,
            "Sending email via SendGrid"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmailError::Cancelled),
            result = self.post(&request) => result?,
        };

        debug!(email_id = %email.id, message_id = ?result.message_id, "Email sent via SendGrid");
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAttachment, EmailPayload};
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Captured {
        status: StatusCode,
        requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    }

    async fn mail_send(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        captured.requests.lock().unwrap().push((headers, body));
        if captured.status.is_success() {
            (captured.status, [("X-Message-Id", "sg-123")], String::new()).into_response()
        } else {
            (captured.status, "upstream exploded").into_response()
        }
    }

    async fn spawn_api(status: StatusCode) -> (String, Captured) {
        let captured = Captured {
            status,
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route(SEND_PATH, post(mail_send))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), captured)
    }

    fn provider(base_url: String) -> SendGridProvider {
        let config = SendGridConfig {
            api_key: "SG.test".to_string(),
            from: "noreply@trenova.app".to_string(),
            from_name: "Trenova".to_string(),
            base_url,
            timeout: Duration::from_secs(5),
        };
        SendGridProvider::new(config, BodyRenderer::default()).unwrap()
    }

    fn email() -> Email {
        let payload = EmailPayload::new("welcome", "Hi", vec!["a@x.com".to_string()])
            .with_cc(vec!["c@x.com".to_string()])
            .with_attachment(EmailAttachment::new("a.txt", "aGVsbG8=", "text/plain"));
        Email::new("org_1", payload)
    }

    #[tokio::test]
    async fn test_success_returns_message_id_and_sends_personalization() {
        let (base_url, captured) = spawn_api(StatusCode::ACCEPTED).await;

        let result = provider(base_url)
            .send(&email(), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(result.message_id.as_deref(), Some("sg-123"));

        let requests = captured.requests.lock().unwrap();
        let (headers, body) = &requests[0];
        assert_eq!(headers["authorization"], "Bearer SG.test");
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "a@x.com");
        assert_eq!(body["personalizations"][0]["cc"][0]["email"], "c@x.com");
        assert_eq!(body["from"]["name"], "Trenova");
        assert_eq!(body["content"][0]["type"], "text/html");
        assert_eq!(body["attachments"][0]["content"], "aGVsbG8=");
        assert_eq!(body["attachments"][0]["disposition"], "attachment");
    }

    #[tokio::test]
    async fn test_error_status_carries_status_and_body() {
        let (base_url, _captured) = spawn_api(StatusCode::INTERNAL_SERVER_ERROR).await;

        let err = provider(base_url)
            .send(&email(), &CancelSignal::never())
            .await
            .unwrap_err();

        match &err {
            EmailError::ApiStatus { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_bad_attachment_fails_before_request() {
        let (base_url, captured) = spawn_api(StatusCode::ACCEPTED).await;
        let mut email = email();
        email.attachments = vec![EmailAttachment::new("bad.bin", "!!", "application/pdf")];

        let err = provider(base_url)
            .send(&email, &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::AttachmentDecode { .. }));
        assert!(captured.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_is_configured() {
        assert!(!SendGridConfig::default().is_configured());
        let config = SendGridConfig {
            api_key: "k".to_string(),
            ..SendGridConfig::default()
        };
        assert!(!config.is_configured());
        assert_eq!(
            SendGridConfig::default().send_url(),
            "https://api.sendgrid.com/v3/mail/send"
        );
    }
}
