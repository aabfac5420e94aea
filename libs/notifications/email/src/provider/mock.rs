//! Recording email provider for tests and local runs

use super::{EmailProvider, SendResult};
use crate::error::{EmailError, EmailResult};
use crate::models::{DecodedAttachment, Email, decode_attachments};
use crate::render::BodyRenderer;
use amqp_worker::CancelSignal;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// What a recorded send looked like after rendering
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub email: Email,
    pub html: String,
    pub attachments: Vec<DecodedAttachment>,
}

#[derive(Debug, Clone)]
enum Failure {
    Smtp(String),
    ApiStatus { status: u16, body: String },
}

/// Provider that renders like a real one and captures the result instead
/// of delivering it.
pub struct RecordingProvider {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    attempts: AtomicUsize,
    failure: Option<Failure>,
    renderer: BodyRenderer,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            failure: None,
            renderer: BodyRenderer::default(),
        }
    }

    /// Every send fails with an SMTP error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(Failure::Smtp(message.into())),
            ..Self::new()
        }
    }

    /// Every send fails like an API answering with `status`
    pub fn failing_with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            failure: Some(Failure::ApiStatus {
                status,
                body: body.into(),
            }),
            ..Self::new()
        }
    }

    pub fn with_renderer(mut self, renderer: BodyRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub async fn sent_emails(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Calls to `send`, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent
            .lock()
            .await
            .iter()
            .any(|s| s.email.to.iter().any(|to| to == address))
    }
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, email: &Email, cancel: &CancelSignal) -> EmailResult<SendResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(EmailError::Cancelled);
        }

        let attachments = decode_attachments(&email.attachments)?;

        match &self.failure {
            Some(Failure::Smtp(message)) => return Err(EmailError::Smtp(message.clone())),
            Some(Failure::ApiStatus { status, body }) => {
                return Err(EmailError::ApiStatus {
                    status: *status,
                    body: body.clone(),
                });
            }
            None => {}
        }

        let html = self.renderer.render_or_fallback(email).await;
        self.sent.lock().await.push(SentEmail {
            email: email.clone(),
            html,
            attachments,
        });

        Ok(SendResult {
            message_id: Some(format!("recorded-{}", email.id)),
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    fn is_configured(&self) -> bool {
        true
    }
}
