//! `email.send` message handler

use crate::service::EmailSender;
use amqp_worker::{HandlerContext, Message, MessageHandler, MessageType, WorkerError};
use async_trait::async_trait;
use tracing::debug;

/// Bridges the consumer to [`EmailSender`].
#[derive(Clone)]
pub struct EmailSendHandler {
    sender: EmailSender,
}

impl EmailSendHandler {
    pub fn new(sender: EmailSender) -> Self {
        Self { sender }
    }

    /// The message type this handler serves
    pub fn message_type() -> MessageType {
        MessageType::email_send()
    }
}

#[async_trait]
impl MessageHandler for EmailSendHandler {
    async fn handle(&self, message: &Message, ctx: HandlerContext) -> Result<(), WorkerError> {
        debug!(
            message_id = %message.id,
            tenant_id = %message.tenant_id,
            retry_count = ctx.retry_count,
            "Handling email.send"
        );

        let email_id = self
            .sender
            .send_value(
                &message.tenant_id,
                &message.payload,
                None,
                ctx.retry_count,
                &ctx.cancel,
            )
            .await?;

        debug!(message_id = %message.id, email_id = %email_id, "email.send handled");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EmailSendHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ProviderFactory;
    use crate::provider::RecordingProvider;
    use amqp_worker::CancelSignal;
    use serde_json::json;
    use std::sync::Arc;

    fn handler(provider: Arc<RecordingProvider>) -> EmailSendHandler {
        let factory = ProviderFactory::new(provider.clone(), provider);
        EmailSendHandler::new(EmailSender::new(factory))
    }

    fn message(payload: serde_json::Value) -> Message {
        Message::new("msg-1", MessageType::email_send(), "org_1", payload)
    }

    #[tokio::test]
    async fn test_handle_sends_with_retry_count() {
        let provider = Arc::new(RecordingProvider::new());
        let handler = handler(provider.clone());

        handler
            .handle(
                &message(json!({"template": "welcome", "subject": "Hi", "to": ["a@x.com"]})),
                HandlerContext::new(1, CancelSignal::never()),
            )
            .await
            .unwrap();

        let sent = provider.sent_emails().await;
        assert_eq!(sent[0].email.retry_count, 1);
        assert_eq!(sent[0].email.tenant_id, "org_1");
    }

    #[tokio::test]
    async fn test_invalid_payload_is_handler_error() {
        let handler = handler(Arc::new(RecordingProvider::new()));

        let err = handler
            .handle(
                &message(json!({"subject": "Hi", "to": ["a@x.com"]})),
                HandlerContext::new(0, CancelSignal::never()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Handler(_)));
    }

    #[tokio::test]
    async fn test_cancelled_send_maps_to_cancelled() {
        let handler = handler(Arc::new(RecordingProvider::new()));
        let (cancel, signal) = CancelSignal::pair();
        cancel.cancel();

        let err = handler
            .handle(
                &message(json!({"template": "welcome", "subject": "Hi", "to": ["a@x.com"]})),
                HandlerContext::new(0, signal),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }
}
