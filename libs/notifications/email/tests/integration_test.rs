//! End-to-end tests: envelope bytes through the dispatcher, the
//! `email.send` handler, the sender, and a recording provider.

use amqp_worker::{CancelSignal, Dispatcher, Disposition, HandlerRegistry, Message, MessageType};
use chrono::{Datelike, Utc};
use email::{
    BodyRenderer, EmailSendHandler, EmailSender, ProviderFactory, RecordingProvider,
    TemplateRegistry,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

const MAX_RETRIES: u32 = 1;

struct Pipeline {
    dispatcher: Dispatcher,
    provider: Arc<RecordingProvider>,
    _templates: TempDir,
}

async fn pipeline(provider: RecordingProvider) -> Pipeline {
    let templates = tempfile::tempdir().unwrap();
    let registry = Arc::new(TemplateRegistry::new(templates.path()));
    let provider = Arc::new(provider.with_renderer(BodyRenderer::with_registry(registry)));

    let factory = ProviderFactory::new(provider.clone(), provider.clone());
    let handler = EmailSendHandler::new(EmailSender::new(factory));

    let handlers = HandlerRegistry::new();
    handlers
        .register(EmailSendHandler::message_type(), Arc::new(handler))
        .await;

    Pipeline {
        dispatcher: Dispatcher::new(handlers, MAX_RETRIES),
        provider,
        _templates: templates,
    }
}

fn envelope(payload: Value) -> Vec<u8> {
    Message::new("msg-1", MessageType::email_send(), "org_1", payload)
        .to_vec()
        .unwrap()
}

#[tokio::test]
async fn test_happy_path_renders_and_acks() {
    let pipeline = pipeline(RecordingProvider::new()).await;
    let body = envelope(json!({
        "template": "welcome",
        "subject": "Hi",
        "to": ["a@x"],
        "data": {"Name": "Ada"}
    }));

    let disposition = pipeline
        .dispatcher
        .dispatch(&body, 0, &CancelSignal::never())
        .await;

    assert_eq!(disposition, Disposition::Ack);
    let sent = pipeline.provider.sent_emails().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].email.to, vec!["a@x"]);
    assert!(sent[0].html.contains("Ada"));
    assert!(sent[0].html.contains(&Utc::now().year().to_string()));
}

#[tokio::test]
async fn test_missing_recipients_takes_retry_path_without_sending() {
    let pipeline = pipeline(RecordingProvider::new()).await;
    let body = envelope(json!({"template": "welcome", "subject": "Hi", "to": ["", ""]}));

    let first = pipeline
        .dispatcher
        .dispatch(&body, 0, &CancelSignal::never())
        .await;
    let second = pipeline
        .dispatcher
        .dispatch(&body, 1, &CancelSignal::never())
        .await;

    assert_eq!(first, Disposition::Republish { retry_count: 1 });
    assert_eq!(second, Disposition::DeadLetter);
    assert_eq!(pipeline.provider.attempts(), 0);
}

#[tokio::test]
async fn test_api_error_retries_once_then_dead_letters() {
    let pipeline = pipeline(RecordingProvider::failing_with_status(500, "boom")).await;
    let body = envelope(json!({"template": "generic", "subject": "Hi", "to": ["a@x"]}));

    let first = pipeline
        .dispatcher
        .dispatch(&body, 0, &CancelSignal::never())
        .await;
    let second = pipeline
        .dispatcher
        .dispatch(&body, 1, &CancelSignal::never())
        .await;

    assert_eq!(first, Disposition::Republish { retry_count: 1 });
    assert_eq!(second, Disposition::DeadLetter);
    assert_eq!(pipeline.provider.attempts(), 2);
}

#[tokio::test]
async fn test_malformed_envelope_is_dead_lettered() {
    let pipeline = pipeline(RecordingProvider::new()).await;

    let disposition = pipeline
        .dispatcher
        .dispatch(br#"{"oops""#, 0, &CancelSignal::never())
        .await;

    assert_eq!(disposition, Disposition::DeadLetter);
    assert_eq!(pipeline.provider.attempts(), 0);
}

#[tokio::test]
async fn test_unknown_type_is_dropped() {
    let pipeline = pipeline(RecordingProvider::new()).await;
    let body = Message::new("msg-2", MessageType::new("sms.send"), "org_1", json!({}))
        .to_vec()
        .unwrap();

    let disposition = pipeline
        .dispatcher
        .dispatch(&body, 0, &CancelSignal::never())
        .await;

    assert_eq!(disposition, Disposition::Drop);
}

#[tokio::test]
async fn test_custom_template_and_attachment_bytes() {
    let pipeline = pipeline(RecordingProvider::new()).await;
    let body = envelope(json!({
        "template": "custom",
        "subject": "Rate confirmation",
        "to": ["dispatch@x"],
        "data": {"Body": "<p>Load {{Pro}}</p>", "Pro": "PRO-42"},
        "attachments": [
            {"filename": "rate.txt", "content": "cmF0ZQ==", "contentType": "text/plain"}
        ]
    }));

    let disposition = pipeline
        .dispatcher
        .dispatch(&body, 0, &CancelSignal::never())
        .await;

    assert_eq!(disposition, Disposition::Ack);
    let sent = pipeline.provider.sent_emails().await;
    assert_eq!(sent[0].html, "<p>Load PRO-42</p>");
    assert_eq!(sent[0].attachments[0].bytes, b"rate");
    assert!(!sent[0].email.data.contains_key("attachments"));
}
