//! Per-delivery decision logic
//!
//! The dispatcher decodes the envelope, runs the handler, and decides how the
//! delivery must be settled. It performs no broker I/O, so every path can be
//! exercised without a broker.

use crate::cancel::CancelSignal;
use crate::error::WorkerError;
use crate::event::Message;
use crate::registry::{HandlerContext, HandlerRegistry};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// How a delivery is settled. Exactly one per delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded
    Ack,
    /// No handler for the type; acked without processing
    Drop,
    /// Nack without requeue; the broker routes it to the DLQ
    DeadLetter,
    /// Publish a copy carrying `retry_count`, then ack the original
    Republish { retry_count: u32 },
    /// Cancelled mid-flight; left unacked for redelivery
    Abandon,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: HandlerRegistry,
    max_retries: u32,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, max_retries: u32) -> Self {
        Self {
            registry,
            max_retries,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Decide the disposition for one delivery body.
    ///
    /// `retry_count` is the value of `x-retry-count` on the delivery.
    pub async fn dispatch(&self, body: &[u8], retry_count: u32, cancel: &CancelSignal) -> Disposition {
        let message = match Message::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed message, dead-lettering");
                return Disposition::DeadLetter;
            }
        };

        let Some(handler) = self.registry.get(&message.message_type).await else {
            info!(
                message_id = %message.id,
                tenant_id = %message.tenant_id,
                message_type = %message.message_type,
                "No handler registered, dropping message"
            );
            return Disposition::Drop;
        };

        debug!(
            message_id = %message.id,
            tenant_id = %message.tenant_id,
            handler = handler.name(),
            retry_count,
            "Dispatching message"
        );

        let ctx = HandlerContext::new(retry_count, cancel.clone());
        let result = AssertUnwindSafe(handler.handle(&message, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                warn!(
                    message_id = %message.id,
                    tenant_id = %message.tenant_id,
                    "Handler cancelled, leaving message unacknowledged"
                );
                Disposition::Abandon
            }
            Err(e) => {
                let disposition = self.on_failure(retry_count);
                error!(
                    message_id = %message.id,
                    tenant_id = %message.tenant_id,
                    handler = handler.name(),
                    retry_count,
                    max_retries = self.max_retries,
                    disposition = ?disposition,
                    error = %e,
                    "Handler failed"
                );
                disposition
            }
        }
    }

    /// Retry decision for a failed delivery that has already been retried
    /// `retry_count` times.
    pub fn on_failure(&self, retry_count: u32) -> Disposition {
        if retry_count >= self.max_retries {
            Disposition::DeadLetter
        } else {
            Disposition::Republish {
                retry_count: retry_count.saturating_add(1),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MessageType;
    use crate::registry::MessageHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Cancel,
    }

    struct TestHandler {
        behavior: Behavior,
        calls: AtomicUsize,
        seen_retry_count: AtomicU32,
    }

    impl TestHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                seen_retry_count: AtomicU32::new(0),
            })
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("provider unavailable")]
    struct Unavailable;

    #[async_trait]
    impl MessageHandler for TestHandler {
        async fn handle(&self, _message: &Message, ctx: HandlerContext) -> Result<(), WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_retry_count.store(ctx.retry_count, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(WorkerError::handler(Unavailable)),
                Behavior::Panic => panic!("template exploded"),
                Behavior::Cancel => Err(WorkerError::Cancelled),
            }
        }

        fn name(&self) -> &'static str {
            "TestHandler"
        }
    }

    fn body(message_type: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "msg-1",
            "type": message_type,
            "tenantId": "org_1",
            "requestedAt": "2025-01-01T00:00:00Z",
            "payload": {}
        }))
        .unwrap()
    }

    async fn dispatcher_with(handler: Arc<TestHandler>, max_retries: u32) -> Dispatcher {
        let registry = HandlerRegistry::new();
        registry.register(MessageType::email_send(), handler).await;
        Dispatcher::new(registry, max_retries)
    }

    #[tokio::test]
    async fn test_success_acks() {
        let handler = TestHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(handler.clone(), 1).await;

        let disposition = dispatcher
            .dispatch(&body("email.send"), 0, &CancelSignal::never())
            .await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_envelope_without_requested_at_is_handled() {
        let handler = TestHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(handler.clone(), 1).await;
        let body = serde_json::to_vec(&json!({
            "id": "m1",
            "type": "email.send",
            "tenantId": "org_1",
            "payload": {"template": "welcome", "subject": "Hi", "to": ["a@x.io"]}
        }))
        .unwrap();

        let disposition = dispatcher.dispatch(&body, 0, &CancelSignal::never()).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_dead_letters_without_handler_call() {
        let handler = TestHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(handler.clone(), 1).await;

        let disposition = dispatcher
            .dispatch(br#"{"oops""#, 0, &CancelSignal::never())
            .await;

        assert_eq!(disposition, Disposition::DeadLetter);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_drops() {
        let handler = TestHandler::new(Behavior::Succeed);
        let dispatcher = dispatcher_with(handler.clone(), 1).await;

        let disposition = dispatcher
            .dispatch(&body("sms.send"), 0, &CancelSignal::never())
            .await;

        assert_eq!(disposition, Disposition::Drop);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_republishes_then_dead_letters() {
        let dispatcher = dispatcher_with(TestHandler::new(Behavior::Fail), 1).await;
        let cancel = CancelSignal::never();

        let first = dispatcher.dispatch(&body("email.send"), 0, &cancel).await;
        assert_eq!(first, Disposition::Republish { retry_count: 1 });

        let second = dispatcher.dispatch(&body("email.send"), 1, &cancel).await;
        assert_eq!(second, Disposition::DeadLetter);
    }

    #[tokio::test]
    async fn test_panic_is_treated_as_failure() {
        let handler = TestHandler::new(Behavior::Panic);
        let dispatcher = dispatcher_with(handler.clone(), 3).await;

        let disposition = dispatcher
            .dispatch(&body("email.send"), 1, &CancelSignal::never())
            .await;

        assert_eq!(disposition, Disposition::Republish { retry_count: 2 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.seen_retry_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_handler_abandons() {
        let dispatcher = dispatcher_with(TestHandler::new(Behavior::Cancel), 1).await;

        let disposition = dispatcher
            .dispatch(&body("email.send"), 0, &CancelSignal::never())
            .await;

        assert_eq!(disposition, Disposition::Abandon);
    }

    #[tokio::test]
    async fn test_failure_after_cancel_abandons() {
        let dispatcher = dispatcher_with(TestHandler::new(Behavior::Fail), 1).await;
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let disposition = dispatcher.dispatch(&body("email.send"), 0, &signal).await;

        assert_eq!(disposition, Disposition::Abandon);
    }

    #[test]
    fn test_zero_retry_budget_dead_letters_first_failure() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new(), 0);
        assert_eq!(dispatcher.on_failure(0), Disposition::DeadLetter);
    }

    #[test]
    fn test_retry_counts_grow_until_budget() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new(), 3);
        assert_eq!(dispatcher.on_failure(0), Disposition::Republish { retry_count: 1 });
        assert_eq!(dispatcher.on_failure(2), Disposition::Republish { retry_count: 3 });
        assert_eq!(dispatcher.on_failure(3), Disposition::DeadLetter);
        assert_eq!(dispatcher.on_failure(u32::MAX), Disposition::DeadLetter);
    }
}
