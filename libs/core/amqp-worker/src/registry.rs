//! Handler registry
//!
//! Maps message type tags to handlers. Registration is allowed at any time;
//! lookups take a shared read lock.

use crate::cancel::CancelSignal;
use crate::error::WorkerError;
use crate::event::{Message, MessageType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-delivery context handed to a handler
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// `x-retry-count` of the delivery being handled
    pub retry_count: u32,
    /// Fires when shutdown stops waiting for this handler
    pub cancel: CancelSignal,
}

impl HandlerContext {
    pub fn new(retry_count: u32, cancel: CancelSignal) -> Self {
        Self { retry_count, cancel }
    }
}

/// Processes one decoded envelope.
///
/// Return `Ok(())` to acknowledge, `Err(WorkerError::Cancelled)` to leave the
/// delivery unacknowledged, any other error to enter the retry path.
///
/// ```rust,ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl MessageHandler for AuditHandler {
///     async fn handle(&self, message: &Message, _ctx: HandlerContext) -> Result<(), WorkerError> {
///         tracing::info!(id = %message.id, "audited");
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "AuditHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message, ctx: HandlerContext) -> Result<(), WorkerError>;

    /// Handler name for logging
    fn name(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for `message_type`
    pub async fn register(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(message_type.clone(), handler).is_some() {
            tracing::warn!(message_type = %message_type, "Replaced existing handler");
        }
    }

    pub async fn get(&self, message_type: &MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().await.get(message_type).cloned()
    }

    /// Registered types in sorted order; these become the queue bindings
    pub async fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}
