//! AMQP Worker Framework
//!
//! Consumes JSON envelopes from a RabbitMQ queue and dispatches them to
//! handlers registered per message type.
//!
//! ## Features
//!
//! - **Topology**: durable direct exchange, main queue with a dead-letter
//!   exchange argument, `<exchange>.dlx` and `<queue>.dlq`
//! - **Retry accounting**: failed messages are republished with an
//!   incremented `x-retry-count` header until the budget is spent
//! - **Dead-lettering**: malformed or exhausted messages are nacked without
//!   requeue and land in the DLQ
//! - **Reconnect**: the consume loop re-establishes the session when the
//!   delivery stream closes
//! - **Graceful shutdown**: in-flight handlers get a grace period before
//!   their cancel signal fires
//!
//! ## Example
//!
//! ```ignore
//! use amqp_worker::{AmqpConsumer, ConsumerConfig, MessageType};
//!
//! let consumer = AmqpConsumer::new(ConsumerConfig::new(url, "trenova.events", "email.service"));
//! consumer.register_handler(MessageType::email_send(), Arc::new(handler)).await;
//! consumer.start().await?;
//! // ...
//! consumer.close(Duration::from_secs(30)).await?;
//! ```

mod cancel;
mod config;
mod consumer;
mod dispatch;
mod error;
mod event;
pub mod metrics;
mod registry;
pub mod retry;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::ConsumerConfig;
pub use consumer::AmqpConsumer;
pub use dispatch::{Dispatcher, Disposition};
pub use error::WorkerError;
pub use event::{Message, MessageType};
pub use registry::{HandlerContext, HandlerRegistry, MessageHandler};
