//! Consumer configuration

use std::time::Duration;

/// Configuration for [`crate::AmqpConsumer`]
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// `amqp://` connection URI
    pub url: String,

    /// Main direct exchange
    pub exchange: String,

    /// Main queue
    pub queue: String,

    /// Channel prefetch (QoS, per consumer)
    pub prefetch_count: u16,

    /// Failed deliveries allowed a republish while their `x-retry-count`
    /// is below this value
    pub max_retries: u32,

    /// Delay between connection attempts and before a reconnect
    pub reconnect_delay: Duration,

    /// Connection attempts at startup
    pub connect_attempts: u32,

    /// Consumer tag announced to the broker
    pub consumer_tag: String,
}

impl ConsumerConfig {
    pub fn new(
        url: impl Into<String>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        let queue = queue.into();
        Self {
            url: url.into(),
            exchange: exchange.into(),
            consumer_tag: format!("{queue}-consumer"),
            queue,
            prefetch_count: 10,
            max_retries: 1,
            reconnect_delay: Duration::from_secs(5),
            connect_attempts: 5,
        }
    }

    /// Dead-letter exchange name, `<exchange>.dlx`
    pub fn dlx_name(&self) -> String {
        format!("{}.dlx", self.exchange)
    }

    /// Dead-letter queue name, `<queue>.dlq`
    pub fn dlq_name(&self) -> String {
        format!("{}.dlq", self.queue)
    }

    pub fn with_prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// At least one attempt is always made
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_derived_names() {
        let config = ConsumerConfig::new("amqp://localhost", "trenova.events", "email.service");

        assert_eq!(config.prefetch_count, 10);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.dlx_name(), "trenova.events.dlx");
        assert_eq!(config.dlq_name(), "email.service.dlq");
        assert_eq!(config.consumer_tag, "email.service-consumer");
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConsumerConfig::new("amqp://localhost", "ex", "q")
            .with_prefetch_count(2)
            .with_max_retries(3)
            .with_reconnect_delay(Duration::from_millis(100))
            .with_connect_attempts(0)
            .with_consumer_tag("worker-1");

        assert_eq!(config.prefetch_count, 2);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.reconnect_delay, Duration::from_millis(100));
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.consumer_tag, "worker-1");
    }
}
