//! Consumer metrics
//!
//! Emitted through the `metrics` facade. The host process decides whether a
//! recorder is installed; without one these calls are no-ops.

use crate::dispatch::Disposition;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Outcome label recorded per delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Drop,
    DeadLetter,
    Republish,
    Requeue,
    Abandon,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ack => "ack",
            Outcome::Drop => "drop",
            Outcome::DeadLetter => "dead_letter",
            Outcome::Republish => "republish",
            Outcome::Requeue => "requeue",
            Outcome::Abandon => "abandon",
        }
    }
}

impl From<&Disposition> for Outcome {
    fn from(disposition: &Disposition) -> Self {
        match disposition {
            Disposition::Ack => Outcome::Ack,
            Disposition::Drop => Outcome::Drop,
            Disposition::DeadLetter => Outcome::DeadLetter,
            Disposition::Republish { .. } => Outcome::Republish,
            Disposition::Abandon => Outcome::Abandon,
        }
    }
}

#[derive(Clone)]
pub struct ConsumerMetrics {
    queue: String,
}

impl ConsumerMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn delivery_received(&self) {
        counter!("amqp_worker_deliveries_total", "queue" => self.queue.clone()).increment(1);
    }

    pub fn delivery_settled(&self, outcome: Outcome, duration: Duration) {
        counter!(
            "amqp_worker_outcomes_total",
            "queue" => self.queue.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        histogram!(
            "amqp_worker_delivery_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn in_flight(&self, count: usize) {
        gauge!("amqp_worker_in_flight", "queue" => self.queue.clone()).set(count as f64);
    }

    pub fn reconnected(&self) {
        counter!("amqp_worker_reconnects_total", "queue" => self.queue.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from(&Disposition::Ack).as_str(), "ack");
        assert_eq!(Outcome::from(&Disposition::Drop).as_str(), "drop");
        assert_eq!(Outcome::from(&Disposition::DeadLetter).as_str(), "dead_letter");
        assert_eq!(
            Outcome::from(&Disposition::Republish { retry_count: 1 }).as_str(),
            "republish"
        );
        assert_eq!(Outcome::from(&Disposition::Abandon).as_str(), "abandon");
        assert_eq!(Outcome::Requeue.as_str(), "requeue");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = ConsumerMetrics::new("email.service");
        metrics.delivery_received();
        metrics.delivery_settled(Outcome::Ack, Duration::from_millis(5));
        metrics.in_flight(3);
        metrics.reconnected();
    }
}
