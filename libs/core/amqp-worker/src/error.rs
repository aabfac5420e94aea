//! Worker error types
//!
//! The dispatcher only distinguishes two kinds of handler error:
//! cancellation leaves the delivery unacked, anything else takes the retry
//! path. Envelope decode failures never reach a handler.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// Broker connection, channel, or protocol error
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Body is not a valid envelope
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Handler returned an error
    #[error("Handler failed: {0}")]
    Handler(#[source] BoxError),

    /// Handler panicked while processing
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Startup could not reach the broker within the attempt budget
    #[error("Could not connect to broker after {attempts} attempts: {last_error}")]
    ConnectExhausted { attempts: u32, last_error: String },

    #[error("Consumer already started")]
    AlreadyStarted,

    #[error("Consumer not started")]
    NotStarted,

    /// Work abandoned because the cancel signal fired
    #[error("Cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Wrap any handler-side error
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WorkerError::Handler(Box::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }

    /// Broker refused a redeclare because existing arguments differ
    pub fn is_precondition_failed(&self) -> bool {
        match self {
            WorkerError::Amqp(e) => e.to_string().contains("PRECONDITION_FAILED"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Malformed(err.to_string())
    }
}
