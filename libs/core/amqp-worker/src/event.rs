//! Wire envelope
//!
//! Every message on the exchange is a JSON envelope carrying routing
//! metadata and a type-specific payload.

use crate::error::WorkerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type tag, also used as the routing key.
///
/// Open-ended: any string can be registered, `email.send` is the one the
/// email service binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub const EMAIL_SEND: &'static str = "email.send";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn email_send() -> Self {
        Self::new(Self::EMAIL_SEND)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Envelope consumed from the broker. Never mutated after decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(default)]
    pub entity_id: String,

    #[serde(default)]
    pub entity_type: String,

    pub tenant_id: String,

    /// Epoch when absent
    #[serde(default)]
    pub requested_at: DateTime<Utc>,

    /// Shape depends on `message_type`; decoded by the handler
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        message_type: MessageType,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            message_type,
            entity_id: String::new(),
            entity_type: String::new(),
            tenant_id: tenant_id.into(),
            requested_at: Utc::now(),
            payload,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.entity_id = entity_id.into();
        self.entity_type = entity_type.into();
        self
    }

    /// Decode and validate a delivery body.
    pub fn from_slice(body: &[u8]) -> Result<Self, WorkerError> {
        let message: Message = serde_json::from_slice(body)?;

        if message.id.trim().is_empty() {
            return Err(WorkerError::Malformed("missing message id".to_string()));
        }
        if message.message_type.as_str().trim().is_empty() {
            return Err(WorkerError::Malformed("missing message type".to_string()));
        }
        if message.tenant_id.trim().is_empty() {
            return Err(WorkerError::Malformed("missing tenantId".to_string()));
        }

        Ok(message)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, WorkerError> {
        serde_json::to_vec(self).map_err(|e| WorkerError::Malformed(e.to_string()))
    }
}
