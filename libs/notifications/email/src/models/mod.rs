use crate::error::{EmailError, EmailResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Template name that renders `data.Body` instead of a registry template
pub const CUSTOM_TEMPLATE: &str = "custom";

/// Email processing status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[derive(Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
    Retrying,
}

/// File attached to an outgoing email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAttachment {
    pub filename: String,
    /// Base64 encoded bytes
    pub content: String,
    pub content_type: String,
}

impl EmailAttachment {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// Decode `content`. Line breaks and other whitespace are ignored.
    pub fn decode(&self) -> EmailResult<Vec<u8>> {
        let compact: String = self
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| EmailError::AttachmentDecode {
                filename: self.filename.clone(),
                reason: e.to_string(),
            })
    }
}

/// Attachment with its bytes already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Decode every attachment up front so a bad one fails the send before any
/// transport work starts.
pub fn decode_attachments(attachments: &[EmailAttachment]) -> EmailResult<Vec<DecodedAttachment>> {
    attachments
        .iter()
        .map(|a| {
            Ok(DecodedAttachment {
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                bytes: a.decode()?,
            })
        })
        .collect()
}

/// `email.send` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub template: String,
    pub subject: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EmailAttachment>,
}

impl EmailPayload {
    pub fn new(template: impl Into<String>, subject: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            template: template.into(),
            subject: subject.into(),
            to,
            cc: Vec::new(),
            bcc: Vec::new(),
            data: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_bcc(mut self, bcc: Vec<String>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn with_attachment(mut self, attachment: EmailAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn is_custom(&self) -> bool {
        self.template == CUSTOM_TEMPLATE
    }
}

/// Transient send record. Lives for the duration of one send call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: EmailStatus,
    pub retry_count: u32,
    pub error_msg: Option<String>,
    pub message_id: Option<String>,
    pub template: String,
    pub subject: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub data: Map<String, Value>,
    /// Transport data, never part of the template context
    #[serde(skip)]
    pub attachments: Vec<EmailAttachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Email {
    /// Pending record built from a normalized payload
    pub fn new(tenant_id: impl Into<String>, payload: EmailPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            status: EmailStatus::Pending,
            retry_count: 0,
            error_msg: None,
            message_id: None,
            template: payload.template,
            subject: payload.subject,
            to: payload.to,
            cc: payload.cc,
            bcc: payload.bcc,
            data: payload.data.unwrap_or_default(),
            attachments: payload.attachments,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn mark_sent(&mut self, message_id: Option<String>) {
        let now = Utc::now();
        self.status = EmailStatus::Sent;
        self.message_id = message_id;
        self.error_msg = None;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = EmailStatus::Failed;
        self.error_msg = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn is_custom(&self) -> bool {
        self.template == CUSTOM_TEMPLATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_strings() {
        assert_eq!(EmailStatus::Retrying.to_string(), "retrying");
        assert_eq!("sent".parse::<EmailStatus>().unwrap(), EmailStatus::Sent);
        assert_eq!(serde_json::to_value(EmailStatus::Pending).unwrap(), json!("pending"));
    }

    #[test]
    fn test_attachment_decode_ignores_line_breaks() {
        let attachment = EmailAttachment::new("a.txt", "aGVs\nbG8=", "text/plain");
        assert_eq!(attachment.decode().unwrap(), b"hello");
    }

    #[test]
    fn test_attachment_decode_failure_names_file() {
        let attachment = EmailAttachment::new("bol.pdf", "not base64!", "application/pdf");
        let err = attachment.decode().unwrap_err();
        assert!(matches!(err, EmailError::AttachmentDecode { .. }));
        assert!(err.to_string().contains("bol.pdf"));
    }

    #[test]
    fn test_decode_attachments_stops_on_first_bad_one() {
        let attachments = vec![
            EmailAttachment::new("ok.txt", "b2s=", "text/plain"),
            EmailAttachment::new("bad.txt", "%%%", "text/plain"),
        ];
        assert!(decode_attachments(&attachments).is_err());
        assert_eq!(decode_attachments(&attachments[..1]).unwrap()[0].bytes, b"ok");
    }

    #[test]
    fn test_email_lifecycle() {
        let payload = EmailPayload::new("welcome", "Hi", vec!["a@x".to_string()]);
        let mut email = Email::new("org_1", payload);

        assert_eq!(email.status, EmailStatus::Pending);
        assert!(email.data.is_empty());
        assert!(email.sent_at.is_none());

        email.mark_sent(Some("250 OK".to_string()));
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.message_id.as_deref(), Some("250 OK"));
        assert!(email.sent_at.is_some());

        email.mark_failed("relay down");
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.error_msg.as_deref(), Some("relay down"));
    }

    #[test]
    fn test_email_serialization_omits_attachments() {
        let payload = EmailPayload::new("welcome", "Hi", vec!["a@x".to_string()])
            .with_attachment(EmailAttachment::new("a.txt", "b2s=", "text/plain"));
        let value = serde_json::to_value(Email::new("org_1", payload)).unwrap();

        assert_eq!(value["tenantId"], "org_1");
        assert!(value.get("attachments").is_none());
    }
}
