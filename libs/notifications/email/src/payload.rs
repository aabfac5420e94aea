//! Payload normalization
//!
//! `email.send` payloads arrive either in the exact [`EmailPayload`] shape or
//! as a loose JSON object produced by producers that build maps by hand. Both
//! end up as a validated [`EmailPayload`] with at least one recipient.

use crate::error::{EmailError, EmailResult};
use crate::models::{EmailAttachment, EmailPayload};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Typed(EmailPayload),
    Loose(Map<String, Value>),
}

/// Normalize a raw JSON payload.
pub fn normalize(payload: &Value) -> EmailResult<EmailPayload> {
    match RawPayload::deserialize(payload) {
        Ok(RawPayload::Typed(typed)) => normalize_typed(typed),
        Ok(RawPayload::Loose(map)) => normalize_map(&map),
        Err(_) => Err(EmailError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        )),
    }
}

/// Normalize an already typed payload: blank addresses are dropped.
pub fn normalize_typed(mut payload: EmailPayload) -> EmailResult<EmailPayload> {
    require_text(&payload.template, "template")?;
    require_text(&payload.subject, "subject")?;

    payload.to = clean_addresses(payload.to);
    payload.cc = clean_addresses(payload.cc);
    payload.bcc = clean_addresses(payload.bcc);

    if payload.to.is_empty() {
        return Err(EmailError::NoRecipients);
    }
    Ok(payload)
}

/// Normalize a loosely typed map.
pub fn normalize_map(map: &Map<String, Value>) -> EmailResult<EmailPayload> {
    let template = required_string(map, "template")?;
    let subject = required_string(map, "subject")?;

    let data = match map.get("data") {
        None | Some(Value::Null) => None,
        Some(Value::Object(data)) => Some(data.clone()),
        Some(_) => {
            return Err(EmailError::InvalidPayload(
                "'data' must be an object".to_string(),
            ));
        }
    };

    let payload = EmailPayload {
        template,
        subject,
        to: string_list(map.get("to")),
        cc: string_list(map.get("cc")),
        bcc: string_list(map.get("bcc")),
        data,
        attachments: attachments(map.get("attachments"))?,
    };

    if payload.to.is_empty() {
        return Err(EmailError::NoRecipients);
    }
    Ok(payload)
}

fn require_text(value: &str, field: &'static str) -> EmailResult<()> {
    if value.trim().is_empty() {
        Err(EmailError::MissingField(field))
    } else {
        Ok(())
    }
}

fn required_string(map: &Map<String, Value>, field: &'static str) -> EmailResult<String> {
    match map.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(EmailError::MissingField(field)),
    }
}

fn clean_addresses(addresses: Vec<String>) -> Vec<String> {
    addresses
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Strings from a list, skipping blanks and non-strings. A bare string
/// counts as a one-element list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => clean_addresses(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Some(Value::String(s)) => clean_addresses(vec![s.clone()]),
        _ => Vec::new(),
    }
}

fn attachments(value: Option<&Value>) -> EmailResult<Vec<EmailAttachment>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(EmailError::InvalidPayload(
                "'attachments' must be a list".to_string(),
            ));
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(fields) = item else {
                return Err(EmailError::InvalidAttachment {
                    index,
                    reason: "expected an object".to_string(),
                });
            };
            let field = |name: &str| -> EmailResult<String> {
                match fields.get(name) {
                    Some(Value::String(s)) => Ok(s.clone()),
                    _ => Err(EmailError::InvalidAttachment {
                        index,
                        reason: format!("'{name}' must be a string"),
                    }),
                }
            };

            let filename = field("filename")?;
            if filename.trim().is_empty() {
                return Err(EmailError::InvalidAttachment {
                    index,
                    reason: "'filename' must not be empty".to_string(),
                });
            }

            Ok(EmailAttachment {
                filename,
                content: field("content")?,
                content_type: field("contentType")?,
            })
        })
        .collect()
}
