//! Retry-count header handling
//!
//! The retry count lives in the `x-retry-count` message header and is the
//! only source of truth for retry decisions.

use lapin::BasicProperties;
use lapin::types::{AMQPValue, FieldTable, ShortString};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Read `x-retry-count` from a header table.
///
/// Any integer width or signedness is accepted, as is a decimal string.
/// Missing, negative, or non-numeric values read as 0.
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|h| h.inner().get(&ShortString::from(RETRY_COUNT_HEADER)))
        .and_then(value_as_u32)
        .unwrap_or(0)
}

fn value_as_u32(value: &AMQPValue) -> Option<u32> {
    let n: i128 = match value {
        AMQPValue::ShortShortInt(v) => (*v).into(),
        AMQPValue::ShortShortUInt(v) => (*v).into(),
        AMQPValue::ShortInt(v) => (*v).into(),
        AMQPValue::ShortUInt(v) => (*v).into(),
        AMQPValue::LongInt(v) => (*v).into(),
        AMQPValue::LongUInt(v) => (*v).into(),
        AMQPValue::LongLongInt(v) => (*v).into(),
        AMQPValue::Timestamp(v) => (*v).into(),
        AMQPValue::ShortString(s) => s.as_str().trim().parse().ok()?,
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok()
}

/// Retry count read from a delivery's properties
pub fn delivery_retry_count(properties: &BasicProperties) -> u32 {
    retry_count(properties.headers().as_ref())
}

/// Properties for a republished delivery: the original headers with
/// `x-retry-count` overwritten, plus content type, content encoding,
/// delivery mode, and priority.
pub fn republish_properties(original: &BasicProperties, retry_count: u32) -> BasicProperties {
    let mut headers = original.headers().clone().unwrap_or_default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongInt(i32::try_from(retry_count).unwrap_or(i32::MAX)),
    );

    let mut properties = BasicProperties::default().with_headers(headers);
    if let Some(content_type) = original.content_type() {
        properties = properties.with_content_type(content_type.clone());
    }
    if let Some(content_encoding) = original.content_encoding() {
        properties = properties.with_content_encoding(content_encoding.clone());
    }
    if let Some(delivery_mode) = original.delivery_mode() {
        properties = properties.with_delivery_mode(*delivery_mode);
    }
    if let Some(priority) = original.priority() {
        properties = properties.with_priority(*priority);
    }
    properties
}
