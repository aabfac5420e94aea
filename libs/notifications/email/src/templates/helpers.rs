//! Template helpers available to every template.
//!
//! | helper | example |
//! |---|---|
//! | `formatDate` | `{{formatDate DueDate}}`, `{{formatDate DueDate fmt="%Y-%m-%d"}}` |
//! | `formatDateTime` | `{{formatDateTime PickupAt}}` |
//! | `upper` / `lower` / `title` / `trim` | `{{upper Name}}` |
//! | `contains` | `{{#if (contains Status "late")}}` |
//! | `default` | `{{default Name "there"}}` |
//! | `json` | `{{{json Stops}}}` |

use chrono::{DateTime, NaiveDate, Utc};
use handlebars::{Handlebars, handlebars_helper};
use serde_json::Value;

/// RFC 3339 strings, plain dates, or unix seconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

fn format_timestamp(value: &Value, format: &str) -> String {
    match parse_timestamp(value) {
        Some(dt) => dt.format(format).to_string(),
        None => match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

handlebars_helper!(format_date: |value: Json, {fmt: str = "%B %-d, %Y"}| format_timestamp(value, fmt));
handlebars_helper!(format_date_time: |value: Json, {fmt: str = "%B %-d, %Y %-I:%M %p"}| format_timestamp(value, fmt));
handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(title: |s: str| title_case(s));
handlebars_helper!(trim: |s: str| s.trim().to_string());
handlebars_helper!(contains: |haystack: str, needle: str| haystack.contains(needle));
handlebars_helper!(default_value: |value: Json, fallback: Json| {
    if is_empty(value) { fallback.clone() } else { value.clone() }
});
handlebars_helper!(to_json: |value: Json| serde_json::to_string(value).unwrap_or_default());

pub fn register(handlebars: &mut Handlebars<'static>) {
    handlebars.register_helper("formatDate", Box::new(format_date));
    handlebars.register_helper("formatDateTime", Box::new(format_date_time));
    handlebars.register_helper("upper", Box::new(upper));
    handlebars.register_helper("lower", Box::new(lower));
    handlebars.register_helper("title", Box::new(title));
    handlebars.register_helper("trim", Box::new(trim));
    handlebars.register_helper("contains", Box::new(contains));
    handlebars.register_helper("default", Box::new(default_value));
    handlebars.register_helper("json", Box::new(to_json));
}
