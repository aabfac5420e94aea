//! HTML body rendering shared by the providers.

use crate::error::EmailResult;
use crate::models::Email;
use crate::templates::TemplateRegistry;
use handlebars::html_escape;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Keys never printed by the fallback table (case-insensitive substring match)
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "apikey",
    "api_key",
    "authorization",
    "ssn",
    "creditcard",
];

/// Renders the HTML body of an [`Email`].
///
/// Named templates go through the registry. The `custom` template renders
/// `data.Body` inline. Without a registry every email gets the fallback table.
#[derive(Clone, Default)]
pub struct BodyRenderer {
    registry: Option<Arc<TemplateRegistry>>,
}

impl BodyRenderer {
    pub fn new(registry: Option<Arc<TemplateRegistry>>) -> Self {
        Self { registry }
    }

    pub fn with_registry(registry: Arc<TemplateRegistry>) -> Self {
        Self::new(Some(registry))
    }

    pub fn registry(&self) -> Option<&Arc<TemplateRegistry>> {
        self.registry.as_ref()
    }

    /// Render or return the template error.
    pub async fn render(&self, email: &Email) -> EmailResult<String> {
        let Some(registry) = &self.registry else {
            return Ok(fallback_html(&email.subject, &email.data));
        };

        let context = Value::Object(email.data.clone());
        if email.is_custom() {
            return match custom_body(&email.data) {
                Some(body) => registry.render_inline(body, &context).await,
                None => Ok(fallback_html(&email.subject, &email.data)),
            };
        }

        registry.render_template(&email.template, &context).await
    }

    /// Render, degrading to the fallback table on any template error.
    pub async fn render_or_fallback(&self, email: &Email) -> String {
        match self.render(email).await {
            Ok(html) => html,
            Err(e) => {
                warn!(
                    email_id = %email.id,
                    template = %email.template,
                    error = %e,
                    "Template render failed, using fallback body"
                );
                fallback_html(&email.subject, &email.data)
            }
        }
    }
}

fn custom_body(data: &Map<String, Value>) -> Option<&str> {
    data.get("Body")
        .or_else(|| data.get("body"))
        .and_then(Value::as_str)
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "attachments" || SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Generic HTML page: the subject as a heading and `data` as an escaped
/// key/value table.
pub fn fallback_html(subject: &str, data: &Map<String, Value>) -> String {
    let mut rows = String::new();
    for (key, value) in data.iter().filter(|(k, _)| !is_sensitive(k)) {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        rows.push_str(&format!(
            "<tr><th align=\"left\">{}</th><td>{}</td></tr>\n",
            html_escape(key),
            html_escape(&value)
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{subject}</title></head>\n<body>\n<h1>{subject}</h1>\n<table>\n{rows}</table>\n</body>\n</html>\n",
        subject = html_escape(subject),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailPayload;
    use serde_json::json;

    fn email(template: &str, data: Value) -> Email {
        let Value::Object(map) = data else {
            panic!("object expected")
        };
        Email::new(
            "org_1",
            EmailPayload::new(template, "Hello <team>", vec!["a@x".to_string()]).with_data(map),
        )
    }

    #[test]
    fn test_fallback_escapes_and_skips_sensitive_keys() {
        let Value::Object(data) = json!({
            "Name": "<script>x</script>",
            "Password": "hunter2",
            "resetToken": "abc",
            "API_KEY": "k",
            "attachments": "[...]",
            "Count": 3
        }) else {
            unreachable!()
        };

        let html = fallback_html("Hi & bye", &data);

        assert!(html.contains("Hi &amp; bye"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("<td>3</td>"));
        assert!(!html.contains("hunter2"));
        assert!(!html.contains("abc"));
        assert!(!html.contains("API_KEY"));
        assert!(!html.contains("[...]"));
    }

    #[tokio::test]
    async fn test_without_registry_uses_fallback() {
        let renderer = BodyRenderer::default();
        let html = renderer.render(&email("welcome", json!({"Name": "Ada"}))).await.unwrap();
        assert!(html.contains("Hello &lt;team&gt;"));
        assert!(html.contains("Ada"));
    }

    #[tokio::test]
    async fn test_custom_template_renders_body_inline() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = BodyRenderer::with_registry(Arc::new(TemplateRegistry::new(dir.path())));

        let html = renderer
            .render(&email("custom", json!({"Body": "<p>Hi {{Name}}</p>", "Name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(html, "<p>Hi Ada</p>");

        let html = renderer.render(&email("custom", json!({"Name": "Ada"}))).await.unwrap();
        assert!(html.contains("<table>"));
    }

    #[tokio::test]
    async fn test_render_error_propagates_but_fallback_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = BodyRenderer::with_registry(Arc::new(TemplateRegistry::new(dir.path())));
        let missing = email("does-not-exist", json!({"Name": "Ada"}));

        assert!(renderer.render(&missing).await.is_err());
        let html = renderer.render_or_fallback(&missing).await;
        assert!(html.contains("Ada"));
    }
}
