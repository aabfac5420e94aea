//! Sample data files used for previews

use super::error::DevServerError;
use crate::error::EmailError;
use crate::templates::{list_stems, validate_name};
use chrono::{Datelike, Utc};
use serde_json::{Map, Value, json};
use std::io::ErrorKind;
use std::path::PathBuf;

const SAMPLE_EXTENSION: &str = "json";
const DEFAULT_SAMPLE: &str = "default";

/// `<dir>/<name>.json` files holding template context objects
#[derive(Clone, Debug)]
pub struct SampleStore {
    dir: PathBuf,
}

impl SampleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Accepts `name` with or without the `.json` suffix
    fn path(&self, name: &str) -> Result<(String, PathBuf), DevServerError> {
        let name = name.strip_suffix(".json").unwrap_or(name);
        validate_name(name)?;
        let path = self.dir.join(format!("{name}.{SAMPLE_EXTENSION}"));
        Ok((name.to_string(), path))
    }

    pub async fn list(&self) -> Result<Vec<String>, DevServerError> {
        Ok(list_stems(&self.dir, SAMPLE_EXTENSION).await?)
    }

    /// Raw file content
    pub async fn read(&self, name: &str) -> Result<String, DevServerError> {
        let (name, path) = self.path(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DevServerError::NotFound(format!("Sample '{name}' not found")))
            }
            Err(e) => Err(EmailError::Io(e).into()),
        }
    }

    /// Validate `content` as a JSON object and write it. Returns the bare name.
    pub async fn write(&self, name: &str, content: &str) -> Result<String, DevServerError> {
        let (name, path) = self.path(name)?;
        serde_json::from_str::<Map<String, Value>>(content)
            .map_err(|e| DevServerError::BadRequest(format!("Invalid JSON format: {e}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(EmailError::Io)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(EmailError::Io)?;
        Ok(name)
    }

    async fn load(&self, name: &str) -> Option<Value> {
        let content = self.read(name).await.ok()?;
        serde_json::from_str::<Value>(&content)
            .ok()
            .filter(Value::is_object)
    }

    /// Best match for previewing `template`: its own sample, then the
    /// `default` sample, then a minimal built-in context.
    pub async fn preview_data(&self, template: &str) -> Value {
        if let Some(data) = self.load(template).await {
            return data;
        }
        if let Some(data) = self.load(DEFAULT_SAMPLE).await {
            return data;
        }
        json!({
            "Year": Utc::now().year(),
            "Name": "John Doe",
            "Username": "johndoe",
            "Email": "john.doe@example.com",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_preview_data_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());

        let fallback = store.preview_data("welcome").await;
        assert_eq!(fallback["Name"], "John Doe");

        store.write("default", r#"{"Name": "Default"}"#).await.unwrap();
        assert_eq!(store.preview_data("welcome").await["Name"], "Default");

        store.write("welcome.json", r#"{"Name": "Ada"}"#).await.unwrap();
        assert_eq!(store.preview_data("welcome").await["Name"], "Ada");
        assert_eq!(store.list().await.unwrap(), vec!["default", "welcome"]);
    }

    #[tokio::test]
    async fn test_write_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());

        let err = store.write("welcome", "{not json").await.unwrap_err();
        assert!(matches!(err, DevServerError::BadRequest(_)));

        let err = store.write("welcome", "[1, 2]").await.unwrap_err();
        assert!(matches!(err, DevServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_read_missing_and_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());

        assert!(matches!(store.read("nope").await, Err(DevServerError::NotFound(_))));
        assert!(matches!(store.read("../etc/passwd").await, Err(DevServerError::BadRequest(_))));
    }
}
