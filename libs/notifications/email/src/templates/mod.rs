//! Template registry
//!
//! Named Handlebars templates live in `<dir>/<name>.html`. They are parsed on
//! first use and cached until [`TemplateRegistry::clear_template_cache`]
//! evicts them, which the dev server does after every write.
//!
//! Supports:
//! - Variables: `{{Name}}`
//! - Conditionals: `{{#if ResetLink}}...{{/if}}`
//! - Loops: `{{#each Stops}}...{{/each}}`
//! - Helpers: see [`helpers`]

mod defaults;
pub mod helpers;

pub use defaults::default_template;

use crate::error::{EmailError, EmailResult};
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

const TEMPLATE_EXTENSION: &str = "html";

/// Where a cached template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    File,
    Embedded,
}

/// Cached entry metadata. The parsed template itself is owned by the
/// Handlebars registry under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCacheEntry {
    pub name: String,
    pub source: TemplateSource,
    pub parsed_at: DateTime<Utc>,
}

struct Cache {
    handlebars: Handlebars<'static>,
    entries: HashMap<String, TemplateCacheEntry>,
    /// Bumped on every eviction; a load only caches what it read if the
    /// generation it started from is still current.
    generations: HashMap<String, u64>,
}

/// Loads, caches, and renders named HTML templates.
pub struct TemplateRegistry {
    dir: PathBuf,
    cache: RwLock<Cache>,
}

/// Reject names that could escape the template directory
pub fn validate_name(name: &str) -> EmailResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(EmailError::InvalidTemplateName(name.to_string()))
    }
}

impl TemplateRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut handlebars = Handlebars::new();
        helpers::register(&mut handlebars);

        Self {
            dir: dir.into(),
            cache: RwLock::new(Cache {
                handlebars,
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<name>.html`
    pub fn template_path(&self, name: &str) -> EmailResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.{TEMPLATE_EXTENSION}")))
    }

    /// Return the cached entry, or parse the file and cache it.
    ///
    /// A missing file falls back to the embedded default for well-known
    /// kinds. Parse failures are returned and nothing is cached.
    pub async fn load_template(&self, name: &str) -> EmailResult<TemplateCacheEntry> {
        let path = self.template_path(name)?;

        loop {
            let generation = {
                let cache = self.cache.read().await;
                if let Some(entry) = cache.entries.get(name) {
                    return Ok(entry.clone());
                }
                cache.generations.get(name).copied().unwrap_or(0)
            };

            let (content, source) = self.read_for_load(name, &path).await?;
            if let Some(entry) = self.store(name, &content, source, generation).await? {
                return Ok(entry);
            }
            debug!(template = name, "Template changed while loading, reloading");
        }
    }

    async fn read_for_load(&self, name: &str, path: &Path) -> EmailResult<(String, TemplateSource)> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok((content, TemplateSource::File)),
            Err(e) if e.kind() == ErrorKind::NotFound => match default_template(name) {
                Some(content) => Ok((content.to_string(), TemplateSource::Embedded)),
                None => Err(EmailError::TemplateNotFound(name.to_string())),
            },
            Err(e) => Err(EmailError::Io(e)),
        }
    }

    /// Parse and cache `content` read at `generation`. `None` when an
    /// eviction happened since, so the content may be stale.
    async fn store(
        &self,
        name: &str,
        content: &str,
        source: TemplateSource,
        generation: u64,
    ) -> EmailResult<Option<TemplateCacheEntry>> {
        let mut cache = self.cache.write().await;
        if cache.generations.get(name).copied().unwrap_or(0) != generation {
            return Ok(None);
        }
        if let Some(entry) = cache.entries.get(name) {
            return Ok(Some(entry.clone()));
        }

        cache
            .handlebars
            .register_template_string(name, content)
            .map_err(|e| EmailError::TemplateParse {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let entry = TemplateCacheEntry {
            name: name.to_string(),
            source,
            parsed_at: Utc::now(),
        };
        cache.entries.insert(name.to_string(), entry.clone());
        debug!(template = name, source = ?source, "Template cached");
        Ok(Some(entry))
    }

    /// Load `name` and render it with `data`.
    pub async fn render_template(&self, name: &str, data: &serde_json::Value) -> EmailResult<String> {
        // An eviction can land between load and render; one reload covers it
        for _ in 0..2 {
            self.load_template(name).await?;

            let cache = self.cache.read().await;
            if !cache.handlebars.has_template(name) {
                continue;
            }
            return cache
                .handlebars
                .render(name, data)
                .map_err(|e| EmailError::TemplateRender {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
        }
        Err(EmailError::TemplateNotFound(name.to_string()))
    }

    /// Parse and render ad-hoc template content without caching it.
    pub async fn render_inline(&self, content: &str, data: &serde_json::Value) -> EmailResult<String> {
        self.cache
            .read()
            .await
            .handlebars
            .render_template(content, data)
            .map_err(|e| EmailError::TemplateRender {
                name: "inline".to_string(),
                reason: e.to_string(),
            })
    }

    /// Embedded HTML for welcome, password-reset, invoice, and generic.
    pub fn get_default_template(&self, kind: &str) -> Option<&'static str> {
        default_template(kind)
    }

    /// Evict one entry; the next load re-reads the file.
    pub async fn clear_template_cache(&self, name: &str) {
        let mut cache = self.cache.write().await;
        *cache.generations.entry(name.to_string()).or_insert(0) += 1;
        cache.handlebars.unregister_template(name);
        if cache.entries.remove(name).is_some() {
            debug!(template = name, "Template evicted from cache");
        }
    }

    pub async fn cached_entry(&self, name: &str) -> Option<TemplateCacheEntry> {
        self.cache.read().await.entries.get(name).cloned()
    }

    /// Template names (file stems of `*.html`) in sorted order
    pub async fn list_templates(&self) -> EmailResult<Vec<String>> {
        list_stems(&self.dir, TEMPLATE_EXTENSION).await
    }

    /// Raw template source from disk
    pub async fn read_source(&self, name: &str) -> EmailResult<String> {
        let path = self.template_path(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(EmailError::TemplateNotFound(name.to_string())),
            Err(e) => Err(EmailError::Io(e)),
        }
    }

    /// Write template source to disk and evict the cached copy.
    pub async fn write_source(&self, name: &str, content: &str) -> EmailResult<()> {
        let path = self.template_path(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, content).await?;
        self.clear_template_cache(name).await;
        info!(template = name, "Template written");
        Ok(())
    }
}

/// File stems with the given extension, sorted. A missing directory lists
/// as empty.
pub(crate) async fn list_stems(dir: &Path, extension: &str) -> EmailResult<Vec<String>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EmailError::Io(e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
