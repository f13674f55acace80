//! Schema registry
//!
//! Resolves versioned event schemas from a directory tree and validates
//! event documents against them. The path for `(name, version)` is derived
//! from the first two dot-separated segments of the event name, lowercased:
//! `Users.Created` v2 lives at `{root}/users/created/2.json`.
//!
//! Published schemas are immutable, so compiled documents are cached for
//! the life of the process and never invalidated. Every failure mode fails
//! closed: an unresolvable name, a missing file, an unparseable document
//! and a non-conforming payload are all errors.

pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

pub use schema::{Schema, Violation};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot derive a schema path from event name '{0}'")]
    UnresolvableName(String),

    #[error("no schema published for {name} version {version}")]
    NotFound { name: String, version: u32 },

    #[error("failed to read schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema {path} is not a valid schema document: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document for {name} v{version} rejected at {violation}")]
    Validation {
        name: String,
        version: u32,
        violation: Violation,
    },
}

/// File-backed schema registry with an in-memory compiled-schema cache.
#[derive(Debug)]
pub struct SchemaRegistry {
    root: PathBuf,
    cache: RwLock<HashMap<(String, u32), Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `document` against the published schema for
    /// `(event_name, version)`.
    ///
    /// The document is the full envelope; published schemas constrain both
    /// the `meta` block and the event-specific `data` block. Validation is
    /// read-only and idempotent.
    pub async fn validate(
        &self,
        document: &Value,
        event_name: &str,
        version: u32,
    ) -> Result<(), SchemaError> {
        let schema = self.resolve(event_name, version).await?;
        schema
            .check(document)
            .map_err(|violation| SchemaError::Validation {
                name: event_name.to_string(),
                version,
                violation,
            })
    }

    /// Fetch the compiled schema for `(event_name, version)`, loading and
    /// caching it on first use.
    pub async fn resolve(
        &self,
        event_name: &str,
        version: u32,
    ) -> Result<Arc<Schema>, SchemaError> {
        let key = (event_name.to_string(), version);
        {
            let cache = self.cache.read().await;
            if let Some(schema) = cache.get(&key) {
                return Ok(Arc::clone(schema));
            }
        }

        let path = self.schema_path(event_name, version)?;
        let schema = Arc::new(load_schema(&path, event_name, version).await?);

        let mut cache = self.cache.write().await;
        let entry = cache.entry(key).or_insert_with(|| Arc::clone(&schema));
        Ok(Arc::clone(entry))
    }

    /// `{root}/{domain}/{subject}/{version}.json` from the first two
    /// dot-separated segments of the event name, lowercased.
    fn schema_path(&self, event_name: &str, version: u32) -> Result<PathBuf, SchemaError> {
        let mut segments = event_name.split('.');
        let (domain, subject) = match (segments.next(), segments.next()) {
            (Some(domain), Some(subject)) if !domain.is_empty() && !subject.is_empty() => {
                (domain.to_lowercase(), subject.to_lowercase())
            }
            _ => return Err(SchemaError::UnresolvableName(event_name.to_string())),
        };
        Ok(self
            .root
            .join(domain)
            .join(subject)
            .join(format!("{version}.json")))
    }
}

async fn load_schema(path: &Path, event_name: &str, version: u32) -> Result<Schema, SchemaError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(SchemaError::NotFound {
                name: event_name.to_string(),
                version,
            })
        }
        Err(source) => {
            return Err(SchemaError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| SchemaError::Parse {
        path: path.display().to_string(),
        source,
    })
}
