//! Repository configuration.
//!
//! [`RepositoryConfig`] deserializes from any serde source and can be
//! overlaid with environment variables:
//! - `FOLIO_DB_PATH`: SQLite database file path (switches to the SQLite backend)
//! - `FOLIO_HISTORY_VERSIONS`: versions kept per live content identity
//! - `FOLIO_HISTORY_DELETED_VERSIONS`: versions kept per deleted content identity
//! - `FOLIO_PUBLISH_HISTORY_SIZE`: finished publish jobs kept
//! - `FOLIO_PUBLISH_PAUSED`: start with the publish worker stopped

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub keep_versions: usize,
    pub keep_deleted_versions: usize,
    /// Prune the content identities a publish job touched after the job.
    pub prune_on_publish: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            keep_versions: 10,
            keep_deleted_versions: 3,
            prune_on_publish: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub start_paused: bool,
    /// Number of finished jobs kept for the publish history.
    pub history_size: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        PublishConfig {
            start_paused: false,
            history_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub storage: StorageBackend,
    pub history: HistoryConfig,
    pub publish: PublishConfig,
}

impl RepositoryConfig {
    /// Defaults overlaid with the `FOLIO_*` environment variables.
    pub fn from_env() -> Result<Self, RepositoryError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values produced by `lookup` (an environment-like source).
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, RepositoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FOLIO_DB_PATH") {
            self.storage = StorageBackend::Sqlite { path };
        }
        if let Some(value) = parse_var(&lookup, "FOLIO_HISTORY_VERSIONS")? {
            self.history.keep_versions = value;
        }
        if let Some(value) = parse_var(&lookup, "FOLIO_HISTORY_DELETED_VERSIONS")? {
            self.history.keep_deleted_versions = value;
        }
        if let Some(value) = parse_var(&lookup, "FOLIO_PUBLISH_HISTORY_SIZE")? {
            self.publish.history_size = value;
        }
        if let Some(value) = parse_var(&lookup, "FOLIO_PUBLISH_PAUSED")? {
            self.publish.start_paused = value;
        }
        Ok(self)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, RepositoryError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            RepositoryError::Internal(format!("invalid value for {}: '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::default();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.history.keep_versions, 10);
        assert_eq!(config.history.keep_deleted_versions, 3);
        assert!(config.history.prune_on_publish);
        assert_eq!(config.publish.history_size, 100);
    }

    #[test]
    fn test_overlay_from_environment() {
        let config = RepositoryConfig::default()
            .overlay(env(&[
                ("FOLIO_DB_PATH", "/tmp/folio.db"),
                ("FOLIO_HISTORY_VERSIONS", "4"),
                ("FOLIO_PUBLISH_PAUSED", "true"),
            ]))
            .unwrap();
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite {
                path: "/tmp/folio.db".into()
            }
        );
        assert_eq!(config.history.keep_versions, 4);
        assert!(config.publish.start_paused);
    }

    #[test]
    fn test_unparseable_value_names_the_variable() {
        let err = RepositoryConfig::default()
            .overlay(env(&[("FOLIO_PUBLISH_HISTORY_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("FOLIO_PUBLISH_HISTORY_SIZE"));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: RepositoryConfig = serde_json::from_str(
            r#"{"storage": {"kind": "sqlite", "path": "x.db"}, "history": {"keep_versions": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.history.keep_versions, 2);
        assert_eq!(config.history.keep_deleted_versions, 3);
        assert_eq!(config.publish, PublishConfig::default());
    }
}
