//! Knowledge store configuration, persisted as TOML.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::RelationKind;
use crate::property::{KeepExisting, MergePolicy, OccurrenceCounting, Overwrite};

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// How repeated assertions of the same concept or relation merge properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Sum numeric values (occurrence counting), newest wins otherwise.
    #[default]
    Sum,
    Overwrite,
    KeepExisting,
}

impl MergeStrategy {
    pub fn policy(self) -> Arc<dyn MergePolicy> {
        match self {
            MergeStrategy::Sum => Arc::new(OccurrenceCounting),
            MergeStrategy::Overwrite => Arc::new(Overwrite),
            MergeStrategy::KeepExisting => Arc::new(KeepExisting),
        }
    }
}

/// When in-memory changes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Flush after every mutating call.
    #[default]
    Immediate,
    /// Flush once `batch_size` entities are dirty, and on close.
    Batched,
}

/// Bounded retry for storage I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    50
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Run `op`, retrying the errors `is_transient` accepts.
    pub fn run<T, E: std::fmt::Display>(
        &self,
        what: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < attempts => {
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "storage operation failed, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(self.backoff_ms));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Knowledge store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Relation kind the hierarchy view projects.
    #[serde(default = "default_hierarchy_relation")]
    pub hierarchy_relation: RelationKind,
    #[serde(default)]
    pub merge: MergeStrategy,
    /// Property counting how often a concept or relation was asserted.
    #[serde(default = "default_occurrence_key")]
    pub occurrence_key: String,
    #[serde(default)]
    pub sync: SyncMode,
    /// Dirty-entity threshold for [`SyncMode::Batched`].
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Reduce plural tokens to their singular form before lookup.
    #[serde(default = "default_lemmatize")]
    pub lemmatize: bool,
    /// Token → canonical form, applied after lemmatization.
    #[serde(default)]
    pub synonyms: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_hierarchy_relation() -> RelationKind {
    RelationKind::IsA
}
fn default_occurrence_key() -> String {
    "occurrences".into()
}
fn default_batch_size() -> usize {
    256
}
fn default_lemmatize() -> bool {
    true
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            hierarchy_relation: default_hierarchy_relation(),
            merge: MergeStrategy::default(),
            occurrence_key: default_occurrence_key(),
            sync: SyncMode::default(),
            batch_size: default_batch_size(),
            lemmatize: default_lemmatize(),
            synonyms: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Reject values the store cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_owned(),
            })
        };
        if self.occurrence_key.trim().is_empty() {
            return invalid("occurrence_key must not be empty");
        }
        if self.hierarchy_relation.as_str().is_empty() {
            return invalid("hierarchy_relation must not be empty");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if let Some((from, to)) = self
            .synonyms
            .iter()
            .find(|(from, to)| from.trim().is_empty() || to.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                message: format!("synonym {from:?} -> {to:?} has an empty side"),
            });
        }
        Ok(())
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::cell::Cell;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: KnowledgeConfig = toml::from_str("").unwrap();
        assert_eq!(config, KnowledgeConfig::default());
        assert_eq!(config.hierarchy_relation, RelationKind::IsA);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn partial_toml_overrides() {
        let config: KnowledgeConfig = toml::from_str(
            r#"
            hierarchy_relation = "contains"
            merge = "keep_existing"
            sync = "batched"
            batch_size = 8

            [synonyms]
            kitty = "cat"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.hierarchy_relation, RelationKind::Contains);
        assert_eq!(config.merge, MergeStrategy::KeepExisting);
        assert_eq!(config.sync, SyncMode::Batched);
        assert_eq!(config.synonyms["kitty"], "cat");
        assert_eq!(config.retry.backoff_ms, 50);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_zero_batch() {
        let config = KnowledgeConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid { .. }
        ));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("kb.toml");
        let mut config = KnowledgeConfig::default();
        config.synonyms.insert("puss".into(), "cat".into());
        config.save(&path).unwrap();
        assert_eq!(KnowledgeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "batch_size = \"many\"").unwrap();
        assert!(matches!(
            KnowledgeConfig::load(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn retry_recovers_from_transient_errors() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        };
        let calls = Cell::new(0);
        let value = policy
            .run("test", StoreError::is_transient, || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(StoreError::Persistence {
                        context: "test".into(),
                        message: "busy".into(),
                    })
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_does_not_repeat_permanent_errors() {
        let calls = Cell::new(0);
        let err = RetryPolicy::default()
            .run("test", StoreError::is_transient, || -> Result<(), _> {
                calls.set(calls.get() + 1);
                Err(StoreError::NotFound {
                    entity: "node",
                    id: 1,
                })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(calls.get(), 1);
    }
}
