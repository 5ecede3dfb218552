//! Durable mapping from [`Scope`] to [`Rule`].
//!
//! The whole map sits behind one reader/writer lock owned by the store.
//! Mutations rewrite the backing file while still holding the write lock, so
//! readers never observe an approval that has not been written out (or failed
//! to be).

use crate::scope::{Rule, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read policy store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("policy store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write policy store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode policy store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One persisted `(scope, rule)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    #[serde(rename = "Scope")]
    pub scope: Scope,
    #[serde(rename = "Rule")]
    pub rule: Rule,
}

/// On-disk form of the store: a flat list, since a composite [`Scope`] cannot
/// be a JSON object key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreSnapshot {
    pub entries: Vec<StoreEntry>,
}

impl StoreSnapshot {
    /// Flatten a rule map. Entries are sorted by scope so saves are stable.
    pub fn flatten(rules: &HashMap<Scope, Rule>) -> Self {
        let mut entries: Vec<StoreEntry> = rules
            .iter()
            .map(|(scope, rule)| StoreEntry {
                scope: scope.clone(),
                rule: rule.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.scope.cmp(&b.scope));
        Self { entries }
    }

    /// Rebuild the rule map. A scope listed twice keeps its last rule.
    pub fn rebuild(self) -> HashMap<Scope, Rule> {
        self.entries
            .into_iter()
            .map(|entry| (entry.scope, entry.rule))
            .collect()
    }
}

pub struct PolicyStore {
    path: PathBuf,
    rules: RwLock<HashMap<Scope, Rule>>,
}

impl PolicyStore {
    /// Load from `path`, creating an empty file if there is none.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let rules = match tokio::fs::read_to_string(&path).await {
            Ok(data) if data.trim().is_empty() => HashMap::new(),
            Ok(data) => {
                let snapshot: StoreSnapshot =
                    serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                snapshot.rebuild()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                create_empty(&path).await?;
                tracing::info!(path = %path.display(), "created empty policy store");
                HashMap::new()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        tracing::debug!(path = %path.display(), scopes = rules.len(), "policy store loaded");
        Ok(Self {
            path,
            rules: RwLock::new(rules),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rule for `scope`, or the empty rule if the scope was never approved.
    pub async fn get_rule(&self, scope: &Scope) -> Rule {
        self.rules
            .read()
            .await
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Approve every command for `scope`.
    pub async fn set_all_allowed(&self, scope: Scope) -> Result<(), StoreError> {
        let mut rules = self.rules.write().await;
        let rule = rules.entry(scope).or_default();
        if rule.all_commands {
            return Ok(());
        }
        rule.all_commands = true;
        self.save(&rules).await
    }

    /// Approve `command` for `scope`. Already-approved commands are not
    /// duplicated and do not trigger a rewrite.
    pub async fn set_command_allowed(&self, scope: Scope, command: &str) -> Result<(), StoreError> {
        let mut rules = self.rules.write().await;
        if !rules.entry(scope).or_default().allow_command(command) {
            return Ok(());
        }
        self.save(&rules).await
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::flatten(&*self.rules.read().await)
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Full rewrite of the backing file. Callers hold the write lock.
    ///
    /// The new document goes to a sibling file that replaces the store by
    /// rename, so a failed write leaves the previous file intact.
    async fn save(&self, rules: &HashMap<Scope, Rule>) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(&StoreSnapshot::flatten(rules))?;
        let tmp = temp_path(&self.path);
        let written = match write_private(&tmp, data.as_bytes()).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }
        tracing::debug!(path = %self.path.display(), scopes = rules.len(), "policy store saved");
        Ok(())
    }
}

async fn create_empty(path: &Path) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    write_private(path, b"").await.map_err(write_err)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `data` to `path` readable by the owner only, and sync it to disk.
async fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
