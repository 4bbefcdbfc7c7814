//! Account store backed by a single JSON file
//!
//! Corruption policy: an unparseable store refuses to load rather than
//! silently resetting; losing account identities is worse than a blocked run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, debug};

/// Account store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("account store at {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize account store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Lifecycle status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl Default for AccountStatus {
    fn default() -> Self {
        AccountStatus::Idle
    }
}

/// One persisted account identity
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique account identifier (store key)
    pub id: String,
    /// Site username associated with this identity
    pub username: String,
    /// Profile directory name override; defaults to the account id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Free-form tags for campaign filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: AccountStatus,
    /// Last proxy server this account was bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_proxy: Option<String>,
    /// When the last campaign touched this account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new idle account
    pub fn new(id: &str, username: &str) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            profile: None,
            tags: Vec::new(),
            status: AccountStatus::Idle,
            last_proxy: None,
            last_run_at: None,
        }
    }

    /// Resolved profile directory name for this account
    pub fn profile_name(&self) -> &str {
        self.profile.as_deref().unwrap_or(&self.id)
    }
}

/// Account store: id -> account mapping persisted as one JSON object
#[derive(Debug)]
pub struct AccountStore {
    path: PathBuf,
    accounts: BTreeMap<String, Account>,
}

impl AccountStore {
    /// Load the store from disk.
    ///
    /// A missing file yields an empty store (accounts are added through the
    /// external add-account flow); an unparseable file is fatal.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!("Account store {} does not exist yet, starting empty", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                accounts: BTreeMap::new(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let accounts: BTreeMap<String, Account> =
            serde_json::from_str(&content).map_err(|e| StoreError::CorruptState {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Loaded {} accounts from {}", accounts.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            accounts,
        })
    }

    /// All accounts, ordered by id
    pub fn accounts(&self) -> &BTreeMap<String, Account> {
        &self.accounts
    }

    /// Look up one account
    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// Insert or replace an account
    pub fn upsert(&mut self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the store holds no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Persist the whole mapping as one aggregate write.
    ///
    /// Serializes to a sibling temp file and renames it over the store, so a
    /// crash mid-write never leaves a torn file behind.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&self.accounts)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        info!("Saved {} accounts to {}", self.accounts.len(), self.path.display());
        Ok(())
    }
}
