//! Exclusive profile check-out
//!
//! Browser profile directories cannot be shared between live sessions: two
//! processes writing the same profile corrupt its cookies. The manager hands
//! out RAII guards keyed by the resolved profile directory name and refuses
//! a second check-out while one is live; it never force-unlocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{warn, debug};

use crate::store::Account;

/// Profile check-out errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile '{0}' is already checked out by another task")]
    Locked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hands out exclusive, scoped access to per-account profile directories
pub struct ProfileManager {
    root: PathBuf,
    checked_out: Arc<DashMap<String, Instant>>,
}

impl ProfileManager {
    /// Create a manager rooted at the given profiles directory
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            checked_out: Arc::new(DashMap::new()),
        }
    }

    /// Check out the account's profile.
    ///
    /// Creates the directory on first use. Fails with `ProfileError::Locked`
    /// if another in-flight task holds it; the caller skips the account.
    pub fn acquire(&self, account: &Account) -> Result<ProfileGuard, ProfileError> {
        let name = account.profile_name().to_string();

        match self.checked_out.entry(name.clone()) {
            Entry::Occupied(held) => {
                warn!(
                    "Profile '{}' contended: held for {:.1}s by another task",
                    name,
                    held.get().elapsed().as_secs_f64()
                );
                Err(ProfileError::Locked(name))
            }
            Entry::Vacant(slot) => {
                let path = self.root.join(&name);
                std::fs::create_dir_all(&path)?;
                slot.insert(Instant::now());
                debug!("Profile '{}' checked out ({})", name, path.display());
                Ok(ProfileGuard {
                    name,
                    path,
                    registry: self.checked_out.clone(),
                })
            }
        }
    }

    /// Number of profiles currently checked out
    pub fn in_flight(&self) -> usize {
        self.checked_out.len()
    }
}

/// Scoped handle to one profile directory.
///
/// Dropping the guard releases the check-out: on success, failure, panic
/// (caught at the task boundary) and cancellation alike.
#[derive(Debug)]
pub struct ProfileGuard {
    name: String,
    path: PathBuf,
    registry: Arc<DashMap<String, Instant>>,
}

impl ProfileGuard {
    /// Resolved profile directory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk profile directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.name);
        debug!("Profile '{}' released", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("reddit-campaigner-tests")
            .join(format!("{}_{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_acquire_creates_directory() {
        let root = temp_root("create");
        let manager = ProfileManager::new(&root);

        let guard = manager.acquire(&Account::new("a1", "user1")).unwrap();
        assert!(guard.path().is_dir());
        assert_eq!(guard.name(), "a1");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_second_acquire_is_refused_while_held() {
        let root = temp_root("exclusive");
        let manager = ProfileManager::new(&root);
        let account = Account::new("a1", "user1");

        let _guard = manager.acquire(&account).unwrap();
        let err = manager.acquire(&account).unwrap_err();
        assert!(matches!(err, ProfileError::Locked(name) if name == "a1"));
        assert_eq!(manager.in_flight(), 1);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_drop_releases_checkout() {
        let root = temp_root("release");
        let manager = ProfileManager::new(&root);
        let account = Account::new("a1", "user1");

        {
            let _guard = manager.acquire(&account).unwrap();
            assert_eq!(manager.in_flight(), 1);
        }
        assert_eq!(manager.in_flight(), 0);
        assert!(manager.acquire(&account).is_ok());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_shared_profile_reference_also_excludes() {
        let root = temp_root("shared");
        let manager = ProfileManager::new(&root);

        let mut first = Account::new("a1", "user1");
        first.profile = Some("common".to_string());
        let mut second = Account::new("a2", "user2");
        second.profile = Some("common".to_string());

        let _guard = manager.acquire(&first).unwrap();
        // Different account, same resolved directory: still refused
        let err = manager.acquire(&second).unwrap_err();
        assert!(matches!(err, ProfileError::Locked(name) if name == "common"));

        std::fs::remove_dir_all(&root).ok();
    }
}
