//! The consumed browser-automation interface

use std::path::Path;
use async_trait::async_trait;

use super::BrowserError;
use crate::proxy::ProxyBinding;

/// Click target for the vote control on a loaded post page. Engines map
/// this to whatever selector the site currently uses.
pub const UPVOTE_TARGET: &str = "upvote";

/// Opaque handle to one live browser session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
}

impl SessionHandle {
    /// Allocate a fresh handle id
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The five operations the orchestrator needs from a browser engine.
///
/// All operations may suspend; failures surface as `BrowserError` and are
/// isolated to the calling account's outcome.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Launch a session bound to the given profile directory and proxy
    async fn open_session(
        &self,
        profile_dir: &Path,
        proxy: Option<&ProxyBinding>,
    ) -> Result<SessionHandle, BrowserError>;

    /// Navigate the session to a URL
    async fn navigate(&self, session: &SessionHandle, url: &str) -> Result<(), BrowserError>;

    /// Perform one human-like scroll pass
    async fn scroll(&self, session: &SessionHandle) -> Result<(), BrowserError>;

    /// Click the named target on the current page
    async fn click(&self, session: &SessionHandle, target: &str) -> Result<(), BrowserError>;

    /// Tear the session down; must release the underlying browser process
    async fn close(&self, session: &SessionHandle) -> Result<(), BrowserError>;
}
