//! Instrumented mock browser capability
//!
//! Scriptable stand-in for the external engine: failures can be injected at
//! every step of a task, and the mock keeps the accounting needed to verify
//! mutual-exclusion and no-leak properties (live sessions, per-profile
//! concurrency, ordered event log).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{BrowserAutomation, BrowserError, SessionHandle};
use crate::proxy::ProxyBinding;

/// Where a scripted failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Open,
    Navigate,
    Scroll,
    Click,
    /// Panic instead of returning an error (exercises task panic isolation)
    PanicOnClick,
}

pub struct MockBrowser {
    /// session id -> profile name
    sessions: DashMap<String, String>,
    /// profile name -> scripted failure
    fail: DashMap<String, FailPoint>,
    /// Ordered log of every operation, shareable with a recording rotator
    log: Arc<Mutex<Vec<String>>>,
    opened_total: AtomicUsize,
    /// profile name -> live session count
    active_per_profile: DashMap<String, usize>,
    max_profile_concurrency: AtomicUsize,
    max_live_sessions: AtomicUsize,
    navigate_delay: Mutex<Option<Duration>>,
}

impl MockBrowser {
    pub fn new() -> Arc<Self> {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_log(log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            fail: DashMap::new(),
            log,
            opened_total: AtomicUsize::new(0),
            active_per_profile: DashMap::new(),
            max_profile_concurrency: AtomicUsize::new(0),
            max_live_sessions: AtomicUsize::new(0),
            navigate_delay: Mutex::new(None),
        })
    }

    /// Script a failure for the given profile name
    pub fn fail_at(&self, profile: &str, point: FailPoint) {
        self.fail.insert(profile.to_string(), point);
    }

    /// Make every navigate stall for `delay` (for cancellation tests)
    pub fn set_navigate_delay(&self, delay: Duration) {
        *self.navigate_delay.lock() = Some(delay);
    }

    /// Currently live sessions (a leak check after a run expects zero)
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions opened over the mock's lifetime
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live sessions on one profile
    pub fn max_profile_concurrency(&self) -> usize {
        self.max_profile_concurrency.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live sessions overall
    pub fn max_live_sessions(&self) -> usize {
        self.max_live_sessions.load(Ordering::SeqCst)
    }

    /// Snapshot of the ordered event log
    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, event: String) {
        self.log.lock().push(event);
    }

    fn profile_of(&self, session: &SessionHandle) -> Result<String, BrowserError> {
        self.sessions
            .get(&session.id)
            .map(|entry| entry.clone())
            .ok_or_else(|| BrowserError::SessionNotFound(session.id.clone()))
    }

    fn should_fail(&self, profile: &str, point: FailPoint) -> bool {
        self.fail.get(profile).map(|p| *p == point).unwrap_or(false)
    }
}

#[async_trait]
impl BrowserAutomation for MockBrowser {
    async fn open_session(
        &self,
        profile_dir: &Path,
        _proxy: Option<&ProxyBinding>,
    ) -> Result<SessionHandle, BrowserError> {
        let profile = profile_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("open:{}", profile));

        if self.should_fail(&profile, FailPoint::Open) {
            return Err(BrowserError::LaunchFailed(format!(
                "scripted launch failure for {}",
                profile
            )));
        }

        let handle = SessionHandle::new();
        self.sessions.insert(handle.id.clone(), profile.clone());
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        self.max_live_sessions
            .fetch_max(self.sessions.len(), Ordering::SeqCst);

        let live = {
            let mut entry = self.active_per_profile.entry(profile).or_insert(0);
            *entry += 1;
            *entry
        };
        self.max_profile_concurrency.fetch_max(live, Ordering::SeqCst);

        Ok(handle)
    }

    async fn navigate(&self, session: &SessionHandle, url: &str) -> Result<(), BrowserError> {
        let profile = self.profile_of(session)?;
        self.record(format!("navigate:{}:{}", profile, url));

        if self.should_fail(&profile, FailPoint::Navigate) {
            return Err(BrowserError::NavigationFailed(format!(
                "scripted navigation failure for {}",
                profile
            )));
        }

        let delay = *self.navigate_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn scroll(&self, session: &SessionHandle) -> Result<(), BrowserError> {
        let profile = self.profile_of(session)?;
        self.record(format!("scroll:{}", profile));

        if self.should_fail(&profile, FailPoint::Scroll) {
            return Err(BrowserError::Timeout(format!(
                "scripted scroll timeout for {}",
                profile
            )));
        }
        Ok(())
    }

    async fn click(&self, session: &SessionHandle, target: &str) -> Result<(), BrowserError> {
        let profile = self.profile_of(session)?;
        self.record(format!("click:{}:{}", profile, target));

        if self.should_fail(&profile, FailPoint::PanicOnClick) {
            panic!("scripted panic for {}", profile);
        }
        if self.should_fail(&profile, FailPoint::Click) {
            return Err(BrowserError::ElementNotFound(target.to_string()));
        }
        Ok(())
    }

    async fn close(&self, session: &SessionHandle) -> Result<(), BrowserError> {
        if let Some((_, profile)) = self.sessions.remove(&session.id) {
            self.record(format!("close:{}", profile));
            if let Some(mut entry) = self.active_per_profile.get_mut(&profile) {
                *entry = entry.saturating_sub(1);
            }
        }
        Ok(())
    }
}
