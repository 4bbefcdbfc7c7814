//! Campaign controller
//!
//! Owns all shared mutable state of a run: the account store and the proxy
//! pool are read before dispatch and written once after every task reached a
//! terminal state. Workers only ever report through the outcome channel, so
//! partially-updated state is never visible mid-run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::OrchestratorConfig;
use crate::browser::BrowserAutomation;
use crate::profile::ProfileManager;
use crate::proxy::{HttpRotator, ProxyError, ProxyMode, ProxyPool, ProxyRotator};
use crate::store::{Account, AccountStore, AccountStatus, StoreError};
use crate::worker::{AccountJob, AccountOutcome, Dispatcher};

/// Campaign-level errors: all of these abort the run before any browser
/// session opens.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("invalid target url: {0}")]
    InvalidTarget(#[from] url::ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Which accounts a campaign touches
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountFilter {
    All,
    Ids(Vec<String>),
    Tag(String),
}

impl Default for AccountFilter {
    fn default() -> Self {
        AccountFilter::All
    }
}

/// One campaign invocation
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRequest {
    /// Post URL every selected account will load and upvote
    pub target_url: String,
    #[serde(default)]
    pub filter: AccountFilter,
    /// Delay between consecutive account starts, to spread the load
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Overrides the configured assignment policy for this run
    #[serde(default)]
    pub proxy_mode: Option<ProxyMode>,
}

impl CampaignRequest {
    pub fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            filter: AccountFilter::All,
            delay_ms: None,
            proxy_mode: None,
        }
    }
}

/// Aggregate result of one run; enumerates every selected account.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResult {
    pub run_id: String,
    pub target_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub outcomes: Vec<AccountOutcome>,
}

/// Drives campaigns end to end. The unit a CLI/GUI caller integrates
/// against.
pub struct CampaignController {
    config: OrchestratorConfig,
    pool: Arc<ProxyPool>,
    profiles: Arc<ProfileManager>,
    dispatcher: Dispatcher,
    cancel: Arc<AtomicBool>,
}

impl CampaignController {
    /// Create a controller with the real HTTP rotation client
    pub fn new(
        config: OrchestratorConfig,
        browser: Arc<dyn BrowserAutomation>,
    ) -> Result<Self, CampaignError> {
        let rotator = Arc::new(
            HttpRotator::new()?.with_max_attempts(config.rotation_max_attempts),
        );
        Ok(Self::with_rotator(config, browser, rotator))
    }

    /// Create a controller with a custom rotation implementation
    pub fn with_rotator(
        config: OrchestratorConfig,
        browser: Arc<dyn BrowserAutomation>,
        rotator: Arc<dyn ProxyRotator>,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let profiles = Arc::new(ProfileManager::new(&config.profiles_dir));
        let dispatcher = Dispatcher::new(
            browser,
            profiles.clone(),
            rotator,
            config.pacing.clone(),
            config.concurrent_sessions,
            cancel.clone(),
        );

        Self {
            config,
            pool: Arc::new(ProxyPool::new()),
            profiles,
            dispatcher,
            cancel,
        }
    }

    /// Abort the current run. In-flight tasks fall through to their closing
    /// phase and release profiles and sessions; queued tasks fail fast.
    pub fn cancel(&self) {
        info!("Campaign cancel requested");
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Profile manager, exposed so embedders can observe contention
    pub fn profile_manager(&self) -> Arc<ProfileManager> {
        self.profiles.clone()
    }

    /// Run one campaign to completion and persist its effects.
    pub async fn run(&self, request: CampaignRequest) -> Result<CampaignResult, CampaignError> {
        let run_id = Uuid::new_v4().to_string()[..8].to_string();
        let started_at = Utc::now();

        url::Url::parse(&request.target_url)?;

        // Setup failures are fatal before any browser session opens.
        let mut store = AccountStore::load(&self.config.accounts_path)?;
        let proxy_count = self.pool.reload(&self.config.proxies_path)?;

        let selected = select_accounts(store.accounts(), &request.filter);
        let mode = request.proxy_mode.unwrap_or(self.config.proxy_mode);

        info!(
            "[Run {}] {} accounts -> {} ({} proxies, {:?} mode)",
            run_id,
            selected.len(),
            request.target_url,
            proxy_count,
            mode
        );
        if selected.is_empty() {
            warn!("[Run {}] no accounts matched the filter", run_id);
        }

        self.cancel.store(false, Ordering::Relaxed);

        let jobs: Vec<AccountJob> = selected
            .into_iter()
            .map(|account| {
                let binding = self.pool.acquire(&account, mode);
                if binding.is_none() && proxy_count > 0 {
                    warn!(
                        "[Run {}] no proxy left for account {}, using direct connection",
                        run_id, account.id
                    );
                }
                AccountJob { account, binding }
            })
            .collect();

        let stagger = request.delay_ms.map(Duration::from_millis);
        let outcomes = self
            .dispatcher
            .dispatch(jobs, &request.target_url, stagger)
            .await;

        // Parallel phase over: fold worker reports into shared state and
        // persist everything as one aggregate write.
        let mut succeeded_count = 0usize;
        let mut failed_count = 0usize;
        for outcome in &outcomes {
            if outcome.rotated {
                if let Some(server) = &outcome.proxy {
                    self.pool.mark_rotated(server);
                }
            }

            match outcome.status {
                AccountStatus::Succeeded => succeeded_count += 1,
                _ => failed_count += 1,
            }

            if let Some(account) = store.get(&outcome.account_id) {
                let mut updated = account.clone();
                updated.status = outcome.status;
                updated.last_proxy = outcome.proxy.clone();
                updated.last_run_at = Some(outcome.finished_at);
                store.upsert(updated);
            }
        }
        store.save()?;

        let finished_at = Utc::now();
        info!(
            "[Run {}] finished: {} succeeded, {} failed of {}",
            run_id,
            succeeded_count,
            failed_count,
            outcomes.len()
        );

        Ok(CampaignResult {
            run_id,
            target_url: request.target_url,
            started_at,
            finished_at,
            succeeded_count,
            failed_count,
            outcomes,
        })
    }
}

fn select_accounts(
    accounts: &BTreeMap<String, Account>,
    filter: &AccountFilter,
) -> Vec<Account> {
    match filter {
        AccountFilter::All => accounts.values().cloned().collect(),
        AccountFilter::Ids(ids) => accounts
            .values()
            .filter(|a| ids.contains(&a.id))
            .cloned()
            .collect(),
        AccountFilter::Tag(tag) => accounts
            .values()
            .filter(|a| a.tags.iter().any(|t| t == tag))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::browser::mock::{FailPoint, MockBrowser};
    use crate::pacing::PacingConfig;
    use crate::proxy::testing::RecordingRotator;

    fn fast_pacing() -> PacingConfig {
        PacingConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter_percent: 0,
            min_scroll_passes: 1,
            max_scroll_passes: 1,
        }
    }

    /// Build an isolated on-disk environment with the given accounts and
    /// raw proxy file content (empty string = no file written).
    fn test_config(name: &str, accounts: &[Account], proxies_json: &str) -> OrchestratorConfig {
        let base = std::env::temp_dir()
            .join("reddit-campaigner-tests")
            .join(format!("{}_{}", name, Uuid::new_v4()));
        std::fs::create_dir_all(&base).unwrap();

        let accounts_path = base.join("accounts.json");
        let mut store = AccountStore::load(&accounts_path).unwrap();
        for account in accounts {
            store.upsert(account.clone());
        }
        store.save().unwrap();

        let proxies_path = base.join("proxies.json");
        if !proxies_json.is_empty() {
            std::fs::write(&proxies_path, proxies_json).unwrap();
        }

        OrchestratorConfig {
            accounts_path,
            proxies_path,
            profiles_dir: base.join("profiles"),
            concurrent_sessions: 4,
            pacing: fast_pacing(),
            proxy_mode: ProxyMode::Sticky,
            rotation_max_attempts: 2,
        }
    }

    fn accounts(ids: &[&str]) -> Vec<Account> {
        ids.iter()
            .map(|id| Account::new(id, &format!("user_{}", id)))
            .collect()
    }

    fn proxy_json(servers: &[&str]) -> String {
        let entries: Vec<String> = servers
            .iter()
            .map(|s| {
                format!(
                    r#"{{"server": "{s}", "username": "u", "password": "p", "rotation_url": "{s}/rotate"}}"#
                )
            })
            .collect();
        format!("[{}]", entries.join(","))
    }

    fn outcome_of<'a>(result: &'a CampaignResult, id: &str) -> &'a AccountOutcome {
        result
            .outcomes
            .iter()
            .find(|o| o.account_id == id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_selected_account_gets_an_outcome() {
        let config = test_config("enumerate", &accounts(&["a1", "a2", "a3", "a4"]), "");
        let browser = MockBrowser::new();
        let controller =
            CampaignController::with_rotator(config, browser, RecordingRotator::new());

        let result = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.succeeded_count, 4);
        assert_eq!(result.failed_count, 0);
        let mut ids: Vec<&str> = result.outcomes.iter().map(|o| o.account_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2", "a3", "a4"]);
    }

    #[tokio::test]
    async fn test_interaction_failure_is_isolated_and_store_updated() {
        let config = test_config("isolated", &accounts(&["a1", "a2", "a3"]), "");
        let accounts_path = config.accounts_path.clone();
        let browser = MockBrowser::new();
        browser.fail_at("a2", FailPoint::Click);
        let controller =
            CampaignController::with_rotator(config, browser, RecordingRotator::new());

        let result = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        assert_eq!(result.succeeded_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(outcome_of(&result, "a1").status, AccountStatus::Succeeded);
        assert_eq!(outcome_of(&result, "a3").status, AccountStatus::Succeeded);
        let failed = outcome_of(&result, "a2");
        assert_eq!(failed.status, AccountStatus::Failed);
        assert!(failed.reason.as_deref().unwrap().contains("upvote"));

        // All three accounts were persisted with their new status
        let store = AccountStore::load(&accounts_path).unwrap();
        assert_eq!(store.get("a1").unwrap().status, AccountStatus::Succeeded);
        assert_eq!(store.get("a2").unwrap().status, AccountStatus::Failed);
        assert_eq!(store.get("a3").unwrap().status, AccountStatus::Succeeded);
        assert!(store.get("a2").unwrap().last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_store_aborts_before_any_session() {
        let config = test_config("corrupt", &[], "");
        std::fs::write(&config.accounts_path, "{broken").unwrap();
        let browser = MockBrowser::new();
        let controller =
            CampaignController::with_rotator(config, browser.clone(), RecordingRotator::new());

        let err = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CampaignError::Store(StoreError::CorruptState { .. })
        ));
        assert_eq!(browser.opened_total(), 0);
    }

    #[tokio::test]
    async fn test_invalid_target_url_rejected() {
        let config = test_config("badurl", &accounts(&["a1"]), "");
        let controller = CampaignController::with_rotator(
            config,
            MockBrowser::new(),
            RecordingRotator::new(),
        );

        let err = controller
            .run(CampaignRequest::new("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn test_empty_proxy_file_runs_direct() {
        let config = test_config("noproxy", &accounts(&["a1", "a2"]), "[]");
        let controller = CampaignController::with_rotator(
            config,
            MockBrowser::new(),
            RecordingRotator::new(),
        );

        let result = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        assert_eq!(result.succeeded_count, 2);
        assert!(result.outcomes.iter().all(|o| o.proxy.is_none()));
        assert!(result.outcomes.iter().all(|o| !o.rotated));
    }

    #[tokio::test]
    async fn test_sticky_mode_reassigns_same_proxy_across_runs() {
        let config = test_config(
            "sticky",
            &accounts(&["a1"]),
            &proxy_json(&["http://p1", "http://p2"]),
        );
        let rotator = RecordingRotator::new();
        let controller =
            CampaignController::with_rotator(config, MockBrowser::new(), rotator.clone());

        let first = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();
        let first_proxy = outcome_of(&first, "a1").proxy.clone().unwrap();
        assert!(outcome_of(&first, "a1").rotated);

        let second = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();
        let second_proxy = outcome_of(&second, "a1").proxy.clone().unwrap();

        assert_eq!(first_proxy, second_proxy);
        // Second run fell inside the rotation cooldown, so the endpoint was
        // only ever hit once.
        assert!(!outcome_of(&second, "a1").rotated);
        assert_eq!(rotator.calls_for(&first_proxy), 1);
    }

    #[tokio::test]
    async fn test_rotation_happens_once_and_before_open() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = test_config("ordering", &accounts(&["a1"]), &proxy_json(&["http://p1"]));
        let browser = MockBrowser::with_log(log.clone());
        let rotator = RecordingRotator::with_log(log.clone());
        let controller = CampaignController::with_rotator(config, browser, rotator.clone());

        controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        let events = log.lock().clone();
        let rotate_idx = events.iter().position(|e| e == "rotate:http://p1").unwrap();
        let open_idx = events.iter().position(|e| e == "open:a1").unwrap();
        assert!(rotate_idx < open_idx);
        assert_eq!(rotator.calls_for("http://p1"), 1);
    }

    #[tokio::test]
    async fn test_rotation_failure_marks_account_failed_without_session() {
        let config = test_config("rotfail", &accounts(&["a1"]), &proxy_json(&["http://p1"]));
        let browser = MockBrowser::new();
        let rotator = RecordingRotator::new();
        rotator.fail_server("http://p1", "endpoint unreachable");
        let controller =
            CampaignController::with_rotator(config, browser.clone(), rotator);

        let result = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        assert_eq!(result.failed_count, 1);
        assert!(outcome_of(&result, "a1")
            .reason
            .as_deref()
            .unwrap()
            .contains("rotate"));
        assert_eq!(browser.opened_total(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_sessions_and_profiles() {
        let config = test_config("cancel", &accounts(&["a1", "a2", "a3"]), "");
        let browser = MockBrowser::new();
        browser.set_navigate_delay(Duration::from_millis(200));
        let controller = Arc::new(CampaignController::with_rotator(
            config,
            browser.clone(),
            RecordingRotator::new(),
        ));

        let handle = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .run(CampaignRequest::new("https://example.com/r/test/post/1"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.cancel();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.failed_count, 3);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.reason.as_deref().unwrap().contains("cancelled")));

        // No leaked sessions, no held profile locks
        assert_eq!(browser.open_sessions(), 0);
        assert_eq!(controller.profile_manager().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_filters_select_by_id_and_tag() {
        let mut all = accounts(&["a1", "a2", "a3"]);
        all[1].tags = vec!["warmup".to_string()];
        let config = test_config("filters", &all, "");
        let controller = CampaignController::with_rotator(
            config,
            MockBrowser::new(),
            RecordingRotator::new(),
        );

        let mut request = CampaignRequest::new("https://example.com/r/test/post/1");
        request.filter = AccountFilter::Ids(vec!["a1".to_string(), "a3".to_string()]);
        let by_ids = controller.run(request).await.unwrap();
        assert_eq!(by_ids.outcomes.len(), 2);
        assert!(by_ids.outcomes.iter().all(|o| o.account_id != "a2"));

        let mut request = CampaignRequest::new("https://example.com/r/test/post/1");
        request.filter = AccountFilter::Tag("warmup".to_string());
        let by_tag = controller.run(request).await.unwrap();
        assert_eq!(by_tag.outcomes.len(), 1);
        assert_eq!(by_tag.outcomes[0].account_id, "a2");
    }

    #[tokio::test]
    async fn test_more_accounts_than_proxies_spills_to_direct() {
        let config = test_config(
            "spill",
            &accounts(&["a1", "a2", "a3"]),
            &proxy_json(&["http://p1", "http://p2"]),
        );
        let controller = CampaignController::with_rotator(
            config,
            MockBrowser::new(),
            RecordingRotator::new(),
        );

        let result = controller
            .run(CampaignRequest::new("https://example.com/r/test/post/1"))
            .await
            .unwrap();

        assert_eq!(result.succeeded_count, 3);
        let bound = result.outcomes.iter().filter(|o| o.proxy.is_some()).count();
        assert_eq!(bound, 2);

        // No two accounts shared a server: bindings are exclusive per run
        let mut servers: Vec<&str> = result
            .outcomes
            .iter()
            .filter_map(|o| o.proxy.as_deref())
            .collect();
        servers.sort();
        servers.dedup();
        assert_eq!(servers.len(), 2);
    }
}
