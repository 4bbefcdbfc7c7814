//! Parallel task dispatch
//!
//! Spawns one panic-isolated tokio task per account job, bounded by a
//! semaphore, with optional staggered starts. Outcomes flow back through an
//! mpsc channel; the dispatcher only returns once every task reached a
//! terminal state (join-all, never partial).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tracing::{info, error};

use super::task::{AccountOutcome, TaskContext, run_account_task};
use crate::browser::BrowserAutomation;
use crate::pacing::{PacingConfig, stagger_delay};
use crate::profile::ProfileManager;
use crate::proxy::{ProxyBinding, ProxyRotator};
use crate::store::Account;

/// One unit of dispatch: an account with its (optional) proxy binding
pub struct AccountJob {
    pub account: Account,
    pub binding: Option<ProxyBinding>,
}

/// Launches and joins the per-account worker tasks of a campaign run
pub struct Dispatcher {
    browser: Arc<dyn BrowserAutomation>,
    profiles: Arc<ProfileManager>,
    rotator: Arc<dyn ProxyRotator>,
    pacing: PacingConfig,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        browser: Arc<dyn BrowserAutomation>,
        profiles: Arc<ProfileManager>,
        rotator: Arc<dyn ProxyRotator>,
        pacing: PacingConfig,
        concurrency: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            browser,
            profiles,
            rotator,
            pacing,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Run every job to a terminal state and collect all outcomes.
    ///
    /// Exactly one outcome per job comes back, panics included; a lost or
    /// duplicated account in the aggregate would be a silent omission.
    pub async fn dispatch(
        &self,
        jobs: Vec<AccountJob>,
        target_url: &str,
        stagger: Option<Duration>,
    ) -> Vec<AccountOutcome> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }

        info!(
            "Dispatching {} account tasks (concurrency: {}, stagger: {:?})",
            total, self.concurrency, stagger
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (index, job) in jobs.into_iter().enumerate() {
            let account_id = job.account.id.clone();
            let username = job.account.username.clone();
            let proxy = job.binding.as_ref().map(|b| b.descriptor.server.clone());

            let ctx = TaskContext {
                account: job.account,
                binding: job.binding,
                target_url: target_url.to_string(),
                browser: self.browser.clone(),
                profiles: self.profiles.clone(),
                rotator: self.rotator.clone(),
                pacing: self.pacing.clone(),
                cancel: self.cancel.clone(),
            };

            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let started_at = Utc::now();

                let delay = stagger_delay(index, stagger);
                if !delay.is_zero() && !cancel.load(Ordering::Relaxed) {
                    tokio::time::sleep(delay).await;
                }

                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("dispatcher semaphore closed");

                let outcome = match std::panic::AssertUnwindSafe(run_account_task(ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic_info) => {
                        let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };

                        error!("[Account {}] task panicked: {}", account_id, panic_msg);
                        AccountOutcome::failed(
                            account_id,
                            username,
                            proxy,
                            false,
                            started_at,
                            format!("task panicked: {}", panic_msg),
                        )
                    }
                };

                let _ = tx.send(outcome);
            });
        }

        // The dispatcher's sender must go away so the drain below ends once
        // the last task reported.
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        info!("All {} account tasks reached a terminal state", outcomes.len());
        outcomes
    }
}
