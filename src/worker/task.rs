//! Per-account worker task
//!
//! State machine: pending -> launching -> navigating -> interacting ->
//! upvoting -> closing -> succeeded|failed. Transitions are one-directional
//! and `closing` is reached from every phase that opened a session, error or
//! not. Any step failure becomes this account's failed outcome; siblings
//! never see it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn, debug};

use crate::browser::{BrowserAutomation, BrowserError, SessionHandle, UPVOTE_TARGET};
use crate::pacing::{Pacer, PacingConfig};
use crate::profile::{ProfileError, ProfileManager};
use crate::proxy::{ProxyBinding, ProxyError, ProxyRotator};
use crate::store::{Account, AccountStatus};

/// Task progression phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPhase {
    Pending,
    Launching,
    Navigating,
    Interacting,
    Upvoting,
    Closing,
    Succeeded,
    Failed,
}

impl TaskPhase {
    /// Whether the task can no longer move
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPhase::Pending => "pending",
            TaskPhase::Launching => "launching",
            TaskPhase::Navigating => "navigating",
            TaskPhase::Interacting => "interacting",
            TaskPhase::Upvoting => "upvoting",
            TaskPhase::Closing => "closing",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

struct TaskState {
    account_id: String,
    phase: TaskPhase,
}

impl TaskState {
    fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            phase: TaskPhase::Pending,
        }
    }

    /// Move forward; transitions never go backwards
    fn advance(&mut self, next: TaskPhase) {
        debug_assert!(next > self.phase, "task phase moved backwards");
        debug!("[Account {}] {} -> {}", self.account_id, self.phase, next);
        self.phase = next;
    }
}

/// Why a task step failed
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("campaign cancelled")]
    Cancelled,

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Rotation(#[from] ProxyError),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Terminal report for one account in one campaign run
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOutcome {
    pub account_id: String,
    pub username: String,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Proxy server this account was bound to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Whether the proxy was rotated during this task
    #[serde(default)]
    pub rotated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AccountOutcome {
    pub fn succeeded(
        account_id: String,
        username: String,
        proxy: Option<String>,
        rotated: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            username,
            status: AccountStatus::Succeeded,
            reason: None,
            proxy,
            rotated,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        account_id: String,
        username: String,
        proxy: Option<String>,
        rotated: bool,
        started_at: DateTime<Utc>,
        reason: String,
    ) -> Self {
        Self {
            account_id,
            username,
            status: AccountStatus::Failed,
            reason: Some(reason),
            proxy,
            rotated,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Everything one worker task needs
pub struct TaskContext {
    pub account: Account,
    pub binding: Option<ProxyBinding>,
    pub target_url: String,
    pub browser: Arc<dyn BrowserAutomation>,
    pub profiles: Arc<ProfileManager>,
    pub rotator: Arc<dyn ProxyRotator>,
    pub pacing: PacingConfig,
    pub cancel: Arc<AtomicBool>,
}

impl TaskContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

fn ensure_active(ctx: &TaskContext) -> Result<(), TaskError> {
    if ctx.cancelled() {
        Err(TaskError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run the full interaction sequence for one account.
///
/// Never returns an error: every failure is folded into the outcome so the
/// dispatcher's aggregate enumerates all accounts.
pub async fn run_account_task(ctx: TaskContext) -> AccountOutcome {
    let started_at = Utc::now();
    let account_id = ctx.account.id.clone();
    let username = ctx.account.username.clone();
    let proxy = ctx.binding.as_ref().map(|b| b.descriptor.server.clone());
    let mut state = TaskState::new(&account_id);
    let mut rotated = false;

    if ctx.cancelled() {
        state.advance(TaskPhase::Failed);
        return AccountOutcome::failed(
            account_id,
            username,
            proxy,
            false,
            started_at,
            "campaign cancelled before start".to_string(),
        );
    }

    // Exclusive profile check-out; the guard releases on every path out of
    // this function, including the panic path caught by the dispatcher.
    let profile = match ctx.profiles.acquire(&ctx.account) {
        Ok(guard) => guard,
        Err(e) => {
            let e = TaskError::Profile(e);
            warn!("[Account {}] skipped: {}", account_id, e);
            state.advance(TaskPhase::Failed);
            return AccountOutcome::failed(account_id, username, proxy, false, started_at, e.to_string());
        }
    };

    // Rotation runs strictly before the session opens, at most once per
    // account per run. A rotation that keeps failing skips the account.
    if let Some(binding) = ctx.binding.as_ref() {
        if binding.rotate {
            match ctx.rotator.rotate(&binding.descriptor).await {
                Ok(()) => {
                    rotated = true;
                    info!("[Account {}] rotated proxy {}", account_id, binding.descriptor.server);
                }
                Err(e) => {
                    let e = TaskError::Rotation(e);
                    warn!("[Account {}] skipped: {}", account_id, e);
                    state.advance(TaskPhase::Failed);
                    return AccountOutcome::failed(
                        account_id, username, proxy, false, started_at, e.to_string(),
                    );
                }
            }
        } else {
            debug!(
                "[Account {}] proxy {} rotated recently, keeping current IP",
                account_id, binding.descriptor.server
            );
        }
    }

    state.advance(TaskPhase::Launching);
    let session = match ctx.browser.open_session(profile.path(), ctx.binding.as_ref()).await {
        Ok(session) => session,
        Err(e) => {
            warn!("[Account {}] browser launch failed: {}", account_id, e);
            state.advance(TaskPhase::Failed);
            return AccountOutcome::failed(
                account_id, username, proxy, rotated, started_at, e.to_string(),
            );
        }
    };

    let drive = drive_session(&ctx, &session, &mut state).await;

    // Close no matter how the drive ended; a close failure is logged but
    // never overrides the drive result.
    state.advance(TaskPhase::Closing);
    if let Err(e) = ctx.browser.close(&session).await {
        warn!("[Account {}] failed to close session {}: {}", account_id, session.id, e);
    }

    match drive {
        Ok(()) => {
            state.advance(TaskPhase::Succeeded);
            info!("[Account {}] upvote completed", account_id);
            AccountOutcome::succeeded(account_id, username, proxy, rotated, started_at)
        }
        Err(e) => {
            state.advance(TaskPhase::Failed);
            warn!("[Account {}] task failed: {}", account_id, e);
            AccountOutcome::failed(account_id, username, proxy, rotated, started_at, e.to_string())
        }
    }
}

/// Navigate, browse like a human, upvote. Cancellation is checked before
/// every step so an aborted run falls through to the close above.
async fn drive_session(
    ctx: &TaskContext,
    session: &SessionHandle,
    state: &mut TaskState,
) -> Result<(), TaskError> {
    let pacer = Pacer::new(ctx.pacing.clone());

    ensure_active(ctx)?;
    state.advance(TaskPhase::Navigating);
    ctx.browser.navigate(session, &ctx.target_url).await?;
    pacer.dwell().await;

    ensure_active(ctx)?;
    state.advance(TaskPhase::Interacting);
    for _ in 0..pacer.scroll_passes() {
        ensure_active(ctx)?;
        ctx.browser.scroll(session).await?;
        pacer.dwell().await;
    }

    ensure_active(ctx)?;
    state.advance(TaskPhase::Upvoting);
    ctx.browser.click(session, UPVOTE_TARGET).await?;
    pacer.dwell().await;

    Ok(())
}
