use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_core::{deadline_passed, unix_now};
use relay_pool::{CredentialPool, RefreshRecord, RefreshRecords};
use serde::Serialize;
use tracing::{info, warn};

use crate::authorizer::CredentialAuthorizer;
use crate::scheduler::{REFRESH_FORCED_JOB, REFRESH_STARTUP_JOB};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Public struct `RefreshSummary` used across Relay components.
pub struct RefreshSummary {
    pub refreshed: usize,
    pub fresh: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRunOutcome {
    Completed(RefreshSummary),
    /// A run of the same job was still active.
    Skipped,
}

/// Refreshes every credential through the authorizer and records the minted
/// access tokens. Each job name has at most one active run; different jobs
/// may overlap.
pub struct CredentialRefresher {
    pool: Arc<CredentialPool>,
    records: Arc<RefreshRecords>,
    authorizer: Arc<dyn CredentialAuthorizer>,
    max_age_seconds: u64,
    running: Mutex<HashSet<&'static str>>,
}

struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<&'static str>>,
    job: &'static str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock_running(self.running).remove(self.job);
    }
}

fn lock_running<'a>(running: &'a Mutex<HashSet<&'static str>>) -> MutexGuard<'a, HashSet<&'static str>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialRefresher {
    pub fn new(
        pool: Arc<CredentialPool>,
        records: Arc<RefreshRecords>,
        authorizer: Arc<dyn CredentialAuthorizer>,
        max_age_seconds: u64,
    ) -> Self {
        Self {
            pool,
            records,
            authorizer,
            max_age_seconds,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        !lock_running(&self.running).is_empty()
    }

    pub fn is_job_running(&self, job: &str) -> bool {
        lock_running(&self.running).contains(job)
    }

    fn try_start(&self, job: &'static str) -> Option<RunningGuard<'_>> {
        if !lock_running(&self.running).insert(job) {
            return None;
        }
        Some(RunningGuard {
            running: &self.running,
            job,
        })
    }

    /// Whether a soft refresh would touch `token` at `now_unix`.
    pub fn is_due(&self, token: &str, now_unix: u64) -> bool {
        match self.records.get(token) {
            Some(record) => deadline_passed(
                Some(record.timestamp.saturating_add(self.max_age_seconds)),
                now_unix,
            ),
            None => true,
        }
    }

    /// Forced runs refresh every credential; soft runs only those that are due.
    /// Runs under the forced or startup job name accordingly.
    pub async fn refresh_all(&self, force: bool) -> RefreshRunOutcome {
        let job = if force {
            REFRESH_FORCED_JOB
        } else {
            REFRESH_STARTUP_JOB
        };
        self.refresh_job(job, force).await
    }

    /// Like [`Self::refresh_all`], skipped when `job` already has a run active.
    pub async fn refresh_job(&self, job: &'static str, force: bool) -> RefreshRunOutcome {
        let Some(_guard) = self.try_start(job) else {
            return RefreshRunOutcome::Skipped;
        };

        let mut summary = RefreshSummary::default();
        let mut seen = HashSet::new();
        for credential in self.pool.credentials() {
            if !seen.insert(credential.token.clone()) || self.pool.is_errored(&credential.token) {
                continue;
            }
            if !force && !self.is_due(&credential.token, unix_now()) {
                summary.fresh += 1;
                continue;
            }
            match self.authorizer.refresh(&credential).await {
                Ok(access_token) => {
                    let record = RefreshRecord {
                        token: access_token,
                        timestamp: unix_now(),
                    };
                    if let Err(error) = self.records.insert(&credential.token, record) {
                        warn!(error = %error, "failed to persist refresh record");
                    }
                    summary.refreshed += 1;
                }
                Err(error) => {
                    warn!(
                        credential = %credential.masked_token(),
                        error = %error,
                        "credential refresh failed"
                    );
                    if let Err(error) = self.pool.record_errored(&credential.token) {
                        warn!(error = %error, "failed to record errored credential");
                    }
                    summary.failed += 1;
                }
            }
        }
        info!(
            job,
            force,
            refreshed = summary.refreshed,
            fresh = summary.fresh,
            failed = summary.failed,
            "credential refresh finished"
        );
        RefreshRunOutcome::Completed(summary)
    }
}
