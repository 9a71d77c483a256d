//! Background refresh jobs.
//!
//! `refresh-startup` runs once, soft, right after boot. `refresh-forced` fires
//! on a cron schedule and refreshes everything. Both consult the live
//! `scheduled_refresh` flag when they come due. Each job is single-flight on
//! its own; a startup run still in progress does not hold back the cron job.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::TimeZone;
use chrono_tz::Tz;
use cron::Schedule;
use relay_config::ConfigStore;
use relay_core::unix_now_ms;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::refresh::{CredentialRefresher, RefreshRunOutcome};

pub const REFRESH_FORCED_JOB: &str = "refresh-forced";
pub const REFRESH_STARTUP_JOB: &str = "refresh-startup";
pub const DEFAULT_REFRESH_CRON: &str = "0 0 3 */4 * *";

#[derive(Debug, Clone)]
/// Public struct `RefreshSchedule` used across Relay components.
pub struct RefreshSchedule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl RefreshSchedule {
    pub fn parse(cron: &str, timezone: &str) -> Result<Self> {
        let schedule =
            Schedule::from_str(cron).with_context(|| format!("invalid cron expression '{}'", cron))?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|error| anyhow!("invalid timezone '{}': {error}", timezone))?;
        Ok(Self {
            expression: cron.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `from_unix_ms`.
    pub fn next_due_unix_ms(&self, from_unix_ms: u64) -> Result<u64> {
        let from = self
            .timezone
            .timestamp_millis_opt(i64::try_from(from_unix_ms).unwrap_or(i64::MAX))
            .single()
            .ok_or_else(|| anyhow!("invalid from timestamp for refresh schedule"))?;
        let next = self
            .schedule
            .after(&from)
            .next()
            .ok_or_else(|| anyhow!("cron expression '{}' has no future occurrence", self.expression))?;
        Ok(u64::try_from(next.timestamp_millis()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug)]
/// Public struct `RefreshSchedulerHandle` used across Relay components.
pub struct RefreshSchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    startup_task: Option<JoinHandle<()>>,
}

impl RefreshSchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the periodic job. An in-flight refresh run is left to finish.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(startup_task) = self.startup_task.take() {
            let _ = startup_task.await;
        }
    }
}

/// Starts both refresh jobs on the current Tokio runtime.
pub fn start_refresh_scheduler(
    config: Arc<ConfigStore>,
    refresher: Arc<CredentialRefresher>,
    schedule: RefreshSchedule,
) -> Result<RefreshSchedulerHandle> {
    let handle = tokio::runtime::Handle::try_current()
        .context("refresh scheduler requires an active Tokio runtime")?;
    schedule.next_due_unix_ms(unix_now_ms())?;

    let startup_task = if config.snapshot().scheduled_refresh {
        let refresher = Arc::clone(&refresher);
        Some(handle.spawn(async move {
            run_refresh_job(REFRESH_STARTUP_JOB, &refresher, false).await;
        }))
    } else {
        None
    };

    info!(
        job = REFRESH_FORCED_JOB,
        cron = schedule.expression(),
        timezone = schedule.timezone.name(),
        "refresh scheduler started"
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        run_refresh_loop(config, refresher, schedule, shutdown_rx).await;
    });
    Ok(RefreshSchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
        startup_task,
    })
}

async fn run_refresh_loop(
    config: Arc<ConfigStore>,
    refresher: Arc<CredentialRefresher>,
    schedule: RefreshSchedule,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let now_unix_ms = unix_now_ms();
        let due_unix_ms = match schedule.next_due_unix_ms(now_unix_ms) {
            Ok(due) => due,
            Err(error) => {
                error!(error = %error, "refresh schedule has no next firing, stopping");
                return;
            }
        };
        let wait = Duration::from_millis(due_unix_ms.saturating_sub(now_unix_ms));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if !config.snapshot().scheduled_refresh {
                    info!(job = REFRESH_FORCED_JOB, "scheduled refresh disabled, skipping firing");
                    continue;
                }
                let refresher = Arc::clone(&refresher);
                tokio::spawn(async move {
                    run_refresh_job(REFRESH_FORCED_JOB, &refresher, true).await;
                });
            }
            _ = &mut shutdown_rx => {
                info!("refresh scheduler stopped");
                return;
            }
        }
    }
}

/// Runs one named job, logging whether it completed or was skipped.
pub async fn run_refresh_job(
    job: &'static str,
    refresher: &CredentialRefresher,
    force: bool,
) -> RefreshRunOutcome {
    info!(job, force, "refresh job started");
    let outcome = refresher.refresh_job(job, force).await;
    match outcome {
        RefreshRunOutcome::Completed(summary) => info!(
            job,
            refreshed = summary.refreshed,
            fresh = summary.fresh,
            failed = summary.failed,
            "refresh job completed"
        ),
        RefreshRunOutcome::Skipped => info!(job, "refresh job skipped, previous run still active"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::{CredentialAuthorizer, RefreshError};
    use async_trait::async_trait;
    use chrono::{Datelike, Timelike};
    use relay_config::GatewaySettings;
    use relay_pool::{parse_bulk_rows, Credential, CredentialPool, RefreshRecords, REFRESH_MAP_FILE};

    struct EchoAuthorizer;

    #[async_trait]
    impl CredentialAuthorizer for EchoAuthorizer {
        async fn refresh(&self, credential: &Credential) -> Result<String, RefreshError> {
            Ok(format!("access-{}", credential.token))
        }
    }

    fn refresher(temp: &tempfile::TempDir) -> (Arc<CredentialRefresher>, Arc<RefreshRecords>) {
        let pool = Arc::new(CredentialPool::open(temp.path()).expect("pool"));
        pool.append_rows(parse_bulk_rows("a,p,tok1")).expect("accounts");
        let records =
            Arc::new(RefreshRecords::open(temp.path().join(REFRESH_MAP_FILE)).expect("records"));
        let refresher = Arc::new(CredentialRefresher::new(
            pool,
            Arc::clone(&records),
            Arc::new(EchoAuthorizer),
            60,
        ));
        (refresher, records)
    }

    #[test]
    fn unit_default_cron_fires_at_three_on_every_fourth_day() {
        let schedule = RefreshSchedule::parse(DEFAULT_REFRESH_CRON, "UTC").expect("schedule");
        // 2024-01-01T00:00:00Z
        let due = schedule
            .next_due_unix_ms(1_704_067_200_000)
            .expect("next due");
        let next = chrono::Utc
            .timestamp_millis_opt(i64::try_from(due).expect("i64"))
            .single()
            .expect("timestamp");
        assert_eq!((next.day(), next.hour(), next.minute()), (1, 3, 0));

        let following = schedule.next_due_unix_ms(due).expect("following");
        let following = chrono::Utc
            .timestamp_millis_opt(i64::try_from(following).expect("i64"))
            .single()
            .expect("timestamp");
        assert_eq!((following.day(), following.hour()), (5, 3));
    }

    #[test]
    fn regression_invalid_schedule_inputs_are_rejected() {
        assert!(RefreshSchedule::parse("not a cron", "UTC").is_err());
        assert!(RefreshSchedule::parse(DEFAULT_REFRESH_CRON, "Mars/Olympus").is_err());
    }

    #[tokio::test]
    async fn integration_startup_job_runs_only_when_enabled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (refresher, records) = refresher(&temp);
        let disabled = Arc::new(ConfigStore::new(GatewaySettings::default()));
        let schedule = RefreshSchedule::parse(DEFAULT_REFRESH_CRON, "UTC").expect("schedule");

        let mut handle = start_refresh_scheduler(disabled, Arc::clone(&refresher), schedule.clone())
            .expect("start disabled");
        assert!(handle.is_running());
        handle.shutdown().await;
        assert!(!handle.is_running());
        assert!(records.is_empty(), "startup refresh must not run when disabled");

        let enabled = Arc::new(ConfigStore::new(GatewaySettings {
            scheduled_refresh: true,
            ..GatewaySettings::default()
        }));
        let mut handle =
            start_refresh_scheduler(enabled, refresher, schedule).expect("start enabled");
        handle.shutdown().await;
        assert_eq!(
            records.get("tok1").map(|record| record.token),
            Some("access-tok1".to_string())
        );
    }
}
