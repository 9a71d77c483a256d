//! Credential refresh scheduling: the refresh collaborator contract, the
//! single-flight refresh run, and the startup and periodic jobs.

pub mod authorizer;
pub mod refresh;
pub mod scheduler;

pub use authorizer::{CredentialAuthorizer, HttpCredentialAuthorizer, RefreshError};
pub use refresh::{CredentialRefresher, RefreshRunOutcome, RefreshSummary};
pub use scheduler::{
    run_refresh_job, start_refresh_scheduler, RefreshSchedule, RefreshSchedulerHandle,
    DEFAULT_REFRESH_CRON, REFRESH_FORCED_JOB, REFRESH_STARTUP_JOB,
};
