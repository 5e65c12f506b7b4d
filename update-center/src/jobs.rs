// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The installer job model.
//!
//! The original system expressed jobs as a deep inheritance hierarchy with
//! status objects as inner classes; here a job is one record with a tagged
//! kind, and status is a plain value replaced on transition. Waiters observe
//! transitions through a per-job watch channel, which doubles as the monitor
//! the duplicate-install check blocks on.

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::digest::ComputedChecksums;
use crate::site::PluginEntry;

/// Status of one job, replaced wholesale on every transition.
#[derive(Clone, Debug)]
pub enum JobStatus {
    Pending,
    Running,
    /// Download in progress; the percentage is known only when the server
    /// declared a content length.
    Installing { percentage: Option<u8> },
    Success,
    SuccessButRequiresRestart { message: String },
    Skipped,
    Failure { message: String },
    Canceled,
}

impl JobStatus {
    /// Name reported on the status surface.
    pub fn kind(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Installing { .. } => "Installing",
            JobStatus::Success => "Success",
            JobStatus::SuccessButRequiresRestart { .. } => {
                "SuccessButRequiresRestart"
            }
            JobStatus::Skipped => "Skipped",
            JobStatus::Failure { .. } => "Failure",
            JobStatus::Canceled => "Canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::SuccessButRequiresRestart { .. }
                | JobStatus::Skipped
                | JobStatus::Failure { .. }
                | JobStatus::Canceled
        )
    }

    /// Success in the broad sense: the work is done and nothing failed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::SuccessButRequiresRestart { .. }
                | JobStatus::Skipped
        )
    }

    /// Success of the install itself, the condition under which a duplicate
    /// job skips its own download.
    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::SuccessButRequiresRestart { .. }
        )
    }

    pub fn requires_restart(&self) -> bool {
        matches!(self, JobStatus::SuccessButRequiresRestart { .. })
    }
}

/// State of one connectivity channel of a connection check.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// The check has not started yet.
    Precheck,
    /// The check was skipped, e.g. no connection-check URL is defined.
    Skipped,
    /// The check is running right now.
    Checking,
    /// The check never ran.
    Unchecked,
    Ok,
    Failed,
}

/// The two connectivity channels of a connection check.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, JsonSchema)]
pub struct ConnectionStates {
    pub internet: ConnectionState,
    pub updatesite: ConnectionState,
}

impl ConnectionStates {
    pub fn new() -> Self {
        Self {
            internet: ConnectionState::Precheck,
            updatesite: ConnectionState::Precheck,
        }
    }

    pub fn any_failed(&self) -> bool {
        self.internet == ConnectionState::Failed
            || self.updatesite == ConnectionState::Failed
    }
}

impl Default for ConnectionStates {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ConnectionCheckJob {
    pub(crate) states: Mutex<ConnectionStates>,
    /// Human-readable progress/failure messages, oldest first.
    pub(crate) statuses: Mutex<Vec<String>>,
}

impl ConnectionCheckJob {
    pub(crate) fn new() -> Self {
        Self {
            states: Mutex::new(ConnectionStates::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    pub fn states(&self) -> ConnectionStates {
        *self.states.lock().unwrap()
    }

    pub fn messages(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct InstallationJob {
    /// Snapshot of the catalog entry taken at enqueue time.
    pub plugin: PluginEntry,
    /// Load into the live process on success instead of waiting for a
    /// restart.
    pub dynamic_load: bool,
    /// Sibling plugins installed in the same wave.
    pub batch: Option<Vec<String>>,
    pub(crate) computed: Mutex<Option<ComputedChecksums>>,
}

impl InstallationJob {
    pub fn computed_checksums(&self) -> Option<ComputedChecksums> {
        self.computed.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct EnableJob {
    pub plugin: PluginEntry,
    pub dynamic_load: bool,
}

#[derive(Debug)]
pub struct PluginDowngradeJob {
    pub plugin: PluginEntry,
}

#[derive(Debug)]
pub struct CompleteBatchJob {
    pub batch: Vec<String>,
    pub(crate) started: Instant,
}

#[derive(Debug)]
pub struct RestartJob {
    /// Principal that requested the restart, replayed when it runs.
    pub authentication: String,
}

/// What a job does; the discriminant the worker loop dispatches on.
#[derive(Debug)]
pub enum JobKind {
    ConnectionCheck(ConnectionCheckJob),
    Install(InstallationJob),
    Enable(EnableJob),
    /// Reports "already installed at the desired version" through the same
    /// status surface as a real install.
    NoOp { plugin: PluginEntry },
    PluginDowngrade(PluginDowngradeJob),
    CoreUpgrade,
    CoreDowngrade,
    CompleteBatch(CompleteBatchJob),
    Restart(RestartJob),
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::ConnectionCheck(_) => "ConnectionCheckJob",
            JobKind::Install(_) => "InstallationJob",
            JobKind::Enable(_) => "EnableJob",
            JobKind::NoOp { .. } => "NoOpJob",
            JobKind::PluginDowngrade(_) => "PluginDowngradeJob",
            JobKind::CoreUpgrade => "CoreUpgradeJob",
            JobKind::CoreDowngrade => "CoreDowngradeJob",
            JobKind::CompleteBatch(_) => "CompleteBatchJob",
            JobKind::Restart(_) => "RestartJob",
        }
    }
}

/// One scheduled unit of installer work.
#[derive(Debug)]
pub struct Job {
    /// Process-wide monotonically increasing id.
    pub id: u64,
    /// Owning site, absent for restart and batch-completion jobs.
    pub site_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub kind: JobKind,
    correlation_id: OnceLock<Uuid>,
    status: watch::Sender<JobStatus>,
    error: Mutex<Option<String>>,
}

impl Job {
    pub(crate) fn new(id: u64, site_id: Option<String>, kind: JobKind) -> Self {
        let (status, _) = watch::channel(JobStatus::Pending);
        Self {
            id,
            site_id,
            created_at: Utc::now(),
            kind,
            correlation_id: OnceLock::new(),
            status,
            error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status transitions; used by duplicate-install waiters.
    pub fn status_rx(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Replace the status. Terminal statuses are never overwritten; the one
    /// terminal transition a job makes is the one observers see forever.
    pub(crate) fn set_status(&self, new: JobStatus) {
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = new;
            true
        });
    }

    /// Cancel a pending restart job. Returns whether this call canceled it.
    pub fn cancel(&self) -> bool {
        if !matches!(self.kind, JobKind::Restart(_)) {
            return false;
        }
        self.status.send_if_modified(|current| {
            if matches!(current, JobStatus::Pending) {
                *current = JobStatus::Canceled;
                true
            } else {
                false
            }
        })
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id.get().copied()
    }

    /// Associate this job with a batch. May be set exactly once.
    pub fn set_correlation_id(&self, correlation_id: Uuid) {
        if self.correlation_id.set(correlation_id).is_err() {
            panic!("correlation id may not be reassigned");
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.error.lock().unwrap() = Some(message);
    }

    /// Await the job's terminal status.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.status_rx();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                // Sender dropped; report whatever we last saw.
                return rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restart_job() -> Job {
        Job::new(
            1,
            None,
            JobKind::Restart(RestartJob { authentication: "admin".into() }),
        )
    }

    #[test]
    fn terminal_status_is_sticky() {
        let job = restart_job();
        job.set_status(JobStatus::Running);
        job.set_status(JobStatus::Failure { message: "boom".into() });
        job.set_status(JobStatus::Success);
        assert_eq!(job.status().kind(), "Failure");
    }

    #[test]
    fn cancel_only_from_pending() {
        let job = restart_job();
        assert!(job.cancel());
        assert_eq!(job.status().kind(), "Canceled");
        // A second cancel is a no-op.
        assert!(!job.cancel());

        let job = restart_job();
        job.set_status(JobStatus::Running);
        assert!(!job.cancel());
        assert_eq!(job.status().kind(), "Running");
    }

    #[test]
    fn non_restart_jobs_cannot_be_canceled() {
        let job = Job::new(
            2,
            Some("default".into()),
            JobKind::NoOp {
                plugin: crate::site::PluginEntry {
                    name: "git".into(),
                    version: "1.0".into(),
                    title: None,
                    categories: Vec::new(),
                    url: "https://updates.example.io/git.jpi".into(),
                    sha1: None,
                    sha256: None,
                    sha512: None,
                    dependencies: Vec::new(),
                    source_id: "default".into(),
                },
            },
        );
        assert!(!job.cancel());
    }

    #[test]
    fn correlation_id_is_set_once() {
        let job = restart_job();
        assert_eq!(job.correlation_id(), None);
        let id = Uuid::new_v4();
        job.set_correlation_id(id);
        assert_eq!(job.correlation_id(), Some(id));
    }

    #[test]
    #[should_panic(expected = "correlation id may not be reassigned")]
    fn correlation_id_cannot_be_reassigned() {
        let job = restart_job();
        job.set_correlation_id(Uuid::new_v4());
        job.set_correlation_id(Uuid::new_v4());
    }

    #[tokio::test]
    async fn wait_terminal_observes_the_transition() {
        let job = std::sync::Arc::new(restart_job());
        let waiter = {
            let job = std::sync::Arc::clone(&job);
            tokio::spawn(async move { job.wait_terminal().await })
        };
        job.set_status(JobStatus::Running);
        job.set_status(JobStatus::Success);
        let status = waiter.await.unwrap();
        assert_eq!(status.kind(), "Success");
    }
}
