// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The update center: job queue, installer worker, and status surface.
//!
//! Two execution facilities share one runtime. The installer worker is a
//! single task fed by a channel, so installation, upgrade, downgrade, and
//! restart jobs run strictly in submission order with at most one in flight;
//! that serializes mutation of the plugin directory and makes each job's
//! effects visible to the next. Site refreshes and internet probes run as
//! ordinary spawned tasks, concurrent and side-effect-free on shared state
//! other than their owning site.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use display_error_chain::DisplayErrorChain;
use schemars::JsonSchema;
use serde::Serialize;
use slog::Logger;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{ID_UPLOAD, UpdateCenterConfig};
use crate::errors::JobError;
use crate::fetch::Fetcher;
use crate::jobs::{
    CompleteBatchJob, ConnectionCheckJob, ConnectionState, ConnectionStates,
    EnableJob, InstallationJob, Job, JobKind, JobStatus, PluginDowngradeJob,
    RestartJob,
};
use crate::registry::{SiteRegistry, SiteRefreshResult};
use crate::resume::ResumeStore;
use crate::runtime::{DynamicLoadError, Lifecycle, PluginRuntime};
use crate::site::{
    CoreEntry, PluginEntry, connection_check_probe_url,
};
use crate::verify::verify_checksums;
use crate::version::is_newer_than;

/// Errors answering a status request.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(
        "cannot check connection status of the update site with id '{id}': \
         no such site"
    )]
    UnknownSite { id: String },
}

/// Response shape of the install-status surface.
#[derive(Clone, Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallStatusResponse {
    pub state: String,
    pub jobs: Vec<InstallJobSummary>,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallJobSummary {
    pub name: String,
    pub version: String,
    pub title: String,
    pub install_status: String,
    pub requires_restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// Projection of one registered site.
#[derive(Clone, Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug)]
struct CenterState {
    /// Every job ever scheduled this process, oldest first. Grows for the
    /// lifetime of the process.
    jobs: Vec<Arc<Job>>,
    /// Sites for which a connection check has been scheduled.
    sources_used: HashSet<String>,
}

#[derive(Debug)]
struct Inner {
    log: Logger,
    config: UpdateCenterConfig,
    registry: SiteRegistry,
    runtime: Arc<dyn PluginRuntime>,
    lifecycle: Arc<dyn Lifecycle>,
    fetcher: Fetcher,
    resume: ResumeStore,
    state: Mutex<CenterState>,
    /// Set once any job finishes restart-required; never cleared within a
    /// process lifetime.
    requires_restart: AtomicBool,
    next_job_id: AtomicU64,
    job_tx: mpsc::UnboundedSender<Arc<Job>>,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Handle to the update center. Cheap to clone.
#[derive(Clone, Debug)]
pub struct UpdateCenter {
    inner: Arc<Inner>,
}

impl UpdateCenter {
    pub fn new(
        config: UpdateCenterConfig,
        registry: SiteRegistry,
        runtime: Arc<dyn PluginRuntime>,
        lifecycle: Arc<dyn Lifecycle>,
        log: &Logger,
    ) -> anyhow::Result<Self> {
        let log = log.new(slog::o!("component" => "update center"));
        let fetcher = Fetcher::new(&log)?;
        let resume = ResumeStore::new(config.resume_path(), &log);
        std::fs::create_dir_all(runtime.plugin_dir())?;

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            log,
            config,
            registry,
            runtime,
            lifecycle,
            fetcher,
            resume,
            state: Mutex::new(CenterState {
                jobs: Vec::new(),
                sources_used: HashSet::new(),
            }),
            requires_restart: AtomicBool::new(false),
            next_job_id: AtomicU64::new(0),
            job_tx,
        });

        tokio::spawn(installer_worker(Arc::downgrade(&inner), job_rx));
        Ok(Self { inner })
    }

    pub fn config(&self) -> &UpdateCenterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.inner.registry
    }

    pub fn runtime(&self) -> &Arc<dyn PluginRuntime> {
        &self.inner.runtime
    }

    // ---
    // Scheduling
    // ---

    /// Schedule the installation of one plugin.
    pub fn install_plugin(
        &self,
        plugin: PluginEntry,
        dynamic_load: bool,
        correlation_id: Option<Uuid>,
        batch: Option<Vec<String>>,
    ) -> Arc<Job> {
        let site_id = Some(plugin.source_id.clone());
        self.submit_job_with_correlation(
            site_id,
            JobKind::Install(InstallationJob {
                plugin,
                dynamic_load,
                batch,
                computed: Mutex::new(None),
            }),
            correlation_id,
        )
    }

    /// Schedule enabling an installed-but-disabled plugin.
    pub fn enable_plugin(
        &self,
        plugin: PluginEntry,
        dynamic_load: bool,
    ) -> Arc<Job> {
        let site_id = Some(plugin.source_id.clone());
        self.submit_job(
            site_id,
            JobKind::Enable(EnableJob { plugin, dynamic_load }),
        )
    }

    /// Report "already installed at the desired version" through the job
    /// status surface.
    pub fn note_already_installed(&self, plugin: PluginEntry) -> Arc<Job> {
        let site_id = Some(plugin.source_id.clone());
        self.submit_job(site_id, JobKind::NoOp { plugin })
    }

    /// Schedule replacing a plugin with its `.bak` sibling.
    pub fn downgrade_plugin(&self, plugin: PluginEntry) -> Arc<Job> {
        let site_id = Some(plugin.source_id.clone());
        self.submit_job(
            site_id,
            JobKind::PluginDowngrade(PluginDowngradeJob { plugin }),
        )
    }

    /// Schedule a core upgrade from the first site offering one.
    pub fn upgrade_core(&self) -> Result<Arc<Job>, JobError> {
        if !self.inner.lifecycle.can_rewrite_core() {
            return Err(JobError::CoreRewriteUnsupported);
        }
        let site =
            self.inner.registry.core_source().ok_or(JobError::NoCoreSource)?;
        slog::info!(self.inner.log, "scheduling the core upgrade");
        Ok(self.submit_job(Some(site.id().to_string()), JobKind::CoreUpgrade))
    }

    /// Schedule a core downgrade to the `.bak` next to the live binary.
    pub fn downgrade_core(&self) -> Result<Arc<Job>, JobError> {
        if !self.is_downgradable() {
            return Err(JobError::NoCoreBackup);
        }
        let site_id =
            self.inner.registry.core_source().map(|s| s.id().to_string());
        slog::info!(self.inner.log, "scheduling the core downgrade");
        Ok(self.submit_job(site_id, JobKind::CoreDowngrade))
    }

    /// Schedule a restart on behalf of `authentication`. At most one restart
    /// is scheduled at a time; a second call returns the existing job.
    pub fn schedule_restart(&self, authentication: &str) -> Arc<Job> {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if let Some(existing) = state.jobs.iter().rev().find(|job| {
            matches!(job.kind, JobKind::Restart(_))
                && matches!(
                    job.status(),
                    JobStatus::Pending | JobStatus::Running
                )
        }) {
            return Arc::clone(existing);
        }

        slog::info!(inner.log, "scheduling restart");
        let site_id =
            inner.registry.core_source().map(|s| s.id().to_string());
        if let Some(site_id) = &site_id {
            ensure_connection_check_locked(inner, &mut state, site_id);
        }
        let job = Arc::new(Job::new(
            inner.next_id(),
            site_id,
            JobKind::Restart(RestartJob {
                authentication: authentication.to_string(),
            }),
        ));
        state.jobs.push(Arc::clone(&job));
        _ = inner.job_tx.send(Arc::clone(&job));
        job
    }

    /// Cancel all pending restarts. Returns whether any was canceled.
    pub fn cancel_restarts(&self) -> bool {
        let mut canceled = false;
        for job in self.jobs() {
            if job.cancel() {
                slog::info!(self.inner.log, "scheduled restart canceled");
                canceled = true;
            }
        }
        canceled
    }

    /// Schedule the batch-completion job that activates an install wave.
    pub fn complete_batch(
        &self,
        batch: Vec<String>,
        started: Instant,
        correlation_id: Uuid,
    ) -> Arc<Job> {
        let site_id =
            self.inner.registry.core_source().map(|s| s.id().to_string());
        self.submit_job_with_correlation(
            site_id,
            JobKind::CompleteBatch(CompleteBatchJob { batch, started }),
            Some(correlation_id),
        )
    }

    fn submit_job(&self, site_id: Option<String>, kind: JobKind) -> Arc<Job> {
        self.submit_job_with_correlation(site_id, kind, None)
    }

    fn submit_job_with_correlation(
        &self,
        site_id: Option<String>,
        kind: JobKind,
        correlation_id: Option<Uuid>,
    ) -> Arc<Job> {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        if let Some(site_id) = &site_id {
            ensure_connection_check_locked(inner, &mut state, site_id);
        }
        let job = Arc::new(Job::new(inner.next_id(), site_id, kind));
        // Must happen before the worker can see the job.
        if let Some(correlation_id) = correlation_id {
            job.set_correlation_id(correlation_id);
        }
        slog::debug!(
            inner.log, "scheduling job";
            "id" => job.id,
            "kind" => job.kind.name(),
        );
        state.jobs.push(Arc::clone(&job));
        _ = inner.job_tx.send(Arc::clone(&job));
        job
    }

    // ---
    // Lookups
    // ---

    /// Every job scheduled so far, oldest first.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.inner.state.lock().unwrap().jobs.clone()
    }

    pub fn job(&self, id: u64) -> Option<Arc<Job>> {
        self.jobs().into_iter().find(|job| job.id == id)
    }

    /// Latest install job for the given plugin name and source site.
    pub fn latest_install_job(
        &self,
        name: &str,
        source_id: &str,
    ) -> Option<Arc<Job>> {
        self.jobs().into_iter().rev().find(|job| {
            matches!(&job.kind, JobKind::Install(install)
                if install.plugin.name == name
                    && install.plugin.source_id == source_id)
        })
    }

    pub fn connection_check_job(&self, site_id: &str) -> Option<Arc<Job>> {
        self.jobs().into_iter().find(|job| {
            matches!(job.kind, JobKind::ConnectionCheck(_))
                && job.site_id.as_deref() == Some(site_id)
        })
    }

    pub fn requires_restart(&self) -> bool {
        self.inner.requires_restart.load(Ordering::SeqCst)
    }

    /// Whether a restart is pending or underway.
    pub fn is_restart_scheduled(&self) -> bool {
        self.jobs().iter().any(|job| {
            matches!(job.kind, JobKind::Restart(_))
                && matches!(
                    job.status(),
                    JobStatus::Pending | JobStatus::Running
                )
        })
    }

    /// Whether a core backup exists next to the live binary.
    pub fn is_downgradable(&self) -> bool {
        core_backup_path(&self.inner.lifecycle.core_path()).exists()
    }

    /// The core entry offered by the registry when it is newer than the
    /// running controller.
    pub fn core_update_available(&self) -> Option<CoreEntry> {
        let site = self.inner.registry.core_source()?;
        let core = site.data()?.core.clone()?;
        is_newer_than(&core.version, &self.inner.config.controller_version)
            .then_some(core)
    }

    // ---
    // Status surface
    // ---

    /// Connection status of one site, scheduling a check if none has run.
    ///
    /// A site stuck with every channel `FAILED` gets one inline re-probe; if
    /// that clears it, a metadata refresh of all sites is kicked off since
    /// we were evidently offline when they last tried.
    pub async fn connection_status(
        &self,
        site_id: Option<&str>,
    ) -> Result<ConnectionStates, StatusError> {
        let site_id = match site_id {
            None | Some("default") => {
                self.inner.config.default_site_id.as_str()
            }
            Some(other) => other,
        };

        let job = match self.connection_check_job(site_id) {
            Some(job) => job,
            None => {
                if self.inner.registry.get(site_id).is_none() {
                    return Err(StatusError::UnknownSite {
                        id: site_id.to_string(),
                    });
                }
                let inner = &self.inner;
                let mut state = inner.state.lock().unwrap();
                ensure_connection_check_locked(inner, &mut state, site_id)
            }
        };

        let JobKind::ConnectionCheck(check) = &job.kind else {
            unreachable!("connection_check_job only returns check jobs");
        };

        let states = check.states();
        if states.internet == ConnectionState::Failed
            && states.updatesite == ConnectionState::Failed
        {
            run_connection_check(&self.inner, &job, check).await;
            let states = check.states();
            if states.internet != ConnectionState::Failed
                && states.updatesite != ConnectionState::Failed
            {
                let center = self.clone();
                tokio::spawn(async move {
                    center.update_all_sites().await;
                });
            }
            return Ok(states);
        }
        Ok(states)
    }

    /// Install status of all install jobs, optionally one correlation group.
    pub fn install_status(
        &self,
        correlation_id: Option<Uuid>,
    ) -> InstallStatusResponse {
        let state = if self.requires_restart() {
            "RESTART_REQUIRED"
        } else {
            "RUNNING"
        };
        let jobs = self
            .jobs()
            .into_iter()
            .filter_map(|job| {
                let JobKind::Install(install) = &job.kind else {
                    return None;
                };
                if let Some(wanted) = correlation_id {
                    if job.correlation_id() != Some(wanted) {
                        return None;
                    }
                }
                let status = job.status();
                Some(InstallJobSummary {
                    name: install.plugin.name.clone(),
                    version: install.plugin.version.clone(),
                    title: install.plugin.display_name().to_string(),
                    install_status: status.kind().to_string(),
                    requires_restart: status.requires_restart(),
                    correlation_id: job.correlation_id(),
                })
            })
            .collect();
        InstallStatusResponse { state: state.to_string(), jobs }
    }

    /// Statuses persisted by a previous process that shut down mid-install.
    pub fn incomplete_install_status(&self) -> BTreeMap<String, String> {
        self.inner.resume.load()
    }

    /// Ordered projection of the site registry.
    pub fn site_summaries(&self) -> Vec<SiteSummary> {
        self.inner
            .registry
            .sites()
            .iter()
            .map(|site| SiteSummary {
                id: site.id().to_string(),
                url: site.url().to_string(),
                data_timestamp: site.data_timestamp(),
            })
            .collect()
    }

    /// Invalidate every site's cached catalog.
    pub fn invalidate_data(&self) {
        self.inner.registry.invalidate_all();
    }

    /// Refresh all sites now.
    pub async fn update_all_sites(&self) -> Vec<SiteRefreshResult> {
        self.inner
            .registry
            .update_all_sites(
                &self.inner.fetcher,
                self.inner.config.signature_check,
            )
            .await
    }

    /// Merged availables across sites.
    pub fn availables(&self) -> Vec<PluginEntry> {
        self.inner.registry.availables(&*self.inner.runtime)
    }

    /// Merged updates across sites.
    pub fn updates(&self) -> Vec<PluginEntry> {
        self.inner.registry.updates(&*self.inner.runtime)
    }

    /// Write the resume store out now, e.g. on graceful shutdown.
    pub fn persist_install_status(&self) {
        persist_install_status(&self.inner);
    }
}

/// First job for a site must be its connection check; returns the existing
/// one after that. Call with the state lock held.
fn ensure_connection_check_locked(
    inner: &Inner,
    state: &mut CenterState,
    site_id: &str,
) -> Arc<Job> {
    if state.sources_used.insert(site_id.to_string()) {
        let job = Arc::new(Job::new(
            inner.next_id(),
            Some(site_id.to_string()),
            JobKind::ConnectionCheck(ConnectionCheckJob::new()),
        ));
        state.jobs.push(Arc::clone(&job));
        _ = inner.job_tx.send(Arc::clone(&job));
        job
    } else {
        state
            .jobs
            .iter()
            .find(|job| {
                matches!(job.kind, JobKind::ConnectionCheck(_))
                    && job.site_id.as_deref() == Some(site_id)
            })
            .cloned()
            .expect("a used source always has a connection check job")
    }
}

async fn installer_worker(
    inner: Weak<Inner>,
    mut job_rx: mpsc::UnboundedReceiver<Arc<Job>>,
) {
    while let Some(job) = job_rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        run_job(&inner, &job).await;
    }
}

async fn run_job(inner: &Arc<Inner>, job: &Arc<Job>) {
    slog::debug!(
        inner.log, "running job";
        "id" => job.id,
        "kind" => job.kind.name(),
    );
    match &job.kind {
        JobKind::ConnectionCheck(check) => {
            run_connection_check(inner, job, check).await;
        }
        JobKind::Install(install) => run_install(inner, job, install).await,
        JobKind::Enable(enable) => run_enable(inner, job, enable),
        JobKind::NoOp { .. } => job.set_status(JobStatus::Success),
        JobKind::PluginDowngrade(downgrade) => {
            run_plugin_downgrade(inner, job, downgrade);
        }
        JobKind::CoreUpgrade => run_core_upgrade(inner, job).await,
        JobKind::CoreDowngrade => run_core_downgrade(inner, job),
        JobKind::CompleteBatch(batch) => run_complete_batch(inner, job, batch),
        JobKind::Restart(restart) => run_restart(inner, job, restart),
    }
}

async fn run_connection_check(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
    check: &ConnectionCheckJob,
) {
    {
        let mut states = check.states.lock().unwrap();
        states.internet = ConnectionState::Unchecked;
        states.updatesite = ConnectionState::Unchecked;
    }

    let Some(site_id) = job.site_id.as_deref() else {
        job.set_status(JobStatus::Success);
        return;
    };
    if site_id == ID_UPLOAD {
        job.set_status(JobStatus::Success);
        return;
    }
    let Some(site) = inner.registry.get(site_id) else {
        job.set_error(format!("update site '{site_id}' no longer exists"));
        job.set_status(JobStatus::Failure {
            message: format!("update site '{site_id}' no longer exists"),
        });
        return;
    };

    job.set_status(JobStatus::Running);
    slog::debug!(inner.log, "doing a connectivity check"; "site" => site_id);

    // The internet probe runs concurrently on the shared runtime; the
    // update-site probe runs inline below.
    let internet_probe = match site.connection_check_url() {
        Some(url) => {
            check.states.lock().unwrap().internet = ConnectionState::Checking;
            check
                .statuses
                .lock()
                .unwrap()
                .push("Checking internet connectivity".to_string());
            let job = Arc::clone(job);
            let fetcher = inner.fetcher.clone();
            Some(tokio::spawn(async move {
                let result = fetcher.probe(&url).await;
                let JobKind::ConnectionCheck(check) = &job.kind else {
                    return;
                };
                match result {
                    Ok(()) => {
                        check.states.lock().unwrap().internet =
                            ConnectionState::Ok;
                    }
                    Err(err) => {
                        check.states.lock().unwrap().internet =
                            ConnectionState::Failed;
                        check.statuses.lock().unwrap().push(format!(
                            "Failed to connect to {url}: {}",
                            DisplayErrorChain::new(&err)
                        ));
                    }
                }
            }))
        }
        None => {
            slog::warn!(
                inner.log,
                "update site '{site_id}' does not declare a connection check \
                 URL, skipping the network availability check"
            );
            check.states.lock().unwrap().internet = ConnectionState::Skipped;
            None
        }
    };

    check.states.lock().unwrap().updatesite = ConnectionState::Checking;
    check
        .statuses
        .lock()
        .unwrap()
        .push("Checking update center connectivity".to_string());

    let probe_url = connection_check_probe_url(site.url());
    match inner.fetcher.probe(&probe_url).await {
        Ok(()) => {
            check.states.lock().unwrap().updatesite = ConnectionState::Ok;
            check.statuses.lock().unwrap().push("Success".to_string());
        }
        Err(err) => {
            check.states.lock().unwrap().updatesite = ConnectionState::Failed;
            let message = if err.is_unknown_host() {
                format!(
                    "{err}: host name could not be resolved, check DNS and \
                     proxy configuration"
                )
            } else {
                DisplayErrorChain::new(&err).to_string()
            };
            check.statuses.lock().unwrap().push(message.clone());
            job.set_error(message);
        }
    }

    if let Some(probe) = internet_probe {
        if let Err(err) = probe.await {
            slog::warn!(
                inner.log,
                "error completing internet connectivity check: {err}"
            );
        }
    }

    let states = check.states();
    if states.updatesite == ConnectionState::Failed
        || states.internet == ConnectionState::Failed
    {
        job.set_status(JobStatus::Failure {
            message: "connectivity check failed".to_string(),
        });
    } else {
        job.set_status(JobStatus::Success);
    }
}

async fn run_install(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
    install: &InstallationJob,
) {
    let plugin = &install.plugin;
    slog::info!(
        inner.log, "starting installation";
        "plugin" => plugin.name.as_str(),
        "version" => plugin.version.as_str(),
    );

    // An identical-version install scheduled earlier wins; wait for each
    // and skip our own download if any of them worked.
    for earlier in earlier_duplicates(inner, job, plugin) {
        slog::debug!(
            inner.log,
            "waiting for earlier install of {}@{}",
            plugin.name,
            plugin.version,
        );
        let status = earlier.wait_terminal().await;
        if status.is_installed() {
            slog::info!(
                inner.log,
                "skipping duplicate install of {}@{}",
                plugin.name,
                plugin.version,
            );
            job.set_status(JobStatus::Skipped);
            persist_install_status(inner);
            return;
        }
    }

    job.set_status(JobStatus::Installing { percentage: None });
    persist_install_status(inner);

    match perform_install(inner, job, install).await {
        Ok(InstallOutcome::Success) => {
            slog::info!(inner.log, "installation successful"; "plugin" => plugin.name.as_str());
            job.set_status(JobStatus::Success);
        }
        Ok(InstallOutcome::RestartRequired(message)) => {
            inner.requires_restart.store(true, Ordering::SeqCst);
            job.set_status(JobStatus::SuccessButRequiresRestart { message });
        }
        Err(err) => {
            let message = DisplayErrorChain::new(&err).to_string();
            slog::error!(
                inner.log, "failed to install";
                "plugin" => plugin.name.as_str(),
                "err" => message.as_str(),
            );
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
        }
    }
    persist_install_status(inner);
}

enum InstallOutcome {
    Success,
    RestartRequired(String),
}

async fn perform_install(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
    install: &InstallationJob,
) -> Result<InstallOutcome, JobError> {
    let plugin = &install.plugin;

    let batch = install.batch.as_deref().unwrap_or(&[]);
    let missing: Vec<String> = plugin
        .dependencies
        .iter()
        .filter(|dep| !dep.optional)
        .filter(|dep| {
            inner.runtime.installed_plugin(&dep.name).is_none()
                && !batch.iter().any(|name| name == &dep.name)
        })
        .map(|dep| dep.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(JobError::MissingDependency {
            plugin: plugin.name.clone(),
            dependencies: missing,
        });
    }

    if plugin.url.is_empty() {
        return Err(JobError::NoDownloadUrl { plugin: plugin.name.clone() });
    }
    if reqwest::Url::parse(&plugin.url).is_err() {
        return Err(JobError::RelativeUrl {
            plugin: plugin.name.clone(),
            url: plugin.url.clone(),
        });
    }

    let dest =
        inner.runtime.plugin_dir().join(format!("{}.jpi", plugin.name));
    let tmp = Utf8PathBuf::from(format!("{dest}.tmp"));

    let download = inner
        .fetcher
        .download(
            &plugin.url,
            &tmp,
            inner.config.plugin_download_read_timeout,
            |percentage| {
                job.set_status(JobStatus::Installing { percentage });
            },
        )
        .await
        .inspect_err(|_| discard(&tmp))?;

    *install.computed.lock().unwrap() = Some(download.checksums.clone());

    // Manually uploaded files have nothing published to verify against.
    if job.site_id.as_deref() != Some(ID_UPLOAD) {
        verify_checksums(
            &inner.log,
            &plugin.expected_checksums(),
            &download.checksums,
            &tmp,
        )
        .inspect_err(|_| discard(&tmp))?;
    }

    replace_plugin_file(&dest, &tmp)?;

    // A bundled plugin that the user deliberately replaced must survive the
    // next core upgrade.
    if let Some(installed) = inner.runtime.installed_plugin(&plugin.name) {
        if installed.bundled {
            if let Err(err) = inner.runtime.pin_plugin(&plugin.name) {
                slog::warn!(
                    inner.log, "failed to pin bundled plugin";
                    "plugin" => plugin.name.as_str(),
                    "err" => %err,
                );
            }
        }
    }

    if install.dynamic_load {
        match inner.runtime.dynamic_load(&dest, false, install.batch.as_deref())
        {
            Ok(()) => Ok(InstallOutcome::Success),
            Err(DynamicLoadError::RestartRequired(message)) => {
                Ok(InstallOutcome::RestartRequired(message))
            }
            Err(DynamicLoadError::Other(err)) => Err(JobError::Runtime(
                err.context("failed to dynamically deploy this plugin"),
            )),
        }
    } else {
        Ok(InstallOutcome::RestartRequired(
            "downloaded successfully, will take effect after a restart"
                .to_string(),
        ))
    }
}

/// Install jobs for the same `(name, version)` scheduled before `job`,
/// oldest first.
fn earlier_duplicates(
    inner: &Inner,
    job: &Arc<Job>,
    plugin: &PluginEntry,
) -> Vec<Arc<Job>> {
    let state = inner.state.lock().unwrap();
    state
        .jobs
        .iter()
        .take_while(|other| other.id != job.id)
        .filter(|other| {
            matches!(&other.kind, JobKind::Install(other_install)
                if other_install.plugin.name == plugin.name
                    && other_install.plugin.version == plugin.version)
        })
        .cloned()
        .collect()
}

/// Rotate the active plugin file aside and move the downloaded file in.
///
/// Any pre-existing `.bak` is deleted first; the legacy `.hpi`, then the
/// active `.jpi`, is rotated to `.bak`. Failures before the final rename are
/// tolerable; the final rename is the atomic commit point.
fn replace_plugin_file(dest: &Utf8Path, src: &Utf8Path) -> Result<(), JobError> {
    let bak = dest.with_extension("bak");
    let legacy = dest.with_extension("hpi");

    _ = std::fs::remove_file(&bak);
    if legacy.exists() && std::fs::rename(&legacy, &bak).is_err() {
        _ = std::fs::remove_file(&legacy);
    }
    if dest.exists() && std::fs::rename(dest, &bak).is_err() {
        _ = std::fs::remove_file(dest);
    }

    std::fs::rename(src, dest).map_err(|source| JobError::Replace {
        from: src.to_owned(),
        to: dest.to_owned(),
        source,
    })
}

fn discard(tmp: &Utf8Path) {
    _ = std::fs::remove_file(tmp);
}

fn run_enable(inner: &Arc<Inner>, job: &Arc<Job>, enable: &EnableJob) {
    job.set_status(JobStatus::Running);
    let plugin = &enable.plugin;

    let Some(installed) = inner.runtime.installed_plugin(&plugin.name) else {
        let message = format!("plugin '{}' is not installed", plugin.name);
        job.set_error(message.clone());
        job.set_status(JobStatus::Failure { message });
        return;
    };

    if installed.enabled {
        job.set_status(JobStatus::Success);
        return;
    }

    if let Err(err) = inner.runtime.enable_plugin(&plugin.name) {
        let message = format!("failed to enable '{}': {err:#}", plugin.name);
        slog::error!(inner.log, "{message}");
        job.set_error(message.clone());
        job.set_status(JobStatus::Failure { message });
        return;
    }

    if enable.dynamic_load {
        let dest =
            inner.runtime.plugin_dir().join(format!("{}.jpi", plugin.name));
        // Strict load: the previously disabled copy must be replaced.
        if let Err(err) = inner.runtime.dynamic_load(&dest, true, None) {
            let message =
                format!("failed to dynamically load '{}': {err:#}", plugin.name);
            slog::error!(inner.log, "{message}");
            inner.requires_restart.store(true, Ordering::SeqCst);
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
            return;
        }
    } else {
        inner.requires_restart.store(true, Ordering::SeqCst);
    }
    job.set_status(JobStatus::Success);
}

fn run_plugin_downgrade(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
    downgrade: &PluginDowngradeJob,
) {
    let plugin = &downgrade.plugin;
    slog::info!(inner.log, "starting downgrade"; "plugin" => plugin.name.as_str());
    job.set_status(JobStatus::Running);

    let plugin_dir = inner.runtime.plugin_dir();
    let legacy = plugin_dir.join(format!("{}.hpi", plugin.name));
    let dest = if legacy.exists() {
        legacy
    } else {
        plugin_dir.join(format!("{}.jpi", plugin.name))
    };
    let backup = plugin_dir.join(format!("{}.bak", plugin.name));

    let result = (|| {
        if !backup.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup {backup} does not exist"),
            ));
        }
        _ = std::fs::remove_file(&dest);
        std::fs::rename(&backup, &dest)
    })();

    match result {
        Ok(()) => {
            slog::info!(inner.log, "downgrade successful"; "plugin" => plugin.name.as_str());
            job.set_status(JobStatus::Success);
        }
        Err(err) => {
            let message = format!("failed to downgrade '{}': {err}", plugin.name);
            slog::error!(inner.log, "{message}");
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
        }
    }
}

async fn run_core_upgrade(inner: &Arc<Inner>, job: &Arc<Job>) {
    job.set_status(JobStatus::Running);

    let result = perform_core_upgrade(inner, job).await;
    match result {
        Ok(()) => {
            inner.requires_restart.store(true, Ordering::SeqCst);
            job.set_status(JobStatus::SuccessButRequiresRestart {
                message: "core upgrade staged, restart to take effect"
                    .to_string(),
            });
        }
        Err(err) => {
            let message = DisplayErrorChain::new(&err).to_string();
            slog::error!(inner.log, "failed to upgrade core"; "err" => message.as_str());
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
        }
    }
}

async fn perform_core_upgrade(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
) -> Result<(), JobError> {
    let core = job
        .site_id
        .as_deref()
        .and_then(|id| inner.registry.get(id))
        .and_then(|site| site.data())
        .and_then(|data| data.core.clone())
        .ok_or(JobError::NoCoreSource)?;

    if !inner.lifecycle.can_rewrite_core() {
        return Err(JobError::CoreRewriteUnsupported);
    }

    let dest = inner.lifecycle.core_path();
    let tmp = Utf8PathBuf::from(format!("{dest}.tmp"));

    let download = inner
        .fetcher
        .download(
            &core.url,
            &tmp,
            inner.config.plugin_download_read_timeout,
            |percentage| {
                job.set_status(JobStatus::Installing { percentage });
            },
        )
        .await
        .inspect_err(|_| discard(&tmp))?;

    verify_checksums(
        &inner.log,
        &core.expected_checksums(),
        &download.checksums,
        &tmp,
    )
    .inspect_err(|_| discard(&tmp))?;

    inner
        .lifecycle
        .rewrite_core(&tmp)
        .map_err(|err| JobError::Runtime(err.context("failed to stage core")))
        .inspect_err(|_| discard(&tmp))
}

fn run_core_downgrade(inner: &Arc<Inner>, job: &Arc<Job>) {
    job.set_status(JobStatus::Running);

    let backup = core_backup_path(&inner.lifecycle.core_path());
    let result = if backup.exists() {
        // The backup goes to the lifecycle unvalidated; it is whatever the
        // previous upgrade rotated aside.
        inner.lifecycle.rewrite_core(&backup)
    } else {
        Err(anyhow::Error::from(JobError::NoCoreBackup))
    };

    match result {
        Ok(()) => {
            inner.requires_restart.store(true, Ordering::SeqCst);
            job.set_status(JobStatus::SuccessButRequiresRestart {
                message: "core downgrade staged, restart to take effect"
                    .to_string(),
            });
        }
        Err(err) => {
            let message = format!("failed to downgrade core: {err:#}");
            slog::error!(inner.log, "{message}");
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
        }
    }
}

fn run_complete_batch(
    inner: &Arc<Inner>,
    job: &Arc<Job>,
    batch: &CompleteBatchJob,
) {
    slog::info!(inner.log, "completing plugin batch");
    job.set_status(JobStatus::Running);
    match inner.runtime.start_batch(&batch.batch) {
        Ok(()) => {
            slog::info!(
                inner.log,
                "completed installation of {} plugins in {:?}",
                batch.batch.len(),
                batch.started.elapsed(),
            );
            job.set_status(JobStatus::Success);
        }
        Err(err) => {
            let message = format!("failed to start some plugins: {err:#}");
            slog::warn!(inner.log, "{message}");
            job.set_error(message.clone());
            job.set_status(JobStatus::Failure { message });
        }
    }
}

fn run_restart(inner: &Arc<Inner>, job: &Arc<Job>, restart: &RestartJob) {
    // Canceled while pending in the queue.
    if !matches!(job.status(), JobStatus::Pending) {
        return;
    }
    job.set_status(JobStatus::Running);
    if let Err(err) = inner.lifecycle.safe_restart(&restart.authentication) {
        job.set_error(err.to_string());
        job.set_status(JobStatus::Failure { message: err.to_string() });
    }
    // On success the job stays Running until the process goes down.
}

fn persist_install_status(inner: &Inner) {
    let jobs = inner.state.lock().unwrap().jobs.clone();

    let mut statuses = BTreeMap::new();
    let mut active_installs = false;
    for job in &jobs {
        let JobKind::Install(install) = &job.kind else { continue };
        let status = job.status();
        if !status.is_success() {
            active_installs = true;
        }
        statuses
            .insert(install.plugin.name.clone(), status.kind().to_string());
    }

    if active_installs {
        inner.resume.persist(&statuses);
    } else {
        inner.resume.clear();
    }
}

fn core_backup_path(core_path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{core_path}.bak"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::registry::SiteRegistry;
    use crate::runtime::{
        FileLifecycle, InMemoryPluginRuntime, InstalledPlugin,
    };
    use crate::site::AcceptAllValidator;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct TestCenter {
        center: UpdateCenter,
        runtime: Arc<InMemoryPluginRuntime>,
        lifecycle: Arc<FileLifecycle>,
        // Keeps the scratch home alive for the duration of the test.
        _dir: camino_tempfile::Utf8TempDir,
    }

    fn new_center() -> TestCenter {
        let dir = camino_tempfile::tempdir().unwrap();
        let config = UpdateCenterConfig::new(dir.path());
        let registry = SiteRegistry::load(
            &config,
            Arc::new(AcceptAllValidator),
            &log(),
        )
        .unwrap();
        let runtime = Arc::new(InMemoryPluginRuntime::new(config.plugin_dir()));
        let core_path = dir.path().join("controller.bin");
        std::fs::write(&core_path, b"core-v1").unwrap();
        let lifecycle = Arc::new(FileLifecycle::new(core_path));
        let center = UpdateCenter::new(
            config,
            registry,
            runtime.clone(),
            lifecycle.clone(),
            &log(),
        )
        .unwrap();
        TestCenter { center, runtime, lifecycle, _dir: dir }
    }

    // Plugins sourced from a site that is not registered: the connection
    // check fails fast without touching the network.
    fn plugin(name: &str, version: &str) -> PluginEntry {
        PluginEntry {
            name: name.to_string(),
            version: version.to_string(),
            title: None,
            categories: Vec::new(),
            url: format!("https://plugins.example.test/{name}.jpi"),
            sha1: None,
            sha256: None,
            sha512: None,
            dependencies: Vec::new(),
            source_id: "local".to_string(),
        }
    }

    #[tokio::test]
    async fn connection_check_precedes_all_jobs_for_a_site() {
        let t = new_center();
        let first = t.center.note_already_installed(plugin("git", "1.0"));
        let second = t.center.note_already_installed(plugin("ws", "2.0"));

        let jobs = t.center.jobs();
        assert_eq!(jobs.len(), 3);
        assert!(matches!(jobs[0].kind, JobKind::ConnectionCheck(_)));
        assert_eq!(jobs[0].site_id.as_deref(), Some("local"));
        assert_eq!(jobs[1].id, first.id);
        assert_eq!(jobs[2].id, second.id);

        // Exactly one check exists per site regardless of how many jobs it
        // hosts.
        let checks = jobs
            .iter()
            .filter(|job| matches!(job.kind, JobKind::ConnectionCheck(_)))
            .count();
        assert_eq!(checks, 1);
    }

    #[tokio::test]
    async fn upload_site_connection_check_is_a_no_op() {
        let t = new_center();
        let mut entry = plugin("manual", "1.0");
        entry.source_id = ID_UPLOAD.to_string();
        let job = t.center.note_already_installed(entry);
        job.wait_terminal().await;

        let check = t.center.connection_check_job(ID_UPLOAD).unwrap();
        assert_eq!(check.wait_terminal().await.kind(), "Success");
        let JobKind::ConnectionCheck(check) = &check.kind else {
            unreachable!()
        };
        let states = check.states();
        assert_eq!(states.internet, ConnectionState::Unchecked);
        assert_eq!(states.updatesite, ConnectionState::Unchecked);
    }

    #[tokio::test]
    async fn no_op_job_succeeds_immediately() {
        let t = new_center();
        let job = t.center.note_already_installed(plugin("git", "1.0"));
        assert_eq!(job.wait_terminal().await.kind(), "Success");
        assert!(!t.center.requires_restart());
    }

    #[tokio::test]
    async fn second_restart_request_returns_the_existing_job() {
        let t = new_center();
        let first = t.center.schedule_restart("admin");
        assert!(t.center.is_restart_scheduled());
        let second = t.center.schedule_restart("someone-else");
        assert_eq!(first.id, second.id);

        let restarts = t
            .center
            .jobs()
            .iter()
            .filter(|job| matches!(job.kind, JobKind::Restart(_)))
            .count();
        assert_eq!(restarts, 1);
    }

    #[tokio::test]
    async fn cancel_restart_only_affects_pending_jobs() {
        let t = new_center();
        // No await between scheduling and canceling: the single-threaded
        // test runtime has not let the worker touch the job yet.
        let job = t.center.schedule_restart("admin");
        assert!(t.center.cancel_restarts());
        assert_eq!(job.status().kind(), "Canceled");
        assert!(!t.center.is_restart_scheduled());
        assert!(!t.center.cancel_restarts());

        // The worker skips the canceled job; the lifecycle never restarts.
        job.wait_terminal().await;
        assert!(t.lifecycle.restarts().is_empty());
    }

    #[tokio::test]
    async fn restart_runs_under_the_enqueuing_identity() {
        let t = new_center();
        let job = t.center.schedule_restart("alice");
        // Running is not terminal; poll the lifecycle instead.
        let mut rx = job.status_rx();
        while !matches!(job.status(), JobStatus::Running) {
            rx.changed().await.unwrap();
        }
        assert_eq!(t.lifecycle.restarts(), vec!["alice".to_string()]);
        assert!(t.center.is_restart_scheduled());
    }

    #[tokio::test]
    async fn enable_job_enables_and_flags_restart() {
        let t = new_center();
        t.runtime.insert_plugin(InstalledPlugin {
            name: "git".to_string(),
            version: "1.0".to_string(),
            enabled: false,
            bundled: false,
        });

        let job = t.center.enable_plugin(plugin("git", "1.0"), false);
        assert_eq!(job.wait_terminal().await.kind(), "Success");
        assert!(t.runtime.installed_plugin("git").unwrap().enabled);
        assert!(t.center.requires_restart());
    }

    #[tokio::test]
    async fn enable_job_on_missing_plugin_fails() {
        let t = new_center();
        let job = t.center.enable_plugin(plugin("absent", "1.0"), false);
        let status = job.wait_terminal().await;
        assert_eq!(status.kind(), "Failure");
        assert!(job.error_message().unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn install_rejects_relative_urls_without_touching_disk() {
        let t = new_center();
        let mut entry = plugin("git", "1.0");
        entry.url = "plugins/git.jpi".to_string();
        let job = t.center.install_plugin(entry, false, None, None);
        assert_eq!(job.wait_terminal().await.kind(), "Failure");
        assert!(!t.center.config().plugin_dir().join("git.jpi").exists());
    }

    #[tokio::test]
    async fn install_rejects_missing_dependencies() {
        let t = new_center();
        let mut entry = plugin("git", "1.0");
        entry.dependencies = vec![crate::site::PluginDependency {
            name: "credentials".to_string(),
            version: None,
            optional: false,
        }];
        let job = t.center.install_plugin(entry, false, None, None);
        let status = job.wait_terminal().await;
        assert_eq!(status.kind(), "Failure");
        assert!(job.error_message().unwrap().contains("credentials"));
    }

    #[tokio::test]
    async fn optional_and_batched_dependencies_are_not_missing() {
        let t = new_center();
        let mut entry = plugin("git", "1.0");
        entry.url = "not a url".to_string();
        entry.dependencies = vec![
            crate::site::PluginDependency {
                name: "optional-dep".to_string(),
                version: None,
                optional: true,
            },
            crate::site::PluginDependency {
                name: "sibling".to_string(),
                version: None,
                optional: false,
            },
        ];
        let job = t.center.install_plugin(
            entry,
            false,
            None,
            Some(vec!["git".to_string(), "sibling".to_string()]),
        );
        // Fails on the URL, not on dependencies: both were satisfiable.
        let status = job.wait_terminal().await;
        assert_eq!(status.kind(), "Failure");
        let message = job.error_message().unwrap();
        assert!(message.contains("not absolute"), "message: {message}");
    }

    #[tokio::test]
    async fn failed_install_is_recorded_for_resume() {
        let t = new_center();
        let mut entry = plugin("git", "1.0");
        entry.url = "nowhere".to_string();
        let job = t.center.install_plugin(entry, false, None, None);
        job.wait_terminal().await;

        let statuses = t.center.incomplete_install_status();
        assert_eq!(statuses.get("git").map(String::as_str), Some("Failure"));
    }

    #[tokio::test]
    async fn plugin_downgrade_restores_the_backup() {
        let t = new_center();
        let plugin_dir = t.center.config().plugin_dir();
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("git.jpi"), b"new version").unwrap();
        std::fs::write(plugin_dir.join("git.bak"), b"old version").unwrap();

        let job = t.center.downgrade_plugin(plugin("git", "0.9"));
        assert_eq!(job.wait_terminal().await.kind(), "Success");
        assert_eq!(
            std::fs::read(plugin_dir.join("git.jpi")).unwrap(),
            b"old version"
        );
        assert!(!plugin_dir.join("git.bak").exists());
    }

    #[tokio::test]
    async fn plugin_downgrade_without_backup_fails() {
        let t = new_center();
        let job = t.center.downgrade_plugin(plugin("git", "0.9"));
        assert_eq!(job.wait_terminal().await.kind(), "Failure");
    }

    #[tokio::test]
    async fn core_downgrade_requires_a_backup() {
        let t = new_center();
        assert!(!t.center.is_downgradable());
        assert!(matches!(
            t.center.downgrade_core(),
            Err(JobError::NoCoreBackup)
        ));
    }

    #[tokio::test]
    async fn core_downgrade_stages_the_backup_and_requires_restart() {
        let t = new_center();
        let core_path = t.lifecycle.core_path();
        std::fs::write(format!("{core_path}.bak"), b"core-v0").unwrap();
        assert!(t.center.is_downgradable());

        let job = t.center.downgrade_core().unwrap();
        let status = job.wait_terminal().await;
        assert_eq!(status.kind(), "SuccessButRequiresRestart");
        assert!(t.center.requires_restart());
        assert_eq!(std::fs::read(&core_path).unwrap(), b"core-v0");
    }

    #[tokio::test]
    async fn core_upgrade_needs_a_core_source() {
        let t = new_center();
        assert!(matches!(
            t.center.upgrade_core(),
            Err(JobError::NoCoreSource)
        ));
    }

    #[tokio::test]
    async fn requires_restart_is_monotonic() {
        let t = new_center();
        assert!(!t.center.requires_restart());
        t.runtime.insert_plugin(InstalledPlugin {
            name: "git".to_string(),
            version: "1.0".to_string(),
            enabled: false,
            bundled: false,
        });
        let job = t.center.enable_plugin(plugin("git", "1.0"), false);
        job.wait_terminal().await;
        assert!(t.center.requires_restart());

        // Nothing un-sets it, even jobs that succeed without a restart.
        let job = t.center.note_already_installed(plugin("other", "1.0"));
        job.wait_terminal().await;
        assert!(t.center.requires_restart());
    }

    #[tokio::test]
    async fn install_status_filters_by_correlation_id() {
        let t = new_center();
        let wave = Uuid::new_v4();
        let mut entry = plugin("git", "1.0");
        entry.url = "nowhere".to_string();
        t.center.install_plugin(entry, false, Some(wave), None);
        let mut other = plugin("ws", "2.0");
        other.url = "nowhere".to_string();
        let unrelated = t.center.install_plugin(other, false, None, None);
        unrelated.wait_terminal().await;

        let all = t.center.install_status(None);
        assert_eq!(all.jobs.len(), 2);

        let filtered = t.center.install_status(Some(wave));
        assert_eq!(filtered.jobs.len(), 1);
        assert_eq!(filtered.jobs[0].name, "git");
        assert_eq!(filtered.jobs[0].correlation_id, Some(wave));

        let none = t.center.install_status(Some(Uuid::new_v4()));
        assert!(none.jobs.is_empty());
    }

    #[tokio::test]
    async fn complete_batch_starts_the_wave() {
        let t = new_center();
        let wave = Uuid::new_v4();
        let job = t.center.complete_batch(
            vec!["git".to_string(), "credentials".to_string()],
            Instant::now(),
            wave,
        );
        assert_eq!(job.wait_terminal().await.kind(), "Success");
        assert_eq!(
            t.runtime.started_batches(),
            vec![vec!["git".to_string(), "credentials".to_string()]]
        );
        assert_eq!(job.correlation_id(), Some(wave));
    }

    #[tokio::test]
    async fn unknown_site_connection_status_is_an_error() {
        let t = new_center();
        let err =
            t.center.connection_status(Some("nonexistent")).await.unwrap_err();
        assert!(matches!(err, StatusError::UnknownSite { .. }));
        // No job was created for the unknown site.
        assert!(t.center.connection_check_job("nonexistent").is_none());
    }

    #[tokio::test]
    async fn job_lookup_by_id_and_plugin() {
        let t = new_center();
        let job = t.center.note_already_installed(plugin("git", "1.0"));
        assert_eq!(t.center.job(job.id).unwrap().id, job.id);
        assert!(t.center.job(9999).is_none());

        let mut entry = plugin("git", "1.0");
        entry.url = "nowhere".to_string();
        let install = t.center.install_plugin(entry, false, None, None);
        let found = t.center.latest_install_job("git", "local").unwrap();
        assert_eq!(found.id, install.id);
        assert!(t.center.latest_install_job("git", "default").is_none());
    }
}
