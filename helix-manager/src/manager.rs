//! Orchestration loop
//!
//! Polls the job store, asks the state machine what each job needs, drives
//! the connector, and commits transitions. One cycle is one full pass; a
//! job is owned by exactly one task for the duration of a cycle, and the
//! cycle awaits every task before the next pass begins.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use helix_connector::{Connector, ConnectorError, JobSpec};
use helix_core::{Job, JobEvent, JobStatus};

use crate::config::Config;
use crate::notify::Notifier;
use crate::results;
use crate::state::{self, FailureDecision, PollDecision, Step};
use crate::store::{JobStore, JobUpdate, StoreError};

/// Outcome of a store commit attempt.
enum Commit {
    Applied,
    /// Another manager process claimed the row; abandon the job for this
    /// cycle and re-read next cycle.
    Conflict,
}

#[derive(Clone)]
pub struct JobManager {
    config: Arc<Config>,
    store: Arc<dyn JobStore>,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    semaphore: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_ops));
        Self {
            config: Arc::new(config),
            store,
            connector,
            notifier,
            semaphore,
        }
    }

    /// Runs cycles until shutdown is requested, then drains: the cycle in
    /// flight completes all its connector calls before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            connector = self.connector.name(),
            interval = ?self.config.poll_interval,
            dry_run = self.config.dry_run,
            "starting job manager loop"
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping after current cycle");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(processed) if processed > 0 => {
                            info!("processed {} job(s) this cycle", processed);
                        }
                        Ok(_) => {}
                        Err(e) => error!("error during poll cycle: {:#}", e),
                    }
                }
            }
        }

        Ok(())
    }

    /// One full pass over the non-terminal jobs. Returns how many were
    /// dispatched.
    pub async fn run_cycle(&self) -> anyhow::Result<usize> {
        let jobs = self.store.list_jobs(&JobStatus::NON_TERMINAL).await?;
        if jobs.is_empty() {
            debug!("no jobs due");
            return Ok(0);
        }

        // Jobs already on the backend are always serviced; jobs that would
        // put a new submission on the backend only while there is headroom.
        let active = jobs.iter().filter(|j| j.status.is_active()).count();
        let mut submission_budget = self.config.max_running_jobs.saturating_sub(active);

        let mut handles = Vec::new();
        for job in jobs {
            let eligible = match job.status {
                JobStatus::Submitted | JobStatus::Running => true,
                JobStatus::New | JobStatus::Staging => {
                    if submission_budget > 0 {
                        submission_budget -= 1;
                        true
                    } else {
                        debug!(job_id = %job.id, "concurrency ceiling reached, deferring");
                        false
                    }
                }
                _ => false,
            };
            if !eligible {
                continue;
            }

            let permit = self.semaphore.clone().acquire_owned().await?;
            let manager = self.clone();
            handles.push(tokio::spawn(async move {
                let job_id = job.id;
                if let Err(e) = manager.process_job(job).await {
                    error!(%job_id, "failed to process job: {:#}", e);
                }
                drop(permit);
            }));
        }

        let dispatched = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("job task panicked: {}", e);
            }
        }

        Ok(dispatched)
    }

    async fn process_job(&self, mut job: Job) -> anyhow::Result<()> {
        debug!(job_id = %job.id, status = %job.status, "processing job");

        match state::required_step(job.status) {
            Step::Done => Ok(()),
            Step::Stage => {
                // Claim the row into Staging before any side effect runs.
                match self
                    .commit(&mut job, JobUpdate::claim().status(JobStatus::Staging))
                    .await?
                {
                    Commit::Applied => {
                        job.status = JobStatus::Staging;
                        self.stage_and_submit(job).await
                    }
                    Commit::Conflict => Ok(()),
                }
            }
            Step::Submit => {
                // The version bump persisted here is what makes submission
                // at-most-once: a second manager reading the same Staging
                // row loses this compare-and-set and never reaches submit.
                match self.commit(&mut job, JobUpdate::claim()).await? {
                    Commit::Applied => self.stage_and_submit(job).await,
                    Commit::Conflict => Ok(()),
                }
            }
            Step::Poll => self.poll(job).await,
        }
    }

    async fn stage_and_submit(&self, mut job: Job) -> anyhow::Result<()> {
        let spec = match self.job_spec(&job) {
            Ok(spec) => spec,
            // The job row itself is unusable; retrying cannot fix it.
            Err(message) => return self.escalate(&mut job, message).await,
        };

        let workdir = match self.connector.prepare_job_environment(&spec).await {
            Ok(workdir) => workdir,
            Err(e) => return self.record_failure(&mut job, e).await,
        };

        let external_id = match self.connector.submit_job(&workdir, &spec).await {
            Ok(id) => id,
            Err(e) => return self.record_failure(&mut job, e).await,
        };

        info!(job_id = %job.id, %external_id, "job submitted");
        let update = JobUpdate::claim()
            .status(JobStatus::Submitted)
            .external_job_id(external_id)
            .retry_count(0);
        self.commit(&mut job, update).await?;
        Ok(())
    }

    async fn poll(&self, mut job: Job) -> anyhow::Result<()> {
        let Some(external_id) = job.external_job_id.clone().filter(|id| !id.is_empty()) else {
            let message = "job is past submission but has no external job id".to_string();
            return self.escalate(&mut job, message).await;
        };

        let backend = match self.connector.get_job_status(&external_id).await {
            Ok(status) => status,
            Err(e) => return self.record_failure(&mut job, e).await,
        };
        debug!(job_id = %job.id, ?backend, "backend status");

        match state::on_poll(
            job.status,
            backend,
            job.retry_count,
            self.config.max_status_retries,
        ) {
            PollDecision::Hold { clear_retries } => {
                if clear_retries {
                    self.commit(&mut job, JobUpdate::claim().retry_count(0))
                        .await?;
                }
                Ok(())
            }
            PollDecision::Start => {
                let update = JobUpdate::claim()
                    .status(JobStatus::Running)
                    .started_at(chrono::Utc::now())
                    .retry_count(0);
                if let Commit::Applied = self.commit(&mut job, update).await? {
                    self.emit(&job, JobEvent::Started, "job is running on the compute resource")
                        .await;
                }
                Ok(())
            }
            PollDecision::Complete => self.finish(job).await,
            PollDecision::Fail => {
                let message =
                    format!("job failed on the compute resource (scheduler id {external_id})");
                let update = JobUpdate::claim()
                    .status(JobStatus::Failed)
                    .completed_at(chrono::Utc::now())
                    .last_error(message.as_str());
                if let Commit::Applied = self.commit(&mut job, update).await? {
                    self.emit(&job, JobEvent::Failed, &message).await;
                }
                Ok(())
            }
            PollDecision::RetryUnknown => {
                let message = format!("scheduler does not recognize job {external_id}");
                warn!(job_id = %job.id, retry_count = job.retry_count + 1, "{message}");
                if !self.config.dry_run {
                    self.store.append_error(job.id, &message).await?;
                }
                Ok(())
            }
            PollDecision::Escalate => {
                let message = format!(
                    "scheduler lost track of job {external_id} after {} status checks",
                    job.retry_count + 1
                );
                self.escalate(&mut job, message).await
            }
        }
    }

    /// Retrieves results and commits the Finished transition together.
    async fn finish(&self, mut job: Job) -> anyhow::Result<()> {
        let workdir = self.connector.workdir(job.id);
        let destination = self.config.results_dir.join(job.id.to_string());

        let manifest = match self
            .connector
            .retrieve_job_results(&workdir, &destination)
            .await
        {
            Ok(manifest) => manifest,
            // State holds; the completed job is still there next cycle and
            // retrieval is retry-safe.
            Err(e) => return self.record_failure(&mut job, e).await,
        };

        let stats = results::parse_stats(&destination).await;
        info!(
            job_id = %job.id,
            files = manifest.files.len(),
            "job finished, results retrieved"
        );

        let update = JobUpdate::claim()
            .status(JobStatus::Finished)
            .completed_at(chrono::Utc::now())
            .retry_count(0)
            .results(stats);
        if let Commit::Applied = self.commit(&mut job, update).await? {
            let detail = format!("results retrieved ({} files)", manifest.files.len());
            self.emit(&job, JobEvent::Finished, &detail).await;
        }
        Ok(())
    }

    /// Applies a connector failure: hold state and record, or give up.
    async fn record_failure(&self, job: &mut Job, err: ConnectorError) -> anyhow::Result<()> {
        warn!(job_id = %job.id, error = %err, "connector operation failed");
        match state::on_connector_failure(
            err.is_recoverable(),
            job.retry_count,
            self.config.max_status_retries,
        ) {
            FailureDecision::Retry => {
                if !self.config.dry_run {
                    self.store.append_error(job.id, &err.to_string()).await?;
                }
                Ok(())
            }
            FailureDecision::Escalate => self.escalate(job, err.to_string()).await,
        }
    }

    /// Terminal local failure: the job is errored and never silently dropped.
    async fn escalate(&self, job: &mut Job, message: String) -> anyhow::Result<()> {
        error!(job_id = %job.id, "giving up on job: {message}");
        let update = JobUpdate::claim()
            .status(JobStatus::Errored)
            .completed_at(chrono::Utc::now())
            .last_error(message.as_str());
        if let Commit::Applied = self.commit(job, update).await? {
            self.emit(job, JobEvent::Failed, &message).await;
        }
        Ok(())
    }

    /// Commits an update against the job's current version, honoring
    /// dry-run mode (no store writes).
    async fn commit(&self, job: &mut Job, update: JobUpdate) -> anyhow::Result<Commit> {
        if self.config.dry_run {
            info!(job_id = %job.id, ?update, "dry run: skipping store update");
            job.version += 1;
            return Ok(Commit::Applied);
        }
        match self.store.update_job(job.id, job.version, update).await {
            Ok(version) => {
                job.version = version;
                Ok(Commit::Applied)
            }
            Err(StoreError::Conflict) => {
                debug!(job_id = %job.id, "row claimed by another manager, abandoning for this cycle");
                Ok(Commit::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort notification; sink failures never affect job state.
    async fn emit(&self, job: &Job, event: JobEvent, detail: &str) {
        if let Err(e) = self.notifier.notify(job.id, event, detail).await {
            warn!(job_id = %job.id, %event, "failed to send notification: {:#}", e);
        }
    }

    /// Builds what the connector needs from the job row.
    fn job_spec(&self, job: &Job) -> Result<JobSpec, String> {
        let mut parameters = job.parameters.clone();
        parameters.insert(
            "job_id".to_string(),
            serde_json::Value::String(job.id.to_string()),
        );

        let input_file = match &job.input_file {
            Some(name) => Some(self.config.input_file_dir.join(name)),
            None if job.job_type.requires_input_file() => {
                return Err(format!(
                    "{} jobs require an input file but none is set",
                    job.job_type
                ));
            }
            None => None,
        };

        Ok(JobSpec {
            job_id: job.id,
            pipeline: job.job_type.pipeline().to_string(),
            parameters,
            input_file,
        })
    }
}
