//! Manager configuration
//!
//! All tunables come from the environment, are validated once at startup,
//! and are then immutable for the life of the process.

use std::path::PathBuf;
use std::time::Duration;

use helix_connector::{ConnectorConfig, SshSettings};

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string for the job store.
    pub database_url: String,

    /// Registered name of the connector to drive jobs with.
    pub connector: String,

    /// When set, connector operations are logged no-ops and no store
    /// writes happen. Used to validate configuration and wiring.
    pub dry_run: bool,

    /// How often the orchestration loop runs a full pass.
    pub poll_interval: Duration,

    /// Ceiling on jobs in Submitted/Running at any time.
    pub max_running_jobs: usize,

    /// Consecutive Unknown status reports tolerated before a job is errored.
    pub max_status_retries: i32,

    /// Bound on concurrent connector operations across jobs.
    pub max_parallel_ops: usize,

    /// Job working-directory root on the local/shared filesystem.
    pub local_job_dir: PathBuf,
    /// Job working-directory root on the remote resource.
    pub remote_job_dir: PathBuf,
    /// Where retrieved results land.
    pub results_dir: PathBuf,
    /// Where intake drops input files referenced by jobs.
    pub input_file_dir: PathBuf,

    pub nextflow_path: PathBuf,
    pub nextflow_config_dir: PathBuf,
    pub nextflow_pipeline_dir: PathBuf,

    pub slurm_partition: String,
    pub slurm_memory: String,
    pub slurm_cpus: u32,

    pub ssh_host: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_identity_file: Option<PathBuf>,
}

impl Config {
    /// Reads configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has a default. SSH
    /// settings are only required when `CONNECTOR=ssh`, which `validate`
    /// enforces.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable not set"))?;

        let connector = std::env::var("CONNECTOR").unwrap_or_else(|_| "local".to_string());

        let dry_run = std::env::var("DRY_RUN")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(false);

        let poll_interval = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let max_running_jobs = std::env::var("MAX_RUNNING_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4);

        let max_status_retries = std::env::var("MAX_STATUS_RETRIES")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(5);

        let max_parallel_ops = std::env::var("MAX_PARALLEL_OPS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4);

        let path_var = |name: &str, default: &str| -> PathBuf {
            std::env::var(name)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(default))
        };

        Ok(Self {
            database_url,
            connector,
            dry_run,
            poll_interval,
            max_running_jobs,
            max_status_retries,
            max_parallel_ops,
            local_job_dir: path_var("LOCAL_JOB_DIR", "/data/jobs"),
            remote_job_dir: path_var("REMOTE_JOB_DIR", "/data/jobs"),
            results_dir: path_var("RESULTS_DIR", "/data/results"),
            input_file_dir: path_var("INPUT_FILE_DIR", "/data/inputs"),
            nextflow_path: path_var("NEXTFLOW_PATH", "/usr/local/bin/nextflow"),
            nextflow_config_dir: path_var("NEXTFLOW_CONFIG_DIR", "/etc/helix/nextflow"),
            nextflow_pipeline_dir: path_var("NEXTFLOW_PIPELINE_DIR", "/opt/helix/pipelines"),
            slurm_partition: std::env::var("SLURM_PARTITION")
                .unwrap_or_else(|_| "compute".to_string()),
            slurm_memory: std::env::var("SLURM_MEMORY").unwrap_or_else(|_| "24GB".to_string()),
            slurm_cpus: std::env::var("SLURM_CPUS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1),
            ssh_host: std::env::var("SSH_HOST").ok(),
            ssh_user: std::env::var("SSH_USER").ok(),
            ssh_identity_file: std::env::var("SSH_IDENTITY_FILE").ok().map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }
        if self.connector.is_empty() {
            anyhow::bail!("connector name cannot be empty");
        }
        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }
        if self.max_running_jobs == 0 {
            anyhow::bail!("max_running_jobs must be greater than 0");
        }
        if self.max_status_retries <= 0 {
            anyhow::bail!("max_status_retries must be greater than 0");
        }
        if self.max_parallel_ops == 0 {
            anyhow::bail!("max_parallel_ops must be greater than 0");
        }
        if self.connector == "ssh"
            && (self.ssh_host.is_none()
                || self.ssh_user.is_none()
                || self.ssh_identity_file.is_none())
        {
            anyhow::bail!(
                "ssh connector requires SSH_HOST, SSH_USER, and SSH_IDENTITY_FILE to be set"
            );
        }
        Ok(())
    }

    /// The connector-facing slice of this configuration.
    pub fn connector_config(&self) -> ConnectorConfig {
        let ssh = match (&self.ssh_host, &self.ssh_user, &self.ssh_identity_file) {
            (Some(host), Some(user), Some(identity_file)) => Some(SshSettings {
                host: host.clone(),
                user: user.clone(),
                identity_file: identity_file.clone(),
            }),
            _ => None,
        };
        ConnectorConfig {
            local_job_dir: self.local_job_dir.clone(),
            remote_job_dir: self.remote_job_dir.clone(),
            results_dir: self.results_dir.clone(),
            nextflow_path: self.nextflow_path.clone(),
            nextflow_config_dir: self.nextflow_config_dir.clone(),
            nextflow_pipeline_dir: self.nextflow_pipeline_dir.clone(),
            slurm_partition: self.slurm_partition.clone(),
            slurm_memory: self.slurm_memory.clone(),
            slurm_cpus: self.slurm_cpus,
            ssh,
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/helix".into(),
            connector: "local".into(),
            dry_run: false,
            poll_interval: Duration::from_secs(30),
            max_running_jobs: 4,
            max_status_retries: 5,
            max_parallel_ops: 4,
            local_job_dir: "/data/jobs".into(),
            remote_job_dir: "/data/jobs".into(),
            results_dir: "/data/results".into(),
            input_file_dir: "/data/inputs".into(),
            nextflow_path: "/usr/local/bin/nextflow".into(),
            nextflow_config_dir: "/etc/helix/nextflow".into(),
            nextflow_pipeline_dir: "/opt/helix/pipelines".into(),
            slurm_partition: "compute".into(),
            slurm_memory: "24GB".into(),
            slurm_cpus: 1,
            ssh_host: None,
            ssh_user: None,
            ssh_identity_file: None,
        }
    }
}
