//! SSH connector
//!
//! Drives a remote HPC scheduler: every scheduler interaction is a remote
//! command executed through an [`SshSession`], file movement goes through
//! scp. The session is owned by the connector and reused across calls;
//! command issuance is serialized because the underlying transport is a
//! one-command-at-a-time subprocess, not a multiplexed channel.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConnectorConfig, SshSettings};
use crate::slurm;
use crate::{BackendStatus, Connector, ConnectorError, JobSpec, ResultManifest, WorkDir};

/// A reusable SSH session.
///
/// Commands run over fresh `ssh` processes, so "session" here means the
/// settings, the serialization lock, and explicit reconnect accounting: a
/// failed command triggers one liveness probe and one retry before the error
/// surfaces to the caller.
#[derive(Debug)]
pub struct SshSession {
    settings: SshSettings,
    lock: Mutex<()>,
    reconnects: AtomicU64,
}

impl SshSession {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            lock: Mutex::new(()),
            reconnects: AtomicU64::new(0),
        }
    }

    /// How many times a failed command forced a reconnect probe.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Runs a command on the remote host, capturing stdout.
    ///
    /// Not for commands with remote side effects that must not happen twice;
    /// those go through [`run_unretried`](Self::run_unretried).
    pub async fn run(&self, command: &str) -> Result<String, String> {
        let _guard = self.lock.lock().await;
        match self.run_once(command).await {
            Ok(stdout) => Ok(stdout),
            Err(first) => {
                warn!(error = %first, "remote command failed, probing connection");
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                if let Err(probe) = self.run_once("true").await {
                    return Err(format!("connection lost ({probe}); original error: {first}"));
                }
                self.run_once(command).await
            }
        }
    }

    /// Runs a command exactly once, no reconnect probe.
    ///
    /// A transport drop can lose the reply to a command the remote side
    /// already acted on; retrying an `sbatch` in that window submits the job
    /// twice. The error surfaces instead, and the caller's own state-gated
    /// retry decides what happens next cycle.
    pub async fn run_unretried(&self, command: &str) -> Result<String, String> {
        let _guard = self.lock.lock().await;
        self.run_once(command).await
    }

    async fn run_once(&self, command: &str) -> Result<String, String> {
        debug!(host = %self.settings.host, command, "executing remote command");
        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-i")
            .arg(&self.settings.identity_file)
            .arg(self.settings.target())
            .arg(command)
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Copies a local file to a remote path.
    pub async fn copy_to(&self, local: &Path, remote: &Path) -> Result<(), String> {
        let _guard = self.lock.lock().await;
        self.scp(
            local.display().to_string(),
            format!("{}:{}", self.settings.target(), remote.display()),
            false,
        )
        .await
    }

    /// Copies a remote path to a local destination, recursively.
    pub async fn copy_from(&self, remote: &str, local: &Path) -> Result<(), String> {
        let _guard = self.lock.lock().await;
        self.scp(
            format!("{}:{}", self.settings.target(), remote),
            local.display().to_string(),
            true,
        )
        .await
    }

    async fn scp(&self, source: String, dest: String, recursive: bool) -> Result<(), String> {
        let mut cmd = Command::new("scp");
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-i")
            .arg(&self.settings.identity_file)
            .arg(source)
            .arg(dest);
        let output = cmd.output().await.map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SshConnector {
    config: ConnectorConfig,
    session: SshSession,
}

impl SshConnector {
    /// Fails when the configuration carries no SSH settings.
    pub fn new(config: ConnectorConfig) -> Result<Self, ConnectorError> {
        let settings = config.ssh.clone().ok_or_else(|| {
            ConnectorError::staging_unrecoverable("ssh connector selected without SSH settings")
        })?;
        Ok(Self {
            config,
            session: SshSession::new(settings),
        })
    }

    /// Local scratch directory the payload is rendered into before upload.
    fn staging_dir(&self, spec: &JobSpec) -> WorkDir {
        WorkDir::new(
            spec.job_id,
            self.config.local_job_dir.join(spec.job_id.to_string()),
        )
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn workdir(&self, job_id: uuid::Uuid) -> WorkDir {
        WorkDir::new(job_id, self.config.remote_job_dir.join(job_id.to_string()))
    }

    async fn prepare_job_environment(&self, spec: &JobSpec) -> Result<WorkDir, ConnectorError> {
        let remote = self.workdir(spec.job_id);

        // Render payload locally first, then push. Re-running overwrites the
        // remote copies, so the operation stays idempotent end to end.
        let staging = self.staging_dir(spec);
        crate::local::stage_into(&staging, spec).await?;

        self.session
            .run(&format!("mkdir -p {}", remote.path.display()))
            .await
            .map_err(ConnectorError::staging)?;

        self.session
            .copy_to(&staging.params_path(), &remote.params_path())
            .await
            .map_err(ConnectorError::staging)?;

        if let Some(input) = &spec.input_file {
            let file_name = input
                .file_name()
                .ok_or_else(|| ConnectorError::staging_unrecoverable("input file has no name"))?;
            self.session
                .copy_to(&staging.path.join(file_name), &remote.path.join(file_name))
                .await
                .map_err(ConnectorError::staging)?;
        }

        info!(job_id = %spec.job_id, path = %remote.path.display(), "remote job environment prepared");
        Ok(remote)
    }

    async fn submit_job(
        &self,
        workdir: &WorkDir,
        spec: &JobSpec,
    ) -> Result<String, ConnectorError> {
        let job_dir = workdir.path.display().to_string();
        let params = workdir.params_path().display().to_string();
        let inner = self.config.nextflow_command(&spec.pipeline, &params, &job_dir);
        let command = format!(
            "cd {job_dir} && {}",
            self.config.sbatch_command(spec.job_id, &inner)
        );

        let stdout = self
            .session
            .run_unretried(&command)
            .await
            .map_err(ConnectorError::Submission)?;
        slurm::parse_sbatch_output(&stdout).ok_or_else(|| {
            ConnectorError::Submission(format!("could not parse sbatch output: {stdout:?}"))
        })
    }

    async fn get_job_status(&self, external_id: &str) -> Result<BackendStatus, ConnectorError> {
        let command = format!("sacct -j {external_id} --format=State --noheader");
        let stdout = self
            .session
            .run(&command)
            .await
            .map_err(ConnectorError::StatusQuery)?;
        Ok(slurm::parse_sacct_state(&stdout))
    }

    async fn retrieve_job_results(
        &self,
        workdir: &WorkDir,
        destination: &Path,
    ) -> Result<ResultManifest, ConnectorError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| ConnectorError::Retrieval(e.to_string()))?;

        // Copy the contents of the remote output directory, not the
        // directory itself, so repeated retrievals overwrite in place.
        let remote_glob = format!("{}/*", workdir.output_path().display());
        self.session
            .copy_from(&remote_glob, destination)
            .await
            .map_err(ConnectorError::Retrieval)?;

        let dest = destination.to_path_buf();
        let files = tokio::task::spawn_blocking(move || crate::local::list_tree(&dest))
            .await
            .map_err(|e| ConnectorError::Retrieval(e.to_string()))?
            .map_err(|e| ConnectorError::Retrieval(e.to_string()))?;

        Ok(ResultManifest {
            output_dir: destination.to_path_buf(),
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings() -> SshSettings {
        SshSettings {
            host: "hpc.example.edu".into(),
            user: "svc-helix".into(),
            identity_file: PathBuf::from("/nonexistent/key"),
        }
    }

    /// Unreachable target so commands fail without touching a real host.
    fn dead_session() -> SshSession {
        SshSession::new(SshSettings {
            host: "127.0.0.1".into(),
            user: "nobody".into(),
            identity_file: PathBuf::from("/nonexistent/key"),
        })
    }

    #[test]
    fn test_session_starts_with_no_reconnects() {
        let session = SshSession::new(settings());
        assert_eq!(session.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_command_triggers_reconnect_probe() {
        let session = dead_session();
        assert!(session.run("true").await.is_err());
        assert_eq!(session.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_unretried_command_is_issued_exactly_once() {
        // Submission-style commands must not be replayed after a failure.
        let session = dead_session();
        assert!(session.run_unretried("sbatch --wrap='true'").await.is_err());
        assert_eq!(session.reconnect_count(), 0);
    }

    #[test]
    fn test_connector_requires_ssh_settings() {
        let config = ConnectorConfig {
            local_job_dir: "/data/jobs".into(),
            remote_job_dir: "/scratch/jobs".into(),
            results_dir: "/data/results".into(),
            nextflow_path: "/opt/nextflow".into(),
            nextflow_config_dir: "/opt/nf-config".into(),
            nextflow_pipeline_dir: "/opt/pipelines".into(),
            slurm_partition: "compute".into(),
            slurm_memory: "24GB".into(),
            slurm_cpus: 1,
            ssh: None,
        };
        assert!(SshConnector::new(config).is_err());
    }
}
