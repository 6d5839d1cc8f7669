//! Connector configuration
//!
//! An immutable bundle of the paths and scheduler settings connectors need.
//! Constructed once at startup from the process configuration and passed by
//! reference into the connector constructors.

use std::path::PathBuf;

/// SSH session settings for the remote connector.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub user: String,
    /// Private key path; key-based auth only.
    pub identity_file: PathBuf,
}

impl SshSettings {
    /// `user@host` target string for ssh/scp invocations.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Settings shared by all connector variants.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Job working-directory root on the local/shared filesystem.
    pub local_job_dir: PathBuf,
    /// Job working-directory root on the remote resource (ssh variant).
    pub remote_job_dir: PathBuf,
    /// Where retrieved results land on the manager side.
    pub results_dir: PathBuf,

    /// Nextflow executable on the execution side.
    pub nextflow_path: PathBuf,
    /// Directory of per-pipeline Nextflow config files.
    pub nextflow_config_dir: PathBuf,
    /// Directory of pipeline scripts, `<dir>/<pipeline>/<pipeline>.nf`.
    pub nextflow_pipeline_dir: PathBuf,

    pub slurm_partition: String,
    pub slurm_memory: String,
    pub slurm_cpus: u32,

    /// Present iff the ssh connector is selected.
    pub ssh: Option<SshSettings>,
}

impl ConnectorConfig {
    /// Builds the pipeline launch command executed inside the job directory.
    pub fn nextflow_command(&self, pipeline: &str, params_path: &str, job_dir: &str) -> String {
        let script = self
            .nextflow_pipeline_dir
            .join(pipeline)
            .join(format!("{pipeline}.nf"));
        let config = self
            .nextflow_config_dir
            .join(pipeline)
            .join("slurm.config");
        format!(
            "{} -C {} run {} -params-file {} -w {}/work",
            self.nextflow_path.display(),
            config.display(),
            script.display(),
            params_path,
            job_dir,
        )
    }

    /// Wraps a pipeline command in the scheduler submission command.
    pub fn sbatch_command(&self, job_id: uuid::Uuid, inner: &str) -> String {
        format!(
            "sbatch --job-name=job_{job_id} --mem={} --ntasks=1 --cpus-per-task={} \
             --partition={} --output=job_{job_id}.out --wrap='{inner}'",
            self.slurm_memory, self.slurm_cpus, self.slurm_partition,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectorConfig {
        ConnectorConfig {
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
        }
    }

    #[test]
    fn test_nextflow_command_layout() {
        let cmd = config().nextflow_command("est", "/data/jobs/1/params.json", "/data/jobs/1");
        assert!(cmd.starts_with("/opt/nextflow -C /opt/nf-config/est/slurm.config"));
        assert!(cmd.contains("run /opt/pipelines/est/est.nf"));
        assert!(cmd.contains("-params-file /data/jobs/1/params.json"));
        assert!(cmd.ends_with("-w /data/jobs/1/work"));
    }

    #[test]
    fn test_sbatch_command_settings() {
        let id = uuid::Uuid::new_v4();
        let cmd = config().sbatch_command(id, "echo hi");
        assert!(cmd.contains(&format!("--job-name=job_{id}")));
        assert!(cmd.contains("--mem=24GB"));
        assert!(cmd.contains("--partition=compute"));
        assert!(cmd.ends_with("--wrap='echo hi'"));
    }

    #[test]
    fn test_ssh_target() {
        let ssh = SshSettings {
            host: "hpc.example.edu".into(),
            user: "svc-helix".into(),
            identity_file: "/etc/helix/id_ed25519".into(),
        };
        assert_eq!(ssh.target(), "svc-helix@hpc.example.edu");
    }
}
