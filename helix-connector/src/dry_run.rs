//! Dry-run connector
//!
//! Every operation is a logged no-op returning a synthetic success outcome.
//! Used to validate configuration and wiring without touching the
//! filesystem, the scheduler, or the network.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::config::ConnectorConfig;
use crate::{BackendStatus, Connector, ConnectorError, JobSpec, ResultManifest, WorkDir};

/// External id every dry-run submission reports.
pub const DRY_RUN_EXTERNAL_ID: &str = "dry-run";

#[derive(Debug)]
pub struct DryRunConnector {
    config: ConnectorConfig,
}

impl DryRunConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for DryRunConnector {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn workdir(&self, job_id: uuid::Uuid) -> WorkDir {
        WorkDir::new(job_id, self.config.local_job_dir.join(job_id.to_string()))
    }

    async fn prepare_job_environment(&self, spec: &JobSpec) -> Result<WorkDir, ConnectorError> {
        let workdir = self.workdir(spec.job_id);
        info!(
            job_id = %spec.job_id,
            path = %workdir.path.display(),
            input_file = ?spec.input_file,
            "dry run: would stage parameter payload"
        );
        Ok(workdir)
    }

    async fn submit_job(
        &self,
        workdir: &WorkDir,
        spec: &JobSpec,
    ) -> Result<String, ConnectorError> {
        let inner = self.config.nextflow_command(
            &spec.pipeline,
            &workdir.params_path().display().to_string(),
            &workdir.path.display().to_string(),
        );
        info!(
            job_id = %spec.job_id,
            command = %self.config.sbatch_command(spec.job_id, &inner),
            "dry run: would submit"
        );
        Ok(DRY_RUN_EXTERNAL_ID.to_string())
    }

    async fn get_job_status(&self, external_id: &str) -> Result<BackendStatus, ConnectorError> {
        info!(external_id, "dry run: reporting job as completed");
        Ok(BackendStatus::Completed)
    }

    async fn retrieve_job_results(
        &self,
        workdir: &WorkDir,
        destination: &Path,
    ) -> Result<ResultManifest, ConnectorError> {
        info!(
            job_id = %workdir.job_id,
            destination = %destination.display(),
            "dry run: would retrieve results"
        );
        Ok(ResultManifest::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn config(root: &Path) -> ConnectorConfig {
        ConnectorConfig {
            local_job_dir: root.join("jobs"),
            remote_job_dir: "/scratch/jobs".into(),
            results_dir: root.join("results"),
            nextflow_path: "/opt/nextflow".into(),
            nextflow_config_dir: "/opt/nf-config".into(),
            nextflow_pipeline_dir: "/opt/pipelines".into(),
            slurm_partition: "compute".into(),
            slurm_memory: "24GB".into(),
            slurm_cpus: 1,
            ssh: None,
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = DryRunConnector::new(config(tmp.path()));
        let spec = JobSpec {
            job_id: Uuid::new_v4(),
            pipeline: "est".into(),
            parameters: serde_json::Map::new(),
            input_file: Some(PathBuf::from("/no/such/file.fa")),
        };

        let workdir = connector.prepare_job_environment(&spec).await.unwrap();
        let external_id = connector.submit_job(&workdir, &spec).await.unwrap();
        let status = connector.get_job_status(&external_id).await.unwrap();
        let manifest = connector
            .retrieve_job_results(&workdir, &tmp.path().join("results"))
            .await
            .unwrap();

        assert_eq!(external_id, DRY_RUN_EXTERNAL_ID);
        assert_eq!(status, BackendStatus::Completed);
        assert!(manifest.files.is_empty());
        // No directories were created anywhere under the temp root.
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(entries.is_empty());
    }
}
