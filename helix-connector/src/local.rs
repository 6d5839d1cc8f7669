//! Local connector
//!
//! Drives a scheduler reachable from the manager host over a shared
//! filesystem: staging is plain filesystem I/O, submission and status checks
//! are local subprocess invocations of `sbatch`/`sacct`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ConnectorConfig;
use crate::slurm;
use crate::{BackendStatus, Connector, ConnectorError, JobSpec, ResultManifest, WorkDir};

#[derive(Debug)]
pub struct LocalConnector {
    config: ConnectorConfig,
}

impl LocalConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    /// Runs a shell command locally, capturing stdout.
    async fn execute(&self, command: &str, cwd: Option<&Path>) -> Result<String, String> {
        debug!(command, "executing local command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await.map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn name(&self) -> &'static str {
        "local"
    }

    fn workdir(&self, job_id: uuid::Uuid) -> WorkDir {
        WorkDir::new(job_id, self.config.local_job_dir.join(job_id.to_string()))
    }

    async fn prepare_job_environment(&self, spec: &JobSpec) -> Result<WorkDir, ConnectorError> {
        let workdir = self.workdir(spec.job_id);
        stage_into(&workdir, spec).await?;
        info!(job_id = %spec.job_id, path = %workdir.path.display(), "job environment prepared");
        Ok(workdir)
    }

    async fn submit_job(
        &self,
        workdir: &WorkDir,
        spec: &JobSpec,
    ) -> Result<String, ConnectorError> {
        let job_dir = workdir.path.display().to_string();
        let params = workdir.params_path().display().to_string();
        let inner = self.config.nextflow_command(&spec.pipeline, &params, &job_dir);
        let command = self.config.sbatch_command(spec.job_id, &inner);

        let stdout = self
            .execute(&command, Some(&workdir.path))
            .await
            .map_err(ConnectorError::Submission)?;
        slurm::parse_sbatch_output(&stdout).ok_or_else(|| {
            ConnectorError::Submission(format!("could not parse sbatch output: {stdout:?}"))
        })
    }

    async fn get_job_status(&self, external_id: &str) -> Result<BackendStatus, ConnectorError> {
        let command = format!("sacct -j {external_id} --format=State --noheader");
        let stdout = self
            .execute(&command, None)
            .await
            .map_err(ConnectorError::StatusQuery)?;
        Ok(slurm::parse_sacct_state(&stdout))
    }

    async fn retrieve_job_results(
        &self,
        workdir: &WorkDir,
        destination: &Path,
    ) -> Result<ResultManifest, ConnectorError> {
        let output_dir = workdir.output_path();
        let destination = destination.to_path_buf();

        // Output is already on the shared filesystem; copying into the
        // results root keeps retrieval uniform across variants and is safe
        // to repeat (overwrite, never append).
        let files = tokio::task::spawn_blocking(move || copy_tree(&output_dir, &destination))
            .await
            .map_err(|e| ConnectorError::Retrieval(e.to_string()))?
            .map_err(|e| ConnectorError::Retrieval(e.to_string()))?;

        Ok(ResultManifest {
            output_dir: workdir.output_path(),
            files,
        })
    }
}

/// Writes `params.json` and stages the input file into the working
/// directory. Idempotent: existing staged content is overwritten.
pub(crate) async fn stage_into(workdir: &WorkDir, spec: &JobSpec) -> Result<(), ConnectorError> {
    tokio::fs::create_dir_all(&workdir.path)
        .await
        .map_err(|e| ConnectorError::staging(format!("cannot create job directory: {e}")))?;

    let rendered = crate::render_params(&spec.parameters)?;
    tokio::fs::write(workdir.params_path(), rendered)
        .await
        .map_err(|e| ConnectorError::staging(format!("cannot write params file: {e}")))?;

    if let Some(input) = &spec.input_file {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(ConnectorError::staging_unrecoverable(format!(
                "input file not found: {}",
                input.display()
            )));
        }
        let file_name = input
            .file_name()
            .ok_or_else(|| ConnectorError::staging_unrecoverable("input file has no name"))?;
        tokio::fs::copy(input, workdir.path.join(file_name))
            .await
            .map_err(|e| ConnectorError::staging(format!("cannot stage input file: {e}")))?;
    }
    Ok(())
}

/// Lists the files under `dir` as paths relative to it, sorted.
pub(crate) fn list_tree(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    fn walk(dir: &Path, rel: PathBuf, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let rel_path = rel.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                walk(&entry.path(), rel_path, files)?;
            } else {
                files.push(rel_path);
            }
        }
        Ok(())
    }
    let mut files = Vec::new();
    walk(dir, PathBuf::new(), &mut files)?;
    files.sort();
    Ok(files)
}

/// Recursively copies `src` into `dst`, overwriting existing files.
/// Returns the copied files as paths relative to `dst`.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    copy_tree_inner(src, dst, PathBuf::new(), &mut files)?;
    files.sort();
    Ok(files)
}

fn copy_tree_inner(
    src: &Path,
    dst: &Path,
    rel: PathBuf,
    files: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let rel_path = rel.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree_inner(&entry.path(), &dst.join(&name), rel_path, files)?;
        } else {
            std::fs::copy(entry.path(), dst.join(&name))?;
            files.push(rel_path);
        }
    }
    Ok(())
}
