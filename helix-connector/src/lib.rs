//! Execution-backend capability for Helix
//!
//! A connector carries the four operations the manager needs from a compute
//! resource: prepare the per-job working directory, submit the pipeline,
//! poll scheduler state, and retrieve results. The manager drives connectors
//! through the [`Connector`] trait only, so the local shared-filesystem
//! variant and the SSH-mediated remote variant are interchangeable without
//! touching the orchestration code.

pub mod config;
pub mod dry_run;
pub mod local;
pub mod registry;
pub mod slurm;
pub mod ssh;

pub use config::{ConnectorConfig, SshSettings};
pub use registry::{ConnectorRegistry, RegistryError};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Scheduler-side view of a submitted job.
///
/// `Unknown` is a value, not an error: the backend did not recognize the
/// identifier at query time. A single occurrence must not be treated as
/// terminal -- a freshly queued job and a lost job both report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Unknown,
}

/// Errors produced by connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("staging failed: {message}")]
    Staging { message: String, recoverable: bool },

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("status query failed: {0}")]
    StatusQuery(String),

    #[error("result retrieval failed: {0}")]
    Retrieval(String),
}

impl ConnectorError {
    pub fn staging(message: impl Into<String>) -> Self {
        Self::Staging {
            message: message.into(),
            recoverable: true,
        }
    }

    /// A staging failure retrying cannot fix, e.g. a missing input file.
    pub fn staging_unrecoverable(message: impl Into<String>) -> Self {
        Self::Staging {
            message: message.into(),
            recoverable: false,
        }
    }

    /// Whether the manager may hold state and try again next cycle.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Staging { recoverable, .. } => *recoverable,
            _ => true,
        }
    }
}

/// Handle to a job's execution-side working directory.
///
/// The path is meaningful on whichever side the connector executes: a local
/// path for the local variant, a remote path for the SSH variant. The
/// directory is exclusively owned by its job for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    pub job_id: Uuid,
    pub path: PathBuf,
}

impl WorkDir {
    pub fn new(job_id: Uuid, path: impl Into<PathBuf>) -> Self {
        Self {
            job_id,
            path: path.into(),
        }
    }

    /// Path of the staged parameter file inside this directory.
    pub fn params_path(&self) -> PathBuf {
        self.path.join(PARAMS_FILE_NAME)
    }

    /// Path of the pipeline's output subdirectory.
    pub fn output_path(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR_NAME)
    }
}

/// File name of the serialized parameter payload inside the working directory.
pub const PARAMS_FILE_NAME: &str = "params.json";

/// Subdirectory the pipeline writes its output into.
pub const OUTPUT_DIR_NAME: &str = "output";

/// What a retrieval produced on the manager-accessible side.
#[derive(Debug, Clone, Default)]
pub struct ResultManifest {
    /// Local directory the output landed in.
    pub output_dir: PathBuf,
    /// Files present under `output_dir`, relative paths.
    pub files: Vec<PathBuf>,
}

/// Everything a connector needs to run one job.
///
/// Built by the manager from the job row plus site-wide pipeline defaults;
/// connectors never see the persistence model.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: Uuid,
    /// Pipeline script name, e.g. "est" or "gnn".
    pub pipeline: String,
    /// Merged parameter document written to `params.json`.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Local path of the input file to stage, when the job type carries one.
    pub input_file: Option<PathBuf>,
}

/// The execution-backend capability.
///
/// Implementations must keep `prepare_job_environment` and
/// `retrieve_job_results` safely re-invocable: re-running overwrites staged
/// or retrieved content, never duplicates or corrupts it. `submit_job` is
/// called at most once per job in normal operation -- the manager guarantees
/// that by gating on persisted state, not the connector.
#[async_trait]
pub trait Connector: std::fmt::Debug + Send + Sync {
    /// Short name used in logs and the registry.
    fn name(&self) -> &'static str;

    /// The working-directory handle this connector uses for a job.
    ///
    /// Derivation only, no I/O: the directory is named by the job id under
    /// the variant's job root, so the handle can be rebuilt at retrieval
    /// time without re-running preparation.
    fn workdir(&self, job_id: Uuid) -> WorkDir;

    /// Creates the job-identified directory on the execution side and stages
    /// the parameter payload plus the input file when present.
    async fn prepare_job_environment(&self, spec: &JobSpec) -> Result<WorkDir, ConnectorError>;

    /// Launches the pipeline against the staged inputs and returns the
    /// scheduler-assigned identifier.
    async fn submit_job(&self, workdir: &WorkDir, spec: &JobSpec)
    -> Result<String, ConnectorError>;

    /// Queries scheduler state for a previously submitted job.
    async fn get_job_status(&self, external_id: &str) -> Result<BackendStatus, ConnectorError>;

    /// Copies the job's output to `destination` on the manager-accessible
    /// side and reports what was transferred.
    async fn retrieve_job_results(
        &self,
        workdir: &WorkDir,
        destination: &Path,
    ) -> Result<ResultManifest, ConnectorError>;
}

/// Serializes the parameter payload the way the pipeline expects to read it.
pub(crate) fn render_params(
    parameters: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, ConnectorError> {
    serde_json::to_string_pretty(parameters)
        .map_err(|e| ConnectorError::staging(format!("cannot serialize parameters: {e}")))
}
