//! Job domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a compute job.
///
/// Progression is strictly forward; `Errored` is reachable from any
/// non-terminal state when the manager gives up on a job locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    Staging,
    Submitted,
    Running,
    Finished,
    Failed,
    Errored,
}

impl JobStatus {
    /// States the orchestration loop still has work to do for.
    pub const NON_TERMINAL: [JobStatus; 4] = [
        JobStatus::New,
        JobStatus::Staging,
        JobStatus::Submitted,
        JobStatus::Running,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Errored
        )
    }

    /// True while the job occupies a slot on the execution backend.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "New",
            JobStatus::Staging => "Staging",
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Finished => "Finished",
            JobStatus::Failed => "Failed",
            JobStatus::Errored => "Errored",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "New" => Some(JobStatus::New),
            "Staging" => Some(JobStatus::Staging),
            "Submitted" => Some(JobStatus::Submitted),
            "Running" => Some(JobStatus::Running),
            "Finished" => Some(JobStatus::Finished),
            "Failed" => Some(JobStatus::Failed),
            "Errored" => Some(JobStatus::Errored),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of analysis a job performs.
///
/// The variant decides two things the manager cares about: whether an input
/// file accompanies the parameter payload, and which pipeline script the
/// connector launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Accession,
    Blast,
    Fasta,
    Families,
    ColorSsn,
    Gnn,
    Gnd,
    Cgfp,
    Taxonomy,
}

impl JobType {
    /// Whether this job type carries an input file that must be staged
    /// alongside the parameter payload.
    pub fn requires_input_file(&self) -> bool {
        matches!(
            self,
            JobType::Accession | JobType::Blast | JobType::Fasta | JobType::ColorSsn
        )
    }

    /// Name of the pipeline script launched for this job type.
    pub fn pipeline(&self) -> &'static str {
        match self {
            JobType::Accession | JobType::Blast | JobType::Fasta | JobType::Families => "est",
            JobType::ColorSsn => "colorssn",
            JobType::Gnn => "gnn",
            JobType::Gnd => "gnd",
            JobType::Cgfp => "cgfp",
            JobType::Taxonomy => "taxonomy",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Accession => "Accession",
            JobType::Blast => "Blast",
            JobType::Fasta => "Fasta",
            JobType::Families => "Families",
            JobType::ColorSsn => "ColorSsn",
            JobType::Gnn => "Gnn",
            JobType::Gnd => "Gnd",
            JobType::Cgfp => "Cgfp",
            JobType::Taxonomy => "Taxonomy",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "Accession" => Some(JobType::Accession),
            "Blast" => Some(JobType::Blast),
            "Fasta" => Some(JobType::Fasta),
            "Families" => Some(JobType::Families),
            "ColorSsn" => Some(JobType::ColorSsn),
            "Gnn" => Some(JobType::Gnn),
            "Gnd" => Some(JobType::Gnd),
            "Cgfp" => Some(JobType::Cgfp),
            "Taxonomy" => Some(JobType::Taxonomy),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute job tracked through its lifecycle.
///
/// Created by the intake process in state `New`; from then on only the
/// manager mutates it (status, external id, timestamps, retry bookkeeping).
/// Never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Opaque parameter payload, immutable once submitted. Written verbatim
    /// to the per-job `params.json` the pipeline reads.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Scheduler-assigned identifier; set on submission, empty before.
    pub external_job_id: Option<String>,
    /// File name under the input source directory, for job types that
    /// carry one.
    pub input_file: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Parsed pipeline output, populated after retrieval.
    pub results: Option<serde_json::Value>,
    /// Optimistic-concurrency counter, bumped on every store update.
    pub version: i64,
}

impl Job {
    /// Builds a fresh job in state `New`, the way the intake process would.
    pub fn new(
        job_type: JobType,
        parameters: serde_json::Map<String, serde_json::Value>,
        input_file: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::New,
            parameters,
            external_job_id: None,
            input_file,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            last_error: None,
            results: None,
            version: 0,
        }
    }

    /// Holds iff the external-id invariant is satisfied: the scheduler id is
    /// present exactly in the states at or past submission.
    pub fn external_id_consistent(&self) -> bool {
        let has_id = self
            .external_job_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        match self.status {
            JobStatus::New | JobStatus::Staging => !has_id,
            JobStatus::Submitted | JobStatus::Running | JobStatus::Finished | JobStatus::Failed => {
                has_id
            }
            // Errored can be reached from either side of submission.
            JobStatus::Errored => true,
        }
    }
}
