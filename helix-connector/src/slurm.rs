//! Slurm command-output parsing
//!
//! Both connector variants submit through `sbatch` and poll through `sacct`;
//! only the transport differs. The parsers live here so the two stay in
//! lockstep.

use crate::BackendStatus;

/// Extracts the scheduler job id from `sbatch` stdout.
///
/// Successful submission prints a line of the form
/// `Submitted batch job 123456`.
pub fn parse_sbatch_output(stdout: &str) -> Option<String> {
    let line = stdout
        .lines()
        .find(|line| line.contains("Submitted batch job"))?;
    let id = line.split_whitespace().last()?;
    if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
        Some(id.to_string())
    } else {
        None
    }
}

/// Maps `sacct -j <id> --format=State --noheader` output to a backend status.
///
/// Only the first line matters; job steps repeat the parent state. An empty
/// or unrecognized state is `Unknown` -- sacct reports nothing for ids it has
/// not seen yet, which is exactly the ambiguity the manager has to tolerate.
pub fn parse_sacct_state(stdout: &str) -> BackendStatus {
    let Some(state) = stdout.lines().next().map(|line| line.trim().to_uppercase()) else {
        return BackendStatus::Unknown;
    };
    if state.contains("COMPLETED") {
        BackendStatus::Completed
    } else if state.contains("FAILED")
        || state.contains("CANCELLED")
        || state.contains("TIMEOUT")
        || state.contains("OUT_OF_MEMORY")
    {
        BackendStatus::Failed
    } else if state.contains("RUNNING") || state.contains("COMPLETING") {
        BackendStatus::Running
    } else if state.contains("PENDING") {
        BackendStatus::Pending
    } else {
        BackendStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sbatch_output() {
        assert_eq!(
            parse_sbatch_output("Submitted batch job 123456\n"),
            Some("123456".to_string())
        );
        // Preamble lines before the submission line are fine.
        assert_eq!(
            parse_sbatch_output("sbatch: queue ok\nSubmitted batch job 7\n"),
            Some("7".to_string())
        );
        assert_eq!(parse_sbatch_output("sbatch: error: invalid partition\n"), None);
        assert_eq!(parse_sbatch_output("Submitted batch job oops\n"), None);
        assert_eq!(parse_sbatch_output(""), None);
    }

    #[test]
    fn test_parse_sacct_states() {
        assert_eq!(parse_sacct_state("COMPLETED\n"), BackendStatus::Completed);
        assert_eq!(parse_sacct_state("  FAILED \n"), BackendStatus::Failed);
        assert_eq!(parse_sacct_state("CANCELLED by 1000\n"), BackendStatus::Failed);
        assert_eq!(parse_sacct_state("TIMEOUT\n"), BackendStatus::Failed);
        assert_eq!(parse_sacct_state("RUNNING\nRUNNING\n"), BackendStatus::Running);
        assert_eq!(parse_sacct_state("PENDING\n"), BackendStatus::Pending);
        assert_eq!(parse_sacct_state(""), BackendStatus::Unknown);
        assert_eq!(parse_sacct_state("NODE_FAIL\n"), BackendStatus::Unknown);
    }

    #[test]
    fn test_parse_sacct_first_line_wins() {
        // A completed parent with failed steps is still completed.
        assert_eq!(
            parse_sacct_state("COMPLETED\nFAILED\n"),
            BackendStatus::Completed
        );
    }
}
