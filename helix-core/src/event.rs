//! Lifecycle event vocabulary

use serde::{Deserialize, Serialize};

/// Job lifecycle events emitted to the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEvent {
    Started,
    Finished,
    Failed,
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobEvent::Started => "started",
            JobEvent::Finished => "finished",
            JobEvent::Failed => "failed",
        };
        f.write_str(s)
    }
}
