//! Notification sink
//!
//! Lifecycle events are fire-and-forget: the loop emits them after a
//! transition commits and swallows any sink failure, so notification
//! problems can never affect job state.

use async_trait::async_trait;
use helix_core::JobEvent;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, job_id: Uuid, event: JobEvent, detail: &str) -> anyhow::Result<()>;
}

/// Default sink: structured log lines. Mail or webhook sinks implement the
/// same trait out of tree.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, job_id: Uuid, event: JobEvent, detail: &str) -> anyhow::Result<()> {
        info!(%job_id, %event, detail, "job notification");
        Ok(())
    }
}
