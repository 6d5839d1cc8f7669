//! Pipeline result parsing
//!
//! Completed pipelines leave a `stats.json` summary in their output
//! directory. Its contents are persisted verbatim on the job row so the
//! intake side can display them without touching the result files.

use std::path::Path;

use tracing::warn;

/// Reads `stats.json` from a retrieved output directory.
///
/// A missing file is not an error -- not every pipeline produces one -- and
/// yields an empty document. A malformed file is logged and also yields an
/// empty document rather than failing the job at the last step.
pub async fn parse_stats(output_dir: &Path) -> serde_json::Value {
    let stats_path = output_dir.join("stats.json");
    let raw = match tokio::fs::read_to_string(&stats_path).await {
        Ok(raw) => raw,
        Err(_) => return serde_json::json!({}),
    };
    match serde_json::from_str(&raw) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        Ok(_) => {
            warn!(path = %stats_path.display(), "stats file is not a JSON object, ignoring");
            serde_json::json!({})
        }
        Err(e) => {
            warn!(path = %stats_path.display(), error = %e, "cannot parse stats file, ignoring");
            serde_json::json!({})
        }
    }
}
