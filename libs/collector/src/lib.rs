//! Offline correlation of publisher and subscriber artifacts.

pub mod error;
pub mod latency;
pub mod publog;
pub mod sublog;
pub mod summary;

pub use error::CollectorError;
pub use latency::{LatencySet, LatencyStats, StatsRow};
pub use publog::PublishLog;
pub use sublog::{MessageRecord, SubscriberLog};
pub use summary::{Collection, collect};

/// Read a log as text. Invalid UTF-8 (a write cut off mid-character) is
/// replaced rather than failing the whole file.
pub(crate) fn read_text(path: &std::path::Path) -> Result<String, CollectorError> {
    let bytes = std::fs::read(path).map_err(|e| CollectorError::io(path, e))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            tracing::warn!(file = %path.display(), valid_up_to = e.utf8_error().valid_up_to(), "invalid UTF-8 replaced");
            Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
        }
    }
}
