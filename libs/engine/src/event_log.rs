//! `publisher.log`: one line per publish, written by a single task.

use std::path::PathBuf;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::util::clock_time;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    /// Local `HH:MM:SS`.
    pub clock: String,
    pub topic: String,
}

impl PublishEvent {
    pub fn now(topic: &str) -> Self {
        Self {
            clock: clock_time(),
            topic: topic.to_string(),
        }
    }
}

pub fn format_event(event: &PublishEvent) -> String {
    format!("[{}] Data published on: {}", event.clock, event.topic)
}

/// Publisher-side handle to the event log.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<PublishEvent>,
}

impl EventSender {
    /// A sender and the raw receiving end, without a writer task.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn record(&self, topic: &str) {
        if self.tx.send(PublishEvent::now(topic)).await.is_err() {
            tracing::warn!(topic = %topic, "publish event log is closed, event dropped");
        }
    }
}

/// Create (truncate) the log file and start its writer.
///
/// The writer ends once every [`EventSender`] clone is dropped and
/// returns the number of lines written.
pub async fn spawn_event_log(path: PathBuf) -> Result<(EventSender, JoinHandle<Result<u64, EngineError>>), EngineError> {
    let file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| EngineError::from(e).with_context(format!("create '{}'", path.display())))?;
    let (sender, rx) = EventSender::channel(EVENT_BUFFER);

    let handle = tokio::spawn(write_events(file, rx, path));
    Ok((sender, handle))
}

async fn write_events(
    file: tokio::fs::File,
    mut rx: mpsc::Receiver<PublishEvent>,
    path: PathBuf,
) -> Result<u64, EngineError> {
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    while let Some(event) = rx.recv().await {
        let mut line = format_event(&event);
        line.push('\n');
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        written += 1;
    }
    out.flush().await?;
    tracing::debug!(path = %path.display(), events = written, "publish event log closed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format() {
        let event = PublishEvent {
            clock: "09:15:02".into(),
            topic: "sensor/1".into(),
        };
        assert_eq!(format_event(&event), "[09:15:02] Data published on: sensor/1");
    }

    #[tokio::test]
    async fn writer_drains_until_senders_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publisher.log");
        let (sender, handle) = spawn_event_log(path.clone()).await.unwrap();

        let other = sender.clone();
        sender.record("a/1").await;
        other.record("a/2").await;
        sender.record("a/1").await;
        drop(sender);
        drop(other);

        assert_eq!(handle.await.unwrap().unwrap(), 3);
        let text = std::fs::read_to_string(&path).unwrap();
        let topics: Vec<&str> = text
            .lines()
            .map(|l| l.split_once("Data published on: ").unwrap().1)
            .collect();
        assert_eq!(topics, vec!["a/1", "a/2", "a/1"]);
    }
}
