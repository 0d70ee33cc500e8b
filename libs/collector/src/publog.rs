//! Publisher event log: `[HH:MM:SS] Data published on: <topic>`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveTime;

use crate::error::CollectorError;

/// Publish events grouped by topic, topics in sorted order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishLog {
    /// `None` marks an event whose time could not be read.
    pub events: BTreeMap<String, Vec<Option<NaiveTime>>>,
}

impl PublishLog {
    pub fn read(path: &Path) -> Result<Self, CollectorError> {
        let text = crate::read_text(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut log = PublishLog::default();
        for (n, line) in text.lines().enumerate() {
            let Some((time, topic)) = parse_publish_line(line) else {
                continue;
            };
            let parsed = NaiveTime::parse_from_str(time, "%H:%M:%S").ok();
            if parsed.is_none() {
                tracing::warn!(line = n + 1, time = %time, "unreadable publish time");
            }
            log.events.entry(topic.to_string()).or_default().push(parsed);
        }
        log
    }

    pub fn count(&self, topic: &str) -> usize {
        self.events.get(topic).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }
}

/// Split a publish line into its raw time text and topic.
///
/// Leading whitespace is allowed, anything after the topic is ignored.
pub fn parse_publish_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix('[')?;
    let (time, rest) = rest.split_once(']')?;
    if !is_clock_shape(time) {
        return None;
    }
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix("Data published on: ")?;
    let topic = rest.split_whitespace().next()?;
    if rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((time, topic))
}

/// `digits:digits:digits`
fn is_clock_shape(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}
