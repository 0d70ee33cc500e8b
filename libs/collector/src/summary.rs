use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use crate::error::CollectorError;
use crate::publog::PublishLog;
use crate::sublog::SubscriberLog;

const UNKNOWN: &str = "unknown";

/// Everything recovered from one run's artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub publishes: PublishLog,
    /// In file-name order.
    pub subscribers: Vec<SubscriberLog>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicTally {
    pub count: usize,
    pub bytes: usize,
}

/// Read the publisher event log and every `subscriber-*.log` in `logdir`.
pub fn collect(logdir: &Path, publog: &Path) -> Result<Collection, CollectorError> {
    let publishes = PublishLog::read(publog)?;

    let entries = std::fs::read_dir(logdir).map_err(|e| CollectorError::io(logdir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CollectorError::io(logdir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("subscriber-") && name.ends_with(".log") {
            files.push((name, path));
        } else if name.ends_with(".latency.csv") || path == publog {
            continue;
        } else {
            tracing::warn!(file = %name, "not a subscriber log, skipped");
        }
    }
    files.sort();

    let mut subscribers = Vec::with_capacity(files.len());
    for (_, path) in files {
        subscribers.push(SubscriberLog::read(&path)?);
    }
    tracing::info!(
        topics = publishes.events.len(),
        subscribers = subscribers.len(),
        "logs collected"
    );
    Ok(Collection { publishes, subscribers })
}

/// Message count and payload bytes per observed topic, sorted by topic.
pub fn tally(log: &SubscriberLog) -> BTreeMap<&str, TopicTally> {
    let mut out: BTreeMap<&str, TopicTally> = BTreeMap::new();
    for record in &log.records {
        let t = out.entry(record.topic.as_str()).or_default();
        t.count += 1;
        t.bytes += record.data.len();
    }
    out
}

impl Collection {
    /// Deliveries per topic across all subscribers.
    pub fn received_by_topic(&self) -> BTreeMap<&str, usize> {
        let mut out: BTreeMap<&str, usize> = BTreeMap::new();
        for log in &self.subscribers {
            for (topic, t) in tally(log) {
                *out.entry(topic).or_default() += t.count;
            }
        }
        out
    }

    /// Plain-text summary; identical inputs give identical output.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Published Topics: {}", self.publishes.events.len());
        for (topic, events) in &self.publishes.events {
            let _ = writeln!(out, "{topic:<25} {:>5}", events.len());
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Subscribers Reporting: {}", self.subscribers.len());
        for log in &self.subscribers {
            let connected = log
                .connected
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| UNKNOWN.to_string());
            let _ = writeln!(
                out,
                "{:<40} {:<25} {:>5} {connected}",
                log.client_id.as_deref().unwrap_or(UNKNOWN),
                log.topic.as_deref().unwrap_or(UNKNOWN),
                log.records.len(),
            );
            for (topic, t) in tally(log) {
                let _ = writeln!(out, "{:41}{topic:<25} {:>5}, {} bytes", "", t.count, t.bytes);
            }
            if log.truncated > 0 {
                let _ = writeln!(out, "{:41}({} truncated record(s) discarded)", "", log.truncated);
            }
        }
        let _ = writeln!(out);

        let received = self.received_by_topic();
        let mut topics: Vec<&str> = self.publishes.events.keys().map(String::as_str).collect();
        topics.extend(received.keys().copied());
        topics.sort_unstable();
        topics.dedup();
        let _ = writeln!(out, "Delivery by Topic: {}", topics.len());
        let _ = writeln!(out, "{:<25} {:>9} {:>9}", "topic", "published", "received");
        for topic in topics {
            let _ = writeln!(
                out,
                "{topic:<25} {:>9} {:>9}",
                self.publishes.count(topic),
                received.get(topic).copied().unwrap_or(0)
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Collection {
        let publishes = PublishLog::parse(
            "[10:00:00] Data published on: sensor/1\n\
             [10:00:01] Data published on: sensor/1\n\
             [10:00:01] Data published on: sensor/2\n",
        );
        let sub = SubscriberLog::parse(
            "subscriber-sensor-wildcard-0.log",
            "Client ID: subscriber-sensor-wildcard-0\n\
             Topic: sensor/#\n\
             [2025-06-01 10:00:00.020] Connected with result code 0\n\
             [2025-06-01 10:00:00.100] Received on 'sensor/1'\n{\n}\n\
             [2025-06-01 10:00:01.100] Received on 'sensor/2'\nabc\n----------------------------------------\n",
        );
        let anonymous = SubscriberLog::parse("subscriber-x-0.log", "");
        Collection {
            publishes,
            subscribers: vec![sub, anonymous],
        }
    }

    #[test]
    fn report_layout() {
        let text = sample().render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Published Topics: 2");
        assert_eq!(lines[1], format!("{:<25} {:>5}", "sensor/1", 2));
        assert_eq!(lines[2], format!("{:<25} {:>5}", "sensor/2", 1));
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "Subscribers Reporting: 2");
        assert_eq!(
            lines[5],
            format!(
                "{:<40} {:<25} {:>5} 2025-06-01 10:00:00.020",
                "subscriber-sensor-wildcard-0", "sensor/#", 2
            )
        );
        assert_eq!(lines[6], format!("{:41}{:<25} {:>5}, 4 bytes", "", "sensor/1", 1));
        assert_eq!(lines[7], format!("{:41}{:<25} {:>5}, 4 bytes", "", "sensor/2", 1));
        assert_eq!(lines[8], format!("{:<40} {:<25} {:>5} unknown", "unknown", "unknown", 0));
        assert!(text.contains(&format!("{:<25} {:>9} {:>9}", "sensor/1", 2, 1)));
    }

    #[test]
    fn rendering_is_repeatable() {
        let c = sample();
        assert_eq!(c.render(), c.render());
    }
}
