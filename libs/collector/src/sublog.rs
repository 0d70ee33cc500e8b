//! Subscriber log recovery.
//!
//! The log is read line by line with two states. In the default state the
//! parser looks for header fields and bracketed event lines; a
//! `Received on '<topic>'` event opens a record and switches to capturing,
//! where lines are taken verbatim until the payload block closes.

use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::CollectorError;

/// Closes every logged entry.
pub const SEPARATOR: &str = "----------------------------------------";

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub timestamp: Option<NaiveDateTime>,
    pub topic: String,
    pub message_id: Option<String>,
    pub latency_ms: Option<f64>,
    /// Payload block exactly as logged, newlines included.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberLog {
    pub file_name: String,
    pub client_id: Option<String>,
    pub topic: Option<String>,
    pub connected: Option<NaiveDateTime>,
    pub records: Vec<MessageRecord>,
    /// Records cut off by the end of the file and discarded.
    pub truncated: usize,
}

enum State {
    Default,
    Capturing(MessageRecord),
}

impl SubscriberLog {
    pub fn read(path: &Path) -> Result<Self, CollectorError> {
        let text = crate::read_text(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::parse(file_name, &text))
    }

    pub fn parse(file_name: impl Into<String>, text: &str) -> Self {
        let mut log = SubscriberLog {
            file_name: file_name.into(),
            client_id: None,
            topic: None,
            connected: None,
            records: Vec::new(),
            truncated: 0,
        };
        let mut state = State::Default;

        for line in text.split_inclusive('\n') {
            state = match state {
                State::Capturing(mut record) => {
                    let bare = line.trim_end();
                    if bare == SEPARATOR {
                        log.records.push(record);
                        State::Default
                    } else {
                        record.data.push_str(line);
                        // Only a JSON block closes on a bare brace.
                        if bare == "}" && record.data.starts_with('{') {
                            log.records.push(record);
                            State::Default
                        } else {
                            State::Capturing(record)
                        }
                    }
                }
                State::Default => log.scan(line.trim_end_matches(['\n', '\r'])),
            };
        }

        if let State::Capturing(record) = state {
            tracing::warn!(file = %log.file_name, topic = %record.topic, "discarding truncated record at end of file");
            log.truncated += 1;
        }
        log
    }

    fn scan(&mut self, line: &str) -> State {
        if let Some(rest) = line.strip_prefix("Client ID:") {
            if let Some(id) = rest.split_whitespace().next() {
                self.client_id = Some(id.to_string());
            }
            return State::Default;
        }
        if let Some(rest) = line.strip_prefix("Topic:") {
            let topic = rest
                .strip_prefix(char::is_whitespace)
                .and_then(|r| r.split_whitespace().next());
            if let Some(topic) = topic {
                self.topic = Some(topic.to_string());
            }
            return State::Default;
        }

        let Some((stamp, event)) = split_event(line) else {
            return State::Default;
        };
        let timestamp = parse_stamp(stamp);
        if timestamp.is_none() {
            tracing::warn!(file = %self.file_name, stamp = %stamp, "unreadable event time");
        }

        if event.starts_with("Connected") {
            self.connected = timestamp;
            return State::Default;
        }
        match parse_received(event) {
            Some((topic, latency_ms, message_id)) => State::Capturing(MessageRecord {
                timestamp,
                topic: topic.to_string(),
                message_id,
                latency_ms,
                data: String::new(),
            }),
            None => State::Default,
        }
    }
}

/// `[YYYY-MM-DD HH:MM:SS(.mmm)] event` → (stamp, event)
fn split_event(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('[')?;
    let (stamp, event) = rest.split_once(']')?;
    if !is_stamp_shape(stamp) || !event.starts_with(char::is_whitespace) {
        return None;
    }
    Some((stamp, event.trim_start()))
}

fn is_stamp_shape(stamp: &str) -> bool {
    let Some((date, time)) = stamp.split_once(char::is_whitespace) else {
        return false;
    };
    let time = time.trim_start();
    let time = time.split_once('.').map_or(time, |(hms, _)| hms);
    let numeric = |s: &str, sep: char| {
        let parts: Vec<&str> = s.split(sep).collect();
        parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    };
    numeric(date, '-') && numeric(time, ':')
}

fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// `Received on '<topic>'[ | Latency: X.XXms | Message ID: <id>]`
fn parse_received(event: &str) -> Option<(&str, Option<f64>, Option<String>)> {
    let rest = event.strip_prefix("Received on '")?;
    let (topic, rest) = rest.split_once('\'')?;

    let mut latency = None;
    let mut message_id = None;
    for part in rest.split(" | ") {
        if let Some(value) = part.strip_prefix("Latency: ") {
            latency = value.trim().trim_end_matches("ms").parse::<f64>().ok();
        } else if let Some(id) = part.strip_prefix("Message ID: ") {
            message_id = Some(id.trim().to_string());
        }
    }
    Some((topic, latency, message_id))
}
