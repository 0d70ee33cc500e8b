use chrono::{Local, TimeZone};

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Current Unix time in milliseconds, with microsecond resolution.
pub fn now_ms_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as f64
        / 1000.0
}

/// `YYYY-MM-DD HH:MM:SS.mmm` in local time.
pub fn log_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// `YYYY-MM-DD HH:MM:SS.mmm` in local time for a Unix ms instant.
pub fn log_timestamp_at(ms: f64) -> String {
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => log_timestamp(),
    }
}

/// `HH:MM:SS` in local time.
pub fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// File-name-safe form of a topic filter: `#` → `wildcard`, `+` → `plus`, `/` → `-`.
pub fn safe_topic_name(filter: &str) -> String {
    filter.replace('#', "wildcard").replace('+', "plus").replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names() {
        assert_eq!(safe_topic_name("sensor/#"), "sensor-wildcard");
        assert_eq!(safe_topic_name("a/+/b"), "a-plus-b");
        assert_eq!(safe_topic_name("#"), "wildcard");
    }

    #[test]
    fn timestamp_shapes() {
        let ts = log_timestamp();
        assert_eq!(ts.len(), "2024-01-01 00:00:00.000".len());
        assert_eq!(&ts[10..11], " ");
        assert_eq!(clock_time().len(), 8);
        assert_eq!(log_timestamp_at(now_ms_f64()).len(), ts.len());
    }
}
