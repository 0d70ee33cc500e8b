//! Rendering of received payloads for the subscriber log.

use serde_json::Value;

/// Column header of a latency sidecar file.
pub const LATENCY_CSV_HEADER: &str = "timestamp,topic,message_id,send_time_ms,receive_time_ms,latency_ms";

const TEXT_LIMIT: usize = 100;
const TEXT_KEEP: usize = 97;

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub message_id: String,
    /// Sender's timestamp exactly as it appeared in the payload.
    pub send_time: String,
    pub send_ms: f64,
    pub receive_ms: f64,
    pub latency_ms: f64,
}

impl LatencySample {
    /// One sidecar row; `received_at` is the formatted local receive time.
    pub fn csv_row(&self, received_at: &str, topic: &str) -> String {
        format!(
            "{received_at},{},{},{},{:.3},{:.2}",
            csv_field(topic),
            csv_field(&self.message_id),
            csv_field(&self.send_time),
            self.receive_ms,
            self.latency_ms
        )
    }

    /// ` | Latency: X.XXms | Message ID: id`
    pub fn log_suffix(&self) -> String {
        format!(" | Latency: {:.2}ms | Message ID: {}", self.latency_ms, self.message_id)
    }
}

/// Quote a field holding a comma, quote or line break, doubling inner quotes.
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotated {
    pub body: String,
    pub latency: Option<LatencySample>,
}

/// Render `payload` for the log and derive its latency when it carries a send timestamp.
///
/// The timestamp is looked up as `{prefix}timestamp`, then `timestamp`; the
/// matching `latency_ms` and `message_id` fields use the same prefix.
pub fn annotate(payload: &[u8], receive_ms: f64, prefix: &str) -> Annotated {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Annotated {
            body: format!("<binary data: {} bytes>", payload.len()),
            latency: None,
        };
    };
    let Ok(mut json) = serde_json::from_str::<Value>(text) else {
        return Annotated {
            body: truncate(text),
            latency: None,
        };
    };

    let mut latency = None;
    if let Value::Object(fields) = &mut json {
        for p in [prefix, ""] {
            let Some(send) = fields.get(&format!("{p}timestamp")) else {
                continue;
            };
            let Some(send_ms) = send.as_f64() else {
                continue;
            };
            let send_time = send.to_string();
            let latency_ms = receive_ms - send_ms;
            fields.insert(format!("{p}latency_ms"), Value::from(round2(latency_ms)));
            let message_id = match fields.get(&format!("{p}message_id")) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "N/A".into(),
            };
            latency = Some(LatencySample {
                message_id,
                send_time,
                send_ms,
                receive_ms,
                latency_ms,
            });
            break;
        }
    }

    let body = serde_json::to_string_pretty(&json).unwrap_or_else(|_| text.to_string());
    Annotated { body, latency }
}

fn truncate(text: &str) -> String {
    if text.chars().count() < TEXT_LIMIT {
        return text.to_string();
    }
    let kept: String = text.chars().take(TEXT_KEEP).collect();
    format!("{kept}...")
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latency_from_prefixed_timestamp() {
        let payload = json!({"t": 21.5, "_message_id": "abc123", "_timestamp": 1_700_000_000_000i64});
        let a = annotate(payload.to_string().as_bytes(), 1_700_000_000_012.5, "_");

        let sample = a.latency.unwrap();
        assert_eq!(sample.latency_ms, 12.5);
        assert_eq!(sample.message_id, "abc123");
        assert_eq!(sample.log_suffix(), " | Latency: 12.50ms | Message ID: abc123");
        assert_eq!(
            sample.csv_row("2024-01-01 00:00:00.012", "sensor/1"),
            "2024-01-01 00:00:00.012,sensor/1,abc123,1700000000000,1700000000012.500,12.50"
        );

        let logged: Value = serde_json::from_str(&a.body).unwrap();
        assert_eq!(logged["_latency_ms"], json!(12.5));
        assert!(a.body.contains("\n  \"t\": 21.5"));
    }

    #[test]
    fn sidecar_row_quotes_fields_with_commas() {
        let payload = json!({"_message_id": "a,\"b\"", "_timestamp": 1000});
        let sample = annotate(payload.to_string().as_bytes(), 1002.0, "_").latency.unwrap();
        assert_eq!(
            sample.csv_row("2024-01-01 00:00:01.002", "site,1/temp"),
            "2024-01-01 00:00:01.002,\"site,1/temp\",\"a,\"\"b\"\"\",1000,1002.000,2.00"
        );
    }

    #[test]
    fn unprefixed_fallback_and_missing_id() {
        let a = annotate(br#"{"timestamp": 1000}"#, 1500.0, "meta_");
        let sample = a.latency.unwrap();
        assert_eq!(sample.latency_ms, 500.0);
        assert_eq!(sample.message_id, "N/A");
        assert!(a.body.contains("\"latency_ms\": 500.0"));
    }

    #[test]
    fn json_without_timestamp_has_no_latency() {
        let a = annotate(br#"{"value": 1}"#, 1.0, "_");
        assert!(a.latency.is_none());
        assert_eq!(a.body, "{\n  \"value\": 1\n}");
    }

    #[test]
    fn text_and_binary_bodies() {
        assert_eq!(annotate(b"hello", 0.0, "_").body, "hello");

        let long = "x".repeat(100);
        let body = annotate(long.as_bytes(), 0.0, "_").body;
        assert_eq!(body.len(), 100);
        assert!(body.ends_with("..."));

        let short = "y".repeat(99);
        assert_eq!(annotate(short.as_bytes(), 0.0, "_").body, short);

        assert_eq!(annotate(&[0xff, 0xfe, 0x00], 0.0, "_").body, "<binary data: 3 bytes>");
    }
}
