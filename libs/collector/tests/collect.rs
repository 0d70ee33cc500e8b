//! Collecting a log directory laid out the way a run leaves it.

use std::fs;
use std::path::Path;

use loadsim_collector::latency::{self, STATISTICS_FILE};
use loadsim_collector::{CollectorError, LatencySet, collect};

const SEP: &str = "----------------------------------------";

fn subscriber_log(id: &str, filter: &str, entries: &[(&str, &str)]) -> String {
    let mut out = format!(
        "=== MQTT Subscriber Log: {id} ===\nClient ID: {id}\nUser: \nPassword: \n\
         Started: 2025-06-01 10:00:00.000\nTopic: {filter}\nBroker: localhost:1883\n{}\n\n\
         [2025-06-01 10:00:00.010] Attempting connection to localhost:1883 with client ID '{id}' and user ''\n\
         [2025-06-01 10:00:00.020] Connected with result code 0, subscribed to '{filter}' with user ''\n",
        "=".repeat(50)
    );
    for (topic, value) in entries {
        out.push_str(&format!(
            "[2025-06-01 10:00:01.000] Received on '{topic}' | Latency: 1.50ms | Message ID: m\n{{\n  \"v\": {value}\n}}\n{SEP}\n"
        ));
    }
    out
}

fn layout(dir: &Path) {
    fs::write(
        dir.join("publisher.log"),
        "[10:00:01] Data published on: sensor/1\n[10:00:01] Data published on: sensor/2\n[10:00:02] Data published on: sensor/1\n",
    )
    .unwrap();
    // written out of order on purpose
    fs::write(
        dir.join("subscriber-sensor-plus-1.log"),
        subscriber_log("subscriber-sensor-plus-1", "sensor/+", &[("sensor/2", "1")]),
    )
    .unwrap();
    fs::write(
        dir.join("subscriber-sensor-plus-0.log"),
        subscriber_log("subscriber-sensor-plus-0", "sensor/+", &[("sensor/1", "1"), ("sensor/2", "22"), ("sensor/1", "3")]),
    )
    .unwrap();
    fs::write(
        dir.join("subscriber-sensor-plus-0.latency.csv"),
        "timestamp,topic,message_id,send_time_ms,receive_time_ms,latency_ms\n\
         2025-06-01 10:00:01.000,sensor/1,m,1000,1001.500,1.50\n\
         2025-06-01 10:00:01.000,sensor/2,m,1000,1002.500,2.50\n",
    )
    .unwrap();
    fs::write(dir.join("notes.txt"), "not a log").unwrap();
}

#[test]
fn summary_is_deterministic_and_ordered() {
    let dir = tempfile::tempdir().unwrap();
    layout(dir.path());
    let publog = dir.path().join("publisher.log");

    let first = collect(dir.path(), &publog).unwrap();
    let second = collect(dir.path(), &publog).unwrap();
    assert_eq!(first.render(), second.render());

    let ids: Vec<&str> = first.subscribers.iter().filter_map(|s| s.client_id.as_deref()).collect();
    assert_eq!(ids, vec!["subscriber-sensor-plus-0", "subscriber-sensor-plus-1"]);

    let text = first.render();
    assert!(text.starts_with("Published Topics: 2\n"));
    assert!(text.contains("Subscribers Reporting: 2\n"));
    // "{\n  \"v\": 1\n}\n" is 13 bytes
    assert!(text.contains(&format!("{:41}{:<25} {:>5}, 26 bytes", "", "sensor/1", 2)));
    assert!(text.contains(&format!("{:41}{:<25} {:>5}, 14 bytes", "", "sensor/2", 1)));
    assert!(text.contains(&format!("{:<25} {:>9} {:>9}", "sensor/2", 1, 2)));
}

#[test]
fn latency_statistics_file() {
    let dir = tempfile::tempdir().unwrap();
    layout(dir.path());
    let out = tempfile::tempdir().unwrap();

    let set = LatencySet::load(dir.path()).unwrap();
    let rows = latency::compare(&[("run1", &set)]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].topic, "sensor-plus-sensor/1");

    let path = latency::write_statistics(&rows, &out.path().join("stats")).unwrap();
    assert_eq!(path.file_name().unwrap(), STATISTICS_FILE);
    let csv = fs::read_to_string(path).unwrap();
    assert_eq!(csv.lines().nth(1), Some("sensor-plus-sensor/1,run1,1,1.500,1.500,1.500,1.500,"));
}

#[test]
fn directory_without_sidecars_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LatencySet::load(dir.path()).unwrap_err();
    assert!(matches!(err, CollectorError::NoLatencyData(_)));
}

#[test]
fn missing_publisher_log_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = collect(dir.path(), &dir.path().join("absent.log")).unwrap_err();
    assert!(matches!(err, CollectorError::Io { .. }));
}

#[test]
fn log_cut_mid_character_does_not_stop_collection() {
    let dir = tempfile::tempdir().unwrap();
    layout(dir.path());
    let mut bytes = subscriber_log("subscriber-s-1-0", "s/1", &[("s/1", "1")]).into_bytes();
    bytes.extend_from_slice(b"[2025-06-01 10:00:02.000] Received on 's/1'\n{\n  \"city\": \"Z");
    bytes.push(0xC3);
    fs::write(dir.path().join("subscriber-s-1-0.log"), bytes).unwrap();

    let collection = collect(dir.path(), &dir.path().join("publisher.log")).unwrap();
    assert_eq!(collection.subscribers.len(), 3);
    let cut = &collection.subscribers[0];
    assert_eq!(cut.file_name, "subscriber-s-1-0.log");
    assert_eq!(cut.records.len(), 1);
    assert_eq!(cut.truncated, 1);
    assert!(collection.render().contains("(1 truncated record(s) discarded)"));
}
