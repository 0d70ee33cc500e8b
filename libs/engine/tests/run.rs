//! End-to-end runs against the in-process loopback broker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use loadsim_engine::{
    BrokerConnector, DeliveryCounter, EngineError, LoopbackBroker, PublisherOutcome, RunMode, RunReport, SimConfig,
    Simulator, SimulatorOptions, UnitStatus,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn options(dir: &Path, mode: RunMode) -> SimulatorOptions {
    SimulatorOptions {
        mode,
        output_dir: dir.to_path_buf(),
        linger: Duration::from_millis(200),
    }
}

async fn run(settings: Value, broker: LoopbackBroker, opts: SimulatorOptions, shutdown: CancellationToken) -> RunReport {
    let config: SimConfig = serde_json::from_value(settings).expect("settings");
    let connector: Arc<dyn BrokerConnector> = Arc::new(broker);
    Simulator::new(&config, connector, opts)
        .expect("simulator")
        .run(shutdown)
        .await
        .expect("run")
}

fn publisher<'a>(report: &'a RunReport, topic: &str) -> &'a loadsim_engine::PublisherReport {
    report
        .units
        .iter()
        .find_map(|u| match &u.status {
            UnitStatus::Published(r) if u.name == topic => Some(r),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no publisher report for {topic}: {report:?}"))
}

fn subscriber<'a>(report: &'a RunReport, client_id: &str) -> &'a loadsim_engine::SubscriberReport {
    report
        .units
        .iter()
        .find_map(|u| match &u.status {
            UnitStatus::Received(r) if u.name == client_id => Some(r),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no subscriber report for {client_id}: {report:?}"))
}

#[tokio::test]
async fn finite_topic_publishes_three_payloads_then_stops() {
    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "TIME_INTERVAL": 0.01,
        "TOPICS": [{
            "TYPE": "single", "PREFIX": "sensor/1",
            "PAYLOAD_ROOT": {"unit": "C"},
            "DATA": [{"TYPE": "int", "NAME": "n", "MIN_VALUE": 0, "MAX_VALUE": 2, "STEP": 1}]
        }],
        "SUBSCRIBERS": [{"TOPIC": "sensor/#", "DESCRIPTION": "all sensors"}]
    });

    let report = run(settings, LoopbackBroker::new(), options(dir.path(), RunMode::Both), CancellationToken::new()).await;

    assert_eq!(report.failures().count(), 0, "{report:?}");
    let p = publisher(&report, "sensor/1");
    assert_eq!(p.published, 3);
    assert_eq!(p.outcome, PublisherOutcome::Exhausted);
    assert_eq!(report.events_logged, 3);

    let s = subscriber(&report, "subscriber-sensor-wildcard-0");
    assert_eq!(s.received, 3);
    assert_eq!(s.with_latency, 3);

    let publog = std::fs::read_to_string(dir.path().join("publisher.log")).unwrap();
    assert_eq!(publog.lines().count(), 3);
    assert!(publog.lines().all(|l| l.ends_with("] Data published on: sensor/1")));

    let log = std::fs::read_to_string(dir.path().join("subscriber-sensor-wildcard-0.log")).unwrap();
    assert!(log.starts_with("=== MQTT Subscriber Log: subscriber-sensor-wildcard-0 ===\n"));
    assert!(log.contains("\nDescription: all sensors\n"));
    assert!(log.contains("\nBroker: localhost:1883\n"));
    assert!(log.contains("Connected with result code 0, subscribed to 'sensor/#'"));
    assert_eq!(log.matches("] Received on 'sensor/1' | Latency: ").count(), 3);
    assert_eq!(log.matches("\n----------------------------------------\n").count(), 3);
    assert!(log.trim_end().ends_with("] Disconnecting from broker"));
    for n in 0..3 {
        assert!(log.contains(&format!("\"n\": {n}")), "missing n={n}");
    }

    let sidecar = std::fs::read_to_string(dir.path().join("subscriber-sensor-wildcard-0.latency.csv")).unwrap();
    let mut rows = sidecar.lines();
    assert_eq!(rows.next(), Some("timestamp,topic,message_id,send_time_ms,receive_time_ms,latency_ms"));
    let rows: Vec<Vec<&str>> = rows.map(|r| r.split(',').collect()).collect();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.len(), 6);
        assert_eq!(row[1], "sensor/1");
        let send: f64 = row[3].parse().unwrap();
        let receive: f64 = row[4].parse().unwrap();
        let latency: f64 = row[5].parse().unwrap();
        assert!((receive - send - latency).abs() <= 0.01);
        assert!(latency >= 0.0);
    }
}

#[tokio::test]
async fn topic_without_active_generators_never_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "TOPICS": [{"TYPE": "single", "PREFIX": "idle", "DATA": [{"TYPE": "bool", "NAME": "b", "MAX_COUNT": 0}]}],
        "SUBSCRIBERS": [{"TOPIC": "idle"}]
    });

    let report = run(settings, LoopbackBroker::new(), options(dir.path(), RunMode::Both), CancellationToken::new()).await;

    let p = publisher(&report, "idle");
    assert_eq!(p.published, 0);
    assert_eq!(p.outcome, PublisherOutcome::Exhausted);
    assert_eq!(subscriber(&report, "subscriber-idle-0").received, 0);
    assert_eq!(std::fs::read_to_string(dir.path().join("publisher.log")).unwrap(), "");
    assert!(!dir.path().join("subscriber-idle-0.latency.csv").exists());
}

#[tokio::test]
async fn multiple_topic_expands_into_independent_publishers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "TIME_INTERVAL": 0.01,
        "INCLUDE_TIMESTAMP": false,
        "TOPICS": [{
            "TYPE": "multiple", "PREFIX": "sensor", "RANGE_START": 1, "RANGE_END": 3,
            "DATA": [{"TYPE": "raw_values", "NAME": "state", "VALUES": ["on", "off"]}]
        }],
        "SUBSCRIBERS": [{"TOPIC": "sensor/+", "NUMBER": 2}]
    });
    let counter = Arc::new(DeliveryCounter::default());

    let config: SimConfig = serde_json::from_value(settings).unwrap();
    let connector: Arc<dyn BrokerConnector> = Arc::new(LoopbackBroker::new());
    let report = Simulator::new(&config, connector, options(dir.path(), RunMode::Both))
        .unwrap()
        .with_observer(counter.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    for topic in ["sensor/1", "sensor/2", "sensor/3"] {
        assert_eq!(publisher(&report, topic).published, 2);
    }
    for id in ["subscriber-sensor-plus-0", "subscriber-sensor-plus-1"] {
        let s = subscriber(&report, id);
        assert_eq!(s.received, 6);
        // no timestamp field, so no latency
        assert_eq!(s.with_latency, 0);
    }
    assert_eq!(counter.messages(), 12);
    assert_eq!(report.published(), 6);
    assert_eq!(report.received(), 12);
}

#[tokio::test]
async fn rejected_subscriber_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "SUBSCRIBERS": [
            {"TOPIC": "a/#", "USERS": ["alice"], "PASSWORDS": ["secret"]},
            {"TOPIC": "b/#", "USERS": ["mallory"], "PASSWORDS": ["guess"]}
        ]
    });
    let broker = LoopbackBroker::with_accounts([("alice", "secret")]);
    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.cancel();
    });

    let report = run(settings, broker, options(dir.path(), RunMode::Subscribe), shutdown).await;

    let failures: Vec<(&str, &str)> = report.failures().collect();
    assert_eq!(failures.len(), 1, "{report:?}");
    assert_eq!(failures[0].0, "subscriber-b-wildcard-0");
    assert_eq!(subscriber(&report, "subscriber-a-wildcard-0").received, 0);

    let failed_log = std::fs::read_to_string(dir.path().join("subscriber-b-wildcard-0.log")).unwrap();
    assert!(failed_log.contains("User: mallory\n"));
    assert!(failed_log.contains("Attempting connection to localhost:1883 with client ID 'subscriber-b-wildcard-0' and user 'mallory'"));
    assert!(failed_log.contains("Connection failed:"));
    assert!(!dir.path().join("publisher.log").exists());
}

#[tokio::test]
async fn shutdown_cancels_endless_publishers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "TIME_INTERVAL": 0.02,
        "TOPICS": [{
            "TYPE": "list", "PREFIX": "room", "LIST": ["kitchen"],
            "DATA": [{"TYPE": "float", "NAME": "t", "MIN_VALUE": 15, "MAX_VALUE": 25, "MAX_STEP": 0.5, "SEED": 1}]
        }],
        "SUBSCRIBERS": [{"TOPIC": "room/kitchen"}]
    });
    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.cancel();
    });

    let report = run(settings, LoopbackBroker::new(), options(dir.path(), RunMode::Both), shutdown).await;

    let p = publisher(&report, "room/kitchen");
    assert_eq!(p.outcome, PublisherOutcome::Cancelled);
    assert!(p.published > 0);
    let s = subscriber(&report, "subscriber-room-kitchen-0");
    assert!(s.received <= p.published);
    assert!(s.received > 0);
}

#[tokio::test]
async fn bad_expression_fails_before_any_file_is_touched() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("publisher.log"), "[10:00:00] Data published on: sensor/1\n").unwrap();
    let fresh = dir.path().join("fresh");
    let settings = json!({
        "TOPICS": [{
            "TYPE": "single", "PREFIX": "sensor/1",
            "DATA": [
                {"TYPE": "math_expression", "NAME": "derived", "MATH_EXPRESSION": "later + 1"},
                {"TYPE": "int", "NAME": "later", "MIN_VALUE": 0, "MAX_VALUE": 2, "STEP": 1}
            ]
        }]
    });
    let config: SimConfig = serde_json::from_value(settings).unwrap();

    for output in [dir.path(), fresh.as_path()] {
        let connector: Arc<dyn BrokerConnector> = Arc::new(LoopbackBroker::new());
        match Simulator::new(&config, connector, options(output, RunMode::Both)) {
            Err(EngineError::Config(reason)) => assert!(reason.contains("'later'"), "{reason}"),
            Err(other) => panic!("expected a config error, got {other}"),
            Ok(_) => panic!("forward reference accepted"),
        }
    }

    assert_eq!(
        std::fs::read_to_string(dir.path().join("publisher.log")).unwrap(),
        "[10:00:00] Data published on: sensor/1\n"
    );
    assert!(!fresh.exists());
}

#[tokio::test]
async fn collector_recovers_what_the_subscriber_wrote() {
    assert_eq!(loadsim_engine::subscriber::SEPARATOR, loadsim_collector::sublog::SEPARATOR);

    let dir = tempfile::tempdir().unwrap();
    let settings = json!({
        "TIME_INTERVAL": 0.01,
        "TOPICS": [{
            "TYPE": "multiple", "PREFIX": "sensor", "RANGE_START": 1, "RANGE_END": 2,
            "PAYLOAD_ROOT": {"site": {"name": "lab", "floor": 2}},
            "DATA": [{"TYPE": "int", "NAME": "n", "MIN_VALUE": 0, "MAX_VALUE": 2, "STEP": 1}]
        }],
        "SUBSCRIBERS": [{"TOPIC": "sensor/#"}]
    });

    let report = run(settings, LoopbackBroker::new(), options(dir.path(), RunMode::Both), CancellationToken::new()).await;
    assert_eq!(report.failures().count(), 0, "{report:?}");

    let collection = loadsim_collector::collect(dir.path(), &dir.path().join("publisher.log")).unwrap();
    assert_eq!(collection.publishes.count("sensor/1"), 3);
    assert_eq!(collection.publishes.count("sensor/2"), 3);
    assert_eq!(collection.subscribers.len(), 1);

    let log = &collection.subscribers[0];
    assert_eq!(log.client_id.as_deref(), Some("subscriber-sensor-wildcard-0"));
    assert_eq!(log.topic.as_deref(), Some("sensor/#"));
    assert!(log.connected.is_some());
    assert_eq!(log.truncated, 0);
    assert_eq!(log.records.len(), 6);

    let sidecar = std::fs::read_to_string(dir.path().join("subscriber-sensor-wildcard-0.latency.csv")).unwrap();
    let rows: Vec<Vec<&str>> = sidecar.lines().skip(1).map(|r| r.split(',').collect()).collect();
    assert_eq!(rows.len(), log.records.len());
    for (record, row) in log.records.iter().zip(&rows) {
        assert_eq!(record.topic, row[1]);
        assert_eq!(record.message_id.as_deref(), Some(row[2]));
        assert_eq!(record.latency_ms, Some(row[5].parse::<f64>().unwrap()));
        assert!(record.timestamp.is_some());
        assert!(record.data.starts_with("{\n") && record.data.ends_with("\n}\n"), "{}", record.data);
        assert!(record.data.contains("\"floor\": 2"));
    }

    let received = collection.received_by_topic();
    assert_eq!(received.get("sensor/1"), Some(&3));
    assert_eq!(received.get("sensor/2"), Some(&3));
}
