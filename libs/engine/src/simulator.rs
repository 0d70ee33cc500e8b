//! Run coordinator: starts every unit, waits for the publishers, then winds down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BrokerEndpoint, SimConfig, SubscriberPlan};
use crate::error::EngineError;
use crate::event_log::spawn_event_log;
use crate::publisher::{PublisherReport, TopicPublisher};
use crate::subscriber::{DeliveryCounter, MessageObserver, SubscriberClient, SubscriberReport};
use crate::transport::BrokerConnector;

pub const PUBLISHER_LOG: &str = "publisher.log";

const READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    Publish,
    Subscribe,
    #[default]
    Both,
}

impl RunMode {
    pub fn publishes(self) -> bool {
        matches!(self, RunMode::Publish | RunMode::Both)
    }

    pub fn subscribes(self) -> bool {
        matches!(self, RunMode::Subscribe | RunMode::Both)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub mode: RunMode,
    pub output_dir: PathBuf,
    /// Grace period for in-flight deliveries after the last publisher finishes.
    pub linger: Duration,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Both,
            output_dir: PathBuf::from("logs"),
            linger: Duration::from_secs(2),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Reports
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Published(PublisherReport),
    Received(SubscriberReport),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// Topic URL or subscriber client id.
    pub name: String,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    /// Lines written to the publish event log.
    pub events_logged: u64,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().filter_map(|u| match &u.status {
            UnitStatus::Failed(reason) => Some((u.name.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn published(&self) -> u64 {
        self.units
            .iter()
            .map(|u| match &u.status {
                UnitStatus::Published(r) => r.published,
                _ => 0,
            })
            .sum()
    }

    pub fn received(&self) -> u64 {
        self.units
            .iter()
            .map(|u| match &u.status {
                UnitStatus::Received(r) => r.received,
                _ => 0,
            })
            .sum()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Simulator
// ═══════════════════════════════════════════════════════════════

pub struct Simulator {
    endpoint: Arc<BrokerEndpoint>,
    publishers: Vec<TopicPublisher>,
    subscribers: Vec<SubscriberPlan>,
    connector: Arc<dyn BrokerConnector>,
    observer: Arc<dyn MessageObserver>,
    options: SimulatorOptions,
}

impl Simulator {
    /// Resolves the whole configuration and builds every topic's generators.
    ///
    /// Any error here is fatal and nothing has been written to disk yet.
    pub fn new(
        config: &SimConfig,
        connector: Arc<dyn BrokerConnector>,
        options: SimulatorOptions,
    ) -> Result<Self, EngineError> {
        let endpoint = Arc::new(config.endpoint()?);
        let mut publishers = Vec::new();
        if options.mode.publishes() {
            for plan in config.topic_plans()? {
                publishers.push(TopicPublisher::new(plan, connector.clone())?);
            }
        }
        let subscribers = if options.mode.subscribes() {
            config.subscriber_plans(&options.output_dir)?
        } else {
            Vec::new()
        };
        Ok(Self {
            endpoint,
            publishers,
            subscribers,
            connector,
            observer: Arc::new(DeliveryCounter::default()),
            options,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Run until every publisher has finished (then linger), or until `shutdown`.
    ///
    /// In subscribe-only mode the run lasts until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunReport, EngineError> {
        let Simulator {
            endpoint,
            publishers,
            subscribers,
            connector,
            observer,
            options,
        } = self;

        tokio::fs::create_dir_all(&options.output_dir)
            .await
            .map_err(|e| EngineError::from(e).with_context(format!("create '{}'", options.output_dir.display())))?;

        let (event_sender, event_log) = if publishers.is_empty() {
            (None, None)
        } else {
            let (sender, handle) = spawn_event_log(options.output_dir.join(PUBLISHER_LOG)).await?;
            (Some(sender), Some(handle))
        };

        let mut clients = Vec::with_capacity(subscribers.len());
        for plan in subscribers {
            clients.push(SubscriberClient::create(plan, endpoint.clone(), connector.clone(), observer.clone()).await?);
        }

        tracing::info!(
            broker = %endpoint,
            publishers = publishers.len(),
            subscribers = clients.len(),
            output = %options.output_dir.display(),
            "run starting"
        );

        let units = shutdown.child_token();

        // ── subscribers first ──
        let mut sub_handles: Vec<(String, JoinHandle<Result<SubscriberReport, EngineError>>)> = Vec::new();
        let mut readies = Vec::new();
        for client in clients {
            let (tx, rx) = oneshot::channel();
            readies.push(rx);
            let name = client.client_id().to_string();
            let handle = tokio::spawn(client.notify_ready(tx).run(units.clone()));
            sub_handles.push((name, handle));
        }
        wait_ready(readies, &units).await;

        // ── then publishers ──
        let mut pub_handles: Vec<(String, JoinHandle<Result<PublisherReport, EngineError>>)> = Vec::new();
        if let Some(events) = &event_sender {
            for publisher in publishers {
                let name = publisher.topic().to_string();
                pub_handles.push((name, tokio::spawn(publisher.run(events.clone(), units.clone()))));
            }
        }
        drop(event_sender);

        let mut report = RunReport::default();
        let had_publishers = !pub_handles.is_empty();
        for (name, handle) in pub_handles {
            let status = match handle.await {
                Ok(Ok(r)) => UnitStatus::Published(r),
                Ok(Err(e)) => UnitStatus::Failed(e.to_string()),
                Err(e) => UnitStatus::Failed(EngineError::from(e).to_string()),
            };
            report.units.push(UnitReport { name, status });
        }

        if had_publishers && !units.is_cancelled() && !sub_handles.is_empty() {
            tracing::info!(linger_ms = options.linger.as_millis() as u64, "publishers done, waiting for deliveries");
            tokio::select! {
                _ = units.cancelled() => {}
                _ = tokio::time::sleep(options.linger) => {}
            }
        } else if !had_publishers && !sub_handles.is_empty() {
            tracing::info!("subscribing until interrupted");
            units.cancelled().await;
        }
        units.cancel();

        for (name, handle) in sub_handles {
            let status = match handle.await {
                Ok(Ok(r)) => UnitStatus::Received(r),
                Ok(Err(e)) => UnitStatus::Failed(e.to_string()),
                Err(e) => UnitStatus::Failed(EngineError::from(e).to_string()),
            };
            report.units.push(UnitReport { name, status });
        }

        if let Some(handle) = event_log {
            match handle.await {
                Ok(Ok(n)) => report.events_logged = n,
                Ok(Err(e)) => tracing::error!(error = %e, "publish event log failed"),
                Err(e) => tracing::error!(error = %e, "publish event log task failed"),
            }
        }

        for (name, reason) in report.failures() {
            tracing::error!(unit = %name, error = %reason, "unit failed");
        }
        tracing::info!(
            published = report.published(),
            received = report.received(),
            failed = report.failures().count(),
            "run finished"
        );
        Ok(report)
    }
}

/// Wait until every subscriber is subscribed or has given up.
async fn wait_ready(readies: Vec<oneshot::Receiver<()>>, token: &CancellationToken) {
    if readies.is_empty() {
        return;
    }
    let all = async {
        for rx in readies {
            let _ = rx.await;
        }
    };
    tokio::select! {
        _ = token.cancelled() => {}
        _ = all => {}
        _ = tokio::time::sleep(READY_TIMEOUT) => {
            tracing::warn!("not every subscriber was ready in time, starting publishers anyway");
        }
    }
}
