use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::capture::{LATENCY_CSV_HEADER, annotate};
use crate::config::{BrokerEndpoint, SubscriberPlan};
use crate::error::EngineError;
use crate::transport::{BrokerConnector, BrokerSession, IncomingMessage, SessionOptions, TransportError};
use crate::util::{log_timestamp, log_timestamp_at, now_ms_f64};

/// Closes every logged entry.
pub const SEPARATOR: &str = "----------------------------------------";

// ═══════════════════════════════════════════════════════════════
//  Observer
// ═══════════════════════════════════════════════════════════════

/// A delivery as seen by a subscriber, before it is logged.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedMessage<'a> {
    pub client_id: &'a str,
    pub topic: &'a str,
    pub payload: &'a [u8],
    /// Unix ms, taken before any processing.
    pub receive_ms: f64,
}

/// Shared per-message callback. Called from every subscriber task.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, message: &ReceivedMessage<'_>);
}

/// Counts deliveries across all subscribers.
#[derive(Debug, Default)]
pub struct DeliveryCounter {
    messages: AtomicU64,
    bytes: AtomicU64,
}

impl DeliveryCounter {
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl MessageObserver for DeliveryCounter {
    fn on_message(&self, message: &ReceivedMessage<'_>) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(message.payload.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            client = %message.client_id,
            topic = %message.topic,
            bytes = message.payload.len(),
            "message received"
        );
    }
}

// ═══════════════════════════════════════════════════════════════
//  SubscriberClient
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberReport {
    pub client_id: String,
    pub received: u64,
    pub with_latency: u64,
}

/// One subscription: writes `{client_id}.log` and `{client_id}.latency.csv`.
pub struct SubscriberClient {
    plan: SubscriberPlan,
    endpoint: Arc<BrokerEndpoint>,
    connector: Arc<dyn BrokerConnector>,
    observer: Arc<dyn MessageObserver>,
    log: BufWriter<File>,
    sidecar: Option<BufWriter<File>>,
    ready: Option<oneshot::Sender<()>>,
    received: u64,
    with_latency: u64,
}

impl SubscriberClient {
    /// Truncates the log and writes its header block.
    pub async fn create(
        plan: SubscriberPlan,
        endpoint: Arc<BrokerEndpoint>,
        connector: Arc<dyn BrokerConnector>,
        observer: Arc<dyn MessageObserver>,
    ) -> Result<Self, EngineError> {
        let file = File::create(&plan.log_path)
            .await
            .map_err(|e| EngineError::from(e).with_context(format!("create '{}'", plan.log_path.display())))?;
        remove_stale(&plan.latency_path).await?;

        let mut client = Self {
            plan,
            endpoint,
            connector,
            observer,
            log: BufWriter::new(file),
            sidecar: None,
            ready: None,
            received: 0,
            with_latency: 0,
        };
        let header = client.header();
        client.write_log(&header).await?;
        Ok(client)
    }

    /// Signal `ready` once the subscription is in place. Dropped unsent on failure.
    pub fn notify_ready(mut self, ready: oneshot::Sender<()>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.plan.client_id
    }

    fn user(&self) -> &str {
        self.plan.credentials.as_ref().map(|c| c.user.as_str()).unwrap_or("")
    }

    fn header(&self) -> String {
        let id = &self.plan.client_id;
        let password = self.plan.credentials.as_ref().map(|c| c.password.as_str()).unwrap_or("");
        let mut out = format!("=== MQTT Subscriber Log: {id} ===\n");
        out.push_str(&format!("Client ID: {id}\n"));
        out.push_str(&format!("User: {}\n", self.user()));
        out.push_str(&format!("Password: {password}\n"));
        out.push_str(&format!("Started: {}\n", log_timestamp()));
        out.push_str(&format!("Topic: {}\n", self.plan.filter));
        if !self.plan.description.is_empty() {
            out.push_str(&format!("Description: {}\n", self.plan.description));
        }
        out.push_str(&format!("Broker: {}\n", self.endpoint));
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");
        out
    }

    async fn write_log(&mut self, text: &str) -> Result<(), EngineError> {
        self.log.write_all(text.as_bytes()).await?;
        self.log.flush().await?;
        Ok(())
    }

    async fn log_event(&mut self, event: &str) -> Result<(), EngineError> {
        let line = format!("[{}] {event}\n", log_timestamp());
        self.write_log(&line).await
    }

    pub async fn run(mut self, token: CancellationToken) -> Result<SubscriberReport, EngineError> {
        let attempt = format!(
            "Attempting connection to {} with client ID '{}' and user '{}'",
            self.endpoint,
            self.plan.client_id,
            self.user()
        );
        self.log_event(&attempt).await?;

        let mut options = SessionOptions::new(&self.plan.client_id);
        options.clean_session = self.plan.clean_session;
        options.credentials = self.plan.credentials.clone();

        let connected = tokio::select! {
            _ = token.cancelled() => None,
            connected = self.connector.connect(options) => Some(connected),
        };
        let mut session = match connected {
            None => return Ok(self.report()),
            Some(Ok(session)) => session,
            Some(Err(e)) => return Err(self.fail(e).await),
        };

        if let Err(e) = session.subscribe(&self.plan.filter, self.plan.qos).await {
            let _ = session.disconnect().await;
            return Err(self.fail(e).await);
        }
        let connected = format!(
            "Connected with result code 0, subscribed to '{}' with user '{}'",
            self.plan.filter,
            self.user()
        );
        self.log_event(&connected).await?;
        tracing::info!(client = %self.plan.client_id, filter = %self.plan.filter, "subscribed");
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }

        let result = self.receive_loop(session.as_mut(), &token).await;

        self.log_event("Disconnecting from broker").await?;
        if let Err(e) = session.disconnect().await {
            tracing::debug!(client = %self.plan.client_id, error = %e, "disconnect");
        }
        self.flush_sidecar().await?;
        result?;

        tracing::info!(
            client = %self.plan.client_id,
            received = self.received,
            with_latency = self.with_latency,
            "subscriber finished"
        );
        Ok(self.report())
    }

    async fn fail(&mut self, e: TransportError) -> EngineError {
        tracing::error!(client = %self.plan.client_id, error = %e, "connection failed");
        if let Err(log_err) = self.log_event(&format!("Connection failed: {e}")).await {
            tracing::warn!(client = %self.plan.client_id, error = %log_err, "could not log failure");
        }
        EngineError::from(e).with_context(format!("subscriber '{}'", self.plan.client_id))
    }

    async fn receive_loop(
        &mut self,
        session: &mut dyn BrokerSession,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        loop {
            let incoming = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                incoming = session.recv() => incoming,
            };
            match incoming {
                Some(message) => self.handle(message).await?,
                None => {
                    self.log_event("Connection lost").await?;
                    return Err(TransportError::Closed.into());
                }
            }
        }
    }

    async fn handle(&mut self, message: IncomingMessage) -> Result<(), EngineError> {
        let receive_ms = now_ms_f64();
        let received_at = log_timestamp_at(receive_ms);
        self.observer.on_message(&ReceivedMessage {
            client_id: &self.plan.client_id,
            topic: &message.topic,
            payload: &message.payload,
            receive_ms,
        });
        self.received += 1;

        let annotated = annotate(&message.payload, receive_ms, &self.plan.metadata.field_prefix);
        let suffix = annotated.latency.as_ref().map(|l| l.log_suffix()).unwrap_or_default();
        let entry = format!(
            "[{received_at}] Received on '{}'{suffix}\n{}\n{SEPARATOR}\n",
            message.topic, annotated.body
        );
        self.write_log(&entry).await?;

        if let Some(sample) = &annotated.latency {
            self.with_latency += 1;
            let row = sample.csv_row(&received_at, &message.topic);
            self.append_sidecar(&row).await?;
        }
        Ok(())
    }

    async fn append_sidecar(&mut self, row: &str) -> Result<(), EngineError> {
        if self.sidecar.is_none() {
            let path = &self.plan.latency_path;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| EngineError::from(e).with_context(format!("open '{}'", path.display())))?;
            let fresh = file.metadata().await?.len() == 0;
            let mut out = BufWriter::new(file);
            if fresh {
                out.write_all(LATENCY_CSV_HEADER.as_bytes()).await?;
                out.write_all(b"\n").await?;
            }
            self.sidecar = Some(out);
        }
        if let Some(out) = self.sidecar.as_mut() {
            out.write_all(row.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Ok(())
    }

    async fn flush_sidecar(&mut self) -> Result<(), EngineError> {
        if let Some(out) = self.sidecar.as_mut() {
            out.flush().await?;
        }
        Ok(())
    }

    fn report(&self) -> SubscriberReport {
        SubscriberReport {
            client_id: self.plan.client_id.clone(),
            received: self.received,
            with_latency: self.with_latency,
        }
    }
}

/// A sidecar left by an earlier run would mix two runs' rows.
async fn remove_stale(path: &Path) -> Result<(), EngineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::from(e).with_context(format!("remove '{}'", path.display()))),
    }
}
