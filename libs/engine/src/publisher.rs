use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::TopicPlan;
use crate::error::EngineError;
use crate::event_log::EventSender;
use crate::payload::{PayloadComposer, Tick};
use crate::transport::{BrokerConnector, BrokerSession, SessionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Init,
    Connecting,
    Publishing,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherOutcome {
    /// Every generator went inactive.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherReport {
    pub topic: String,
    pub published: u64,
    /// Ticks dropped because a generator failed.
    pub skipped: u64,
    pub outcome: PublisherOutcome,
}

/// Publishes synthetic payloads on one topic until its generators run dry.
pub struct TopicPublisher {
    plan: TopicPlan,
    composer: PayloadComposer,
    connector: Arc<dyn BrokerConnector>,
    state: PublisherState,
    published: u64,
    skipped: u64,
}

impl TopicPublisher {
    /// Builds the topic's generators; configuration problems surface here, before any connection.
    pub fn new(plan: TopicPlan, connector: Arc<dyn BrokerConnector>) -> Result<Self, EngineError> {
        let composer = PayloadComposer::new(&plan).map_err(|e| e.with_context(format!("topic '{}'", plan.url)))?;
        Ok(Self {
            plan,
            composer,
            connector,
            state: PublisherState::Init,
            published: 0,
            skipped: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.plan.url
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    fn transition(&mut self, next: PublisherState) {
        tracing::info!(topic = %self.plan.url, from = ?self.state, to = ?next, "publisher state");
        self.state = next;
    }

    fn report(&self, outcome: PublisherOutcome) -> PublisherReport {
        PublisherReport {
            topic: self.plan.url.clone(),
            published: self.published,
            skipped: self.skipped,
            outcome,
        }
    }

    /// Every successful publish is recorded on `events`.
    pub async fn run(mut self, events: EventSender, token: CancellationToken) -> Result<PublisherReport, EngineError> {
        self.transition(PublisherState::Connecting);

        let mut options = SessionOptions::new(&self.plan.url);
        options.clean_session = self.plan.client.clean_session;
        let connected = tokio::select! {
            _ = token.cancelled() => None,
            connected = self.connector.connect(options) => Some(connected),
        };
        let mut session = match connected {
            None => {
                self.transition(PublisherState::Terminated);
                return Ok(self.report(PublisherOutcome::Cancelled));
            }
            Some(Err(e)) => {
                tracing::error!(topic = %self.plan.url, error = %e, "connection failed");
                self.transition(PublisherState::Terminated);
                return Err(e.into());
            }
            Some(Ok(session)) => session,
        };

        self.transition(PublisherState::Publishing);
        let result = self.publish_loop(session.as_mut(), &events, &token).await;
        self.transition(PublisherState::Terminated);

        if let Err(e) = session.disconnect().await {
            tracing::debug!(topic = %self.plan.url, error = %e, "disconnect");
        }

        let outcome = result?;
        tracing::info!(
            topic = %self.plan.url,
            published = self.published,
            skipped = self.skipped,
            outcome = ?outcome,
            "publisher finished"
        );
        Ok(self.report(outcome))
    }

    async fn publish_loop(
        &mut self,
        session: &mut dyn BrokerSession,
        events: &EventSender,
        token: &CancellationToken,
    ) -> Result<PublisherOutcome, EngineError> {
        let client = self.plan.client.clone();
        loop {
            if token.is_cancelled() {
                return Ok(PublisherOutcome::Cancelled);
            }

            match self.composer.next_tick() {
                Tick::Exhausted => {
                    tracing::info!(topic = %self.plan.url, "all generators inactive");
                    return Ok(PublisherOutcome::Exhausted);
                }
                Tick::Skipped(e) => {
                    tracing::warn!(topic = %self.plan.url, error = %e, "generator retired, tick skipped");
                    self.skipped += 1;
                }
                Tick::Payload(payload) => {
                    let body = Bytes::from(serde_json::to_vec(&payload)?);
                    session
                        .publish(&self.plan.url, client.qos, client.retain, body)
                        .await
                        .map_err(|e| e.with_context(format!("publish on '{}'", self.plan.url)))?;
                    events.record(&self.plan.url).await;
                    self.published += 1;
                    tracing::debug!(topic = %self.plan.url, n = self.published, "published");
                }
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(PublisherOutcome::Cancelled),
                _ = tokio::time::sleep(client.time_interval) => {}
            }
        }
    }
}
