use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::v5;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BoxFuture, BrokerConnector, BrokerSession, IncomingMessage, Qos, SessionOptions, TransportError};
use crate::config::{BrokerEndpoint, ProtocolVersion};

const CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
const SUBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one SUBSCRIBE as reported by the broker.
type SubAckResult = Result<(), String>;

/// Broker connector backed by `rumqttc`, speaking MQTT 3.1.1 or 5.
pub struct MqttConnector {
    endpoint: Arc<BrokerEndpoint>,
}

impl MqttConnector {
    pub fn new(endpoint: Arc<BrokerEndpoint>) -> Self {
        Self { endpoint }
    }
}

impl BrokerConnector for MqttConnector {
    fn connect(&self, options: SessionOptions) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, TransportError>> {
        Box::pin(async move {
            let session = match self.endpoint.protocol {
                ProtocolVersion::V311 => connect_v4(&self.endpoint, &options).await,
                ProtocolVersion::V5 => connect_v5(&self.endpoint, &options).await,
            }
            .map_err(|e| e.with_context(format!("{} as '{}'", self.endpoint, options.client_id)))?;
            Ok(Box::new(session) as Box<dyn BrokerSession>)
        })
    }
}

// ── MQTT 3.1.1 ──

async fn connect_v4(endpoint: &BrokerEndpoint, options: &SessionOptions) -> Result<MqttSession, TransportError> {
    let mut mqtt = rumqttc::MqttOptions::new(&options.client_id, &endpoint.host, endpoint.port);
    mqtt.set_keep_alive(options.keep_alive);
    mqtt.set_clean_session(options.clean_session);
    if let Some(c) = &options.credentials {
        mqtt.set_credentials(&c.user, &c.password);
    }

    let (client, mut eventloop) = rumqttc::AsyncClient::new(mqtt, CHANNEL_CAPACITY);

    // Refusals surface as poll errors, so any CONNACK means accepted.
    handshake(async {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    })
    .await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stop = CancellationToken::new();
    let token = stop.clone();
    let client_id = options.client_id.clone();
    let driver = tokio::spawn(async move {
        loop {
            let polled = tokio::select! {
                _ = token.cancelled() => break,
                polled = eventloop.poll() => polled,
            };
            match polled {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::SubAck(ack))) => {
                    let _ = ack_tx.try_send(suback_v4(&ack));
                }
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(p))) => {
                    let msg = IncomingMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.clone(),
                    };
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(client = %client_id, error = %e, "event loop stopped");
                    break;
                }
            }
        }
    });

    Ok(MqttSession {
        client: Client::V4(client),
        incoming: rx,
        acks: ack_rx,
        driver,
        stop,
    })
}

// ── MQTT 5 ──

async fn connect_v5(endpoint: &BrokerEndpoint, options: &SessionOptions) -> Result<MqttSession, TransportError> {
    let mut mqtt = v5::MqttOptions::new(&options.client_id, &endpoint.host, endpoint.port);
    mqtt.set_keep_alive(options.keep_alive);
    mqtt.set_clean_start(options.clean_session);
    if let Some(c) = &options.credentials {
        mqtt.set_credentials(&c.user, &c.password);
    }

    let (client, mut eventloop) = v5::AsyncClient::new(mqtt, CHANNEL_CAPACITY);

    handshake(async {
        loop {
            match eventloop.poll().await {
                Ok(v5::Event::Incoming(v5::mqttbytes::v5::Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    })
    .await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stop = CancellationToken::new();
    let token = stop.clone();
    let client_id = options.client_id.clone();
    let driver = tokio::spawn(async move {
        loop {
            let polled = tokio::select! {
                _ = token.cancelled() => break,
                polled = eventloop.poll() => polled,
            };
            match polled {
                Ok(v5::Event::Incoming(v5::mqttbytes::v5::Packet::SubAck(ack))) => {
                    let _ = ack_tx.try_send(suback_v5(&ack));
                }
                Ok(v5::Event::Incoming(v5::mqttbytes::v5::Packet::Publish(p))) => {
                    let msg = IncomingMessage {
                        topic: String::from_utf8_lossy(&p.topic).into_owned(),
                        payload: p.payload.clone(),
                    };
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(client = %client_id, error = %e, "event loop stopped");
                    break;
                }
            }
        }
    });

    Ok(MqttSession {
        client: Client::V5(client),
        incoming: rx,
        acks: ack_rx,
        driver,
        stop,
    })
}

async fn handshake<F>(connack: F) -> Result<(), TransportError>
where
    F: std::future::Future<Output = Result<(), TransportError>>,
{
    tokio::time::timeout(CONNECT_TIMEOUT, connack)
        .await
        .map_err(|_| TransportError::Connection(format!("no CONNACK within {}s", CONNECT_TIMEOUT.as_secs())))?
}

// ── Session ──

enum Client {
    V4(rumqttc::AsyncClient),
    V5(v5::AsyncClient),
}

struct MqttSession {
    client: Client,
    incoming: mpsc::Receiver<IncomingMessage>,
    acks: mpsc::Receiver<SubAckResult>,
    driver: JoinHandle<()>,
    stop: CancellationToken,
}

fn qos_v4(qos: Qos) -> rumqttc::QoS {
    match qos {
        Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
        Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn qos_v5(qos: Qos) -> v5::mqttbytes::QoS {
    match qos {
        Qos::AtMostOnce => v5::mqttbytes::QoS::AtMostOnce,
        Qos::AtLeastOnce => v5::mqttbytes::QoS::AtLeastOnce,
        Qos::ExactlyOnce => v5::mqttbytes::QoS::ExactlyOnce,
    }
}

fn suback_v4(ack: &rumqttc::SubAck) -> SubAckResult {
    if ack.return_codes.iter().any(|c| matches!(c, rumqttc::SubscribeReasonCode::Failure)) {
        return Err(format!("broker refused subscription (packet {})", ack.pkid));
    }
    Ok(())
}

fn suback_v5(ack: &v5::mqttbytes::v5::SubAck) -> SubAckResult {
    use v5::mqttbytes::v5::SubscribeReasonCode;
    match ack.return_codes.iter().find(|c| !matches!(c, SubscribeReasonCode::Success(_))) {
        Some(code) => Err(format!("broker refused subscription: {code:?}")),
        None => Ok(()),
    }
}

fn client_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Protocol(e.to_string())
}

impl BrokerSession for MqttSession {
    fn subscribe<'a>(&'a mut self, filter: &'a str, qos: Qos) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.driver.is_finished() {
                return Err(TransportError::Closed);
            }
            match &self.client {
                Client::V4(c) => c.subscribe(filter, qos_v4(qos)).await.map_err(client_error)?,
                Client::V5(c) => c.subscribe(filter, qos_v5(qos)).await.map_err(client_error)?,
            }
            // Only queued so far; the subscription exists once the broker acknowledges it.
            match tokio::time::timeout(SUBACK_TIMEOUT, self.acks.recv()).await {
                Ok(Some(Ok(()))) => Ok(()),
                Ok(Some(Err(reason))) => Err(TransportError::Protocol(reason)),
                Ok(None) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::Protocol(format!(
                    "no SUBACK for '{filter}' within {}s",
                    SUBACK_TIMEOUT.as_secs()
                ))),
            }
        })
    }

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.driver.is_finished() {
                return Err(TransportError::Closed);
            }
            match &self.client {
                Client::V4(c) => c
                    .publish(topic, qos_v4(qos), retain, payload.to_vec())
                    .await
                    .map_err(client_error),
                Client::V5(c) => c
                    .publish(topic, qos_v5(qos), retain, payload)
                    .await
                    .map_err(client_error),
            }
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<IncomingMessage>> {
        Box::pin(async { self.incoming.recv().await })
    }

    fn disconnect(self: Box<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            let MqttSession {
                client,
                incoming,
                acks: _,
                mut driver,
                stop,
            } = *self;
            drop(incoming);

            let sent = match &client {
                Client::V4(c) => c.disconnect().await.map_err(client_error),
                Client::V5(c) => c.disconnect().await.map_err(client_error),
            };

            // Let the driver flush DISCONNECT, then stop it.
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                stop.cancel();
                let _ = driver.await;
            }
            sent
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A session whose requests are queued but never sent; the event loop must stay alive.
    fn offline_session(acks: mpsc::Receiver<SubAckResult>) -> (MqttSession, rumqttc::EventLoop) {
        let (client, eventloop) = rumqttc::AsyncClient::new(rumqttc::MqttOptions::new("t", "localhost", 1883), 10);
        let (_tx, incoming) = mpsc::channel(1);
        let session = MqttSession {
            client: Client::V4(client),
            incoming,
            acks,
            driver: tokio::spawn(std::future::pending::<()>()),
            stop: CancellationToken::new(),
        };
        (session, eventloop)
    }

    #[test]
    fn suback_failure_code_is_a_refusal() {
        let granted = rumqttc::SubAck {
            pkid: 1,
            return_codes: vec![rumqttc::SubscribeReasonCode::Success(rumqttc::QoS::AtMostOnce)],
        };
        assert_eq!(suback_v4(&granted), Ok(()));
        let refused = rumqttc::SubAck {
            pkid: 2,
            return_codes: vec![rumqttc::SubscribeReasonCode::Failure],
        };
        assert!(suback_v4(&refused).is_err());
    }

    #[tokio::test]
    async fn subscribe_waits_for_the_broker_acknowledgement() {
        let (ack_tx, ack_rx) = mpsc::channel(4);
        let (mut session, _eventloop) = offline_session(ack_rx);

        let waiting = tokio::spawn(async move {
            let result = session.subscribe("sensor/#", Qos::AtMostOnce).await;
            (result, session)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        ack_tx.send(Ok(())).await.unwrap();
        let (result, mut session) = waiting.await.unwrap();
        assert!(result.is_ok(), "{result:?}");

        ack_tx.send(Err("refused".into())).await.unwrap();
        let refused = session.subscribe("private/#", Qos::AtMostOnce).await;
        assert!(matches!(&refused, Err(TransportError::Protocol(r)) if r == "refused"), "{refused:?}");

        drop(ack_tx);
        let closed = session.subscribe("gone/#", Qos::AtMostOnce).await;
        assert!(matches!(closed, Err(TransportError::Closed)), "{closed:?}");
    }
}
