use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use super::topic::{matches, valid_filter, valid_topic};
use super::{BoxFuture, BrokerConnector, BrokerSession, Credentials, IncomingMessage, Qos, SessionOptions, TransportError};

const SESSION_BUFFER: usize = 1024;

struct Subscriber {
    session: u64,
    client_id: String,
    filters: Vec<String>,
    tx: mpsc::Sender<IncomingMessage>,
}

#[derive(Default)]
struct Inner {
    subscribers: RwLock<Vec<Subscriber>>,
    /// user → password; `None` accepts everyone.
    accounts: Option<HashMap<String, String>>,
    next_session: AtomicU64,
}

/// In-process broker for tests and `--loopback` runs.
///
/// Delivers every publish to each session with a matching filter, once per
/// session. QoS is accepted but every delivery is in-order and lossless;
/// the retain flag is ignored.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<Inner>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept sessions presenting one of these user/password pairs.
    pub fn with_accounts<I, U, P>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let accounts = accounts.into_iter().map(|(u, p)| (u.into(), p.into())).collect();
        Self {
            inner: Arc::new(Inner {
                accounts: Some(accounts),
                ..Inner::default()
            }),
        }
    }

    /// Number of currently connected sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    fn authorize(&self, credentials: Option<&Credentials>) -> Result<(), TransportError> {
        let Some(accounts) = &self.inner.accounts else {
            return Ok(());
        };
        match credentials {
            Some(c) if accounts.get(&c.user) == Some(&c.password) => Ok(()),
            Some(c) => Err(TransportError::Connection(format!("not authorized (user '{}')", c.user))),
            None => Err(TransportError::Connection("not authorized (no credentials)".into())),
        }
    }
}

impl BrokerConnector for LoopbackBroker {
    fn connect(&self, options: SessionOptions) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, TransportError>> {
        Box::pin(async move {
            self.authorize(options.credentials.as_ref())?;

            let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::channel(SESSION_BUFFER);
            self.inner.subscribers.write().await.push(Subscriber {
                session,
                client_id: options.client_id.clone(),
                filters: Vec::new(),
                tx,
            });
            tracing::debug!(client = %options.client_id, session, "loopback session opened");

            Ok(Box::new(LoopbackSession {
                broker: self.inner.clone(),
                session,
                rx,
                closed: false,
            }) as Box<dyn BrokerSession>)
        })
    }
}

struct LoopbackSession {
    broker: Arc<Inner>,
    session: u64,
    rx: mpsc::Receiver<IncomingMessage>,
    closed: bool,
}

impl BrokerSession for LoopbackSession {
    fn subscribe<'a>(&'a mut self, filter: &'a str, _qos: Qos) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if !valid_filter(filter) {
                return Err(TransportError::Protocol(format!("invalid filter '{filter}'")));
            }
            let mut subs = self.broker.subscribers.write().await;
            let sub = subs
                .iter_mut()
                .find(|s| s.session == self.session)
                .ok_or(TransportError::Closed)?;
            if !sub.filters.iter().any(|f| f == filter) {
                sub.filters.push(filter.to_string());
            }
            Ok(())
        })
    }

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        _qos: Qos,
        _retain: bool,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed {
                return Err(TransportError::Closed);
            }
            if !valid_topic(topic) {
                return Err(TransportError::Protocol(format!("invalid topic '{topic}'")));
            }

            let targets: Vec<(u64, mpsc::Sender<IncomingMessage>)> = {
                let subs = self.broker.subscribers.read().await;
                subs.iter()
                    .filter(|s| s.filters.iter().any(|f| matches(topic, f)))
                    .map(|s| (s.session, s.tx.clone()))
                    .collect()
            };

            let mut gone = Vec::new();
            for (session, tx) in targets {
                let msg = IncomingMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if tx.send(msg).await.is_err() {
                    gone.push(session);
                }
            }

            if !gone.is_empty() {
                let mut subs = self.broker.subscribers.write().await;
                subs.retain(|s| {
                    let keep = !gone.contains(&s.session);
                    if !keep {
                        tracing::debug!(client = %s.client_id, "dropping closed loopback session");
                    }
                    keep
                });
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<IncomingMessage>> {
        Box::pin(async { self.rx.recv().await })
    }

    fn disconnect(mut self: Box<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            self.closed = true;
            let session = self.session;
            self.broker.subscribers.write().await.retain(|s| s.session != session);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(user: &str, password: &str) -> Option<Credentials> {
        Some(Credentials {
            user: user.into(),
            password: password.into(),
        })
    }

    #[tokio::test]
    async fn delivers_to_matching_filters_once() {
        let broker = LoopbackBroker::new();
        let mut sub = broker.connect(SessionOptions::new("sub")).await.unwrap();
        sub.subscribe("sensor/#", Qos::AtMostOnce).await.unwrap();
        sub.subscribe("sensor/+", Qos::AtMostOnce).await.unwrap();

        let mut publisher = broker.connect(SessionOptions::new("pub")).await.unwrap();
        publisher
            .publish("sensor/1", Qos::ExactlyOnce, false, Bytes::from_static(b"a"))
            .await
            .unwrap();
        publisher
            .publish("other/1", Qos::ExactlyOnce, false, Bytes::from_static(b"b"))
            .await
            .unwrap();
        publisher
            .publish("sensor/2", Qos::ExactlyOnce, false, Bytes::from_static(b"c"))
            .await
            .unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.topic, "sensor/1");
        assert_eq!(&first.payload[..], b"a");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.topic, "sensor/2");
        assert_eq!(&second.payload[..], b"c");
    }

    #[tokio::test]
    async fn rejects_bad_credentials() {
        let broker = LoopbackBroker::with_accounts([("alice", "secret")]);

        let mut ok = SessionOptions::new("a");
        ok.credentials = creds("alice", "secret");
        assert!(broker.connect(ok).await.is_ok());

        let mut wrong = SessionOptions::new("b");
        wrong.credentials = creds("alice", "nope");
        let err = broker.connect(wrong).await.err().unwrap();
        assert!(matches!(err, TransportError::Connection(_)));

        assert!(broker.connect(SessionOptions::new("c")).await.is_err());
    }

    #[tokio::test]
    async fn disconnect_releases_session() {
        let broker = LoopbackBroker::new();
        let session = broker.connect(SessionOptions::new("x")).await.unwrap();
        assert_eq!(broker.session_count().await, 1);
        session.disconnect().await.unwrap();
        assert_eq!(broker.session_count().await, 0);
    }

    #[tokio::test]
    async fn wildcard_topics_cannot_be_published() {
        let broker = LoopbackBroker::new();
        let mut s = broker.connect(SessionOptions::new("p")).await.unwrap();
        let err = s.publish("a/+", Qos::AtMostOnce, false, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
