//! Broker seam: units talk to a broker only through these traits.

pub mod loopback;
pub mod mqtt;
pub mod topic;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

pub use loopback::LoopbackBroker;
pub use mqtt::MqttConnector;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session closed")]
    Closed,
}

impl TransportError {
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            TransportError::Connection(msg) => TransportError::Connection(format!("{ctx}: {msg}")),
            TransportError::Protocol(msg) => TransportError::Protocol(format!("{ctx}: {msg}")),
            TransportError::Closed => TransportError::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            credentials: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Opens broker sessions. Shared by every unit of a run.
pub trait BrokerConnector: Send + Sync {
    /// Connect and wait for the broker's acknowledgement.
    fn connect(&self, options: SessionOptions) -> BoxFuture<'_, Result<Box<dyn BrokerSession>, TransportError>>;
}

/// One connected client. Owned by exactly one unit.
pub trait BrokerSession: Send {
    fn subscribe<'a>(&'a mut self, filter: &'a str, qos: Qos) -> BoxFuture<'a, Result<(), TransportError>>;

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        qos: Qos,
        retain: bool,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Next delivered message; `None` once the session is gone.
    fn recv(&mut self) -> BoxFuture<'_, Option<IncomingMessage>>;

    fn disconnect(self: Box<Self>) -> BoxFuture<'static, Result<(), TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels() {
        assert_eq!(Qos::try_from(2), Ok(Qos::ExactlyOnce));
        assert_eq!(u8::from(Qos::AtLeastOnce), 1);
        assert!(Qos::try_from(3).is_err());
    }
}
