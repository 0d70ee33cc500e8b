//! Publishing and subscribing units, their broker transport and the run coordinator.

pub mod capture;
pub mod config;
pub mod error;
pub mod event_log;
pub mod payload;
pub mod publisher;
pub mod simulator;
pub mod subscriber;
pub mod transport;
pub mod util;

pub use config::{BrokerEndpoint, ProtocolVersion, SimConfig};
pub use error::EngineError;
pub use publisher::{PublisherOutcome, PublisherReport, PublisherState, TopicPublisher};
pub use simulator::{RunMode, RunReport, Simulator, SimulatorOptions, UnitReport, UnitStatus};
pub use subscriber::{DeliveryCounter, MessageObserver, ReceivedMessage, SubscriberClient, SubscriberReport};
pub use transport::{BrokerConnector, BrokerSession, LoopbackBroker, MqttConnector};
