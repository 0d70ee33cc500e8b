//! Settings file schema and its expansion into per-unit plans.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use loadsim_generator::GeneratorSpec;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::transport::topic::{valid_filter, valid_topic};
use crate::transport::{Credentials, Qos};
use crate::util::safe_topic_name;

// ═══════════════════════════════════════════════════════════════
//  Settings file
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(flatten)]
    pub client: ClientOverrides,
    #[serde(flatten)]
    pub metadata: MetadataOverrides,
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,
}

fn default_broker_url() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_protocol_version() -> u8 {
    4
}

/// Client settings as written; unset fields fall back to the root, then to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClientOverrides {
    #[serde(default)]
    pub clean_session: Option<bool>,
    #[serde(default)]
    pub retain: Option<bool>,
    #[serde(default)]
    pub qos: Option<u8>,
    /// Seconds.
    #[serde(default)]
    pub time_interval: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MetadataOverrides {
    #[serde(default)]
    pub include_message_id: Option<bool>,
    #[serde(default)]
    pub include_timestamp: Option<bool>,
    #[serde(default)]
    pub metadata_field_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicType {
    Single,
    Multiple,
    List,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TopicConfig {
    #[serde(rename = "TYPE")]
    pub kind: TopicType,
    pub prefix: String,
    #[serde(default)]
    pub range_start: Option<i64>,
    #[serde(default)]
    pub range_end: Option<i64>,
    #[serde(default)]
    pub list: Vec<Value>,
    #[serde(default)]
    pub data: Vec<GeneratorSpec>,
    #[serde(default)]
    pub payload_root: Map<String, Value>,
    #[serde(flatten)]
    pub client: ClientOverrides,
    #[serde(flatten)]
    pub metadata: MetadataOverrides,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SubscriberConfig {
    pub topic: String,
    #[serde(default = "default_subscriber_number")]
    pub number: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub users: Option<Vec<String>>,
    #[serde(default)]
    pub passwords: Option<Vec<String>>,
    #[serde(default)]
    pub qos: Option<u8>,
}

fn default_subscriber_number() -> usize {
    1
}

// ═══════════════════════════════════════════════════════════════
//  Resolved settings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V311,
    V5,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = EngineError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            other => Err(EngineError::Config(format!(
                "PROTOCOL_VERSION must be 4 (MQTT 3.1.1) or 5 (MQTT 5), got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: ProtocolVersion,
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub clean_session: bool,
    pub retain: bool,
    pub qos: Qos,
    pub time_interval: Duration,
}

impl ClientSettings {
    fn resolve(root: &ClientOverrides, topic: &ClientOverrides) -> Result<Self, EngineError> {
        let qos = topic.qos.or(root.qos).unwrap_or(2);
        let interval = topic.time_interval.or(root.time_interval).unwrap_or(10.0);
        Ok(Self {
            clean_session: topic.clean_session.or(root.clean_session).unwrap_or(true),
            retain: topic.retain.or(root.retain).unwrap_or(false),
            qos: Qos::try_from(qos).map_err(EngineError::Config)?,
            time_interval: Duration::try_from_secs_f64(interval)
                .map_err(|_| EngineError::Config(format!("TIME_INTERVAL must be a non-negative number, got {interval}")))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    pub include_message_id: bool,
    pub include_timestamp: bool,
    pub field_prefix: String,
}

impl MetadataConfig {
    fn resolve(root: &MetadataOverrides, topic: &MetadataOverrides) -> Self {
        Self {
            include_message_id: topic.include_message_id.or(root.include_message_id).unwrap_or(true),
            include_timestamp: topic.include_timestamp.or(root.include_timestamp).unwrap_or(true),
            field_prefix: topic
                .metadata_field_prefix
                .clone()
                .or_else(|| root.metadata_field_prefix.clone())
                .unwrap_or_else(|| "_".into()),
        }
    }

    pub fn message_id_field(&self) -> String {
        format!("{}message_id", self.field_prefix)
    }

    pub fn timestamp_field(&self) -> String {
        format!("{}timestamp", self.field_prefix)
    }

    pub fn latency_field(&self) -> String {
        format!("{}latency_ms", self.field_prefix)
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig::resolve(&MetadataOverrides::default(), &MetadataOverrides::default())
    }
}

/// One publishing unit: a concrete topic URL and everything needed to drive it.
#[derive(Debug, Clone)]
pub struct TopicPlan {
    pub url: String,
    pub generators: Vec<GeneratorSpec>,
    pub payload_root: Map<String, Value>,
    pub client: ClientSettings,
    pub metadata: MetadataConfig,
}

/// One subscribing unit.
#[derive(Debug, Clone)]
pub struct SubscriberPlan {
    pub client_id: String,
    pub filter: String,
    pub description: String,
    pub credentials: Option<Credentials>,
    pub qos: Qos,
    pub clean_session: bool,
    pub metadata: MetadataConfig,
    pub log_path: PathBuf,
    pub latency_path: PathBuf,
}

// ═══════════════════════════════════════════════════════════════
//  Loading and expansion
// ═══════════════════════════════════════════════════════════════

impl SimConfig {
    /// Read a settings file: TOML for `.toml`, JSON otherwise.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read '{}': {e}", path.display())))?;
        let is_toml = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
        .map_err(|e| e.with_context(format!("'{}'", path.display())))
    }

    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        serde_json::from_str(content).map_err(|e| EngineError::Config(format!("parse: {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(format!("parse: {e}")))
    }

    pub fn endpoint(&self) -> Result<BrokerEndpoint, EngineError> {
        if self.broker_url.is_empty() {
            return Err(EngineError::Config("BROKER_URL is empty".into()));
        }
        Ok(BrokerEndpoint {
            host: self.broker_url.clone(),
            port: self.broker_port,
            protocol: ProtocolVersion::try_from(self.protocol_version)?,
        })
    }

    /// Expand every `TOPICS` entry into one plan per topic URL, in file order.
    pub fn topic_plans(&self) -> Result<Vec<TopicPlan>, EngineError> {
        let mut plans = Vec::new();
        for (idx, topic) in self.topics.iter().enumerate() {
            let ctx = format!("TOPICS[{idx}] ({})", topic.prefix);
            let client = ClientSettings::resolve(&self.client, &topic.client).map_err(|e| e.with_context(&ctx))?;
            let metadata = MetadataConfig::resolve(&self.metadata, &topic.metadata);
            for url in topic.urls().map_err(|e| e.with_context(&ctx))? {
                plans.push(TopicPlan {
                    url,
                    generators: topic.data.clone(),
                    payload_root: topic.payload_root.clone(),
                    client: client.clone(),
                    metadata: metadata.clone(),
                });
            }
        }
        Ok(plans)
    }

    /// Expand every `SUBSCRIBERS` entry into `NUMBER` units writing under `output_dir`.
    pub fn subscriber_plans(&self, output_dir: &Path) -> Result<Vec<SubscriberPlan>, EngineError> {
        let clean_session = self.client.clean_session.unwrap_or(true);
        let metadata = MetadataConfig::resolve(&self.metadata, &MetadataOverrides::default());
        let mut plans = Vec::new();

        for (idx, sub) in self.subscribers.iter().enumerate() {
            let ctx = format!("SUBSCRIBERS[{idx}] ({})", sub.topic);
            if !valid_filter(&sub.topic) {
                return Err(EngineError::Config(format!("{ctx}: invalid topic filter")));
            }
            if sub.number == 0 {
                return Err(EngineError::Config(format!("{ctx}: NUMBER must be at least 1")));
            }
            for (field, list) in [("USERS", &sub.users), ("PASSWORDS", &sub.passwords)] {
                let short = list.as_ref().filter(|l| l.len() < sub.number);
                if let Some(list) = short {
                    return Err(EngineError::Config(format!(
                        "{ctx}: {field} has {} entries for NUMBER = {}",
                        list.len(),
                        sub.number
                    )));
                }
            }
            let qos = Qos::try_from(sub.qos.unwrap_or(0)).map_err(|e| EngineError::Config(format!("{ctx}: {e}")))?;
            let safe_topic = safe_topic_name(&sub.topic);

            for i in 0..sub.number {
                let client_id = format!("subscriber-{safe_topic}-{i}");
                let credentials = sub.users.as_ref().map(|users| Credentials {
                    user: users[i].clone(),
                    password: sub.passwords.as_ref().map(|p| p[i].clone()).unwrap_or_default(),
                });
                plans.push(SubscriberPlan {
                    log_path: output_dir.join(format!("{client_id}.log")),
                    latency_path: output_dir.join(format!("{client_id}.latency.csv")),
                    client_id,
                    filter: sub.topic.clone(),
                    description: sub.description.clone(),
                    credentials,
                    qos,
                    clean_session,
                    metadata: metadata.clone(),
                });
            }
        }
        Ok(plans)
    }
}

impl TopicConfig {
    /// Topic URLs this entry expands to.
    pub fn urls(&self) -> Result<Vec<String>, EngineError> {
        if self.prefix.is_empty() {
            return Err(EngineError::Config("PREFIX is empty".into()));
        }
        let urls = match self.kind {
            TopicType::Single => vec![self.prefix.clone()],
            TopicType::Multiple => {
                let (Some(start), Some(end)) = (self.range_start, self.range_end) else {
                    return Err(EngineError::Config("multiple topic needs RANGE_START and RANGE_END".into()));
                };
                if start > end {
                    return Err(EngineError::Config(format!("RANGE_START {start} is after RANGE_END {end}")));
                }
                (start..=end).map(|i| format!("{}/{i}", self.prefix)).collect()
            }
            TopicType::List => {
                if self.list.is_empty() {
                    return Err(EngineError::Config("list topic needs a non-empty LIST".into()));
                }
                self.list
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => format!("{}/{s}", self.prefix),
                        other => format!("{}/{other}", self.prefix),
                    })
                    .collect()
            }
        };
        if let Some(bad) = urls.iter().find(|u| !valid_topic(u)) {
            return Err(EngineError::Config(format!("'{bad}' is not a valid publish topic")));
        }
        Ok(urls)
    }
}
