use std::collections::HashSet;

use loadsim_generator::{DataGenerator, Generate, GeneratorError};
use serde_json::{Map, Value};

use crate::config::{MetadataConfig, TopicPlan};
use crate::error::EngineError;
use crate::util::now_ms;

/// Outcome of one publishing tick.
#[derive(Debug)]
pub enum Tick {
    Payload(Map<String, Value>),
    /// A generator failed; it has been retired and nothing is sent this tick.
    Skipped(GeneratorError),
    /// No generator was active at the start of the tick.
    Exhausted,
}

/// Builds the payloads of one topic from its root fields and generators.
#[derive(Debug)]
pub struct PayloadComposer {
    root: Map<String, Value>,
    generators: Vec<DataGenerator>,
    metadata: MetadataConfig,
}

impl PayloadComposer {
    pub fn new(plan: &TopicPlan) -> Result<Self, EngineError> {
        let mut names: HashSet<&str> = plan.payload_root.keys().map(String::as_str).collect();
        let mut generators = Vec::with_capacity(plan.generators.len());

        for spec in &plan.generators {
            let generator = DataGenerator::from_spec(spec)?;
            for reference in generator.references() {
                if !names.contains(reference) {
                    return Err(EngineError::Config(format!(
                        "generator '{}' references '{reference}', which is neither a PAYLOAD_ROOT key nor an earlier generator",
                        spec.name()
                    )));
                }
            }
            if !names.insert(spec.name()) {
                return Err(EngineError::Config(format!("field '{}' is defined twice", spec.name())));
            }
            generators.push(generator);
        }

        let metadata = plan.metadata.clone();
        let mut stamped = Vec::new();
        if metadata.include_message_id {
            stamped.push(metadata.message_id_field());
        }
        if metadata.include_timestamp {
            stamped.push(metadata.timestamp_field());
        }
        if let Some(clash) = stamped.iter().find(|f| names.contains(f.as_str())) {
            return Err(EngineError::Config(format!("field '{clash}' collides with a metadata field")));
        }
        if stamped.len() == 2 && stamped[0] == stamped[1] {
            return Err(EngineError::Config(format!("metadata field '{}' is defined twice", stamped[0])));
        }

        Ok(Self {
            root: plan.payload_root.clone(),
            generators,
            metadata,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        !self.generators.iter().any(|g| g.is_active())
    }

    pub fn next_tick(&mut self) -> Tick {
        if self.is_exhausted() {
            return Tick::Exhausted;
        }

        let mut payload = self.root.clone();
        for generator in self.generators.iter_mut().filter(|g| g.is_active()) {
            match generator.generate_value(&payload) {
                Ok(value) => {
                    payload.insert(generator.name().to_string(), value);
                }
                Err(e) => {
                    generator.deactivate();
                    return Tick::Skipped(e);
                }
            }
        }

        if self.metadata.include_message_id {
            payload.insert(
                self.metadata.message_id_field(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        if self.metadata.include_timestamp {
            payload.insert(self.metadata.timestamp_field(), Value::from(now_ms()));
        }
        Tick::Payload(payload)
    }
}
