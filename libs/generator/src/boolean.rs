use rand::Rng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};

use crate::error::GeneratorError;
use crate::generator::{Generate, seeded_rng};
use crate::spec::BoolSpec;

/// Toggling or probability-weighted boolean.
#[derive(Debug)]
pub struct BoolGenerator {
    name: String,
    current: bool,
    true_probability: Option<f64>,
    retain_probability: f64,
    remaining: Option<u64>,
    started: bool,
    active: bool,
    rng: StdRng,
}

impl BoolGenerator {
    pub fn from_spec(spec: &BoolSpec) -> Result<Self, GeneratorError> {
        for (field, p) in [
            ("TRUE_PROBABILITY", spec.true_probability.unwrap_or(0.0)),
            ("RETAIN_PROBABILITY", spec.retain_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(GeneratorError::config(&spec.name, format!("{field} must be within [0, 1]")));
            }
        }
        Ok(Self {
            name: spec.name.clone(),
            current: spec.initial_value,
            true_probability: spec.true_probability,
            retain_probability: spec.retain_probability,
            remaining: spec.max_count,
            started: false,
            active: spec.max_count != Some(0),
            rng: seeded_rng(spec.seed),
        })
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }
}

impl Generate for BoolGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn generate_value(&mut self, _payload: &Map<String, Value>) -> Result<Value, GeneratorError> {
        let value = match self.true_probability {
            Some(p) => self.rng.random_bool(p),
            None if !self.started => self.current,
            None if self.rng.random::<f64>() < self.retain_probability => self.current,
            None => !self.current,
        };
        self.started = true;
        self.current = value;

        if let Some(left) = self.remaining.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.active = false;
            }
        }
        Ok(Value::Bool(value))
    }
}
