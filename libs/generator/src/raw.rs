use serde_json::{Map, Value};

use crate::error::GeneratorError;
use crate::generator::Generate;
use crate::spec::RawValuesSpec;

/// Replays a literal list, once or in a loop.
#[derive(Debug)]
pub struct RawValueGenerator {
    name: String,
    values: Vec<Value>,
    position: usize,
    restart: bool,
    active: bool,
}

impl RawValueGenerator {
    pub fn from_spec(spec: &RawValuesSpec) -> Result<Self, GeneratorError> {
        let name = spec.name.as_str();
        if spec.values.is_empty() {
            return Err(GeneratorError::config(name, "VALUES is empty"));
        }
        let start = spec.index_start.unwrap_or(0);
        let end = spec.index_end.unwrap_or(spec.values.len() - 1);
        if start > end || end >= spec.values.len() {
            return Err(GeneratorError::config(
                name,
                format!("index window [{start}, {end}] outside {} values", spec.values.len()),
            ));
        }

        let values = spec.values[start..=end]
            .iter()
            .map(|v| merge_default(spec.value_default.as_ref(), v))
            .collect();

        Ok(Self {
            name: spec.name.clone(),
            values,
            position: 0,
            restart: spec.restart_on_end,
            active: true,
        })
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }
}

fn merge_default(default: Option<&Map<String, Value>>, value: &Value) -> Value {
    match (default, value) {
        (Some(base), Value::Object(obj)) => {
            let mut merged = base.clone();
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => value.clone(),
    }
}

impl Generate for RawValueGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn generate_value(&mut self, _payload: &Map<String, Value>) -> Result<Value, GeneratorError> {
        let value = self.values[self.position].clone();
        self.position += 1;
        if self.position == self.values.len() {
            if self.restart {
                self.position = 0;
            } else {
                self.active = false;
            }
        }
        Ok(value)
    }
}
