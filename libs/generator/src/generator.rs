use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};

use crate::boolean::BoolGenerator;
use crate::error::GeneratorError;
use crate::math::MathExpressionGenerator;
use crate::number::{NumberGenerator, NumberKind};
use crate::raw::RawValueGenerator;
use crate::spec::GeneratorSpec;

/// Capability shared by every generator variant.
///
/// `generate_value` must only be called while `is_active` returns true.
/// `payload` holds the fields produced so far in the current pass.
pub trait Generate {
    fn name(&self) -> &str;
    fn is_active(&self) -> bool;
    fn generate_value(&mut self, payload: &Map<String, Value>) -> Result<Value, GeneratorError>;
}

/// Closed set of generator variants.
#[derive(Debug)]
pub enum DataGenerator {
    Number(NumberGenerator),
    Bool(BoolGenerator),
    RawValues(RawValueGenerator),
    MathExpression(MathExpressionGenerator),
}

impl DataGenerator {
    pub fn from_spec(spec: &GeneratorSpec) -> Result<Self, GeneratorError> {
        if spec.name().is_empty() {
            return Err(GeneratorError::config("", format!("{} generator without NAME", spec.type_tag())));
        }
        let generator = match spec {
            GeneratorSpec::Int(s) => DataGenerator::Number(NumberGenerator::from_spec(NumberKind::Int, s)?),
            GeneratorSpec::Float(s) => DataGenerator::Number(NumberGenerator::from_spec(NumberKind::Float, s)?),
            GeneratorSpec::Bool(s) => DataGenerator::Bool(BoolGenerator::from_spec(s)?),
            GeneratorSpec::RawValues(s) => DataGenerator::RawValues(RawValueGenerator::from_spec(s)?),
            GeneratorSpec::MathExpression(s) => {
                DataGenerator::MathExpression(MathExpressionGenerator::from_spec(s)?)
            }
        };
        tracing::debug!(generator = %spec.name(), kind = spec.type_tag(), "generator ready");
        Ok(generator)
    }

    /// Payload fields this generator reads.
    pub fn references(&self) -> Vec<&str> {
        match self {
            DataGenerator::MathExpression(g) => g.references(),
            _ => Vec::new(),
        }
    }

    /// Permanently retire the generator.
    pub fn deactivate(&mut self) {
        match self {
            DataGenerator::Number(g) => g.deactivate(),
            DataGenerator::Bool(g) => g.deactivate(),
            DataGenerator::RawValues(g) => g.deactivate(),
            DataGenerator::MathExpression(g) => g.deactivate(),
        }
    }

    fn inner(&self) -> &dyn Generate {
        match self {
            DataGenerator::Number(g) => g,
            DataGenerator::Bool(g) => g,
            DataGenerator::RawValues(g) => g,
            DataGenerator::MathExpression(g) => g,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Generate {
        match self {
            DataGenerator::Number(g) => g,
            DataGenerator::Bool(g) => g,
            DataGenerator::RawValues(g) => g,
            DataGenerator::MathExpression(g) => g,
        }
    }
}

impl Generate for DataGenerator {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn is_active(&self) -> bool {
        self.inner().is_active()
    }

    fn generate_value(&mut self, payload: &Map<String, Value>) -> Result<Value, GeneratorError> {
        self.inner_mut().generate_value(payload)
    }
}

/// Seeded for reproducible runs, OS entropy otherwise.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}
