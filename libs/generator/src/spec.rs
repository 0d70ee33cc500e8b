use serde::Deserialize;
use serde_json::{Map, Value};

/// Generator definition as it appears in a topic's `DATA` list.
///
/// The `TYPE` tag selects the variant; an unknown tag fails deserialization,
/// so a bad generator type is rejected while the settings file is loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "TYPE")]
pub enum GeneratorSpec {
    #[serde(rename = "int")]
    Int(NumberSpec),
    #[serde(rename = "float")]
    Float(NumberSpec),
    #[serde(rename = "bool")]
    Bool(BoolSpec),
    #[serde(rename = "raw_values")]
    RawValues(RawValuesSpec),
    #[serde(rename = "math_expression")]
    MathExpression(MathExpressionSpec),
}

impl GeneratorSpec {
    pub fn name(&self) -> &str {
        match self {
            GeneratorSpec::Int(s) | GeneratorSpec::Float(s) => &s.name,
            GeneratorSpec::Bool(s) => &s.name,
            GeneratorSpec::RawValues(s) => &s.name,
            GeneratorSpec::MathExpression(s) => &s.name,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            GeneratorSpec::Int(_) => "int",
            GeneratorSpec::Float(_) => "float",
            GeneratorSpec::Bool(_) => "bool",
            GeneratorSpec::RawValues(_) => "raw_values",
            GeneratorSpec::MathExpression(_) => "math_expression",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NumberSpec {
    pub name: String,
    pub min_value: f64,
    pub max_value: f64,
    /// Starting value; defaults to `MIN_VALUE`.
    #[serde(default)]
    pub initial_value: Option<f64>,

    /// Deterministic progression step.
    #[serde(default)]
    pub step: Option<f64>,
    /// Wrap to the start bound instead of going inactive.
    #[serde(default)]
    pub restart_on_end: bool,

    /// Random walk: largest move per tick.
    #[serde(default)]
    pub max_step: Option<f64>,
    #[serde(default)]
    pub retain_probability: f64,
    #[serde(default = "default_increase_probability")]
    pub increase_probability: f64,
    #[serde(default)]
    pub reset_probability: f64,

    /// Round float output to this many decimals.
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_increase_probability() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BoolSpec {
    pub name: String,
    #[serde(default)]
    pub initial_value: bool,
    /// Weighted random mode.
    #[serde(default)]
    pub true_probability: Option<f64>,
    /// Toggle mode: chance of keeping the previous value.
    #[serde(default)]
    pub retain_probability: f64,
    /// Go inactive after this many values.
    #[serde(default)]
    pub max_count: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawValuesSpec {
    pub name: String,
    pub values: Vec<Value>,
    #[serde(default)]
    pub index_start: Option<usize>,
    /// Inclusive.
    #[serde(default)]
    pub index_end: Option<usize>,
    #[serde(default)]
    pub restart_on_end: bool,
    /// Merged under every object value.
    #[serde(default)]
    pub value_default: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MathExpressionSpec {
    pub name: String,
    pub math_expression: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_selects_variant() {
        let spec: GeneratorSpec = serde_json::from_str(
            r#"{"TYPE": "int", "NAME": "count", "MIN_VALUE": 0, "MAX_VALUE": 2, "STEP": 1}"#,
        )
        .unwrap();
        match &spec {
            GeneratorSpec::Int(n) => {
                assert_eq!(n.step, Some(1.0));
                assert!(!n.restart_on_end);
                assert_eq!(n.increase_probability, 0.5);
            }
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(spec.name(), "count");
        assert_eq!(spec.type_tag(), "int");
    }

    #[test]
    fn unknown_type_is_rejected_at_load() {
        let err = serde_json::from_str::<GeneratorSpec>(r#"{"TYPE": "string", "NAME": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("string"), "{err}");
    }

    #[test]
    fn raw_values_keep_literal_json() {
        let spec: GeneratorSpec = serde_json::from_str(
            r#"{"TYPE": "raw_values", "NAME": "state", "VALUES": ["on", 2, {"a": true}], "RESTART_ON_END": true}"#,
        )
        .unwrap();
        let GeneratorSpec::RawValues(raw) = spec else {
            panic!("expected raw_values");
        };
        assert_eq!(raw.values.len(), 3);
        assert!(raw.restart_on_end);
        assert!(raw.index_end.is_none());
    }
}
