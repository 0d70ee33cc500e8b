use serde_json::{Map, Value};

use crate::error::GeneratorError;
use crate::expr::Expr;
use crate::generator::Generate;
use crate::number::round_to;
use crate::spec::MathExpressionSpec;

/// Arithmetic over fields already present in the payload being built.
#[derive(Debug)]
pub struct MathExpressionGenerator {
    name: String,
    expr: Expr,
    decimals: Option<u32>,
    active: bool,
}

impl MathExpressionGenerator {
    /// Parses the expression up front so syntax errors surface at load time.
    pub fn from_spec(spec: &MathExpressionSpec) -> Result<Self, GeneratorError> {
        let expr = Expr::parse(&spec.math_expression).map_err(|source| GeneratorError::Expression {
            name: spec.name.clone(),
            source,
        })?;
        Ok(Self {
            name: spec.name.clone(),
            expr,
            decimals: spec.decimals,
            active: true,
        })
    }

    pub fn references(&self) -> Vec<&str> {
        self.expr.fields()
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }
}

impl Generate for MathExpressionGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn generate_value(&mut self, payload: &Map<String, Value>) -> Result<Value, GeneratorError> {
        let v = self
            .expr
            .evaluate(payload)
            .map_err(|source| GeneratorError::Expression {
                name: self.name.clone(),
                source,
            })?;
        Ok(Value::from(round_to(v, self.decimals)))
    }
}
