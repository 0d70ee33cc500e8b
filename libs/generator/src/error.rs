#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator '{name}': {detail}")]
    Config { name: String, detail: String },

    #[error("generator '{name}': {source}")]
    Expression { name: String, source: ExpressionError },
}

impl GeneratorError {
    pub fn config(name: &str, detail: impl Into<String>) -> Self {
        GeneratorError::Config {
            name: name.to_string(),
            detail: detail.into(),
        }
    }

    /// True for errors raised while preparing a generator rather than while running it.
    pub fn is_config(&self) -> bool {
        match self {
            GeneratorError::Config { .. } => true,
            GeneratorError::Expression { source, .. } => matches!(source, ExpressionError::Syntax { .. }),
        }
    }
}

/// Failure to parse or evaluate an arithmetic expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset}: {detail}")]
    Syntax { offset: usize, detail: String },

    #[error("undefined field '{0}'")]
    UndefinedField(String),

    #[error("field '{0}' is not numeric")]
    NonNumeric(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}
