//! Stateful synthetic value sources for payload fields.

pub mod error;
pub mod expr;
pub mod spec;
mod boolean;
mod generator;
mod math;
mod number;
mod raw;

pub use boolean::BoolGenerator;
pub use error::{ExpressionError, GeneratorError};
pub use generator::{DataGenerator, Generate};
pub use math::MathExpressionGenerator;
pub use number::{NumberGenerator, NumberKind};
pub use raw::RawValueGenerator;
pub use spec::GeneratorSpec;
