use rand::Rng;
use rand::rngs::StdRng;
use serde_json::{Map, Value};

use crate::error::GeneratorError;
use crate::generator::{Generate, seeded_rng};
use crate::spec::NumberSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int,
    Float,
}

#[derive(Debug, Clone, Copy)]
enum NumberMode {
    /// `origin + ticks * step`, bounded by the range.
    Step { step: f64, restart: bool },
    RandomWalk {
        max_step: f64,
        retain: f64,
        increase: f64,
        reset: f64,
    },
    Uniform,
}

/// Bounded numeric sequence: deterministic steps, a random walk, or uniform draws.
#[derive(Debug)]
pub struct NumberGenerator {
    name: String,
    kind: NumberKind,
    min: f64,
    max: f64,
    initial: f64,
    mode: NumberMode,
    decimals: Option<u32>,
    origin: f64,
    ticks: u64,
    current: f64,
    started: bool,
    active: bool,
    rng: StdRng,
}

impl NumberGenerator {
    pub fn from_spec(kind: NumberKind, spec: &NumberSpec) -> Result<Self, GeneratorError> {
        let name = spec.name.as_str();
        let (min, max) = (spec.min_value, spec.max_value);
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(GeneratorError::config(
                name,
                format!("invalid range [{min}, {max}]"),
            ));
        }
        if kind == NumberKind::Int && min.ceil() > max.floor() {
            return Err(GeneratorError::config(name, format!("no integer in [{min}, {max}]")));
        }
        let initial = spec.initial_value.unwrap_or(min);
        if !(min..=max).contains(&initial) {
            return Err(GeneratorError::config(
                name,
                format!("INITIAL_VALUE {initial} outside [{min}, {max}]"),
            ));
        }

        let mode = match (spec.step, spec.max_step) {
            (Some(_), Some(_)) => {
                return Err(GeneratorError::config(name, "STEP and MAX_STEP are mutually exclusive"));
            }
            (Some(step), None) => {
                if step == 0.0 || !step.is_finite() {
                    return Err(GeneratorError::config(name, "STEP must be a non-zero number"));
                }
                NumberMode::Step {
                    step,
                    restart: spec.restart_on_end,
                }
            }
            (None, Some(max_step)) => {
                if max_step <= 0.0 || !max_step.is_finite() {
                    return Err(GeneratorError::config(name, "MAX_STEP must be positive"));
                }
                for (field, p) in [
                    ("RETAIN_PROBABILITY", spec.retain_probability),
                    ("INCREASE_PROBABILITY", spec.increase_probability),
                    ("RESET_PROBABILITY", spec.reset_probability),
                ] {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(GeneratorError::config(name, format!("{field} must be within [0, 1]")));
                    }
                }
                NumberMode::RandomWalk {
                    max_step,
                    retain: spec.retain_probability,
                    increase: spec.increase_probability,
                    reset: spec.reset_probability,
                }
            }
            (None, None) => NumberMode::Uniform,
        };

        Ok(Self {
            name: spec.name.clone(),
            kind,
            min,
            max,
            initial,
            mode,
            decimals: spec.decimals,
            origin: initial,
            ticks: 0,
            current: initial,
            started: false,
            active: true,
            rng: seeded_rng(spec.seed),
        })
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    fn in_range(&self, v: f64) -> bool {
        let slack = f64::EPSILON * self.max.abs().max(self.min.abs()).max(1.0);
        v >= self.min - slack && v <= self.max + slack
    }

    fn next_step(&mut self, step: f64, restart: bool) -> f64 {
        let value = self.origin + self.ticks as f64 * step;
        self.ticks += 1;
        let next = self.origin + self.ticks as f64 * step;
        if !self.in_range(next) {
            if restart {
                self.origin = if step > 0.0 { self.min } else { self.max };
                self.ticks = 0;
            } else {
                self.active = false;
            }
        }
        value.clamp(self.min, self.max)
    }

    fn next_walk(&mut self, max_step: f64, retain: f64, increase: f64, reset: f64) -> f64 {
        if !self.started {
            self.started = true;
            return self.current;
        }
        if self.rng.random::<f64>() < retain {
            return self.current;
        }
        if self.rng.random::<f64>() < reset {
            self.current = self.initial;
            return self.current;
        }
        // (0, max_step]
        let delta = max_step * (1.0 - self.rng.random::<f64>());
        if self.rng.random::<f64>() < increase {
            self.current += delta;
        } else {
            self.current -= delta;
        }
        self.current = self.current.clamp(self.min, self.max);
        self.current
    }

    fn next_uniform(&mut self) -> f64 {
        match self.kind {
            NumberKind::Int => self.rng.random_range(self.min.ceil() as i64..=self.max.floor() as i64) as f64,
            NumberKind::Float => self.rng.random_range(self.min..=self.max),
        }
    }

    fn emit(&self, v: f64) -> Value {
        match self.kind {
            NumberKind::Int => Value::from(v.round() as i64),
            NumberKind::Float => Value::from(round_to(v, self.decimals)),
        }
    }
}

impl Generate for NumberGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn generate_value(&mut self, _payload: &Map<String, Value>) -> Result<Value, GeneratorError> {
        let v = match self.mode {
            NumberMode::Step { step, restart } => self.next_step(step, restart),
            NumberMode::RandomWalk {
                max_step,
                retain,
                increase,
                reset,
            } => self.next_walk(max_step, retain, increase, reset),
            NumberMode::Uniform => self.next_uniform(),
        };
        Ok(self.emit(v))
    }
}

pub(crate) fn round_to(v: f64, decimals: Option<u32>) -> f64 {
    match decimals {
        Some(d) => {
            let factor = 10f64.powi(d.min(15) as i32);
            (v * factor).round() / factor
        }
        None => v,
    }
}
