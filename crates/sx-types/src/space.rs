//! Search space definitions and the mapping between configurations and the
//! numeric points a surrogate model works with.

use serde::{Deserialize, Serialize};

use crate::config::{Configuration, ParameterValue};
use crate::errors::SxResult;
use crate::invalid_configuration;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices, addressed by index in point space.
    Choice { values: Vec<ParameterValue> },
}

/// Numeric view of one dimension, as seen by a surrogate model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub low: f64,
    pub high: f64,
    /// Only whole numbers are valid coordinates.
    pub integral: bool,
    /// Distances are measured in log-space.
    pub log: bool,
}

impl Dimension {
    /// Clamp into bounds and round integral coordinates.
    pub fn snap(&self, value: f64) -> f64 {
        let v = value.clamp(self.low, self.high);
        // -0.0 and 0.0 must produce the same point.
        let v = if self.integral { v.round() } else { v };
        v + 0.0
    }

    /// Map a coordinate to [0, 1].
    pub fn normalize(&self, value: f64) -> f64 {
        let (lo, hi, v) = if self.log {
            (self.low.ln(), self.high.ln(), value.ln())
        } else {
            (self.low, self.high, value)
        };
        if hi > lo {
            (v - lo) / (hi - lo)
        } else {
            0.0
        }
    }

    /// Inverse of [`Dimension::normalize`], snapped.
    pub fn denormalize(&self, unit: f64) -> f64 {
        let unit = unit.clamp(0.0, 1.0);
        let v = if self.log {
            let (lo, hi) = (self.low.ln(), self.high.ln());
            (lo + unit * (hi - lo)).exp()
        } else {
            self.low + unit * (self.high - self.low)
        };
        self.snap(v)
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Check bounds and choice lists before a search starts.
    pub fn validate(&self) -> SxResult<()> {
        if self.parameters.is_empty() {
            return Err(invalid_configuration!("search space has no parameters"));
        }
        for param in &self.parameters {
            let ok = match &param.kind {
                ParameterKind::FloatRange { low, high } => low.is_finite() && high.is_finite() && low <= high,
                ParameterKind::IntRange { low, high } => low <= high,
                ParameterKind::LogUniform { low, high } => *low > 0.0 && high.is_finite() && low <= high,
                ParameterKind::Choice { values } => !values.is_empty(),
            };
            if !ok {
                return Err(invalid_configuration!(
                    "parameter {} has an empty or invalid domain: {:?}",
                    param.name,
                    param.kind
                ));
            }
        }
        Ok(())
    }

    /// Numeric dimensions in parameter order.
    pub fn dimensions(&self) -> Vec<Dimension> {
        self.parameters
            .iter()
            .map(|param| match &param.kind {
                ParameterKind::FloatRange { low, high } => Dimension {
                    low: *low,
                    high: *high,
                    integral: false,
                    log: false,
                },
                ParameterKind::IntRange { low, high } => Dimension {
                    low: *low as f64,
                    high: *high as f64,
                    integral: true,
                    log: false,
                },
                ParameterKind::LogUniform { low, high } => Dimension {
                    low: *low,
                    high: *high,
                    integral: false,
                    log: true,
                },
                ParameterKind::Choice { values } => Dimension {
                    low: 0.0,
                    high: values.len().saturating_sub(1) as f64,
                    integral: true,
                    log: false,
                },
            })
            .collect()
    }

    /// Convert a configuration to its point in model space.
    pub fn to_point(&self, config: &Configuration) -> SxResult<Vec<f64>> {
        self.parameters
            .iter()
            .map(|param| {
                let value = config
                    .get(&param.name)
                    .ok_or_else(|| invalid_configuration!("missing parameter {}", param.name))?;
                let coordinate = match (&param.kind, value) {
                    (ParameterKind::Choice { values }, v) => values
                        .iter()
                        .position(|candidate| candidate == v)
                        .map(|idx| idx as f64)
                        .ok_or_else(|| {
                            invalid_configuration!("{v} is not a choice of {}", param.name)
                        })?,
                    (ParameterKind::IntRange { .. }, ParameterValue::Int(v)) => *v as f64,
                    (ParameterKind::IntRange { .. }, ParameterValue::Float(v)) if v.fract() == 0.0 => *v,
                    (ParameterKind::FloatRange { .. } | ParameterKind::LogUniform { .. }, v) => {
                        v.as_f64().ok_or_else(|| {
                            invalid_configuration!("{} expects a number, got {v}", param.name)
                        })?
                    }
                    (_, v) => {
                        return Err(invalid_configuration!(
                            "{} expects an integer, got {v}",
                            param.name
                        ))
                    }
                };
                Ok(coordinate + 0.0)
            })
            .collect()
    }

    /// Convert a model point back into a configuration.
    pub fn to_configuration(&self, point: &[f64]) -> SxResult<Configuration> {
        if point.len() != self.parameters.len() {
            return Err(invalid_configuration!(
                "point has {} coordinates, space has {} parameters",
                point.len(),
                self.parameters.len()
            ));
        }

        let mut config = Configuration::new();
        for (param, &coordinate) in self.parameters.iter().zip(point) {
            let value = match &param.kind {
                ParameterKind::FloatRange { .. } | ParameterKind::LogUniform { .. } => {
                    ParameterValue::Float(coordinate)
                }
                ParameterKind::IntRange { .. } => ParameterValue::Int(coordinate.round() as i64),
                ParameterKind::Choice { values } => {
                    let Some(last) = values.len().checked_sub(1) else {
                        return Err(invalid_configuration!("{} has no choices", param.name));
                    };
                    let idx = (coordinate.round().max(0.0) as usize).min(last);
                    values[idx].clone()
                }
            };
            config.insert(param.name.clone(), value);
        }
        Ok(config)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("units", 8, 128)
            .add_float("dropout", 0.0, 0.5)
            .add_log_uniform("lr", 1e-5, 1e-1)
            .add_choice("activation", vec!["relu".into(), "tanh".into()])
    }

    #[test]
    fn dimensions_follow_parameter_order() {
        let dims = sample_space().dimensions();
        assert_eq!(dims.len(), 4);
        assert!(dims[0].integral);
        assert!(!dims[1].integral);
        assert!(dims[2].log);
        assert_eq!(dims[3].high, 1.0);
    }

    #[test]
    fn point_round_trip() {
        let space = sample_space();
        let config = Configuration::new()
            .with("units", 64)
            .with("dropout", 0.125)
            .with("lr", 0.001)
            .with("activation", "tanh");
        let point = space.to_point(&config).unwrap();
        assert_eq!(point, vec![64.0, 0.125, 0.001, 1.0]);
        assert_eq!(space.to_configuration(&point).unwrap(), config);
    }

    #[test]
    fn unknown_choice_is_rejected() {
        let space = sample_space();
        let config = Configuration::new()
            .with("units", 64)
            .with("dropout", 0.1)
            .with("lr", 0.01)
            .with("activation", "gelu");
        assert!(space.to_point(&config).is_err());
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        assert!(sample_space().to_configuration(&[1.0]).is_err());
    }

    #[test]
    fn snap_and_normalize() {
        let dim = Dimension {
            low: 1.0,
            high: 5.0,
            integral: true,
            log: false,
        };
        assert_eq!(dim.snap(3.6), 4.0);
        assert_eq!(dim.snap(9.0), 5.0);
        assert_eq!(dim.normalize(3.0), 0.5);
        assert_eq!(dim.denormalize(0.5), 3.0);

        let log_dim = Dimension {
            low: 1e-4,
            high: 1.0,
            integral: false,
            log: true,
        };
        assert!((log_dim.normalize(1e-2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_choice_fails_validation() {
        let space = SearchSpace::new().add_choice("opt", vec![]);
        assert!(space.validate().is_err());
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn empty_choice_is_rejected_when_decoding() {
        let space = SearchSpace::new().add_choice("opt", vec![]);
        let err = space.to_configuration(&[0.0]).unwrap_err();
        assert!(matches!(err, crate::SxError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("opt has no choices"));
    }
}
