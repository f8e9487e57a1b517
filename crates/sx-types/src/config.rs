//! Configurations: the parameter assignments a search evaluates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::SxResult;
use crate::invalid_configuration;

/// A concrete parameter value.
///
/// Categorical parameters store the chosen value itself, not its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    fn from_json(name: &str, value: &serde_json::Value) -> SxResult<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(invalid_configuration!("parameter {name}: number {n} out of range"))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(Self::Text(b.to_string())),
            other => Err(invalid_configuration!(
                "parameter {name}: expected number or string, got {other}"
            )),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Mapping from parameter name to value. Iteration is ordered by name, so two
/// configurations built in different insertion orders compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ParameterValue>);

impl Configuration {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<ParameterValue> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Build a configuration from an arbitrary JSON value, which must be an
    /// object whose values are numbers or strings.
    pub fn from_json(value: &serde_json::Value) -> SxResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            invalid_configuration!("expected a mapping of parameter values, got {value}")
        })?;

        let mut config = Self::new();
        for (name, raw) in object {
            config
                .0
                .insert(name.clone(), ParameterValue::from_json(name, raw)?);
        }
        Ok(config)
    }

    /// Reject values that cannot be encoded losslessly.
    pub fn validate(&self) -> SxResult<()> {
        for (name, value) in &self.0 {
            if let ParameterValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(invalid_configuration!("parameter {name} is not finite: {v}"));
                }
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insertion_order_does_not_matter() {
        let a = Configuration::new().with("lr", 0.01).with("layers", 3);
        let b = Configuration::new().with("layers", 3).with("lr", 0.01);
        assert_eq!(a, b);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["layers", "lr"]);
    }

    #[test]
    fn from_json_rejects_non_mapping() {
        let err = Configuration::from_json(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, crate::SxError::InvalidConfiguration { .. }));

        let err = Configuration::from_json(&json!({"x": [1]})).unwrap_err();
        assert!(err.to_string().contains("parameter x"));
    }

    #[test]
    fn from_json_keeps_int_float_distinction() {
        let config = Configuration::from_json(&json!({"a": 2, "b": 2.0, "c": "relu"})).unwrap();
        assert_eq!(config.get("a"), Some(&ParameterValue::Int(2)));
        assert_eq!(config.get("b"), Some(&ParameterValue::Float(2.0)));
        assert_eq!(config.get("c"), Some(&ParameterValue::Text("relu".into())));
    }

    #[test]
    fn validate_rejects_nan() {
        let config = Configuration::new().with("x", f64::NAN);
        assert!(config.validate().is_err());
        assert!(Configuration::new().with("x", 1.5).validate().is_ok());
    }

    #[test]
    fn display_is_sorted() {
        let config = Configuration::new().with("b", 1).with("a", "sgd");
        assert_eq!(config.to_string(), "{a=sgd, b=1}");
    }
}
