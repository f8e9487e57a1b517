//! Deduplication keys for configurations.
//!
//! The default codec is canonical JSON: keys sorted, floats written so they
//! stay distinguishable from integers. It is lossless, so a fingerprint can be
//! decoded back into the configuration that produced it. Callers can swap in
//! a codec that ignores some parameters, or any function of their own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::Configuration;
use crate::errors::SxResult;
use crate::invalid_configuration;

/// Stable string key derived from a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller-supplied fingerprint function.
pub trait FingerprintFn: Send + Sync {
    fn fingerprint(&self, config: &Configuration) -> SxResult<Fingerprint>;
}

impl<F> FingerprintFn for F
where
    F: Fn(&Configuration) -> SxResult<Fingerprint> + Send + Sync,
{
    fn fingerprint(&self, config: &Configuration) -> SxResult<Fingerprint> {
        self(config)
    }
}

/// Encodes configurations into fingerprints.
#[derive(Clone, Default)]
pub enum FingerprintCodec {
    /// Lossless canonical JSON.
    #[default]
    Canonical,
    /// Canonical JSON with the named parameters removed first.
    Ignoring(BTreeSet<String>),
    /// Arbitrary caller-supplied function.
    Custom(Arc<dyn FingerprintFn>),
}

impl FingerprintCodec {
    pub fn ignoring<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ignoring(names.into_iter().map(Into::into).collect())
    }

    pub fn custom(f: impl FingerprintFn + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Whether `decode` can recover the configuration.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Canonical)
    }

    pub fn encode(&self, config: &Configuration) -> SxResult<Fingerprint> {
        match self {
            Self::Canonical => canonical(config),
            Self::Ignoring(names) => {
                let mut reduced = config.clone();
                for name in names {
                    reduced.remove(name);
                }
                canonical(&reduced)
            }
            Self::Custom(f) => f.fingerprint(config),
        }
    }

    /// Encode an untyped value. Anything other than a JSON object is rejected.
    pub fn encode_value(&self, value: &serde_json::Value) -> SxResult<Fingerprint> {
        self.encode(&Configuration::from_json(value)?)
    }

    pub fn decode(&self, fingerprint: &Fingerprint) -> SxResult<Configuration> {
        if !self.is_lossless() {
            return Err(invalid_configuration!(
                "fingerprint {fingerprint} was produced by a lossy codec"
            ));
        }
        let value: serde_json::Value = serde_json::from_str(fingerprint.as_str())
            .map_err(|e| invalid_configuration!("malformed fingerprint {fingerprint}: {e}"))?;
        Configuration::from_json(&value)
    }
}

impl fmt::Debug for FingerprintCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical => write!(f, "Canonical"),
            Self::Ignoring(names) => f.debug_tuple("Ignoring").field(names).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn canonical(config: &Configuration) -> SxResult<Fingerprint> {
    config.validate()?;
    let key = serde_json::to_string(config)
        .map_err(|e| invalid_configuration!("cannot encode {config}: {e}"))?;
    Ok(Fingerprint(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SxError;
    use serde_json::json;

    #[test]
    fn encoding_is_order_independent() {
        let codec = FingerprintCodec::Canonical;
        let a = Configuration::new()
            .with("units", 64)
            .with("dropout", 0.25)
            .with("activation", "relu");
        let b = Configuration::new()
            .with("activation", "relu")
            .with("units", 64)
            .with("dropout", 0.25);
        assert_eq!(codec.encode(&a).unwrap(), codec.encode(&b).unwrap());
    }

    #[test]
    fn different_values_give_different_fingerprints() {
        let codec = FingerprintCodec::Canonical;
        let a = Configuration::new().with("x", 1);
        let b = Configuration::new().with("x", 1.0);
        let c = Configuration::new().with("x", 2);
        let fa = codec.encode(&a).unwrap();
        assert_ne!(fa, codec.encode(&b).unwrap());
        assert_ne!(fa, codec.encode(&c).unwrap());
    }

    #[test]
    fn canonical_decode_inverts_encode() {
        let codec = FingerprintCodec::Canonical;
        let config = Configuration::new()
            .with("lr", 0.1 + 0.2)
            .with("batch", -32)
            .with("optimizer", "adam")
            .with("momentum", 0.0);
        let key = codec.encode(&config).unwrap();
        assert_eq!(codec.decode(&key).unwrap(), config);
    }

    #[test]
    fn ignoring_codec_collapses_named_parameters() {
        let codec = FingerprintCodec::ignoring(["seed"]);
        let a = Configuration::new().with("x", 3).with("seed", 1);
        let b = Configuration::new().with("x", 3).with("seed", 2);
        assert_eq!(codec.encode(&a).unwrap(), codec.encode(&b).unwrap());
        assert!(codec.decode(&codec.encode(&a).unwrap()).is_err());
    }

    #[test]
    fn custom_codec_is_used() {
        let codec = FingerprintCodec::custom(|config: &Configuration| {
            Ok(Fingerprint::new(format!("n={}", config.len())))
        });
        let key = codec.encode(&Configuration::new().with("a", 1)).unwrap();
        assert_eq!(key.as_str(), "n=1");
        assert!(!codec.is_lossless());
    }

    #[test]
    fn non_mapping_input_is_invalid() {
        let codec = FingerprintCodec::Canonical;
        let err = codec.encode_value(&json!("x=1")).unwrap_err();
        assert!(matches!(err, SxError::InvalidConfiguration { .. }));

        let err = codec.decode(&Fingerprint::new("[1,2]")).unwrap_err();
        assert!(matches!(err, SxError::InvalidConfiguration { .. }));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let codec = FingerprintCodec::Canonical;
        let config = Configuration::new().with("x", f64::INFINITY);
        assert!(codec.encode(&config).is_err());
    }
}
