//! Acquisition functions for the kernel surrogate.
//!
//! Every function is expressed as a score to minimize, computed from the
//! predicted mean and standard deviation in standardized units.

use serde::{Deserialize, Serialize};

/// Exploration margin for improvement-based acquisitions.
pub const DEFAULT_XI: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AcquisitionKind {
    /// Lower confidence bound, `mu - kappa * sigma`.
    #[default]
    #[serde(alias = "lcb")]
    Lcb,
    /// Expected improvement over the best observation.
    #[serde(alias = "ei")]
    Ei,
    /// Probability of improving on the best observation.
    #[serde(alias = "pi")]
    Pi,
}

impl AcquisitionKind {
    /// Score of a prediction; lower is more promising. `best` is the lowest
    /// observed value on the same scale as `mu`.
    pub fn score(self, mu: f64, sigma: f64, best: f64, kappa: f64) -> f64 {
        match self {
            Self::Lcb => mu - kappa * sigma,
            Self::Ei => {
                let improvement = best - mu - DEFAULT_XI;
                let z = improvement / sigma;
                -(improvement * norm_cdf(z) + sigma * norm_pdf(z))
            }
            Self::Pi => -norm_cdf((best - mu - DEFAULT_XI) / sigma),
        }
    }
}

impl std::fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lcb => "LCB",
            Self::Ei => "EI",
            Self::Pi => "PI",
        };
        f.write_str(name)
    }
}

/// Standard normal CDF via the Abramowitz & Stegun 7.1.26 erf approximation.
fn norm_cdf(x: f64) -> f64 {
    if x >= 8.0 {
        return 1.0;
    }
    if x <= -8.0 {
        return 0.0;
    }

    let a1 = 0.254829592_f64;
    let a2 = -0.284496736_f64;
    let a3 = 1.421413741_f64;
    let a4 = -1.453152027_f64;
    let a5 = 1.061405429_f64;
    let p = 0.3275911_f64;

    let u = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + p * u);
    let erf = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-u * u).exp();

    if x < 0.0 {
        0.5 * (1.0 - erf)
    } else {
        0.5 * (1.0 + erf)
    }
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_cdf_reference_values() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_cdf(-1.0) - 0.158_655).abs() < 1e-4);
        assert_eq!(norm_cdf(9.0), 1.0);
        assert_eq!(norm_cdf(-9.0), 0.0);
    }

    #[test]
    fn lower_mean_scores_better() {
        for kind in [AcquisitionKind::Lcb, AcquisitionKind::Ei, AcquisitionKind::Pi] {
            let low = kind.score(-1.0, 0.5, -0.8, 1.96);
            let high = kind.score(0.5, 0.5, -0.8, 1.96);
            assert!(low < high, "{kind}");
        }
    }

    #[test]
    fn expected_improvement_rewards_uncertainty() {
        let narrow = AcquisitionKind::Ei.score(0.0, 0.1, 0.0, 0.0);
        let wide = AcquisitionKind::Ei.score(0.0, 1.0, 0.0, 0.0);
        assert!(wide < narrow);
    }

    #[test]
    fn serde_names() {
        let kind: AcquisitionKind = serde_json::from_str("\"EI\"").unwrap();
        assert_eq!(kind, AcquisitionKind::Ei);
        let kind: AcquisitionKind = serde_json::from_str("\"pi\"").unwrap();
        assert_eq!(kind, AcquisitionKind::Pi);
        assert_eq!(serde_json::to_string(&AcquisitionKind::Lcb).unwrap(), "\"LCB\"");
    }
}
