//! Kernel-regression surrogate.
//!
//! Predicts the objective at a point as a Gaussian-weighted average of the
//! observed values (coordinates normalized to the unit cube, objectives
//! standardized). Uncertainty grows where little has been observed. Proposals
//! minimize the configured acquisition (lower confidence bound by default)
//! over a random candidate set.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sx_types::Dimension;
use tracing::debug;

use crate::acquisition::AcquisitionKind;
use crate::model::{sample_point, Observations, Point, SurrogateModel};

pub const DEFAULT_KAPPA: f64 = 1.96;
const DEFAULT_CANDIDATES: usize = 1000;
const DEFAULT_LENGTH_SCALE: f64 = 0.2;
/// Weight of the zero-mean prior in standardized units.
const PRIOR_WEIGHT: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct KernelSurrogate {
    dims: Vec<Dimension>,
    rng: ChaCha8Rng,
    observations: Observations,
    kappa: f64,
    acquisition: AcquisitionKind,
    candidates: usize,
    length_scale: f64,
}

/// Observations prepared for scoring: unit-cube coordinates and standardized
/// values.
struct Fitted {
    units: Vec<Vec<f64>>,
    scaled: Vec<f64>,
    best: f64,
}

impl KernelSurrogate {
    pub fn new(dims: Vec<Dimension>, seed: u64) -> Self {
        Self {
            dims,
            rng: ChaCha8Rng::seed_from_u64(seed),
            observations: Observations::default(),
            kappa: DEFAULT_KAPPA,
            acquisition: AcquisitionKind::default(),
            candidates: DEFAULT_CANDIDATES,
            length_scale: DEFAULT_LENGTH_SCALE,
        }
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionKind) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn acquisition_kind(&self) -> AcquisitionKind {
        self.acquisition
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates.max(1);
        self
    }

    pub fn with_length_scale(mut self, length_scale: f64) -> Self {
        self.length_scale = length_scale;
        self
    }

    fn normalize(&self, point: &[f64]) -> Vec<f64> {
        self.dims
            .iter()
            .zip(point)
            .map(|(dim, &v)| dim.normalize(v))
            .collect()
    }

    fn fit(&self) -> Fitted {
        let values = &self.observations.values;
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = if var > 0.0 { var.sqrt() } else { 1.0 };

        let scaled: Vec<f64> = values.iter().map(|v| (v - mean) / std).collect();
        let best = scaled.iter().copied().fold(f64::INFINITY, f64::min);
        Fitted {
            units: self
                .observations
                .points
                .iter()
                .map(|p| self.normalize(p))
                .collect(),
            scaled,
            best,
        }
    }

    /// Predicted mean and standard deviation, in standardized units.
    fn predict(&self, fitted: &Fitted, unit: &[f64]) -> (f64, f64) {
        let denom = 2.0 * self.length_scale * self.length_scale;
        let mut weight_sum = 0.0;
        let mut weighted = 0.0;
        let weights: Vec<f64> = fitted
            .units
            .iter()
            .map(|obs| {
                let d2: f64 = obs.iter().zip(unit).map(|(a, b)| (a - b).powi(2)).sum();
                (-d2 / denom).exp()
            })
            .collect();
        for (w, y) in weights.iter().zip(&fitted.scaled) {
            weight_sum += w;
            weighted += w * y;
        }

        let total = weight_sum + PRIOR_WEIGHT;
        let mu = weighted / total;
        let spread: f64 = weights
            .iter()
            .zip(&fitted.scaled)
            .map(|(w, y)| w * (y - mu).powi(2))
            .sum::<f64>()
            / total;
        let sigma = (spread + 1.0 / (1.0 + weight_sum)).sqrt();
        (mu, sigma)
    }

    fn acquisition(&self, fitted: &Fitted, point: &[f64]) -> f64 {
        let (mu, sigma) = self.predict(fitted, &self.normalize(point));
        self.acquisition.score(mu, sigma, fitted.best, self.kappa)
    }
}

impl SurrogateModel for KernelSurrogate {
    fn initial_design(&mut self, n: usize) -> Vec<Point> {
        (0..n)
            .map(|_| sample_point(&self.dims, &mut self.rng))
            .collect()
    }

    fn ask(&mut self, n: usize) -> Vec<Point> {
        if self.observations.values.is_empty() {
            return self.initial_design(n);
        }

        let candidates: Vec<Point> = (0..self.candidates.max(n))
            .map(|_| sample_point(&self.dims, &mut self.rng))
            .collect();
        let fitted = self.fit();
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|c| self.acquisition(&fitted, c))
            .collect();

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

        let mut chosen: Vec<Point> = Vec::with_capacity(n);
        for idx in order {
            if chosen.len() == n {
                break;
            }
            let candidate = &candidates[idx];
            if self.observations.contains(candidate) || chosen.contains(candidate) {
                continue;
            }
            chosen.push(candidate.clone());
        }
        debug!(
            requested = n,
            proposed = chosen.len(),
            observations = self.observations.values.len(),
            acquisition = %self.acquisition,
            "kernel surrogate proposals"
        );
        chosen
    }

    fn tell(&mut self, points: &[Point], values: &[f64]) {
        self.observations.extend(points, values);
    }

    fn reset(&mut self) {
        self.observations.clear();
    }

    fn observations(&self) -> (&[Point], &[f64]) {
        (
            self.observations.points.as_slice(),
            self.observations.values.as_slice(),
        )
    }

    fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    fn name(&self) -> &str {
        "kernel"
    }
}
