//! Surrogate model abstraction.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sx_types::Dimension;

use crate::acquisition::AcquisitionKind;
use crate::kernel::KernelSurrogate;
use crate::random::RandomSurrogate;

/// A point in model space: one coordinate per search-space dimension.
pub type Point = Vec<f64>;

/// Ask/tell capability every surrogate model provides.
///
/// Observations accumulate across `tell` calls until `reset`. Points returned
/// by `ask` are conditioned on everything told so far and are already snapped
/// to their dimensions.
pub trait SurrogateModel: Send {
    /// Unconditioned exploration points (e.g. uniform or space-filling).
    fn initial_design(&mut self, n: usize) -> Vec<Point>;

    /// Propose `n` points given the current observations.
    fn ask(&mut self, n: usize) -> Vec<Point>;

    fn tell(&mut self, points: &[Point], values: &[f64]);

    /// Forget all observations. The random stream is not rewound.
    fn reset(&mut self);

    fn observations(&self) -> (&[Point], &[f64]);

    fn dimensions(&self) -> &[Dimension];

    fn name(&self) -> &str;
}

/// Observation storage shared by the concrete models.
#[derive(Debug, Clone, Default)]
pub(crate) struct Observations {
    pub(crate) points: Vec<Point>,
    pub(crate) values: Vec<f64>,
}

impl Observations {
    pub(crate) fn extend(&mut self, points: &[Point], values: &[f64]) {
        debug_assert_eq!(points.len(), values.len());
        self.points.extend(points.iter().cloned());
        self.values.extend(values.iter().copied());
    }

    pub(crate) fn clear(&mut self) {
        self.points.clear();
        self.values.clear();
    }

    pub(crate) fn contains(&self, point: &[f64]) -> bool {
        self.points.iter().any(|p| p.as_slice() == point)
    }
}

/// Uniform sample over the space, in each dimension's own scale.
pub(crate) fn sample_point<R: Rng>(dims: &[Dimension], rng: &mut R) -> Point {
    dims.iter()
        .map(|dim| {
            if dim.integral {
                // Widen by half a step so the end values are as likely as the rest.
                let v = rng.random_range(dim.low - 0.5..dim.high + 0.5);
                dim.snap(v)
            } else {
                dim.denormalize(rng.random::<f64>())
            }
        })
        .collect()
}

/// Which surrogate model a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Kernel regression ranked by an [`AcquisitionKind`].
    #[default]
    Kernel,
    /// Uniform random proposals; ignores observations.
    Random,
}

impl ModelKind {
    pub fn build(
        self,
        dims: Vec<Dimension>,
        seed: u64,
        kappa: f64,
        acquisition: AcquisitionKind,
    ) -> Surrogate {
        match self {
            ModelKind::Kernel => Surrogate::Kernel(
                KernelSurrogate::new(dims, seed)
                    .with_kappa(kappa)
                    .with_acquisition(acquisition),
            ),
            ModelKind::Random => Surrogate::Random(RandomSurrogate::new(dims, seed)),
        }
    }
}

/// The closed set of surrogate models.
#[derive(Debug, Clone)]
pub enum Surrogate {
    Kernel(KernelSurrogate),
    Random(RandomSurrogate),
}

impl SurrogateModel for Surrogate {
    fn initial_design(&mut self, n: usize) -> Vec<Point> {
        match self {
            Surrogate::Kernel(m) => m.initial_design(n),
            Surrogate::Random(m) => m.initial_design(n),
        }
    }

    fn ask(&mut self, n: usize) -> Vec<Point> {
        match self {
            Surrogate::Kernel(m) => m.ask(n),
            Surrogate::Random(m) => m.ask(n),
        }
    }

    fn tell(&mut self, points: &[Point], values: &[f64]) {
        match self {
            Surrogate::Kernel(m) => m.tell(points, values),
            Surrogate::Random(m) => m.tell(points, values),
        }
    }

    fn reset(&mut self) {
        match self {
            Surrogate::Kernel(m) => m.reset(),
            Surrogate::Random(m) => m.reset(),
        }
    }

    fn observations(&self) -> (&[Point], &[f64]) {
        match self {
            Surrogate::Kernel(m) => m.observations(),
            Surrogate::Random(m) => m.observations(),
        }
    }

    fn dimensions(&self) -> &[Dimension] {
        match self {
            Surrogate::Kernel(m) => m.dimensions(),
            Surrogate::Random(m) => m.dimensions(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Surrogate::Kernel(m) => m.name(),
            Surrogate::Random(m) => m.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn dims() -> Vec<Dimension> {
        vec![
            Dimension {
                low: -2.0,
                high: 2.0,
                integral: true,
                log: false,
            },
            Dimension {
                low: 1e-3,
                high: 1.0,
                integral: false,
                log: true,
            },
        ]
    }

    #[test]
    fn samples_stay_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let dims = dims();
        let mut seen_ends = (false, false);
        for _ in 0..500 {
            let p = sample_point(&dims, &mut rng);
            assert!(p[0] >= -2.0 && p[0] <= 2.0 && p[0].fract() == 0.0);
            assert!(p[1] >= 1e-3 && p[1] <= 1.0);
            seen_ends.0 |= p[0] == -2.0;
            seen_ends.1 |= p[0] == 2.0;
        }
        assert!(seen_ends.0 && seen_ends.1);
    }

    #[test]
    fn model_kind_builds_requested_variant() {
        let kernel = ModelKind::Kernel.build(dims(), 1, 1.96, AcquisitionKind::Ei);
        assert_eq!(kernel.name(), "kernel");
        match &kernel {
            Surrogate::Kernel(m) => assert_eq!(m.acquisition_kind(), AcquisitionKind::Ei),
            other => panic!("unexpected model {other:?}"),
        }
        let random = ModelKind::Random.build(dims(), 1, 1.96, AcquisitionKind::Lcb);
        assert_eq!(random.name(), "random");
        assert_eq!(random.dimensions().len(), 2);
    }

    #[test]
    fn model_kind_serde_names() {
        let kind: ModelKind = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(kind, ModelKind::Random);
        assert_eq!(serde_json::to_string(&ModelKind::Kernel).unwrap(), "\"kernel\"");
    }
}
