//! Random surrogate: proposes uniform samples and ignores what it is told.
//! Useful as a baseline and for pure exploration.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sx_types::Dimension;

use crate::model::{sample_point, Observations, Point, SurrogateModel};

#[derive(Debug, Clone)]
pub struct RandomSurrogate {
    dims: Vec<Dimension>,
    rng: ChaCha8Rng,
    observations: Observations,
}

impl RandomSurrogate {
    pub fn new(dims: Vec<Dimension>, seed: u64) -> Self {
        Self {
            dims,
            rng: ChaCha8Rng::seed_from_u64(seed),
            observations: Observations::default(),
        }
    }
}

impl SurrogateModel for RandomSurrogate {
    fn initial_design(&mut self, n: usize) -> Vec<Point> {
        self.ask(n)
    }

    fn ask(&mut self, n: usize) -> Vec<Point> {
        (0..n)
            .map(|_| sample_point(&self.dims, &mut self.rng))
            .collect()
    }

    fn tell(&mut self, points: &[Point], values: &[f64]) {
        self.observations.extend(points, values);
    }

    fn reset(&mut self) {
        self.observations.clear();
    }

    fn observations(&self) -> (&[Point], &[f64]) {
        (self.observations.points.as_slice(), self.observations.values.as_slice())
    }

    fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<Dimension> {
        vec![Dimension {
            low: 0.0,
            high: 1.0,
            integral: false,
            log: false,
        }]
    }

    #[test]
    fn same_seed_same_points() {
        let mut a = RandomSurrogate::new(dims(), 12345);
        let mut b = RandomSurrogate::new(dims(), 12345);
        assert_eq!(a.ask(5), b.ask(5));
    }

    #[test]
    fn tell_and_reset_track_observations() {
        let mut model = RandomSurrogate::new(dims(), 1);
        model.tell(&[vec![0.1], vec![0.2]], &[1.0, 2.0]);
        assert_eq!(model.observations().0.len(), 2);
        model.reset();
        assert!(model.observations().1.is_empty());
    }
}
