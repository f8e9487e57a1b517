//! Built-in benchmark problem: a ten-dimensional quadratic bowl with its
//! minimum 0.0 at the origin.

use sx_types::{Configuration, SearchSpace};

pub const POLYNOME2_DIMENSIONS: usize = 10;
const BOUND: f64 = 10.0;

/// `e0..e9`, each a float in [-10, 10].
pub fn polynome2_space() -> SearchSpace {
    (0..POLYNOME2_DIMENSIONS).fold(SearchSpace::new(), |space, i| {
        space.add_float(format!("e{i}"), -BOUND, BOUND)
    })
}

/// Sum of squares of `e0..e9`.
pub fn polynome2(config: &Configuration) -> Result<f64, String> {
    (0..POLYNOME2_DIMENSIONS)
        .map(|i| {
            let name = format!("e{i}");
            config
                .get(&name)
                .and_then(|v| v.as_f64())
                .map(|v| v * v)
                .ok_or_else(|| format!("missing numeric parameter {name}"))
        })
        .sum()
}
