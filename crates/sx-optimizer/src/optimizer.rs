//! Batch optimizer over a surrogate model using the constant-liar heuristic.
//!
//! Every proposed point is recorded in a [`LieTable`]. While a point is being
//! evaluated the model is told a provisional value for it, so subsequent
//! proposals move elsewhere. When true results arrive the table is updated
//! and the model is rebuilt from the whole table, which keeps the model's
//! observation count equal to the number of proposals.

use sx_types::{
    config_error, consistency_error, is_failure, Configuration, SearchSpace, SxResult,
    FAILURE_SENTINEL,
};
use tracing::{debug, info};

use crate::liar::{EntryState, LiarStrategy, LieTable};
use crate::model::{Point, SurrogateModel};

pub const DEFAULT_SEED: u64 = 12345;
pub const DEFAULT_BATCH_SIZE: usize = 20;
/// Draws allowed for one fresh point before the space is considered spent.
const MAX_REDRAWS: usize = 32;

#[derive(Debug)]
pub struct SurrogateOptimizer<M: SurrogateModel> {
    space: SearchSpace,
    model: M,
    strategy: LiarStrategy,
    lie_table: LieTable,
    counter: usize,
    batch_size: usize,
}

impl<M: SurrogateModel> SurrogateOptimizer<M> {
    pub fn new(space: SearchSpace, model: M, strategy: LiarStrategy) -> SxResult<Self> {
        space.validate()?;
        if model.dimensions().len() != space.len() {
            return Err(config_error!(
                "model has {} dimensions, search space has {} parameters",
                model.dimensions().len(),
                space.len()
            ));
        }
        info!(
            model = model.name(),
            strategy = %strategy,
            parameters = space.len(),
            "Surrogate optimizer initialized"
        );
        Ok(Self {
            space,
            model,
            strategy,
            lie_table: LieTable::new(),
            counter: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Exploration points from the model's initial design. They enter the
    /// lie table with a provisional 0.0 and are not told to the model until
    /// the next `tell`.
    pub fn ask_initial(&mut self, n: usize) -> SxResult<Vec<Configuration>> {
        let mut configs = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(point) = self.draw_fresh(true) else {
                break;
            };
            let config = self.space.to_configuration(&point)?;
            self.lie_table.insert(point, 0.0, EntryState::Lie);
            self.counter += 1;
            configs.push(config);
        }
        debug!(requested = n, produced = configs.len(), "Initial design drawn");
        Ok(configs)
    }

    /// Lazily propose `n` points in batches of the configured batch size.
    /// Each point is told to the model with the current lie before the next
    /// one is drawn. The iterator stops early if no fresh point can be found.
    pub fn ask(&mut self, n: usize) -> ProposalBatches<'_, M> {
        ProposalBatches {
            optimizer: self,
            remaining: n,
            exhausted: false,
        }
    }

    /// Record evaluated objectives for previously proposed configurations.
    ///
    /// All configurations are checked before anything changes. Failures
    /// (sentinel or non-finite objectives) are stored as the worst true
    /// observation so far, or 0.0 when there is none.
    pub fn tell(&mut self, results: &[(Configuration, f64)]) -> SxResult<()> {
        let mut points = Vec::with_capacity(results.len());
        for (config, _) in results {
            let point = self.space.to_point(config).map_err(|err| {
                consistency_error!(
                    self.counter,
                    self.lie_table.len(),
                    "told configuration {config} does not fit the search space: {err}"
                )
            })?;
            if !self.lie_table.contains(&point) {
                return Err(consistency_error!(
                    self.counter,
                    self.lie_table.len(),
                    "told configuration {config} was never proposed"
                ));
            }
            points.push(point);
        }

        for (point, (_, objective)) in points.iter().zip(results) {
            if is_failure(*objective) {
                let capped = self
                    .lie_table
                    .max_observed()
                    .map_or(0.0, |max| max.min(FAILURE_SENTINEL));
                self.lie_table.update(point, capped, EntryState::Failed);
            } else {
                self.lie_table.update(point, *objective, EntryState::Observed);
            }
        }

        self.retell()?;
        debug!(
            told = results.len(),
            observed = self.lie_table.count(EntryState::Observed),
            failed = self.lie_table.count(EntryState::Failed),
            pending = self.lie_table.count(EntryState::Lie),
            "Results told to surrogate"
        );
        Ok(())
    }

    /// Total number of points ever proposed.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn lie_table(&self) -> &LieTable {
        &self.lie_table
    }

    pub fn strategy(&self) -> LiarStrategy {
        self.strategy
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lowest true observation and its configuration.
    pub fn best(&self) -> Option<(Configuration, f64)> {
        self.lie_table
            .iter()
            .filter(|e| e.state == EntryState::Observed)
            .min_by(|a, b| a.value.total_cmp(&b.value))
            .and_then(|e| {
                self.space
                    .to_configuration(&e.point)
                    .ok()
                    .map(|config| (config, e.value))
            })
    }

    fn retell(&mut self) -> SxResult<()> {
        let (points, values) = self.lie_table.points_and_values();
        self.model.reset();
        self.model.tell(&points, &values);

        let observed = self.model.observations().1.len();
        if observed != self.counter {
            return Err(consistency_error!(
                self.counter,
                self.lie_table.len(),
                "model holds {observed} observations after retelling the lie table"
            ));
        }
        Ok(())
    }

    fn draw_fresh(&mut self, initial: bool) -> Option<Point> {
        for _ in 0..MAX_REDRAWS {
            let drawn = if initial {
                self.model.initial_design(1)
            } else {
                self.model.ask(1)
            };
            match drawn.into_iter().next() {
                Some(point) if !self.lie_table.contains(&point) => return Some(point),
                Some(_) => continue,
                None => break,
            }
        }
        debug!(
            proposals = self.counter,
            "No fresh point found, search space looks exhausted"
        );
        None
    }

    fn propose_one(&mut self) -> Option<SxResult<Configuration>> {
        let point = self.draw_fresh(false)?;
        let config = match self.space.to_configuration(&point) {
            Ok(config) => config,
            Err(err) => return Some(Err(err)),
        };
        let lie = self.strategy.lie(&self.lie_table.observed_values());
        self.model.tell(std::slice::from_ref(&point), &[lie]);
        self.lie_table.insert(point, lie, EntryState::Lie);
        self.counter += 1;
        Some(Ok(config))
    }
}

/// Batches of proposals produced by [`SurrogateOptimizer::ask`].
pub struct ProposalBatches<'a, M: SurrogateModel> {
    optimizer: &'a mut SurrogateOptimizer<M>,
    remaining: usize,
    exhausted: bool,
}

impl<M: SurrogateModel> Iterator for ProposalBatches<'_, M> {
    type Item = SxResult<Vec<Configuration>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.exhausted {
            return None;
        }

        let size = self.remaining.min(self.optimizer.batch_size);
        let mut batch = Vec::with_capacity(size);
        for _ in 0..size {
            match self.optimizer.propose_one() {
                Some(Ok(config)) => batch.push(config),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        self.remaining -= size;

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

impl<M: SurrogateModel> ProposalBatches<'_, M> {
    /// Drain every batch into one list.
    pub fn flatten_all(self) -> SxResult<Vec<Configuration>> {
        let mut configs = Vec::new();
        for batch in self {
            configs.extend(batch?);
        }
        Ok(configs)
    }
}
