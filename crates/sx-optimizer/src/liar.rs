//! Constant-liar strategies and the lie table.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Point;

/// How the provisional value told for an in-flight point is chosen from the
/// true observations made so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LiarStrategy {
    #[serde(rename = "cl_min")]
    Min,
    #[serde(rename = "cl_mean")]
    Mean,
    /// Pessimistic: pushes the model away from pending points.
    #[default]
    #[serde(rename = "cl_max")]
    Max,
}

impl LiarStrategy {
    /// Lie for the given true observations; 0.0 when there are none.
    pub fn lie(self, observed: &[f64]) -> f64 {
        if observed.is_empty() {
            return 0.0;
        }
        match self {
            LiarStrategy::Min => observed.iter().copied().fold(f64::INFINITY, f64::min),
            LiarStrategy::Max => observed.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            LiarStrategy::Mean => observed.iter().sum::<f64>() / observed.len() as f64,
        }
    }
}

impl fmt::Display for LiarStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LiarStrategy::Min => "cl_min",
            LiarStrategy::Mean => "cl_mean",
            LiarStrategy::Max => "cl_max",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Provisional value for a point still being evaluated.
    Lie,
    /// True objective.
    Observed,
    /// Capped stand-in for a failed evaluation.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LieEntry {
    pub point: Point,
    pub value: f64,
    pub state: EntryState,
}

/// Exact-bits key so points can be looked up in a hash map. `-0.0` and `0.0`
/// share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PointKey(Vec<u64>);

impl PointKey {
    fn of(point: &[f64]) -> Self {
        PointKey(point.iter().map(|v| (v + 0.0).to_bits()).collect())
    }
}

/// Every point ever proposed, in proposal order, with the value the model
/// is told for it.
#[derive(Debug, Clone, Default)]
pub struct LieTable {
    entries: Vec<LieEntry>,
    index: HashMap<PointKey, usize>,
}

impl LieTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point. Returns false (and changes nothing) if it is already
    /// present.
    pub fn insert(&mut self, point: Point, value: f64, state: EntryState) -> bool {
        let key = PointKey::of(&point);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(LieEntry {
            point,
            value,
            state,
        });
        true
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        self.index.contains_key(&PointKey::of(point))
    }

    pub fn position(&self, point: &[f64]) -> Option<usize> {
        self.index.get(&PointKey::of(point)).copied()
    }

    pub fn get(&self, point: &[f64]) -> Option<&LieEntry> {
        self.position(point).map(|idx| &self.entries[idx])
    }

    /// Overwrite the value of an existing entry in place, keeping its
    /// position. Returns false if the point is unknown.
    pub fn update(&mut self, point: &[f64], value: f64, state: EntryState) -> bool {
        match self.position(point) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.value = value;
                entry.state = state;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LieEntry> {
        self.entries.iter()
    }

    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// True objectives only; lies and capped failures are excluded.
    pub fn observed_values(&self) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Observed)
            .map(|e| e.value)
            .collect()
    }

    pub fn max_observed(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Observed)
            .map(|e| e.value)
            .reduce(f64::max)
    }

    /// Points and values in insertion order, ready to be told to a model.
    pub fn points_and_values(&self) -> (Vec<Point>, Vec<f64>) {
        self.entries
            .iter()
            .map(|e| (e.point.clone(), e.value))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_lie_without_observations_is_zero() {
        assert_eq!(LiarStrategy::Max.lie(&[]), 0.0);
        assert_eq!(LiarStrategy::Min.lie(&[]), 0.0);
        assert_eq!(LiarStrategy::Mean.lie(&[]), 0.0);
    }

    #[test]
    fn strategies_summarize_observations() {
        let observed = [1.0, 5.0, 3.0];
        assert_eq!(LiarStrategy::Max.lie(&observed), 5.0);
        assert_eq!(LiarStrategy::Min.lie(&observed), 1.0);
        assert_eq!(LiarStrategy::Mean.lie(&observed), 3.0);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(LiarStrategy::default(), LiarStrategy::Max);
        let parsed: LiarStrategy = serde_json::from_str("\"cl_mean\"").unwrap();
        assert_eq!(parsed, LiarStrategy::Mean);
        assert_eq!(LiarStrategy::Min.to_string(), "cl_min");
    }

    #[test]
    fn table_keeps_insertion_order_and_rejects_duplicates() {
        let mut table = LieTable::new();
        assert!(table.insert(vec![1.0, 2.0], 0.0, EntryState::Lie));
        assert!(table.insert(vec![0.0, 0.0], 0.0, EntryState::Lie));
        assert!(!table.insert(vec![-0.0, 0.0], 3.0, EntryState::Observed));
        assert_eq!(table.len(), 2);

        assert!(table.update(&[1.0, 2.0], 4.0, EntryState::Observed));
        assert!(!table.update(&[9.0, 9.0], 4.0, EntryState::Observed));

        let (points, values) = table.points_and_values();
        assert_eq!(points, vec![vec![1.0, 2.0], vec![0.0, 0.0]]);
        assert_eq!(values, vec![4.0, 0.0]);
        assert_eq!(table.count(EntryState::Lie), 1);
    }

    #[test]
    fn only_true_observations_count() {
        let mut table = LieTable::new();
        table.insert(vec![1.0], 2.0, EntryState::Observed);
        table.insert(vec![2.0], 9.0, EntryState::Lie);
        table.insert(vec![3.0], 7.0, EntryState::Failed);
        assert_eq!(table.observed_values(), vec![2.0]);
        assert_eq!(table.max_observed(), Some(2.0));
    }
}
