//! Reduction protocol -- merge per-element contributions into one small matrix at the coordinator.
//!
//! Two strategies are available.
//! - [ReductionStrategy::FoldCombine]: each partition folds its elements into a local matrix,
//!   then the local matrices are summed pairwise. No state is shared between partitions.
//! - [ReductionStrategy::SharedAccumulator]: a single zero-initialized matrix is updated by every element.
//!   The matrix is guarded by a lock, and it is read once after the pass.
//!
//! Both return the same matrix up to the order of floating point additions.
use crate::broadcast::Broadcast;
use crate::dataset::{KeyedDataset, PairedDataset, Partitioned};
use crate::error::MatrixError;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReductionStrategy {
    #[serde(rename = "reduce", alias = "fold")]
    FoldCombine,
    #[serde(rename = "accum", alias = "shared")]
    SharedAccumulator,
}

impl std::default::Default for ReductionStrategy {
    fn default() -> Self {
        ReductionStrategy::FoldCombine
    }
}

impl std::str::FromStr for ReductionStrategy {
    type Err = MatrixError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reduce" | "fold" => Ok(ReductionStrategy::FoldCombine),
            "accum" | "shared" => Ok(ReductionStrategy::SharedAccumulator),
            _ => Err(MatrixError::InvalidReductionStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ReductionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReductionStrategy::FoldCombine => write!(f, "reduce"),
            ReductionStrategy::SharedAccumulator => write!(f, "accum"),
        }
    }
}

/// A matrix updated in place by many workers. Additions are commutative, so the order of updates does not matter.
#[derive(Debug)]
pub struct Accumulator {
    value: Mutex<DMatrix<f64>>,
}

impl Accumulator {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            value: Mutex::new(DMatrix::zeros(rows, cols)),
        }
    }
    pub fn update<F: FnOnce(&mut DMatrix<f64>)>(&self, f: F) {
        // A poisoned lock means a worker panicked during the pass. The pass fails as a whole anyway.
        let mut value = match self.value.lock() {
            Ok(value) => value,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut *value);
    }
    pub fn into_value(self) -> DMatrix<f64> {
        match self.value.into_inner() {
            Ok(value) => value,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Sum `contribution` over all the elements into a `rows x cols` matrix.
/// `contribution` should add (not overwrite) the element's term to the given matrix.
pub fn accumulate<P, F>(
    data: &P,
    (rows, cols): (usize, usize),
    strategy: ReductionStrategy,
    contribution: F,
) -> DMatrix<f64>
where
    P: Partitioned,
    F: Fn(&P::Item, &mut DMatrix<f64>) + Sync + Send,
{
    trace!("REDUCE\t{}\t{}\t{}\t{}", strategy, rows, cols, data.count());
    match strategy {
        ReductionStrategy::FoldCombine => data.reduce_by_partition(
            || DMatrix::zeros(rows, cols),
            |mut acc, item| {
                contribution(item, &mut acc);
                acc
            },
            |x, y| x + y,
        ),
        ReductionStrategy::SharedAccumulator => {
            let acc = Accumulator::zeros(rows, cols);
            data.partitions()
                .par_iter()
                .flat_map(|p| p.par_iter())
                .for_each(|item| acc.update(|value| contribution(item, value)));
            acc.into_value()
        }
    }
}

/// [accumulate] with a broadcast value handed to `contribution`.
pub fn accumulate_with<P, T, F>(
    data: &P,
    shape: (usize, usize),
    strategy: ReductionStrategy,
    handle: &Broadcast<T>,
    contribution: F,
) -> DMatrix<f64>
where
    P: Partitioned,
    T: Sync + Send,
    F: Fn(&T, &P::Item, &mut DMatrix<f64>) + Sync + Send,
{
    trace!("REDUCE\tBROADCAST\t{}", handle.id());
    accumulate(data, shape, strategy, |item, acc| {
        contribution(handle.value(), item, acc)
    })
}

/// Sum of outer products, `Σ x xᵗ`.
pub fn outer_sum(data: &KeyedDataset, strategy: ReductionStrategy) -> DMatrix<f64> {
    let d = data.dimension();
    accumulate(data, (d, d), strategy, |(_, x), acc| {
        acc.ger(1f64, x, x, 1f64)
    })
}

/// Sum of outer products of paired vectors, `Σ x yᵗ`.
pub fn cross_sum(data: &PairedDataset, strategy: ReductionStrategy) -> DMatrix<f64> {
    let (d1, d2) = data.dimensions();
    accumulate(data, (d1, d2), strategy, |(_, x, y), acc| {
        acc.ger(1f64, x, y, 1f64)
    })
}
