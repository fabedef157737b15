//! Large-scale singular value decomposition of a keyed dataset.
//!
//! Both methods return the top `k` components (k x d), the singular values in descending order,
//! and the scores (n x k, distributed). The components are determined only up to sign (and rotation,
//! when singular values coincide).
//! - [Method::Direct] sums the outer products in one pass and decomposes the d x d covariance locally.
//!   It needs d x d to fit in memory.
//! - [Method::Em] estimates the subspace by expectation-maximization, only keeping k x d matrices locally.
use crate::broadcast::broadcast;
use crate::dataset::{KeyedDataset, Partitioned};
use crate::error::{MatrixError, Result};
use crate::reduction::ReductionStrategy;
use definitions::{DecompositionRecord, Record};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
pub mod direct;
pub mod em;

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_TOLERANCE: f64 = 0.00001;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Direct,
    Em,
}

impl std::str::FromStr for Method {
    type Err = MatrixError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Method::Direct),
            "em" => Ok(Method::Em),
            _ => Err(MatrixError::InvalidParameter(format!(
                "method must be direct or em, not {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Method::Direct => write!(f, "direct"),
            Method::Em => write!(f, "em"),
        }
    }
}

impl Method {
    pub fn decomposer(&self) -> Box<dyn Decomposer> {
        match self {
            Method::Direct => Box::new(direct::Direct),
            Method::Em => Box::new(em::ExpectationMaximization),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvdConfig {
    /// Number of components.
    pub k: usize,
    pub method: Method,
    /// If true, subtract the mean of each vector beforehand.
    pub mean_subtract: bool,
    /// Iteration limit of the EM method.
    pub max_iterations: usize,
    /// The EM method stops when the squared change of the loading matrix falls below this value.
    pub tolerance: f64,
    /// Seed of the initial loading matrix of the EM method.
    pub seed: u64,
    pub strategy: ReductionStrategy,
}

impl SvdConfig {
    pub fn new(k: usize, method: Method) -> Self {
        Self {
            k,
            method,
            mean_subtract: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
            strategy: ReductionStrategy::default(),
        }
    }
    pub fn validate(&self, data: &KeyedDataset) -> Result<()> {
        let (n, d) = data.shape();
        if n == 0 {
            return Err(MatrixError::EmptyDataset);
        }
        if self.k == 0 {
            return Err(MatrixError::InvalidParameter(
                "k should be positive".to_string(),
            ));
        }
        if d < self.k {
            return Err(MatrixError::InvalidParameter(format!(
                "k({}) exceeds the dimension of the vectors({})",
                self.k, d
            )));
        }
        if !(0f64 <= self.tolerance) {
            return Err(MatrixError::InvalidParameter(format!(
                "tolerance should be non-negative, not {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// How the decomposition finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Convergence {
    /// Non-iterative method.
    Exact,
    Converged { iterations: usize, error: f64 },
    /// The iteration limit was reached before the tolerance. The last estimate is returned.
    MaxIterations { iterations: usize, error: f64 },
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        !matches!(self, Convergence::MaxIterations { .. })
    }
    pub fn iterations(&self) -> usize {
        match *self {
            Convergence::Exact => 0,
            Convergence::Converged { iterations, .. } => iterations,
            Convergence::MaxIterations { iterations, .. } => iterations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decomposition {
    /// n x k. `inner(x, components) / singular_values` for each vector.
    pub scores: KeyedDataset,
    /// Descending.
    pub singular_values: DVector<f64>,
    /// k x d. Each row is a unit vector.
    pub components: DMatrix<f64>,
    /// Fraction of the total variance explained by each component.
    pub explained_variance: DVector<f64>,
    pub status: Convergence,
}

impl Decomposition {
    /// Map the scores back into the original space. This is the projection of the data onto the components.
    pub fn reconstruct(&self) -> KeyedDataset {
        let d = self.components.ncols();
        let params = broadcast((self.components.clone(), self.singular_values.clone()));
        self.scores
            .map_values_with_to(d, &params, |(components, latent), s| {
                components.tr_mul(&s.component_mul(latent))
            })
    }
    pub fn to_record(&self, method: Method) -> DecompositionRecord {
        let components = self
            .components
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        let scores: Vec<Record> = self.scores.to_records();
        DecompositionRecord {
            method: method.to_string(),
            converged: self.status.is_converged(),
            iterations: self.status.iterations(),
            latent: self.singular_values.iter().copied().collect(),
            explained_variance: self.explained_variance.iter().copied().collect(),
            components,
            scores,
        }
    }
}

/// One implementation per [Method].
pub trait Decomposer {
    fn decompose(&self, data: &KeyedDataset, config: &SvdConfig) -> Result<Decomposition>;
}

pub trait Decompose {
    fn svd(&self, config: &SvdConfig) -> Result<Decomposition>;
}

impl Decompose for KeyedDataset {
    fn svd(&self, config: &SvdConfig) -> Result<Decomposition> {
        config.validate(self)?;
        let decomposer = config.method.decomposer();
        debug!(
            "SVD\t{}\t{}\t{}\t{}",
            config.method,
            self.count(),
            self.dimension(),
            config.k
        );
        decomposer.decompose(self, config)
    }
}

/// Subtract each vector's own mean.
pub(crate) fn mean_subtracted(data: &KeyedDataset) -> KeyedDataset {
    data.map_values_to(data.dimension(), |x| x.add_scalar(-x.mean()))
}

/// Eigenvalues in descending order, and the corresponding eigenvectors as columns.
pub(crate) fn sorted_eigen(matrix: DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let eigen = matrix.symmetric_eigen();
    let len = eigen.eigenvalues.len();
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&i, &j| {
        let (x, y) = (eigen.eigenvalues[i], eigen.eigenvalues[j]);
        y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal)
    });
    let values = DVector::from_iterator(len, order.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = eigen.eigenvectors.select_columns(order.iter());
    (values, vectors)
}

/// Compute singular values, explained variances, and scores from the top-k eigenvalues of the covariance and the components.
pub(crate) fn finish(
    data: &KeyedDataset,
    eigenvalues: DVector<f64>,
    components: DMatrix<f64>,
    total_variance: f64,
    status: Convergence,
) -> Decomposition {
    let n = data.count() as f64;
    let k = eigenvalues.len();
    // Tiny negative eigenvalues come from rounding errors.
    let eigenvalues = eigenvalues.map(|x| x.max(0f64));
    let singular_values = eigenvalues.map(|x| x.sqrt() * n.sqrt());
    let explained_variance = match 0f64 < total_variance {
        true => &eigenvalues / total_variance,
        false => DVector::zeros(k),
    };
    if singular_values.iter().any(|&x| x == 0f64) {
        warn!("SVD\tSome singular values are zero. The corresponding scores are set to zero.");
    }
    let inverse = singular_values.map(|x| if 0f64 < x { x.recip() } else { 0f64 });
    let params = broadcast((components, inverse));
    let scores = data.map_values_with_to(k, &params, |(components, inverse), x| {
        (components * x).component_mul(inverse)
    });
    let (components, _) = params.value().clone();
    Decomposition {
        scores,
        singular_values,
        components,
        explained_variance,
        status,
    }
}
