//! EM method: iteratively update the k x d loading matrix C.
//! - E-step: x = (CCᵗ)⁻¹C y
//! - M-step: C = y xᵗ (x xᵗ)⁻¹
//!
//! Each iteration takes two reduction passes. Only k x d and k x k matrices are kept in the coordinator.
use super::{finish, mean_subtracted, sorted_eigen, Convergence, Decomposer, Decomposition, SvdConfig};
use crate::broadcast::broadcast;
use crate::dataset::{KeyedDataset, Partitioned};
use crate::error::{MatrixError, Result};
use crate::reduction::{accumulate_with, ReductionStrategy};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectationMaximization;

impl Decomposer for ExpectationMaximization {
    fn decompose(&self, data: &KeyedDataset, config: &SvdConfig) -> Result<Decomposition> {
        let data = match config.mean_subtract {
            true => mean_subtracted(data),
            false => data.clone(),
        };
        let (n, d) = data.shape();
        let k = config.k;
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(config.seed);
        let init = DMatrix::from_fn(k, d, |_, _| rng.gen::<f64>());
        let (loading, status) = estimate_subspace(&data, init, config)?;
        match status {
            Convergence::MaxIterations { iterations, error } => {
                warn!("EM\tNot converged\t{}\t{:.3e}", iterations, error)
            }
            _ => debug!("EM\tConverged\t{}", status.iterations()),
        }
        // Project onto an orthonormal basis of the subspace, then rotate it by the eigenvectors of the projected covariance.
        let orthonormal = loading.transpose().qr().q().transpose();
        let basis = broadcast(orthonormal);
        let covariance = accumulate_with(&data, (k, k), config.strategy, &basis, |basis, (_, x), acc| {
            let projected = basis * x;
            acc.ger(1f64, &projected, &projected, 1f64);
        }) / n as f64;
        let (eigenvalues, eigenvectors) = sorted_eigen(covariance);
        let components = eigenvectors.transpose() * basis.value();
        let total_variance = total_variance(&data);
        debug!("EM\t{}\t{}\t{:.3}", n, d, total_variance);
        Ok(finish(
            &data,
            eigenvalues,
            components,
            total_variance,
            status,
        ))
    }
}

/// Iterate E and M steps from `init` (k x d) until the squared change of C falls to `tolerance`,
/// or `max_iterations` is reached.
/// The shape of `init` is checked against `data` before any pass.
pub fn estimate_subspace(
    data: &KeyedDataset,
    init: DMatrix<f64>,
    config: &SvdConfig,
) -> Result<(DMatrix<f64>, Convergence)> {
    let (k, d) = init.shape();
    if d != data.dimension() {
        return Err(MatrixError::ShapeMismatch {
            op: "initialize the loading matrix with",
            left: data.shape(),
            right: (k, d),
        });
    }
    if k == 0 || d < k {
        return Err(MatrixError::InvalidParameter(format!(
            "the loading matrix should have 1 to {} rows, not {}",
            d, k
        )));
    }
    if data.count() == 0 {
        return Err(MatrixError::EmptyDataset);
    }
    let mut loading = init;
    let mut error = f64::INFINITY;
    let mut iteration = 0;
    while iteration < config.max_iterations && config.tolerance < error {
        let updated = em_step(data, &loading, config.strategy)?;
        error = (&updated - &loading).norm_squared();
        loading = updated;
        iteration += 1;
        debug!("EM\t{}\t{}\t{}\t{:.3e}", iteration, k, d, error);
    }
    let status = match error <= config.tolerance {
        true => Convergence::Converged {
            iterations: iteration,
            error,
        },
        false => Convergence::MaxIterations {
            iterations: iteration,
            error,
        },
    };
    Ok((loading, status))
}

fn em_step(
    data: &KeyedDataset,
    loading: &DMatrix<f64>,
    strategy: ReductionStrategy,
) -> Result<DMatrix<f64>> {
    let (k, d) = loading.shape();
    // Cᵗ(CCᵗ)⁻¹, so that the score of x is x·pinv.
    let gram_inv = (loading * loading.transpose())
        .try_inverse()
        .ok_or(MatrixError::SingularMatrix {
            what: "CCᵗ",
            size: k,
        })?;
    let pinv = broadcast(loading.transpose() * gram_inv);
    let scores_gram = accumulate_with(data, (k, k), strategy, &pinv, |pinv, (_, x), acc| {
        let score = pinv.tr_mul(x);
        acc.ger(1f64, &score, &score, 1f64);
    });
    let scores_gram_inv = scores_gram
        .try_inverse()
        .ok_or(MatrixError::SingularMatrix {
            what: "the Gram matrix of the scores",
            size: k,
        })?;
    let projector = broadcast(pinv.value() * scores_gram_inv);
    let updated = accumulate_with(data, (d, k), strategy, &projector, |projector, (_, x), acc| {
        let weight = projector.tr_mul(x);
        acc.ger(1f64, x, &weight, 1f64);
    });
    Ok(updated.transpose())
}

fn total_variance(data: &KeyedDataset) -> f64 {
    let sum = data.reduce_by_partition(
        || 0f64,
        |acc, (_, x)| acc + x.norm_squared(),
        |x, y| x + y,
    );
    sum / data.count() as f64
}
