//! Direct method: covariance by one reduction pass, then a local eigendecomposition.
use super::{finish, mean_subtracted, sorted_eigen, Convergence, Decomposer, Decomposition, SvdConfig};
use crate::dataset::{KeyedDataset, Partitioned};
use crate::error::Result;
use crate::reduction::outer_sum;

#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Decomposer for Direct {
    fn decompose(&self, data: &KeyedDataset, config: &SvdConfig) -> Result<Decomposition> {
        let data = match config.mean_subtract {
            true => mean_subtracted(data),
            false => data.clone(),
        };
        let (n, d) = data.shape();
        let k = config.k;
        let covariance = outer_sum(&data, config.strategy) / data.count() as f64;
        let total_variance = covariance.trace();
        let (eigenvalues, eigenvectors) = sorted_eigen(covariance);
        debug!("DIRECT\t{}\t{}\t{:.3}", n, d, total_variance);
        trace!("DIRECT\tEigenvalues\t{:?}", eigenvalues.as_slice());
        let eigenvalues = eigenvalues.rows(0, k).into_owned();
        let components = eigenvectors.columns(0, k).transpose();
        Ok(finish(
            &data,
            eigenvalues,
            components,
            total_variance,
            Convergence::Exact,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::{Decompose, Method};
    use crate::reduction::ReductionStrategy;
    use crate::synthetic::{largest_principal_sine, low_rank};
    #[test]
    fn recover_low_rank() {
        let sample = low_rank(1000, 100, 3, 0.01, 3492, 8).unwrap();
        let mut config = SvdConfig::new(3, Method::Direct);
        config.mean_subtract = false;
        let result = sample.data.svd(&config).unwrap();
        assert_eq!(result.status, Convergence::Exact);
        assert_eq!(result.components.shape(), (3, 100));
        assert_eq!(result.scores.shape(), (1000, 3));
        let latent = &result.singular_values;
        assert!(latent[0] > latent[1] && latent[1] > latent[2], "{}", latent);
        let sine = largest_principal_sine(&result.components, &sample.basis);
        assert!(sine < 0.01, "{}", sine);
        // Reconstruction error should be the noise level.
        let original: std::collections::HashMap<_, _> = sample.data.iter().cloned().collect();
        let (mut sq_err, mut max_err) = (0f64, 0f64);
        for (key, x) in result.reconstruct().iter() {
            let diff = x - &original[key];
            sq_err += diff.norm_squared();
            max_err = max_err.max(diff.abs().max());
        }
        let rmse = (sq_err / (1000 * 100) as f64).sqrt();
        assert!(rmse < 0.015, "{}", rmse);
        assert!(max_err < 0.1, "{}", max_err);
    }
    #[test]
    fn recover_rank_below_k() {
        let sample = low_rank(600, 30, 2, 0.01, 78, 6).unwrap();
        let mut config = SvdConfig::new(4, Method::Direct);
        config.mean_subtract = false;
        let result = sample.data.svd(&config).unwrap();
        assert_eq!(result.components.shape(), (4, 30));
        let latent = &result.singular_values;
        assert!(latent[1] > 10. * latent[2], "{}", latent);
        let sine = largest_principal_sine(&result.components, &sample.basis);
        assert!(sine < 0.01, "{}", sine);
    }
    #[test]
    fn scores_are_orthonormal() {
        let sample = low_rank(500, 20, 3, 0.05, 11, 5).unwrap();
        let config = SvdConfig::new(3, Method::Direct);
        let result = sample.data.svd(&config).unwrap();
        let gram = crate::reduction::outer_sum(&result.scores, ReductionStrategy::FoldCombine);
        let diff = gram - nalgebra::DMatrix::<f64>::identity(3, 3);
        assert!(diff.abs().max() < 1e-8, "{}", diff);
    }
    #[test]
    fn strategies_agree() {
        let sample = low_rank(300, 15, 2, 0.1, 7, 6).unwrap();
        let mut config = SvdConfig::new(4, Method::Direct);
        let fold = sample.data.svd(&config).unwrap();
        config.strategy = ReductionStrategy::SharedAccumulator;
        let shared = sample.data.repartition(13).svd(&config).unwrap();
        let diff = (&fold.singular_values - &shared.singular_values).abs().max();
        assert!(diff < 1e-8, "{}", diff);
    }
}
