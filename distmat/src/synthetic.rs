//! Synthetic low-rank datasets and subspace comparison, for testing and benchmarking.
use crate::dataset::KeyedDataset;
use crate::error::{MatrixError, Result};
use definitions::{Key, Record};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use rand_xoshiro::Xoshiro256StarStar;

#[derive(Debug, Clone)]
pub struct LowRank {
    pub data: KeyedDataset,
    /// rank x d. Orthonormal rows spanning the signal.
    pub basis: DMatrix<f64>,
}

/// `n` vectors of length `d`, each a random combination of `rank` orthonormal basis vectors plus Gaussian noise with sd `noise`.
/// The standard deviation of the i-th coefficient is `5 * (rank - i)`, so the singular values are well separated.
pub fn low_rank(
    n: usize,
    d: usize,
    rank: usize,
    noise: f64,
    seed: u64,
    partitions: usize,
) -> Result<LowRank> {
    if rank == 0 || d < rank {
        return Err(MatrixError::InvalidParameter(format!(
            "rank should be in 1..={}, not {}",
            d, rank
        )));
    }
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
    let gaussian = DMatrix::<f64>::from_fn(d, rank, |_, _| StandardNormal.sample(&mut rng));
    let basis = gaussian.qr().q().transpose();
    let scales: Vec<f64> = (0..rank).map(|i| 5. * (rank - i) as f64).collect();
    let noise_dist = Normal::new(0f64, noise).ok().filter(|_| 0f64 < noise);
    let records: Vec<_> = (0..n)
        .map(|i| {
            let mut x = nalgebra::DVector::<f64>::zeros(d);
            for (row, scale) in basis.row_iter().zip(scales.iter()) {
                let coef: f64 = StandardNormal.sample(&mut rng);
                x += row.transpose() * (coef * scale);
            }
            if let Some(dist) = noise_dist.as_ref() {
                x.iter_mut().for_each(|x| *x += dist.sample(&mut rng));
            }
            Record::new(Key::Linear(i as u64), x.iter().copied().collect())
        })
        .collect();
    let data = KeyedDataset::from_records(records, partitions)?;
    Ok(LowRank { data, basis })
}

/// Sine of the largest principal angle between the span of `reference`'s rows and the span of `estimate`'s rows.
/// Zero if `reference` lies in the span of `estimate`.
pub fn largest_principal_sine(estimate: &DMatrix<f64>, reference: &DMatrix<f64>) -> f64 {
    let q_est = estimate.transpose().qr().q();
    let q_ref = reference.transpose().qr().q();
    let residual = &q_ref - &q_est * (q_est.transpose() * &q_ref);
    residual
        .column_iter()
        .map(|c| c.norm())
        .fold(0f64, |x, y| x.max(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn basis_is_orthonormal() {
        let sample = low_rank(10, 8, 3, 0.1, 1, 2).unwrap();
        let gram = &sample.basis * sample.basis.transpose();
        assert!((gram - DMatrix::<f64>::identity(3, 3)).abs().max() < 1e-10);
        assert_eq!(sample.data.shape(), (10, 8));
        assert!(low_rank(10, 8, 9, 0.1, 1, 2).is_err());
        assert!(low_rank(10, 8, 0, 0.1, 1, 2).is_err());
        assert_eq!(low_rank(0, 8, 3, 0.1, 1, 2).unwrap_err(), MatrixError::EmptyDataset);
    }
    #[test]
    fn principal_sine() {
        let x = DMatrix::from_row_slice(2, 3, &[1., 0., 0., 0., 1., 0.]);
        let y = DMatrix::from_row_slice(1, 3, &[1., 1., 0.]);
        assert!(largest_principal_sine(&x, &y) < 1e-10);
        let z = DMatrix::from_row_slice(1, 3, &[0., 0., 2.]);
        assert!((largest_principal_sine(&x, &z) - 1.).abs() < 1e-10);
    }
}
