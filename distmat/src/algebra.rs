//! Distributed matrix algebra -- elementwise operations, products, and normalization on a keyed dataset.
//! Each row of the matrix is a vector in the dataset. The shapes of the operands are checked before
//! any pass over the data, and a mismatch is reported as [MatrixError::ShapeMismatch].
//! Local operands (scalars, vectors, matrices) are broadcast to the workers.
use crate::broadcast::broadcast;
use crate::dataset::{Element, KeyedDataset, Partitioned};
use crate::error::{MatrixError, Result};
use crate::reduction::{cross_sum, outer_sum, ReductionStrategy};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Axis along which statistics are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Statistics of each vector (axis 0).
    Row,
    /// Statistics of each column over all the vectors (axis 1).
    Column,
}

impl std::str::FromStr for Axis {
    type Err = MatrixError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "row" => Ok(Axis::Row),
            "1" | "column" => Ok(Axis::Column),
            _ => Err(MatrixError::InvalidParameter(format!(
                "axis must be 0 (row) or 1 (column), not {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ElementwiseOp {
    fn name(&self) -> &'static str {
        match self {
            ElementwiseOp::Add => "add",
            ElementwiseOp::Subtract => "subtract",
            ElementwiseOp::Multiply => "multiply",
            ElementwiseOp::Divide => "divide",
        }
    }
    fn apply(&self, x: &DVector<f64>, y: &DVector<f64>) -> DVector<f64> {
        match self {
            ElementwiseOp::Add => x + y,
            ElementwiseOp::Subtract => x - y,
            ElementwiseOp::Multiply => x.component_mul(y),
            ElementwiseOp::Divide => x.component_div(y),
        }
    }
    fn apply_scalar(&self, x: &DVector<f64>, y: f64) -> DVector<f64> {
        match self {
            ElementwiseOp::Add => x.add_scalar(y),
            ElementwiseOp::Subtract => x.add_scalar(-y),
            ElementwiseOp::Multiply => x * y,
            ElementwiseOp::Divide => x / y,
        }
    }
}

/// The right hand side of an elementwise operation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Distributed(&'a DistributedMatrix),
    Scalar(f64),
    Vector(&'a DVector<f64>),
}

#[derive(Debug, Clone)]
pub struct DistributedMatrix {
    data: KeyedDataset,
    strategy: ReductionStrategy,
}

impl DistributedMatrix {
    pub fn new(data: KeyedDataset) -> Self {
        Self::with_strategy(data, ReductionStrategy::default())
    }
    pub fn with_strategy(data: KeyedDataset, strategy: ReductionStrategy) -> Self {
        Self { data, strategy }
    }
    pub fn data(&self) -> &KeyedDataset {
        &self.data
    }
    pub fn into_data(self) -> KeyedDataset {
        self.data
    }
    pub fn strategy(&self) -> ReductionStrategy {
        self.strategy
    }
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }
    pub fn count(&self) -> usize {
        self.data.count()
    }
    pub fn dimension(&self) -> usize {
        self.data.dimension()
    }
    pub fn first(&self) -> Option<&Element> {
        self.data.first()
    }
    pub fn collect(&self) -> Vec<Element> {
        self.data.collect()
    }
    fn wrap(&self, data: KeyedDataset) -> Self {
        Self::with_strategy(data, self.strategy)
    }
    /// `Σ x xᵗ` over the rows, i.e., XᵗX.
    pub fn outer(&self) -> DMatrix<f64> {
        outer_sum(&self.data, self.strategy)
    }
    /// Covariance matrix. If `axis` is given, the rows are centered along it beforehand.
    pub fn covariance(&self, axis: Option<Axis>) -> DMatrix<f64> {
        let n = self.count().max(1) as f64;
        match axis {
            None => self.outer() / n,
            Some(axis) => self.center(axis).outer() / n,
        }
    }
    /// XᵗY, where Y is another distributed matrix with the same keys.
    pub fn times(&self, other: &DistributedMatrix) -> Result<DMatrix<f64>> {
        if self.count() != other.count() {
            return Err(self.mismatch("multiply", other.shape()));
        }
        let joined = self.data.join(&other.data);
        if joined.count() != self.count() {
            return Err(self.mismatch("join", other.shape()));
        }
        Ok(cross_sum(&joined, self.strategy))
    }
    /// XM, where M is a local `d x c` matrix. Returns a `n x c` distributed matrix.
    pub fn times_local(&self, other: &DMatrix<f64>) -> Result<Self> {
        if other.nrows() != self.dimension() {
            return Err(self.mismatch("multiply", other.shape()));
        }
        let cols = other.ncols();
        let other = broadcast(other.clone());
        let data = self.data.map_values_with_to(cols, &other, |m, x| m.tr_mul(x));
        Ok(self.wrap(data))
    }
    /// Xv, where v is a local vector of length `d`. Returns a `n x 1` distributed matrix.
    pub fn times_vector(&self, other: &DVector<f64>) -> Result<Self> {
        if other.len() != self.dimension() {
            return Err(self.mismatch("multiply", (other.len(), 1)));
        }
        let other = broadcast(other.clone());
        let data = self
            .data
            .map_values_with_to(1, &other, |v, x| DVector::from_element(1, x.dot(v)));
        Ok(self.wrap(data))
    }
    pub fn times_scalar(&self, other: f64) -> Self {
        let data = self.data.map_values_to(self.dimension(), |x| x * other);
        self.wrap(data)
    }
    pub fn elementwise(&self, other: Operand, op: ElementwiseOp) -> Result<Self> {
        let d = self.dimension();
        match other {
            Operand::Distributed(other) => {
                if self.shape() != other.shape() {
                    return Err(self.mismatch(op.name(), other.shape()));
                }
                let joined = self.data.join(&other.data);
                if joined.count() != self.count() {
                    return Err(self.mismatch("join", other.shape()));
                }
                Ok(self.wrap(joined.map_pairs(d, |x, y| op.apply(x, y))))
            }
            Operand::Scalar(y) => Ok(self.wrap(self.data.map_values_to(d, |x| op.apply_scalar(x, y)))),
            Operand::Vector(y) => {
                if y.len() != d {
                    return Err(self.mismatch(op.name(), (1, y.len())));
                }
                let y = broadcast(y.clone());
                Ok(self.wrap(self.data.map_values_with_to(d, &y, |y, x| op.apply(x, y))))
            }
        }
    }
    pub fn plus(&self, other: Operand) -> Result<Self> {
        self.elementwise(other, ElementwiseOp::Add)
    }
    pub fn minus(&self, other: Operand) -> Result<Self> {
        self.elementwise(other, ElementwiseOp::Subtract)
    }
    pub fn dot_times(&self, other: Operand) -> Result<Self> {
        self.elementwise(other, ElementwiseOp::Multiply)
    }
    pub fn dot_divide(&self, other: Operand) -> Result<Self> {
        self.elementwise(other, ElementwiseOp::Divide)
    }
    /// Subtract the mean of each row, or the mean vector of the columns.
    pub fn center(&self, axis: Axis) -> Self {
        let d = self.dimension();
        match axis {
            Axis::Row => self.wrap(self.data.map_values_to(d, |x| x.add_scalar(-x.mean()))),
            Axis::Column => {
                let mean = broadcast(self.data.mean());
                self.wrap(self.data.map_values_with_to(d, &mean, |mean, x| x - mean))
            }
        }
    }
    /// Center, then divide by the standard deviation of each row, or of each column.
    pub fn zscore(&self, axis: Axis) -> Self {
        let d = self.dimension();
        match axis {
            Axis::Row => {
                let constant = self.constant_rows();
                if 0 < constant {
                    warn!("ZSCORE\t{} rows have zero variance.", constant);
                }
                self.wrap(self.data.map_values_to(d, |x| {
                    let centered = x.add_scalar(-x.mean());
                    let std = (centered.norm_squared() / x.len() as f64).sqrt();
                    centered / std
                }))
            }
            Axis::Column => {
                let (mean, std) = (self.data.mean(), self.data.std());
                let constant = std.iter().filter(|&&s| s == 0f64).count();
                if 0 < constant {
                    warn!("ZSCORE\t{} columns have zero variance.", constant);
                }
                let params = broadcast((mean, std));
                self.wrap(self.data.map_values_with_to(d, &params, |(mean, std), x| {
                    (x - mean).component_div(std)
                }))
            }
        }
    }
    /// Number of rows whose entries are all the same.
    pub(crate) fn constant_rows(&self) -> usize {
        self.data.reduce_by_partition(
            || 0,
            |acc, (_, x)| match x.max() == x.min() {
                true => acc + 1,
                false => acc,
            },
            |x, y| x + y,
        )
    }
    fn mismatch(&self, op: &'static str, right: (usize, usize)) -> MatrixError {
        MatrixError::ShapeMismatch {
            op,
            left: self.shape(),
            right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use definitions::{Key, Record};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;
    fn random_matrix(n: usize, d: usize, seed: u64) -> DistributedMatrix {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
        let records: Vec<_> = (0..n)
            .map(|i| {
                let values = (0..d).map(|_| rng.gen_range(0f64..10f64)).collect();
                Record::new(Key::Linear(i as u64), values)
            })
            .collect();
        DistributedMatrix::new(KeyedDataset::from_records(records, 4).unwrap())
    }
    fn local(matrix: &DistributedMatrix) -> DMatrix<f64> {
        let rows: Vec<_> = matrix.collect().into_iter().map(|(_, x)| x.transpose()).collect();
        DMatrix::from_rows(&rows)
    }
    #[test]
    fn mismatched_shapes() {
        let x = random_matrix(20, 5, 1);
        let y = random_matrix(20, 7, 2);
        for &op in &[
            ElementwiseOp::Add,
            ElementwiseOp::Subtract,
            ElementwiseOp::Multiply,
            ElementwiseOp::Divide,
        ] {
            match x.elementwise(Operand::Distributed(&y), op) {
                Err(MatrixError::ShapeMismatch { left, right, .. }) => {
                    assert_eq!((left, right), ((20, 5), (20, 7)))
                }
                res => panic!("{:?}", res),
            }
        }
        let v = DVector::zeros(7);
        assert!(x.plus(Operand::Vector(&v)).is_err());
        assert!(x.times_local(&DMatrix::zeros(7, 2)).is_err());
        assert!(x.times_vector(&v).is_err());
        assert!(x.times(&random_matrix(21, 5, 3)).is_err());
    }
    #[test]
    fn elementwise_values() {
        let x = random_matrix(30, 4, 10);
        let y = random_matrix(30, 4, 11);
        let (lx, ly) = (local(&x), local(&y));
        let sum = local(&x.plus(Operand::Distributed(&y)).unwrap());
        assert!((sum - (&lx + &ly)).abs().max() < 1e-10);
        let prod = local(&x.dot_times(Operand::Distributed(&y)).unwrap());
        assert!((prod - lx.component_mul(&ly)).abs().max() < 1e-10);
        let shifted = local(&x.minus(Operand::Scalar(1.5)).unwrap());
        assert!((shifted - lx.add_scalar(-1.5)).abs().max() < 1e-10);
        let v = DVector::from_vec(vec![1., 2., 4., 8.]);
        let divided = local(&x.dot_divide(Operand::Vector(&v)).unwrap());
        assert!((divided[(3, 2)] - lx[(3, 2)] / 4.).abs() < 1e-10);
    }
    #[test]
    fn products() {
        let x = random_matrix(40, 5, 20);
        let y = random_matrix(40, 3, 21);
        let (lx, ly) = (local(&x), local(&y));
        let xty = x.times(&y).unwrap();
        assert!((xty - lx.transpose() * &ly).abs().max() < 1e-8);
        let m = DMatrix::from_fn(5, 2, |i, j| (i + j) as f64);
        let xm = x.times_local(&m).unwrap();
        assert_eq!(xm.shape(), (40, 2));
        assert!((local(&xm) - &lx * &m).abs().max() < 1e-8);
        let v = DVector::from_element(5, 1f64);
        let xv = x.times_vector(&v).unwrap();
        assert_eq!(xv.shape(), (40, 1));
        assert!((local(&xv).column(0) - &lx * &v).abs().max() < 1e-8);
        let scaled = x.times_scalar(2.);
        assert!((local(&scaled) - &lx * 2.).abs().max() < 1e-10);
        let gram = x.outer();
        assert!((gram - lx.transpose() * &lx).abs().max() < 1e-8);
    }
    #[test]
    fn covariance_matches_brute_force() {
        let x = random_matrix(200, 6, 30);
        let lx = local(&x);
        let mean = lx.row_mean();
        let centered = DMatrix::from_fn(200, 6, |i, j| lx[(i, j)] - mean[j]);
        let expected = centered.transpose() * &centered / 200.;
        let cov = x.covariance(Some(Axis::Column));
        assert!((cov - expected).abs().max() < 1e-8);
        let raw = x.covariance(None);
        assert!((raw - lx.transpose() * &lx / 200.).abs().max() < 1e-8);
    }
    #[test]
    fn centering() {
        let x = random_matrix(100, 8, 40);
        let centered = x.center(Axis::Column);
        assert!(centered.data().mean().abs().max() < 1e-10);
        let centered = x.center(Axis::Row);
        assert!(centered.collect().iter().all(|(_, x)| x.mean().abs() < 1e-10));
    }
    #[test]
    fn zscoring() {
        let x = random_matrix(100, 8, 50);
        let z = x.zscore(Axis::Column);
        assert!(z.data().mean().abs().max() < 1e-10);
        assert!(z.data().std().iter().all(|s| (s - 1.).abs() < 1e-10));
        let z = x.zscore(Axis::Row);
        for (_, x) in z.collect() {
            assert!(x.mean().abs() < 1e-10);
            assert!((x.norm_squared() / 8. - 1.).abs() < 1e-10);
        }
    }
    #[test]
    fn zscore_constant_rows() {
        let records: Vec<_> = (0..6)
            .map(|i| {
                let values = match i % 3 {
                    0 => vec![2.; 4],
                    _ => (0..4).map(|j| (i * j) as f64).collect(),
                };
                Record::new(Key::Linear(i as u64), values)
            })
            .collect();
        let x = DistributedMatrix::new(KeyedDataset::from_records(records, 4).unwrap());
        assert_eq!(x.constant_rows(), 2);
        assert_eq!(random_matrix(30, 4, 60).constant_rows(), 0);
        let z = x.zscore(Axis::Row);
        for (key, x) in z.collect() {
            match key {
                Key::Linear(0) | Key::Linear(3) => assert!(x.iter().all(|x| x.is_nan())),
                _ => assert!(x.mean().abs() < 1e-10),
            }
        }
    }
    #[test]
    fn parse_axis() {
        assert_eq!("0".parse::<Axis>().unwrap(), Axis::Row);
        assert_eq!("column".parse::<Axis>().unwrap(), Axis::Column);
        assert!("2".parse::<Axis>().is_err());
    }
}
