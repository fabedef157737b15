//! Keyed vector dataset -- a partitioned collection of (key, vector) pairs.
//! Each partition is processed independently by a worker, and nothing is shared between partitions
//! except through the reduction protocol and broadcast handles.
//! Every transform returns a new dataset; a dataset is never modified in place.
use crate::broadcast::{broadcast, Broadcast};
use crate::error::{MatrixError, Result};
use definitions::{Key, Record};
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

pub type Element = (Key, DVector<f64>);

/// A collection split into partitions.
pub trait Partitioned: Sync {
    type Item: Sync;
    fn partitions(&self) -> &[Vec<Self::Item>];
    fn count(&self) -> usize;
    /// Fold each partition locally into one value, then merge the partial values.
    /// `merge` should be commutative and associative, so that the result does not depend on how the data is partitioned.
    fn reduce_by_partition<T, I, F, M>(&self, init: I, fold: F, merge: M) -> T
    where
        T: Send,
        I: Fn() -> T + Sync + Send,
        F: Fn(T, &Self::Item) -> T + Sync + Send,
        M: Fn(T, T) -> T + Sync + Send,
    {
        self.partitions()
            .par_iter()
            .map(|partition| partition.iter().fold(init(), &fold))
            .reduce(&init, merge)
    }
}

#[derive(Debug, Clone)]
pub struct KeyedDataset {
    partitions: Vec<Vec<Element>>,
    n: usize,
    d: usize,
}

impl Partitioned for KeyedDataset {
    type Item = Element;
    fn partitions(&self) -> &[Vec<Element>] {
        &self.partitions
    }
    fn count(&self) -> usize {
        self.n
    }
}

/// Check every vector has the same length, returning (n, d).
fn validate(partitions: &[Vec<Element>]) -> Result<(usize, usize)> {
    let d = match partitions.iter().flat_map(|p| p.iter()).next() {
        Some((_, x)) => x.len(),
        None => return Err(MatrixError::EmptyDataset),
    };
    let wrong = partitions
        .par_iter()
        .flat_map(|p| p.par_iter())
        .find_any(|(_, x)| x.len() != d);
    if let Some((key, x)) = wrong {
        return Err(MatrixError::InconsistentDimension {
            key: key.to_string(),
            expected: d,
            got: x.len(),
        });
    }
    let n = partitions.iter().map(|p| p.len()).sum();
    Ok((n, d))
}

fn split_into(elements: Vec<Element>, num_partitions: usize) -> Vec<Vec<Element>> {
    let num_partitions = num_partitions.max(1);
    let chunk = (elements.len() + num_partitions - 1) / num_partitions;
    let mut partitions: Vec<Vec<Element>> = Vec::with_capacity(num_partitions);
    let mut elements = elements.into_iter().peekable();
    while elements.peek().is_some() {
        partitions.push(elements.by_ref().take(chunk.max(1)).collect());
    }
    partitions
}

impl KeyedDataset {
    /// Create a dataset from records, split into `num_partitions` contiguous partitions.
    pub fn from_records(records: Vec<Record>, num_partitions: usize) -> Result<Self> {
        let elements: Vec<_> = records
            .into_iter()
            .map(|Record { key, values }| (key, DVector::from_vec(values)))
            .collect();
        Self::from_partitions(split_into(elements, num_partitions))
    }
    /// Create a dataset from partitions, computing `n` and `d` by a pass over the data.
    pub fn from_partitions(partitions: Vec<Vec<Element>>) -> Result<Self> {
        let (n, d) = validate(&partitions)?;
        Ok(Self { partitions, n, d })
    }
    /// Create a dataset with the shape supplied by the caller. The caller is responsible for its correctness.
    pub fn with_shape(partitions: Vec<Vec<Element>>, n: usize, d: usize) -> Self {
        debug_assert_eq!(partitions.iter().map(|p| p.len()).sum::<usize>(), n);
        Self { partitions, n, d }
    }
    pub fn dimension(&self) -> usize {
        self.d
    }
    pub fn shape(&self) -> (usize, usize) {
        (self.n, self.d)
    }
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.partitions.iter().flat_map(|p| p.iter())
    }
    pub fn first(&self) -> Option<&Element> {
        self.iter().next()
    }
    pub fn keys(&self) -> Vec<Key> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }
    /// Gather all the elements to the coordinator, sorted by their keys.
    pub fn collect(&self) -> Vec<Element> {
        let mut elements: Vec<_> = self.iter().cloned().collect();
        elements.sort_by(|x, y| x.0.cmp(&y.0));
        elements
    }
    pub fn to_records(&self) -> Vec<Record> {
        self.collect()
            .into_iter()
            .map(|(key, x)| Record::new(key, x.iter().copied().collect()))
            .collect()
    }
    /// The same elements in `num_partitions` partitions.
    pub fn repartition(&self, num_partitions: usize) -> Self {
        let elements: Vec<_> = self.iter().cloned().collect();
        let partitions = split_into(elements, num_partitions);
        Self::with_shape(partitions, self.n, self.d)
    }
    /// Apply `f` to each vector. `f` may change the length of the vectors, but it should be the same for all of them.
    pub fn map_values<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&DVector<f64>) -> DVector<f64> + Sync + Send,
    {
        let partitions: Vec<Vec<_>> = self
            .partitions
            .par_iter()
            .map(|p| p.iter().map(|(k, x)| (k.clone(), f(x))).collect())
            .collect();
        match validate(&partitions) {
            Ok((n, d)) => Ok(Self { partitions, n, d }),
            Err(MatrixError::EmptyDataset) => Ok(Self::with_shape(partitions, 0, self.d)),
            Err(why) => Err(why),
        }
    }
    /// Apply `f` to each vector, handing the broadcast value to `f` explicitly.
    pub fn map_values_with<T, F>(&self, handle: &Broadcast<T>, f: F) -> Result<Self>
    where
        T: Sync + Send,
        F: Fn(&T, &DVector<f64>) -> DVector<f64> + Sync + Send,
    {
        let mapped = self.map_values_with_to(self.d, handle, f);
        match validate(&mapped.partitions) {
            Ok((n, d)) => Ok(Self::with_shape(mapped.partitions, n, d)),
            Err(MatrixError::EmptyDataset) => Ok(mapped),
            Err(why) => Err(why),
        }
    }
    /// [KeyedDataset::map_values_with] with an output length known in advance.
    pub(crate) fn map_values_with_to<T, F>(&self, d: usize, handle: &Broadcast<T>, f: F) -> Self
    where
        T: Sync + Send,
        F: Fn(&T, &DVector<f64>) -> DVector<f64> + Sync + Send,
    {
        trace!("MAP\t{}\t{}", handle.id(), d);
        let partitions: Vec<Vec<_>> = self
            .partitions
            .par_iter()
            .map(|p| {
                let handle = handle.clone();
                p.iter()
                    .map(|(k, x)| (k.clone(), f(handle.value(), x)))
                    .collect()
            })
            .collect();
        Self::with_shape(partitions, self.n, d)
    }
    /// Map with an output length known in advance. Used internally when the shape is guaranteed.
    pub(crate) fn map_values_to<F>(&self, d: usize, f: F) -> Self
    where
        F: Fn(&DVector<f64>) -> DVector<f64> + Sync + Send,
    {
        let partitions: Vec<Vec<_>> = self
            .partitions
            .par_iter()
            .map(|p| p.iter().map(|(k, x)| (k.clone(), f(x))).collect())
            .collect();
        Self::with_shape(partitions, self.n, d)
    }
    pub(crate) fn try_map_keys<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&Key) -> Result<Key> + Sync + Send,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|p| {
                p.iter()
                    .map(|(k, x)| f(k).map(|k| (k, x.clone())))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<Vec<_>>>>()?;
        Ok(Self::with_shape(partitions, self.n, self.d))
    }
    /// The mean vector.
    pub fn mean(&self) -> DVector<f64> {
        let d = self.d;
        let sum = self.reduce_by_partition(
            || DVector::zeros(d),
            |acc, (_, x)| acc + x,
            |x, y| x + y,
        );
        sum / (self.n.max(1) as f64)
    }
    /// The (population) standard deviation of each column.
    pub fn std(&self) -> DVector<f64> {
        let d = self.d;
        let mean = broadcast(self.mean());
        let sq_sum = self
            .map_values_with_to(d, &mean, |mean, x| (x - mean).map(|x| x * x))
            .reduce_by_partition(|| DVector::zeros(d), |acc, (_, x)| acc + x, |x, y| x + y);
        (sq_sum / (self.n.max(1) as f64)).map(f64::sqrt)
    }
    /// Pair up the vectors having the same key. Keys found in only one side are dropped.
    pub fn join(&self, other: &KeyedDataset) -> PairedDataset {
        let index: HashMap<&Key, &DVector<f64>> = other.iter().map(|(k, x)| (k, x)).collect();
        let partitions: Vec<Vec<_>> = self
            .partitions
            .par_iter()
            .map(|p| {
                p.iter()
                    .filter_map(|(k, x)| index.get(k).map(|y| (k.clone(), x.clone(), (*y).clone())))
                    .collect()
            })
            .collect();
        let n = partitions.iter().map(|p: &Vec<_>| p.len()).sum();
        debug!("JOIN\t{}\t{}\t{}", self.n, other.n, n);
        PairedDataset {
            partitions,
            n,
            dims: (self.d, other.d),
        }
    }
    /// Average the vectors whose keys are in each group.
    /// An empty group gives the zero vector.
    pub fn query(&self, groups: &[HashSet<Key>]) -> Vec<DVector<f64>> {
        let d = self.d;
        groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let group = broadcast(group.clone());
                let (sum, count) = self.reduce_by_partition(
                    || (DVector::zeros(d), 0),
                    |(acc, count), (k, x)| match group.value().contains(k) {
                        true => (acc + x, count + 1),
                        false => (acc, count),
                    },
                    |(x, c), (y, e)| (x + y, c + e),
                );
                if count == 0 {
                    warn!("QUERY\t{}\tNo vector matched.", i);
                    sum
                } else {
                    sum / count as f64
                }
            })
            .collect()
    }
}

/// Result of a join: (key, left vector, right vector).
#[derive(Debug, Clone)]
pub struct PairedDataset {
    partitions: Vec<Vec<(Key, DVector<f64>, DVector<f64>)>>,
    n: usize,
    dims: (usize, usize),
}

impl Partitioned for PairedDataset {
    type Item = (Key, DVector<f64>, DVector<f64>);
    fn partitions(&self) -> &[Vec<Self::Item>] {
        &self.partitions
    }
    fn count(&self) -> usize {
        self.n
    }
}

impl PairedDataset {
    /// Lengths of the left and the right vectors.
    pub fn dimensions(&self) -> (usize, usize) {
        self.dims
    }
    pub fn map_pairs<F>(&self, d: usize, f: F) -> KeyedDataset
    where
        F: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + Sync + Send,
    {
        let partitions: Vec<Vec<_>> = self
            .partitions
            .par_iter()
            .map(|p| p.iter().map(|(k, x, y)| (k.clone(), f(x, y))).collect())
            .collect();
        KeyedDataset::with_shape(partitions, self.n, d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn records(n: usize, d: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let values = (0..d).map(|j| (i * d + j) as f64).collect();
                Record::new(Key::Linear(i as u64), values)
            })
            .collect()
    }
    #[test]
    fn construct() {
        let data = KeyedDataset::from_records(records(10, 3), 4).unwrap();
        assert_eq!(data.shape(), (10, 3));
        assert_eq!(data.num_partitions(), 4);
        assert_eq!(data.count(), 10);
        let data = KeyedDataset::from_records(records(3, 2), 10).unwrap();
        assert_eq!(data.count(), 3);
        assert!(data.num_partitions() <= 3);
    }
    #[test]
    fn inconsistent_length() {
        let mut rs = records(10, 3);
        rs[7].values.push(1f64);
        match KeyedDataset::from_records(rs, 3) {
            Err(MatrixError::InconsistentDimension { expected, got, .. }) => {
                assert_eq!((expected, got), (3, 4));
            }
            x => panic!("{:?}", x),
        }
        assert_eq!(
            KeyedDataset::from_records(vec![], 3).unwrap_err(),
            MatrixError::EmptyDataset
        );
    }
    #[test]
    fn map_values_changes_dimension() {
        let data = KeyedDataset::from_records(records(10, 3), 3).unwrap();
        let sums = data
            .map_values(|x| DVector::from_element(1, x.sum()))
            .unwrap();
        assert_eq!(sums.shape(), (10, 1));
        let (key, x) = &sums.collect()[2];
        assert_eq!(*key, Key::Linear(2));
        assert!((x[0] - (6. + 7. + 8.)).abs() < 0.0001);
        let ragged = data.map_values(|x| match x[0] < 10. {
            true => x.clone(),
            false => DVector::zeros(1),
        });
        assert!(ragged.is_err());
    }
    #[test]
    fn mean_and_std() {
        let data = KeyedDataset::from_records(records(4, 2), 3).unwrap();
        // columns: [0,2,4,6] and [1,3,5,7]
        let mean = data.mean();
        assert!((mean[0] - 3.).abs() < 0.0001);
        assert!((mean[1] - 4.).abs() < 0.0001);
        let std = data.std();
        assert!((std[0] - 5f64.sqrt()).abs() < 0.0001, "{}", std);
    }
    #[test]
    fn map_with_broadcast() {
        let data = KeyedDataset::from_records(records(5, 3), 2).unwrap();
        let weights = broadcast(DVector::from_vec(vec![1., 0., 2.]));
        let weighted = data
            .map_values_with(&weights, |w, x| DVector::from_element(1, w.dot(x)))
            .unwrap();
        assert_eq!(weighted.shape(), (5, 1));
        let (key, x) = &weighted.collect()[1];
        assert_eq!(*key, Key::Linear(1));
        assert!((x[0] - (3. + 2. * 5.)).abs() < 0.0001);
        let ragged = data.map_values_with(&weights, |w, x| match x[0] < 3. {
            true => w.clone(),
            false => DVector::zeros(2),
        });
        assert!(ragged.is_err());
    }
    #[test]
    fn repartition_keeps_elements() {
        let data = KeyedDataset::from_records(records(17, 2), 2).unwrap();
        let other = data.repartition(5);
        assert_eq!(other.num_partitions(), 5);
        assert_eq!(data.collect(), other.collect());
    }
    #[test]
    fn join_by_key() {
        let left = KeyedDataset::from_records(records(10, 3), 3).unwrap();
        let right: Vec<_> = records(15, 2).into_iter().rev().collect();
        let right = KeyedDataset::from_records(right, 4).unwrap();
        let joined = left.join(&right);
        assert_eq!(joined.count(), 10);
        assert_eq!(joined.dimensions(), (3, 2));
        let ok = joined
            .partitions()
            .iter()
            .flat_map(|p| p.iter())
            .all(|(k, x, y)| match k {
                Key::Linear(i) => x[0] == (*i * 3) as f64 && y[0] == (*i * 2) as f64,
                _ => false,
            });
        assert!(ok);
        let disjoint: Vec<_> = (0..5)
            .map(|i| Record::new(Key::Coords(vec![i, i]), vec![1f64; 3]))
            .collect();
        let disjoint = KeyedDataset::from_records(disjoint, 2).unwrap();
        assert_eq!(left.join(&disjoint).count(), 0);
    }
    #[test]
    fn query_groups() {
        let data = KeyedDataset::from_records(records(6, 2), 3).unwrap();
        let groups = vec![
            [0, 2].iter().map(|&i| Key::Linear(i)).collect(),
            HashSet::new(),
        ];
        let means = data.query(&groups);
        assert!((means[0][0] - 2.).abs() < 0.0001);
        assert!((means[0][1] - 3.).abs() < 0.0001);
        assert_eq!(means[1], DVector::zeros(2));
    }
}
