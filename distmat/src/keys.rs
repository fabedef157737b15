//! Conversion between subscript keys (x,y,z,...) and linear indices.
//! Both are 1-based, and the first coordinate changes fastest.
use crate::dataset::{KeyedDataset, Partitioned};
use crate::error::{MatrixError, Result};
use definitions::{Dimensions, Key};
use std::convert::TryFrom;

/// Linear index of `subscript` in a volume whose extents are `dims`.
pub fn subscript_to_linear(subscript: &[i64], dims: &[i64]) -> i64 {
    let mut stride = 1;
    let mut idx = subscript[0];
    for (&x, &dim) in subscript[1..].iter().zip(dims.iter()) {
        stride *= dim;
        idx += (x - 1) * stride;
    }
    idx
}

/// Inverse of [subscript_to_linear].
pub fn linear_to_subscript(idx: i64, dims: &[i64]) -> Vec<i64> {
    let mut stride = 1;
    dims.iter()
        .map(|&dim| {
            let ceil = (idx + stride - 1) / stride;
            stride *= dim;
            (ceil - 1).rem_euclid(dim) + 1
        })
        .collect()
}

impl KeyedDataset {
    /// Extents of the keys, computed by a reduction over the partitions.
    /// Returns `None` for an empty dataset.
    pub fn dimensions(&self) -> Option<Dimensions> {
        let arity = self.first()?.0.arity();
        let dims = self.reduce_by_partition(
            || Dimensions::empty(arity),
            |dims, (key, _)| dims.merge(&key.coords()),
            |x, y| x.merge_dims(&y),
        );
        Some(dims)
    }
    /// Convert coordinate keys into linear keys. `dims` is the maximum along each coordinate.
    /// Every coordinate should be in `1..=dims[i]`.
    pub fn to_linear_keys(&self, dims: &[i64]) -> Result<Self> {
        volume(dims)?;
        if dims.len() < 2 {
            return Ok(self.clone());
        }
        for (key, _) in self.iter() {
            let xs = match key {
                Key::Coords(xs) if xs.len() == dims.len() => xs,
                _ => {
                    return Err(MatrixError::InvalidParameter(format!(
                        "key {} does not have {} coordinates",
                        key,
                        dims.len()
                    )))
                }
            };
            if xs.iter().zip(dims).any(|(&x, &dim)| x < 1 || dim < x) {
                return Err(MatrixError::InvalidParameter(format!(
                    "key {} is out of the extents {:?}",
                    key, dims
                )));
            }
        }
        self.try_map_keys(|key| to_linear(key, dims))
    }
    /// Convert linear keys into coordinate keys. `dims` is the maximum along each coordinate.
    /// Every index should be in `1..=dims.iter().product()`.
    pub fn to_subscript_keys(&self, dims: &[i64]) -> Result<Self> {
        let size = volume(dims)?;
        if dims.len() < 2 {
            return Ok(self.clone());
        }
        for (key, _) in self.iter() {
            let in_range = match key {
                Key::Linear(idx) => i64::try_from(*idx).map_or(false, |idx| 1 <= idx && idx <= size),
                Key::Coords(_) => false,
            };
            if !in_range {
                return Err(MatrixError::InvalidParameter(format!(
                    "key {} is not a linear index in 1..={}",
                    key, size
                )));
            }
        }
        self.try_map_keys(|key| match key {
            Key::Linear(idx) => i64::try_from(*idx)
                .map(|idx| Key::Coords(linear_to_subscript(idx, dims)))
                .map_err(|_| MatrixError::InvalidParameter(format!("key {} overflows", key))),
            Key::Coords(xs) => Ok(Key::Coords(xs.clone())),
        })
    }
}

/// The number of cells in the volume. Each extent should be positive.
fn volume(dims: &[i64]) -> Result<i64> {
    if dims.iter().any(|&dim| dim < 1) {
        return Err(MatrixError::InvalidParameter(format!(
            "extents should be positive, not {:?}",
            dims
        )));
    }
    dims.iter()
        .try_fold(1i64, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| MatrixError::InvalidParameter(format!("extents {:?} overflow", dims)))
}

fn to_linear(key: &Key, dims: &[i64]) -> Result<Key> {
    let idx = subscript_to_linear(&key.coords(), dims);
    u64::try_from(idx)
        .map(Key::Linear)
        .map_err(|_| MatrixError::InvalidParameter(format!("key {} overflows", key)))
}
