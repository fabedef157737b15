//! Definitions -- A tiny interface for distributed keyed-vector data.
//! We exchange data with loaders, savers, and other programs through the plain structures in this crate.
//! The heavy computation lives in the `distmat` crate; here we only have keys, records, and the result records written out by the CLI.

use serde::{Deserialize, Serialize};

/// The identifier of a vector. Either a tuple of (1-based) coordinates such as (x,y,z),
/// or a single linear index.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    Linear(u64),
    Coords(Vec<i64>),
}

impl Key {
    /// The number of coordinates. A linear key has exactly one.
    pub fn arity(&self) -> usize {
        match self {
            Key::Linear(_) => 1,
            Key::Coords(xs) => xs.len(),
        }
    }
    pub fn coords(&self) -> Vec<i64> {
        match self {
            Key::Linear(idx) => vec![*idx as i64],
            Key::Coords(xs) => xs.clone(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Key::Linear(idx) => write!(f, "{}", idx),
            Key::Coords(xs) => {
                let xs: Vec<_> = xs.iter().map(|x| format!("{}", x)).collect();
                write!(f, "{}", xs.join(" "))
            }
        }
    }
}

/// A keyed vector, e.g., the time series recorded at a voxel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub key: Key,
    pub values: Vec<f64>,
}

impl Record {
    pub fn new(key: Key, values: Vec<f64>) -> Self {
        Self { key, values }
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let values: Vec<_> = self.values.iter().map(|x| format!("{}", x)).collect();
        write!(f, "{} {}", self.key, values.join(" "))
    }
}

/// Parse a line formatted as `<k1> <k2> ... <t1> <t2> ...`, where the first `nkeys` fields are
/// the integer keys and the rest are values.
/// A single key is read as a linear index.
pub fn parse_record(line: &str, nkeys: usize) -> Result<Record, String> {
    let fields: Vec<_> = line.split_whitespace().collect();
    if fields.len() < nkeys {
        return Err(format!("{} fields, but {} keys required", fields.len(), nkeys));
    }
    // Keys are often written as floats (e.g., "3.0").
    let keys = fields[..nkeys]
        .iter()
        .map(|x| x.parse::<f64>().map(|x| x as i64))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|why| format!("{:?} in keys of `{}`", why, line))?;
    let values = fields[nkeys..]
        .iter()
        .map(|x| x.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|why| format!("{:?} in values of `{}`", why, line))?;
    let key = if keys.len() == 1 && 0 <= keys[0] {
        Key::Linear(keys[0] as u64)
    } else {
        Key::Coords(keys)
    };
    Ok(Record::new(key, values))
}

/// Extents of the coordinate keys. Keys are assumed to be contiguous, such as the indices of a dense volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimensions {
    pub min: Vec<i64>,
    pub max: Vec<i64>,
}

impl Dimensions {
    pub fn empty(arity: usize) -> Self {
        Self {
            min: vec![i64::MAX; arity],
            max: vec![i64::MIN; arity],
        }
    }
    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(self.max.iter()).any(|(x, y)| x > y)
    }
    pub fn merge(mut self, key: &[i64]) -> Self {
        for ((min, max), &x) in self.min.iter_mut().zip(self.max.iter_mut()).zip(key) {
            *min = (*min).min(x);
            *max = (*max).max(x);
        }
        self
    }
    pub fn merge_dims(mut self, other: &Self) -> Self {
        self.min
            .iter_mut()
            .zip(other.min.iter())
            .for_each(|(x, &y)| *x = (*x).min(y));
        self.max
            .iter_mut()
            .zip(other.max.iter())
            .for_each(|(x, &y)| *x = (*x).max(y));
        self
    }
    /// Number of distinct values along each coordinate.
    pub fn count(&self) -> Vec<i64> {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(min, max)| max - min + 1)
            .collect()
    }
}

/// The result of a decomposition, flattened for writing out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionRecord {
    pub method: String,
    pub converged: bool,
    pub iterations: usize,
    /// Singular values, in descending order.
    pub latent: Vec<f64>,
    /// Fraction of the total variance explained by each component.
    pub explained_variance: Vec<f64>,
    /// k x d, row-major.
    pub components: Vec<Vec<f64>>,
    pub scores: Vec<Record>,
}
