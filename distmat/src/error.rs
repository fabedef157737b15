use thiserror::Error;

/// Errors raised by the distributed matrix operations.
/// Shape and configuration errors are detected on the coordinator before any pass over the data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    #[error("cannot {op} shapes {left:?} and {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("{what} ({size} x {size}) is singular")]
    SingularMatrix { what: &'static str, size: usize },
    #[error("reduction strategy must be `reduce` or `accum`, not `{0}`")]
    InvalidReductionStrategy(String),
    #[error("vector of {key} has length {got}, expected {expected}")]
    InconsistentDimension {
        key: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("dataset is empty")]
    EmptyDataset,
}

pub type Result<T> = std::result::Result<T, MatrixError>;

impl From<MatrixError> for std::io::Error {
    fn from(why: MatrixError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, why)
    }
}
