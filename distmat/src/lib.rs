pub mod algebra;
pub mod broadcast;
pub mod dataset;
pub mod decomposition;
pub mod error;
pub mod keys;
pub mod preprocess;
pub mod reduction;
pub mod synthetic;
#[macro_use]
extern crate log;

pub use algebra::{Axis, DistributedMatrix, ElementwiseOp, Operand};
pub use broadcast::{broadcast, Broadcast};
pub use dataset::{KeyedDataset, PairedDataset, Partitioned};
pub use decomposition::{Decompose, Decomposition, Method, SvdConfig};
pub use error::{MatrixError, Result};
pub use preprocess::Preprocess;
pub use reduction::ReductionStrategy;
