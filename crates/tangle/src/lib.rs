//! Labeled tensors, tensor networks and rank-revealing decompositions.
//!
//! Tensors carry a string label per axis and a set of tags; all operations
//! address axes by label, never by position. Contraction plans einsum paths
//! greedily and caches them; decompositions split tensors across index
//! bipartitions with truncation, and [`TnLinearOperator`] exposes a network
//! as a matrix-free operator for randomized factorizations.

pub mod compress;
pub mod contract;
pub mod decomp;
pub mod error;
pub mod idgen;
pub(crate) mod linalg;
pub mod linop;
pub mod network;
pub mod storage;
pub mod tags;
pub mod tensor;

pub use compress::compress_bond;
pub use contract::{contract_tensors, SCALAR_IMAG_TOL};
pub use decomp::{Absorb, CutoffMode, Split, SplitMethod, SplitOpts};
pub use error::{DecompError, EinsumError, NetworkError, TensorError};
pub use idgen::{IdGen, TensorId};
pub use linalg::MatFree;
pub use linop::TnLinearOperator;
pub use network::{Contracted, Structure, TagMode, TensorHandle, TensorNetwork};
pub use storage::{DenseStorage, Element, Scalar, Storage};
pub use tags::TagSet;
pub use tensor::{Tensor, TensorUpdate};

pub use tangle_einsum::PathCache;
