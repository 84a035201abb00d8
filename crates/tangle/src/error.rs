//! Error types, one enum per concern.

use thiserror::Error;

pub use tangle_einsum::EinsumError;

/// Errors from single-tensor operations.
#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor data has rank {rank} but {inds} index labels were given")]
    RankMismatch { rank: usize, inds: usize },

    #[error("tensor index labels contain duplicate '{label}'")]
    DuplicateIndex { label: String },

    #[error("tensor has no index '{label}'")]
    UnknownIndex { label: String },

    #[error("tensor data has {got} elements but the shape implies {expected}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("operands carry different index sets: {left:?} vs {right:?}")]
    IndexSetMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("reindexing would produce duplicate index '{label}'")]
    ReindexCollision { label: String },

    #[error("fuse groups must be disjoint; index '{label}' appears twice")]
    FuseOverlap { label: String },

    #[error("imaginary residual {imag:e} exceeds tolerance {tol:e} when converting to real")]
    ImagResidual { imag: f64, tol: f64 },

    #[error("operation needs a scalar (rank-0) tensor, got rank {rank}")]
    NotScalar { rank: usize },
}

/// Errors from matrix decompositions and tensor splitting.
#[derive(Debug, Error)]
pub enum DecompError {
    #[error("tensor has no index '{label}'")]
    UnknownIndex { label: String },

    #[error("split needs a non-empty group of indices on each side")]
    EmptySide,

    #[error("matrix has zero norm, no meaningful factorization exists")]
    ZeroNorm,

    #[error("partial decomposition needs a max_bond (requested rank)")]
    MaxBondRequired,

    #[error("linear-operator application failed: {0}")]
    OperatorApply(String),

    #[error("tensors share no bond index")]
    NoSharedBond,

    #[error(transparent)]
    Einsum(#[from] EinsumError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Errors from network-level operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network has no tensor with id {0}")]
    UnknownTensor(u64),

    #[error("no tensor matches tags [{tags}]")]
    NoMatch { tags: String },

    #[error("tags [{tags}] match {count} tensors where exactly one is required")]
    NotUnique { tags: String, count: usize },

    #[error("index '{label}' appears in {count} tensors; a bond joins exactly two")]
    HyperIndex { label: String, count: usize },

    #[error(
        "region boundary is [{boundary}], but a pass-through replacement needs exactly two \
         indices of equal dimension"
    )]
    BoundaryMismatch { boundary: String },

    #[error("network has no site structure; set one before structured contraction")]
    NoStructure,

    #[error("network is empty")]
    Empty,

    #[error(transparent)]
    Einsum(#[from] EinsumError),

    #[error(transparent)]
    Decomp(#[from] DecompError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
