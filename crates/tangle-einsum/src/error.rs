use thiserror::Error;

/// Errors produced while building or executing an einsum expression.
#[derive(Debug, Error)]
pub enum EinsumError {
    /// More distinct index labels than the single-expression symbol alphabet
    /// can name. The alphabet is bounded, not the engine: contract the
    /// network incrementally in smaller groups instead.
    #[error(
        "contraction uses {count} distinct indices but only {capacity} einsum symbols \
         are available; contract the network incrementally in smaller groups"
    )]
    TooManyIndices { count: usize, capacity: usize },

    /// An index label occurred more than twice across the operands, or twice
    /// within a single operand.
    #[error("index '{label}' appears {count} times; an index may appear at most twice, and at most once per operand")]
    IndexRepeated { label: String, count: usize },

    /// The same label carries two different dimensions.
    #[error("index '{label}' has conflicting dimensions {d1} and {d2}")]
    DimensionMismatch { label: String, d1: usize, d2: usize },

    /// A requested output index does not appear in any operand.
    #[error("output index '{label}' does not appear in any operand")]
    UnknownOutputIndex { label: String },

    /// An expression was built over zero operands.
    #[error("an einsum expression needs at least one operand")]
    EmptyExpression,

    /// Operand list handed to `execute` does not match the expression.
    #[error("expression names {expected} operands but {got} were supplied")]
    OperandCountMismatch { expected: usize, got: usize },

    /// An operand's rank disagrees with its index labels.
    #[error("operand {operand} has rank {rank} but {labels} index labels")]
    RankMismatch {
        operand: usize,
        rank: usize,
        labels: usize,
    },
}
