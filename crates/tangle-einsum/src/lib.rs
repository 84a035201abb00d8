//! Einsum engine for labeled dense tensors.
//!
//! The pipeline is: map string index labels onto a bounded symbol alphabet
//! ([`Expression`]), plan a pairwise contraction order for the operand
//! shapes ([`optimize_greedy`]), then execute the plan step by step with
//! GEMM ([`contract_pair`]). Plans are cacheable in a shared [`PathCache`]
//! keyed by expression and shapes.

mod cache;
mod error;
mod expr;
mod optimizer;
mod pair;

pub use cache::PathCache;
pub use error::EinsumError;
pub use expr::{symbol_for, Expression, SYMBOL_CAPACITY};
pub use optimizer::{optimize_greedy, symbol_dims, ContractionPath, PathStep};
pub use pair::{contract_pair, sum_axes, GemmScalar};

use mdarray::{DynRank, Shape, Tensor};

fn dims_of<T>(t: &Tensor<T, DynRank>) -> Vec<usize> {
    t.shape().with_dims(|d| d.to_vec())
}

/// Execute a precomputed path over the operands.
///
/// The result's axes follow `expr.output()` exactly.
pub fn execute<T: GemmScalar>(
    expr: &Expression,
    path: &ContractionPath,
    operands: Vec<Tensor<T, DynRank>>,
) -> Result<Tensor<T, DynRank>, EinsumError> {
    let shapes: Vec<Vec<usize>> = operands.iter().map(dims_of).collect();
    // Validates operand count, ranks and per-symbol dimensions.
    optimizer::symbol_dims(expr, &shapes)?;

    let mut work: Vec<(Vec<char>, Tensor<T, DynRank>)> = expr
        .inputs()
        .iter()
        .cloned()
        .zip(operands)
        .collect();

    for step in &path.steps {
        let (rs, rt) = work.remove(step.right);
        let (ls, lt) = work.remove(step.left);
        let out = contract_pair(&lt, &ls, &rt, &rs, &step.output);
        work.push((step.output.clone(), out));
    }

    // A single remaining operand may still carry axes to sum out (paths over
    // one operand have no steps) and is permuted into output order.
    let (syms, tensor) = work.pop().expect("execution leaves one operand");
    debug_assert!(work.is_empty());
    let drop: Vec<char> = syms
        .iter()
        .filter(|s| !expr.output().contains(s))
        .copied()
        .collect();
    if drop.is_empty() && syms == expr.output() {
        return Ok(tensor);
    }
    Ok(contract_pair(
        &tensor,
        &syms,
        &Tensor::from(vec![T::one()]).into_shape(DynRank::from_dims(&[])),
        &[],
        expr.output(),
    ))
}

/// One-shot contraction: build the expression, plan (through `cache` when
/// given), execute.
///
/// Returns the result tensor and its index labels in output order.
pub fn einsum<T: GemmScalar>(
    inputs: &[Vec<String>],
    output: Option<&[String]>,
    operands: Vec<Tensor<T, DynRank>>,
    cache: Option<&PathCache>,
) -> Result<(Tensor<T, DynRank>, Vec<String>), EinsumError> {
    let (expr, out_labels) = Expression::build(inputs, output)?;
    let shapes: Vec<Vec<usize>> = operands.iter().map(dims_of).collect();
    let path = match cache {
        Some(cache) => {
            cache.get_or_compute(expr.key(), &shapes, || optimize_greedy(&expr, &shapes))?
        }
        None => std::sync::Arc::new(optimize_greedy(&expr, &shapes)?),
    };
    let result = execute(&expr, &path, operands)?;
    Ok((result, out_labels))
}
