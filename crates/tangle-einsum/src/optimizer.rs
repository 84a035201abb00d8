//! Greedy pairwise contraction-path optimization.
//!
//! At every step the pair of operands whose contraction most reduces (or
//! least grows) the total size of live intermediates is picked. Cubic in the
//! operand count, which is fine at tensor-network operand counts; the
//! resulting path is cached by expression and shapes so the search runs once
//! per contraction structure.

use std::collections::HashMap;

use crate::error::EinsumError;
use crate::expr::Expression;

/// One pairwise contraction. `left` and `right` are positions in the live
/// operand list at the time the step runs; both are removed and the result
/// is pushed at the back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub left: usize,
    pub right: usize,
    /// Symbols of the intermediate, restricted to those still needed by a
    /// later operand or by the final output.
    pub output: Vec<char>,
}

/// A complete pairwise contraction plan for one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionPath {
    pub steps: Vec<PathStep>,
}

/// Map every symbol to its dimension, rejecting rank and dimension
/// inconsistencies between the expression and the shapes.
pub fn symbol_dims(
    expr: &Expression,
    shapes: &[Vec<usize>],
) -> Result<HashMap<char, usize>, EinsumError> {
    if shapes.len() != expr.inputs().len() {
        return Err(EinsumError::OperandCountMismatch {
            expected: expr.inputs().len(),
            got: shapes.len(),
        });
    }
    let mut dims: HashMap<char, usize> = HashMap::new();
    for (i, (syms, shape)) in expr.inputs().iter().zip(shapes).enumerate() {
        if syms.len() != shape.len() {
            return Err(EinsumError::RankMismatch {
                operand: i,
                rank: shape.len(),
                labels: syms.len(),
            });
        }
        for (&sym, &d) in syms.iter().zip(shape) {
            match dims.insert(sym, d) {
                Some(prev) if prev != d => {
                    return Err(EinsumError::DimensionMismatch {
                        label: sym.to_string(),
                        d1: prev,
                        d2: d,
                    });
                }
                _ => {}
            }
        }
    }
    Ok(dims)
}

/// Plan a pairwise contraction order for `expr` over operands with the given
/// shapes.
pub fn optimize_greedy(
    expr: &Expression,
    shapes: &[Vec<usize>],
) -> Result<ContractionPath, EinsumError> {
    let dims = symbol_dims(expr, shapes)?;
    let size = |syms: &[char]| -> f64 { syms.iter().map(|s| dims[s] as f64).product() };

    let mut operands: Vec<Vec<char>> = expr.inputs().to_vec();
    let mut steps = Vec::new();

    while operands.len() > 1 {
        let mut best: Option<(f64, usize, usize, Vec<char>)> = None;
        for i in 0..operands.len() {
            for j in (i + 1)..operands.len() {
                let out = step_output(&operands, i, j, expr.output());
                let cost = size(&out) - size(&operands[i]) - size(&operands[j]);
                let better = match &best {
                    None => true,
                    Some((c, ..)) => cost < *c,
                };
                if better {
                    best = Some((cost, i, j, out));
                }
            }
        }
        let (_, i, j, out) = best.expect("at least two operands remain");
        operands.remove(j);
        operands.remove(i);
        operands.push(out.clone());
        steps.push(PathStep {
            left: i,
            right: j,
            output: out,
        });
    }

    Ok(ContractionPath { steps })
}

/// Symbols the contraction of operands `i` and `j` must keep: those still
/// present in another operand or in the final output, ordered by first
/// occurrence in the pair.
fn step_output(operands: &[Vec<char>], i: usize, j: usize, final_output: &[char]) -> Vec<char> {
    let mut out = Vec::new();
    for &sym in operands[i].iter().chain(operands[j].iter()) {
        if out.contains(&sym) {
            continue;
        }
        let needed_later = operands
            .iter()
            .enumerate()
            .any(|(k, op)| k != i && k != j && op.contains(&sym))
            || final_output.contains(&sym);
        if needed_later {
            out.push(sym);
        }
    }
    out
}
