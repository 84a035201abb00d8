//! Symbolized einsum expressions.
//!
//! Index labels are arbitrary strings at the tensor level. A contraction maps
//! them onto a bounded single-character alphabet in first-occurrence order,
//! which gives every structurally identical contraction the same expression
//! string regardless of the label names involved. That string, together with
//! the operand shapes, is the cache key for contraction paths.

use std::collections::HashMap;

use crate::error::EinsumError;

/// Number of single-character index symbols available in one expression.
pub const SYMBOL_CAPACITY: usize = 52;

/// Map a symbol ordinal to its character: `a..z` then `A..Z`.
pub fn symbol_for(index: usize) -> Option<char> {
    match index {
        0..=25 => Some((b'a' + index as u8) as char),
        26..=51 => Some((b'A' + (index - 26) as u8) as char),
        _ => None,
    }
}

/// A fully symbolized einsum expression: one symbol string per operand plus
/// an output symbol string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    inputs: Vec<Vec<char>>,
    output: Vec<char>,
    key: String,
}

impl Expression {
    /// Build an expression from per-operand index labels.
    ///
    /// When `output` is `None` the output indices are inferred: every label
    /// occurring exactly once, ordered by first occurrence. A label occurring
    /// more than twice is rejected; with an explicit output a label occurring
    /// twice may also appear in the output, which makes it a batch index.
    ///
    /// Returns the expression together with the output labels in output
    /// order.
    pub fn build(
        inputs: &[Vec<String>],
        output: Option<&[String]>,
    ) -> Result<(Self, Vec<String>), EinsumError> {
        if inputs.is_empty() {
            return Err(EinsumError::EmptyExpression);
        }

        // Symbols in first-occurrence order; occurrence counts for
        // output inference and repetition checks.
        let mut symbols: HashMap<&str, char> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();

        for labels in inputs {
            for (i, label) in labels.iter().enumerate() {
                if labels[..i].iter().any(|l| l == label) {
                    return Err(EinsumError::IndexRepeated {
                        label: label.clone(),
                        count: 2,
                    });
                }
                if !symbols.contains_key(label.as_str()) {
                    let sym = symbol_for(order.len()).ok_or(EinsumError::TooManyIndices {
                        count: count_distinct(inputs),
                        capacity: SYMBOL_CAPACITY,
                    })?;
                    symbols.insert(label.as_str(), sym);
                    order.push(label.as_str());
                }
                *counts.entry(label.as_str()).or_insert(0) += 1;
            }
        }

        for label in &order {
            let count = counts[label];
            if count > 2 {
                return Err(EinsumError::IndexRepeated {
                    label: (*label).to_string(),
                    count,
                });
            }
        }

        let output_labels: Vec<String> = match output {
            Some(out) => {
                for (i, label) in out.iter().enumerate() {
                    if !symbols.contains_key(label.as_str()) {
                        return Err(EinsumError::UnknownOutputIndex {
                            label: label.clone(),
                        });
                    }
                    if out[..i].contains(label) {
                        return Err(EinsumError::IndexRepeated {
                            label: label.clone(),
                            count: 2,
                        });
                    }
                }
                out.to_vec()
            }
            None => order
                .iter()
                .filter(|l| counts[*l] == 1)
                .map(|l| l.to_string())
                .collect(),
        };

        let input_syms: Vec<Vec<char>> = inputs
            .iter()
            .map(|labels| labels.iter().map(|l| symbols[l.as_str()]).collect())
            .collect();
        let output_syms: Vec<char> = output_labels
            .iter()
            .map(|l| symbols[l.as_str()])
            .collect();

        let mut key = String::new();
        for (i, syms) in input_syms.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.extend(syms.iter());
        }
        key.push_str("->");
        key.extend(output_syms.iter());

        Ok((
            Self {
                inputs: input_syms,
                output: output_syms,
                key,
            },
            output_labels,
        ))
    }

    /// Symbol strings of the operands.
    pub fn inputs(&self) -> &[Vec<char>] {
        &self.inputs
    }

    /// Symbol string of the output.
    pub fn output(&self) -> &[char] {
        &self.output
    }

    /// Canonical `"ab,bc->ac"` form, used as half of the path cache key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

fn count_distinct(inputs: &[Vec<String>]) -> usize {
    let mut seen: Vec<&str> = Vec::new();
    for labels in inputs {
        for label in labels {
            if !seen.contains(&label.as_str()) {
                seen.push(label);
            }
        }
    }
    seen.len()
}
