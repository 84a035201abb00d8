//! Tensor networks as matrix-free linear operators.
//!
//! A [`TnLinearOperator`] views a group of tensors as a matrix between two
//! index groups: `upper` (rows) and `lower` (columns). Applying it contracts
//! a block of vectors into the network, so the dense matrix is never formed.
//! Through [`MatFree`] this feeds the randomized SVD directly.

use mdarray::DTensor;
use num_complex::Complex64;

use tangle_einsum::PathCache;

use crate::contract::contract_tensors;
use crate::error::DecompError;
use crate::idgen;
use crate::linalg::MatFree;
use crate::storage::{DenseStorage, Element, Storage};
use crate::tags::TagSet;
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct TnLinearOperator {
    tensors: Vec<Tensor>,
    upper: Vec<String>,
    lower: Vec<String>,
    upper_dims: Vec<usize>,
    lower_dims: Vec<usize>,
    /// Tolerated imaginary residue when a real-typed caller applies an
    /// operator whose arithmetic was promoted to complex.
    imag_tol: f64,
    cache: PathCache,
}

impl TnLinearOperator {
    /// Wrap `tensors` as an operator from the `lower` to the `upper` index
    /// group. Both groups must consist of indices appearing exactly once in
    /// the group of tensors, and together they must cover all such indices.
    pub fn new(
        tensors: Vec<Tensor>,
        upper: Vec<String>,
        lower: Vec<String>,
    ) -> Result<Self, DecompError> {
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for t in &tensors {
            for l in t.inds() {
                *counts.entry(l.as_str()).or_insert(0) += 1;
            }
        }
        let group_dims = |group: &[String]| -> Result<Vec<usize>, DecompError> {
            group
                .iter()
                .map(|label| {
                    match counts.get(label.as_str()) {
                        None => Err(DecompError::UnknownIndex {
                            label: label.clone(),
                        }),
                        Some(&c) if c != 1 => Err(DecompError::OperatorApply(format!(
                            "index '{label}' is an internal bond, not an open index"
                        ))),
                        Some(_) => tensors
                            .iter()
                            .find_map(|t| t.ind_size(label).ok())
                            .ok_or_else(|| DecompError::UnknownIndex {
                                label: label.clone(),
                            }),
                    }
                })
                .collect()
        };
        let upper_dims = group_dims(&upper)?;
        let lower_dims = group_dims(&lower)?;

        for (&label, &count) in &counts {
            let open = count == 1;
            let covered =
                upper.iter().any(|l| l == label) || lower.iter().any(|l| l == label);
            if open && !covered {
                return Err(DecompError::OperatorApply(format!(
                    "open index '{label}' belongs to neither the upper nor the lower group"
                )));
            }
        }

        Ok(Self {
            tensors,
            upper,
            lower,
            upper_dims,
            lower_dims,
            imag_tol: 1e-12,
            cache: PathCache::default(),
        })
    }

    pub fn with_imag_tol(mut self, imag_tol: f64) -> Self {
        self.imag_tol = imag_tol;
        self
    }

    pub fn upper(&self) -> &[String] {
        &self.upper
    }

    pub fn lower(&self) -> &[String] {
        &self.lower
    }

    pub fn is_complex(&self) -> bool {
        self.tensors.iter().any(|t| t.is_complex())
    }

    pub fn nrows(&self) -> usize {
        self.upper_dims.iter().product()
    }

    pub fn ncols(&self) -> usize {
        self.lower_dims.iter().product()
    }

    /// Dimensions of the upper (rows) or lower (columns) index group.
    pub fn group_dims(&self, upper: bool) -> &[usize] {
        if upper {
            &self.upper_dims
        } else {
            &self.lower_dims
        }
    }

    /// Contract a block tensor carrying the source group plus `rhs` through
    /// the network (conjugated for the adjoint), keeping the target group
    /// plus `rhs`.
    fn apply_tensor(&self, x: Tensor, adjoint: bool, rhs: &str) -> Result<Tensor, DecompError> {
        let conjugated: Vec<Tensor>;
        let mut operands: Vec<&Tensor> = Vec::with_capacity(self.tensors.len() + 1);
        if adjoint {
            conjugated = self.tensors.iter().map(Tensor::conj).collect();
            operands.extend(conjugated.iter());
        } else {
            operands.extend(self.tensors.iter());
        }
        operands.push(&x);

        let target = if adjoint { &self.lower } else { &self.upper };
        let mut output: Vec<&str> = target.iter().map(String::as_str).collect();
        output.push(rhs);
        contract_tensors(&operands, Some(&output), Some(&self.cache)).map_err(DecompError::Einsum)
    }

    fn apply_block<T: Element>(
        &self,
        x: &DTensor<T, 2>,
        adjoint: bool,
    ) -> Result<DTensor<T, 2>, DecompError> {
        let (src_dims, dst_rows) = if adjoint {
            (&self.upper_dims, self.ncols())
        } else {
            (&self.lower_dims, self.nrows())
        };
        let src_rows: usize = src_dims.iter().product();
        if x.dim(0) != src_rows {
            return Err(DecompError::OperatorApply(format!(
                "block has {} rows, operator expects {src_rows}",
                x.dim(0)
            )));
        }
        let b = x.dim(1);
        let rhs = idgen::global().next_bond();

        // Row-major (rows, b) data is exactly the [src_dims..., b] tensor.
        let mut dims = src_dims.clone();
        dims.push(b);
        let mut data = Vec::with_capacity(src_rows * b);
        for i in 0..src_rows {
            for j in 0..b {
                data.push(x[[i, j]]);
            }
        }
        let mut inds: Vec<String> = if adjoint {
            self.upper.clone()
        } else {
            self.lower.clone()
        };
        inds.push(rhs.clone());
        let x_tensor = Tensor::new(
            T::wrap(DenseStorage::from_vec_with_shape(data, &dims)),
            inds,
            TagSet::new(),
        )
        .map_err(DecompError::Tensor)?;

        let out = self.apply_tensor(x_tensor, adjoint, &rhs)?;
        // A real caller gets real data back, within the imaginary tolerance.
        let storage = if T::COMPLEX {
            Storage::C64(out.storage().to_c64())
        } else {
            out.storage()
                .demote_real(self.imag_tol)
                .map_err(DecompError::Tensor)?
        };
        let dense = T::unwrap_ref(&storage).expect("storage dtype fixed above");
        let out_data = dense.as_slice();
        Ok(DTensor::<T, 2>::from_fn([dst_rows, b], |idx| {
            out_data[idx[0] * b + idx[1]]
        }))
    }
}

impl<T: Element> MatFree<T> for TnLinearOperator {
    fn nrows(&self) -> usize {
        TnLinearOperator::nrows(self)
    }

    fn ncols(&self) -> usize {
        TnLinearOperator::ncols(self)
    }

    fn apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError> {
        self.apply_block(x, false)
    }

    fn adjoint_apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError> {
        self.apply_block(x, true)
    }
}
