//! Contraction of labeled tensors.
//!
//! Thin wrapper around the einsum engine: index labels go straight in as
//! einsum indices, mixed dtypes are promoted to complex, and the result
//! carries the union of the operands' tags.

use num_complex::Complex64;

use tangle_einsum::{einsum, EinsumError, PathCache};

use crate::storage::{DenseStorage, Storage};
use crate::tags::TagSet;
use crate::tensor::Tensor;

/// Tolerance for dropping the imaginary part of a scalar contraction
/// result, relative to `max(1, |re|)`.
pub const SCALAR_IMAG_TOL: f64 = 1e-12;

/// Demote a rank-0 complex result to real when its imaginary part is
/// negligible; anything larger stays complex.
fn realify_scalar(storage: Storage) -> Storage {
    if let Storage::C64(dense) = &storage {
        if let [z] = dense.as_slice() {
            let tol = SCALAR_IMAG_TOL * z.re.abs().max(1.0);
            if let Ok(real) = storage.demote_real(tol) {
                return real;
            }
        }
    }
    storage
}

/// Contract a group of tensors.
///
/// With `output = None` the result's indices are those appearing exactly
/// once, in first-occurrence order. A label appearing in more than two
/// tensors is an error. Pass a `cache` to reuse contraction paths across
/// calls with the same structure. A scalar result whose imaginary part is
/// below [`SCALAR_IMAG_TOL`] comes back real.
pub fn contract_tensors(
    tensors: &[&Tensor],
    output: Option<&[&str]>,
    cache: Option<&PathCache>,
) -> Result<Tensor, EinsumError> {
    let inputs: Vec<Vec<String>> = tensors.iter().map(|t| t.inds().to_vec()).collect();
    let output_owned: Option<Vec<String>> =
        output.map(|labels| labels.iter().map(|s| s.to_string()).collect());

    let mut tags = TagSet::new();
    for t in tensors {
        tags.extend_from(t.tags());
    }

    let complex = tensors.iter().any(|t| t.is_complex());
    let (storage, out_labels) = if complex {
        let operands: Vec<_> = tensors
            .iter()
            .map(|t| t.storage().to_c64().into_tensor())
            .collect();
        let (result, out_labels) =
            einsum::<Complex64>(&inputs, output_owned.as_deref(), operands, cache)?;
        (
            Storage::C64(DenseStorage::from_tensor(result)),
            out_labels,
        )
    } else {
        let operands: Vec<_> = tensors
            .iter()
            .map(|t| match t.storage() {
                Storage::F64(s) => s.clone().into_tensor(),
                Storage::C64(_) => unreachable!("checked all-real above"),
            })
            .collect();
        let (result, out_labels) =
            einsum::<f64>(&inputs, output_owned.as_deref(), operands, cache)?;
        (
            Storage::F64(DenseStorage::from_tensor(result)),
            out_labels,
        )
    };

    let storage = if out_labels.is_empty() {
        realify_scalar(storage)
    } else {
        storage
    };
    Ok(Tensor::new(storage, out_labels, tags).expect("einsum output labels are distinct"))
}

impl Tensor {
    /// Contract with one other tensor over their shared indices.
    pub fn contract_with(
        &self,
        other: &Tensor,
        cache: Option<&PathCache>,
    ) -> Result<Tensor, EinsumError> {
        contract_tensors(&[self, other], None, cache)
    }
}
