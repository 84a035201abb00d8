//! Compressing the bond between two tensors.
//!
//! The standard reduced scheme: pull an orthogonal factor off each tensor
//! with QR/LQ so only the small bond-local pieces meet, truncate their
//! product with an SVD, and push the orthogonal factors back on. Neither
//! tensor's outer indices are ever merged into a dense matrix larger than
//! the bond environment.

use crate::decomp::{Absorb, SplitMethod, SplitOpts};
use crate::error::DecompError;
use crate::tensor::{Tensor, TensorUpdate};

/// Truncate the bond shared by `a` and `b` in place.
///
/// Multiple shared indices are merged into a single bond; a single shared
/// index keeps its label. Both tensors keep their own tags. Truncation
/// follows `opts`; a zero-norm bond environment is reported as
/// [`DecompError::ZeroNorm`] and leaves both tensors untouched.
pub fn compress_bond(a: &mut Tensor, b: &mut Tensor, opts: &SplitOpts) -> Result<(), DecompError> {
    let shared: Vec<String> = a
        .inds()
        .iter()
        .filter(|l| b.has_ind(l))
        .cloned()
        .collect();
    if shared.is_empty() {
        return Err(DecompError::NoSharedBond);
    }
    let a_left: Vec<&str> = a
        .inds()
        .iter()
        .filter(|l| !shared.contains(l))
        .map(String::as_str)
        .collect();
    let shared_refs: Vec<&str> = shared.iter().map(String::as_str).collect();

    // a = qa ra, b = lb qb; only ra lb sees the truncation.
    let qr_opts = SplitOpts {
        method: SplitMethod::Qr,
        ..SplitOpts::default()
    };
    let lq_opts = SplitOpts {
        method: SplitMethod::Lq,
        ..SplitOpts::default()
    };
    let a_split = a.split(&a_left, &qr_opts)?;
    let b_split = b.split(&shared_refs, &lq_opts)?;

    let env = a_split.right.contract_with(&b_split.left, None)?;
    // The environment split always spreads the spectrum over both sides.
    let env_opts = SplitOpts {
        absorb: Absorb::Both,
        ..opts.clone()
    };
    let env_split = env.split(&[a_split.bond.as_str()], &env_opts)?;

    let mut a_new = a_split.left.contract_with(&env_split.left, None)?;
    let mut b_new = env_split.right.contract_with(&b_split.right, None)?;

    // Restore the original bond label where there was exactly one.
    if let Some(name) = opts.bond_label.clone().or_else(|| {
        (shared.len() == 1).then(|| shared[0].clone())
    }) {
        let map: std::collections::HashMap<String, String> =
            [(env_split.bond.clone(), name)].into_iter().collect();
        a_new.reindex_inplace(&map)?;
        b_new.reindex_inplace(&map)?;
    }

    a_new.modify(TensorUpdate {
        tags: Some(a.tags().clone()),
        ..TensorUpdate::default()
    })?;
    b_new.modify(TensorUpdate {
        tags: Some(b.tags().clone()),
        ..TensorUpdate::default()
    })?;

    *a = a_new;
    *b = b_new;
    Ok(())
}
