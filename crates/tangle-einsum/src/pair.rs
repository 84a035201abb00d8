//! Pairwise contraction of two labeled dense tensors via GEMM.
//!
//! Index symbols are classified against the step output: a symbol shared by
//! both operands and kept is a batch axis, shared and dropped is contracted,
//! present in one operand and dropped is summed out up front. Operands are
//! then permuted to `[batch, kept, contracted]` / `[batch, contracted, kept]`
//! layout and multiplied block by block with faer's GEMM on row-major views.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Mul};

use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Par};
use faer_traits::ComplexField;
use mdarray::{DynRank, Shape, Tensor};
use num_complex::Complex64;
use num_traits::{One, Zero};

/// Scalar types the GEMM executor can contract.
pub trait GemmScalar:
    Clone
    + Copy
    + Debug
    + Default
    + Zero
    + One
    + Add<Output = Self>
    + Mul<Output = Self>
    + AddAssign
    + ComplexField
    + Send
    + Sync
    + 'static
{
}

impl GemmScalar for f64 {}
impl GemmScalar for Complex64 {}

fn dims_of<T>(t: &Tensor<T, DynRank>) -> Vec<usize> {
    t.shape().with_dims(|d| d.to_vec())
}

fn from_vec<T>(data: Vec<T>, dims: &[usize]) -> Tensor<T, DynRank> {
    Tensor::from(data).into_shape(DynRank::from_dims(dims))
}

/// Permute `t` so its axes follow `target`, a permutation of `syms`.
fn permute_to<T: GemmScalar>(
    t: &Tensor<T, DynRank>,
    syms: &[char],
    target: &[char],
) -> Tensor<T, DynRank> {
    debug_assert_eq!(syms.len(), target.len());
    let perm: Vec<usize> = target
        .iter()
        .map(|s| syms.iter().position(|c| c == s).unwrap())
        .collect();
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        t.clone()
    } else {
        t.permute(&perm[..]).to_tensor()
    }
}

/// Sum `t` over the axes named in `drop`, returning the reduced tensor and
/// its remaining symbols in original order.
pub fn sum_axes<T: GemmScalar>(
    t: &Tensor<T, DynRank>,
    syms: &[char],
    drop: &[char],
) -> (Tensor<T, DynRank>, Vec<char>) {
    if drop.is_empty() {
        return (t.clone(), syms.to_vec());
    }
    let kept: Vec<char> = syms.iter().filter(|s| !drop.contains(s)).copied().collect();
    let target: Vec<char> = kept
        .iter()
        .chain(syms.iter().filter(|s| drop.contains(s)))
        .copied()
        .collect();
    let permuted = permute_to(t, syms, &target);
    let dims = dims_of(&permuted);
    let nkeep = kept.len();
    let keep_len: usize = dims[..nkeep].iter().product();
    let sum_len: usize = dims[nkeep..].iter().product();

    let data = &permuted[..];
    let mut out = vec![T::zero(); keep_len];
    for (i, slot) in out.iter_mut().enumerate() {
        let base = i * sum_len;
        for j in 0..sum_len {
            *slot += data[base + j];
        }
    }
    (from_vec(out, &dims[..nkeep]), kept)
}

/// Contract two operands into a tensor whose axes follow `out_syms`.
///
/// `out_syms` must be a subset of the operands' symbols; shared symbols
/// absent from it are contracted, unshared ones are summed out.
pub fn contract_pair<T: GemmScalar>(
    a: &Tensor<T, DynRank>,
    a_syms: &[char],
    b: &Tensor<T, DynRank>,
    b_syms: &[char],
    out_syms: &[char],
) -> Tensor<T, DynRank> {
    let batch: Vec<char> = a_syms
        .iter()
        .filter(|s| b_syms.contains(s) && out_syms.contains(s))
        .copied()
        .collect();
    let contract: Vec<char> = a_syms
        .iter()
        .filter(|s| b_syms.contains(s) && !out_syms.contains(s))
        .copied()
        .collect();
    let a_keep: Vec<char> = a_syms
        .iter()
        .filter(|s| !b_syms.contains(s) && out_syms.contains(s))
        .copied()
        .collect();
    let a_drop: Vec<char> = a_syms
        .iter()
        .filter(|s| !b_syms.contains(s) && !out_syms.contains(s))
        .copied()
        .collect();
    let b_keep: Vec<char> = b_syms
        .iter()
        .filter(|s| !a_syms.contains(s) && out_syms.contains(s))
        .copied()
        .collect();
    let b_drop: Vec<char> = b_syms
        .iter()
        .filter(|s| !a_syms.contains(s) && !out_syms.contains(s))
        .copied()
        .collect();

    let (a, a_syms) = sum_axes(a, a_syms, &a_drop);
    let (b, b_syms) = sum_axes(b, b_syms, &b_drop);

    let a_target: Vec<char> = batch
        .iter()
        .chain(a_keep.iter())
        .chain(contract.iter())
        .copied()
        .collect();
    let b_target: Vec<char> = batch
        .iter()
        .chain(contract.iter())
        .chain(b_keep.iter())
        .copied()
        .collect();
    let a = permute_to(&a, &a_syms, &a_target);
    let b = permute_to(&b, &b_syms, &b_target);

    let a_dims = dims_of(&a);
    let b_dims = dims_of(&b);
    let nb = batch.len();
    let bsz: usize = a_dims[..nb].iter().product();
    let m: usize = a_dims[nb..nb + a_keep.len()].iter().product();
    let k: usize = a_dims[nb + a_keep.len()..].iter().product();
    let n: usize = b_dims[nb + contract.len()..].iter().product();
    debug_assert_eq!(k, b_dims[nb..nb + contract.len()].iter().product::<usize>());

    // One GEMM per batch block; the batch axes are leading so each block is
    // a contiguous row-major matrix.
    let a_data = &a[..];
    let b_data = &b[..];
    let mut c = vec![T::zero(); bsz * m * n];
    for blk in 0..bsz {
        let a_mat = unsafe {
            faer::MatRef::from_raw_parts(a_data.as_ptr().add(blk * m * k), m, k, k as isize, 1)
        };
        let b_mat = unsafe {
            faer::MatRef::from_raw_parts(b_data.as_ptr().add(blk * k * n), k, n, n as isize, 1)
        };
        let mut c_mat = unsafe {
            faer::MatMut::from_raw_parts_mut(c.as_mut_ptr().add(blk * m * n), m, n, n as isize, 1)
        };
        faer_matmul(&mut c_mat, Accum::Replace, a_mat, b_mat, T::one(), Par::Seq);
    }

    let mut c_dims: Vec<usize> = a_dims[..nb + a_keep.len()].to_vec();
    c_dims.extend_from_slice(&b_dims[nb + contract.len()..]);
    let c_syms: Vec<char> = batch
        .iter()
        .chain(a_keep.iter())
        .chain(b_keep.iter())
        .copied()
        .collect();
    let c = from_vec(c, &c_dims);

    permute_to(&c, &c_syms, out_syms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(data: Vec<f64>, dims: &[usize]) -> Tensor<f64, DynRank> {
        from_vec(data, dims)
    }

    #[test]
    fn matmul_via_pair() {
        // [[1,2],[3,4]] @ [[5,6],[7,8]]
        let a = tensor(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = tensor(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]);
        let c = contract_pair(&a, &['i', 'j'], &b, &['j', 'k'], &['i', 'k']);
        assert_eq!(&c[..], &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn batch_axis_is_kept() {
        // Two independent 1x1 products stacked over a batch axis.
        let a = tensor(vec![2.0, 3.0], &[2, 1]);
        let b = tensor(vec![5.0, 7.0], &[2, 1]);
        let c = contract_pair(&a, &['b', 'i'], &b, &['b', 'j'], &['b', 'i', 'j']);
        assert_eq!(dims_of(&c), vec![2, 1, 1]);
        assert_eq!(&c[..], &[10.0, 21.0]);
    }

    #[test]
    fn lone_axis_is_summed_when_dropped() {
        let a = tensor(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = tensor(vec![10.0, 20.0], &[2]);
        // 'j' contracted, 'i' summed out of the result.
        let c = contract_pair(&a, &['i', 'j'], &b, &['j'], &[]);
        assert_eq!(c.rank(), 0);
        assert_eq!(c[..][0], 1.0 * 10.0 + 2.0 * 20.0 + 3.0 * 10.0 + 4.0 * 20.0);
    }

    #[test]
    fn outer_product() {
        let a = tensor(vec![1.0, 2.0], &[2]);
        let b = tensor(vec![3.0, 4.0, 5.0], &[3]);
        let c = contract_pair(&a, &['i'], &b, &['j'], &['j', 'i']);
        assert_eq!(dims_of(&c), vec![3, 2]);
        assert_eq!(&c[..], &[3.0, 6.0, 4.0, 8.0, 5.0, 10.0]);
    }
}
