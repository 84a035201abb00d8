//! Splitting tensors into factor pairs.
//!
//! A split unfolds the tensor into a matrix over a left/right bipartition of
//! its indices, factorizes it, and folds the factors back into two tensors
//! joined by a new bond index. Rank-revealing methods (SVD and relatives)
//! support truncation by singular-value cutoff and bond cap, rescaling the
//! kept spectrum so the Frobenius norm survives; QR and LQ are exact and
//! ignore truncation options.

use mdarray::DTensor;
use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::DecompError;
use crate::idgen;
use crate::linalg;
use crate::storage::{DenseStorage, Element, Storage};
use crate::tensor::Tensor;

/// Factorization backing a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMethod {
    /// Full singular value decomposition.
    #[default]
    Svd,
    /// Singular values and vectors through the Hermitian eigendecomposition
    /// of the smaller Gram matrix.
    Eig,
    /// Randomized partial SVD; needs `max_bond`.
    Svds,
    /// Iterative partial SVD; same randomized kernel as
    /// [`SplitMethod::Svds`].
    Isvd,
    /// QR, exact, no singular values.
    Qr,
    /// LQ, exact, no singular values.
    Lq,
}

impl SplitMethod {
    /// Whether the method produces singular values that can be truncated.
    pub fn is_rank_revealing(self) -> bool {
        !matches!(self, SplitMethod::Qr | SplitMethod::Lq)
    }
}

/// How a singular-value cutoff is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoffMode {
    /// Keep values strictly above the cutoff.
    Abs,
    /// Keep values strictly above `cutoff * s[0]`.
    Rel,
    /// Discard the largest tail whose sum of squares stays within the
    /// cutoff.
    #[default]
    Sum2,
}

/// Which factor absorbs the singular values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Absorb {
    Left,
    Right,
    /// Split `sqrt(s)` into both factors.
    #[default]
    Both,
}

#[derive(Debug, Clone)]
pub struct SplitOpts {
    pub method: SplitMethod,
    pub cutoff: f64,
    pub cutoff_mode: CutoffMode,
    /// Hard cap on the bond dimension; required for the randomized methods.
    pub max_bond: Option<usize>,
    pub absorb: Absorb,
    /// Label for the new bond; freshly generated when unset.
    pub bond_label: Option<String>,
    /// Seed for the randomized methods; entropy-seeded when unset.
    pub seed: Option<u64>,
}

impl Default for SplitOpts {
    fn default() -> Self {
        Self {
            method: SplitMethod::default(),
            cutoff: 1e-10,
            cutoff_mode: CutoffMode::default(),
            max_bond: None,
            absorb: Absorb::default(),
            bond_label: None,
            seed: None,
        }
    }
}

/// Result of a split: `left` carries the left indices plus the bond, `right`
/// the bond plus the right indices. Both inherit the source tensor's tags.
#[derive(Debug, Clone)]
pub struct Split {
    pub left: Tensor,
    pub right: Tensor,
    pub bond: String,
}

/// Number of singular values kept under the truncation options, at least
/// one.
pub(crate) fn truncate_count(s: &[f64], opts: &SplitOpts) -> usize {
    let n = s.len();
    let mut keep = match opts.cutoff_mode {
        CutoffMode::Abs => s.iter().take_while(|&&x| x > opts.cutoff).count(),
        CutoffMode::Rel => {
            let threshold = opts.cutoff * s[0];
            s.iter().take_while(|&&x| x > threshold).count()
        }
        CutoffMode::Sum2 => {
            let mut acc = 0.0;
            let mut dropped = 0;
            for &x in s.iter().rev() {
                acc += x * x;
                if acc > opts.cutoff {
                    break;
                }
                dropped += 1;
            }
            n - dropped
        }
    };
    keep = keep.max(1);
    if let Some(max_bond) = opts.max_bond {
        keep = keep.min(max_bond.max(1));
    }
    keep.min(n)
}

/// Kept prefix of the spectrum, rescaled by `sqrt(total_sq / kept_sq)`
/// whenever truncation discards weight, so the Frobenius norm survives.
pub(crate) fn renormed_values(s: &[f64], keep: usize) -> Vec<f64> {
    let mut kept = s[..keep].to_vec();
    if keep < s.len() {
        let total_sq: f64 = s.iter().map(|x| x * x).sum();
        let kept_sq: f64 = kept.iter().map(|x| x * x).sum();
        let factor = (total_sq / kept_sq).sqrt();
        for x in &mut kept {
            *x *= factor;
        }
    }
    kept
}

/// Copy the leading `rows x cols` block.
fn take_block<T: Element>(a: &DTensor<T, 2>, rows: usize, cols: usize) -> DTensor<T, 2> {
    DTensor::<T, 2>::from_fn([rows, cols], |idx| a[[idx[0], idx[1]]])
}

/// Compute `(u, s, vh)` via the Hermitian eigendecomposition of the smaller
/// Gram matrix of `a`.
fn svd_via_eig<T: Element>(
    a: &DTensor<T, 2>,
) -> Result<(DTensor<T, 2>, Vec<f64>, DTensor<T, 2>), DecompError> {
    let m = a.dim(0);
    let n = a.dim(1);
    let inv = |s: &[f64]| -> Vec<f64> {
        s.iter()
            .map(|&x| if x > 0.0 { 1.0 / x } else { 0.0 })
            .collect()
    };
    if m >= n {
        let gram = linalg::matmul(&linalg::adjoint(a), a);
        let (vals, v) = linalg::eigh(&gram)?;
        let s: Vec<f64> = vals.iter().map(|&x| x.max(0.0).sqrt()).collect();
        // Left vectors follow from u = a v s⁻¹.
        let u = linalg::matmul(a, &linalg::scale_cols(&v, &inv(&s)));
        Ok((u, s, linalg::adjoint(&v)))
    } else {
        let gram = linalg::matmul(a, &linalg::adjoint(a));
        let (vals, u) = linalg::eigh(&gram)?;
        let s: Vec<f64> = vals.iter().map(|&x| x.max(0.0).sqrt()).collect();
        let vh = linalg::matmul(&linalg::scale_rows(&linalg::adjoint(&u), &inv(&s)), a);
        Ok((u, s, vh))
    }
}

/// Factorize the unfolded matrix into `(left, right)` per the options.
fn split_matrix<T: Element>(
    a: &DTensor<T, 2>,
    opts: &SplitOpts,
) -> Result<(DTensor<T, 2>, DTensor<T, 2>), DecompError> {
    match opts.method {
        SplitMethod::Qr => Ok(linalg::qr(a)),
        SplitMethod::Lq => Ok(linalg::lq(a)),
        method => {
            let kmax = a.dim(0).min(a.dim(1));
            let (u, s, vh) = match method {
                SplitMethod::Svd => linalg::svd(a)?,
                SplitMethod::Eig => svd_via_eig(a)?,
                SplitMethod::Svds | SplitMethod::Isvd => {
                    let k = opts.max_bond.ok_or(DecompError::MaxBondRequired)?;
                    if k >= kmax {
                        // Nothing to gain from sketching at full rank.
                        linalg::svd(a)?
                    } else {
                        let mut rng = match opts.seed {
                            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                            None => ChaCha8Rng::from_entropy(),
                        };
                        linalg::rsvd(a, k, 2, 10, &mut rng)?
                    }
                }
                SplitMethod::Qr | SplitMethod::Lq => unreachable!(),
            };

            if s.first().copied().unwrap_or(0.0) <= 0.0 {
                return Err(DecompError::ZeroNorm);
            }

            let keep = truncate_count(&s, opts);
            let s_kept = renormed_values(&s, keep);
            log::debug!(
                "split kept {keep} of {} singular values ({method:?})",
                s.len()
            );

            let u = take_block(&u, a.dim(0), keep);
            let vh = take_block(&vh, keep, a.dim(1));
            Ok(match opts.absorb {
                Absorb::Left => (linalg::scale_cols(&u, &s_kept), vh),
                Absorb::Right => (u, linalg::scale_rows(&vh, &s_kept)),
                Absorb::Both => {
                    let sqrt_s: Vec<f64> = s_kept.iter().map(|x| x.sqrt()).collect();
                    (
                        linalg::scale_cols(&u, &sqrt_s),
                        linalg::scale_rows(&vh, &sqrt_s),
                    )
                }
            })
        }
    }
}

/// Left/right bipartition of a tensor's indices, with the tensor unfolded
/// to a matrix in that order.
struct Unfolded {
    left: Vec<String>,
    right: Vec<String>,
    ldims: Vec<usize>,
    rdims: Vec<usize>,
    storage: Storage,
}

fn unfold(tensor: &Tensor, left_inds: &[&str]) -> Result<Unfolded, DecompError> {
    for label in left_inds {
        if !tensor.has_ind(label) {
            return Err(DecompError::UnknownIndex {
                label: label.to_string(),
            });
        }
    }
    let left: Vec<String> = left_inds.iter().map(|s| s.to_string()).collect();
    let right: Vec<String> = tensor
        .inds()
        .iter()
        .filter(|l| !left_inds.contains(&l.as_str()))
        .cloned()
        .collect();
    if left.is_empty() || right.is_empty() {
        return Err(DecompError::EmptySide);
    }

    let order: Vec<&str> = left
        .iter()
        .chain(right.iter())
        .map(String::as_str)
        .collect();
    let transposed = tensor.transpose(&order).map_err(DecompError::Tensor)?;
    let dims = transposed.dims();
    let ldims = dims[..left.len()].to_vec();
    let rdims = dims[left.len()..].to_vec();
    let m: usize = ldims.iter().product();
    let n: usize = rdims.iter().product();
    Ok(Unfolded {
        left,
        right,
        ldims,
        rdims,
        storage: transposed.storage().reshape(&[m, n]),
    })
}

fn storage_as_matrix<T: Element>(storage: &Storage) -> DTensor<T, 2> {
    let dense = T::unwrap_ref(storage).expect("dtype matches dispatch");
    let dims = dense.dims();
    let (m, n) = (dims[0], dims[1]);
    let data = dense.as_slice();
    DTensor::<T, 2>::from_fn([m, n], |idx| data[idx[0] * n + idx[1]])
}

fn matrix_to_storage<T: Element>(a: &DTensor<T, 2>, dims: &[usize]) -> Storage {
    let (m, n) = (a.dim(0), a.dim(1));
    let mut data = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            data.push(a[[i, j]]);
        }
    }
    T::wrap(DenseStorage::from_vec_with_shape(data, dims))
}

fn split_unfolded<T: Element>(
    unfolded: &Unfolded,
    opts: &SplitOpts,
    tensor: &Tensor,
) -> Result<Split, DecompError> {
    let a = storage_as_matrix::<T>(&unfolded.storage);
    let (l, r) = split_matrix(&a, opts)?;
    let bond_dim = l.dim(1);
    let bond = opts
        .bond_label
        .clone()
        .unwrap_or_else(|| idgen::global().next_bond());

    let mut left_dims = unfolded.ldims.clone();
    left_dims.push(bond_dim);
    let mut left_inds: Vec<String> = unfolded.left.clone();
    left_inds.push(bond.clone());

    let mut right_dims = vec![bond_dim];
    right_dims.extend_from_slice(&unfolded.rdims);
    let mut right_inds = vec![bond.clone()];
    right_inds.extend_from_slice(&unfolded.right);

    let left = Tensor::new(
        matrix_to_storage(&l, &left_dims),
        left_inds,
        tensor.tags().clone(),
    )
    .map_err(DecompError::Tensor)?;
    let right = Tensor::new(
        matrix_to_storage(&r, &right_dims),
        right_inds,
        tensor.tags().clone(),
    )
    .map_err(DecompError::Tensor)?;
    Ok(Split { left, right, bond })
}

impl Tensor {
    /// Split into two tensors joined by a new bond, with the given indices
    /// on the left.
    pub fn split(&self, left_inds: &[&str], opts: &SplitOpts) -> Result<Split, DecompError> {
        let unfolded = unfold(self, left_inds)?;
        match &unfolded.storage {
            Storage::F64(_) => split_unfolded::<f64>(&unfolded, opts, self),
            Storage::C64(_) => split_unfolded::<Complex64>(&unfolded, opts, self),
        }
    }

    /// Full, untruncated singular value spectrum across the bipartition.
    pub fn split_values(&self, left_inds: &[&str]) -> Result<Vec<f64>, DecompError> {
        let unfolded = unfold(self, left_inds)?;
        let s = match &unfolded.storage {
            Storage::F64(_) => linalg::svd(&storage_as_matrix::<f64>(&unfolded.storage))?.1,
            Storage::C64(_) => {
                linalg::svd(&storage_as_matrix::<Complex64>(&unfolded.storage))?.1
            }
        };
        Ok(s)
    }

    /// Entanglement entropy across the bipartition, `-Σ p log₂ p` over
    /// `p = s²` with exact zeros excluded. Assumes a normalized tensor.
    pub fn entropy(&self, left_inds: &[&str]) -> Result<f64, DecompError> {
        let s = self.split_values(left_inds)?;
        Ok(s.iter()
            .map(|x| x * x)
            .filter(|&p| p > 0.0)
            .map(|p| -p * p.log2())
            .sum())
    }
}
