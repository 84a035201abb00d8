//! Matrix-level linear algebra behind tensor splitting.
//!
//! Everything here works on row-major `DTensor<T, 2>` matrices. Full SVD and
//! QR go through `mdarray-linalg` with the faer backend; the Hermitian
//! eigendecomposition and GEMM use faer directly. [`rsvd`] is a randomized
//! subspace-iteration partial SVD over the matrix-free [`MatFree`] trait, so
//! it never needs the operator densified.

use anyhow::anyhow;
use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Par};
use mdarray::DTensor;
use mdarray_linalg::qr::QR;
use mdarray_linalg::svd::SVD;
use mdarray_linalg_faer::Faer;
use num_complex::ComplexFloat;
use rand::Rng;

use crate::error::DecompError;
use crate::storage::Element;

/// Thin SVD: `a = u * diag(s) * vh` with `u` of shape `(m, k)`, `vh` of
/// shape `(k, n)` and `k = min(m, n)`. Singular values are real,
/// nonincreasing.
pub(crate) fn svd<T: Element>(
    a: &DTensor<T, 2>,
) -> Result<(DTensor<T, 2>, Vec<f64>, DTensor<T, 2>), DecompError> {
    let m = a.dim(0);
    let n = a.dim(1);
    let k = m.min(n);

    let mut work = a.clone();
    let bd = Faer;
    let decomp = bd
        .svd(&mut work)
        .map_err(|e| DecompError::Backend(anyhow!("svd failed: {e}")))?;

    // Singular values arrive in the first row (LAPACK convention).
    let s: Vec<f64> = (0..k).map(|i| decomp.s[[0, i]].re()).collect();
    let u = DTensor::<T, 2>::from_fn([m, k], |idx| decomp.u[[idx[0], idx[1]]]);
    let vh = DTensor::<T, 2>::from_fn([k, n], |idx| decomp.vt[[idx[0], idx[1]]]);
    Ok((u, s, vh))
}

/// Thin QR: `a = q * r` with `q` of shape `(m, k)`, `r` of shape `(k, n)`.
pub(crate) fn qr<T: Element>(a: &DTensor<T, 2>) -> (DTensor<T, 2>, DTensor<T, 2>) {
    let m = a.dim(0);
    let n = a.dim(1);
    let k = m.min(n);

    let mut work = a.clone();
    let bd = Faer;
    let (q_full, r_full) = bd.qr(&mut work);
    let q = DTensor::<T, 2>::from_fn([m, k], |idx| q_full[[idx[0], idx[1]]]);
    let r = DTensor::<T, 2>::from_fn([k, n], |idx| r_full[[idx[0], idx[1]]]);
    (q, r)
}

/// Thin LQ: `a = l * q` with `l` of shape `(m, k)`, `q` of shape `(k, n)`.
///
/// Computed as the QR of the adjoint: `aᴴ = q₀ r₀` gives `a = r₀ᴴ q₀ᴴ`.
pub(crate) fn lq<T: Element>(a: &DTensor<T, 2>) -> (DTensor<T, 2>, DTensor<T, 2>) {
    let (q0, r0) = qr(&adjoint(a));
    (adjoint(&r0), adjoint(&q0))
}

/// Hermitian eigendecomposition with eigenvalues in nonincreasing order.
///
/// Returns `(values, vectors)` where column `j` of `vectors` is the
/// eigenvector of `values[j]`.
pub(crate) fn eigh<T: Element>(
    a: &DTensor<T, 2>,
) -> Result<(Vec<f64>, DTensor<T, 2>), DecompError> {
    let n = a.dim(0);
    debug_assert_eq!(n, a.dim(1));

    let data = &a[..];
    let mat = unsafe { faer::MatRef::from_raw_parts(data.as_ptr(), n, n, n as isize, 1) };
    let evd = mat
        .self_adjoint_eigen(faer::Side::Lower)
        .map_err(|e| DecompError::Backend(anyhow!("eigendecomposition failed: {e:?}")))?;

    // faer returns eigenvalues in nondecreasing order; reverse to match the
    // singular-value convention.
    let s_diag = evd.S();
    let u_mat = evd.U();
    let values: Vec<f64> = (0..n).rev().map(|i| s_diag[i].re()).collect();
    let vectors = DTensor::<T, 2>::from_fn([n, n], |idx| u_mat[(idx[0], n - 1 - idx[1])]);
    Ok((values, vectors))
}

/// `c = a * b` on row-major matrices.
pub(crate) fn matmul<T: Element>(a: &DTensor<T, 2>, b: &DTensor<T, 2>) -> DTensor<T, 2> {
    let m = a.dim(0);
    let k = a.dim(1);
    let n = b.dim(1);
    debug_assert_eq!(k, b.dim(0));

    let a_data = &a[..];
    let b_data = &b[..];
    let a_mat = unsafe { faer::MatRef::from_raw_parts(a_data.as_ptr(), m, k, k as isize, 1) };
    let b_mat = unsafe { faer::MatRef::from_raw_parts(b_data.as_ptr(), k, n, n as isize, 1) };
    let mut c = vec![T::zero(); m * n];
    let mut c_mat =
        unsafe { faer::MatMut::from_raw_parts_mut(c.as_mut_ptr(), m, n, n as isize, 1) };
    faer_matmul(&mut c_mat, Accum::Replace, a_mat, b_mat, T::one(), Par::Seq);

    DTensor::<T, 2>::from_fn([m, n], |idx| c[idx[0] * n + idx[1]])
}

/// Conjugate transpose.
pub(crate) fn adjoint<T: Element>(a: &DTensor<T, 2>) -> DTensor<T, 2> {
    let m = a.dim(0);
    let n = a.dim(1);
    DTensor::<T, 2>::from_fn([n, m], |idx| a[[idx[1], idx[0]]].conj())
}

/// Scale each column `j` of `a` by `factors[j]`.
pub(crate) fn scale_cols<T: Element>(a: &DTensor<T, 2>, factors: &[f64]) -> DTensor<T, 2> {
    DTensor::<T, 2>::from_fn([a.dim(0), a.dim(1)], |idx| {
        a[[idx[0], idx[1]]] * <T as From<f64>>::from(factors[idx[1]])
    })
}

/// Scale each row `i` of `a` by `factors[i]`.
pub(crate) fn scale_rows<T: Element>(a: &DTensor<T, 2>, factors: &[f64]) -> DTensor<T, 2> {
    DTensor::<T, 2>::from_fn([a.dim(0), a.dim(1)], |idx| {
        a[[idx[0], idx[1]]] * <T as From<f64>>::from(factors[idx[0]])
    })
}

/// A linear operator given only by its action, applied blockwise: `apply`
/// maps an `(ncols, b)` block to `(nrows, b)`, `adjoint_apply` the reverse.
pub trait MatFree<T: Element> {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError>;
    fn adjoint_apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError>;
}

/// Dense matrices are trivially matrix-free.
impl<T: Element> MatFree<T> for DTensor<T, 2> {
    fn nrows(&self) -> usize {
        self.dim(0)
    }

    fn ncols(&self) -> usize {
        self.dim(1)
    }

    fn apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError> {
        Ok(matmul(self, x))
    }

    fn adjoint_apply(&self, x: &DTensor<T, 2>) -> Result<DTensor<T, 2>, DecompError> {
        Ok(matmul(&adjoint(self), x))
    }
}

/// Randomized partial SVD of rank at most `k` via subspace iteration.
///
/// Draws a Gaussian test block of `k + oversample` columns, runs `n_iter`
/// power iterations through `apply`/`adjoint_apply` with QR
/// re-orthonormalization, then solves the small projected problem exactly.
pub(crate) fn rsvd<T, A, R>(
    op: &A,
    k: usize,
    n_iter: usize,
    oversample: usize,
    rng: &mut R,
) -> Result<(DTensor<T, 2>, Vec<f64>, DTensor<T, 2>), DecompError>
where
    T: Element,
    A: MatFree<T>,
    R: Rng + ?Sized,
{
    let m = op.nrows();
    let n = op.ncols();
    let kmax = m.min(n);
    let l = (k + oversample).min(kmax);

    let omega = DTensor::<T, 2>::from_fn([n, l], |_| T::sample_normal(rng));
    let mut q = qr(&op.apply(&omega)?).0;
    for _ in 0..n_iter {
        let z = qr(&op.adjoint_apply(&q)?).0;
        q = qr(&op.apply(&z)?).0;
    }

    // b = qᴴ a has shape (l, n); its SVD finishes the job.
    let b = adjoint(&op.adjoint_apply(&q)?);
    let (ub, s, vh) = svd(&b)?;
    let u = matmul(&q, &ub);

    let k = k.min(s.len());
    let u = DTensor::<T, 2>::from_fn([m, k], |idx| u[[idx[0], idx[1]]]);
    let vh = DTensor::<T, 2>::from_fn([k, n], |idx| vh[[idx[0], idx[1]]]);
    Ok((u, s[..k].to_vec(), vh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn mat(data: Vec<f64>, m: usize, n: usize) -> DTensor<f64, 2> {
        DTensor::<f64, 2>::from_fn([m, n], |idx| data[idx[0] * n + idx[1]])
    }

    fn assert_mat_close(a: &DTensor<f64, 2>, b: &DTensor<f64, 2>, tol: f64) {
        assert_eq!(a.dim(0), b.dim(0));
        assert_eq!(a.dim(1), b.dim(1));
        for i in 0..a.dim(0) {
            for j in 0..a.dim(1) {
                assert!(
                    (a[[i, j]] - b[[i, j]]).abs() < tol,
                    "mismatch at ({i},{j}): {} vs {}",
                    a[[i, j]],
                    b[[i, j]]
                );
            }
        }
    }

    #[test]
    fn matmul_matches_by_hand() {
        let a = mat(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let b = mat(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], 3, 2);
        let c = matmul(&a, &b);
        assert_mat_close(&c, &mat(vec![4.0, 5.0, 10.0, 11.0], 2, 2), 1e-14);
    }

    #[test]
    fn svd_reconstructs() {
        let a = mat(vec![3.0, 1.0, 1.0, 3.0, 0.5, -0.5], 3, 2);
        let (u, s, vh) = svd(&a).unwrap();
        assert!(s[0] >= s[1]);
        let us = scale_cols(&u, &s);
        assert_mat_close(&matmul(&us, &vh), &a, 1e-12);
    }

    #[test]
    fn qr_and_lq_reconstruct() {
        let a = mat(vec![2.0, 1.0, 0.0, 1.0, 1.0, 1.0], 2, 3);
        let (q, r) = qr(&a);
        assert_eq!(q.dim(1), 2);
        assert_mat_close(&matmul(&q, &r), &a, 1e-12);

        let (l, q2) = lq(&a);
        assert_eq!(l.dim(1), 2);
        assert_mat_close(&matmul(&l, &q2), &a, 1e-12);
    }

    #[test]
    fn eigh_matches_singular_values_of_gram() {
        let a = mat(vec![2.0, 1.0, 1.0, 3.0], 2, 2);
        // a is symmetric positive definite, so eigh(aᵀa) gives s².
        let gram = matmul(&adjoint(&a), &a);
        let (vals, vecs) = eigh(&gram).unwrap();
        assert!(vals[0] >= vals[1]);
        let (_, s, _) = svd(&a).unwrap();
        assert!((vals[0] - s[0] * s[0]).abs() < 1e-10);
        assert!((vals[1] - s[1] * s[1]).abs() < 1e-10);

        // Eigenvector columns reassemble the matrix.
        let vl = scale_cols(&vecs, &vals);
        assert_mat_close(&matmul(&vl, &adjoint(&vecs)), &gram, 1e-10);
    }

    #[test]
    fn rsvd_recovers_low_rank_matrix() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        // Rank-2 matrix built from outer products.
        let x = DTensor::<f64, 2>::from_fn([20, 2], |_| f64::sample_normal(&mut rng));
        let y = DTensor::<f64, 2>::from_fn([2, 15], |_| f64::sample_normal(&mut rng));
        let a = matmul(&x, &y);

        let (u, s, vh) = rsvd(&a, 2, 2, 8, &mut rng).unwrap();
        assert_eq!(s.len(), 2);
        let approx = matmul(&scale_cols(&u, &s), &vh);
        assert_mat_close(&approx, &a, 1e-8);

        let (_, s_full, _) = svd(&a).unwrap();
        assert!((s[0] - s_full[0]).abs() < 1e-8);
        assert!((s[1] - s_full[1]).abs() < 1e-8);
    }
}
