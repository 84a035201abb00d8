//! Dense tensor storage, generic over real and complex elements.
//!
//! [`DenseStorage<T>`] wraps an `mdarray` dynamic-rank tensor in row-major
//! layout. [`Storage`] closes the element type over the two supported
//! dtypes; mixed-dtype operations promote `f64` to `Complex64`.

use mdarray::{DynRank, Shape, Tensor as MdTensor};
use num_complex::{Complex64, ComplexFloat};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use tangle_einsum::GemmScalar;

use crate::error::TensorError;

/// Scalar element types storable in a tensor.
pub trait Element: GemmScalar + ComplexFloat<Real = f64> + From<f64> {
    const COMPLEX: bool;

    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self;
    fn into_c64(self) -> Complex64;
    /// Close a typed storage back over the dtype enum.
    fn wrap(storage: DenseStorage<Self>) -> Storage;
    /// Open the dtype enum at this element type, if it matches.
    fn unwrap_ref(storage: &Storage) -> Option<&DenseStorage<Self>>;
}

impl Element for f64 {
    const COMPLEX: bool = false;

    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        StandardNormal.sample(rng)
    }

    fn into_c64(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    fn wrap(storage: DenseStorage<Self>) -> Storage {
        Storage::F64(storage)
    }

    fn unwrap_ref(storage: &Storage) -> Option<&DenseStorage<Self>> {
        match storage {
            Storage::F64(s) => Some(s),
            Storage::C64(_) => None,
        }
    }
}

impl Element for Complex64 {
    const COMPLEX: bool = true;

    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Complex64::new(StandardNormal.sample(rng), StandardNormal.sample(rng))
    }

    fn into_c64(self) -> Complex64 {
        self
    }

    fn wrap(storage: DenseStorage<Self>) -> Storage {
        Storage::C64(storage)
    }

    fn unwrap_ref(storage: &Storage) -> Option<&DenseStorage<Self>> {
        match storage {
            Storage::F64(_) => None,
            Storage::C64(s) => Some(s),
        }
    }
}

/// Dense row-major storage with shape carried by the underlying tensor.
#[derive(Debug, Clone)]
pub struct DenseStorage<T>(MdTensor<T, DynRank>);

impl<T> DenseStorage<T> {
    /// # Panics
    /// Panics if the product of `dims` does not match `vec.len()`.
    pub fn from_vec_with_shape(vec: Vec<T>, dims: &[usize]) -> Self {
        let expected: usize = dims.iter().product();
        assert_eq!(
            vec.len(),
            expected,
            "data length {} does not match shape {:?}",
            vec.len(),
            dims
        );
        Self(MdTensor::from(vec).into_shape(DynRank::from_dims(dims)))
    }

    /// Rank-0 storage holding a single value.
    pub fn from_scalar(val: T) -> Self {
        Self(MdTensor::from(vec![val]).into_shape(DynRank::from_dims(&[])))
    }

    pub fn from_tensor(tensor: MdTensor<T, DynRank>) -> Self {
        Self(tensor)
    }

    pub fn into_tensor(self) -> MdTensor<T, DynRank> {
        self.0
    }

    pub fn tensor(&self) -> &MdTensor<T, DynRank> {
        &self.0
    }

    pub fn dims(&self) -> Vec<usize> {
        self.0.shape().with_dims(|d| d.to_vec())
    }

    pub fn rank(&self) -> usize {
        self.0.rank()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.0[..]
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0.into_vec()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T: Element> DenseStorage<T> {
    pub fn from_elem(dims: &[usize], val: T) -> Self {
        Self::from_vec_with_shape(vec![val; dims.iter().product()], dims)
    }

    pub fn zeros(dims: &[usize]) -> Self {
        Self::from_elem(dims, T::zero())
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R, dims: &[usize]) -> Self {
        let size: usize = dims.iter().product();
        let data: Vec<T> = (0..size).map(|_| T::sample_normal(rng)).collect();
        Self::from_vec_with_shape(data, dims)
    }

    pub fn permute(&self, perm: &[usize]) -> Self {
        assert_eq!(perm.len(), self.rank());
        Self(self.0.permute(perm).to_tensor())
    }

    /// Same data, new shape of equal size.
    pub fn reshape(&self, dims: &[usize]) -> Self {
        Self::from_vec_with_shape(self.as_slice().to_vec(), dims)
    }

    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        let data: Vec<T> = self.iter().map(|&x| f(x)).collect();
        Self::from_vec_with_shape(data, &self.dims())
    }

    pub fn conj(&self) -> Self {
        self.map(|x| x.conj())
    }

    pub fn norm_sq(&self) -> f64 {
        self.iter().map(|x| {
            let a = x.abs();
            a * a
        })
        .sum()
    }
}

fn zip_map<T: Element>(a: &DenseStorage<T>, b: &DenseStorage<T>, f: impl Fn(T, T) -> T) -> DenseStorage<T> {
    debug_assert_eq!(a.dims(), b.dims());
    let data: Vec<T> = a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect();
    DenseStorage::from_vec_with_shape(data, &a.dims())
}

/// A scalar of either dtype, e.g. the value of a fully contracted network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    F64(f64),
    C64(Complex64),
}

impl Scalar {
    pub fn as_c64(self) -> Complex64 {
        match self {
            Scalar::F64(x) => Complex64::new(x, 0.0),
            Scalar::C64(z) => z,
        }
    }

    pub fn re(self) -> f64 {
        self.as_c64().re
    }

    pub fn im(self) -> f64 {
        self.as_c64().im
    }

    pub fn abs(self) -> f64 {
        self.as_c64().norm()
    }

    pub fn is_complex(self) -> bool {
        matches!(self, Scalar::C64(_))
    }

    /// Convert to a real number, rejecting an imaginary part above
    /// `imag_tol` in magnitude.
    pub fn into_real(self, imag_tol: f64) -> Result<f64, TensorError> {
        match self {
            Scalar::F64(x) => Ok(x),
            Scalar::C64(z) if z.im.abs() <= imag_tol => Ok(z.re),
            Scalar::C64(z) => Err(TensorError::ImagResidual {
                imag: z.im.abs(),
                tol: imag_tol,
            }),
        }
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::F64(x)
    }
}

impl From<Complex64> for Scalar {
    fn from(z: Complex64) -> Self {
        Scalar::C64(z)
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::F64(x) => write!(f, "{x}"),
            Scalar::C64(z) => write!(f, "{}{:+}i", z.re, z.im),
        }
    }
}

/// Elementwise binary operations on aligned storages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Dense storage closed over the supported dtypes.
#[derive(Debug, Clone)]
pub enum Storage {
    F64(DenseStorage<f64>),
    C64(DenseStorage<Complex64>),
}

impl Storage {
    pub fn from_vec_f64(vec: Vec<f64>, dims: &[usize]) -> Self {
        Storage::F64(DenseStorage::from_vec_with_shape(vec, dims))
    }

    pub fn from_vec_c64(vec: Vec<Complex64>, dims: &[usize]) -> Self {
        Storage::C64(DenseStorage::from_vec_with_shape(vec, dims))
    }

    pub fn scalar(value: Scalar) -> Self {
        match value {
            Scalar::F64(x) => Storage::F64(DenseStorage::from_scalar(x)),
            Scalar::C64(z) => Storage::C64(DenseStorage::from_scalar(z)),
        }
    }

    pub fn zeros_f64(dims: &[usize]) -> Self {
        Storage::F64(DenseStorage::zeros(dims))
    }

    pub fn random_f64<R: Rng + ?Sized>(rng: &mut R, dims: &[usize]) -> Self {
        Storage::F64(DenseStorage::random(rng, dims))
    }

    pub fn random_c64<R: Rng + ?Sized>(rng: &mut R, dims: &[usize]) -> Self {
        Storage::C64(DenseStorage::random(rng, dims))
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Storage::F64(s) => s.dims(),
            Storage::C64(s) => s.dims(),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Storage::F64(s) => s.rank(),
            Storage::C64(s) => s.rank(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::F64(s) => s.len(),
            Storage::C64(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Storage::C64(_))
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Storage::F64(_) => "f64",
            Storage::C64(_) => "c64",
        }
    }

    pub fn permute(&self, perm: &[usize]) -> Self {
        match self {
            Storage::F64(s) => Storage::F64(s.permute(perm)),
            Storage::C64(s) => Storage::C64(s.permute(perm)),
        }
    }

    pub fn reshape(&self, dims: &[usize]) -> Self {
        match self {
            Storage::F64(s) => Storage::F64(s.reshape(dims)),
            Storage::C64(s) => Storage::C64(s.reshape(dims)),
        }
    }

    pub fn conj(&self) -> Self {
        match self {
            Storage::F64(s) => Storage::F64(s.clone()),
            Storage::C64(s) => Storage::C64(s.conj()),
        }
    }

    pub fn norm_sq(&self) -> f64 {
        match self {
            Storage::F64(s) => s.norm_sq(),
            Storage::C64(s) => s.norm_sq(),
        }
    }

    pub fn norm(&self) -> f64 {
        self.norm_sq().sqrt()
    }

    /// Value of a rank-0 storage.
    pub fn item(&self) -> Result<Scalar, TensorError> {
        if self.rank() != 0 {
            return Err(TensorError::NotScalar { rank: self.rank() });
        }
        Ok(match self {
            Storage::F64(s) => Scalar::F64(s.as_slice()[0]),
            Storage::C64(s) => Scalar::C64(s.as_slice()[0]),
        })
    }

    /// Promote to complex storage, copying real data when needed.
    pub fn to_c64(&self) -> DenseStorage<Complex64> {
        match self {
            Storage::F64(s) => {
                let data: Vec<Complex64> = s.iter().map(|&x| Complex64::new(x, 0.0)).collect();
                DenseStorage::from_vec_with_shape(data, &s.dims())
            }
            Storage::C64(s) => s.clone(),
        }
    }

    /// Largest imaginary magnitude over all elements; zero for real storage.
    pub fn max_imag(&self) -> f64 {
        match self {
            Storage::F64(_) => 0.0,
            Storage::C64(s) => s.iter().map(|z| z.im.abs()).fold(0.0, f64::max),
        }
    }

    /// Demote complex storage to real, rejecting imaginary residue above
    /// `imag_tol`.
    pub fn demote_real(&self, imag_tol: f64) -> Result<Self, TensorError> {
        match self {
            Storage::F64(s) => Ok(Storage::F64(s.clone())),
            Storage::C64(s) => {
                let imag = self.max_imag();
                if imag > imag_tol {
                    return Err(TensorError::ImagResidual {
                        imag,
                        tol: imag_tol,
                    });
                }
                let data: Vec<f64> = s.iter().map(|z| z.re).collect();
                Ok(Storage::F64(DenseStorage::from_vec_with_shape(
                    data,
                    &s.dims(),
                )))
            }
        }
    }

    /// Scale by a scalar; a complex scalar promotes real storage.
    pub fn scale(&self, factor: Scalar) -> Self {
        match (self, factor) {
            (Storage::F64(s), Scalar::F64(x)) => Storage::F64(s.map(|v| v * x)),
            (_, factor) => {
                let z = factor.as_c64();
                Storage::C64(self.to_c64().map(|v| v * z))
            }
        }
    }

    /// Elementwise binary operation; dims must already agree.
    pub fn binary(&self, other: &Storage, op: ElemOp) -> Result<Storage, TensorError> {
        if self.dims() != other.dims() {
            return Err(TensorError::SizeMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        Ok(match (self, other) {
            (Storage::F64(a), Storage::F64(b)) => Storage::F64(zip_map(a, b, |x, y| match op {
                ElemOp::Add => x + y,
                ElemOp::Sub => x - y,
                ElemOp::Mul => x * y,
                ElemOp::Div => x / y,
                ElemOp::Pow => x.powf(y),
            })),
            _ => {
                let a = self.to_c64();
                let b = other.to_c64();
                Storage::C64(zip_map(&a, &b, |x, y| match op {
                    ElemOp::Add => x + y,
                    ElemOp::Sub => x - y,
                    ElemOp::Mul => x * y,
                    ElemOp::Div => x / y,
                    ElemOp::Pow => x.powc(y),
                }))
            }
        })
    }

    /// Approximate equality with absolute tolerance, promoting dtypes.
    pub fn allclose(&self, other: &Storage, atol: f64) -> bool {
        if self.dims() != other.dims() {
            return false;
        }
        let a = self.to_c64();
        let b = other.to_c64();
        a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).norm() <= atol)
    }
}
