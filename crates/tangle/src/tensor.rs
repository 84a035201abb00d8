//! Labeled tensors.
//!
//! A [`Tensor`] couples dense storage with one string index label per axis
//! and a set of tags. Axis order is an implementation detail: operations
//! address axes by label, and two tensors whose labels match up to
//! permutation compare equal up to that permutation.
//!
//! Storage sits behind an `Arc`, so clones are cheap and copy-on-write.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::TensorError;
use crate::storage::{ElemOp, Scalar, Storage};
use crate::tags::TagSet;

#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    inds: Vec<String>,
    tags: TagSet,
}

/// Joint update of a tensor's parts; unset fields are kept. The tensor
/// invariants are checked once against the combined result, so data and
/// labels can be replaced together.
#[derive(Debug, Default)]
pub struct TensorUpdate {
    pub data: Option<Storage>,
    pub inds: Option<Vec<String>>,
    pub tags: Option<TagSet>,
}

fn check_inds(rank: usize, inds: &[String]) -> Result<(), TensorError> {
    if inds.len() != rank {
        return Err(TensorError::RankMismatch {
            rank,
            inds: inds.len(),
        });
    }
    for (i, label) in inds.iter().enumerate() {
        if inds[..i].contains(label) {
            return Err(TensorError::DuplicateIndex {
                label: label.clone(),
            });
        }
    }
    Ok(())
}

impl Tensor {
    pub fn new(storage: Storage, inds: Vec<String>, tags: TagSet) -> Result<Self, TensorError> {
        check_inds(storage.rank(), &inds)?;
        Ok(Self {
            storage: Arc::new(storage),
            inds,
            tags,
        })
    }

    pub fn from_data_f64(
        data: Vec<f64>,
        dims: &[usize],
        inds: &[&str],
    ) -> Result<Self, TensorError> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(TensorError::SizeMismatch {
                expected,
                got: data.len(),
            });
        }
        Self::new(
            Storage::from_vec_f64(data, dims),
            inds.iter().map(|s| s.to_string()).collect(),
            TagSet::new(),
        )
    }

    pub fn from_data_c64(
        data: Vec<num_complex::Complex64>,
        dims: &[usize],
        inds: &[&str],
    ) -> Result<Self, TensorError> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(TensorError::SizeMismatch {
                expected,
                got: data.len(),
            });
        }
        Self::new(
            Storage::from_vec_c64(data, dims),
            inds.iter().map(|s| s.to_string()).collect(),
            TagSet::new(),
        )
    }

    /// Rank-0 tensor holding one value.
    pub fn scalar(value: Scalar) -> Self {
        Self {
            storage: Arc::new(Storage::scalar(value)),
            inds: Vec::new(),
            tags: TagSet::new(),
        }
    }

    pub fn random_f64<R: rand::Rng + ?Sized>(
        rng: &mut R,
        dims: &[usize],
        inds: &[&str],
    ) -> Result<Self, TensorError> {
        Self::new(
            Storage::random_f64(rng, dims),
            inds.iter().map(|s| s.to_string()).collect(),
            TagSet::new(),
        )
    }

    pub fn random_c64<R: rand::Rng + ?Sized>(
        rng: &mut R,
        dims: &[usize],
        inds: &[&str],
    ) -> Result<Self, TensorError> {
        Self::new(
            Storage::random_c64(rng, dims),
            inds.iter().map(|s| s.to_string()).collect(),
            TagSet::new(),
        )
    }

    pub fn with_tags(mut self, tags: impl Into<TagSet>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn inds(&self) -> &[String] {
        &self.inds
    }

    pub fn dims(&self) -> Vec<usize> {
        self.storage.dims()
    }

    pub fn rank(&self) -> usize {
        self.storage.rank()
    }

    pub fn size(&self) -> usize {
        self.storage.len()
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_complex(&self) -> bool {
        self.storage.is_complex()
    }

    pub fn has_ind(&self, label: &str) -> bool {
        self.inds.iter().any(|l| l == label)
    }

    /// Dimension of the axis labeled `label`.
    pub fn ind_size(&self, label: &str) -> Result<usize, TensorError> {
        let pos = self
            .inds
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| TensorError::UnknownIndex {
                label: label.to_string(),
            })?;
        Ok(self.dims()[pos])
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag);
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    pub fn set_tags(&mut self, tags: TagSet) {
        self.tags = tags;
    }

    /// Rename tags through `map`; tags not in the map are kept.
    pub fn retag(&mut self, map: &HashMap<String, String>) {
        self.tags = self
            .tags
            .iter()
            .map(|t| map.get(t).cloned().unwrap_or_else(|| t.to_string()))
            .collect();
    }

    pub fn norm_sq(&self) -> f64 {
        self.storage.norm_sq()
    }

    pub fn norm(&self) -> f64 {
        self.norm_sq().sqrt()
    }

    /// Value of a rank-0 tensor.
    pub fn item(&self) -> Result<Scalar, TensorError> {
        self.storage.item()
    }

    pub fn conj(&self) -> Tensor {
        Tensor {
            storage: Arc::new(self.storage.conj()),
            inds: self.inds.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Demote complex data to real, rejecting imaginary residue above
    /// `imag_tol`.
    pub fn to_real(&self, imag_tol: f64) -> Result<Tensor, TensorError> {
        Ok(Tensor {
            storage: Arc::new(self.storage.demote_real(imag_tol)?),
            inds: self.inds.clone(),
            tags: self.tags.clone(),
        })
    }

    /// Reorder axes so the labels follow `order`, which must be a
    /// permutation of this tensor's labels.
    pub fn transpose(&self, order: &[&str]) -> Result<Tensor, TensorError> {
        if order.len() != self.inds.len() {
            return Err(TensorError::RankMismatch {
                rank: self.rank(),
                inds: order.len(),
            });
        }
        let mut perm = Vec::with_capacity(order.len());
        for label in order {
            let pos = self
                .inds
                .iter()
                .position(|l| l == label)
                .ok_or_else(|| TensorError::UnknownIndex {
                    label: label.to_string(),
                })?;
            if perm.contains(&pos) {
                return Err(TensorError::DuplicateIndex {
                    label: label.to_string(),
                });
            }
            perm.push(pos);
        }
        Ok(Tensor {
            storage: Arc::new(self.storage.permute(&perm)),
            inds: order.iter().map(|s| s.to_string()).collect(),
            tags: self.tags.clone(),
        })
    }

    pub fn transpose_inplace(&mut self, order: &[&str]) -> Result<(), TensorError> {
        *self = self.transpose(order)?;
        Ok(())
    }

    /// Rename indices through `map`, applied simultaneously so swaps like
    /// `{a -> b, b -> a}` are safe. Labels not in the map are kept.
    pub fn reindex(&self, map: &HashMap<String, String>) -> Result<Tensor, TensorError> {
        let inds: Vec<String> = self
            .inds
            .iter()
            .map(|l| map.get(l).cloned().unwrap_or_else(|| l.clone()))
            .collect();
        for (i, label) in inds.iter().enumerate() {
            if inds[..i].contains(label) {
                return Err(TensorError::ReindexCollision {
                    label: label.clone(),
                });
            }
        }
        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            inds,
            tags: self.tags.clone(),
        })
    }

    pub fn reindex_inplace(&mut self, map: &HashMap<String, String>) -> Result<(), TensorError> {
        *self = self.reindex(map)?;
        Ok(())
    }

    /// Fuse groups of indices into single indices. Fused axes come first in
    /// group order, remaining axes keep their relative order.
    pub fn fuse(&self, groups: &[(String, Vec<String>)]) -> Result<Tensor, TensorError> {
        let mut fused: Vec<&String> = Vec::new();
        for (_, members) in groups {
            for label in members {
                if !self.has_ind(label) {
                    return Err(TensorError::UnknownIndex {
                        label: label.clone(),
                    });
                }
                if fused.contains(&label) {
                    return Err(TensorError::FuseOverlap {
                        label: label.clone(),
                    });
                }
                fused.push(label);
            }
        }

        let rest: Vec<&String> = self.inds.iter().filter(|l| !fused.contains(l)).collect();
        let order: Vec<&str> = fused
            .iter()
            .chain(rest.iter())
            .map(|l| l.as_str())
            .collect();
        let transposed = self.transpose(&order)?;

        let dims = transposed.dims();
        let mut new_dims = Vec::new();
        let mut new_inds = Vec::new();
        let mut axis = 0;
        for (name, members) in groups {
            let d: usize = dims[axis..axis + members.len()].iter().product();
            new_dims.push(d);
            new_inds.push(name.clone());
            axis += members.len();
        }
        for label in &rest {
            new_dims.push(dims[axis]);
            new_inds.push((*label).clone());
            axis += 1;
        }
        check_inds(new_dims.len(), &new_inds)?;

        Ok(Tensor {
            storage: Arc::new(transposed.storage.reshape(&new_dims)),
            inds: new_inds,
            tags: self.tags.clone(),
        })
    }

    /// Drop all axes of dimension one together with their labels.
    pub fn squeeze(&self) -> Tensor {
        let dims = self.dims();
        let keep: Vec<usize> = (0..dims.len()).filter(|&i| dims[i] != 1).collect();
        if keep.len() == dims.len() {
            return self.clone();
        }
        let new_dims: Vec<usize> = keep.iter().map(|&i| dims[i]).collect();
        let new_inds: Vec<String> = keep.iter().map(|&i| self.inds[i].clone()).collect();
        Tensor {
            // Row-major layout is unchanged by removing unit axes.
            storage: Arc::new(self.storage.reshape(&new_dims)),
            inds: new_inds,
            tags: self.tags.clone(),
        }
    }

    /// Scale every element.
    pub fn scale(&self, factor: Scalar) -> Tensor {
        Tensor {
            storage: Arc::new(self.storage.scale(factor)),
            inds: self.inds.clone(),
            tags: self.tags.clone(),
        }
    }

    fn binary(&self, other: &Tensor, op: ElemOp) -> Result<Tensor, TensorError> {
        let mut left: Vec<&str> = self.inds.iter().map(String::as_str).collect();
        let mut right: Vec<&str> = other.inds.iter().map(String::as_str).collect();
        left.sort_unstable();
        right.sort_unstable();
        if left != right {
            return Err(TensorError::IndexSetMismatch {
                left: self.inds.clone(),
                right: other.inds.clone(),
            });
        }
        let order: Vec<&str> = self.inds.iter().map(String::as_str).collect();
        let aligned = other.transpose(&order)?;
        Ok(Tensor {
            storage: Arc::new(self.storage.binary(&aligned.storage, op)?),
            inds: self.inds.clone(),
            tags: self.tags.union(&other.tags),
        })
    }

    /// Elementwise sum; `other` may carry the same indices in any order.
    pub fn add(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, ElemOp::Add)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, ElemOp::Sub)
    }

    /// Elementwise (Hadamard) product, not a contraction.
    pub fn mul_elem(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, ElemOp::Mul)
    }

    pub fn div_elem(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, ElemOp::Div)
    }

    /// Elementwise power with tensor exponent.
    pub fn pow_elem(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        self.binary(other, ElemOp::Pow)
    }

    /// Elementwise power with scalar exponent.
    pub fn powf(&self, exponent: f64) -> Tensor {
        let exp = Tensor {
            storage: Arc::new(match &*self.storage {
                Storage::F64(_) => {
                    Storage::from_vec_f64(vec![exponent; self.size()], &self.dims())
                }
                Storage::C64(_) => Storage::from_vec_c64(
                    vec![num_complex::Complex64::new(exponent, 0.0); self.size()],
                    &self.dims(),
                ),
            }),
            inds: self.inds.clone(),
            tags: TagSet::new(),
        };
        self.binary(&exp, ElemOp::Pow)
            .expect("aligned exponent tensor")
    }

    /// Approximate equality up to axis permutation, with absolute
    /// tolerance.
    pub fn almost_equals(&self, other: &Tensor, atol: f64) -> bool {
        let order: Vec<&str> = self.inds.iter().map(String::as_str).collect();
        match other.transpose(&order) {
            Ok(aligned) => self.storage.allclose(&aligned.storage, atol),
            Err(_) => false,
        }
    }

    /// Apply a joint update, checking the tensor invariants on the result.
    pub fn modify(&mut self, update: TensorUpdate) -> Result<(), TensorError> {
        let storage = match update.data {
            Some(data) => Arc::new(data),
            None => Arc::clone(&self.storage),
        };
        let inds = update.inds.unwrap_or_else(|| self.inds.clone());
        check_inds(storage.rank(), &inds)?;
        self.storage = storage;
        self.inds = inds;
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        Ok(())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={:?}, inds=[{}], tags={{{}}}, dtype={})",
            self.dims(),
            self.inds.join(","),
            self.tags,
            self.storage.dtype_name()
        )
    }
}

macro_rules! elementwise_op {
    ($trait:ident, $method:ident, $delegate:ident) => {
        impl std::ops::$trait<&Tensor> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                self.$delegate(rhs).expect("elementwise operands must carry the same index set")
            }
        }
    };
}

elementwise_op!(Add, add, add);
elementwise_op!(Sub, sub, sub);
elementwise_op!(Mul, mul, mul_elem);
elementwise_op!(Div, div, div_elem);

impl std::ops::Mul<f64> for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: f64) -> Tensor {
        self.scale(Scalar::F64(rhs))
    }
}

impl std::ops::Mul<num_complex::Complex64> for &Tensor {
    type Output = Tensor;

    fn mul(self, rhs: num_complex::Complex64) -> Tensor {
        self.scale(Scalar::C64(rhs))
    }
}
