//! Tensor networks.
//!
//! A [`TensorNetwork`] keys tensors by [`TensorId`] and mirrors their tags
//! in a tag index; every mutation goes through methods that update both maps
//! together. Tensors sit behind `Arc<RwLock<..>>` handles, so a network can
//! either own copies of its tensors or share them virtually with other
//! networks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tangle_einsum::PathCache;

use crate::compress::compress_bond;
use crate::contract::contract_tensors;
use crate::decomp::{renormed_values, truncate_count, Absorb, SplitOpts};
use crate::error::{DecompError, NetworkError};
use crate::idgen::{IdGen, TensorId};
use crate::linalg::{self, MatFree};
use crate::linop::TnLinearOperator;
use crate::storage::{DenseStorage, Element, Scalar, Storage};
use crate::tags::TagSet;
use crate::tensor::Tensor;

/// Shared, lockable tensor handle.
pub type TensorHandle = Arc<RwLock<Tensor>>;

/// How a list of tags selects tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    /// Tensors carrying every tag.
    All,
    /// Tensors carrying at least one tag.
    Any,
}

/// Optional site layout for structured (blockwise) contraction.
#[derive(Debug, Clone)]
pub struct Structure {
    /// Site tag template with a `{}` placeholder, e.g. `"I{}"`.
    pub site_tag_template: String,
    pub nsites: usize,
    /// Number of sites contracted per block during a sweep.
    pub bsz: usize,
}

impl Structure {
    pub fn site_tag(&self, site: usize) -> String {
        if self.site_tag_template.contains("{}") {
            self.site_tag_template.replace("{}", &site.to_string())
        } else {
            format!("{}{}", self.site_tag_template, site)
        }
    }
}

/// Outcome of contracting a whole network.
#[derive(Debug, Clone)]
pub enum Contracted {
    Scalar(Scalar),
    Tensor(Tensor),
}

impl Contracted {
    pub fn into_scalar(self) -> Option<Scalar> {
        match self {
            Contracted::Scalar(s) => Some(s),
            Contracted::Tensor(_) => None,
        }
    }

    pub fn into_tensor(self) -> Tensor {
        match self {
            Contracted::Scalar(s) => Tensor::scalar(s),
            Contracted::Tensor(t) => t,
        }
    }
}

fn read(handle: &TensorHandle) -> RwLockReadGuard<'_, Tensor> {
    handle.read().unwrap_or_else(|e| e.into_inner())
}

fn write(handle: &TensorHandle) -> RwLockWriteGuard<'_, Tensor> {
    handle.write().unwrap_or_else(|e| e.into_inner())
}

pub struct TensorNetwork {
    tensors: HashMap<TensorId, TensorHandle>,
    tag_map: HashMap<String, HashSet<TensorId>>,
    structure: Option<Structure>,
    idgen: Arc<IdGen>,
    cache: Arc<PathCache>,
}

impl TensorNetwork {
    /// Empty network with injected id generator and path cache.
    pub fn with_parts(idgen: Arc<IdGen>, cache: Arc<PathCache>) -> Self {
        Self {
            tensors: HashMap::new(),
            tag_map: HashMap::new(),
            structure: None,
            idgen,
            cache,
        }
    }

    pub fn new() -> Self {
        Self::with_parts(Arc::new(IdGen::new()), Arc::new(PathCache::default()))
    }

    /// Network owning copies of `tensors`.
    pub fn from_tensors(tensors: impl IntoIterator<Item = Tensor>) -> Self {
        let mut tn = Self::new();
        for t in tensors {
            tn.add_tensor(t);
        }
        tn
    }

    /// Network sharing the given handles virtually: edits through this
    /// network are visible wherever else the handles live.
    pub fn from_handles(handles: impl IntoIterator<Item = TensorHandle>) -> Self {
        let mut tn = Self::new();
        for h in handles {
            tn.add_handle(h);
        }
        tn
    }

    pub fn idgen(&self) -> &Arc<IdGen> {
        &self.idgen
    }

    pub fn path_cache(&self) -> &Arc<PathCache> {
        &self.cache
    }

    pub fn set_structure(&mut self, structure: Structure) {
        self.structure = Some(structure);
    }

    pub fn structure(&self) -> Option<&Structure> {
        self.structure.as_ref()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor ids in insertion order (ids are monotone).
    pub fn tids(&self) -> Vec<TensorId> {
        let mut tids: Vec<TensorId> = self.tensors.keys().copied().collect();
        tids.sort_unstable();
        tids
    }

    /// All tags present in the network, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tag_map.keys().cloned().collect();
        tags.sort_unstable();
        tags
    }

    pub fn handle(&self, tid: TensorId) -> Result<TensorHandle, NetworkError> {
        self.tensors
            .get(&tid)
            .cloned()
            .ok_or(NetworkError::UnknownTensor(tid.raw()))
    }

    /// Snapshot of one tensor.
    pub fn tensor(&self, tid: TensorId) -> Result<Tensor, NetworkError> {
        Ok(read(&self.handle(tid)?).clone())
    }

    fn link_tags(&mut self, tid: TensorId, tags: &TagSet) {
        for tag in tags.iter() {
            self.tag_map.entry(tag.to_string()).or_default().insert(tid);
        }
    }

    fn unlink_tags(&mut self, tid: TensorId, tags: &TagSet) {
        for tag in tags.iter() {
            if let Some(set) = self.tag_map.get_mut(tag) {
                set.remove(&tid);
                if set.is_empty() {
                    self.tag_map.remove(tag);
                }
            }
        }
    }

    pub fn add_tensor(&mut self, tensor: Tensor) -> TensorId {
        self.add_handle(Arc::new(RwLock::new(tensor)))
    }

    pub fn add_handle(&mut self, handle: TensorHandle) -> TensorId {
        let tid = self.idgen.next_id();
        let tags = read(&handle).tags().clone();
        self.tensors.insert(tid, handle);
        self.link_tags(tid, &tags);
        tid
    }

    /// Detach a tensor, returning its handle.
    pub fn remove_tensor(&mut self, tid: TensorId) -> Result<TensorHandle, NetworkError> {
        let handle = self
            .tensors
            .remove(&tid)
            .ok_or(NetworkError::UnknownTensor(tid.raw()))?;
        let tags = read(&handle).tags().clone();
        self.unlink_tags(tid, &tags);
        Ok(handle)
    }

    /// Mutate one tensor, keeping the tag index in sync with any tag
    /// changes the closure makes.
    pub fn modify_tensor<F>(&mut self, tid: TensorId, f: F) -> Result<(), NetworkError>
    where
        F: FnOnce(&mut Tensor) -> Result<(), crate::error::TensorError>,
    {
        let handle = self.handle(tid)?;
        let (old_tags, new_tags) = {
            let mut guard = write(&handle);
            let old = guard.tags().clone();
            f(&mut guard)?;
            (old, guard.tags().clone())
        };
        if old_tags != new_tags {
            self.unlink_tags(tid, &old_tags);
            self.link_tags(tid, &new_tags);
        }
        Ok(())
    }

    /// Map from index label to the ids of the tensors carrying it.
    pub fn ind_map(&self) -> HashMap<String, Vec<TensorId>> {
        let mut map: HashMap<String, Vec<TensorId>> = HashMap::new();
        for tid in self.tids() {
            for label in read(&self.tensors[&tid]).inds() {
                map.entry(label.clone()).or_default().push(tid);
            }
        }
        map
    }

    /// Indices appearing in exactly one tensor, in first-occurrence order.
    pub fn outer_inds(&self) -> Vec<String> {
        self.inds_with_count(|c| c == 1)
    }

    /// Bond indices, appearing in two tensors, in first-occurrence order.
    pub fn inner_inds(&self) -> Vec<String> {
        self.inds_with_count(|c| c >= 2)
    }

    fn inds_with_count(&self, pred: impl Fn(usize) -> bool) -> Vec<String> {
        let map = self.ind_map();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tid in self.tids() {
            for label in read(&self.tensors[&tid]).inds() {
                if seen.insert(label.clone()) && pred(map[label].len()) {
                    out.push(label.clone());
                }
            }
        }
        out
    }

    /// Every index must appear in at most two tensors.
    pub fn check(&self) -> Result<(), NetworkError> {
        for (label, tids) in self.ind_map() {
            if tids.len() > 2 {
                return Err(NetworkError::HyperIndex {
                    label,
                    count: tids.len(),
                });
            }
        }
        Ok(())
    }

    /// Largest bond dimension, if any bond exists.
    pub fn max_bond(&self) -> Option<usize> {
        let map = self.ind_map();
        let mut best = None;
        for (label, tids) in &map {
            if tids.len() >= 2 {
                if let Ok(d) = read(&self.tensors[&tids[0]]).ind_size(label) {
                    best = Some(best.map_or(d, |b: usize| b.max(d)));
                }
            }
        }
        best
    }

    pub fn is_complex(&self) -> bool {
        self.tensors.values().any(|h| read(h).is_complex())
    }

    /// Frobenius norm of the full network, contracted against its own
    /// conjugate instead of densifying first. Bond indices of the conjugate
    /// copy are relabeled so only the outer indices pair up.
    pub fn norm(&self) -> Result<f64, NetworkError> {
        if self.is_empty() {
            return Err(NetworkError::Empty);
        }
        let relabel: HashMap<String, String> = self
            .inner_inds()
            .into_iter()
            .map(|l| (l, self.idgen.next_bond()))
            .collect();

        let tids = self.tids();
        let mut operands: Vec<Tensor> = Vec::with_capacity(2 * tids.len());
        for tid in &tids {
            operands.push(read(&self.tensors[tid]).clone());
        }
        for tid in &tids {
            let t = read(&self.tensors[tid]);
            operands.push(t.conj().reindex(&relabel)?);
        }
        let refs: Vec<&Tensor> = operands.iter().collect();
        // Every index occurs exactly twice, so the result is a scalar.
        let n2 = contract_tensors(&refs, None, Some(&self.cache))?
            .item()
            .map_err(NetworkError::Tensor)?;
        Ok(n2.re().max(0.0).sqrt())
    }

    /// Complex conjugate of the network: a deep copy with every tensor
    /// conjugated, keeping index labels and tags.
    pub fn conj(&self) -> TensorNetwork {
        let tn = self.clone();
        for handle in tn.tensors.values() {
            let conjugated = read(handle).conj();
            *write(handle) = conjugated;
        }
        tn
    }

    /// Ids of tensors matching the tags.
    pub fn select_tids(&self, tags: &[&str], mode: TagMode) -> Vec<TensorId> {
        let mut out: Vec<TensorId> = self
            .tensors
            .iter()
            .filter(|(_, h)| {
                let t = read(h);
                match mode {
                    TagMode::All => t.tags().contains_all(tags.iter().copied()),
                    TagMode::Any => t.tags().contains_any(tags.iter().copied()),
                }
            })
            .map(|(tid, _)| *tid)
            .collect();
        out.sort_unstable();
        out
    }

    /// Virtual sub-network of the matching tensors, sharing handles,
    /// id generator and path cache with this network.
    pub fn select(&self, tags: &[&str], mode: TagMode) -> TensorNetwork {
        let mut sub = TensorNetwork::with_parts(Arc::clone(&self.idgen), Arc::clone(&self.cache));
        for tid in self.select_tids(tags, mode) {
            sub.add_handle(Arc::clone(&self.tensors[&tid]));
        }
        sub
    }

    /// Split into (matching, rest), both virtual views over this network's
    /// handles.
    pub fn partition(&self, tags: &[&str], mode: TagMode) -> (TensorNetwork, TensorNetwork) {
        let selected: HashSet<TensorId> = self.select_tids(tags, mode).into_iter().collect();
        let mut inside =
            TensorNetwork::with_parts(Arc::clone(&self.idgen), Arc::clone(&self.cache));
        let mut outside =
            TensorNetwork::with_parts(Arc::clone(&self.idgen), Arc::clone(&self.cache));
        for tid in self.tids() {
            let target = if selected.contains(&tid) {
                &mut inside
            } else {
                &mut outside
            };
            target.add_handle(Arc::clone(&self.tensors[&tid]));
        }
        (inside, outside)
    }

    /// Absorb a copy of `other`. Bond indices of either network that would
    /// collide with the other side are relabeled on the incoming copy;
    /// indices open on both sides become new bonds.
    pub fn add_network(&mut self, other: &TensorNetwork) -> Result<(), NetworkError> {
        let self_inds: HashSet<String> = self.ind_map().into_keys().collect();
        let self_inner: HashSet<String> = self.inner_inds().into_iter().collect();
        let other_inner: HashSet<String> = other.inner_inds().into_iter().collect();

        let mut relabel: HashMap<String, String> = HashMap::new();
        for label in other.ind_map().keys() {
            let collides = self_inds.contains(label)
                && (self_inner.contains(label) || other_inner.contains(label));
            if collides {
                relabel.insert(label.clone(), self.idgen.next_bond());
            }
        }
        if !relabel.is_empty() {
            log::debug!("merge relabels {} colliding bond indices", relabel.len());
        }

        for tid in other.tids() {
            let tensor = read(&other.tensors[&tid]).reindex(&relabel)?;
            self.add_tensor(tensor);
        }
        Ok(())
    }

    /// Rename indices across the whole network. The map is applied
    /// simultaneously per tensor, so swaps are safe.
    pub fn reindex(&mut self, map: &HashMap<String, String>) -> Result<(), NetworkError> {
        // Validate on snapshots first so a failure leaves the network
        // untouched.
        let tids = self.tids();
        let mut renamed = Vec::with_capacity(tids.len());
        for tid in &tids {
            renamed.push(read(&self.tensors[tid]).reindex(map)?);
        }
        for (tid, tensor) in tids.into_iter().zip(renamed) {
            *write(&self.tensors[&tid]) = tensor;
        }
        Ok(())
    }

    /// Rename tags across the whole network, keeping the tag index
    /// consistent.
    pub fn retag(&mut self, map: &HashMap<String, String>) {
        for handle in self.tensors.values() {
            write(handle).retag(map);
        }
        self.rebuild_tag_map();
    }

    fn rebuild_tag_map(&mut self) {
        let mut tag_map: HashMap<String, HashSet<TensorId>> = HashMap::new();
        for (tid, handle) in &self.tensors {
            for tag in read(handle).tags().iter() {
                tag_map.entry(tag.to_string()).or_default().insert(*tid);
            }
        }
        self.tag_map = tag_map;
    }

    /// Contract every tensor into one result, planning through the shared
    /// path cache.
    pub fn contract_all(&self, output: Option<&[&str]>) -> Result<Contracted, NetworkError> {
        if self.is_empty() {
            return Err(NetworkError::Empty);
        }
        let tids = self.tids();
        let guards: Vec<_> = tids.iter().map(|tid| read(&self.tensors[tid])).collect();
        let refs: Vec<&Tensor> = guards.iter().map(|g| &**g).collect();
        let result = contract_tensors(&refs, output, Some(&self.cache))?;
        Ok(if result.rank() == 0 {
            Contracted::Scalar(result.item().expect("rank-0 tensor"))
        } else {
            Contracted::Tensor(result)
        })
    }

    /// Contract the given tensors into a single one, in place. Indices
    /// connecting to the rest of the network survive as the new tensor's
    /// indices; its tags are the union of the contracted tensors' tags.
    pub fn contract_tids(&mut self, tids: &[TensorId]) -> Result<TensorId, NetworkError> {
        if tids.is_empty() {
            return Err(NetworkError::Empty);
        }
        if tids.len() == 1 {
            self.handle(tids[0])?;
            return Ok(tids[0]);
        }
        let snapshots: Vec<Tensor> = tids
            .iter()
            .map(|&tid| self.tensor(tid))
            .collect::<Result<_, _>>()?;
        let refs: Vec<&Tensor> = snapshots.iter().collect();
        let result = contract_tensors(&refs, None, Some(&self.cache))?;
        for &tid in tids {
            self.remove_tensor(tid)?;
        }
        Ok(self.add_tensor(result))
    }

    /// Contract all tensors matching the tags into one.
    pub fn contract_tags(
        &mut self,
        tags: &[&str],
        mode: TagMode,
    ) -> Result<TensorId, NetworkError> {
        let tids = self.select_tids(tags, mode);
        if tids.is_empty() {
            return Err(NetworkError::NoMatch {
                tags: tags.join(","),
            });
        }
        self.contract_tids(&tids)
    }

    /// Blockwise left-to-right contraction sweep over the site structure,
    /// optionally restricted to `[start, end)`. Negative bounds count back
    /// from `nsites`, so `(0, -1)` sweeps everything but the last site.
    pub fn contract_structured(
        &mut self,
        range: Option<(isize, isize)>,
    ) -> Result<(), NetworkError> {
        let structure = self.structure.clone().ok_or(NetworkError::NoStructure)?;
        let nsites = structure.nsites as isize;
        let (start, end) = range.unwrap_or((0, nsites));
        let resolve = |i: isize| (if i < 0 { i + nsites } else { i }).clamp(0, nsites) as usize;
        let (start, end) = (resolve(start), resolve(end));

        let present: Vec<usize> = (start..end)
            .filter(|&i| self.tag_map.contains_key(&structure.site_tag(i)))
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        let bsz = structure.bsz.max(1);
        let mut acc: Option<TensorId> = None;
        for block in present.chunks(bsz) {
            let mut tids: Vec<TensorId> = Vec::new();
            if let Some(prev) = acc {
                tids.push(prev);
            }
            for &site in block {
                let tag = structure.site_tag(site);
                for tid in self.select_tids(&[tag.as_str()], TagMode::Any) {
                    if !tids.contains(&tid) {
                        tids.push(tid);
                    }
                }
            }
            acc = Some(self.contract_tids(&tids)?);
        }
        Ok(())
    }

    /// Boundary indices of a tensor group: those open with respect to the
    /// group itself (whether bonds to the rest or network-outer), in
    /// first-occurrence order.
    fn group_boundary(&self, tids: &[TensorId]) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for tid in tids {
            for label in read(&self.tensors[tid]).inds() {
                let entry = counts.entry(label.clone()).or_insert(0);
                *entry += 1;
                if *entry == 1 {
                    order.push(label.clone());
                }
            }
        }
        order.into_iter().filter(|l| counts[l] == 1).collect()
    }

    /// Excise the tagged region, wiring its two boundary indices straight
    /// through. Valid only when the region has exactly two boundary indices
    /// of equal dimension.
    pub fn replace_with_identity(
        &mut self,
        tags: &[&str],
        mode: TagMode,
    ) -> Result<(), NetworkError> {
        let tids = self.select_tids(tags, mode);
        if tids.is_empty() {
            return Err(NetworkError::NoMatch {
                tags: tags.join(","),
            });
        }
        let boundary = self.group_boundary(&tids);
        if boundary.len() != 2 {
            return Err(NetworkError::BoundaryMismatch {
                boundary: boundary.join(","),
            });
        }
        let (la, lb) = (&boundary[0], &boundary[1]);
        let dim_of = |label: &String| -> Option<usize> {
            tids.iter()
                .find_map(|tid| read(&self.tensors[tid]).ind_size(label).ok())
        };
        if dim_of(la) != dim_of(lb) {
            return Err(NetworkError::BoundaryMismatch {
                boundary: boundary.join(","),
            });
        }

        for tid in &tids {
            self.remove_tensor(*tid)?;
        }

        let rest_inds: HashSet<String> = self.ind_map().into_keys().collect();
        let map: HashMap<String, String> = match (rest_inds.contains(la), rest_inds.contains(lb))
        {
            (true, true) => [(lb.clone(), la.clone())].into_iter().collect(),
            // Keep the network-outer name alive on the remaining side.
            (true, false) => [(la.clone(), lb.clone())].into_iter().collect(),
            (false, true) => [(lb.clone(), la.clone())].into_iter().collect(),
            (false, false) => HashMap::new(),
        };
        if !map.is_empty() {
            self.reindex(&map)?;
        }
        Ok(())
    }

    /// Replace the tagged region by a rank-limited factor pair `u | v`
    /// computed with a randomized SVD through the region's linear-operator
    /// view; the region is never contracted to a dense matrix.
    ///
    /// `left_inds` selects which boundary indices end up on `u`;
    /// `opts.max_bond` is required.
    pub fn replace_with_svd(
        &mut self,
        tags: &[&str],
        mode: TagMode,
        left_inds: &[&str],
        opts: &SplitOpts,
    ) -> Result<(), NetworkError> {
        let tids = self.select_tids(tags, mode);
        if tids.is_empty() {
            return Err(NetworkError::NoMatch {
                tags: tags.join(","),
            });
        }
        let boundary = self.group_boundary(&tids);
        for label in left_inds {
            if !boundary.iter().any(|b| b == label) {
                return Err(NetworkError::Decomp(DecompError::UnknownIndex {
                    label: label.to_string(),
                }));
            }
        }
        let upper: Vec<String> = left_inds.iter().map(|s| s.to_string()).collect();
        let lower: Vec<String> = boundary
            .iter()
            .filter(|l| !left_inds.contains(&l.as_str()))
            .cloned()
            .collect();

        let region: Vec<Tensor> = tids
            .iter()
            .map(|&tid| self.tensor(tid))
            .collect::<Result<_, _>>()?;
        let mut tags_union = TagSet::new();
        for t in &region {
            tags_union.extend_from(t.tags());
        }
        let complex = region.iter().any(Tensor::is_complex);
        let op = TnLinearOperator::new(region, upper.clone(), lower.clone())
            .map_err(NetworkError::Decomp)?;

        let (u, v) = if complex {
            replace_svd_factors::<Complex64>(&op, opts)?
        } else {
            replace_svd_factors::<f64>(&op, opts)?
        };

        let bond = opts
            .bond_label
            .clone()
            .unwrap_or_else(|| self.idgen.next_bond());
        let u_tensor = fold_factor(u, &upper, op.group_dims(true), &bond, true)?
            .with_tags(tags_union.clone());
        let v_tensor =
            fold_factor(v, &lower, op.group_dims(false), &bond, false)?.with_tags(tags_union);

        for tid in &tids {
            self.remove_tensor(*tid)?;
        }
        self.add_tensor(u_tensor);
        self.add_tensor(v_tensor);
        Ok(())
    }

    /// Compress the bond between the two uniquely tagged tensors. A
    /// zero-norm bond environment collapses the whole network to a single
    /// all-zero tensor over its outer indices.
    pub fn compress_between(
        &mut self,
        tags_a: &[&str],
        tags_b: &[&str],
        mode: TagMode,
        opts: &SplitOpts,
    ) -> Result<(), NetworkError> {
        let tid_a = self.unique_tid(tags_a, mode)?;
        let tid_b = self.unique_tid(tags_b, mode)?;

        let mut a = self.tensor(tid_a)?;
        let mut b = self.tensor(tid_b)?;
        match compress_bond(&mut a, &mut b, opts) {
            Ok(()) => {
                *write(&self.tensors[&tid_a]) = a;
                *write(&self.tensors[&tid_b]) = b;
                Ok(())
            }
            Err(DecompError::ZeroNorm) => {
                log::warn!("zero-norm bond environment, collapsing network to zero");
                self.collapse_to_zero();
                Ok(())
            }
            Err(e) => Err(NetworkError::Decomp(e)),
        }
    }

    /// Compress every bond in place, visiting each connected tensor pair
    /// once in id order. Pairs sharing several indices get them merged into
    /// one bond by the compression.
    pub fn compress_all(&mut self, opts: &SplitOpts) -> Result<(), NetworkError> {
        let mut pairs: Vec<(TensorId, TensorId)> = Vec::new();
        for tids in self.ind_map().into_values() {
            if let [a, b] = tids[..] {
                let pair = (a.min(b), a.max(b));
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        pairs.sort();
        for (tid_a, tid_b) in pairs {
            let mut a = self.tensor(tid_a)?;
            let mut b = self.tensor(tid_b)?;
            // An earlier compression in the sweep may have merged the bond
            // away already.
            if !a.inds().iter().any(|l| b.has_ind(l)) {
                continue;
            }
            compress_bond(&mut a, &mut b, opts).map_err(NetworkError::Decomp)?;
            *write(&self.tensors[&tid_a]) = a;
            *write(&self.tensors[&tid_b]) = b;
        }
        Ok(())
    }

    fn unique_tid(&self, tags: &[&str], mode: TagMode) -> Result<TensorId, NetworkError> {
        let tids = self.select_tids(tags, mode);
        match tids.len() {
            0 => Err(NetworkError::NoMatch {
                tags: tags.join(","),
            }),
            1 => Ok(tids[0]),
            n => Err(NetworkError::NotUnique {
                tags: tags.join(","),
                count: n,
            }),
        }
    }

    /// Replace all tensors by one all-zero tensor over the network's outer
    /// indices, keeping the union of all tags.
    fn collapse_to_zero(&mut self) {
        let outer = self.outer_inds();
        let map = self.ind_map();
        let dims: Vec<usize> = outer
            .iter()
            .map(|label| {
                let tid = map[label][0];
                read(&self.tensors[&tid]).ind_size(label).unwrap_or(1)
            })
            .collect();
        let mut tags = TagSet::new();
        for handle in self.tensors.values() {
            tags.extend_from(read(handle).tags());
        }
        self.tensors.clear();
        self.tag_map.clear();
        let zero = Tensor::new(Storage::zeros_f64(&dims), outer, tags)
            .expect("outer indices are distinct");
        self.add_tensor(zero);
    }
}

/// Run the randomized SVD over the operator view and absorb the spectrum
/// per the options, returning the row-major factor matrices.
fn replace_svd_factors<T: Element>(
    op: &TnLinearOperator,
    opts: &SplitOpts,
) -> Result<(FactorMat, FactorMat), NetworkError> {
    let k = opts.max_bond.ok_or(DecompError::MaxBondRequired)?;
    let mut rng = match opts.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let (u, s, vh) = linalg::rsvd::<T, _, _>(op, k, 2, 10, &mut rng)
        .map_err(NetworkError::Decomp)?;
    if s.first().copied().unwrap_or(0.0) <= 0.0 {
        return Err(NetworkError::Decomp(DecompError::ZeroNorm));
    }

    let keep = truncate_count(&s, opts);
    let s_kept = renormed_values(&s, keep);
    let (u, vh) = (
        mdarray::DTensor::<T, 2>::from_fn([MatFree::<T>::nrows(op), keep], |idx| {
            u[[idx[0], idx[1]]]
        }),
        mdarray::DTensor::<T, 2>::from_fn([keep, MatFree::<T>::ncols(op)], |idx| {
            vh[[idx[0], idx[1]]]
        }),
    );
    let (u, vh) = match opts.absorb {
        Absorb::Left => (linalg::scale_cols(&u, &s_kept), vh),
        Absorb::Right => (u, linalg::scale_rows(&vh, &s_kept)),
        Absorb::Both => {
            let sqrt_s: Vec<f64> = s_kept.iter().map(|x| x.sqrt()).collect();
            (
                linalg::scale_cols(&u, &sqrt_s),
                linalg::scale_rows(&vh, &sqrt_s),
            )
        }
    };
    Ok((FactorMat::from_dtensor(u), FactorMat::from_dtensor(vh)))
}

/// Row-major factor matrix erased of its element type.
struct FactorMat {
    rows: usize,
    cols: usize,
    storage: Storage,
}

impl FactorMat {
    fn from_dtensor<T: Element>(a: mdarray::DTensor<T, 2>) -> Self {
        let (rows, cols) = (a.dim(0), a.dim(1));
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(a[[i, j]]);
            }
        }
        Self {
            rows,
            cols,
            storage: T::wrap(DenseStorage::from_vec_with_shape(data, &[rows, cols])),
        }
    }
}

/// Fold a factor matrix back into a tensor: rows span `group_dims`, columns
/// the bond (or the reverse for the right factor).
fn fold_factor(
    factor: FactorMat,
    group: &[String],
    group_dims: &[usize],
    bond: &str,
    bond_last: bool,
) -> Result<Tensor, NetworkError> {
    let (dims, inds): (Vec<usize>, Vec<String>) = if bond_last {
        let mut d = group_dims.to_vec();
        d.push(factor.cols);
        let mut i = group.to_vec();
        i.push(bond.to_string());
        (d, i)
    } else {
        let mut d = vec![factor.rows];
        d.extend_from_slice(group_dims);
        let mut i = vec![bond.to_string()];
        i.extend_from_slice(group);
        (d, i)
    };
    let storage = factor.storage.reshape(&dims);
    Tensor::new(storage, inds, TagSet::new()).map_err(NetworkError::Tensor)
}

impl Clone for TensorNetwork {
    /// Deep copy: the clone owns fresh handles, so later edits on either
    /// side stay local. The id generator and path cache stay shared.
    fn clone(&self) -> Self {
        let mut tn = TensorNetwork::with_parts(Arc::clone(&self.idgen), Arc::clone(&self.cache));
        tn.structure = self.structure.clone();
        for tid in self.tids() {
            tn.add_tensor(read(&self.tensors[&tid]).clone());
        }
        tn
    }
}

impl Default for TensorNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TensorNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "TensorNetwork(tensors={}, outer=[{}], max_bond={:?})",
            self.len(),
            self.outer_inds().join(","),
            self.max_bond()
        )?;
        for tid in self.tids() {
            writeln!(f, "  {}: {}", tid, read(&self.tensors[&tid]))?;
        }
        Ok(())
    }
}
