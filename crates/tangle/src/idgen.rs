//! Tensor ids and fresh bond labels.
//!
//! Every tensor handle in a network is keyed by a [`TensorId`], and freshly
//! created bonds get labels that cannot collide with user indices. Both come
//! from an [`IdGen`], which is injectable so tests and reproducible runs can
//! seed it; code that does not care uses the process-wide generator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Opaque identity of a tensor within networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{:x}", self.0)
    }
}

/// Monotone id source. The starting point is drawn from a seedable rng so
/// independently created generators rarely collide, while a fixed seed gives
/// fully reproducible ids and bond labels.
#[derive(Debug)]
pub struct IdGen {
    next: AtomicU64,
}

impl IdGen {
    /// Generator with a random starting point.
    pub fn new() -> Self {
        Self::from_seed(rand::thread_rng().gen())
    }

    /// Deterministic generator.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        // Leave headroom so the counter never wraps in practice.
        let start: u64 = rng.gen::<u64>() >> 16;
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next_id(&self) -> TensorId {
        TensorId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Fresh bond label. The `_b` prefix marks machine-generated indices.
    pub fn next_bond(&self) -> String {
        format!("_b{:x}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide generator used when none is injected.
pub fn global() -> &'static IdGen {
    static GLOBAL: OnceLock<IdGen> = OnceLock::new();
    GLOBAL.get_or_init(IdGen::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_generator_is_reproducible() {
        let a = IdGen::from_seed(7);
        let b = IdGen::from_seed(7);
        assert_eq!(a.next_id(), b.next_id());
        assert_eq!(a.next_bond(), b.next_bond());
    }

    #[test]
    fn ids_are_distinct() {
        let gen = IdGen::from_seed(0);
        let x = gen.next_id();
        let y = gen.next_id();
        assert_ne!(x, y);
    }

    #[test]
    fn bond_labels_carry_prefix() {
        assert!(IdGen::from_seed(1).next_bond().starts_with("_b"));
    }
}
