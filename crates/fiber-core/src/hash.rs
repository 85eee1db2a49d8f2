//! Hashing shared by the reconciler: fiber bookkeeping maps, derived keys
//! and hook dependency fingerprints.
//!
//! The `std-hash` feature swaps `ahash`/`hashbrown` for the standard
//! library types.

use std::hash::{Hash, Hasher};

#[cfg(feature = "std-hash")]
mod imp {
    pub use std::collections::hash_map::DefaultHasher as FiberHasher;
    pub use std::collections::{HashMap, HashSet};

    pub fn hasher() -> FiberHasher {
        FiberHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
mod imp {
    pub use ahash::AHasher as FiberHasher;
    pub use hashbrown::{HashMap, HashSet};

    pub fn hasher() -> FiberHasher {
        FiberHasher::default()
    }
}

pub use imp::{FiberHasher, HashMap, HashSet};

#[inline]
pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut h = imp::hasher();
    value.hash(&mut h);
    h.finish()
}

/// Fingerprint of an effect or memo dependency value.
///
/// Hooks compare fingerprints between renders instead of storing the
/// dependency itself, so `D` only needs `Hash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepsHash(u64);

impl DepsHash {
    pub fn of<D: Hash + ?Sized>(deps: &D) -> Self {
        DepsHash(hash_one(deps))
    }

    /// Whether two optional dependency lists count as unchanged. A missing
    /// list on either side always means "changed".
    pub fn unchanged(prev: Option<DepsHash>, next: Option<DepsHash>) -> bool {
        matches!((prev, next), (Some(a), Some(b)) if a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_deps_never_match() {
        let a = DepsHash::of(&(1, "x"));
        assert!(DepsHash::unchanged(Some(a), Some(DepsHash::of(&(1, "x")))));
        assert!(!DepsHash::unchanged(Some(a), Some(DepsHash::of(&(2, "x")))));
        assert!(!DepsHash::unchanged(None, Some(a)));
        assert!(!DepsHash::unchanged(None, None));
    }
}
