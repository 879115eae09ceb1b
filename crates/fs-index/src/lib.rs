#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use fs_types::{Address, AddressRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Capabilities every index key must have: equality, hashing, cloning and a
/// debug rendering for error messages. A total order is optional and carried
/// separately by [`KeyOps`].
pub trait Key: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> Key for T {}

/// Capability record for a key type: an optional partial comparator.
///
/// `try_cmp` returning `None` models a failed comparison (e.g. a tuple with
/// an incomparable component); callers degrade to unordered behavior instead
/// of propagating a panic.
#[derive(Clone)]
pub struct KeyOps<K> {
    cmp: Option<Arc<dyn Fn(&K, &K) -> Option<Ordering> + Send + Sync>>,
}

impl<K> KeyOps<K> {
    /// Comparator backed by the key type's `PartialOrd`.
    #[must_use]
    pub fn partial_order() -> Self
    where
        K: PartialOrd,
    {
        Self {
            cmp: Some(Arc::new(|a: &K, b: &K| a.partial_cmp(b))),
        }
    }

    /// Caller-supplied comparator.
    #[must_use]
    pub fn by(cmp: impl Fn(&K, &K) -> Option<Ordering> + Send + Sync + 'static) -> Self {
        Self {
            cmp: Some(Arc::new(cmp)),
        }
    }

    /// Key type with no usable order; every comparison fails.
    #[must_use]
    pub fn unordered() -> Self {
        Self { cmp: None }
    }

    #[must_use]
    pub fn is_orderable(&self) -> bool {
        self.cmp.is_some()
    }

    #[must_use]
    pub fn try_cmp(&self, left: &K, right: &K) -> Option<Ordering> {
        self.cmp.as_ref().and_then(|cmp| cmp(left, right))
    }
}

impl<K> fmt::Debug for KeyOps<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOps")
            .field("orderable", &self.is_orderable())
            .finish()
    }
}

/// Lookup semantics: exact hit, or nearest key below/above the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    #[default]
    Exact,
    NearestSmaller,
    NearestGreater,
}

/// Custom key predicate used by `lookup_level`-style filtering.
pub trait KeyMatcher<K> {
    fn matches(&self, key: &K) -> bool;
}

impl<K, F: Fn(&K) -> bool> KeyMatcher<K> for F {
    fn matches(&self, key: &K) -> bool {
        self(key)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("duplicate key {key} cannot be inserted into an index")]
    DuplicateKey { key: String },
    #[error("key {key} was not found in the index")]
    KeyNotFound { key: String },
    #[error("operation requires an ordered index")]
    UnorderedIndex,
    #[error("operation is undefined for an empty index")]
    EmptyIndex,
}

impl IndexError {
    pub(crate) fn duplicate_key<K: fmt::Debug>(key: &K) -> Self {
        Self::DuplicateKey {
            key: format!("{key:?}"),
        }
    }

    pub fn key_not_found<K: fmt::Debug>(key: &K) -> Self {
        Self::KeyNotFound {
            key: format!("{key:?}"),
        }
    }
}

/// Bijection between a key space and the contiguous address space `[0, N)`.
///
/// Immutable after construction: every "mutating" operation on the builder
/// returns a fresh index. Orderedness is either supplied by the caller or
/// detected lazily on first use; detection never fails, it degrades to
/// `false` when the comparator cannot rank a key pair.
#[derive(Debug, Clone)]
pub struct Index<K: Key> {
    keys: Vec<K>,
    lookup: HashMap<K, Address>,
    ops: KeyOps<K>,
    ordered: OnceLock<bool>,
}

impl<K: Key> PartialEq for Index<K> {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl<K: Key> Eq for Index<K> {}

fn build_lookup<K: Key>(keys: &[K]) -> Result<HashMap<K, Address>, IndexError> {
    let mut lookup = HashMap::with_capacity(keys.len());
    for (offset, key) in keys.iter().enumerate() {
        if lookup.insert(key.clone(), Address::new(offset)).is_some() {
            return Err(IndexError::duplicate_key(key));
        }
    }
    Ok(lookup)
}

impl<K: Key> Index<K> {
    /// Index over keys with the default `PartialOrd` comparator.
    pub fn from_keys(keys: Vec<K>) -> Result<Self, IndexError>
    where
        K: PartialOrd,
    {
        Self::with_ops(keys, KeyOps::partial_order())
    }

    /// Index over keys with an explicit capability record; orderedness is
    /// detected lazily.
    pub fn with_ops(keys: Vec<K>, ops: KeyOps<K>) -> Result<Self, IndexError> {
        let lookup = build_lookup(&keys)?;
        Ok(Self {
            keys,
            lookup,
            ops,
            ordered: OnceLock::new(),
        })
    }

    /// Index over keys with a caller-supplied ordering flag; the lazy
    /// detector never runs.
    pub fn with_ordered(keys: Vec<K>, ops: KeyOps<K>, ordered: bool) -> Result<Self, IndexError> {
        let index = Self::with_ops(keys, ops)?;
        let _ = index.ordered.set(ordered);
        Ok(index)
    }

    #[must_use]
    pub fn empty(ops: KeyOps<K>) -> Self {
        let index = Self {
            keys: Vec::new(),
            lookup: HashMap::new(),
            ops,
            ordered: OnceLock::new(),
        };
        let _ = index.ordered.set(true);
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[must_use]
    pub fn comparer(&self) -> &KeyOps<K> {
        &self.ops
    }

    /// Key–address pairs in address order.
    pub fn mappings(&self) -> impl Iterator<Item = (&K, Address)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(offset, key)| (key, Address::new(offset)))
    }

    /// The full address range of this index; `None` when empty.
    #[must_use]
    pub fn range(&self) -> Option<AddressRange> {
        AddressRange::of_length(self.keys.len())
    }

    #[must_use]
    pub fn key_at(&self, address: Address) -> Option<&K> {
        self.keys.get(address.offset())
    }

    /// Exact table hit, ignoring any check predicate.
    #[must_use]
    pub fn address_of(&self, key: &K) -> Option<Address> {
        self.lookup.get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.lookup.contains_key(key)
    }

    /// Whether keys are non-decreasing under the comparator. Detected lazily
    /// and memoized; a failed comparison yields `false` rather than an error.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        *self.ordered.get_or_init(|| {
            let ordered = self.detect_ordered();
            debug!(len = self.keys.len(), ordered, "detected index key ordering");
            ordered
        })
    }

    fn detect_ordered(&self) -> bool {
        if !self.ops.is_orderable() {
            return false;
        }
        self.keys.windows(2).all(|pair| {
            matches!(
                self.ops.try_cmp(&pair[0], &pair[1]),
                Some(Ordering::Less | Ordering::Equal)
            )
        })
    }

    /// First and last key. Only defined for an ordered, non-empty index.
    pub fn key_range(&self) -> Result<(&K, &K), IndexError> {
        if !self.is_ordered() {
            return Err(IndexError::UnorderedIndex);
        }
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => Ok((first, last)),
            _ => Err(IndexError::EmptyIndex),
        }
    }

    /// Find a key under the given semantics, skipping addresses rejected by
    /// `check`. The returned key is the key actually found, which may differ
    /// from the queried key under nearest semantics.
    pub fn lookup(
        &self,
        key: &K,
        semantics: Lookup,
        check: impl Fn(Address) -> bool,
    ) -> Option<(K, Address)> {
        if let Some(address) = self.address_of(key) {
            if check(address) {
                return Some((key.clone(), address));
            }
            if semantics == Lookup::Exact {
                return None;
            }
        } else if semantics == Lookup::Exact {
            return None;
        }

        // Nearest semantics on a miss (or a hit whose check failed) need a
        // binary search, which needs ordered keys.
        if !self.is_ordered() {
            return None;
        }

        match semantics {
            Lookup::Exact => None,
            Lookup::NearestSmaller => {
                let start = self.position_of_largest_not_above(key)?;
                (0..=start).rev().map(Address::new).find_map(|address| {
                    check(address).then(|| (self.keys[address.offset()].clone(), address))
                })
            }
            Lookup::NearestGreater => {
                let start = self.position_of_smallest_not_below(key)?;
                (start..self.keys.len())
                    .map(Address::new)
                    .find_map(|address| {
                        check(address).then(|| (self.keys[address.offset()].clone(), address))
                    })
            }
        }
    }

    /// Position of the largest key `<= target`; `None` when every key is
    /// greater, or when a comparison fails.
    fn position_of_largest_not_above(&self, target: &K) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.ops.try_cmp(&self.keys[mid], target)? {
                Ordering::Greater => hi = mid,
                Ordering::Less | Ordering::Equal => lo = mid + 1,
            }
        }
        lo.checked_sub(1)
    }

    /// Position of the smallest key `>= target`; `None` when every key is
    /// smaller, or when a comparison fails.
    fn position_of_smallest_not_below(&self, target: &K) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.keys.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.ops.try_cmp(&self.keys[mid], target)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater | Ordering::Equal => hi = mid,
            }
        }
        (lo < self.keys.len()).then_some(lo)
    }
}
