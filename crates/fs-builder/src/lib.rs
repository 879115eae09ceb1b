#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use fs_align::{
    AlignError, Joint, Segment, SegmentKind, Window, align_ordered, align_unordered, chunked_size,
    chunked_using, chunked_while, windowed_size, windowed_while,
};
use fs_index::{Index, IndexError, Key, KeyMatcher, KeyOps, Lookup};
use fs_types::{Address, AddressRange, Boundary, BoundaryBehavior, Direction};
use fs_vector::{Transform, VectorBuilder, VectorPlan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Comparison(#[from] AlignError),
}

/// Join flavors offered to the series layer; each reduces to an alignment of
/// the two key sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Outer,
    Left,
    Right,
}

/// How an ordered key sequence is cut into windows or chunks before the
/// per-segment selectors run.
pub enum Aggregation<K> {
    WindowSize(usize, Boundary),
    ChunkSize(usize, Boundary),
    WindowWhile(Box<dyn Fn(&K, &K) -> bool + Send + Sync>),
    ChunkWhile(Box<dyn Fn(&K, &K) -> bool + Send + Sync>),
}

impl<K> Aggregation<K> {
    #[must_use]
    pub fn window_while(cond: impl Fn(&K, &K) -> bool + Send + Sync + 'static) -> Self {
        Self::WindowWhile(Box::new(cond))
    }

    #[must_use]
    pub fn chunk_while(cond: impl Fn(&K, &K) -> bool + Send + Sync + 'static) -> Self {
        Self::ChunkWhile(Box::new(cond))
    }
}

impl<K> fmt::Debug for Aggregation<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowSize(size, boundary) => {
                f.debug_tuple("WindowSize").field(size).field(boundary).finish()
            }
            Self::ChunkSize(size, boundary) => {
                f.debug_tuple("ChunkSize").field(size).field(boundary).finish()
            }
            Self::WindowWhile(_) => f.write_str("WindowWhile(..)"),
            Self::ChunkWhile(_) => f.write_str("ChunkWhile(..)"),
        }
    }
}

/// Builds new indices together with the vector-relocation plans that keep
/// keys and values aligned.
///
/// Stateless apart from the vector-builder factory, which only the aggregate
/// family uses (to materialize per-chunk cells into a vector).
#[derive(Debug, Clone)]
pub struct IndexBuilder<B> {
    vectors: B,
}

fn relocation<V: Clone>(
    source: &VectorPlan<V>,
    range: Option<AddressRange>,
    pairs: Vec<(Address, Address)>,
) -> VectorPlan<V> {
    match range {
        Some(range) => VectorPlan::relocate(source.clone(), range, pairs),
        None => VectorPlan::Empty,
    }
}

fn key_address_pairs<K: Key>(index: &Index<K>) -> Vec<(K, Address)> {
    index
        .mappings()
        .map(|(key, address)| (key.clone(), address))
        .collect()
}

impl<B: VectorBuilder> IndexBuilder<B> {
    pub fn new(vectors: B) -> Self {
        Self { vectors }
    }

    #[must_use]
    pub fn vector_builder(&self) -> &B {
        &self.vectors
    }

    /// Fresh index over the given keys; ordering detected lazily unless the
    /// caller supplies the flag.
    pub fn create<K>(&self, keys: Vec<K>, ordered: Option<bool>) -> Result<Index<K>, BuilderError>
    where
        K: Key + PartialOrd,
    {
        let ops = KeyOps::partial_order();
        let index = match ordered {
            Some(flag) => Index::with_ordered(keys, ops, flag)?,
            None => Index::with_ops(keys, ops)?,
        };
        Ok(index)
    }

    /// Linear indices are already fully evaluated; projection is the
    /// identity.
    #[must_use]
    pub fn project<K: Key>(&self, index: &Index<K>) -> Index<K> {
        index.clone()
    }

    /// Stable-sort the keys and emit the relocation gathering each value to
    /// its new address.
    pub fn order<K: Key, V: Clone>(
        &self,
        index: &Index<K>,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        let ops = index.comparer().clone();
        let failed: RefCell<Option<(String, String)>> = RefCell::new(None);
        let mut sorted = index.keys().to_vec();
        sorted.sort_by(|a, b| match ops.try_cmp(a, b) {
            Some(ordering) => ordering,
            None => {
                failed
                    .borrow_mut()
                    .get_or_insert_with(|| (format!("{a:?}"), format!("{b:?}")));
                Ordering::Equal
            }
        });
        if let Some((left, right)) = failed.into_inner() {
            return Err(AlignError::ComparisonFailed { left, right }.into());
        }

        let ordered = Index::with_ordered(sorted, ops, true)?;
        let pairs = index
            .mappings()
            .map(|(key, old_address)| {
                let (_, new_address) = ordered
                    .lookup(key, Lookup::Exact, |_| true)
                    .expect("ordered index must contain every source key");
                (new_address, old_address)
            })
            .collect();
        let plan = relocation(plan, ordered.range(), pairs);
        Ok((ordered, plan))
    }

    /// Merge both key sets into one index plus a relocation per side.
    /// Ordered inputs go through the ordered merge; a comparator failure (or
    /// an unordered input) degrades to the order-free concatenation.
    pub fn union<K: Key, V: Clone>(
        &self,
        left: (&Index<K>, &VectorPlan<V>),
        right: (&Index<K>, &VectorPlan<V>),
    ) -> Result<(Index<K>, VectorPlan<V>, VectorPlan<V>), BuilderError> {
        let (joints, ordered) = Self::aligned(left.0, right.0);
        self.assemble_merge(left, right, &joints, ordered)
    }

    /// Union alignment with both relocations folded into a single
    /// per-cell combine.
    pub fn append<K: Key, V: Clone>(
        &self,
        left: (&Index<K>, &VectorPlan<V>),
        right: (&Index<K>, &VectorPlan<V>),
        transform: Transform,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        let (index, left_plan, right_plan) = self.union(left, right)?;
        Ok((index, VectorPlan::combine(left_plan, right_plan, transform)))
    }

    /// Keep only keys present on both sides.
    pub fn intersect<K: Key, V: Clone>(
        &self,
        left: (&Index<K>, &VectorPlan<V>),
        right: (&Index<K>, &VectorPlan<V>),
    ) -> Result<(Index<K>, VectorPlan<V>, VectorPlan<V>), BuilderError> {
        let (joints, ordered) = Self::aligned(left.0, right.0);
        let both: Vec<Joint<K>> = joints
            .into_iter()
            .filter(|joint| joint.left.is_some() && joint.right.is_some())
            .collect();
        self.assemble_merge(left, right, &both, ordered)
    }

    /// Series-level join dispatch: `Outer` is the union, `Inner` the
    /// intersection, `Left`/`Right` anchor one side and gather the other
    /// through exact lookups.
    pub fn join<K: Key, V: Clone>(
        &self,
        left: (&Index<K>, &VectorPlan<V>),
        right: (&Index<K>, &VectorPlan<V>),
        kind: JoinKind,
    ) -> Result<(Index<K>, VectorPlan<V>, VectorPlan<V>), BuilderError> {
        match kind {
            JoinKind::Outer => self.union(left, right),
            JoinKind::Inner => self.intersect(left, right),
            JoinKind::Left => Ok(Self::anchored(left, right)),
            JoinKind::Right => {
                let (index, right_plan, left_plan) = Self::anchored(right, left);
                Ok((index, left_plan, right_plan))
            }
        }
    }

    /// Rebuild an index from a per-address key selector, keeping only rows
    /// whose selector produces a key. The result is unordered.
    pub fn with_index<K, K2, V>(
        &self,
        index: &Index<K>,
        selector: impl Fn(Address) -> Option<K2>,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K2>, VectorPlan<V>), BuilderError>
    where
        K: Key,
        K2: Key + PartialOrd,
        V: Clone,
    {
        let mut keys = Vec::new();
        let mut sources = Vec::new();
        for (_, address) in index.mappings() {
            if let Some(key) = selector(address) {
                keys.push(key);
                sources.push(address);
            }
        }
        let reindexed = Index::with_ordered(keys, KeyOps::partial_order(), false)?;
        let pairs = sources
            .into_iter()
            .enumerate()
            .map(|(target, source)| (Address::new(target), source))
            .collect();
        let plan = relocation(plan, reindexed.range(), pairs);
        Ok((reindexed, plan))
    }

    /// Plan that rearranges `source`'s values into `target`'s address space:
    /// each target key is looked up in `source` under the given semantics,
    /// and unmatched targets stay missing. The index of the result is
    /// `target` itself, so only the plan is returned.
    pub fn reindex<K: Key, V: Clone>(
        &self,
        source: &Index<K>,
        target: &Index<K>,
        semantics: Lookup,
        plan: &VectorPlan<V>,
        check: impl Fn(Address) -> bool,
    ) -> VectorPlan<V> {
        let pairs = target
            .mappings()
            .filter_map(|(key, target_address)| {
                source
                    .lookup(key, semantics, &check)
                    .map(|(_, source_address)| (target_address, source_address))
            })
            .collect();
        relocation(plan, target.range(), pairs)
    }

    /// Keep only keys accepted by the matcher, re-addressed from zero.
    pub fn lookup_level<K: Key, V: Clone>(
        &self,
        index: &Index<K>,
        matcher: &impl KeyMatcher<K>,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        let mut keys = Vec::new();
        let mut sources = Vec::new();
        for (key, address) in index.mappings() {
            if matcher.matches(key) {
                keys.push(key.clone());
                sources.push(address);
            }
        }
        let filtered = Index::with_ordered(keys, index.comparer().clone(), index.is_ordered())?;
        let pairs = sources
            .into_iter()
            .enumerate()
            .map(|(target, source)| (Address::new(target), source))
            .collect();
        let plan = relocation(plan, filtered.range(), pairs);
        Ok((filtered, plan))
    }

    /// Remove a single key, dropping its address from the vector.
    pub fn drop_item<K: Key, V: Clone>(
        &self,
        index: &Index<K>,
        key: &K,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        let address = index
            .address_of(key)
            .ok_or_else(|| IndexError::key_not_found(key))?;
        let keys = index
            .keys()
            .iter()
            .filter(|candidate| *candidate != key)
            .cloned()
            .collect();
        let remaining = Index::with_ordered(keys, index.comparer().clone(), index.is_ordered())?;
        let plan = VectorPlan::drop_range(plan.clone(), AddressRange::new(address, address));
        Ok((remaining, plan))
    }

    /// Slice between two optional key bounds. Bounds resolve through nearest
    /// lookups, so they need not be present; a bound that resolves past the
    /// other end yields the empty index and an `Empty` plan.
    pub fn get_range<K: Key, V: Clone>(
        &self,
        index: &Index<K>,
        lower: Option<(&K, BoundaryBehavior)>,
        upper: Option<(&K, BoundaryBehavior)>,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        if index.is_empty() {
            return Ok(Self::empty_result(index));
        }

        let lower_address = match lower {
            None => Address::new(0),
            Some((key, behavior)) => {
                match index.lookup(key, Lookup::NearestGreater, |_| true) {
                    None => return Ok(Self::empty_result(index)),
                    Some((_, address)) => match behavior {
                        BoundaryBehavior::Inclusive => address,
                        BoundaryBehavior::Exclusive => address.increment(),
                    },
                }
            }
        };
        let upper_address = match upper {
            None => Address::new(index.len() - 1),
            Some((key, behavior)) => {
                match index.lookup(key, Lookup::NearestSmaller, |_| true) {
                    None => return Ok(Self::empty_result(index)),
                    Some((_, address)) => match behavior {
                        BoundaryBehavior::Inclusive => address,
                        BoundaryBehavior::Exclusive => match address.decrement() {
                            Some(address) => address,
                            None => return Ok(Self::empty_result(index)),
                        },
                    },
                }
            }
        };
        if lower_address > upper_address {
            return Ok(Self::empty_result(index));
        }

        let window = Window::new(
            lower_address.offset(),
            upper_address.offset() - lower_address.offset() + 1,
        );
        Self::slice(index, window, plan)
    }

    /// Cut an ordered index into windows or chunks and collapse each segment
    /// through the selectors; the cells are materialized through the
    /// vector-builder factory.
    pub fn aggregate<K, K2, V, R>(
        &self,
        index: &Index<K>,
        aggregation: &Aggregation<K>,
        plan: &VectorPlan<V>,
        key_sel: impl Fn(SegmentKind, &Index<K>, &VectorPlan<V>) -> K2,
        value_sel: impl Fn(SegmentKind, &Index<K>, &VectorPlan<V>) -> Option<R>,
    ) -> Result<(Index<K2>, B::Vector<R>), BuilderError>
    where
        K: Key,
        K2: Key + PartialOrd,
        V: Clone,
        R: Clone,
    {
        if !index.is_ordered() {
            return Err(IndexError::UnorderedIndex.into());
        }

        let segments: Vec<Segment<Window>> = match aggregation {
            Aggregation::WindowSize(size, boundary) => {
                windowed_size(index.len(), *size, *boundary).collect()
            }
            Aggregation::ChunkSize(size, boundary) => {
                chunked_size(index.len(), *size, *boundary).collect()
            }
            Aggregation::WindowWhile(cond) => {
                windowed_while(index.keys(), |first, current| cond(first, current)).collect()
            }
            Aggregation::ChunkWhile(cond) => {
                chunked_while(index.keys(), |first, current| cond(first, current)).collect()
            }
        };

        let mut keys = Vec::with_capacity(segments.len());
        let mut cells = Vec::with_capacity(segments.len());
        for segment in segments {
            let (sub_index, sub_plan) = Self::slice(index, segment.data, plan)?;
            keys.push(key_sel(segment.kind, &sub_index, &sub_plan));
            cells.push(value_sel(segment.kind, &sub_index, &sub_plan));
        }

        let aggregated = Index::with_ordered(keys, KeyOps::partial_order(), false)?;
        Ok((aggregated, self.vectors.create_missing(cells)))
    }

    /// Partition addresses by a key selector, preserving first-occurrence
    /// group order, and collapse each group through `value_sel`.
    pub fn group_by<K, K2, V, R>(
        &self,
        index: &Index<K>,
        key_sel: impl Fn(&K) -> Option<K2>,
        plan: &VectorPlan<V>,
        value_sel: impl Fn(&K2, &Index<K>, &VectorPlan<V>) -> Option<R>,
    ) -> Result<(Index<K2>, B::Vector<R>), BuilderError>
    where
        K: Key,
        K2: Key + PartialOrd,
        V: Clone,
        R: Clone,
    {
        let mut order: Vec<K2> = Vec::new();
        let mut groups: HashMap<K2, Vec<(K, Address)>> = HashMap::new();
        for (key, address) in index.mappings() {
            if let Some(group_key) = key_sel(key) {
                let members = groups.entry(group_key.clone()).or_insert_with(|| {
                    order.push(group_key.clone());
                    Vec::new()
                });
                members.push((key.clone(), address));
            }
        }

        let mut cells = Vec::with_capacity(order.len());
        for group_key in &order {
            let members = &groups[group_key];
            let keys: Vec<K> = members.iter().map(|(key, _)| key.clone()).collect();
            let sub_index = Index::with_ops(keys, index.comparer().clone())?;
            let pairs = members
                .iter()
                .enumerate()
                .map(|(target, (_, source))| (Address::new(target), *source))
                .collect();
            let sub_plan = relocation(plan, sub_index.range(), pairs);
            cells.push(value_sel(group_key, &sub_index, &sub_plan));
        }

        let grouped = Index::with_ordered(order, KeyOps::partial_order(), false)?;
        Ok((grouped, self.vectors.create_missing(cells)))
    }

    /// Re-key an ordered index onto a sorted marker sequence: one output row
    /// per marker, each collapsing the chunk of keys the marker bounds from
    /// below (`Forward`) or above (`Backward`).
    pub fn resample<K, K2, V, R>(
        &self,
        index: &Index<K>,
        markers: &[K],
        direction: Direction,
        plan: &VectorPlan<V>,
        key_sel: impl Fn(SegmentKind, &K, &Index<K>, &VectorPlan<V>) -> K2,
        value_sel: impl Fn(SegmentKind, &K, &Index<K>, &VectorPlan<V>) -> Option<R>,
    ) -> Result<(Index<K2>, B::Vector<R>), BuilderError>
    where
        K: Key,
        K2: Key + PartialOrd,
        V: Clone,
        R: Clone,
    {
        if !index.is_ordered() {
            return Err(IndexError::UnorderedIndex.into());
        }

        let chunks = chunked_using(index.keys(), markers, direction, index.comparer())?;
        let mut keys = Vec::with_capacity(chunks.len());
        let mut cells = Vec::with_capacity(chunks.len());
        for (marker_index, segment) in chunks {
            let marker = &markers[marker_index];
            let (sub_index, sub_plan) = Self::slice(index, segment.data, plan)?;
            keys.push(key_sel(segment.kind, marker, &sub_index, &sub_plan));
            cells.push(value_sel(segment.kind, marker, &sub_index, &sub_plan));
        }

        let resampled = Index::with_ordered(keys, KeyOps::partial_order(), false)?;
        Ok((resampled, self.vectors.create_missing(cells)))
    }

    // ── Internal assembly ──────────────────────────────────────────────

    fn aligned<K: Key>(left: &Index<K>, right: &Index<K>) -> (Vec<Joint<K>>, bool) {
        let left_pairs = key_address_pairs(left);
        let right_pairs = key_address_pairs(right);
        if left.is_ordered() && right.is_ordered() {
            match align_ordered(&left_pairs, &right_pairs, left.comparer()) {
                Ok(joints) => return (joints, true),
                Err(error) => {
                    debug!(%error, "ordered merge failed, degrading to unordered alignment");
                }
            }
        }
        (align_unordered(&left_pairs, &right_pairs), false)
    }

    fn assemble_merge<K: Key, V: Clone>(
        &self,
        left: (&Index<K>, &VectorPlan<V>),
        right: (&Index<K>, &VectorPlan<V>),
        joints: &[Joint<K>],
        ordered: bool,
    ) -> Result<(Index<K>, VectorPlan<V>, VectorPlan<V>), BuilderError> {
        let mut keys = Vec::with_capacity(joints.len());
        let mut left_pairs = Vec::new();
        let mut right_pairs = Vec::new();
        for (target, joint) in joints.iter().enumerate() {
            keys.push(joint.key.clone());
            if let Some(source) = joint.left {
                left_pairs.push((Address::new(target), source));
            }
            if let Some(source) = joint.right {
                right_pairs.push((Address::new(target), source));
            }
        }

        let merged = Index::with_ordered(keys, left.0.comparer().clone(), ordered)?;
        let left_plan = relocation(left.1, merged.range(), left_pairs);
        let right_plan = relocation(right.1, merged.range(), right_pairs);
        Ok((merged, left_plan, right_plan))
    }

    /// One-sided alignment: the anchor keeps its index and plan, the other
    /// side is gathered into the anchor's address space by exact lookups.
    fn anchored<K: Key, V: Clone>(
        anchor: (&Index<K>, &VectorPlan<V>),
        other: (&Index<K>, &VectorPlan<V>),
    ) -> (Index<K>, VectorPlan<V>, VectorPlan<V>) {
        let pairs = anchor
            .0
            .mappings()
            .filter_map(|(key, target)| {
                other.0.address_of(key).map(|source| (target, source))
            })
            .collect();
        let other_plan = relocation(other.1, anchor.0.range(), pairs);
        (anchor.0.clone(), anchor.1.clone(), other_plan)
    }

    fn empty_result<K: Key, V: Clone>(index: &Index<K>) -> (Index<K>, VectorPlan<V>) {
        (Index::empty(index.comparer().clone()), VectorPlan::Empty)
    }

    fn slice<K: Key, V: Clone>(
        index: &Index<K>,
        window: Window,
        plan: &VectorPlan<V>,
    ) -> Result<(Index<K>, VectorPlan<V>), BuilderError> {
        let Some(last) = window.last() else {
            return Ok(Self::empty_result(index));
        };
        assert!(
            last < index.len(),
            "window must stay inside the index address space"
        );
        let keys = index.keys()[window.start..=last].to_vec();
        let sub = Index::with_ordered(keys, index.comparer().clone(), index.is_ordered())?;
        let range = AddressRange::new(Address::new(window.start), Address::new(last));
        Ok((sub, VectorPlan::get_range(plan.clone(), range)))
    }
}
