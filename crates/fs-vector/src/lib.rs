#![forbid(unsafe_code)]

use std::collections::HashSet;

use fs_types::{Address, AddressRange, Direction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-cell policy applied when two plans are combined into one vector.
///
/// Kept as closed data rather than a user closure so plans stay comparable
/// and serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Left cell wins when both sides are present.
    PreferLeft,
    /// Right cell wins when both sides are present.
    PreferRight,
    /// Both sides present is an evaluation error; conventional append default.
    #[default]
    ExactlyOne,
}

/// Policy for rewriting missing cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FillPolicy<V> {
    /// Replace every missing cell with the given value.
    Constant(V),
    /// Propagate the nearest preceding (`Forward`) or following (`Backward`)
    /// present cell into each run of missing cells.
    Direction(Direction),
}

/// Symbolic vector-construction expression.
///
/// A plan describes how to produce a result vector from input vectors by
/// permutation, slicing and combining. Plans are pure data: nothing here
/// evaluates anything, and the vector layer is free to re-optimize the tree
/// before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VectorPlan<V> {
    /// Input vector by slot number.
    Return { source: usize },
    /// The empty vector.
    Empty,
    /// Gather cells of the source into a vector spanning `range`: each pair
    /// `(target, source)` moves one cell; unlisted targets are missing.
    /// Caller contract: no duplicate targets, all pairs within `range`.
    Relocate {
        source: Box<VectorPlan<V>>,
        range: AddressRange,
        pairs: Vec<(Address, Address)>,
    },
    /// Contiguous slice of the source.
    GetRange {
        source: Box<VectorPlan<V>>,
        range: AddressRange,
    },
    /// The source with a contiguous slice removed.
    DropRange {
        source: Box<VectorPlan<V>>,
        range: AddressRange,
    },
    /// Binary merge of two plans under a per-cell transform.
    Combine {
        left: Box<VectorPlan<V>>,
        right: Box<VectorPlan<V>>,
        transform: Transform,
    },
    /// The source with missing cells rewritten by the policy.
    FillMissing {
        source: Box<VectorPlan<V>>,
        policy: FillPolicy<V>,
    },
}

impl<V> VectorPlan<V> {
    #[must_use]
    pub fn relocate(source: VectorPlan<V>, range: AddressRange, pairs: Vec<(Address, Address)>) -> Self {
        Self::Relocate {
            source: Box::new(source),
            range,
            pairs,
        }
    }

    #[must_use]
    pub fn get_range(source: VectorPlan<V>, range: AddressRange) -> Self {
        Self::GetRange {
            source: Box::new(source),
            range,
        }
    }

    #[must_use]
    pub fn drop_range(source: VectorPlan<V>, range: AddressRange) -> Self {
        Self::DropRange {
            source: Box::new(source),
            range,
        }
    }

    #[must_use]
    pub fn combine(left: VectorPlan<V>, right: VectorPlan<V>, transform: Transform) -> Self {
        Self::Combine {
            left: Box::new(left),
            right: Box::new(right),
            transform,
        }
    }

    #[must_use]
    pub fn fill_missing(source: VectorPlan<V>, policy: FillPolicy<V>) -> Self {
        Self::FillMissing {
            source: Box::new(source),
            policy,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("plan references input vector {slot} but only {available} inputs were supplied")]
    MissingInput { slot: usize, available: usize },
    #[error("relocation writes target address {address} more than once")]
    DuplicateTarget { address: Address },
    #[error("relocation target {address} falls outside the declared range {range}")]
    TargetOutOfRange { address: Address, range: AddressRange },
    #[error("address range {range} is out of bounds for a vector of length {len}")]
    RangeOutOfBounds { range: AddressRange, len: usize },
    #[error("combine under exactly_one found values on both sides at address {address}")]
    CombineConflict { address: Address },
}

/// Check the `Relocate` caller contract over a whole plan tree: no duplicate
/// target addresses, and every pair inside the declared range.
pub fn validate_plan<V>(plan: &VectorPlan<V>) -> Result<(), VectorError> {
    match plan {
        VectorPlan::Return { .. } | VectorPlan::Empty => Ok(()),
        VectorPlan::Relocate {
            source,
            range,
            pairs,
        } => {
            let mut seen = HashSet::with_capacity(pairs.len());
            for (target, _) in pairs {
                if !range.contains(*target) {
                    return Err(VectorError::TargetOutOfRange {
                        address: *target,
                        range: *range,
                    });
                }
                if !seen.insert(*target) {
                    return Err(VectorError::DuplicateTarget { address: *target });
                }
            }
            validate_plan(source)
        }
        VectorPlan::GetRange { source, .. } | VectorPlan::DropRange { source, .. } => {
            validate_plan(source)
        }
        VectorPlan::Combine { left, right, .. } => {
            validate_plan(left)?;
            validate_plan(right)
        }
        VectorPlan::FillMissing { source, .. } => validate_plan(source),
    }
}

/// Interface consumed from the vector layer.
///
/// The index builder never materializes data itself; it emits plans and, for
/// the aggregate family, hands per-chunk cells to `create_missing`. `build`
/// executes a plan against input vectors bound to `Return` slots.
pub trait VectorBuilder {
    type Vector<V: Clone>;

    fn create_missing<V: Clone>(&self, cells: Vec<Option<V>>) -> Self::Vector<V>;

    fn build<V: Clone>(
        &self,
        plan: &VectorPlan<V>,
        inputs: &[Self::Vector<V>],
    ) -> Result<Self::Vector<V>, VectorError>;
}
