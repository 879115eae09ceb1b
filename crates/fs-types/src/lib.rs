#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Offset into a backing data vector.
///
/// Addresses within a single index always form the contiguous range
/// `[0, N)` where `N` is the key count; the i-th key owns address `i`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Address(usize);

impl Address {
    #[must_use]
    pub fn new(offset: usize) -> Self {
        Self(offset)
    }

    #[must_use]
    pub fn offset(self) -> usize {
        self.0
    }

    #[must_use]
    pub fn increment(self) -> Self {
        Self(self.0 + 1)
    }

    /// Decrementing address 0 has no predecessor; callers treat `None`
    /// as a crossed bound.
    #[must_use]
    pub fn decrement(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl From<usize> for Address {
    fn from(offset: usize) -> Self {
        Self(offset)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive address range `[first, last]`.
///
/// Empty ranges have no representation; operations that can produce an
/// empty result return `None` (or an `Empty` plan) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    first: Address,
    last: Address,
}

impl AddressRange {
    /// Caller contract: `first <= last`.
    #[must_use]
    pub fn new(first: Address, last: Address) -> Self {
        Self { first, last }
    }

    /// The full address range of a sequence with `len` elements.
    #[must_use]
    pub fn of_length(len: usize) -> Option<Self> {
        if len == 0 {
            None
        } else {
            Some(Self::new(Address::new(0), Address::new(len - 1)))
        }
    }

    #[must_use]
    pub fn first(self) -> Address {
        self.first
    }

    #[must_use]
    pub fn last(self) -> Address {
        self.last
    }

    #[must_use]
    pub fn len(self) -> usize {
        self.last.offset() - self.first.offset() + 1
    }

    #[must_use]
    pub fn contains(self, address: Address) -> bool {
        self.first <= address && address <= self.last
    }

    pub fn iter(self) -> impl Iterator<Item = Address> {
        (self.first.offset()..=self.last.offset()).map(Address::new)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// Inclusive address sequence from `lo` to `hi`: ascending when
/// `lo <= hi`, descending otherwise.
pub fn generate_range(lo: Address, hi: Address) -> impl Iterator<Item = Address> {
    let descending = lo > hi;
    let (a, b) = if descending { (hi, lo) } else { (lo, hi) };
    let mut forward = a.offset()..=b.offset();
    std::iter::from_fn(move || {
        let next = if descending {
            forward.next_back()
        } else {
            forward.next()
        };
        next.map(Address::new)
    })
}

/// Direction of a fill or resampling pass over an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// How incomplete leading/trailing windows or chunks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    #[default]
    Skip,
    AtBeginning,
    AtEnding,
}

/// Whether a range bound includes its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryBehavior {
    #[default]
    Inclusive,
    Exclusive,
}
