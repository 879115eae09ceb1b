#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use fs_index::{Key, KeyOps};
use fs_types::{Address, Boundary, Direction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignError {
    #[error("keys {left} and {right} cannot be compared")]
    ComparisonFailed { left: String, right: String },
}

impl AlignError {
    pub fn comparison_failed<K: fmt::Debug>(left: &K, right: &K) -> Self {
        Self::ComparisonFailed {
            left: format!("{left:?}"),
            right: format!("{right:?}"),
        }
    }
}

/// One row of an aligned key stream: the key plus the address it occupies on
/// each side, where present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joint<K> {
    pub key: K,
    pub left: Option<Address>,
    pub right: Option<Address>,
}

// ── Alignment kernels ──────────────────────────────────────────────────

/// Classical ordered merge of two key→address streams already sorted under
/// the comparator. Equal keys collapse into a single joint carrying both
/// addresses; output keys are strictly increasing.
pub fn align_ordered<K: Key>(
    left: &[(K, Address)],
    right: &[(K, Address)],
    ops: &KeyOps<K>,
) -> Result<Vec<Joint<K>>, AlignError> {
    let mut joints = Vec::with_capacity(left.len().max(right.len()));
    let mut l = 0;
    let mut r = 0;
    while l < left.len() && r < right.len() {
        let (lk, la) = &left[l];
        let (rk, ra) = &right[r];
        match ops
            .try_cmp(lk, rk)
            .ok_or_else(|| AlignError::comparison_failed(lk, rk))?
        {
            Ordering::Less => {
                joints.push(Joint {
                    key: lk.clone(),
                    left: Some(*la),
                    right: None,
                });
                l += 1;
            }
            Ordering::Greater => {
                joints.push(Joint {
                    key: rk.clone(),
                    left: None,
                    right: Some(*ra),
                });
                r += 1;
            }
            Ordering::Equal => {
                joints.push(Joint {
                    key: lk.clone(),
                    left: Some(*la),
                    right: Some(*ra),
                });
                l += 1;
                r += 1;
            }
        }
    }
    for (key, address) in &left[l..] {
        joints.push(Joint {
            key: key.clone(),
            left: Some(*address),
            right: None,
        });
    }
    for (key, address) in &right[r..] {
        joints.push(Joint {
            key: key.clone(),
            left: None,
            right: Some(*address),
        });
    }
    Ok(joints)
}

/// Order-free alignment: every left key in left order, then every right key
/// not present on the left, in right order. The output carries no ordering
/// guarantee.
pub fn align_unordered<K: Key>(left: &[(K, Address)], right: &[(K, Address)]) -> Vec<Joint<K>> {
    let right_map: HashMap<&K, Address> = right
        .iter()
        .map(|(key, address)| (key, *address))
        .collect();
    let left_map: HashMap<&K, Address> =
        left.iter().map(|(key, address)| (key, *address)).collect();

    let mut joints = Vec::with_capacity(left.len() + right.len());
    for (key, address) in left {
        joints.push(Joint {
            key: key.clone(),
            left: Some(*address),
            right: right_map.get(key).copied(),
        });
    }
    for (key, address) in right {
        if !left_map.contains_key(key) {
            joints.push(Joint {
                key: key.clone(),
                left: None,
                right: Some(*address),
            });
        }
    }
    joints
}

// ── Windows and chunks ─────────────────────────────────────────────────

/// Contiguous run of positions in a key sequence. May be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub len: usize,
}

impl Window {
    #[must_use]
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Position of the last element; `None` for an empty window.
    #[must_use]
    pub fn last(self) -> Option<usize> {
        self.len.checked_sub(1).map(|offset| self.start + offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Complete,
    Incomplete,
}

/// A window or chunk tagged with whether it reached its full extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment<T> {
    pub kind: SegmentKind,
    pub data: T,
}

impl<T> Segment<T> {
    #[must_use]
    pub fn complete(data: T) -> Self {
        Self {
            kind: SegmentKind::Complete,
            data,
        }
    }

    #[must_use]
    pub fn incomplete(data: T) -> Self {
        Self {
            kind: SegmentKind::Incomplete,
            data,
        }
    }
}

/// Sliding windows of `size` over a sequence of `len` positions.
///
/// `Skip` emits complete windows only; `AtBeginning` grows a window at each
/// position's end (so leading windows are short); `AtEnding` shrinks a
/// window from each position's start (so trailing windows are short).
/// Caller contract: `size > 0`.
pub fn windowed_size(
    len: usize,
    size: usize,
    boundary: Boundary,
) -> impl Iterator<Item = Segment<Window>> {
    assert!(size > 0, "window size must be positive");
    let mut pos = 0;
    std::iter::from_fn(move || {
        let segment = match boundary {
            Boundary::Skip => {
                if pos + size > len {
                    return None;
                }
                Segment::complete(Window::new(pos, size))
            }
            Boundary::AtBeginning => {
                if pos >= len {
                    return None;
                }
                let end = pos;
                let start = end.saturating_sub(size - 1);
                let window = Window::new(start, end - start + 1);
                if window.len == size {
                    Segment::complete(window)
                } else {
                    Segment::incomplete(window)
                }
            }
            Boundary::AtEnding => {
                if pos >= len {
                    return None;
                }
                let window = Window::new(pos, size.min(len - pos));
                if window.len == size {
                    Segment::complete(window)
                } else {
                    Segment::incomplete(window)
                }
            }
        };
        pos += 1;
        Some(segment)
    })
}

/// Non-overlapping adjacent chunks of `size`. The final (or, under
/// `AtBeginning`, leading) partial chunk follows the boundary policy.
/// Caller contract: `size > 0`.
pub fn chunked_size(
    len: usize,
    size: usize,
    boundary: Boundary,
) -> impl Iterator<Item = Segment<Window>> {
    assert!(size > 0, "chunk size must be positive");
    let mut pos = 0;
    let leading = match boundary {
        Boundary::AtBeginning => len % size,
        Boundary::Skip | Boundary::AtEnding => 0,
    };
    let mut emit_leading = leading > 0;
    std::iter::from_fn(move || {
        if emit_leading {
            emit_leading = false;
            pos = leading;
            return Some(Segment::incomplete(Window::new(0, leading)));
        }
        if pos >= len {
            return None;
        }
        let remaining = len - pos;
        if remaining >= size {
            let window = Window::new(pos, size);
            pos += size;
            Some(Segment::complete(window))
        } else {
            match boundary {
                Boundary::AtEnding => {
                    let window = Window::new(pos, remaining);
                    pos = len;
                    Some(Segment::incomplete(window))
                }
                Boundary::Skip | Boundary::AtBeginning => None,
            }
        }
    })
}

/// A window starting at every position, extended while
/// `cond(first_key, current_key)` holds. A window whose own first key fails
/// the condition is empty.
pub fn windowed_while<'a, K>(
    keys: &'a [K],
    cond: impl Fn(&K, &K) -> bool + 'a,
) -> impl Iterator<Item = Segment<Window>> + 'a {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= keys.len() {
            return None;
        }
        let mut len = 0;
        while start + len < keys.len() && cond(&keys[start], &keys[start + len]) {
            len += 1;
        }
        let window = Window::new(start, len);
        start += 1;
        Some(Segment::complete(window))
    })
}

/// Greedy partition into chunks: a chunk always keeps its first key and
/// extends while `cond(first_key_of_chunk, current_key)` holds.
pub fn chunked_while<'a, K>(
    keys: &'a [K],
    cond: impl Fn(&K, &K) -> bool + 'a,
) -> impl Iterator<Item = Segment<Window>> + 'a {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= keys.len() {
            return None;
        }
        let mut len = 1;
        while start + len < keys.len() && cond(&keys[start], &keys[start + len]) {
            len += 1;
        }
        let window = Window::new(start, len);
        start += len;
        Some(Segment::complete(window))
    })
}

/// Partition a sorted key stream by a sorted sequence of markers, one chunk
/// per marker: under `Forward` each marker is the lower bound of its chunk,
/// under `Backward` the upper bound. Keys outside every marker interval are
/// merged into the first (`Forward`) or last (`Backward`) marker's chunk,
/// which is then tagged `Incomplete`; a marker without keys still yields an
/// empty chunk.
pub fn chunked_using<K: Key>(
    keys: &[K],
    markers: &[K],
    direction: Direction,
    ops: &KeyOps<K>,
) -> Result<Vec<(usize, Segment<Window>)>, AlignError> {
    let cmp = |key: &K, marker: &K| {
        ops.try_cmp(key, marker)
            .ok_or_else(|| AlignError::comparison_failed(key, marker))
    };

    let mut chunks = Vec::with_capacity(markers.len());
    let mut pos = 0;
    for (marker_index, marker) in markers.iter().enumerate() {
        let is_last = marker_index + 1 == markers.len();
        let start = pos;
        let mut absorbed_boundary = false;
        match direction {
            Direction::Backward => {
                // Keys <= marker; the final marker also absorbs the tail.
                while pos < keys.len() && cmp(&keys[pos], marker)? != Ordering::Greater {
                    pos += 1;
                }
                if is_last && pos < keys.len() {
                    absorbed_boundary = true;
                    pos = keys.len();
                }
            }
            Direction::Forward => {
                // Keys < next marker; the first marker also absorbs the head.
                if marker_index == 0 && pos < keys.len() {
                    absorbed_boundary = cmp(&keys[pos], marker)? == Ordering::Less;
                }
                if is_last {
                    pos = keys.len();
                } else {
                    let next = &markers[marker_index + 1];
                    while pos < keys.len() && cmp(&keys[pos], next)? == Ordering::Less {
                        pos += 1;
                    }
                }
            }
        }
        let window = Window::new(start, pos - start);
        let segment = if absorbed_boundary {
            Segment::incomplete(window)
        } else {
            Segment::complete(window)
        };
        chunks.push((marker_index, segment));
    }
    Ok(chunks)
}
