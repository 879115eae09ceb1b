#![forbid(unsafe_code)]

//! Reference vector executor for the index/builder test suites.
//!
//! `ArrayVector` stores cells as plain optionals and `ArrayVectorBuilder`
//! interprets every plan node directly. The production executor is free to
//! be cleverer; this one defines the extensional semantics the plans are
//! tested against.

use fs_types::{Address, Direction};
use fs_vector::{FillPolicy, Transform, VectorBuilder, VectorError, VectorPlan};

/// Vector of optional cells addressed from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayVector<V> {
    cells: Vec<Option<V>>,
}

impl<V: Clone> ArrayVector<V> {
    #[must_use]
    pub fn from_values(values: Vec<V>) -> Self {
        Self {
            cells: values.into_iter().map(Some).collect(),
        }
    }

    #[must_use]
    pub fn from_cells(cells: Vec<Option<V>>) -> Self {
        Self { cells }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { cells: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[Option<V>] {
        &self.cells
    }

    /// Cell at the address; `None` for missing or out-of-range.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<&V> {
        self.cells.get(address.offset()).and_then(Option::as_ref)
    }

    /// Check predicate over this vector's cells, for nearest-key lookups
    /// that skip missing values.
    pub fn present(&self) -> impl Fn(Address) -> bool {
        let mask: Vec<bool> = self.cells.iter().map(Option::is_some).collect();
        move |address: Address| mask.get(address.offset()).copied().unwrap_or(false)
    }
}

/// Plan interpreter over `ArrayVector`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayVectorBuilder;

impl VectorBuilder for ArrayVectorBuilder {
    type Vector<V: Clone> = ArrayVector<V>;

    fn create_missing<V: Clone>(&self, cells: Vec<Option<V>>) -> ArrayVector<V> {
        ArrayVector::from_cells(cells)
    }

    fn build<V: Clone>(
        &self,
        plan: &VectorPlan<V>,
        inputs: &[ArrayVector<V>],
    ) -> Result<ArrayVector<V>, VectorError> {
        evaluate(plan, inputs)
    }
}

fn evaluate<V: Clone>(
    plan: &VectorPlan<V>,
    inputs: &[ArrayVector<V>],
) -> Result<ArrayVector<V>, VectorError> {
    match plan {
        VectorPlan::Return { source } => {
            inputs
                .get(*source)
                .cloned()
                .ok_or(VectorError::MissingInput {
                    slot: *source,
                    available: inputs.len(),
                })
        }
        VectorPlan::Empty => Ok(ArrayVector::empty()),
        VectorPlan::Relocate {
            source,
            range,
            pairs,
        } => {
            let input = evaluate(source, inputs)?;
            let base = range.first().offset();
            let mut cells: Vec<Option<V>> = vec![None; range.len()];
            let mut written = vec![false; range.len()];
            for (target, origin) in pairs {
                if !range.contains(*target) {
                    return Err(VectorError::TargetOutOfRange {
                        address: *target,
                        range: *range,
                    });
                }
                let slot = target.offset() - base;
                if written[slot] {
                    return Err(VectorError::DuplicateTarget { address: *target });
                }
                written[slot] = true;
                cells[slot] = input.cells.get(origin.offset()).cloned().flatten();
            }
            Ok(ArrayVector::from_cells(cells))
        }
        VectorPlan::GetRange { source, range } => {
            let input = evaluate(source, inputs)?;
            if range.last().offset() >= input.cells.len() {
                return Err(VectorError::RangeOutOfBounds {
                    range: *range,
                    len: input.cells.len(),
                });
            }
            Ok(ArrayVector::from_cells(
                input.cells[range.first().offset()..=range.last().offset()].to_vec(),
            ))
        }
        VectorPlan::DropRange { source, range } => {
            let input = evaluate(source, inputs)?;
            if range.last().offset() >= input.cells.len() {
                return Err(VectorError::RangeOutOfBounds {
                    range: *range,
                    len: input.cells.len(),
                });
            }
            let mut cells = input.cells;
            cells.drain(range.first().offset()..=range.last().offset());
            Ok(ArrayVector::from_cells(cells))
        }
        VectorPlan::Combine {
            left,
            right,
            transform,
        } => {
            let left = evaluate(left, inputs)?;
            let right = evaluate(right, inputs)?;
            let len = left.cells.len().max(right.cells.len());
            let mut cells = Vec::with_capacity(len);
            for offset in 0..len {
                let l = left.cells.get(offset).cloned().flatten();
                let r = right.cells.get(offset).cloned().flatten();
                let cell = match transform {
                    Transform::PreferLeft => l.or(r),
                    Transform::PreferRight => r.or(l),
                    Transform::ExactlyOne => {
                        if l.is_some() && r.is_some() {
                            return Err(VectorError::CombineConflict {
                                address: Address::new(offset),
                            });
                        }
                        l.or(r)
                    }
                };
                cells.push(cell);
            }
            Ok(ArrayVector::from_cells(cells))
        }
        VectorPlan::FillMissing { source, policy } => {
            let input = evaluate(source, inputs)?;
            let mut cells = input.cells;
            match policy {
                FillPolicy::Constant(value) => {
                    for cell in &mut cells {
                        if cell.is_none() {
                            *cell = Some(value.clone());
                        }
                    }
                }
                FillPolicy::Direction(Direction::Forward) => {
                    let mut carried: Option<V> = None;
                    for cell in &mut cells {
                        match cell {
                            Some(value) => carried = Some(value.clone()),
                            None => *cell = carried.clone(),
                        }
                    }
                }
                FillPolicy::Direction(Direction::Backward) => {
                    let mut carried: Option<V> = None;
                    for cell in cells.iter_mut().rev() {
                        match cell {
                            Some(value) => carried = Some(value.clone()),
                            None => *cell = carried.clone(),
                        }
                    }
                }
            }
            Ok(ArrayVector::from_cells(cells))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ArrayVector, ArrayVectorBuilder};
    use fs_types::{Address, AddressRange, Direction};
    use fs_vector::{FillPolicy, Transform, VectorBuilder, VectorError, VectorPlan};

    fn addr(offset: usize) -> Address {
        Address::new(offset)
    }

    fn range(first: usize, last: usize) -> AddressRange {
        AddressRange::new(addr(first), addr(last))
    }

    fn build(plan: &VectorPlan<i64>, inputs: &[ArrayVector<i64>]) -> ArrayVector<i64> {
        ArrayVectorBuilder.build(plan, inputs).expect("valid plan")
    }

    #[test]
    fn return_yields_input_slot() {
        let input = ArrayVector::from_values(vec![1, 2, 3]);
        let out = build(&VectorPlan::Return { source: 0 }, &[input.clone()]);
        assert_eq!(out, input);
    }

    #[test]
    fn return_of_missing_slot_fails() {
        let err = ArrayVectorBuilder
            .build(&VectorPlan::<i64>::Return { source: 2 }, &[])
            .expect_err("no inputs");
        assert_eq!(
            err,
            VectorError::MissingInput {
                slot: 2,
                available: 0
            }
        );
    }

    #[test]
    fn relocate_gathers_and_leaves_gaps_missing() {
        let input = ArrayVector::from_values(vec![10, 20, 30]);
        let plan = VectorPlan::relocate(
            VectorPlan::Return { source: 0 },
            range(0, 3),
            vec![(addr(0), addr(2)), (addr(2), addr(0))],
        );
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[Some(30), None, Some(10), None]);
    }

    #[test]
    fn relocate_from_missing_source_cell_stays_missing() {
        let input = ArrayVector::from_cells(vec![Some(1), None]);
        let plan = VectorPlan::relocate(
            VectorPlan::Return { source: 0 },
            range(0, 1),
            vec![(addr(0), addr(1)), (addr(1), addr(0))],
        );
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[None, Some(1)]);
    }

    #[test]
    fn relocate_rejects_duplicate_targets() {
        let input = ArrayVector::from_values(vec![1, 2]);
        let plan = VectorPlan::relocate(
            VectorPlan::Return { source: 0 },
            range(0, 1),
            vec![(addr(0), addr(0)), (addr(0), addr(1))],
        );
        let err = ArrayVectorBuilder
            .build(&plan, &[input])
            .expect_err("duplicate target");
        assert_eq!(err, VectorError::DuplicateTarget { address: addr(0) });
    }

    #[test]
    fn get_range_slices_inclusively() {
        let input = ArrayVector::from_values(vec![1, 2, 3, 4, 5]);
        let plan = VectorPlan::get_range(VectorPlan::Return { source: 0 }, range(1, 3));
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn get_range_out_of_bounds_fails() {
        let input = ArrayVector::from_values(vec![1, 2]);
        let plan = VectorPlan::get_range(VectorPlan::Return { source: 0 }, range(1, 5));
        let err = ArrayVectorBuilder
            .build(&plan, &[input])
            .expect_err("out of bounds");
        assert_eq!(
            err,
            VectorError::RangeOutOfBounds {
                range: range(1, 5),
                len: 2
            }
        );
    }

    #[test]
    fn drop_range_removes_inner_slice() {
        let input = ArrayVector::from_values(vec![1, 2, 3, 4, 5]);
        let plan = VectorPlan::drop_range(VectorPlan::Return { source: 0 }, range(1, 3));
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[Some(1), Some(5)]);
    }

    #[test]
    fn combine_prefer_left_and_right() {
        let left = ArrayVector::from_cells(vec![Some(1), None, Some(3)]);
        let right = ArrayVector::from_cells(vec![Some(9), Some(8), None]);
        let prefer_left = VectorPlan::combine(
            VectorPlan::Return { source: 0 },
            VectorPlan::Return { source: 1 },
            Transform::PreferLeft,
        );
        let prefer_right = VectorPlan::combine(
            VectorPlan::Return { source: 0 },
            VectorPlan::Return { source: 1 },
            Transform::PreferRight,
        );
        let inputs = [left, right];
        assert_eq!(
            build(&prefer_left, &inputs).cells(),
            &[Some(1), Some(8), Some(3)]
        );
        assert_eq!(
            build(&prefer_right, &inputs).cells(),
            &[Some(9), Some(8), Some(3)]
        );
    }

    #[test]
    fn combine_exactly_one_rejects_overlap() {
        let left = ArrayVector::from_cells(vec![Some(1), None]);
        let right = ArrayVector::from_cells(vec![Some(2), Some(3)]);
        let plan = VectorPlan::combine(
            VectorPlan::Return { source: 0 },
            VectorPlan::Return { source: 1 },
            Transform::ExactlyOne,
        );
        let err = ArrayVectorBuilder
            .build(&plan, &[left, right])
            .expect_err("overlap");
        assert_eq!(err, VectorError::CombineConflict { address: addr(0) });
    }

    #[test]
    fn combine_pads_shorter_side_with_missing() {
        let left = ArrayVector::from_values(vec![1]);
        let right = ArrayVector::from_cells(vec![None, Some(2), Some(3)]);
        let plan = VectorPlan::combine(
            VectorPlan::Return { source: 0 },
            VectorPlan::Return { source: 1 },
            Transform::ExactlyOne,
        );
        let out = build(&plan, &[left, right]);
        assert_eq!(out.cells(), &[Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn fill_missing_with_constant() {
        let input = ArrayVector::from_cells(vec![Some(1), None, Some(3)]);
        let plan = VectorPlan::fill_missing(
            VectorPlan::Return { source: 0 },
            FillPolicy::Constant(0),
        );
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[Some(1), Some(0), Some(3)]);
    }

    #[test]
    fn fill_missing_forward_carries_last_value() {
        let input = ArrayVector::from_cells(vec![None, Some(1), None, None, Some(4)]);
        let plan = VectorPlan::fill_missing(
            VectorPlan::Return { source: 0 },
            FillPolicy::Direction(Direction::Forward),
        );
        let out = build(&plan, &[input]);
        assert_eq!(
            out.cells(),
            &[None, Some(1), Some(1), Some(1), Some(4)]
        );
    }

    #[test]
    fn fill_missing_backward_carries_next_value() {
        let input = ArrayVector::from_cells(vec![None, Some(1), None, None, Some(4)]);
        let plan = VectorPlan::fill_missing(
            VectorPlan::Return { source: 0 },
            FillPolicy::Direction(Direction::Backward),
        );
        let out = build(&plan, &[input]);
        assert_eq!(
            out.cells(),
            &[Some(1), Some(1), Some(4), Some(4), Some(4)]
        );
    }

    #[test]
    fn nested_plans_evaluate_inside_out() {
        let input = ArrayVector::from_values(vec![1, 2, 3, 4]);
        let plan = VectorPlan::fill_missing(
            VectorPlan::relocate(
                VectorPlan::get_range(VectorPlan::Return { source: 0 }, range(1, 3)),
                range(0, 2),
                vec![(addr(2), addr(0))],
            ),
            FillPolicy::Constant(0),
        );
        let out = build(&plan, &[input]);
        assert_eq!(out.cells(), &[Some(0), Some(0), Some(2)]);
    }

    #[test]
    fn present_check_tracks_missing_cells() {
        let vector = ArrayVector::from_cells(vec![Some(1), None]);
        let present = vector.present();
        assert!(present(addr(0)));
        assert!(!present(addr(1)));
        assert!(!present(addr(9)));
    }

    #[test]
    fn empty_plan_yields_empty_vector() {
        let out = build(&VectorPlan::Empty, &[]);
        assert!(out.is_empty());
    }
}
