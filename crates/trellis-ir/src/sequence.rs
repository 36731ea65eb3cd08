//! Indexed and sliced access to child collections.
//!
//! Every accessor on [`IrContext`](crate::IrContext) that returns a list
//! (regions, blocks, operations, operands, results, block arguments)
//! hands out a [`Seq`] snapshot. Positional access accepts negative
//! indices; slicing follows general sequence slice rules, including
//! negative steps.

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::error::{Collection, IrError, Result};
use crate::refs::{TypeRef, ValueRef};

/// `start:stop:step` with every component optional.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SliceSpec {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
}

impl SliceSpec {
    pub fn new(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Self { start, stop, step }
    }

    /// `a:b`
    pub fn range(start: isize, stop: isize) -> Self {
        Self::new(Some(start), Some(stop), None)
    }

    /// `::-1`
    pub fn reversed() -> Self {
        Self::new(None, None, Some(-1))
    }
}

/// Resolve a possibly negative index against `len`.
pub fn normalize_index(index: isize, len: usize, collection: Collection) -> Result<usize> {
    let n = len as isize;
    let resolved = if index < 0 { index + n } else { index };
    if (0..n).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(IrError::OutOfBounds {
            collection,
            index,
            len,
        })
    }
}

/// Expand a slice into the concrete forward list of positions it selects.
///
/// Out-of-range bounds are clamped; only a zero step is an error.
pub fn slice_indices(spec: SliceSpec, len: usize) -> Result<Vec<usize>> {
    let step = spec.step.unwrap_or(1);
    if step == 0 {
        return Err(IrError::ZeroSliceStep);
    }
    let n = len as isize;
    let (lower, upper) = if step < 0 { (-1, n - 1) } else { (0, n) };
    let clamp = |bound: Option<isize>, default: isize| match bound {
        None => default,
        Some(b) if b < 0 => (b + n).max(lower),
        Some(b) => b.min(upper),
    };
    let start = clamp(spec.start, if step < 0 { upper } else { lower });
    let stop = clamp(spec.stop, if step < 0 { lower } else { upper });

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(out)
}

/// Snapshot of a child collection.
///
/// The snapshot holds handles, not borrows, so it stays usable while the
/// context is mutated; handles it contains may go stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seq<T> {
    collection: Collection,
    items: SmallVec<[T; 4]>,
}

impl<T: Copy> Seq<T> {
    pub(crate) fn new(collection: Collection, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            collection,
            items: items.into_iter().collect(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`; negative indices count from the end.
    pub fn get(&self, index: isize) -> Result<T> {
        let i = normalize_index(index, self.items.len(), self.collection)?;
        Ok(self.items[i])
    }

    pub fn slice(&self, spec: SliceSpec) -> Result<Seq<T>> {
        let picked = slice_indices(spec, self.items.len())?;
        Ok(Seq::new(
            self.collection,
            picked.into_iter().map(|i| self.items[i]),
        ))
    }

    /// `self + other`, keeping this sequence's collection kind.
    pub fn concat(&self, other: &Seq<T>) -> Seq<T> {
        Seq::new(
            self.collection,
            self.items.iter().chain(other.items.iter()).copied(),
        )
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = T> + ExactSizeIterator + '_ {
        self.items.iter().copied()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn first(&self) -> Option<T> {
        self.items.first().copied()
    }

    pub fn last(&self) -> Option<T> {
        self.items.last().copied()
    }
}

impl Seq<ValueRef> {
    /// Types of the values, in sequence order.
    pub fn types(&self, ctx: &IrContext) -> Result<Vec<TypeRef>> {
        self.items.iter().map(|&v| ctx.value_type(v)).collect()
    }
}

impl<T: Copy> IntoIterator for Seq<T> {
    type Item = T;
    type IntoIter = smallvec::IntoIter<[T; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T: Copy> IntoIterator for &'a Seq<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u32) -> Seq<u32> {
        Seq::new(Collection::Result, 0..n)
    }

    fn collect(s: &Seq<u32>) -> Vec<u32> {
        s.iter().collect()
    }

    #[test]
    fn negative_indices_count_from_end() {
        let s = seq(4);
        assert_eq!(s.get(-1).unwrap(), 3);
        assert_eq!(s.get(-4).unwrap(), 0);
        assert!(matches!(
            s.get(-5),
            Err(IrError::OutOfBounds {
                collection: Collection::Result,
                index: -5,
                len: 4
            })
        ));
        assert!(s.get(4).is_err());
    }

    #[test]
    fn extreme_steps_and_bounds_clamp() {
        let s = seq(3);
        let pick = |start, stop, step| collect(&s.slice(SliceSpec::new(start, stop, step)).unwrap());

        assert_eq!(pick(Some(1), None, Some(isize::MAX)), vec![1]);
        assert_eq!(pick(None, None, Some(isize::MAX)), vec![0]);
        assert_eq!(pick(None, None, Some(isize::MIN)), vec![2]);
        assert_eq!(pick(Some(isize::MIN), Some(isize::MAX), Some(1)), vec![0, 1, 2]);
        assert_eq!(pick(Some(isize::MAX), None, Some(1)), Vec::<u32>::new());
        assert_eq!(pick(Some(isize::MAX), Some(isize::MIN), Some(-1)), vec![2, 1, 0]);
        assert_eq!(pick(Some(isize::MIN), None, Some(-1)), Vec::<u32>::new());
    }

    #[test]
    fn reversed_stepping_slice() {
        // [-2:0:-2]; the stop bound is exclusive.
        let s = seq(4);
        let picked = s.slice(SliceSpec::new(Some(-2), Some(0), Some(-2))).unwrap();
        assert_eq!(collect(&picked), vec![2]);

        let s = seq(5);
        let picked = s.slice(SliceSpec::new(Some(-2), Some(0), Some(-2))).unwrap();
        assert_eq!(collect(&picked), vec![3, 1]);
    }

    #[test]
    fn double_reverse_is_identity() {
        let s = seq(6);
        let back = s
            .slice(SliceSpec::reversed())
            .unwrap()
            .slice(SliceSpec::reversed())
            .unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn out_of_range_slices_clamp_to_empty() {
        let s = seq(3);
        assert!(s.slice(SliceSpec::range(10, 20)).unwrap().is_empty());
        assert!(s.slice(SliceSpec::range(2, 1)).unwrap().is_empty());
        assert_eq!(collect(&s.slice(SliceSpec::range(-100, 100)).unwrap()), vec![0, 1, 2]);
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = slice_indices(SliceSpec::new(None, None, Some(0)), 3).unwrap_err();
        assert!(matches!(err, IrError::ZeroSliceStep));
    }

    #[test]
    fn slice_agrees_with_positional_access() {
        let s = seq(7);
        for step in [-3isize, -2, -1, 1, 2, 3] {
            for start in -8isize..8 {
                let spec = SliceSpec::new(Some(start), None, Some(step));
                let sliced = s.slice(spec).unwrap();
                let positions = slice_indices(spec, s.len()).unwrap();
                let by_index: Vec<u32> = positions
                    .iter()
                    .map(|&i| s.get(i as isize).unwrap())
                    .collect();
                assert_eq!(collect(&sliced), by_index);
            }
        }
    }

    #[test]
    fn concat_appends_in_order() {
        let a = seq(2);
        let b = seq(3).slice(SliceSpec::range(1, 3)).unwrap();
        assert_eq!(collect(&a.concat(&b)), vec![0, 1, 1, 2]);
    }
}
