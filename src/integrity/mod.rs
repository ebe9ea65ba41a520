//! Function pointer provenance: is a code pointer inside kernel text or a
//! loaded module?
pub mod provenance;

pub use provenance::{
    DispatchTable, HookedPointer, KnownAddressCache, KnownRanges, PointerArray,
    ProvenanceChecker, VerifyOps,
};

use crate::error::AnalysisError;
use crate::memory::{Address, AddressSpace};
use std::cmp::Ordering;

/// A half-open `[start, end)` code range
pub trait CodeRegion {
    fn start(&self) -> Address;
    fn end(&self) -> Address;
}

impl CodeRegion for (Address, Address) {
    fn start(&self) -> Address {
        self.0
    }

    fn end(&self) -> Address {
        self.1
    }
}

/// Binary-searchable view over sorted, disjoint ranges. Ordering uses the
/// address space's comparison, so masked and unmasked pointers agree.
#[derive(Debug)]
pub struct AddressRangeIndex<'k, R> {
    ranges: &'k [R],
}

impl<'k, R> Clone for AddressRangeIndex<'k, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'k, R> Copy for AddressRangeIndex<'k, R> {}

impl<'k, R: CodeRegion> AddressRangeIndex<'k, R> {
    /// Borrow `ranges` as an index. Input must already be sorted by start and
    /// free of overlaps; it is never reordered here.
    pub fn new(ranges: &'k [R], space: &dyn AddressSpace) -> Result<Self, AnalysisError> {
        for (i, range) in ranges.iter().enumerate() {
            if space.address_compare(range.start(), range.end()) == Ordering::Greater {
                return Err(AnalysisError::InvalidStructure(format!(
                    "range {} ends (0x{:x}) before it starts (0x{:x})",
                    i,
                    range.end(),
                    range.start()
                )));
            }
        }
        for (i, pair) in ranges.windows(2).enumerate() {
            if space.address_compare(pair[0].end(), pair[1].start()) == Ordering::Greater {
                return Err(AnalysisError::InvalidStructure(format!(
                    "ranges {} and {} are unsorted or overlap (0x{:x}-0x{:x}, 0x{:x}-0x{:x})",
                    i,
                    i + 1,
                    pair[0].start(),
                    pair[0].end(),
                    pair[1].start(),
                    pair[1].end()
                )));
            }
        }
        Ok(AddressRangeIndex { ranges })
    }

    pub fn empty() -> Self {
        AddressRangeIndex { ranges: &[] }
    }

    /// The range containing `address`, if any
    pub fn find(&self, space: &dyn AddressSpace, address: Address) -> Option<&'k R> {
        let after = self
            .ranges
            .partition_point(|r| space.address_compare(r.start(), address) != Ordering::Greater);
        let candidate = self.ranges.get(after.checked_sub(1)?)?;
        (space.address_compare(address, candidate.end()) == Ordering::Less).then_some(candidate)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &'k [R] {
        self.ranges
    }
}
