// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partition/MPU mapping.
//!
//! A `Page` is a small, fixed-capacity set of `Partition` entries -- base
//! address, size, and access attributes -- that together describe a chunk
//! of address space a task can be granted access to at runtime, on top of
//! the statically-configured `region_table` each task already has
//! (`kern::task::Task::region_table`). Where the static table is fixed at
//! boot, a `Page` is what `Map`/`Grant` message items (`abi::MessageItem`)
//! and the `UnmapPage` syscall actually manipulate: installing or
//! withdrawing MPU coverage while a task is running, without requiring the
//! whole region table to be rebuilt.
//!
//! The validation rules mirror the ARMv7-M MPU's own constraints, since
//! that's the hardware this has to program: a region's size must be a
//! power of two of at least 32 bytes, its base must be aligned to that
//! size, and regions within the same page must not overlap (overlapping
//! regions are fine across *different* tasks' static tables -- precedence
//! there is "most specific wins" -- but within one dynamically-programmed
//! page they would make the MPU's behavior at the overlap ambiguous). A
//! partition also can't be both writable and executable: granting a task
//! fresh, runtime-writable memory that's also executable would let it write
//! and then run its own code in the same region.
//!
//! Arch- and allocation-independent like the rest of `kerncore`, so it can
//! be exercised with ordinary host `#[test]`s; `kern::task` is the only
//! consumer.

use abi::RegionAttributes;

/// Entries per `Page`. Matches the smallest number of MPU regions common
/// ARMv7-M parts provide (eight total, with a handful reserved for the
/// kernel's own static regions).
pub const PARTITIONS_PER_PAGE: usize = 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    pub start: u32,
    pub size: u32,
    pub attributes: RegionAttributes,
}

impl Partition {
    fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.size)
    }

    fn overlaps(&self, other: &Partition) -> bool {
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }

    fn is_validly_shaped(&self) -> bool {
        self.size >= 32
            && self.size.is_power_of_two()
            && self.start % self.size == 0
    }

    /// No partition may be simultaneously writable and executable.
    fn is_write_xor_execute(&self) -> bool {
        !(self.attributes.contains(RegionAttributes::WRITE)
            && self.attributes.contains(RegionAttributes::EXECUTE))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PartitionError {
    /// A partition's size/alignment doesn't meet the MPU's requirements.
    BadShape,
    /// A partition requested both `WRITE` and `EXECUTE`.
    WriteAndExecute,
    /// Two partitions in the same page would overlap.
    Overlap,
    /// The page already holds `PARTITIONS_PER_PAGE` entries.
    PageFull,
}

/// A set of up to `PARTITIONS_PER_PAGE` non-overlapping, validly-shaped
/// partitions, installed or withdrawn as a unit.
#[derive(Copy, Clone, Debug)]
pub struct Page {
    entries: [Option<Partition>; PARTITIONS_PER_PAGE],
}

impl Page {
    pub const fn empty() -> Self {
        Page {
            entries: [None; PARTITIONS_PER_PAGE],
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Partition> {
        self.entries.iter().filter_map(|e| e.as_ref())
    }

    /// Validates and inserts `p` into this page. Checked against the MPU's
    /// shape requirements and against every partition already present;
    /// inserting never partially succeeds.
    pub fn insert(&mut self, p: Partition) -> Result<(), PartitionError> {
        if !p.is_validly_shaped() {
            return Err(PartitionError::BadShape);
        }
        if !p.is_write_xor_execute() {
            return Err(PartitionError::WriteAndExecute);
        }
        if self.entries().any(|existing| existing.overlaps(&p)) {
            return Err(PartitionError::Overlap);
        }
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_none())
            .ok_or(PartitionError::PageFull)?;
        *slot = Some(p);
        Ok(())
    }

    /// Removes every partition whose range contains `addr`, returning how
    /// many were removed. Used to implement `UnmapPage`'s "release the
    /// partitions covering this address" semantics.
    pub fn remove_covering(&mut self, addr: u32) -> usize {
        let mut removed = 0;
        for slot in &mut self.entries {
            let covers = slot
                .map(|p| p.start <= addr && u64::from(addr) < p.end())
                .unwrap_or(false);
            if covers {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries = [None; PARTITIONS_PER_PAGE];
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Tests whether `addr..addr+len` is fully covered by a single
    /// partition in this page with all of `atts`, and none of `DEVICE`/
    /// `DMA` unless explicitly requested -- the same access-checking
    /// contract as `task::Task::can_access`, for dynamically-mapped
    /// memory rather than the static region table.
    pub fn covers(&self, addr: u32, len: u32, atts: RegionAttributes) -> bool {
        if len == 0 {
            return true;
        }
        let want_end = u64::from(addr) + u64::from(len);
        self.entries().any(|p| {
            u64::from(p.start) <= u64::from(addr)
                && want_end <= p.end()
                && p.attributes.contains(atts)
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: u32, size: u32, atts: RegionAttributes) -> Partition {
        Partition { start, size, attributes: atts }
    }

    #[test]
    fn insert_rejects_non_power_of_two_size() {
        let mut page = Page::empty();
        let err = page
            .insert(region(0x2000_0000, 100, RegionAttributes::READ))
            .unwrap_err();
        assert_eq!(err, PartitionError::BadShape);
    }

    #[test]
    fn insert_rejects_misaligned_base() {
        let mut page = Page::empty();
        let err = page
            .insert(region(0x2000_0010, 64, RegionAttributes::READ))
            .unwrap_err();
        assert_eq!(err, PartitionError::BadShape);
    }

    #[test]
    fn insert_rejects_write_and_execute() {
        let mut page = Page::empty();
        let err = page
            .insert(region(
                0x2000_0000,
                0x1000,
                RegionAttributes::WRITE | RegionAttributes::EXECUTE,
            ))
            .unwrap_err();
        assert_eq!(err, PartitionError::WriteAndExecute);
    }

    #[test]
    fn insert_rejects_overlap_with_existing_entry() {
        let mut page = Page::empty();
        page.insert(region(0x2000_0000, 0x1000, RegionAttributes::READ))
            .unwrap();
        let err = page
            .insert(region(0x2000_0800, 0x1000, RegionAttributes::READ))
            .unwrap_err();
        assert_eq!(err, PartitionError::Overlap);
    }

    #[test]
    fn adjacent_non_overlapping_regions_are_both_accepted() {
        let mut page = Page::empty();
        page.insert(region(0x2000_0000, 0x1000, RegionAttributes::READ))
            .unwrap();
        page.insert(region(0x2000_1000, 0x1000, RegionAttributes::READ))
            .unwrap();
        assert_eq!(page.entries().count(), 2);
    }

    #[test]
    fn page_full_after_capacity_entries() {
        let mut page = Page::empty();
        for i in 0..PARTITIONS_PER_PAGE {
            page.insert(region(0x2000_0000 + (i as u32) * 0x1000, 0x1000, RegionAttributes::READ))
                .unwrap();
        }
        let err = page
            .insert(region(0x2010_0000, 0x1000, RegionAttributes::READ))
            .unwrap_err();
        assert_eq!(err, PartitionError::PageFull);
    }

    #[test]
    fn covers_requires_full_containment_and_matching_attributes() {
        let mut page = Page::empty();
        page.insert(region(0x2000_0000, 0x1000, RegionAttributes::READ | RegionAttributes::WRITE))
            .unwrap();
        assert!(page.covers(0x2000_0100, 0x100, RegionAttributes::READ));
        assert!(!page.covers(0x2000_0f00, 0x200, RegionAttributes::READ));
        assert!(!page.covers(0x2000_0100, 0x100, RegionAttributes::EXECUTE));
    }

    #[test]
    fn remove_covering_clears_only_the_matching_partition() {
        let mut page = Page::empty();
        page.insert(region(0x2000_0000, 0x1000, RegionAttributes::READ))
            .unwrap();
        page.insert(region(0x2000_1000, 0x1000, RegionAttributes::READ))
            .unwrap();
        assert_eq!(page.remove_covering(0x2000_0500), 1);
        assert_eq!(page.entries().count(), 1);
        assert!(!page.covers(0x2000_0500, 1, RegionAttributes::READ));
        assert!(page.covers(0x2000_1500, 1, RegionAttributes::READ));
    }
}
