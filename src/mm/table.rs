// SPDX-License-Identifier: MPL-2.0

//! The page table handle.

use core::marker::PhantomData;
use core::sync::atomic::Ordering;

use crate::arch::ArchMm;
use crate::mm::addr::Pa;
use crate::mm::allocator::PageAllocator;
use crate::mm::mode::ModeFlags;
use crate::MmError;

/// A page table rooted at a single page-aligned, page-sized top-level
/// table.
///
/// Owns, exclusively and transitively, every sub-table reachable from its
/// root through PTEs the backend classifies as `table`. Never destroyed by
/// this crate: reclaiming a table's pages is declared future work, the same
/// way the source this crate is modeled on never frees a page table either.
pub struct PageTable<A: ArchMm> {
    pub(crate) root: Pa,
    /// Opaque identifier used by the backend for TLB-tag discipline (e.g. a
    /// VM id for a stage-2 table).
    pub(crate) id: u32,
    pub(crate) phys_to_virt_offset: usize,
    _arch: PhantomData<A>,
}

impl<A: ArchMm> PageTable<A> {
    /// Allocates a root page and fills it with absent entries.
    pub fn init(
        allocator: &dyn PageAllocator,
        id: u32,
        phys_to_virt_offset: usize,
        mode: ModeFlags,
    ) -> Result<Self, MmError> {
        let root = if mode.contains(ModeFlags::NOSYNC) {
            allocator.alloc_page_nosync()
        } else {
            allocator.alloc_page()
        }
        .ok_or(MmError::AllocationExhausted)?;

        let entries = super::table_entries(root, phys_to_virt_offset);
        for slot in entries {
            slot.store(A::absent_pte().bits(), Ordering::Relaxed);
        }

        Ok(Self {
            root,
            id,
            phys_to_virt_offset,
            _arch: PhantomData,
        })
    }

    /// The physical address of this table's root.
    pub fn root(&self) -> Pa {
        self.root
    }

    /// This table's opaque identifier.
    pub fn id(&self) -> u32 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::X86_64Mm;
    use crate::config::PAGE_SIZE;
    use crate::mm::allocator::BumpPageAllocator;

    fn test_allocator(pages: usize) -> (BumpPageAllocator, alloc::vec::Vec<u8>) {
        let mut backing = alloc::vec![0u8; pages * PAGE_SIZE];
        let offset = backing.as_mut_ptr() as usize;
        (
            BumpPageAllocator::new(Pa::new(0), pages * PAGE_SIZE, offset),
            backing,
        )
    }

    #[test]
    fn init_fills_root_with_absent_entries() {
        let (allocator, backing) = test_allocator(4);
        let offset = backing.as_ptr() as usize;
        let table =
            PageTable::<X86_64Mm>::init(&allocator, 0, offset, ModeFlags::empty()).unwrap();
        let entries = super::super::table_entries(table.root(), offset);
        assert!(entries
            .iter()
            .all(|pte| !X86_64Mm::pte_is_present(crate::mm::addr::Pte::from_bits(
                pte.load(Ordering::Relaxed)
            ))));
    }

    #[test]
    fn init_fails_when_allocator_is_exhausted() {
        let (allocator, backing) = test_allocator(1);
        let offset = backing.as_ptr() as usize;
        allocator.fail_after(0);
        let result = PageTable::<X86_64Mm>::init(&allocator, 0, offset, ModeFlags::empty());
        assert_eq!(result.unwrap_err(), MmError::AllocationExhausted);
    }
}
