// SPDX-License-Identifier: MPL-2.0

//! The recursive mapper, unmapper, query, dump, and defragmenter.
//!
//! Every range operation here walks the table twice: once with `commit =
//! false` to make sure every sub-table allocation along the way succeeds,
//! then again with `commit = true` to actually write the leaf entries. If
//! the dry run fails, the live table is left with at most a few extra empty
//! sub-tables — never a half-applied mapping.

use core::sync::atomic::Ordering;

use crate::arch::ArchMm;
use crate::config::{ENTRIES_PER_TABLE, PAGE_BITS, PAGE_LEVEL_BITS};
use crate::mm::addr::{Pa, Pte, Va};
use crate::mm::allocator::PageAllocator;
use crate::mm::mode::{Attrs, ModeFlags};
use crate::mm::table::PageTable;
use crate::MmError;

fn entry_size(level: usize) -> usize {
    1usize << (PAGE_BITS + level * PAGE_LEVEL_BITS)
}

/// The exclusive upper bound of the single table that covers `begin` at
/// `level`, capped to that table's own span regardless of where in it
/// `begin` falls.
fn level_end(begin: Va, level: usize) -> Va {
    let span = entry_size(level + 1);
    Va::new((begin.addr() & !(span - 1)) + span)
}

fn index(va: Va, level: usize) -> usize {
    (va.addr() >> (PAGE_BITS + level * PAGE_LEVEL_BITS)) & (ENTRIES_PER_TABLE - 1)
}

#[derive(Clone, Copy)]
enum Op {
    Map(Attrs),
    Unmap,
}

impl Op {
    fn encode_page<A: ArchMm>(self, pa: Pa) -> Pte {
        match self {
            Op::Map(attrs) => A::pa_to_page_pte(pa, attrs),
            Op::Unmap => A::absent_pte(),
        }
    }

    fn encode_block<A: ArchMm>(self, pa: Pa) -> Pte {
        match self {
            Op::Map(attrs) => A::pa_to_block_pte(pa, attrs),
            Op::Unmap => A::absent_pte(),
        }
    }
}

/// Ensures `entries[idx]` holds a table PTE, allocating and publishing a new
/// sub-table if it does not already.
///
/// If the slot was absent, the new sub-table is filled with absent entries.
/// If it was a block, the new sub-table is filled with an equivalent,
/// finer-grained encoding of that same block (a page-PTE encoding at
/// `level == 1`, an unchanged block-PTE template at any other level),
/// preserving the mapping the block described.
///
/// Re-reads `entries[idx]` with a relaxed load: this crate does not support
/// concurrent callers racing on the same handle (see the crate's
/// concurrency notes), so no acquire fence is needed here. A caller that
/// relaxes that restriction must add one.
fn populate_table<A: ArchMm>(
    entries: &[core::sync::atomic::AtomicU64],
    idx: usize,
    level: usize,
    allocator: &dyn PageAllocator,
    phys_to_virt_offset: usize,
    nosync: bool,
) -> Result<Pa, MmError> {
    let pte = Pte::from_bits(entries[idx].load(Ordering::Relaxed));
    if A::pte_is_table(pte) {
        return Ok(A::pte_to_table_pa(pte));
    }

    let new_table_pa = if nosync {
        allocator.alloc_page_nosync()
    } else {
        allocator.alloc_page()
    }
    .ok_or(MmError::AllocationExhausted)?;

    let (template, increment): (Pte, u64) = if A::pte_is_present(pte) {
        debug_assert!(
            A::pte_is_block(pte),
            "a present, non-table PTE being populated must be a block"
        );
        let step = entry_size(level - 1) as u64;
        let base = if level == 1 {
            A::block_to_page_pte(pte)
        } else {
            pte
        };
        (base, step)
    } else {
        (A::absent_pte(), 0)
    };

    let sub_entries = super::table_entries(new_table_pa, phys_to_virt_offset);
    let mut value = template.bits();
    for slot in sub_entries {
        slot.store(value, Ordering::Relaxed);
        value = value.wrapping_add(increment);
    }

    core::sync::atomic::fence(Ordering::Release);
    entries[idx].store(A::pa_to_table_pte(new_table_pa).bits(), Ordering::Release);

    Ok(new_table_pa)
}

#[allow(clippy::too_many_arguments)]
fn map_level<A: ArchMm>(
    va_begin: Va,
    va_end: Va,
    pa0: Pa,
    op: Op,
    table: Pa,
    level: usize,
    commit: bool,
    allocator: &dyn PageAllocator,
    phys_to_virt_offset: usize,
    nosync: bool,
) -> Result<(), MmError> {
    let end = core::cmp::min(va_end, level_end(va_begin, level));
    let step = entry_size(level);
    let entries = super::table_entries(table, phys_to_virt_offset);

    let mut begin = va_begin;
    let mut pa = pa0;
    while begin.addr() < end.addr() {
        let idx = index(begin, level);

        if level == 0 {
            if commit {
                entries[idx].store(op.encode_page::<A>(pa).bits(), Ordering::Relaxed);
            }
        } else {
            let remaining = end.addr() - begin.addr();
            let can_use_block = remaining >= step
                && A::is_block_allowed(level)
                && begin.is_aligned_to(step)
                && pa.is_aligned_to(step);

            if can_use_block {
                if commit {
                    entries[idx].store(op.encode_block::<A>(pa).bits(), Ordering::Relaxed);
                    // TODO(free_sub_tree): if the PTE just overwritten was a
                    // table PTE, the sub-tree it pointed at is orphaned and
                    // should be reclaimed here, after a barrier ensuring no
                    // CPU holds a cached translation through it. Not
                    // implemented; see free_sub_tree below.
                }
            } else {
                let sub = populate_table::<A>(
                    entries,
                    idx,
                    level,
                    allocator,
                    phys_to_virt_offset,
                    nosync,
                )?;
                map_level::<A>(
                    begin,
                    end,
                    pa,
                    op,
                    sub,
                    level - 1,
                    commit,
                    allocator,
                    phys_to_virt_offset,
                    nosync,
                )?;
            }
        }

        begin = Va::new((begin.addr() + step) & !(step - 1));
        pa = Pa::new((pa.addr() + step) & !(step - 1));
    }

    Ok(())
}

/// Reclaims a sub-tree displaced by block coarsening or by unmap.
///
/// TODO: not implemented. Doing so safely requires a barrier ensuring no CPU
/// retains a cached translation through the displaced sub-tree before its
/// pages are returned to the allocator; this mirrors the no-op this crate's
/// design is modeled on, which defers the same work.
#[allow(dead_code)]
fn free_sub_tree<A: ArchMm>(_table: Pa, _level: usize) {}

#[allow(clippy::too_many_arguments)]
fn map_range<A: ArchMm>(
    table: &PageTable<A>,
    allocator: &dyn PageAllocator,
    va_begin: Va,
    va_end: Va,
    op: Op,
    mode: ModeFlags,
) -> bool {
    let va_begin = va_begin.align_down();
    let va_end = va_end.align_up();
    if va_end.addr() <= va_begin.addr() {
        return true;
    }

    let pa0 = Pa::new(va_begin.addr());
    let level = A::max_level(mode);
    let nosync = mode.contains(ModeFlags::NOSYNC);

    if map_level::<A>(
        va_begin,
        va_end,
        pa0,
        op,
        table.root,
        level,
        false,
        allocator,
        table.phys_to_virt_offset,
        nosync,
    )
    .is_err()
    {
        log::error!("page table operation aborted during dry run: allocation exhausted");
        return false;
    }

    if map_level::<A>(
        va_begin,
        va_end,
        pa0,
        op,
        table.root,
        level,
        true,
        allocator,
        table.phys_to_virt_offset,
        nosync,
    )
    .is_err()
    {
        log::error!("page table operation failed to commit after a successful dry run");
        return false;
    }

    if !mode.contains(ModeFlags::NOINVALIDATE) {
        if mode.contains(ModeFlags::STAGE1) {
            A::invalidate_stage1_range(va_begin, va_end);
        } else {
            A::invalidate_stage2_range(va_begin, va_end);
        }
    }

    true
}

/// Maps `[va_begin, va_end)` (rounded out to page boundaries) to the
/// physical range of the same numeric addresses, with attributes derived
/// from `mode`.
pub fn identity_map<A: ArchMm>(
    table: &PageTable<A>,
    allocator: &dyn PageAllocator,
    va_begin: Va,
    va_end: Va,
    mode: ModeFlags,
) -> bool {
    map_range::<A>(
        table,
        allocator,
        va_begin,
        va_end,
        Op::Map(A::mode_to_attrs(mode)),
        mode,
    )
}

/// Unmaps `[va_begin, va_end)` (rounded out to page boundaries).
///
/// Sub-tables that become entirely absent are not freed (future work; see
/// [`free_sub_tree`]).
pub fn unmap<A: ArchMm>(
    table: &PageTable<A>,
    allocator: &dyn PageAllocator,
    va_begin: Va,
    va_end: Va,
    mode: ModeFlags,
) -> bool {
    map_range::<A>(table, allocator, va_begin, va_end, Op::Unmap, mode)
}

/// Maps a single page, forcing a table-PTE path down to the leaf.
///
/// Used during early boot for isolated mappings (a UART MMIO page) where a
/// full range walk is unnecessary. Unlike [`identity_map`] this is not
/// two-phase: a single allocation failure leaves the page unmapped and is
/// reported as failure.
pub fn identity_map_page<A: ArchMm>(
    table: &PageTable<A>,
    allocator: &dyn PageAllocator,
    va: Va,
    mode: ModeFlags,
) -> bool {
    let va = va.align_down();
    let pa = Pa::new(va.addr());
    let attrs = A::mode_to_attrs(mode);
    let nosync = mode.contains(ModeFlags::NOSYNC);
    let max_level = A::max_level(mode);

    let mut current = table.root;
    for level in (1..=max_level).rev() {
        let entries = super::table_entries(current, table.phys_to_virt_offset);
        let idx = index(va, level);
        match populate_table::<A>(
            entries,
            idx,
            level,
            allocator,
            table.phys_to_virt_offset,
            nosync,
        ) {
            Ok(sub) => current = sub,
            Err(_) => {
                log::error!("identity_map_page: allocation exhausted building the table path");
                return false;
            }
        }
    }

    let entries = super::table_entries(current, table.phys_to_virt_offset);
    let idx = index(va, 0);
    entries[idx].store(A::pa_to_page_pte(pa, attrs).bits(), Ordering::Relaxed);

    if !mode.contains(ModeFlags::NOINVALIDATE) {
        let end = va + crate::config::PAGE_SIZE;
        if mode.contains(ModeFlags::STAGE1) {
            A::invalidate_stage1_range(va, end);
        } else {
            A::invalidate_stage2_range(va, end);
        }
    }

    true
}

/// Whether `va` is currently mapped (present as a page or covered by a
/// block at some level).
pub fn is_mapped<A: ArchMm>(table: &PageTable<A>, va: Va, mode: ModeFlags) -> bool {
    let max_level = A::max_level(mode);
    if va.addr() >= entry_size(max_level + 1) {
        return false;
    }
    is_mapped_recursive::<A>(
        table.root,
        table.phys_to_virt_offset,
        va.align_down(),
        max_level,
    )
}

fn is_mapped_recursive<A: ArchMm>(
    table: Pa,
    phys_to_virt_offset: usize,
    va: Va,
    level: usize,
) -> bool {
    let entries = super::table_entries(table, phys_to_virt_offset);
    let pte = Pte::from_bits(entries[index(va, level)].load(Ordering::Relaxed));

    if level == 0 {
        return A::pte_is_present(pte);
    }
    if A::pte_is_block(pte) && A::is_block_allowed(level) {
        return true;
    }
    if A::pte_is_table(pte) {
        return is_mapped_recursive::<A>(A::pte_to_table_pa(pte), phys_to_virt_offset, va, level - 1);
    }
    false
}

/// Recursively logs every present PTE, indented by depth. Diagnostics only;
/// never mutates the table.
pub fn dump<A: ArchMm>(table: &PageTable<A>, mode: ModeFlags) {
    dump_recursive::<A>(
        table.root,
        table.phys_to_virt_offset,
        A::max_level(mode),
        0,
    );
}

fn dump_recursive<A: ArchMm>(table: Pa, phys_to_virt_offset: usize, level: usize, depth: usize) {
    let entries = super::table_entries(table, phys_to_virt_offset);
    for (idx, slot) in entries.iter().enumerate() {
        let pte = Pte::from_bits(slot.load(Ordering::Relaxed));
        if !A::pte_is_present(pte) {
            continue;
        }
        log::info!("{:indent$}[{idx}] L{level}: {pte:?}", "", indent = depth * 2);
        if level > 0 && A::pte_is_table(pte) {
            dump_recursive::<A>(A::pte_to_table_pa(pte), phys_to_virt_offset, level - 1, depth + 1);
        }
    }
}

/// Coalesces runs of identically attributed page-PTEs into blocks where
/// permitted, and frees sub-tables that are entirely absent.
///
/// Required to exist by the contract this engine implements, but a full
/// implementation is declared future work; this is currently a correct,
/// conservative no-op.
pub fn defrag<A: ArchMm>(_table: &PageTable<A>, _mode: ModeFlags) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::X86_64Mm;
    use crate::mm::allocator::BumpPageAllocator;
    use crate::config::PAGE_SIZE;

    fn fresh_table() -> (PageTable<X86_64Mm>, BumpPageAllocator, alloc::vec::Vec<u8>) {
        let mut backing = alloc::vec![0u8; 256 * PAGE_SIZE];
        let offset = backing.as_mut_ptr() as usize;
        let allocator = BumpPageAllocator::new(Pa::new(0), 256 * PAGE_SIZE, offset);
        let table =
            PageTable::<X86_64Mm>::init(&allocator, 0, offset, ModeFlags::empty()).unwrap();
        (table, allocator, backing)
    }

    // S1
    #[test]
    fn mapped_range_is_mapped_and_the_page_just_past_it_is_not() {
        let (table, allocator, _backing) = fresh_table();
        let begin = Va::new(0x4000_0000);
        let end = Va::new(0x4000_1000);
        assert!(identity_map(&table, &allocator, begin, end, ModeFlags::R | ModeFlags::W));
        assert!(is_mapped(&table, begin, ModeFlags::empty()));
        assert!(!is_mapped(&table, end, ModeFlags::empty()));
    }

    // S2
    #[test]
    fn a_gibibyte_aligned_range_collapses_to_a_single_block() {
        let (table, allocator, _backing) = fresh_table();
        let begin = Va::new(0x0);
        let end = Va::new(0x4000_0000); // 1 GiB
        assert!(identity_map(&table, &allocator, begin, end, ModeFlags::R | ModeFlags::X));
        assert!(is_mapped(&table, Va::new(0), ModeFlags::empty()));
        assert!(is_mapped(&table, Va::new(0x3fff_f000), ModeFlags::empty()));
        assert!(!is_mapped(&table, end, ModeFlags::empty()));
    }

    // S3
    #[test]
    fn unmap_is_the_inverse_of_map_for_the_unmapped_range() {
        let (table, allocator, _backing) = fresh_table();
        let wide_begin = Va::new(0x8000_0000);
        let wide_end = Va::new(0x8040_0000);
        assert!(identity_map(&table, &allocator, wide_begin, wide_end, ModeFlags::R | ModeFlags::W));

        let narrow_begin = Va::new(0x8000_0000);
        let narrow_end = Va::new(0x8020_0000); // 2 MiB
        assert!(unmap(&table, &allocator, narrow_begin, narrow_end, ModeFlags::empty()));

        assert!(!is_mapped(&table, narrow_begin, ModeFlags::empty()));
        assert!(!is_mapped(&table, Va::new(0x801f_f000), ModeFlags::empty()));
        assert!(is_mapped(&table, narrow_end, ModeFlags::empty()));
        assert!(is_mapped(&table, Va::new(0x803f_f000), ModeFlags::empty()));
    }

    // S4
    #[test]
    fn a_failed_allocation_leaves_every_page_in_the_range_unchanged() {
        let (table, allocator, _backing) = fresh_table();
        let begin = Va::new(0x1000_0000);
        let end = Va::new(0x1060_0000); // spans multiple level-1 (2 MiB) regions
        let before: alloc::vec::Vec<bool> = (0..(end - begin) / PAGE_SIZE)
            .map(|i| is_mapped(&table, begin + i * PAGE_SIZE, ModeFlags::empty()))
            .collect();

        allocator.fail_after(0);
        assert!(!identity_map(&table, &allocator, begin, end, ModeFlags::R | ModeFlags::W));

        let after: alloc::vec::Vec<bool> = (0..(end - begin) / PAGE_SIZE)
            .map(|i| is_mapped(&table, begin + i * PAGE_SIZE, ModeFlags::empty()))
            .collect();
        assert_eq!(before, after);
    }

    // S5
    #[test]
    fn identity_map_page_maps_exactly_one_page() {
        let (table, allocator, _backing) = fresh_table();
        let va = Va::new(0x0900_0000);
        assert!(identity_map_page(&table, &allocator, va, ModeFlags::R | ModeFlags::W | ModeFlags::D));
        assert!(is_mapped(&table, va, ModeFlags::empty()));
        assert!(!is_mapped(&table, va + PAGE_SIZE, ModeFlags::empty()));
        assert!(!is_mapped(&table, va - PAGE_SIZE, ModeFlags::empty()));
    }

    #[test]
    fn mapping_the_same_range_twice_is_idempotent() {
        let (table, allocator, _backing) = fresh_table();
        let begin = Va::new(0x2000_0000);
        let end = Va::new(0x2000_3000);
        assert!(identity_map(&table, &allocator, begin, end, ModeFlags::R));
        assert!(identity_map(&table, &allocator, begin, end, ModeFlags::R));
        assert!(is_mapped(&table, begin, ModeFlags::empty()));
        assert!(is_mapped(&table, begin + PAGE_SIZE, ModeFlags::empty()));
        assert!(is_mapped(&table, begin + 2 * PAGE_SIZE, ModeFlags::empty()));
    }

    #[test]
    fn an_unmapped_address_outside_any_range_reports_unmapped() {
        let (table, _allocator, _backing) = fresh_table();
        assert!(!is_mapped(&table, Va::new(0x1234_5000), ModeFlags::empty()));
    }
}
