// SPDX-License-Identifier: MPL-2.0

//! The x86-64 [`ArchMm`] backend: four levels (PML4/PDPT/PD/PT), 1 GiB
//! blocks at level 2 and 2 MiB blocks at level 1, built on the `x86_64`
//! crate's `Cr3`/TLB primitives the way the donor's own x86 backend does.

#[cfg(not(test))]
use x86_64::instructions::tlb;
#[cfg(not(test))]
use x86_64::registers::control::{Cr3, Cr3Flags};
#[cfg(not(test))]
use x86_64::structures::paging::PhysFrame;
#[cfg(not(test))]
use x86_64::{PhysAddr, VirtAddr};

use super::ArchMm;
use crate::mm::addr::{Pa, Pte, Va};
use crate::mm::mode::{Attrs, ModeFlags};

bitflags::bitflags! {
    struct RawFlags: u64 {
        const PRESENT      = 1 << 0;
        const WRITABLE     = 1 << 1;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE     = 1 << 4;
        const HUGE         = 1 << 7;
        const NO_EXECUTE   = 1 << 63;
    }
}

/// 51:12 — the bits of a PTE that carry a physical address on this backend.
const PHYS_ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

fn attrs_to_raw(attrs: Attrs) -> RawFlags {
    let mut raw = RawFlags::PRESENT;
    raw.set(RawFlags::WRITABLE, attrs.contains(Attrs::W));
    raw.set(RawFlags::NO_EXECUTE, !attrs.contains(Attrs::X));
    if attrs.contains(Attrs::D) {
        raw.insert(RawFlags::NO_CACHE | RawFlags::WRITE_THROUGH);
    }
    raw
}

/// The four-level, 1 GiB/2 MiB-block x86-64 backend.
pub struct X86_64Mm;

impl ArchMm for X86_64Mm {
    fn max_level(_mode: ModeFlags) -> usize {
        3
    }

    fn is_block_allowed(level: usize) -> bool {
        matches!(level, 1 | 2)
    }

    fn absent_pte() -> Pte {
        Pte::from_bits(0)
    }

    fn pte_is_present(pte: Pte) -> bool {
        pte.bits() & RawFlags::PRESENT.bits() != 0
    }

    fn pte_is_block(pte: Pte) -> bool {
        Self::pte_is_present(pte) && pte.bits() & RawFlags::HUGE.bits() != 0
    }

    fn pte_is_table(pte: Pte) -> bool {
        Self::pte_is_present(pte) && pte.bits() & RawFlags::HUGE.bits() == 0
    }

    fn pa_to_page_pte(pa: Pa, attrs: Attrs) -> Pte {
        let raw = attrs_to_raw(attrs);
        Pte::from_bits((pa.addr() as u64 & PHYS_ADDR_MASK) | raw.bits())
    }

    fn pa_to_block_pte(pa: Pa, attrs: Attrs) -> Pte {
        let raw = attrs_to_raw(attrs) | RawFlags::HUGE;
        Pte::from_bits((pa.addr() as u64 & PHYS_ADDR_MASK) | raw.bits())
    }

    fn pa_to_table_pte(pa: Pa) -> Pte {
        let raw = RawFlags::PRESENT | RawFlags::WRITABLE;
        Pte::from_bits((pa.addr() as u64 & PHYS_ADDR_MASK) | raw.bits())
    }

    fn block_to_page_pte(pte: Pte) -> Pte {
        Pte::from_bits(pte.bits() & !RawFlags::HUGE.bits())
    }

    fn pte_to_table_pa(pte: Pte) -> Pa {
        Pa::new((pte.bits() & PHYS_ADDR_MASK) as usize)
    }

    fn invalidate_stage1_range(begin: Va, end: Va) {
        // `invlpg` requires CPL0; under the host test harness this runs in
        // ordinary userspace, so the instruction is skipped there and the
        // range walk exists only to exercise the surrounding logic.
        #[cfg(not(test))]
        {
            let mut va = begin;
            while va.addr() < end.addr() {
                tlb::flush(VirtAddr::new(va.addr() as u64));
                va = va + crate::config::PAGE_SIZE;
            }
        }
        #[cfg(test)]
        {
            let _ = (begin, end);
        }
    }

    fn invalidate_stage2_range(_begin: Va, _end: Va) {
        // Stage-2 (EPT) invalidation requires an `invept` instruction which
        // is only valid inside a running VMX root operation; a software
        // backend with no hypervisor extensions enabled has nothing to
        // flush, so this is a stage-1-only build's intentional no-op.
    }

    fn arch_mm_init(root_pa: Pa, _is_primary: bool) -> bool {
        // Writing Cr3 requires CPL0; skipped under the host test harness
        // for the same reason the TLB flush above is.
        #[cfg(not(test))]
        {
            let Some(frame) =
                PhysFrame::from_start_address(PhysAddr::new(root_pa.addr() as u64)).ok()
            else {
                return false;
            };
            // Safety: `root_pa` is the freshly initialized root of a page
            // table built by this crate, following the same layout the CPU
            // expects.
            unsafe {
                Cr3::write(frame, Cr3Flags::empty());
            }
        }
        #[cfg(test)]
        {
            let _ = root_pa;
        }
        true
    }
}
