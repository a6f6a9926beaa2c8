// SPDX-License-Identifier: MPL-2.0

//! The hypervisor-level facade: a process-wide stage-1 table, initialized
//! once at boot, guarded by a [`SpinLock`] so concurrent callers of the
//! convenience entry points below serialize automatically. This lock is
//! facade bookkeeping; the table engine itself holds no lock and expects
//! callers operating directly on a handle to serialize themselves.

use spin::Once;

use crate::arch::{ArchMm, X86_64Mm};
use crate::mm::addr::Va;
use crate::mm::allocator::PageAllocator;
use crate::mm::boot_image::ImageLayout;
use crate::mm::engine;
use crate::mm::mode::ModeFlags;
use crate::mm::table::PageTable;
use crate::sync::SpinLock;

static PTABLE: Once<SpinLock<PageTable<X86_64Mm>>> = Once::new();
static ALLOCATOR: Once<&'static dyn PageAllocator> = Once::new();
static LAYOUT: Once<ImageLayout> = Once::new();

fn boot_segment_modes() -> (ModeFlags, ModeFlags, ModeFlags, ModeFlags) {
    let base = ModeFlags::NOSYNC | ModeFlags::STAGE1;
    (
        ModeFlags::R | ModeFlags::W | ModeFlags::D | base, // UART
        ModeFlags::X | base,                               // text
        ModeFlags::R | base,                                // rodata
        ModeFlags::R | ModeFlags::W | base,                 // data
    )
}

fn init_table_and_map_segments(
    allocator: &'static dyn PageAllocator,
    phys_to_virt_offset: usize,
    layout: &ImageLayout,
) -> Option<(PageTable<X86_64Mm>, bool)> {
    let table = PageTable::<X86_64Mm>::init(
        allocator,
        0,
        phys_to_virt_offset,
        ModeFlags::NOSYNC | ModeFlags::STAGE1,
    )
    .map_err(|_| log::error!("mm_init: failed to allocate the root page table"))
    .ok()?;

    log::info!(
        "mm_init: text {:?}..{:?}, rodata {:?}..{:?}, data {:?}..{:?}",
        layout.text.begin,
        layout.text.end,
        layout.rodata.begin,
        layout.rodata.end,
        layout.data.begin,
        layout.data.end,
    );

    let (uart_mode, text_mode, rodata_mode, data_mode) = boot_segment_modes();

    let ok = engine::identity_map_page(&table, allocator, layout.uart_mmio_page, uart_mode)
        && engine::identity_map(&table, allocator, layout.text.begin, layout.text.end, text_mode)
        && engine::identity_map(
            &table,
            allocator,
            layout.rodata.begin,
            layout.rodata.end,
            rodata_mode,
        )
        && engine::identity_map(&table, allocator, layout.data.begin, layout.data.end, data_mode);

    Some((table, ok))
}

/// Initializes the process-wide stage-1 table: allocates its root,
/// identity-maps the UART MMIO page and the text/rodata/data segments
/// described by `layout`, then programs the MMU via
/// `ArchMm::arch_mm_init`.
///
/// Unlike the source this facade is modeled on, a segment-mapping failure is
/// surfaced here rather than ignored (see [`mm_init_lenient`] for the
/// original, lenient behavior).
pub fn mm_init(
    allocator: &'static dyn PageAllocator,
    phys_to_virt_offset: usize,
    layout: ImageLayout,
) -> bool {
    ALLOCATOR.call_once(|| allocator);
    LAYOUT.call_once(|| layout);

    let Some((table, segments_ok)) =
        init_table_and_map_segments(allocator, phys_to_virt_offset, &layout)
    else {
        return false;
    };
    if !segments_ok {
        log::error!("mm_init: failed to map a boot segment");
        return false;
    }

    if !X86_64Mm::arch_mm_init(table.root(), true) {
        log::error!("mm_init: arch_mm_init failed");
        return false;
    }

    PTABLE.call_once(|| SpinLock::new(table));
    true
}

/// Like [`mm_init`], but ignores segment-mapping failures and always
/// proceeds to program the MMU, matching the boot sequence this crate is
/// modeled on bit-for-bit. Only the root table allocation is fatal.
pub fn mm_init_lenient(
    allocator: &'static dyn PageAllocator,
    phys_to_virt_offset: usize,
    layout: ImageLayout,
) -> bool {
    ALLOCATOR.call_once(|| allocator);
    LAYOUT.call_once(|| layout);

    let Some((table, segments_ok)) =
        init_table_and_map_segments(allocator, phys_to_virt_offset, &layout)
    else {
        return false;
    };
    if !segments_ok {
        log::warn!("mm_init_lenient: a boot segment failed to map; continuing anyway");
    }

    let ok = X86_64Mm::arch_mm_init(table.root(), true);
    PTABLE.call_once(|| SpinLock::new(table));
    ok
}

/// Programs the MMU on a secondary CPU to use the already-initialized
/// stage-1 table.
pub fn mm_cpu_init() -> bool {
    let Some(table) = PTABLE.get() else {
        log::error!("mm_cpu_init: called before mm_init");
        return false;
    };
    X86_64Mm::arch_mm_init(table.lock().root(), false)
}

/// Maps `[va_begin, va_end)` into the process-wide stage-1 table.
pub fn identity_map(va_begin: Va, va_end: Va, mode: ModeFlags) -> bool {
    let (Some(table), Some(allocator)) = (PTABLE.get(), ALLOCATOR.get()) else {
        return false;
    };
    engine::identity_map(&table.lock(), *allocator, va_begin, va_end, mode | ModeFlags::STAGE1)
}

/// Unmaps `[va_begin, va_end)` from the process-wide stage-1 table.
pub fn unmap(va_begin: Va, va_end: Va, mode: ModeFlags) -> bool {
    let (Some(table), Some(allocator)) = (PTABLE.get(), ALLOCATOR.get()) else {
        return false;
    };
    engine::unmap(&table.lock(), *allocator, va_begin, va_end, mode | ModeFlags::STAGE1)
}

/// Defragments the process-wide stage-1 table.
pub fn defrag(mode: ModeFlags) {
    if let Some(table) = PTABLE.get() {
        engine::defrag(&table.lock(), mode | ModeFlags::STAGE1);
    }
}

/// Unmaps the hypervisor's text, rodata, and data segments from `table` (a
/// guest stage-2 table, typically). Short-circuits on the first failure.
pub fn unmap_hypervisor<A: ArchMm>(
    table: &PageTable<A>,
    allocator: &dyn PageAllocator,
    mode: ModeFlags,
) -> bool {
    let Some(layout) = LAYOUT.get() else {
        log::error!("unmap_hypervisor: called before mm_init");
        return false;
    };
    engine::unmap(table, allocator, layout.text.begin, layout.text.end, mode)
        && engine::unmap(table, allocator, layout.rodata.begin, layout.rodata.end, mode)
        && engine::unmap(table, allocator, layout.data.begin, layout.data.end, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::allocator::BumpPageAllocator;
    use crate::mm::addr::Pa;
    use crate::config::PAGE_SIZE;

    fn layout() -> ImageLayout {
        ImageLayout {
            text: crate::mm::boot_image::VaRange::new(Va::new(0x1000), Va::new(0x2000)),
            rodata: crate::mm::boot_image::VaRange::new(Va::new(0x2000), Va::new(0x3000)),
            data: crate::mm::boot_image::VaRange::new(Va::new(0x3000), Va::new(0x4000)),
            uart_mmio_page: Va::new(0x0900_0000),
        }
    }

    // These tests share process-wide statics with every other test in this
    // module (`PTABLE`/`ALLOCATOR`/`LAYOUT` are `Once`s), so only the first
    // `mm_init`-family call in the whole test binary actually takes effect;
    // later calls in other tests observe whatever was initialized first.
    // Assertions here only depend on *a* successful init having happened,
    // not on which call performed it.
    #[test]
    fn mm_init_leaves_uart_and_segments_mapped() {
        let backing =
            alloc::boxed::Box::leak(alloc::vec![0u8; 512 * PAGE_SIZE].into_boxed_slice());
        let offset = backing.as_mut_ptr() as usize;
        let allocator =
            alloc::boxed::Box::leak(alloc::boxed::Box::new(BumpPageAllocator::new(
                Pa::new(0),
                512 * PAGE_SIZE,
                offset,
            )));

        let _ = mm_init(allocator, offset, layout());

        assert!(PTABLE.get().is_some());
        assert!(identity_map(Va::new(0x5000_0000), Va::new(0x5000_1000), ModeFlags::R));
        assert!(unmap(Va::new(0x5000_0000), Va::new(0x5000_1000), ModeFlags::empty()));
    }
}
