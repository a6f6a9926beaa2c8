// SPDX-License-Identifier: MPL-2.0

//! The multi-level, architecture-agnostic page-table engine.
//!
//! [`engine`] holds the recursive mapper/unmapper/query/dump/defrag logic;
//! [`table`] is the handle it operates on; [`allocator`] supplies pages;
//! [`addr`] and [`mode`] are the shared value types at the seams between
//! them. [`hypervisor`] is the process-wide facade built on top of all of
//! the above.

pub mod addr;
pub mod allocator;
pub mod boot_image;
pub mod engine;
pub mod hypervisor;
pub mod mode;
pub mod table;

use core::sync::atomic::AtomicU64;

use addr::Pa;

/// Views the table rooted at `pa` as its raw entry words.
///
/// # Safety
///
/// `pa` must be the physical address of a page-aligned, page-sized table
/// reachable at virtual address `pa.addr() + phys_to_virt_offset`, and must
/// remain exclusively owned by the caller's table handle for the lifetime
/// of the returned slice (no other code may concurrently free or repurpose
/// the page).
pub(crate) fn table_entries(pa: Pa, phys_to_virt_offset: usize) -> &'static [AtomicU64] {
    // Safety: upheld by this function's own contract, which every caller in
    // this crate satisfies by construction (pages are handed out by a
    // `PageAllocator` and never freed or reused while a handle is live).
    unsafe {
        core::slice::from_raw_parts(
            (pa.addr() + phys_to_virt_offset) as *const AtomicU64,
            crate::config::ENTRIES_PER_TABLE,
        )
    }
}
