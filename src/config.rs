// SPDX-License-Identifier: MPL-2.0

//! Compile-time and boot-time constants.
//!
//! Most of these mirror fixed properties of the hardware address-translation
//! scheme (page size, table fan-out); [`LOG_LEVEL`] is the one knob callers
//! are expected to override by editing this file for their embedding, the
//! same way the donor exposes its scheduling/log knobs.

#![allow(unused)]

use log::Level;

/// The size, in bytes, of the smallest unit this crate maps: one page.
pub const PAGE_SIZE: usize = 0x1000;
/// `log2(PAGE_SIZE)`.
pub const PAGE_BITS: usize = 0xc;

/// The number of page-table-entry index bits consumed per table level.
///
/// Combined with [`PAGE_BITS`], this fixes how many virtual-address bits an
/// `ArchMm` backend's `max_level` can cover: `PAGE_BITS + PAGE_LEVEL_BITS *
/// (max_level + 1)`.
pub const PAGE_LEVEL_BITS: usize = 9;

/// The number of entries in a single page table: `1 << PAGE_LEVEL_BITS`.
pub const ENTRIES_PER_TABLE: usize = 1 << PAGE_LEVEL_BITS;

/// The offset added to a physical address to obtain the virtual address the
/// hypervisor itself uses to access that physical memory directly (the
/// identity/offset mapping of all usable RAM).
pub const PHYS_OFFSET: usize = 0xFFFF_8000_0000_0000;

/// The minimum severity of `log` records the installed logger accepts.
pub const LOG_LEVEL: Level = Level::Info;
