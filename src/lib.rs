// SPDX-License-Identifier: MPL-2.0

//! A multi-level, architecture-agnostic page-table engine for a bare-metal
//! hypervisor.
//!
//! The engine (see [`mm::engine`]) translates map/unmap/query/defragment
//! requests into in-memory updates of a radix-style page-table structure. It
//! couples a bounded recursive traversal with block-vs-page decisions at each
//! level, an atomic sub-table publication protocol, a two-phase apply/commit
//! discipline so a failed allocation never leaves a half-applied mapping, and
//! TLB maintenance ordered against the memory updates that motivate it.
//!
//! The engine itself never decides what a PTE's bits mean: an [`arch::ArchMm`]
//! backend is consulted for every classification and encoding, so the same
//! engine drives both the hypervisor's own stage-1 table and per-VM stage-2
//! (guest-physical to host-physical) tables.
#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod console;
mod error;
pub mod logger;
pub mod mm;
pub mod sync;

pub use error::MmError;
