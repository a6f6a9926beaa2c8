// SPDX-License-Identifier: MPL-2.0

//! The error type returned from the internal, `Result`-based APIs of this
//! crate.
//!
//! The engine's public operations (`identity_map`, `unmap`, ...) stay
//! boolean, per the specification they implement: a caller only ever learns
//! that an operation failed, not why. Internally, though, propagation uses
//! `Result` and `?` like the rest of the stack, and [`MmError`] is the error
//! type that flows through it.
//!
//! A virtual address that lies outside a table's coverage is *not* one of
//! these errors: the engine reports it as "not mapped" (`false`), never as a
//! failure.

/// The error type which is returned from the internal APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MmError {
    /// A page-aligned, page-sized region could not be obtained from the
    /// allocator.
    AllocationExhausted,
}
