// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.
//!
//! The engine only ever needs mutual exclusion around a page table handle;
//! the donor's richer `Mutex`/`RwLock`/`RwMutex`/`WaitQueue` family all exist
//! to serve its task scheduler, which has no counterpart here.

mod spin;

pub use self::spin::{SpinLock, SpinLockGuard};
