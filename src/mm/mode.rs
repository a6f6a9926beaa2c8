// SPDX-License-Identifier: MPL-2.0

//! Mode flags steering a mapping request, and the narrower attribute set an
//! architecture backend encodes into a leaf PTE.
//!
//! `bitflags`-derived, the same idiom the donor uses for its own
//! `PageTableFlags`.

bitflags::bitflags! {
    /// Flags accompanying a map/unmap/query request.
    ///
    /// `R`, `W`, `X`, and `D` are forwarded to the backend's attribute
    /// encoder. `STAGE1`, `NOSYNC`, and `NOINVALIDATE` steer the engine
    /// itself and never reach the backend's PTE encoding.
    pub struct ModeFlags: u32 {
        /// Readable.
        const R = 1 << 0;
        /// Writable.
        const W = 1 << 1;
        /// Executable.
        const X = 1 << 2;
        /// Device memory (uncached, side-effecting).
        const D = 1 << 3;
        /// This operation targets the hypervisor's own stage-1 table, not a
        /// guest stage-2 table.
        const STAGE1 = 1 << 4;
        /// Use the non-synchronizing allocator and publication path. Valid
        /// only before other CPUs or the MMU can observe this table.
        const NOSYNC = 1 << 5;
        /// Suppress TLB invalidation after a successful commit.
        const NOINVALIDATE = 1 << 6;
    }
}

bitflags::bitflags! {
    /// The subset of [`ModeFlags`] an architecture backend actually encodes
    /// into a leaf PTE.
    pub struct Attrs: u32 {
        /// Readable.
        const R = 1 << 0;
        /// Writable.
        const W = 1 << 1;
        /// Executable.
        const X = 1 << 2;
        /// Device memory.
        const D = 1 << 3;
    }
}

impl From<ModeFlags> for Attrs {
    /// Projects the attribute-relevant bits of a mode mask.
    ///
    /// This default projection assumes `Attrs`'s bit positions match
    /// `ModeFlags`'s `R`/`W`/`X`/`D` bits, which holds for every mode defined
    /// above; a backend with its own attribute encoding overrides this via
    /// `ArchMm::mode_to_attrs` instead of relying on this conversion.
    fn from(mode: ModeFlags) -> Self {
        Attrs::from_bits_truncate(mode.bits() & 0b1111)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_to_attrs_projects_only_the_shared_bits() {
        let mode = ModeFlags::R | ModeFlags::W | ModeFlags::STAGE1 | ModeFlags::NOSYNC;
        let attrs: Attrs = mode.into();
        assert_eq!(attrs, Attrs::R | Attrs::W);
    }
}
