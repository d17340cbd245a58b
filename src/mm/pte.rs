//! Page-table entry representation.
//!
//! The teacher's `Pml4e`/`Pdpe`/`Pde`/`Pte` types each wrap a 32/64-bit
//! cell and expose `.pa()`/`.flags()`/`.set_pa()` accessors over the raw
//! bits (see `mm::page_table::Pml4e`). Section 9's design notes ask for
//! something less bit-twiddly at this layer — `PteKind = { Absent, Zero,
//! Local(frame), Remote(node,addr) }` — so this module keeps the
//! teacher's split of "hardware-observable bits" vs. "nominal software
//! bits" but represents it as a tagged enum instead of sprinkling bit
//! tests through the walker.

use crate::mm::frame::{Frame, NodeId};

bitflags::bitflags! {
    /// Nominal, software-only permission bits (§3 "Page-directory /
    /// page-table entry"). Distinct from the hardware-writable bit,
    /// which COW may clear independently (§9 "Permission overlay").
    #[derive(Default)]
    pub struct PermBits: u8 {
        /// Nominal SYS_READ.
        const SYS_READ = 0b01;
        /// Nominal SYS_WRITE.
        const SYS_WRITE = 0b10;
    }
}

/// What a page-table leaf currently maps to.
#[derive(Clone)]
pub enum PteKind {
    /// No mapping at all.
    Absent,
    /// Maps the shared, read-only zero page.
    Zero,
    /// Maps a locally resident frame. `hw_writable` tracks the hardware
    /// writable bit independently of `nominal` (§9).
    Local { frame: Frame, hw_writable: bool },
    /// A remote reference: the REMOTE bit is set and the payload names
    /// `(node, frame index on that node)` rather than a local frame
    /// (§3 invariant on the REMOTE bit).
    Remote { node: NodeId, addr: usize },
}

/// One page-table leaf entry: the mapping plus nominal permissions.
#[derive(Clone)]
pub struct Pte {
    pub kind: PteKind,
    pub nominal: PermBits,
}

impl Default for Pte {
    fn default() -> Self {
        Pte {
            kind: PteKind::Absent,
            nominal: PermBits::empty(),
        }
    }
}

impl Pte {
    /// A present, locally-mapped, read-write entry over `frame`.
    pub fn local_rw(frame: Frame) -> Self {
        Pte {
            kind: PteKind::Local {
                frame,
                hw_writable: true,
            },
            nominal: PermBits::SYS_READ | PermBits::SYS_WRITE,
        }
    }

    /// Whether the REMOTE bit is set on this entry.
    pub fn is_remote(&self) -> bool {
        matches!(self.kind, PteKind::Remote { .. })
    }

    /// Whether this entry currently has no present mapping at all
    /// (neither local, zero, nor remote).
    pub fn is_absent(&self) -> bool {
        matches!(self.kind, PteKind::Absent)
    }

    /// Hardware-observable writable bit, `false` for anything that is
    /// not a locally-writable mapping.
    pub fn hw_writable(&self) -> bool {
        matches!(
            self.kind,
            PteKind::Local {
                hw_writable: true,
                ..
            }
        )
    }

    /// Clears the hardware-writable bit in place, leaving the nominal
    /// permission (and thus future fault-driven reconciliation) intact
    /// — this is exactly the COW write-protect step (§4.1 `copy`).
    pub fn clear_hw_writable(&mut self) {
        if let PteKind::Local { hw_writable, .. } = &mut self.kind {
            *hw_writable = false;
        }
    }

    /// The resident frame, if this entry maps one locally.
    pub fn frame(&self) -> Option<&Frame> {
        match &self.kind {
            PteKind::Local { frame, .. } => Some(frame),
            _ => None,
        }
    }
}
