//! On-demand page pull for migrated processes (§4.6 "Page pull").
//!
//! A PDE/PTE with the REMOTE bit set is resolved by requesting it from
//! the node named in the reference. Responses arrive as three
//! fragments (§6 "PULLRP"); `PullState::on_fragment` tracks which have
//! arrived and assembles them, mirroring the `arrived` bitmap the spec
//! prescribes.

use super::rr::Rr;
use super::wire::{build_frame, Packet, PART_OFFSETS, PART_SIZES};
use crate::addr::{ENTRIES_PER_TABLE, PAGESIZE};
use crate::error::KernelError;
use crate::mm::frame::NodeId;
use crate::mm::pte::{Pte, PteKind};
use crate::mm::{FrameArena, PageDirectory, PageTable, PermBits};
use std::sync::{Arc, Mutex};

/// `pglev` values (§4.6).
pub const PGLEV_PAGE: u8 = 0;
pub const PGLEV_TABLE: u8 = 1;
pub const PGLEV_DIRECTORY: u8 = 2;

/// One in-flight pull (§3 "Process": "migration/pull linkage").
///
/// `rr` names the *remote* resource (frame index, registered table
/// address, or process slot) the PULLRQ is sent against; `dir_slot`/
/// `pte_idx` instead name where the assembled result is installed
/// *locally* once complete — the two addresses don't coincide, so
/// both have to be carried. `dir_slot` is `None` only for a
/// [`PGLEV_DIRECTORY`] pull (there is no single slot to target: the
/// whole directory is being replaced); `pte_idx` is set only for a
/// [`PGLEV_PAGE`] pull.
#[derive(Clone)]
pub struct PullState {
    pub rr: Rr,
    pub pglev: u8,
    pub dir_slot: Option<usize>,
    pub pte_idx: Option<usize>,
    /// Bitmap, bits 0..2, of fragments that have arrived.
    arrived: u8,
    buffer: Vec<u8>,
}

impl PullState {
    pub fn new(rr: Rr, pglev: u8, dir_slot: Option<usize>, pte_idx: Option<usize>) -> Self {
        PullState {
            rr,
            pglev,
            dir_slot,
            pte_idx,
            arrived: 0,
            buffer: vec![0u8; PAGESIZE],
        }
    }

    /// Bitmap of fragments still wanted, for a retransmitted PULLRQ.
    pub fn still_needed(&self) -> u8 {
        0b111 & !self.arrived
    }

    pub fn is_complete(&self) -> bool {
        self.arrived == 0b111
    }

    /// Records one arrived fragment. Ignores out-of-range parts and
    /// duplicate arrivals (idempotent, per §9 "Retry loops").
    fn on_fragment(&mut self, part: u8, payload: &[u8]) {
        if part > 2 {
            return;
        }
        let off = PART_OFFSETS[part as usize];
        let n = PART_SIZES[part as usize].min(payload.len());
        self.buffer[off..off + n].copy_from_slice(&payload[..n]);
        self.arrived |= 1 << part;
    }
}

/// Requester side: starts a pull against the remote resource named by
/// `rr`, installing its result at local `dir_slot`/`pte_idx` once
/// complete, and returns the PULLRQ frame to send (§4.6).
pub fn begin_pull(
    this_node: NodeId,
    rr: Rr,
    pglev: u8,
    dir_slot: Option<usize>,
    pte_idx: Option<usize>,
) -> (PullState, Vec<u8>) {
    let state = PullState::new(rr, pglev, dir_slot, pte_idx);
    let pkt = Packet::PullRq {
        rr,
        pglev,
        need: state.still_needed(),
    };
    let frame = build_frame(this_node, rr.node, &pkt.encode());
    (state, frame)
}

/// Requester side: retransmits a PULLRQ for whatever fragments are
/// still missing (§9 "Retry loops").
pub fn retransmit(this_node: NodeId, state: &PullState) -> Option<Vec<u8>> {
    if state.is_complete() {
        return None;
    }
    let pkt = Packet::PullRq {
        rr: state.rr,
        pglev: state.pglev,
        need: state.still_needed(),
    };
    Some(build_frame(this_node, state.rr.node, &pkt.encode()))
}

/// Requester side: folds one PULLRP fragment in, returning the fully
/// assembled page once all three have arrived.
pub fn on_pullrp(state: &mut PullState, part: u8, payload: &[u8]) -> Option<Vec<u8>> {
    state.on_fragment(part, payload);
    state.is_complete().then(|| state.buffer.clone())
}

/// Discriminant for an entry on the wire: absent, the shared zero page,
/// or a (possibly already-remote) reference (§4.6 entry-rewrite rules).
const WIRE_ABSENT: u32 = 0;
const WIRE_ZERO: u32 = 1;
const WIRE_REF: u32 = 2;

fn encode_entry(kind: u32, node: NodeId, addr: u32) -> u32 {
    (kind << 30) | ((node as u32) << 22) | (addr & 0x003F_FFFF)
}

fn decode_entry(word: u32) -> (u32, NodeId, u32) {
    let kind = word >> 30;
    let node = ((word >> 22) & 0xFF) as u8;
    let addr = word & 0x003F_FFFF;
    (kind, node, addr)
}

/// Rewrites one leaf PTE for the wire (§4.6): local present entries
/// become RRs against `sender_node`; already-remote entries pass
/// through; the zero page becomes a node-less RR with a zero address.
/// There is no kernel/global mapping in this crate's user-window-only
/// directory, so the spec's "global entries are zeroed" step has
/// nothing to do here.
fn encode_pte_for_wire(pte: &Pte, sender_node: NodeId) -> u32 {
    match &pte.kind {
        PteKind::Absent => encode_entry(WIRE_ABSENT, 0, 0),
        PteKind::Zero => encode_entry(WIRE_ZERO, 0, 0),
        PteKind::Local { frame, .. } => encode_entry(WIRE_REF, sender_node, frame.index() as u32),
        PteKind::Remote { node, addr } => encode_entry(WIRE_REF, *node, *addr as u32),
    }
}

fn decode_pte_from_wire(word: u32) -> PteKind {
    let (kind, node, addr) = decode_entry(word);
    match kind {
        WIRE_ZERO => PteKind::Zero,
        WIRE_REF => PteKind::Remote {
            node,
            addr: addr as usize,
        },
        _ => PteKind::Absent,
    }
}

/// Responder side for `pglev == 0`: serializes a resident, owned frame
/// into the 3 PULLRP fragments `need` still asks for, marking it
/// shared with the requester (§4.6).
pub fn respond_page(
    arena: &FrameArena,
    this_node: NodeId,
    requester_node: NodeId,
    rr: Rr,
    frame_idx: usize,
    need: u8,
) -> Vec<Vec<u8>> {
    let Some(frame) = arena.frame_at(frame_idx) else {
        return Vec::new(); // not resident/owned here: drop silently (§7).
    };
    frame.mark_shared_with(requester_node);
    let bytes = frame.read();
    arena.free_frame(frame); // release our extra ref from frame_at; the
                             // arena-held reference keeps it alive.
    (0..3)
        .filter(|p| need & (1 << p) != 0)
        .map(|p| {
            let off = PART_OFFSETS[p];
            let payload = bytes[off..off + PART_SIZES[p]].to_vec();
            let pkt = Packet::PullRp {
                rr,
                part: p as u8,
                payload,
            };
            build_frame(this_node, requester_node, &pkt.encode())
        })
        .collect()
}

/// Responder side for `pglev == 1`: serializes every leaf of `table`
/// into a page-sized buffer of rewritten entries.
pub fn respond_table(
    this_node: NodeId,
    requester_node: NodeId,
    rr: Rr,
    table: &Arc<Mutex<PageTable>>,
    need: u8,
) -> Vec<Vec<u8>> {
    let mut bytes = vec![0u8; PAGESIZE];
    {
        let t = table.lock().unwrap();
        for idx in 0..ENTRIES_PER_TABLE {
            let word = encode_pte_for_wire(t.pte_at(idx), this_node);
            bytes[idx * 4..idx * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
    }
    (0..3)
        .filter(|p| need & (1 << p) != 0)
        .map(|p| {
            let off = PART_OFFSETS[p];
            let payload = bytes[off..off + PART_SIZES[p]].to_vec();
            let pkt = Packet::PullRp {
                rr,
                part: p as u8,
                payload,
            };
            build_frame(this_node, requester_node, &pkt.encode())
        })
        .collect()
}

/// Responder side for `pglev == 2`: serializes every directory slot,
/// registering any still-local table under `rrtable` so the requester
/// can follow up with a `pglev == 1` pull for it.
pub fn respond_directory(
    this_node: NodeId,
    requester_node: NodeId,
    rr: Rr,
    dir: &PageDirectory,
    rrtable: &super::registry::RrTable,
    need: u8,
) -> Vec<Vec<u8>> {
    let mut bytes = vec![0u8; PAGESIZE];
    for idx in 0..PageDirectory::slot_count() {
        let word = if let Some((node, addr)) = dir.slot_remote(idx) {
            encode_entry(WIRE_REF, node, addr as u32)
        } else if let Some(table) = dir.slot_table(idx) {
            let addr = rrtable.register_table(table);
            encode_entry(WIRE_REF, this_node, addr)
        } else {
            encode_entry(WIRE_ABSENT, 0, 0)
        };
        if idx * 4 + 4 <= bytes.len() {
            bytes[idx * 4..idx * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
    }
    (0..3)
        .filter(|p| need & (1 << p) != 0)
        .map(|p| {
            let off = PART_OFFSETS[p];
            let payload = bytes[off..off + PART_SIZES[p]].to_vec();
            let pkt = Packet::PullRp {
                rr,
                part: p as u8,
                payload,
            };
            build_frame(this_node, requester_node, &pkt.encode())
        })
        .collect()
}

/// Requester side: once a `pglev == 0` pull completes, installs the
/// assembled page as a fresh owned frame at `dir`'s slot `slot`, leaf
/// `pte_idx` — which must already be a `Local` table (resolved by a
/// prior `pglev == 1` pull). Returns `false` without installing
/// anything if it isn't (§4.6 "the pull then walks forward through the
/// user window": a table always resolves before any of its pages).
pub fn install_page(
    arena: &FrameArena,
    dir: &mut PageDirectory,
    slot: usize,
    pte_idx: usize,
    assembled: &[u8],
) -> bool {
    let Some(table) = dir.slot_table(slot) else {
        return false;
    };
    let Ok(frame) = arena.alloc() else {
        return false;
    };
    let mut page = [0u8; PAGESIZE];
    page.copy_from_slice(assembled);
    frame.write(&page);
    let mut t = table.lock().unwrap();
    t.set_pte(
        arena,
        pte_idx,
        Pte {
            kind: PteKind::Local {
                frame,
                hw_writable: true,
            },
            nominal: PermBits::SYS_READ | PermBits::SYS_WRITE,
        },
    );
    true
}

/// Requester side: once a `pglev == 1` pull completes, installs the
/// assembled leaves as a fresh local table in `dir` at `slot`. The
/// table is freshly allocated, so `arena` is only needed to satisfy
/// [`PageTable::set_pte`]'s signature — no leaf it replaces is ever
/// present.
pub fn install_table(arena: &FrameArena, dir: &mut PageDirectory, slot: usize, assembled: &[u8]) {
    let table = Arc::new(Mutex::new(PageTable::new()));
    {
        let mut t = table.lock().unwrap();
        for idx in 0..ENTRIES_PER_TABLE {
            let word = u32::from_be_bytes(assembled[idx * 4..idx * 4 + 4].try_into().unwrap());
            let kind = decode_pte_from_wire(word);
            let perm = match &kind {
                PteKind::Absent => PermBits::empty(),
                PteKind::Zero => PermBits::SYS_READ,
                _ => PermBits::SYS_READ | PermBits::SYS_WRITE,
            };
            t.set_pte(
                arena,
                idx,
                Pte {
                    kind,
                    nominal: perm,
                },
            );
        }
    }
    dir.set_slot_local(slot, table);
}

/// Requester side: once a `pglev == 2` pull completes, installs every
/// slot as either absent or a pending remote reference, ready for
/// `pglev == 1`/`pglev == 0` follow-up pulls (§4.6 "the pull then walks
/// forward through the user window").
pub fn install_directory(dir: &mut PageDirectory, assembled: &[u8]) -> Result<(), KernelError> {
    for idx in 0..PageDirectory::slot_count() {
        if idx * 4 + 4 > assembled.len() {
            break;
        }
        let word = u32::from_be_bytes(assembled[idx * 4..idx * 4 + 4].try_into().unwrap());
        match decode_pte_from_wire(word) {
            PteKind::Absent => {}
            PteKind::Remote { node, addr } => dir.set_slot_remote(idx, node, addr),
            PteKind::Zero | PteKind::Local { .. } => return Err(KernelError::BadAddress),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PermBits;

    #[test]
    fn pull_state_assembles_once_all_three_parts_arrive() {
        let rr = Rr::new(2, 5, PermBits::empty());
        let mut state = PullState::new(rr, PGLEV_PAGE, None, None);
        assert_eq!(state.still_needed(), 0b111);
        assert!(on_pullrp(&mut state, 0, &vec![1u8; PART_SIZES[0]]).is_none());
        assert!(on_pullrp(&mut state, 1, &vec![2u8; PART_SIZES[1]]).is_none());
        let full = on_pullrp(&mut state, 2, &vec![3u8; PART_SIZES[2]]).unwrap();
        assert_eq!(full.len(), PAGESIZE);
        assert_eq!(full[0], 1);
        assert_eq!(full[PART_OFFSETS[1]], 2);
        assert_eq!(full[PART_OFFSETS[2]], 3);
    }

    #[test]
    fn duplicate_fragment_is_idempotent() {
        let rr = Rr::new(2, 5, PermBits::empty());
        let mut state = PullState::new(rr, PGLEV_PAGE, None, None);
        on_pullrp(&mut state, 0, &vec![9u8; PART_SIZES[0]]);
        on_pullrp(&mut state, 0, &vec![9u8; PART_SIZES[0]]);
        assert_eq!(state.still_needed(), 0b110);
    }

    #[test]
    fn respond_page_shares_the_frame_with_the_requester() {
        let arena = FrameArena::new(4);
        let f = arena.alloc().unwrap();
        let idx = f.index();
        let rr = Rr::new(1, idx as u32, PermBits::empty());
        let frames = respond_page(&arena, 1, 2, rr, idx, 0b111);
        assert_eq!(frames.len(), 3);
        assert_eq!(f.share_mask(), 0b10);
    }

    #[test]
    fn unresident_frame_is_dropped_silently() {
        let arena = FrameArena::new(1);
        let rr = Rr::new(1, 0, PermBits::empty());
        assert!(respond_page(&arena, 1, 2, rr, 0, 0b111).is_empty());
    }
}
