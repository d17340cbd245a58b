//! Wire-frame entry point: decodes an incoming frame and dispatches it
//! to the migration table or the page-pull responder/installer
//! functions (§4.6, §6 "Wire format").
//!
//! Grounded on `keos_project3::fork`'s single-entry dispatch shape,
//! generalized from an in-process syscall trap to a network rx path:
//! one function that identifies the packet kind and routes it,
//! returning whatever reply frames (if any) the caller should send.

use super::pull::{self, PGLEV_DIRECTORY, PGLEV_PAGE, PGLEV_TABLE};
use super::wire::{parse_frame, Packet};
use crate::process::ProcState;
use crate::syscall::Kernel;

/// Finds the local slot currently pulling against `rr`, if any.
fn find_pulling_slot(kernel: &Kernel, rr: super::rr::Rr) -> Option<usize> {
    kernel
        .procs
        .slots
        .iter()
        .position(|s| s.lock().unwrap().pull.as_ref().map(|p| p.rr) == Some(rr))
}

/// Moves a PULL slot back to READY once every PDE/PTE in its user
/// window has resolved (§8 property 7).
fn maybe_finish_pull(kernel: &Kernel, slot: usize) {
    let mut p = kernel.procs.slots[slot].lock().unwrap();
    if p.state == ProcState::Pull && p.pdir.fully_resolved() {
        p.pull = None;
        p.remote_pdir = None;
        p.state = ProcState::Ready;
        kernel.procs.admit_to_ready(slot);
    }
}

/// Decodes one incoming frame addressed to `kernel.node_id` and
/// dispatches it, returning any reply frames to transmit. A frame
/// addressed elsewhere, too short, or otherwise malformed is dropped
/// silently (§7 "Packet corruption / stray -> Drop silently").
pub fn net_rx(kernel: &Kernel, frame: &[u8]) -> Vec<Vec<u8>> {
    let Some((dst, src, ethertype, payload)) = parse_frame(frame) else {
        return Vec::new();
    };
    if dst != kernel.node_id || ethertype != super::wire::ETHERTYPE_MIGRATION {
        return Vec::new();
    }
    let Some(pkt) = Packet::decode(payload) else {
        return Vec::new();
    };

    match pkt {
        Packet::MigrQ { home, pdir, state } => {
            vec![kernel
                .migrations
                .on_migrq(kernel, kernel.node_id, src, home, pdir, state)]
        }
        Packet::MigrP { home } => {
            kernel.migrations.on_migrp(kernel, home);
            Vec::new()
        }
        Packet::PullRq { rr, pglev, need } => dispatch_pullrq(kernel, src, rr, pglev, need),
        Packet::PullRp { rr, part, payload } => dispatch_pullrp(kernel, rr, part, &payload),
    }
}

/// Responder side: `rr.addr` names a frame index, a registered table
/// address, or a process-table slot depending on `pglev`.
fn dispatch_pullrq(
    kernel: &Kernel,
    requester_node: crate::mm::frame::NodeId,
    rr: super::rr::Rr,
    pglev: u8,
    need: u8,
) -> Vec<Vec<u8>> {
    match pglev {
        PGLEV_PAGE => pull::respond_page(
            &kernel.arena,
            kernel.node_id,
            requester_node,
            rr,
            rr.addr as usize,
            need,
        ),
        PGLEV_TABLE => match kernel.rrtable.lookup_table(rr.addr) {
            Some(table) => {
                pull::respond_table(kernel.node_id, requester_node, rr, &table, need)
            }
            None => Vec::new(),
        },
        PGLEV_DIRECTORY => {
            let Some(slot) = kernel.procs.slots.get(rr.addr as usize) else {
                return Vec::new();
            };
            let p = slot.lock().unwrap();
            pull::respond_directory(
                kernel.node_id,
                requester_node,
                rr,
                &p.pdir,
                &kernel.rrtable,
                need,
            )
        }
        _ => Vec::new(),
    }
}

/// Requester side: folds a fragment into the slot currently pulling
/// `rr`, installing the assembled result once complete.
fn dispatch_pullrp(kernel: &Kernel, rr: super::rr::Rr, part: u8, payload: &[u8]) -> Vec<Vec<u8>> {
    let Some(slot) = find_pulling_slot(kernel, rr) else {
        return Vec::new();
    };
    let assembled = {
        let mut p = kernel.procs.slots[slot].lock().unwrap();
        let Some(state) = p.pull.as_mut() else {
            return Vec::new();
        };
        pull::on_pullrp(state, part, payload)
    };
    let Some(assembled) = assembled else {
        return Vec::new();
    };

    let (pglev, dir_slot, pte_idx) = {
        let p = kernel.procs.slots[slot].lock().unwrap();
        let state = p.pull.as_ref().unwrap();
        (state.pglev, state.dir_slot, state.pte_idx)
    };
    let mut p = kernel.procs.slots[slot].lock().unwrap();
    match pglev {
        PGLEV_PAGE => {
            if let (Some(ds), Some(pi)) = (dir_slot, pte_idx) {
                pull::install_page(&kernel.arena, &mut p.pdir, ds, pi, &assembled);
            }
        }
        PGLEV_TABLE => {
            if let Some(ds) = dir_slot {
                pull::install_table(&kernel.arena, &mut p.pdir, ds, &assembled);
            }
        }
        PGLEV_DIRECTORY => {
            let _ = pull::install_directory(&mut p.pdir, &assembled);
        }
        _ => {}
    }
    drop(p);
    maybe_finish_pull(kernel, slot);
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PermBits;
    use crate::net::rr::Rr;
    use crate::net::wire::build_frame;

    #[test]
    fn stray_frame_for_another_node_is_dropped() {
        let kernel = Kernel::new(4, 16, 1);
        let pkt = Packet::MigrP {
            home: Rr::new(1, 0, PermBits::empty()),
        };
        let frame = build_frame(9, 2, &pkt.encode()); // dst node 2, we are node 1
        assert!(net_rx(&kernel, &frame).is_empty());
    }

    #[test]
    fn short_frame_is_dropped() {
        let kernel = Kernel::new(4, 16, 1);
        assert!(net_rx(&kernel, &[0u8; 4]).is_empty());
    }
}
