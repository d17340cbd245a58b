//! Cross-node process migration (§4.6 "Migration steps").
//!
//! Grounded on `keos_project3::fork`'s compose-then-dispatch shape,
//! generalized from a local register+memory copy into a two-packet
//! handshake between nodes. Retransmission and duplicate suppression
//! follow §9 "Retry loops": *"sequence-less acks keyed by home-RR; the
//! protocol accepts arbitrary reordering and duplication."*

use super::rr::Rr;
use super::wire::{build_frame, Packet};
use crate::mm::frame::NodeId;
use crate::mm::PageDirectory;
use crate::process::{Home, ProcState};
use crate::syscall::Kernel;
use std::collections::HashMap;
use std::sync::Mutex;

fn home_to_rr(home: Home) -> Rr {
    Rr::new(home.node, home.slot, crate::mm::PermBits::empty())
}

fn find_slot_by_home(kernel: &Kernel, home: Rr) -> Option<usize> {
    kernel
        .procs
        .slots
        .iter()
        .position(|s| home_to_rr(s.lock().unwrap().home) == home)
}

/// One outstanding (unacknowledged) outbound migration.
struct Outbound {
    pdir: Rr,
    state: crate::process::Registers,
    target_node: NodeId,
}

/// Tracks in-flight migrations on both the sending and receiving side
/// of this node.
pub struct MigrationTable {
    /// Source side: migrations awaiting a MIGRP, keyed by the
    /// migrating process's home RR.
    outbound: Mutex<HashMap<Rr, Outbound>>,
    /// Destination side: home RR -> local slot, so a duplicate MIGRQ is
    /// recognized and merely re-acknowledged (§8 property 6).
    inbound: Mutex<HashMap<Rr, usize>>,
}

impl MigrationTable {
    pub fn new() -> Self {
        MigrationTable {
            outbound: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
        }
    }

    /// Source side (§4.6 steps 1-3): marks `slot` MIGR and returns the
    /// MIGRQ frame to transmit. The directory RR addresses the
    /// migrating process's own slot on this node — page-pull traffic
    /// for `pglev == 2` resolves it straight back to `pdir` here rather
    /// than through the frame registry, since a whole directory is not
    /// itself a frame. Callers retransmit the returned frame on a timer
    /// until [`MigrationTable::on_migrp`] fires for the same home.
    pub fn begin_migration(
        &self,
        kernel: &Kernel,
        this_node: NodeId,
        slot: usize,
        target_node: NodeId,
    ) -> Vec<u8> {
        let (home, state) = {
            let mut p = kernel.procs.slots[slot].lock().unwrap();
            p.state = ProcState::Migr;
            (p.home, p.registers)
        };
        let home_rr = home_to_rr(home);
        let pdir_rr = Rr::new(this_node, slot as u32, crate::mm::PermBits::empty());

        self.outbound.lock().unwrap().insert(
            home_rr,
            Outbound {
                pdir: pdir_rr,
                state,
                target_node,
            },
        );

        let pkt = Packet::MigrQ {
            home: home_rr,
            pdir: pdir_rr,
            state,
        };
        build_frame(this_node, target_node, &pkt.encode())
    }

    /// Source side: a MIGRP arrived — the process now lives away.
    pub fn on_migrp(&self, kernel: &Kernel, home: Rr) {
        if self.outbound.lock().unwrap().remove(&home).is_some() {
            if let Some(slot) = find_slot_by_home(kernel, home) {
                kernel.procs.slots[slot].lock().unwrap().state = ProcState::Away;
            }
        }
        // A duplicate MIGRP for a home we no longer track is a no-op
        // re-acknowledgement, per §7 "Duplicate migration -> Acknowledge; do not re-run".
    }

    /// Rebuilds MIGRQ frames for every migration still unacknowledged,
    /// for a timer-driven caller to resend (§9 "Retry loops").
    pub fn retransmit(&self, this_node: NodeId) -> Vec<Vec<u8>> {
        self.outbound
            .lock()
            .unwrap()
            .iter()
            .map(|(home, out)| {
                let pkt = Packet::MigrQ {
                    home: *home,
                    pdir: out.pdir,
                    state: out.state,
                };
                build_frame(this_node, out.target_node, &pkt.encode())
            })
            .collect()
    }

    /// Destination side (§4.6 "Destination side"): looks up or
    /// allocates a local slot for `home`, replaces its directory with
    /// an empty one, and returns the MIGRP frame to send back.
    pub fn on_migrq(
        &self,
        kernel: &Kernel,
        this_node: NodeId,
        src_node: NodeId,
        home: Rr,
        remote_pdir: Rr,
        state: crate::process::Registers,
    ) -> Vec<u8> {
        let mut inbound = self.inbound.lock().unwrap();
        if let Some(&existing) = inbound.get(&home) {
            let _ = existing;
            // Duplicate: the slot already exists, just re-ack.
            let pkt = Packet::MigrP { home };
            return build_frame(this_node, src_node, &pkt.encode());
        }
        let slot = kernel.procs.alloc().expect("migration needs a free slot");
        {
            let mut p = kernel.procs.slots[slot].lock().unwrap();
            p.state = ProcState::Away;
            p.registers = state;
            p.home = Home {
                node: home.node,
                slot: home.addr,
            };
            p.pdir = PageDirectory::new();
            p.remote_pdir = Some(remote_pdir);
        }
        inbound.insert(home, slot);
        let pkt = Packet::MigrP { home };
        build_frame(this_node, src_node, &pkt.encode())
    }
}

impl Default for MigrationTable {
    fn default() -> Self {
        Self::new()
    }
}
