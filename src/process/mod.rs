//! Process table: per-slot process state and the cooperative scheduler
//! built over it (§4.2).
//!
//! Grounded on `keos::thread` (`Process`/`Task`, a saved register file
//! plus `pdir`) and `keos_project1::process::Process` (the child-slot
//! table on a parent), generalized to the nine-state machine this
//! specification names (FREE, RESERVED, STOP, READY, RUN, WAIT, MIGR,
//! AWAY, PULL) instead of the teacher's simpler RUNNING/DEAD split.

pub mod fork;
pub mod scheduler;

use crate::fs::FileState;
use crate::mm::PageDirectory;
use crate::mm::frame::NodeId;
use scheduler::{Fifo, Scheduler};
use std::sync::Mutex;

/// Number of inode slots in every process's file-state region (§3).
pub const FILE_TABLE_CAPACITY: usize = 64;

/// The saved CPU register file carried across PUT/GET/RET (§4.3).
/// Modeled as an opaque fixed-size blob rather than real x86 registers,
/// since boot/MMU/CPU enablement is out of scope (§1) — only the
/// rendezvous protocol's treatment of this state (copy in, copy out,
/// zero the return-value slot) is in scope here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub gpr: [u64; 16],
    pub rip: u64,
    pub rflags: u64,
}

impl Registers {
    /// The register conventionally used to carry a syscall's return
    /// value (like `rax` on x86_64).
    pub fn set_return_value(&mut self, v: u64) {
        self.gpr[0] = v;
    }

    pub fn return_value(&self) -> u64 {
        self.gpr[0]
    }
}

/// A stable cross-node identity: the node and slot where a process
/// originated (§3 "Process", GLOSSARY "Home").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Home {
    pub node: NodeId,
    pub slot: u32,
}

/// Process lifecycle states (§4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcState {
    Free,
    Reserved,
    Stop,
    Ready,
    Run,
    Wait,
    Migr,
    Away,
    Pull,
}

/// One process-table slot.
pub struct Process {
    pub slot: usize,
    pub state: ProcState,
    pub registers: Registers,
    /// Current page directory.
    pub pdir: PageDirectory,
    /// Reference snapshot taken at the last SYS_SNAP (§3 invariant).
    pub rpdir: PageDirectory,
    /// The file-state region living at `FILESVA` (§3, §4.5).
    pub files: FileState,
    /// Set while AWAY: the RR of this process's directory on the node
    /// it migrated from, resolved by page-pull (§4.6).
    pub remote_pdir: Option<crate::net::rr::Rr>,
    /// Set while PULL: progress pulling one page/table/directory in
    /// from `remote_pdir`'s node (§4.6 "Page pull").
    pub pull: Option<crate::net::pull::PullState>,
    pub parent: Option<usize>,
    /// Small-integer-indexed child slot array; `children[i]` is the
    /// process-table index of local child slot `i`, if any (§3).
    pub children: Vec<Option<usize>>,
    pub home: Home,
    /// Set while another process is blocked in GET/PUT waiting for this
    /// slot to reach STOP (§4.2 "Waiting on a child...").
    pub waited_on_by: Option<usize>,
    pub exited: bool,
    pub exit_status: i32,
}

impl Process {
    fn new(slot: usize, home: Home) -> Self {
        Process {
            slot,
            state: ProcState::Free,
            registers: Registers::default(),
            pdir: PageDirectory::new(),
            rpdir: PageDirectory::new(),
            files: FileState::new(FILE_TABLE_CAPACITY),
            remote_pdir: None,
            pull: None,
            parent: None,
            children: Vec::new(),
            home,
            waited_on_by: None,
            exited: false,
            exit_status: 0,
        }
    }
}

/// The process table plus its ready queue, driven by a pluggable
/// [`Scheduler`] (default: [`Fifo`]). Lock order is always
/// scheduler-before-process (§5); nothing is ever held across a
/// user-memory copy.
pub struct ProcessTable {
    pub slots: Vec<Mutex<Process>>,
    scheduler: Box<dyn Scheduler>,
    free: Mutex<Vec<usize>>,
    home_node: NodeId,
}

impl ProcessTable {
    /// Slot 0 is permanently reserved for `exec`'s staging area (§4.7
    /// "`exec` operates in the always-reserved child slot 0") and is
    /// never handed out by [`ProcessTable::alloc`].
    pub const EXEC_SLOT: usize = 0;

    pub fn new(capacity: usize, home_node: NodeId) -> Self {
        let slots: Vec<Mutex<Process>> = (0..capacity)
            .map(|i| {
                Mutex::new(Process::new(
                    i,
                    Home {
                        node: home_node,
                        slot: i as u32,
                    },
                ))
            })
            .collect();
        slots[Self::EXEC_SLOT].lock().unwrap().state = ProcState::Reserved;
        ProcessTable {
            slots,
            scheduler: Box::new(Fifo::new()),
            free: Mutex::new((1..capacity).rev().collect()),
            home_node,
        }
    }

    /// `FREE -> RESERVED` on alloc; returns `None` if no slot is free
    /// (the fork runtime reports this as EAGAIN).
    pub fn alloc(&self) -> Option<usize> {
        let idx = self.free.lock().unwrap().pop()?;
        let mut p = self.slots[idx].lock().unwrap();
        p.state = ProcState::Reserved;
        p.exited = false;
        p.exit_status = 0;
        p.children.clear();
        p.parent = None;
        p.waited_on_by = None;
        p.files = FileState::new(FILE_TABLE_CAPACITY);
        p.pdir = PageDirectory::new();
        p.rpdir = PageDirectory::new();
        p.remote_pdir = None;
        p.pull = None;
        p.home = Home {
            node: self.home_node,
            slot: idx as u32,
        };
        Some(idx)
    }

    /// Returns a slot to FREE, to be reused by a future `alloc`.
    pub fn free(&self, idx: usize) {
        let mut p = self.slots[idx].lock().unwrap();
        p.state = ProcState::Free;
        self.free.lock().unwrap().push(idx);
    }

    /// `READY` transition: enqueues `idx` onto the ready queue
    /// (RESERVED/STOP -> READY, §4.2).
    pub fn ready(&self, idx: usize) {
        {
            let mut p = self.slots[idx].lock().unwrap();
            p.state = ProcState::Ready;
        }
        self.scheduler.push(idx);
    }

    /// Admits `idx` to the ready queue without touching its process
    /// state, for callers that already hold `idx`'s process lock and
    /// have set the state themselves (avoids relocking the same slot).
    pub fn admit_to_ready(&self, idx: usize) {
        self.scheduler.push(idx);
    }

    /// Pops the next ready slot, transitioning it READY -> RUN.
    pub fn schedule_next(&self) -> Option<usize> {
        let idx = self.scheduler.next_to_run()?;
        let mut p = self.slots[idx].lock().unwrap();
        p.state = ProcState::Run;
        Some(idx)
    }
}
