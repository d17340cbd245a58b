//! The user-level fork/exit/wait runtime built entirely out of
//! PUT/GET/RET (§4.4). Nothing here is a kernel primitive in its own
//! right; a userland process library issuing these three syscalls in
//! this order is what the spec's fork/wait behavior "is".
//!
//! Grounded on `keos_project3::fork::Fork` (the single-syscall fork
//! that composes register copy, address-space copy and scheduling) and
//! `keos_project1::process::Process::wait` (the parent-side wait loop
//! that drains a child's exit status), generalized to this spec's
//! split rendezvous syscalls and its file-state reconciliation step.
//!
//! Real preemptive execution of user code is out of scope (§1), so
//! `wait_step` performs exactly one GET/reconcile/PUT cycle and
//! reports whether the child exited or was resumed, rather than
//! looping until exit itself — an external driver (a test, or in a
//! real deployment the scheduler) is expected to call it again after
//! letting the child run.

use crate::addr::{USERHI, USERLO};
use crate::error::KernelError;
use crate::fs::reconcile;
use crate::mm::PermBits;
use crate::process::ProcState;
use crate::syscall::{CmdFlags, Command, Kernel, MemOp, RendezvousArgs, SyscallType};

/// Outcome of one `wait_step` cycle.
#[derive(Debug, Eq, PartialEq)]
pub enum WaitStep {
    /// The child exited; its slot has been freed.
    Exited(i32),
    /// The child is still alive and has been resumed.
    Resumed,
}

/// Forks `caller`, returning the new child's process-table slot.
///
/// Copies the caller's whole user address space into the child
/// copy-on-write, clones its file-state table, and starts the child
/// running with a zeroed return-value register (§4.4 steps 1-4).
pub fn fork(kernel: &Kernel, caller: usize) -> Result<usize, KernelError> {
    let child = kernel.procs.alloc().ok_or(KernelError::NoChildSlot)?;

    let mut parent_regs = kernel.procs.slots[caller].lock().unwrap().registers;
    parent_regs.set_return_value(child as u64);
    let mut child_regs = parent_regs;
    child_regs.set_return_value(0);

    let size = USERHI - USERLO;
    let cmd = Command {
        ty: SyscallType::Put,
        memop: MemOp::Copy,
        flags: CmdFlags::REGS | CmdFlags::SNAP | CmdFlags::START,
        perm: PermBits::empty(),
    };
    let args = RendezvousArgs {
        child_slot: child,
        regs: Some(child_regs),
        src_va: USERLO,
        dst_va: USERLO,
        size,
    };
    if let Err(e) = kernel.put(caller, cmd, args) {
        kernel.procs.free(child);
        return Err(e);
    }

    let cloned_files = kernel.procs.slots[caller].lock().unwrap().files.clone();
    {
        let mut childp = kernel.procs.slots[child].lock().unwrap();
        childp.files = cloned_files;
        childp.files.reset_references();
        childp.parent = Some(caller);
    }
    {
        let mut parentp = kernel.procs.slots[caller].lock().unwrap();
        parentp.registers = parent_regs;
        match parentp.children.iter_mut().find(|s| s.is_none()) {
            Some(slot) => *slot = Some(child),
            None => parentp.children.push(Some(child)),
        }
    }

    Ok(child)
}

/// Marks the caller exited with `status` and suspends it in STOP
/// (§4.2 "a process that has called exit remains STOP forever").
pub fn exit(kernel: &Kernel, caller: usize, status: i32) {
    {
        let mut p = kernel.procs.slots[caller].lock().unwrap();
        p.exited = true;
        p.exit_status = status;
        p.files.exited = true;
        p.files.status = status;
    }
    kernel.ret(caller);
}

/// Runs one rendezvous cycle of the parent-side wait loop against an
/// already-STOPped child (§4.4): pulls its registers and reconciles
/// file state, then either reports exit or resumes it.
pub fn wait_step(kernel: &Kernel, caller: usize, child: usize) -> Result<WaitStep, KernelError> {
    {
        let c = kernel.procs.slots[child].lock().unwrap();
        if !matches!(c.state, ProcState::Stop) {
            return Err(KernelError::Busy);
        }
    }

    let get_regs = Command {
        ty: SyscallType::Get,
        memop: MemOp::None,
        flags: CmdFlags::REGS,
        perm: PermBits::empty(),
    };
    let regs_args = RendezvousArgs {
        child_slot: child,
        regs: None,
        src_va: 0,
        dst_va: 0,
        size: 0,
    };
    let regs = kernel
        .get(caller, get_regs, regs_args)?
        .expect("REGS flag always yields a register snapshot");

    let (exited, status) = {
        let c = kernel.procs.slots[child].lock().unwrap();
        (c.exited, c.exit_status)
    };

    kernel.procs.slots[caller]
        .lock()
        .unwrap()
        .registers
        .set_return_value(regs.return_value());

    // Reconcile unconditionally, even on exit: a child's last writes
    // before exiting must still reach the parent (§4.4).
    let outcome = {
        let mut parentp = kernel.procs.slots[caller].lock().unwrap();
        let mut childp = kernel.procs.slots[child].lock().unwrap();
        reconcile(&mut parentp.files, &mut childp.files)
    };
    if !outcome.conflicts.is_empty() {
        log::warn!(
            "wait_step: child {child} has {} conflicting inode(s) after reconciliation",
            outcome.conflicts.len()
        );
    }

    if exited {
        kernel.procs.free(child);
        return Ok(WaitStep::Exited(status));
    }

    let resume = Command {
        ty: SyscallType::Put,
        memop: MemOp::None,
        flags: CmdFlags::START,
        perm: PermBits::empty(),
    };
    let resume_args = RendezvousArgs {
        child_slot: child,
        regs: None,
        src_va: 0,
        dst_va: 0,
        size: 0,
    };
    kernel.put(caller, resume, resume_args)?;
    Ok(WaitStep::Resumed)
}

/// Runs `wait_step` until the child exits, used by tests and by any
/// caller that does not need to interleave other work between cycles.
/// The child must call [`exit`]/`ret` between each call for this to
/// make progress rather than erroring with `Busy`.
pub fn wait_until_exit(kernel: &Kernel, caller: usize, child: usize) -> Result<i32, KernelError> {
    loop {
        match wait_step(kernel, caller, child)? {
            WaitStep::Exited(status) => return Ok(status),
            WaitStep::Resumed => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_kernel() -> Kernel {
        Kernel::new(4, 64, 0)
    }

    #[test]
    fn fork_creates_a_runnable_child_with_zeroed_return_value() {
        let kernel = small_kernel();
        kernel.procs.alloc().unwrap(); // reserve slot 0 as "init"/caller
        let parent = 0;
        kernel.procs.slots[parent].lock().unwrap().registers.set_return_value(42);

        let child = fork(&kernel, parent).unwrap();
        assert_ne!(child, parent);
        let childp = kernel.procs.slots[child].lock().unwrap();
        assert_eq!(childp.registers.return_value(), 0);
        assert_eq!(childp.parent, Some(parent));
        assert_eq!(kernel.procs.slots[parent].lock().unwrap().registers.return_value(), child as u64);
    }

    #[test]
    fn exit_then_wait_step_frees_the_child_slot() {
        let kernel = small_kernel();
        kernel.procs.alloc().unwrap();
        let parent = 0;
        let child = fork(&kernel, parent).unwrap();

        exit(&kernel, child, 7);
        let step = wait_step(&kernel, parent, child).unwrap();
        assert_eq!(step, WaitStep::Exited(7));
    }

    #[test]
    fn running_child_is_resumed_not_reported_exited() {
        let kernel = small_kernel();
        kernel.procs.alloc().unwrap();
        let parent = 0;
        let child = fork(&kernel, parent).unwrap();

        // Child does some work and calls RET without exiting (a
        // cooperative yield back to its parent).
        kernel.ret(child);
        let step = wait_step(&kernel, parent, child).unwrap();
        assert_eq!(step, WaitStep::Resumed);
        assert!(matches!(
            kernel.procs.slots[child].lock().unwrap().state,
            ProcState::Ready
        ));
    }

    #[test]
    fn wait_step_on_a_running_child_is_busy() {
        let kernel = small_kernel();
        kernel.procs.alloc().unwrap();
        let parent = 0;
        let child = fork(&kernel, parent).unwrap();
        // fork() leaves the child READY (via START), not STOP.
        assert_eq!(
            wait_step(&kernel, parent, child),
            Err(KernelError::Busy)
        );
    }

    #[test]
    fn file_writes_survive_fork_exit_reconcile() {
        let kernel = small_kernel();
        kernel.procs.alloc().unwrap();
        let parent = 0;

        let ino = kernel.procs.slots[parent]
            .lock()
            .unwrap()
            .files
            .alloc_inode()
            .unwrap();
        kernel.procs.slots[parent].lock().unwrap().files.inodes[ino] =
            Some(crate::fs::Inode::new_regular("out", crate::fs::wellknown::ROOT_DIR));

        let child = fork(&kernel, parent).unwrap();
        kernel.procs.slots[child].lock().unwrap().files.inodes[ino]
            .as_mut()
            .unwrap()
            .append(b"hello from child");

        exit(&kernel, child, 0);
        wait_step(&kernel, parent, child).unwrap();

        let parentp = kernel.procs.slots[parent].lock().unwrap();
        assert_eq!(parentp.files.inodes[ino].as_ref().unwrap().data, b"hello from child");
    }
}
