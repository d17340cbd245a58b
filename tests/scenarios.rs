//! End-to-end scenarios, exercised as black-box operations against a
//! [`Kernel`] rather than unit-testing any one module in isolation.

use rendezvous_os::addr::{Va, STACKLO, USERLO};
use rendezvous_os::exec::{exec, ExecImage, Segment};
use rendezvous_os::fs::{wellknown, Inode};
use rendezvous_os::mm::PermBits;
use rendezvous_os::net::dispatch::net_rx;
use rendezvous_os::net::pull::{self, PGLEV_DIRECTORY, PGLEV_TABLE};
use rendezvous_os::process::fork::{exit, fork, wait_until_exit};
use rendezvous_os::process::ProcState;
use rendezvous_os::syscall::Kernel;

fn small_kernel() -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::new(4, 256, 1)
}

/// S1: fork/wait/exit leaves the parent's memory untouched and reports
/// the child's exit status.
#[test]
fn fork_wait_exit_reports_status_and_preserves_parent_memory() {
    let kernel = small_kernel();
    let parent = kernel.procs.alloc().unwrap();

    let parent_pattern = [0xAAu8; 64];
    kernel.procs.slots[parent]
        .lock()
        .unwrap()
        .pdir
        .write_bytes(&kernel.arena, Va::new_kernel_window(USERLO), &parent_pattern)
        .unwrap();

    let child = fork(&kernel, parent).unwrap();

    let child_pattern = [0x55u8; 64];
    kernel.procs.slots[child]
        .lock()
        .unwrap()
        .pdir
        .write_bytes(&kernel.arena, Va::new_kernel_window(USERLO), &child_pattern)
        .unwrap();
    exit(&kernel, child, 42);

    let status = wait_until_exit(&kernel, parent, child).unwrap();
    assert_eq!(status, 42);

    let mut buf = [0u8; 64];
    kernel.procs.slots[parent]
        .lock()
        .unwrap()
        .pdir
        .read_bytes(Va::new_kernel_window(USERLO), 64, &mut buf);
    assert_eq!(buf, parent_pattern);
}

/// S2: a child's and a parent's independent appends to the same log
/// file both survive reconciliation, child tail first.
#[test]
fn append_merge_combines_both_sides_tails_in_order() {
    let kernel = small_kernel();
    let parent = kernel.procs.alloc().unwrap();

    let ino = {
        let mut p = kernel.procs.slots[parent].lock().unwrap();
        let ino = p.files.alloc_inode().unwrap();
        let mut inode = Inode::new_regular("log", wellknown::ROOT_DIR);
        inode.append(b"ABC");
        p.files.inodes[ino] = Some(inode);
        ino
    };

    let child = fork(&kernel, parent).unwrap();
    kernel.procs.slots[child].lock().unwrap().files.inodes[ino]
        .as_mut()
        .unwrap()
        .append(b"XYZ");
    kernel.procs.slots[parent].lock().unwrap().files.inodes[ino]
        .as_mut()
        .unwrap()
        .append(b"PQ");

    exit(&kernel, child, 0);
    wait_until_exit(&kernel, parent, child).unwrap();

    let parentp = kernel.procs.slots[parent].lock().unwrap();
    let merged = &parentp.files.inodes[ino].as_ref().unwrap();
    assert_eq!(merged.data, b"ABCXYZPQ");
    assert!(!merged.mode.conflict);
}

/// S3: both sides overwriting the same file's contents is flagged as a
/// conflict, and the parent's own data is left untouched.
#[test]
fn conflicting_overwrites_are_flagged_and_parent_data_is_unchanged() {
    let kernel = small_kernel();
    let parent = kernel.procs.alloc().unwrap();

    let ino = {
        let mut p = kernel.procs.slots[parent].lock().unwrap();
        let ino = p.files.alloc_inode().unwrap();
        let mut inode = Inode::new_regular("shared", wellknown::ROOT_DIR);
        inode.overwrite(b"original");
        p.files.inodes[ino] = Some(inode);
        ino
    };

    let child = fork(&kernel, parent).unwrap();
    kernel.procs.slots[child].lock().unwrap().files.inodes[ino]
        .as_mut()
        .unwrap()
        .overwrite(b"from child");
    kernel.procs.slots[parent].lock().unwrap().files.inodes[ino]
        .as_mut()
        .unwrap()
        .overwrite(b"from parent");

    exit(&kernel, child, 0);
    wait_until_exit(&kernel, parent, child).unwrap();

    let parentp = kernel.procs.slots[parent].lock().unwrap();
    let merged = parentp.files.inodes[ino].as_ref().unwrap();
    assert!(merged.mode.conflict);
    assert_eq!(merged.data, b"from parent");
}

/// S4: after a fork, a write to a shared COW page by one side is
/// invisible to the other.
#[test]
fn cow_write_after_fork_does_not_leak_across_processes() {
    let kernel = small_kernel();
    let parent = kernel.procs.alloc().unwrap();

    kernel.procs.slots[parent]
        .lock()
        .unwrap()
        .pdir
        .write_bytes(&kernel.arena, Va::new_kernel_window(USERLO), &[1u8; 16])
        .unwrap();

    let child = fork(&kernel, parent).unwrap();

    kernel.procs.slots[parent]
        .lock()
        .unwrap()
        .pdir
        .write_bytes(&kernel.arena, Va::new_kernel_window(USERLO), &[2u8; 16])
        .unwrap();

    let mut child_buf = [0u8; 16];
    kernel.procs.slots[child]
        .lock()
        .unwrap()
        .pdir
        .read_bytes(Va::new_kernel_window(USERLO), 16, &mut child_buf);
    assert_eq!(child_buf, [1u8; 16]);

    let mut parent_buf = [0u8; 16];
    kernel.procs.slots[parent]
        .lock()
        .unwrap()
        .pdir
        .read_bytes(Va::new_kernel_window(USERLO), 16, &mut parent_buf);
    assert_eq!(parent_buf, [2u8; 16]);
}

/// S5: exec replaces the caller's address space with a freshly loaded
/// image and points it at the entry address; the caller's own
/// console-out inode (fds survive exec) still carries whatever the
/// loaded program writes.
#[test]
fn exec_replaces_address_space_and_keeps_console_out_writable() {
    let kernel = small_kernel();
    let caller = kernel.procs.alloc().unwrap();

    let image = ExecImage::build(
        0x2000,
        &[Segment {
            va_offset: 0,
            data: vec![0xC3; 32], // a stand-in "ret" opcode stream
            writable: false,
        }],
    );
    {
        let mut p = kernel.procs.slots[caller].lock().unwrap();
        let mut ino = Inode::new_regular("hi.out", wellknown::ROOT_DIR);
        ino.data = image;
        ino.size = ino.data.len();
        p.files.inodes[wellknown::FIRST_GENERAL] = Some(ino);
    }

    exec(&kernel, caller, wellknown::FIRST_GENERAL, &[b"hi".to_vec()]).unwrap();

    let p = kernel.procs.slots[caller].lock().unwrap();
    assert_eq!(p.registers.rip, (USERLO + 0x2000) as u64);
    assert!(p.registers.gpr[4] as usize >= STACKLO);
    let mut buf = [0u8; 32];
    p.pdir.read_bytes(Va::new_kernel_window(USERLO), 32, &mut buf);
    assert_eq!(buf, [0xC3; 32]);
    drop(p);

    // The loaded program would append "hi" to console-out itself; this
    // crate has no CPU to execute that write, so the test performs the
    // syscall-equivalent append directly to confirm the fd is intact
    // and writable post-exec.
    kernel.procs.slots[caller].lock().unwrap().files.inodes[wellknown::CONSOLE_OUT]
        .as_mut()
        .unwrap()
        .append(b"hi");
    assert_eq!(
        kernel.procs.slots[caller].lock().unwrap().files.inodes[wellknown::CONSOLE_OUT]
            .as_ref()
            .unwrap()
            .data,
        b"hi"
    );
}

/// S6: a migration handshake plus the full directory/table/page pull
/// chain reproduces the source node's user memory byte-for-byte on the
/// destination node.
#[test]
fn migration_round_trip_pulls_memory_byte_for_byte() {
    let node_a = small_kernel();
    let node_b = Kernel::new(4, 256, 2);

    let src = node_a.procs.alloc().unwrap();
    let pattern = [0x7Eu8; 16];
    node_a.procs.slots[src]
        .lock()
        .unwrap()
        .pdir
        .write_bytes(&node_a.arena, Va::new_kernel_window(USERLO), &pattern)
        .unwrap();
    node_a.procs.slots[src].lock().unwrap().registers.rip = 0xDEAD;

    let migrq = node_a.migrations.begin_migration(&node_a, 1, src, 2);
    let migrp_frames = net_rx(&node_b, &migrq);
    assert_eq!(migrp_frames.len(), 1);
    for f in &migrp_frames {
        net_rx(&node_a, f);
    }
    assert_eq!(
        node_a.procs.slots[src].lock().unwrap().state,
        ProcState::Away
    );

    let dst = (0..node_b.procs.slots.len())
        .find(|&i| node_b.procs.slots[i].lock().unwrap().remote_pdir.is_some())
        .expect("inbound migration created a local slot");
    assert_eq!(
        node_b.procs.slots[dst].lock().unwrap().registers.rip,
        0xDEAD
    );

    let remote_pdir_rr = node_b.procs.slots[dst].lock().unwrap().remote_pdir.unwrap();
    node_b.procs.slots[dst].lock().unwrap().state = ProcState::Pull;

    // pglev == 2: pull the whole directory.
    let (state, frame) = pull::begin_pull(2, remote_pdir_rr, PGLEV_DIRECTORY, None, None);
    node_b.procs.slots[dst].lock().unwrap().pull = Some(state);
    for reply in net_rx(&node_a, &frame) {
        net_rx(&node_b, &reply);
    }

    // pglev == 1: pull the one directory slot covering USERLO.
    let user_slot = Va::new(USERLO).unwrap().pde_index();
    let table_rr = node_b.procs.slots[dst]
        .lock()
        .unwrap()
        .pdir
        .slot_remote(user_slot)
        .map(|(node, addr)| rendezvous_os::net::rr::Rr::new(node, addr as u32, PermBits::empty()))
        .expect("directory pull left slot 0 as a pending remote reference");
    let (state, frame) = pull::begin_pull(2, table_rr, PGLEV_TABLE, Some(user_slot), None);
    node_b.procs.slots[dst].lock().unwrap().pull = Some(state);
    for reply in net_rx(&node_a, &frame) {
        net_rx(&node_b, &reply);
    }

    // pglev == 0: pull the one page holding `pattern`.
    let pte_idx = Va::new(USERLO).unwrap().pte_index();
    let page_rr = {
        let p = node_b.procs.slots[dst].lock().unwrap();
        let table = p.pdir.slot_table(user_slot).unwrap();
        let t = table.lock().unwrap();
        match &t.pte_at(pte_idx).kind {
            rendezvous_os::mm::PteKind::Remote { node, addr } => {
                rendezvous_os::net::rr::Rr::new(*node, *addr as u32, PermBits::empty())
            }
            _ => panic!("expected a pending remote page reference"),
        }
    };
    let (state, frame) = pull::begin_pull(
        2,
        page_rr,
        rendezvous_os::net::pull::PGLEV_PAGE,
        Some(user_slot),
        Some(pte_idx),
    );
    node_b.procs.slots[dst].lock().unwrap().pull = Some(state);
    for reply in net_rx(&node_a, &frame) {
        net_rx(&node_b, &reply);
    }

    let mut buf = [0u8; 16];
    node_b.procs.slots[dst]
        .lock()
        .unwrap()
        .pdir
        .read_bytes(Va::new_kernel_window(USERLO), 16, &mut buf);
    assert_eq!(buf, pattern);
    assert_eq!(
        node_b.procs.slots[dst].lock().unwrap().state,
        ProcState::Ready
    );
}
