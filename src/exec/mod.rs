//! Exec / argument stacking (§4.7).
//!
//! ELF parsing is explicitly out of scope (§1 "Out of scope"), so the
//! executable image format here is this crate's own minimal
//! segment-list container rather than a real object-file format;
//! `exec` only needs *an* inode-resident image to stage into child
//! slot 0, not ELF specifically. Grounded on `keos_project3::fork`'s
//! compose-then-dispatch shape for the staging/bulk-copy sequence and
//! on `keos-project2/src/loader/elf.rs`'s phdr-iteration idea (a flat
//! list of `(offset, bytes, writable)` segments), simplified to drop
//! the ELF binary encoding that idea was iterating over.

use crate::addr::{Va, PAGESIZE, PTSIZE, SCRATCHHI, SCRATCHLO, STACKHI, STACKLO, USERLO};
use crate::error::KernelError;
use crate::mm::PermBits;
use crate::process::ProcessTable;
use crate::syscall::{CmdFlags, Command, Kernel, MemOp, RendezvousArgs, SyscallType};

const MAGIC: &[u8; 4] = b"RVX1";

/// One loadable segment: `va_offset` bytes from `USERLO`, raw content,
/// and whether the destination stays writable after loading.
pub struct Segment {
    pub va_offset: usize,
    pub data: Vec<u8>,
    pub writable: bool,
}

/// A parsed executable image (§4.7 "parse the executable image").
pub struct ExecImage {
    pub entry: usize,
    pub segments: Vec<Segment>,
}

impl ExecImage {
    /// Serializes an image to the byte container an inode stores
    /// (used by tests and by whatever builds inode 4+'s contents).
    pub fn build(entry: usize, segments: &[Segment]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(entry as u32).to_be_bytes());
        out.extend_from_slice(&(segments.len() as u32).to_be_bytes());
        for seg in segments {
            out.extend_from_slice(&(seg.va_offset as u32).to_be_bytes());
            out.extend_from_slice(&(seg.data.len() as u32).to_be_bytes());
            out.push(seg.writable as u8);
            out.extend_from_slice(&[0u8; 3]); // pad to 4-byte alignment
            out.extend_from_slice(&seg.data);
        }
        out
    }

    /// Parses a byte container back into segments, rejecting anything
    /// malformed as [`KernelError::NoExec`].
    pub fn parse(bytes: &[u8]) -> Result<ExecImage, KernelError> {
        if bytes.len() < 12 || &bytes[0..4] != MAGIC {
            return Err(KernelError::NoExec);
        }
        let entry = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let nsegs = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let mut cursor = 12;
        let mut segments = Vec::with_capacity(nsegs);
        for _ in 0..nsegs {
            if cursor + 12 > bytes.len() {
                return Err(KernelError::NoExec);
            }
            let va_offset = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            let len = u32::from_be_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            let writable = bytes[cursor + 8] != 0;
            cursor += 12;
            if cursor + len > bytes.len() || len > PTSIZE {
                return Err(KernelError::NoExec);
            }
            segments.push(Segment {
                va_offset,
                data: bytes[cursor..cursor + len].to_vec(),
                writable,
            });
            cursor += len;
        }
        Ok(ExecImage { entry, segments })
    }
}

fn page_round_up(n: usize) -> usize {
    (n + PAGESIZE - 1) & !(PAGESIZE - 1)
}

/// Builds the final page of the stack: `argc`, a NULL-terminated
/// pointer vector, and the argument bytes packed downward from the top
/// of the page (§4.7). Pointers are written as `final_base + offset`
/// even though the page is staged at `stage_base` — the "fixed up by
/// the same offset that will be applied when the stack is relocated"
/// step the spec calls for.
fn build_stack_page(stage_base: usize, final_base: usize, argv: &[Vec<u8>]) -> (Vec<u8>, usize) {
    let mut page = vec![0u8; PAGESIZE];
    let mut cursor = PAGESIZE;
    let mut str_offsets = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        cursor -= arg.len() + 1;
        page[cursor..cursor + arg.len()].copy_from_slice(arg);
        str_offsets.push(cursor);
    }
    str_offsets.reverse();
    cursor &= !7usize;
    cursor -= (argv.len() + 1) * 8; // argv vector plus NULL terminator
    let argv_vec_off = cursor;
    for (i, &soff) in str_offsets.iter().enumerate() {
        let ptr = (final_base + soff) as u64;
        page[argv_vec_off + i * 8..argv_vec_off + i * 8 + 8].copy_from_slice(&ptr.to_le_bytes());
    }
    cursor -= 8; // argc
    page[cursor..cursor + 8].copy_from_slice(&(argv.len() as u64).to_le_bytes());
    let _ = stage_base;
    (page, cursor)
}

/// Replaces the caller's own address space with a freshly loaded
/// executable image and jumps to its entry point (§4.7). `image_ino`
/// names the inode holding an [`ExecImage::build`]-format container in
/// the caller's own file-state region.
pub fn exec(
    kernel: &Kernel,
    caller: usize,
    image_ino: usize,
    argv: &[Vec<u8>],
) -> Result<(), KernelError> {
    let slot0 = ProcessTable::EXEC_SLOT;

    // 1. Zero child 0's user window (everything below the reserved
    // stack/scratch slots, which this function rebuilds explicitly).
    {
        let mut p0 = kernel.procs.slots[slot0].lock().unwrap();
        let zeros = vec![0u8; STACKLO - USERLO];
        p0.pdir
            .write_bytes(&kernel.arena, Va::new_kernel_window(USERLO), &zeros)?;
    }

    // 2. Parse the executable image from the caller's file layer.
    let bytes = {
        let p = kernel.procs.slots[caller].lock().unwrap();
        p.files
            .inodes
            .get(image_ino)
            .and_then(|s| s.as_ref())
            .map(|ino| ino.data.clone())
            .ok_or(KernelError::NoExec)?
    };
    let image = ExecImage::parse(&bytes)?;

    // 3. Stage each segment through the caller's own scratch slot,
    // then bulk-COPY that whole 4 MB slot into child 0's matching
    // destination slot (§4.7). Each segment is required to fit in, and
    // occupy, its own destination slot — a simplification licensed by
    // ELF-level segment packing being out of scope (§1).
    for seg in &image.segments {
        let dest_base = USERLO + seg.va_offset;
        let dest_slot = dest_base & !(PTSIZE - 1);
        let offset_in_slot = dest_base - dest_slot;
        if offset_in_slot + seg.data.len() > PTSIZE || dest_slot + PTSIZE > STACKLO {
            return Err(KernelError::NoExec);
        }

        {
            let mut caller_p = kernel.procs.slots[caller].lock().unwrap();
            let zeros = vec![0u8; PTSIZE];
            caller_p
                .pdir
                .write_bytes(&kernel.arena, Va::new_kernel_window(SCRATCHLO), &zeros)?;
            caller_p.pdir.write_bytes(
                &kernel.arena,
                Va::new_kernel_window(SCRATCHLO + offset_in_slot),
                &seg.data,
            )?;
            if !seg.writable {
                caller_p.pdir.setperm(
                    Va::new_kernel_window(SCRATCHLO + offset_in_slot),
                    page_round_up(seg.data.len()),
                    PermBits::SYS_READ,
                )?;
            }
        }

        kernel.put(
            caller,
            Command {
                ty: SyscallType::Put,
                memop: MemOp::Copy,
                flags: CmdFlags::empty(),
                perm: PermBits::empty(),
            },
            RendezvousArgs {
                child_slot: slot0,
                regs: None,
                src_va: SCRATCHLO,
                dst_va: dest_slot,
                size: PTSIZE,
            },
        )?;
    }

    // 4. Build the stack page and bulk-COPY it the same way.
    let stack_page_base = STACKHI - PAGESIZE;
    let (page, sp_offset) = build_stack_page(SCRATCHHI - PAGESIZE, stack_page_base, argv);
    {
        let mut caller_p = kernel.procs.slots[caller].lock().unwrap();
        let zeros = vec![0u8; PTSIZE];
        caller_p
            .pdir
            .write_bytes(&kernel.arena, Va::new_kernel_window(SCRATCHLO), &zeros)?;
        caller_p.pdir.write_bytes(
            &kernel.arena,
            Va::new_kernel_window(SCRATCHHI - PAGESIZE),
            &page,
        )?;
    }
    kernel.put(
        caller,
        Command {
            ty: SyscallType::Put,
            memop: MemOp::Copy,
            flags: CmdFlags::empty(),
            perm: PermBits::empty(),
        },
        RendezvousArgs {
            child_slot: slot0,
            regs: None,
            src_va: SCRATCHLO,
            dst_va: STACKLO,
            size: PTSIZE,
        },
    )?;

    // 5. Copy the file-state region: in this crate that region is a
    // plain struct field rather than mapped bytes, so "copy" means
    // cloning it wholesale (§4.7, mirroring fork's treatment in
    // `crate::process::fork`).
    let files = kernel.procs.slots[caller].lock().unwrap().files.clone();
    kernel.procs.slots[slot0].lock().unwrap().files = files;

    // 6. Replace the caller's address space with child 0's, jump to
    // entry, and return slot 0 to its permanently-reserved, empty
    // state for the next exec.
    let new_pdir = std::mem::replace(
        &mut kernel.procs.slots[slot0].lock().unwrap().pdir,
        crate::mm::PageDirectory::new(),
    );
    let mut caller_p = kernel.procs.slots[caller].lock().unwrap();
    caller_p.pdir = new_pdir;
    caller_p.registers.rip = (USERLO + image.entry) as u64;
    caller_p.registers.gpr[4] = (stack_page_base + sp_offset) as u64; // stack-pointer register
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::Kernel;

    fn small_kernel() -> Kernel {
        Kernel::new(4, 128, 0)
    }

    #[test]
    fn exec_loads_segments_and_sets_entry() {
        let kernel = small_kernel();
        let caller = kernel.procs.alloc().unwrap();
        let image = ExecImage::build(
            0x1000,
            &[Segment {
                va_offset: 0,
                data: vec![0x90; 16],
                writable: false,
            }],
        );
        {
            let mut p = kernel.procs.slots[caller].lock().unwrap();
            let mut ino = crate::fs::Inode::new_regular("a.out", crate::fs::wellknown::ROOT_DIR);
            ino.data = image;
            ino.size = ino.data.len();
            p.files.inodes[4] = Some(ino);
        }

        exec(&kernel, caller, 4, &[b"prog".to_vec(), b"arg1".to_vec()]).unwrap();

        let p = kernel.procs.slots[caller].lock().unwrap();
        assert_eq!(p.registers.rip, (USERLO + 0x1000) as u64);
        assert!(p.registers.gpr[4] >= STACKLO as u64);
        let mut buf = [0u8; 16];
        p.pdir.read_bytes(Va::new_kernel_window(USERLO), 16, &mut buf);
        assert_eq!(buf, [0x90; 16]);
    }

    #[test]
    fn malformed_image_is_rejected() {
        assert!(ExecImage::parse(&[0u8; 3]).is_err());
        assert!(ExecImage::parse(b"RVX1").is_err());
    }
}
