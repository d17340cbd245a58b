//! File reconciliation: versioned inodes, the parent/child mapping
//! pass, and the in-file append merge (§4.5).
//!
//! Grounded on `keos_project1::file_struct::FileStruct` (the per-process
//! file-descriptor table copied wholesale on fork) and
//! `keos_project5::ffs` (on-disk inode versioning), but reworked around
//! this spec's memory-resident, version-reconciled inode table instead
//! of either teacher's on-disk or open-fd model — disk persistence is
//! an explicit non-goal (§1).

pub mod inode;
pub mod reconcile;

pub use inode::{FileMode, Inode, MAX_FILE_SIZE};
pub use reconcile::{reconcile, ReconcileOutcome};

/// Well-known inode numbers (§6 "Inode numbering").
pub mod wellknown {
    pub const CONSOLE_IN: usize = 1;
    pub const CONSOLE_OUT: usize = 2;
    pub const ROOT_DIR: usize = 3;
    pub const FIRST_GENERAL: usize = 4;
}

/// The fixed-size inode table plus child-slot bookkeeping that lives at
/// `FILESVA` in every process (§3 "File-state region").
#[derive(Clone)]
pub struct FileState {
    pub inodes: Vec<Option<Inode>>,
    pub exited: bool,
    pub status: i32,
}

impl FileState {
    pub fn new(capacity: usize) -> Self {
        let mut inodes = vec![None; capacity];
        inodes[wellknown::CONSOLE_IN] = Some(Inode::new_console("stdin"));
        inodes[wellknown::CONSOLE_OUT] = Some(Inode::new_console("stdout"));
        inodes[wellknown::ROOT_DIR] = Some(Inode::new_dir("/", 0));
        FileState {
            inodes,
            exited: false,
            status: 0,
        }
    }

    /// Initializes every in-use inode's reference version/length to its
    /// current version/size, as `fork` does for the child's view
    /// (§4.4 step 4).
    pub fn reset_references(&mut self) {
        for (i, slot) in self.inodes.iter_mut().enumerate() {
            if let Some(ino) = slot {
                ino.rino = i;
                ino.rver = ino.ver;
                ino.rlen = ino.size;
            }
        }
    }

    /// Finds a free inode index at or above `wellknown::FIRST_GENERAL`.
    pub fn alloc_inode(&mut self) -> Option<usize> {
        self.inodes
            .iter()
            .enumerate()
            .skip(wellknown::FIRST_GENERAL)
            .find(|(_, s)| s.is_none())
            .map(|(i, _)| i)
    }
}
