//! The per-file/directory inode record (§3 "Inode").

/// Per-inode mode bits. `S_IFCONF` and `S_IFPARTIAL` are overlay flags
/// set by reconciliation, not a file *kind* by themselves.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FileMode {
    pub kind: FileKind,
    pub conflict: bool,
    pub partial: bool,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Console,
}

impl FileMode {
    pub fn regular() -> Self {
        FileMode {
            kind: FileKind::Regular,
            conflict: false,
            partial: false,
        }
    }
    pub fn dir() -> Self {
        FileMode {
            kind: FileKind::Directory,
            conflict: false,
            partial: false,
        }
    }
    pub fn console() -> Self {
        FileMode {
            kind: FileKind::Console,
            conflict: false,
            partial: false,
        }
    }

    /// Inodes that should never be reconciled across a rendezvous (the
    /// identity-mapped console and root entries, §4.5 step 1).
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.kind, FileKind::Console)
    }
}

/// Maximum bytes an in-file merge will produce before it is cancelled
/// as too large (§4.5 "If the combined length would exceed the
/// per-inode maximum").
pub const MAX_FILE_SIZE: usize = 16 * 1024 * 1024;

/// One inode (§3).
#[derive(Clone, Debug)]
pub struct Inode {
    pub name: String,
    pub parent_ino: usize,
    pub mode: FileMode,
    /// Current version number. Bumped on every non-append modification
    /// (§9 open question: the spec makes this mandatory even where the
    /// upstream tooling was inconsistent about it).
    pub ver: u64,
    pub size: usize,
    pub data: Vec<u8>,
    /// Reference version captured at the last sync, valid only on a
    /// child's view of this inode.
    pub rver: u64,
    /// Reference length captured at the last sync.
    pub rlen: usize,
    /// Index of the matching inode in the parent, `0` if none yet.
    pub rino: usize,
}

impl Inode {
    pub fn new_regular(name: &str, parent_ino: usize) -> Self {
        Inode {
            name: name.to_string(),
            parent_ino,
            mode: FileMode::regular(),
            ver: 1,
            size: 0,
            data: Vec::new(),
            rver: 1,
            rlen: 0,
            rino: 0,
        }
    }

    pub fn new_dir(name: &str, parent_ino: usize) -> Self {
        Inode {
            name: name.to_string(),
            parent_ino,
            mode: FileMode::dir(),
            ver: 1,
            size: 0,
            data: Vec::new(),
            rver: 1,
            rlen: 0,
            rino: 0,
        }
    }

    pub fn new_console(name: &str) -> Self {
        Inode {
            name: name.to_string(),
            parent_ino: 0,
            mode: FileMode::console(),
            ver: 1,
            size: 0,
            data: Vec::new(),
            rver: 1,
            rlen: 0,
            rino: 0,
        }
    }

    /// Appends `bytes`, growing size but leaving `ver` untouched (an
    /// append-only write, per §4.5's append/append merge rule).
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.size = self.data.len();
    }

    /// Overwrites the whole file and bumps `ver` — any non-append
    /// modification must bump the version for conflict detection to be
    /// correct (§9).
    pub fn overwrite(&mut self, bytes: &[u8]) {
        self.data = bytes.to_vec();
        self.size = self.data.len();
        self.ver += 1;
    }
}
