//! Page-table manager: COW, three-way merge, and the nominal-permission
//! overlay (§4.1).
//!
//! Grounded on `keos::mm::page_table` (the walker and its
//! refcount-aware table-sharing rule) and `keos_project3::lazy_pager`
//! (`write_protect_ptes` / `do_copy_on_write`), generalized from a
//! single fork-time snapshot into the repeated `copy`/`merge` pair the
//! rendezvous syscalls drive on every PUT/GET.

use crate::addr::{Va, ENTRIES_PER_TABLE, PAGESIZE, PTSIZE};
use crate::error::KernelError;
use crate::mm::frame::{Frame, FrameArena};
use crate::mm::pte::{PermBits, Pte, PteKind};
use crate::mm::tlb::TlbStats;
use std::sync::{Arc, Mutex};

/// One page table: `ENTRIES_PER_TABLE` leaf entries covering one 4 MB
/// region.
#[derive(Clone)]
pub struct PageTable {
    entries: Vec<Pte>,
}

impl PageTable {
    pub(crate) fn new() -> Self {
        PageTable {
            entries: (0..ENTRIES_PER_TABLE).map(|_| Pte::default()).collect(),
        }
    }

    /// Reads leaf `idx`, used by the page-pull responder to serialize a
    /// table onto the wire (§4.6).
    pub fn pte_at(&self, idx: usize) -> &Pte {
        &self.entries[idx]
    }

    /// Installs a pulled leaf at `idx`, freeing whatever frame it
    /// displaces (§4.6 "the pull ... resolving each PDE and PTE").
    pub fn set_pte(&mut self, arena: &FrameArena, idx: usize, pte: Pte) {
        if let Some(old) = std::mem::replace(&mut self.entries[idx], pte).frame() {
            arena.free_frame(old.clone());
        }
    }
}

/// A full page directory: one shared-or-private [`PageTable`] per 4 MB
/// slot across the user window, or a remote reference for a
/// not-yet-pulled region (§4.6).
pub enum Pde {
    Absent,
    Local(Arc<Mutex<PageTable>>),
    Remote { node: u8, addr: usize },
}

impl Clone for Pde {
    fn clone(&self) -> Self {
        match self {
            Pde::Absent => Pde::Absent,
            Pde::Local(t) => Pde::Local(t.clone()),
            Pde::Remote { node, addr } => Pde::Remote {
                node: *node,
                addr: *addr,
            },
        }
    }
}

pub struct PageDirectory {
    slots: Vec<Pde>,
    pub tlb: TlbStats,
}

impl PageDirectory {
    /// A fresh, entirely empty page directory.
    pub fn new() -> Self {
        PageDirectory {
            slots: (0..Va::directory_slots()).map(|_| Pde::Absent).collect(),
            tlb: TlbStats::default(),
        }
    }

    fn slot_of(va: Va) -> usize {
        va.pde_index()
    }

    /// Walks to (allocating if necessary) the page table backing `va`'s
    /// 4 MB region, applying the table-sharing rule from §4.1: writing
    /// into a read-shared table makes a private copy; a non-writing
    /// walk of a shared table re-demotes every entry to read-only so
    /// permissions stay consistent with the sharing.
    pub fn walk(&mut self, va: Va, writing: bool) -> Result<Arc<Mutex<PageTable>>, KernelError> {
        let slot = Self::slot_of(va);
        match &self.slots[slot] {
            Pde::Remote { .. } => return Err(KernelError::BadAddress),
            Pde::Absent => {
                if !writing {
                    // A read of an absent table sees the zero page; callers
                    // that need a concrete table for reading still get one
                    // so lookups have a uniform leaf to inspect.
                }
                let table = Arc::new(Mutex::new(PageTable::new()));
                self.slots[slot] = Pde::Local(table.clone());
                Ok(table)
            }
            Pde::Local(table) => {
                if Arc::strong_count(table) > 1 {
                    if writing {
                        let private = Arc::new(Mutex::new(table.lock().unwrap().clone()));
                        self.slots[slot] = Pde::Local(private.clone());
                        self.tlb.flush_all();
                        Ok(private)
                    } else {
                        for e in table.lock().unwrap().entries.iter_mut() {
                            e.clear_hw_writable();
                        }
                        Ok(table.clone())
                    }
                } else {
                    Ok(table.clone())
                }
            }
        }
    }

    /// Maps `frame` at `va` with nominal permission `perm`, evicting any
    /// prior mapping.
    pub fn insert(
        &mut self,
        arena: &FrameArena,
        va: Va,
        frame: Frame,
        perm: PermBits,
    ) -> Result<(), KernelError> {
        let table = self.walk(va, true)?;
        let idx = va.pte_index();
        let mut t = table.lock().unwrap();
        if let Some(old) = std::mem::replace(&mut t.entries[idx], Pte::default()).frame() {
            arena.free_frame(old.clone());
        }
        t.entries[idx] = Pte {
            kind: PteKind::Local {
                frame,
                hw_writable: perm.contains(PermBits::SYS_WRITE),
            },
            nominal: perm,
        };
        self.tlb.flush_page();
        Ok(())
    }

    /// Removes the mapping(s) covering `[va, va+size)`, a 4 KB-aligned
    /// range. Drops the whole table when the removed range covers it
    /// exactly.
    pub fn remove(&mut self, arena: &FrameArena, va: Va, size: usize) -> Result<(), KernelError> {
        if va.into_usize() % PAGESIZE != 0 || size % PAGESIZE != 0 {
            return Err(KernelError::BadAddress);
        }
        let mut cursor = va;
        let end = va.add(size);
        while cursor < end {
            let slot = Self::slot_of(cursor);
            let slot_base = cursor.ptsize_down();
            let whole_table = slot_base == cursor && end.into_usize() - cursor.into_usize() >= PTSIZE;
            match &self.slots[slot] {
                Pde::Local(table) => {
                    if whole_table {
                        let t = table.lock().unwrap();
                        for e in t.entries.iter() {
                            if let Some(f) = e.frame() {
                                arena.free_frame(f.clone());
                            }
                        }
                        drop(t);
                        self.slots[slot] = Pde::Absent;
                        cursor = cursor.add(PTSIZE);
                        continue;
                    } else {
                        let t = table.clone();
                        let mut t = t.lock().unwrap();
                        let idx = cursor.pte_index();
                        if let Some(f) = std::mem::replace(&mut t.entries[idx], Pte::default()).frame()
                        {
                            arena.free_frame(f.clone());
                        }
                    }
                }
                Pde::Absent | Pde::Remote { .. } => {}
            }
            cursor = cursor.add(PAGESIZE);
        }
        self.tlb.flush_page();
        Ok(())
    }

    /// `copy(spdir, sva, dpdir, dva, size)`: 4 MB-aligned bulk COW copy.
    /// Shares the underlying page tables between `self` (source) and
    /// `dst` (destination), clearing the hardware-writable bit on both
    /// sides while preserving nominal SYS_WRITE, so a later write on
    /// either side faults into `pagefault` (§4.1).
    pub fn copy(
        &mut self,
        sva: Va,
        dst: &mut PageDirectory,
        dva: Va,
        size: usize,
    ) -> Result<(), KernelError> {
        if sva.into_usize() % PTSIZE != 0
            || dva.into_usize() % PTSIZE != 0
            || size % PTSIZE != 0
        {
            return Err(KernelError::BadAddress);
        }
        let regions = size / PTSIZE;
        for i in 0..regions {
            let s = sva.add(i * PTSIZE);
            let d = dva.add(i * PTSIZE);
            let sslot = Self::slot_of(s);
            let dslot = Self::slot_of(d);
            match &self.slots[sslot] {
                Pde::Absent => {
                    dst.slots[dslot] = Pde::Absent;
                }
                Pde::Remote { node, addr } => {
                    dst.slots[dslot] = Pde::Remote {
                        node: *node,
                        addr: *addr,
                    };
                }
                Pde::Local(table) => {
                    {
                        let mut t = table.lock().unwrap();
                        for e in t.entries.iter_mut() {
                            e.clear_hw_writable();
                        }
                    }
                    dst.slots[dslot] = Pde::Local(table.clone());
                }
            }
        }
        self.tlb.flush_all();
        dst.tlb.flush_all();
        Ok(())
    }

    /// `setperm(pdir, va, size, perm)`: sets nominal permissions on each
    /// 4 KB page in range. Granting SYS_READ on an absent page maps the
    /// shared zero page read-only; granting SYS_WRITE only records the
    /// nominal bit — the actual copy is deferred to `pagefault`.
    pub fn setperm(&mut self, va: Va, size: usize, perm: PermBits) -> Result<(), KernelError> {
        if va.into_usize() % PAGESIZE != 0 || size % PAGESIZE != 0 {
            return Err(KernelError::BadAddress);
        }
        let mut cursor = va;
        let end = va.add(size);
        while cursor < end {
            let table = self.walk(cursor, true)?;
            let idx = cursor.pte_index();
            let mut t = table.lock().unwrap();
            let e = &mut t.entries[idx];
            if e.is_absent() && perm.contains(PermBits::SYS_READ) {
                e.kind = PteKind::Zero;
            }
            e.nominal = perm;
            if !perm.contains(PermBits::SYS_WRITE) {
                e.clear_hw_writable();
            }
            cursor = cursor.add(PAGESIZE);
        }
        self.tlb.flush_page();
        Ok(())
    }

    /// `pagefault(fva)`: the COW / lazy-zero-page write-fault handler.
    /// If nominal SYS_WRITE is set and the page is either read-shared
    /// or the zero page, install a private writable copy. Otherwise the
    /// fault is reflected to the user.
    pub fn pagefault(&mut self, arena: &FrameArena, fva: Va) -> Result<(), KernelError> {
        let table = self.walk(fva, true)?;
        let idx = fva.pte_index();
        let mut t = table.lock().unwrap();
        let e = &mut t.entries[idx];
        if !e.nominal.contains(PermBits::SYS_WRITE) {
            return Err(KernelError::InvalidAccess);
        }
        let needs_copy = match &e.kind {
            PteKind::Zero => true,
            PteKind::Local { frame, .. } => frame.refcount() > 1,
            PteKind::Absent | PteKind::Remote { .. } => return Err(KernelError::BadAddress),
        };
        if !needs_copy {
            if let PteKind::Local { hw_writable, .. } = &mut e.kind {
                *hw_writable = true;
            }
            return Ok(());
        }
        let old = match &e.kind {
            PteKind::Local { frame, .. } => Some(frame.clone()),
            _ => None,
        };
        let fresh = arena.alloc()?;
        if let Some(old) = &old {
            fresh.write(&old.read());
        }
        if let Some(old) = old {
            arena.free_frame(old);
        }
        e.kind = PteKind::Local {
            frame: fresh,
            hw_writable: true,
        };
        drop(t);
        self.tlb.flush_page();
        Ok(())
    }

    /// Reads `size` bytes starting at `va` from frames mapped in this
    /// directory (used by bulk copy helpers in the file layer and by
    /// tests). `va`/`size` need not be page-aligned.
    pub fn read_bytes(&self, va: Va, size: usize, out: &mut [u8]) {
        let mut off = 0usize;
        let mut cur = va;
        while off < size {
            let slot = Self::slot_of(cur);
            let in_page = PAGESIZE - cur.page_offset();
            let n = in_page.min(size - off);
            if let Pde::Local(table) = &self.slots[slot] {
                let t = table.lock().unwrap();
                let idx = cur.pte_index();
                match &t.entries[idx].kind {
                    PteKind::Local { frame, .. } => {
                        let page = frame.read();
                        out[off..off + n]
                            .copy_from_slice(&page[cur.page_offset()..cur.page_offset() + n]);
                    }
                    _ => out[off..off + n].fill(0),
                }
            } else {
                out[off..off + n].fill(0);
            }
            off += n;
            cur = cur.add(n);
        }
    }

    /// Writes `data` into `[va, va+data.len())`, allocating private
    /// frames as needed (used by PUT's `ZERO`/`COPY` memory ops and by
    /// `exec`'s segment loader).
    pub fn write_bytes(
        &mut self,
        arena: &FrameArena,
        va: Va,
        data: &[u8],
    ) -> Result<(), KernelError> {
        let mut off = 0usize;
        let mut cur = va;
        while off < data.len() {
            let table = self.walk(cur, true)?;
            let idx = cur.pte_index();
            let in_page = PAGESIZE - cur.page_offset();
            let n = in_page.min(data.len() - off);
            let mut t = table.lock().unwrap();
            let e = &mut t.entries[idx];
            let needs_fresh = !matches!(e.kind, PteKind::Local { hw_writable: true, .. });
            if needs_fresh {
                let old = e.frame().cloned();
                let fresh = arena.alloc()?;
                if let Some(old) = &old {
                    fresh.write(&old.read());
                }
                if let Some(old) = old {
                    arena.free_frame(old);
                }
                e.kind = PteKind::Local {
                    frame: fresh,
                    hw_writable: true,
                };
                e.nominal = PermBits::SYS_READ | PermBits::SYS_WRITE;
            }
            if let PteKind::Local { frame, .. } = &e.kind {
                let mut page = frame.read();
                page[cur.page_offset()..cur.page_offset() + n].copy_from_slice(&data[off..off + n]);
                frame.write(&page);
            }
            off += n;
            cur = cur.add(n);
        }
        self.tlb.flush_page();
        Ok(())
    }

    /// `merge(rpdir, spdir, sva, dpdir, dva, size)`: three-way merge at
    /// 4 MB granularity, using `self` as the merge base (`rpdir`),
    /// `src` as the source, and `dst` as the destination (§4.1).
    pub fn merge(
        &self,
        arena: &FrameArena,
        src: &PageDirectory,
        sva: Va,
        dst: &mut PageDirectory,
        dva: Va,
        size: usize,
    ) -> Result<bool, KernelError> {
        if sva.into_usize() % PTSIZE != 0
            || dva.into_usize() % PTSIZE != 0
            || size % PTSIZE != 0
        {
            return Err(KernelError::BadAddress);
        }
        let mut conflict = false;
        let regions = size / PTSIZE;
        for i in 0..regions {
            let s = sva.add(i * PTSIZE);
            let d = dva.add(i * PTSIZE);
            let sslot = Self::slot_of(s);
            let dslot = Self::slot_of(d);
            // `rpdir` (`self`) is the snapshot of the *source* process
            // taken at its last SYS_SNAP, so it shares `src`'s addressing
            // even when the destination is mapped at a different `dva`.
            let rslot = sslot;

            let src_is_ref = ptr_eq_slot(&self.slots[rslot], &src.slots[sslot]);
            let dst_is_ref = ptr_eq_slot(&self.slots[rslot], &dst.slots[dslot]);

            if src_is_ref {
                continue;
            }
            if dst_is_ref {
                match &src.slots[sslot] {
                    Pde::Absent => dst.slots[dslot] = Pde::Absent,
                    Pde::Remote { node, addr } => {
                        dst.slots[dslot] = Pde::Remote {
                            node: *node,
                            addr: *addr,
                        }
                    }
                    Pde::Local(table) => {
                        for e in table.lock().unwrap().entries.iter_mut() {
                            e.clear_hw_writable();
                        }
                        dst.slots[dslot] = Pde::Local(table.clone());
                    }
                }
                continue;
            }

            // General case: walk into all three and merge leaf-by-leaf.
            let rtable = match &self.slots[rslot] {
                Pde::Local(t) => Some(t.clone()),
                _ => None,
            };
            let stable = match &src.slots[sslot] {
                Pde::Local(t) => Some(t.clone()),
                _ => None,
            };
            let dtable = match &dst.slots[dslot] {
                Pde::Local(t) => Some(t.clone()),
                Pde::Absent => {
                    let t = Arc::new(Mutex::new(PageTable::new()));
                    dst.slots[dslot] = Pde::Local(t.clone());
                    Some(t)
                }
                Pde::Remote { .. } => return Err(KernelError::BadAddress),
            };
            for idx in 0..ENTRIES_PER_TABLE {
                let rpte = rtable.as_ref().map(|t| t.lock().unwrap().entries[idx].clone());
                let spte = stable
                    .as_ref()
                    .map(|t| t.lock().unwrap().entries[idx].clone())
                    .unwrap_or_default();
                let rpte = rpte.unwrap_or_default();
                let same_as_snapshot_src = pte_bytes_eq(arena, &rpte, &spte);
                if same_as_snapshot_src {
                    continue;
                }
                let dtable = dtable.as_ref().unwrap();
                let dpte = dtable.lock().unwrap().entries[idx].clone();
                let same_as_snapshot_dst = pte_bytes_eq(arena, &rpte, &dpte);
                if same_as_snapshot_dst {
                    // COW-copy source's leaf into destination.
                    let mut t = dtable.lock().unwrap();
                    if let Some(old) = t.entries[idx].frame() {
                        arena.free_frame(old.clone());
                    }
                    t.entries[idx] = clone_readonly_leaf(&spte);
                } else {
                    let had_conflict = mergepage(arena, &rpte, &spte, dtable, idx)?;
                    conflict |= had_conflict;
                }
            }
        }
        Ok(!conflict)
    }
}

impl PageDirectory {
    /// Number of 4 MB directory slots (§4.6 page-pull walks these in
    /// order).
    pub fn slot_count() -> usize {
        Va::directory_slots()
    }

    /// `Some((node, addr))` if slot `idx` is a not-yet-pulled remote
    /// reference.
    pub fn slot_remote(&self, idx: usize) -> Option<(u8, usize)> {
        match &self.slots[idx] {
            Pde::Remote { node, addr } => Some((*node, *addr)),
            _ => None,
        }
    }

    /// The local table backing slot `idx`, if already resolved.
    pub fn slot_table(&self, idx: usize) -> Option<Arc<Mutex<PageTable>>> {
        match &self.slots[idx] {
            Pde::Local(t) => Some(t.clone()),
            _ => None,
        }
    }

    /// Marks slot `idx` as a remote reference, pending a later pull
    /// (§4.6 "local present entries become RRs against the sender's
    /// node").
    pub fn set_slot_remote(&mut self, idx: usize, node: u8, addr: usize) {
        self.slots[idx] = Pde::Remote { node, addr };
    }

    /// Installs a freshly pulled table at `idx`, replacing whatever was
    /// there (§4.6 "the pull ... resolving each PDE").
    pub fn set_slot_local(&mut self, idx: usize, table: Arc<Mutex<PageTable>>) {
        self.slots[idx] = Pde::Local(table);
        self.tlb.flush_all();
    }

    /// Whether every slot/leaf in the user window is fully resolved: no
    /// directory slot is `Remote`, and no leaf of any `Local` table has
    /// the REMOTE bit set (§8 property 7, checked once a migrated
    /// process's outstanding pulls all complete).
    pub fn fully_resolved(&self) -> bool {
        self.slots.iter().all(|s| match s {
            Pde::Remote { .. } => false,
            Pde::Local(t) => !t.lock().unwrap().entries.iter().any(|e| e.is_remote()),
            Pde::Absent => true,
        })
    }

    /// The first directory slot still awaiting a pull, in the order
    /// §4.6 "the pull then walks forward through the user window"
    /// resolves them.
    pub fn first_remote_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Pde::Remote { .. }))
    }

    /// The first leaf within already-resolved slot `idx` still awaiting
    /// a pull, if `idx` names a local table.
    pub fn first_remote_leaf(&self, idx: usize) -> Option<usize> {
        match &self.slots[idx] {
            Pde::Local(t) => t.lock().unwrap().entries.iter().position(|e| e.is_remote()),
            _ => None,
        }
    }

    /// Clones the slot vector, sharing each `Local` table's `Arc` rather
    /// than deep-copying pages. Used to take a SYS_SNAP snapshot without
    /// mutating the live directory being snapshotted.
    pub fn shallow_clone(&self) -> PageDirectory {
        PageDirectory {
            slots: self.slots.clone(),
            tlb: TlbStats::default(),
        }
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn ptr_eq_slot(a: &Pde, b: &Pde) -> bool {
    match (a, b) {
        (Pde::Absent, Pde::Absent) => true,
        (Pde::Local(x), Pde::Local(y)) => Arc::ptr_eq(x, y),
        (Pde::Remote { node: n1, addr: a1 }, Pde::Remote { node: n2, addr: a2 }) => {
            n1 == n2 && a1 == a2
        }
        _ => false,
    }
}

fn pte_bytes_eq(arena: &FrameArena, a: &Pte, b: &Pte) -> bool {
    let _ = arena;
    match (&a.kind, &b.kind) {
        (PteKind::Absent, PteKind::Absent) => true,
        (PteKind::Zero, PteKind::Zero) => true,
        (PteKind::Local { frame: f1, .. }, PteKind::Local { frame: f2, .. }) => {
            f1.index() == f2.index() || f1.read() == f2.read()
        }
        (PteKind::Remote { node: n1, addr: a1 }, PteKind::Remote { node: n2, addr: a2 }) => {
            n1 == n2 && a1 == a2
        }
        _ => false,
    }
}

fn clone_readonly_leaf(src: &Pte) -> Pte {
    match &src.kind {
        PteKind::Local { frame, .. } => Pte {
            kind: PteKind::Local {
                frame: frame.clone(),
                hw_writable: false,
            },
            nominal: src.nominal,
        },
        other => Pte {
            kind: other.clone(),
            nominal: src.nominal,
        },
    }
}

/// `mergepage(rpte, spte, dpte)`: byte-wise three-way merge of a single
/// leaf. Returns `true` if a conflict was detected (and the
/// destination mapping was cleared to the zero page).
fn mergepage(
    arena: &FrameArena,
    rpte: &Pte,
    spte: &Pte,
    dtable: &Arc<Mutex<PageTable>>,
    idx: usize,
) -> Result<bool, KernelError> {
    let rdata = match &rpte.kind {
        PteKind::Local { frame, .. } => frame.read(),
        _ => [0u8; PAGESIZE],
    };
    let sdata = match &spte.kind {
        PteKind::Local { frame, .. } => frame.read(),
        _ => [0u8; PAGESIZE],
    };

    let mut t = dtable.lock().unwrap();
    let dpte = &mut t.entries[idx];
    let needs_clone = match &dpte.kind {
        PteKind::Zero => true,
        PteKind::Local { frame, .. } => frame.refcount() > 1,
        _ => false,
    };
    if needs_clone {
        let old = dpte.frame().cloned();
        let fresh = arena.alloc()?;
        if let Some(old) = &old {
            fresh.write(&old.read());
        }
        if let Some(old) = old {
            arena.free_frame(old);
        }
        dpte.kind = PteKind::Local {
            frame: fresh,
            hw_writable: true,
        };
    }
    let frame = match &dpte.kind {
        PteKind::Local { frame, .. } => frame.clone(),
        _ => unreachable!("cloned above"),
    };
    let mut ddata = frame.read();
    let mut conflict_at = None;
    for b in 0..PAGESIZE {
        if sdata[b] == rdata[b] {
            // Source unchanged this side; destination's byte stands.
            continue;
        }
        if ddata[b] == rdata[b] {
            ddata[b] = sdata[b];
        } else if ddata[b] != sdata[b] {
            conflict_at = Some(b);
            break;
        }
    }
    if let Some(_b) = conflict_at {
        log::warn!("merge conflict in page table entry {idx}");
        let old = frame;
        arena.free_frame(old);
        dpte.kind = PteKind::Zero;
        dpte.nominal = PermBits::SYS_READ;
        return Ok(true);
    }
    frame.write(&ddata);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::USERLO;
    use crate::mm::frame::FrameArena;

    fn va(off: usize) -> Va {
        Va::new(USERLO + off).unwrap()
    }

    #[test]
    fn cow_copy_preserves_then_diverges() {
        let arena = FrameArena::new(64);
        let mut parent = PageDirectory::new();
        let f = arena.alloc().unwrap();
        f.write(&{
            let mut b = [0u8; PAGESIZE];
            b[0] = 0xAA;
            b
        });
        parent.insert(&arena, va(0), f, PermBits::SYS_READ | PermBits::SYS_WRITE).unwrap();

        let mut child = PageDirectory::new();
        parent.copy(va(0), &mut child, va(0), PTSIZE).unwrap();

        let mut buf = [0u8; 1];
        child.read_bytes(va(0), 1, &mut buf);
        assert_eq!(buf[0], 0xAA);

        // Parent writes a new pattern; child must still see the old one.
        parent.write_bytes(&arena, va(0), &[0xBB]).unwrap();
        let mut pbuf = [0u8; 1];
        parent.read_bytes(va(0), 1, &mut pbuf);
        assert_eq!(pbuf[0], 0xBB);

        let mut cbuf = [0u8; 1];
        child.read_bytes(va(0), 1, &mut cbuf);
        assert_eq!(cbuf[0], 0xAA);
    }

    #[test]
    fn pagefault_materializes_private_copy() {
        let arena = FrameArena::new(64);
        let mut parent = PageDirectory::new();
        let f = arena.alloc().unwrap();
        parent.insert(&arena, va(0), f, PermBits::SYS_READ | PermBits::SYS_WRITE).unwrap();
        let mut child = PageDirectory::new();
        parent.copy(va(0), &mut child, va(0), PTSIZE).unwrap();

        child.pagefault(&arena, va(0)).unwrap();
        child.write_bytes(&arena, va(0), &[0x42]).unwrap();
        parent.write_bytes(&arena, va(0), &[0x99]).unwrap();

        let mut cbuf = [0u8; 1];
        child.read_bytes(va(0), 1, &mut cbuf);
        assert_eq!(cbuf[0], 0x42);
    }
}
