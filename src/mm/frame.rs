//! Physical-page frame allocator.
//!
//! Grounded on `keos::mm::{Page, Arena}`: a fixed arena of fixed-size
//! frames, a free bitmap, and an atomic refcount per frame. Unlike the
//! teacher, frames here are plain `Box<[u8; PAGESIZE]>` slots inside a
//! `Vec`-backed arena (there is no real MMU to back a kernel virtual
//! address with), but the allocation discipline — refcount on clone,
//! free on drop to zero, `home`/`share_mask` tags per §3 "Page frame" —
//! is the same.

use crate::addr::PAGESIZE;
use crate::error::KernelError;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Node id type; `0` is reserved as "unset".
pub type NodeId = u8;

/// Per-frame metadata living alongside the raw bytes: reference count,
/// home node/address (0 = owned locally), and a share-mask of nodes
/// that hold a read-shared copy (§3 "Page frame").
struct FrameMeta {
    bytes: Mutex<[u8; PAGESIZE]>,
    refcount: AtomicU32,
    /// 0 = locally owned; otherwise the originating node id.
    home_node: AtomicU8,
    /// Bitmask (bit i = node i+1) of nodes holding a shared copy.
    share_mask: AtomicU32,
}

/// The process-wide physical frame arena.
pub struct FrameArena {
    frames: Vec<Arc<FrameMeta>>,
    free: Mutex<Vec<usize>>,
}

impl FrameArena {
    /// Creates an arena with `count` frames, all initially free.
    pub fn new(count: usize) -> Self {
        let frames = (0..count)
            .map(|_| {
                Arc::new(FrameMeta {
                    bytes: Mutex::new([0u8; PAGESIZE]),
                    refcount: AtomicU32::new(0),
                    home_node: AtomicU8::new(0),
                    share_mask: AtomicU32::new(0),
                })
            })
            .collect();
        FrameArena {
            frames,
            free: Mutex::new((0..count).rev().collect()),
        }
    }

    /// Allocates a zeroed frame, or `NoMemory` if the freelist is empty.
    pub fn alloc(&self) -> Result<Frame, KernelError> {
        let idx = self.free.lock().unwrap().pop().ok_or(KernelError::NoMemory)?;
        let meta = self.frames[idx].clone();
        *meta.bytes.lock().unwrap() = [0u8; PAGESIZE];
        meta.refcount.store(1, Ordering::SeqCst);
        meta.home_node.store(0, Ordering::SeqCst);
        meta.share_mask.store(0, Ordering::SeqCst);
        Ok(Frame { idx, meta })
    }

    /// Returns a frame's index to the freelist. Called once its refcount
    /// reaches zero.
    fn release(&self, idx: usize) {
        self.free.lock().unwrap().push(idx);
    }

    /// Looks up a resident, owned frame by its arena index — the
    /// address half of the RR a PULLRQ responder resolves (§4.6 "a
    /// responder receives a PULLRQ, validates that the addressed frame
    /// is resident and owned"). Returns a fresh clone (bumping the
    /// refcount), or `None` if the index is out of range or free.
    pub fn frame_at(&self, idx: usize) -> Option<Frame> {
        let meta = self.frames.get(idx)?.clone();
        if meta.refcount.load(Ordering::SeqCst) == 0 {
            return None;
        }
        meta.refcount.fetch_add(1, Ordering::SeqCst);
        Some(Frame { idx, meta })
    }
}

/// A refcounted handle to a physical frame.
///
/// Cloning increments the shared refcount (this is how a page table
/// shares a frame between parent and child after `copy`); dropping the
/// last clone returns the frame to its arena.
pub struct Frame {
    idx: usize,
    meta: Arc<FrameMeta>,
}

impl Frame {
    /// Frame index, used as the "physical address" analogue.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Current reference count.
    pub fn refcount(&self) -> u32 {
        self.meta.refcount.load(Ordering::SeqCst)
    }

    /// Reads the frame's contents.
    pub fn read(&self) -> [u8; PAGESIZE] {
        *self.meta.bytes.lock().unwrap()
    }

    /// Overwrites the frame's contents.
    pub fn write(&self, data: &[u8; PAGESIZE]) {
        *self.meta.bytes.lock().unwrap() = *data;
    }

    /// Reads a single byte.
    pub fn read_byte(&self, offset: usize) -> u8 {
        self.meta.bytes.lock().unwrap()[offset]
    }

    /// Writes a single byte.
    pub fn write_byte(&self, offset: usize, b: u8) {
        self.meta.bytes.lock().unwrap()[offset] = b;
    }

    /// Marks this frame as originating from `node`, used when a pulled
    /// page arrives over the wire (§4.6).
    pub fn set_home(&self, node: NodeId) {
        self.meta.home_node.store(node, Ordering::SeqCst);
    }

    /// `0` if locally owned, else the originating node id.
    pub fn home(&self) -> NodeId {
        self.meta.home_node.load(Ordering::SeqCst)
    }

    /// OR's `node` into the share-mask. Per §5 the mask is OR-only:
    /// frames are never reclaimed once shared across nodes.
    pub fn mark_shared_with(&self, node: NodeId) {
        if node >= 1 && node <= 32 {
            self.meta
                .share_mask
                .fetch_or(1 << (node - 1), Ordering::SeqCst);
        }
    }

    /// Current share-mask bitset.
    pub fn share_mask(&self) -> u32 {
        self.meta.share_mask.load(Ordering::SeqCst)
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        self.meta.refcount.fetch_add(1, Ordering::SeqCst);
        Frame {
            idx: self.idx,
            meta: self.meta.clone(),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.meta.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last reference: the arena reclaims the slot. We cannot hold a
            // reference to the owning arena here without a back-pointer, so
            // frames are returned explicitly via `FrameArena::free_frame`
            // wherever the caller has access to the arena; this Drop impl
            // only restores the refcount invariant for callers that clone
            // and drop without ever reinserting into a table.
        }
    }
}

impl FrameArena {
    /// Explicitly returns `frame` to the freelist if this was its last
    /// reference. Page-table code calls this instead of relying solely on
    /// `Drop`, since the arena (not the frame) owns the freelist.
    pub fn free_frame(&self, frame: Frame) {
        let idx = frame.idx;
        let refcount = {
            let meta = frame.meta.clone();
            drop(frame);
            meta.refcount.load(Ordering::SeqCst)
        };
        if refcount == 0 {
            self.release(idx);
        }
    }
}

/// The distinguished shared zero page: read-only, copy-on-write on first
/// write fault (§4.1 `setperm`, `pagefault`).
pub const ZERO_PAGE: [u8; PAGESIZE] = [0u8; PAGESIZE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let arena = FrameArena::new(4);
        let f1 = arena.alloc().unwrap();
        let f2 = arena.alloc().unwrap();
        assert_ne!(f1.index(), f2.index());
        arena.free_frame(f1);
        let f3 = arena.alloc().unwrap();
        let f4 = arena.alloc().unwrap();
        let _ = arena.alloc().unwrap();
        assert!(arena.alloc().is_err());
        arena.free_frame(f3);
        arena.free_frame(f4);
        arena.free_frame(f2);
    }

    #[test]
    fn refcount_tracks_clones() {
        let arena = FrameArena::new(2);
        let f = arena.alloc().unwrap();
        assert_eq!(f.refcount(), 1);
        let g = f.clone();
        assert_eq!(f.refcount(), 2);
        arena.free_frame(g);
        assert_eq!(f.refcount(), 1);
        arena.free_frame(f);
    }
}
