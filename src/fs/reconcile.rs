//! The parent/child reconciliation pass run on every rendezvous
//! (§4.5), and the in-file append merge it dispatches to.

use super::inode::MAX_FILE_SIZE;
use super::{wellknown, FileState, Inode};
use crate::error::KernelError;

/// What happened to one reconciled pair, returned for logging/testing.
#[derive(Debug, Eq, PartialEq)]
pub enum PairOutcome {
    NoChange,
    ChildToParent,
    ParentToChild,
    Merged,
    Conflict,
    Skipped,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub did_io: bool,
    pub conflicts: Vec<usize>,
}

/// Reconciles `child` into `parent` in place, per §4.5. `parent` and
/// `child` are the two sides' in-memory file-state tables (copied into
/// a scratch region by the caller, per §4.4); this function mutates
/// both.
pub fn reconcile(parent: &mut FileState, child: &mut FileState) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    // Step 1: seed the identity-mapped predefined inodes.
    let mut c2p = vec![0usize; child.inodes.len()];
    let mut p2c = vec![0usize; parent.inodes.len()];
    for ino in [
        wellknown::CONSOLE_IN,
        wellknown::CONSOLE_OUT,
        wellknown::ROOT_DIR,
    ] {
        if ino < c2p.len() {
            c2p[ino] = ino;
        }
        if ino < p2c.len() {
            p2c[ino] = ino;
        }
    }

    // Step 2: child-side pass.
    for cino in wellknown::FIRST_GENERAL..child.inodes.len() {
        let (name, parent_ino, rino, rver, rlen, cur_ver, cur_size, ephemeral) = {
            let Some(c) = &child.inodes[cino] else {
                continue;
            };
            if c.name.is_empty() || c.mode.is_ephemeral() {
                continue;
            }
            (
                c.name.clone(),
                c.parent_ino,
                c.rino,
                c.rver,
                c.rlen,
                c.ver,
                c.size,
                c.mode.is_ephemeral(),
            )
        };
        if ephemeral {
            continue;
        }
        if rino == 0 {
            // No parent counterpart yet: create one under the mapped
            // parent directory.
            let mapped_parent_dir = if parent_ino < c2p.len() {
                c2p[parent_ino]
            } else {
                wellknown::ROOT_DIR
            };
            if let Some(new_idx) = parent.alloc_inode() {
                let mut new_inode = Inode::new_regular(&name, mapped_parent_dir);
                new_inode.mode = child.inodes[cino].as_ref().unwrap().mode;
                new_inode.mode.conflict = false;
                parent.inodes[new_idx] = Some(new_inode);
                c2p[cino] = new_idx;
                p2c[new_idx] = cino;
                child.inodes[cino].as_mut().unwrap().rino = new_idx;
            } else {
                log::warn!("reconcile: no free parent inode for child inode {cino}");
                outcome.conflicts.push(cino);
            }
            continue;
        }
        // Validate sanity: bounds, directory match, name match,
        // reference version within both sides' current versions.
        let Some(pfi) = parent.inodes.get(rino).and_then(|s| s.as_ref()) else {
            log::warn!("reconcile: child inode {cino} names nonexistent parent inode {rino}");
            outcome.conflicts.push(cino);
            continue;
        };
        let dir_ok = p2c.get(pfi.parent_ino).copied().unwrap_or(0) == parent_ino
            || pfi.parent_ino == mapped_or(&c2p, parent_ino);
        if !dir_ok || pfi.name != name || rver > pfi.ver || rver > cur_ver {
            log::warn!("reconcile: child inode {cino} failed sanity check against parent {rino}");
            outcome.conflicts.push(cino);
            continue;
        }
        let _ = rlen;
        let _ = cur_size;
        c2p[cino] = rino;
        p2c[rino] = cino;
    }

    // Step 3: parent-side pass — create child counterparts for any live
    // parent inode not yet mapped.
    for pino in wellknown::FIRST_GENERAL..parent.inodes.len() {
        if p2c[pino] != 0 {
            continue;
        }
        let (name, parent_ino, ephemeral, nonempty) = {
            let Some(p) = &parent.inodes[pino] else {
                continue;
            };
            (p.name.clone(), p.parent_ino, p.mode.is_ephemeral(), !p.name.is_empty())
        };
        if !nonempty || ephemeral {
            continue;
        }
        if let Some(new_idx) = child.alloc_inode() {
            let mapped_child_dir = if parent_ino < p2c.len() {
                p2c[parent_ino]
            } else {
                wellknown::ROOT_DIR
            };
            let mut new_inode = Inode::new_regular(&name, mapped_child_dir);
            new_inode.mode = parent.inodes[pino].as_ref().unwrap().mode;
            new_inode.mode.conflict = false;
            new_inode.rino = pino;
            child.inodes[new_idx] = Some(new_inode);
            p2c[pino] = new_idx;
            c2p[new_idx] = pino;
        } else {
            log::warn!("reconcile: no free child inode for parent inode {pino}");
        }
    }

    // Step 4: per-pair reconcile.
    for pino in wellknown::FIRST_GENERAL..parent.inodes.len() {
        let cino = p2c[pino];
        if cino == 0 {
            continue;
        }
        match reconcile_pair(parent, child, pino, cino) {
            Ok(PairOutcome::NoChange) | Ok(PairOutcome::Skipped) => {}
            Ok(PairOutcome::Conflict) => outcome.conflicts.push(cino),
            Ok(_) => outcome.did_io = true,
            Err(e) => {
                log::warn!("reconcile: pair ({pino},{cino}) failed: {e}");
                outcome.conflicts.push(cino);
            }
        }
    }

    outcome
}

fn mapped_or(map: &[usize], idx: usize) -> usize {
    map.get(idx).copied().unwrap_or(0)
}

/// Reconciles a single (parent, child) inode pair in place (§4.5 step 4).
fn reconcile_pair(
    parent: &mut FileState,
    child: &mut FileState,
    pino: usize,
    cino: usize,
) -> Result<PairOutcome, KernelError> {
    let (rver, rlen, cver, csize, pver, psize) = {
        let c = child.inodes[cino].as_ref().unwrap();
        let p = parent.inodes[pino].as_ref().unwrap();
        (c.rver, c.rlen, c.ver, c.size, p.ver, p.size)
    };

    // Snapshot monotonicity (§8 property 1).
    debug_assert!(cver >= rver, "child version must not regress its own snapshot");
    debug_assert!(pver >= rver, "parent version must not regress the child's snapshot");
    debug_assert!(!(cver == rver && csize < rlen), "size only grows within a version (child)");
    debug_assert!(!(pver == rver && psize < rlen), "size only grows within a version (parent)");

    let child_appended = cver == rver && csize > rlen;
    let parent_appended = pver == rver && psize > rlen;
    let child_changed = cver != rver || csize != rlen;
    let parent_changed = pver != rver || psize != rlen;

    if child_appended && parent_appended {
        return merge_append(parent, child, pino, cino);
    }
    if child_changed && parent_changed {
        parent.inodes[pino].as_mut().unwrap().mode.conflict = true;
        child.inodes[cino].as_mut().unwrap().mode.conflict = true;
        log::warn!("reconcile: conflicting versions on inode pair ({pino},{cino})");
        return Ok(PairOutcome::Conflict);
    }
    if child_changed && !parent_changed {
        let data = child.inodes[cino].as_ref().unwrap().data.clone();
        let ver = child.inodes[cino].as_ref().unwrap().ver;
        let size = child.inodes[cino].as_ref().unwrap().size;
        {
            let p = parent.inodes[pino].as_mut().unwrap();
            p.data = data;
            p.size = size;
            p.ver = ver;
        }
        let c = child.inodes[cino].as_mut().unwrap();
        c.rino = pino;
        c.rver = ver;
        c.rlen = size;
        return Ok(PairOutcome::ChildToParent);
    }
    if parent_changed && !child_changed {
        let data = parent.inodes[pino].as_ref().unwrap().data.clone();
        let ver = parent.inodes[pino].as_ref().unwrap().ver;
        let size = parent.inodes[pino].as_ref().unwrap().size;
        {
            let c = child.inodes[cino].as_mut().unwrap();
            c.data = data;
            c.size = size;
            c.ver = ver;
            c.rino = pino;
            c.rver = ver;
            c.rlen = size;
        }
        return Ok(PairOutcome::ParentToChild);
    }
    Ok(PairOutcome::NoChange)
}

/// In-file merge of two append-only tails (§4.5 "In-file merge").
fn merge_append(
    parent: &mut FileState,
    child: &mut FileState,
    pino: usize,
    cino: usize,
) -> Result<PairOutcome, KernelError> {
    let (rlen, csize, psize) = {
        let c = child.inodes[cino].as_ref().unwrap();
        let p = parent.inodes[pino].as_ref().unwrap();
        (c.rlen, c.size, p.size)
    };
    let cdif = csize - rlen;
    let pdif = psize - rlen;
    let new_len = rlen + cdif + pdif;
    if new_len > MAX_FILE_SIZE {
        log::warn!("reconcile: merge of inode pair ({pino},{cino}) would exceed max file size");
        return Err(KernelError::FileTooLarge);
    }

    let child_tail = child.inodes[cino].as_ref().unwrap().data[rlen..csize].to_vec();
    let parent_tail = parent.inodes[pino].as_ref().unwrap().data[rlen..psize].to_vec();

    {
        let p = parent.inodes[pino].as_mut().unwrap();
        p.data.truncate(rlen);
        p.data.extend_from_slice(&child_tail);
        p.data.extend_from_slice(&parent_tail);
        p.size = new_len;
    }
    {
        let c = child.inodes[cino].as_mut().unwrap();
        c.data.truncate(csize);
        c.data.extend_from_slice(&parent_tail);
        c.size = new_len;
        c.rino = pino;
        c.rver = c.ver;
        c.rlen = new_len;
    }
    debug_assert_eq!(
        parent.inodes[pino].as_ref().unwrap().data,
        child.inodes[cino].as_ref().unwrap().data,
        "append-append merge must leave both sides byte-identical"
    );
    Ok(PairOutcome::Merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::wellknown::FIRST_GENERAL;

    fn shared_file(parent: &mut FileState, child: &mut FileState, bytes: &[u8]) -> (usize, usize) {
        let pino = FIRST_GENERAL;
        let cino = FIRST_GENERAL;
        let mut inode = Inode::new_regular("log", wellknown::ROOT_DIR);
        inode.data = bytes.to_vec();
        inode.size = bytes.len();
        parent.inodes[pino] = Some(inode.clone());
        inode.rino = pino;
        inode.rver = inode.ver;
        inode.rlen = inode.size;
        child.inodes[cino] = Some(inode);
        (pino, cino)
    }

    #[test]
    fn s2_append_append_merge_is_order_independent() {
        let mut parent = FileState::new(16);
        let mut child = FileState::new(16);
        let (pino, cino) = shared_file(&mut parent, &mut child, b"ABC");

        child.inodes[cino].as_mut().unwrap().append(b"XYZ");
        parent.inodes[pino].as_mut().unwrap().append(b"PQ");

        let outcome = reconcile(&mut parent, &mut child);
        assert!(outcome.did_io);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(parent.inodes[pino].as_ref().unwrap().data, b"ABCXYZPQ");
        assert_eq!(child.inodes[cino].as_ref().unwrap().data, b"ABCXYZPQ");
        assert_eq!(parent.inodes[pino].as_ref().unwrap().size, 8);
    }

    #[test]
    fn s3_overwrite_overwrite_is_a_conflict() {
        let mut parent = FileState::new(16);
        let mut child = FileState::new(16);
        let (pino, cino) = shared_file(&mut parent, &mut child, b"A");

        child.inodes[cino].as_mut().unwrap().overwrite(b"C");
        parent.inodes[pino].as_mut().unwrap().overwrite(b"P");

        let outcome = reconcile(&mut parent, &mut child);
        assert_eq!(outcome.conflicts, vec![cino]);
        assert!(parent.inodes[pino].as_ref().unwrap().mode.conflict);
        assert!(child.inodes[cino].as_ref().unwrap().mode.conflict);
        assert_eq!(parent.inodes[pino].as_ref().unwrap().data, b"A");
    }

    #[test]
    fn only_child_changed_flows_to_parent() {
        let mut parent = FileState::new(16);
        let mut child = FileState::new(16);
        let (pino, cino) = shared_file(&mut parent, &mut child, b"base");
        child.inodes[cino].as_mut().unwrap().overwrite(b"child-wrote-this");

        let outcome = reconcile(&mut parent, &mut child);
        assert!(outcome.did_io);
        assert_eq!(parent.inodes[pino].as_ref().unwrap().data, b"child-wrote-this");
    }

    #[test]
    fn neither_changed_is_a_noop() {
        let mut parent = FileState::new(16);
        let mut child = FileState::new(16);
        let (pino, cino) = shared_file(&mut parent, &mut child, b"same");
        let outcome = reconcile(&mut parent, &mut child);
        assert!(!outcome.did_io);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(parent.inodes[pino].as_ref().unwrap().data, b"same");
        assert_eq!(child.inodes[cino].as_ref().unwrap().data, b"same");
    }
}
