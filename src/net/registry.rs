//! Node-local `RR -> page table` lookup (§9 "Cross-node references":
//! *"implement them as value types; lookups go through a node-local
//! map RR -> frame"*).
//!
//! Plain frames need no such map: a frame's RR address is just its
//! index in the local [`crate::mm::FrameArena`], which is already a
//! stable node-local lookup. A shared page *table*, however, is an
//! `Arc<Mutex<PageTable>>` with no integer identity of its own, so any
//! table that becomes reachable from another node (because this node
//! answered a `pglev == 1` PULLRQ for it) is registered here under a
//! fresh address the first time it is exposed.

use crate::mm::PageTable;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct RrTable {
    next_addr: Mutex<u32>,
    tables: Mutex<HashMap<u32, Arc<Mutex<PageTable>>>>,
}

impl RrTable {
    pub fn new() -> Self {
        RrTable {
            next_addr: Mutex::new(1),
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_table(&self, table: Arc<Mutex<PageTable>>) -> u32 {
        let mut n = self.next_addr.lock().unwrap();
        let addr = *n;
        *n += 1;
        self.tables.lock().unwrap().insert(addr, table);
        addr
    }

    pub fn lookup_table(&self, addr: u32) -> Option<Arc<Mutex<PageTable>>> {
        self.tables.lock().unwrap().get(&addr).cloned()
    }
}

impl Default for RrTable {
    fn default() -> Self {
        Self::new()
    }
}
