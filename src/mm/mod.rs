//! Memory management: the physical frame arena and the page-table
//! manager built on top of it (§4.1).

pub mod frame;
pub mod page_table;
pub mod pte;
pub mod tlb;

pub use frame::{Frame, FrameArena, NodeId};
pub use page_table::{Pde, PageDirectory, PageTable};
pub use pte::{PermBits, Pte, PteKind};
