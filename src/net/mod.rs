//! Cross-node process migration and on-demand page pull (§4.6).
//!
//! Grounded on `ryanbreen-breenix`'s `net::ethernet` module for the
//! wire-framing shape; the migration/pull protocol itself has no
//! teacher counterpart and is built directly from §4.6/§6.

pub mod dispatch;
pub mod migration;
pub mod pull;
pub mod registry;
pub mod rr;
pub mod wire;

pub use dispatch::net_rx;
pub use migration::MigrationTable;
pub use registry::RrTable;
pub use rr::Rr;
