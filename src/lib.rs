//! A determinate-parallel process substrate: COW page tables with
//! byte-level three-way merge, PUT/GET/RET rendezvous syscalls,
//! versioned file reconciliation, and cross-node process migration
//! with on-demand page pull.
//!
//! Grounded on `casys-kaist-KeOS`'s `keos` core and its
//! `keos-project1..3` student layers, reworked from a freestanding
//! `#![no_std]` kernel into a hosted (`std`) library — see
//! `SPEC_FULL.md`'s "Ambient stack" section and `DESIGN.md` for the
//! full rationale.

pub mod addr;
pub mod config;
pub mod error;
pub mod exec;
pub mod fs;
pub mod mm;
pub mod net;
pub mod process;
pub mod syscall;
