//! # The DASS middle-end
//!
//! Decides which parts of a dynamically scheduled program can be given a
//! static schedule, and checks the loop transformations requested on the
//! remaining dynamic loops. Programs are [dass_ir::Context]s; the work is
//! split into passes run by the [pass_manager::PassManager]:
//!
//! - `static-islands` outlines straight-line dataflow islands.
//! - `static-loops-mem` and `static-loops-cf` outline loops whose memory
//!   accesses or control flow allow a fixed schedule.
//! - `loop-interchange` proves how far apart iterations must be before they
//!   can be reordered, with the help of a [verify::VerificationOracle].
//! - `port-offsets` reports the FIFO depths needed around static functions.
pub mod analysis;
pub mod default_passes;
#[cfg(test)]
mod fixtures;
pub mod pass_manager;
pub mod passes;
pub mod traversal;
pub mod verify;
