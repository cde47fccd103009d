//! Analyses over functions, loops and schedules.
//!
//! The analyses only read the program. Decisions based on them are taken by
//! the passes in [crate::passes].
mod induction;
mod islands;
mod perfect_nest;
mod port_offset;
mod throughput;

pub use induction::{
    InductionVariable, has_at_most_stride_one_memory, is_at_most_stride_one,
    is_dependence_safe, latch_cmp,
};
pub use islands::{IslandPartition, StaticIsland, can_merge, can_merge_edge};
pub use perfect_nest::{are_perfectly_nested, loop_guard_block, outermost_perfect_loop};
pub use port_offset::{PortInfo, PortKind, PortOffsetAnalysis};
pub use throughput::{Cycle, ThroughputLoss, node_latency};
