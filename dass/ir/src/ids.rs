use dass_idx::impl_index;
use serde::{Deserialize, Serialize};

/// A basic block of a function.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct BlockIdx(u32);
impl_index!(BlockIdx);

/// An instruction of a function. Stays valid after the instruction is
/// erased.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct InstIdx(u32);
impl_index!(InstIdx);

/// A loop of a [crate::LoopNest].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopIdx(u32);
impl_index!(LoopIdx);

/// A node of a [crate::DataflowGraph].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(u32);
impl_index!(NodeIdx);
