//! Program model of the DASS middle-end.
//!
//! A [Context] holds the functions of one LLVM module in SSA form. On top of
//! a function the crate computes its [Cfg], its [LoopNest] and its elastic
//! [DataflowGraph]. Code can be moved into new functions with
//! [extract_island] and [extract_loop], and small programs can be executed
//! with the reference [Interpreter].

// Modules defining internal structures.
mod builder;
mod cfg;
mod context;
mod dataflow;
mod function;
mod ids;
mod instruction;
mod loops;
mod metadata;
mod printer;
mod schedule;
mod types;

/// Outlining of islands and loops into new functions.
pub mod extract;

/// Reference semantics of the IR.
pub mod eval;

// Re-export types at the module level.
pub use builder::Builder;
pub use cfg::Cfg;
pub use context::{Context, Outlined};
pub use dass_utils::{GetName, Id};
pub use dataflow::{BlockFreq, DataflowGraph, ENode, NodeKind};
pub use eval::{Interpreter, Memory, Val};
pub use extract::{extract_island, extract_loop, Island};
pub use function::{Argument, Attributes, BasicBlock, Function, DASS_SS};
pub use ids::{BlockIdx, InstIdx, LoopIdx, NodeIdx};
pub use instruction::{
    BinOp, CastOp, FCmpPred, ICmpPred, Instruction, Opcode, WrapFlags,
};
pub use loops::{Loop, LoopNest};
pub use metadata::{InterchangeRequest, LoopMetadata};
pub use printer::Printer;
pub use schedule::{operation, PipelineState, Schedule};
pub use types::{mask, sext, Constant, ElemTy, Type, Value};
