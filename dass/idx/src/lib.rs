//! Typed indices and dense maps keyed by them. Every arena in the program
//! model (blocks, instructions, loops, dataflow nodes) is an [IndexedMap]
//! keyed by a newtype declared with [impl_index!].
mod index_trait;
mod indexed_map;
mod macros;

pub mod maps {
    pub use super::indexed_map::{IndexedMap, SecondaryMap};
}

pub use index_trait::IndexRef;
