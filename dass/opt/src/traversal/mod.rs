//! Helpers for traversing the functions of a program
mod action;
mod construct;
mod diagnostics;
mod func_traversal;
mod visitor;

pub use action::{Action, VisResult};
pub use construct::{ConstructVisitor, Named, ParseVal, PassOpt};
pub use diagnostics::{DiagnosticContext, DiagnosticPass};
pub use func_traversal::{FuncTraversal, Order};
pub use visitor::Visitor;
