//! Loop interchange legality.
//!
//! A [VerificationUnit] turns a loop into a Boogie program whose procedure
//! reports one memory access of an arbitrary iteration. The `main` harness
//! calls it twice and asserts that the two accesses cannot race when
//! iterations of the enclosing loop closer than the candidate distance are
//! reordered. A [VerificationOracle] decides the program, and [search]
//! looks for the largest distance that verifies.
pub mod boogie;
mod codegen;
mod oracle;
pub mod search;
mod slice;

pub use codegen::{INTERCHANGED_LEVEL, Invariant, MemoryAccess};
pub use oracle::{BoogieOracle, ExhaustiveOracle};
pub use search::{SearchStrategy, search_depth};
pub use slice::slice_memory;

use codegen::Lowering;
use dass_ir::{self as ir, LoopNest};
use dass_utils::{DassResult, Error, Id};

/// Answer of a [VerificationOracle].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Refuted,
    /// The oracle could not decide. Treated as a failure.
    Inconclusive,
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }
}

/// A decision procedure for verification units.
pub trait VerificationOracle {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Decide whether the race-freedom assertion of `unit` holds.
    fn verify(&mut self, unit: &VerificationUnit) -> DassResult<Verdict>;
}

/// Everything needed to decide one candidate interchange distance.
#[derive(Debug, Clone)]
pub struct VerificationUnit {
    pub loop_name: Id,
    pub distance: u32,
    /// Nesting depth of the checked loop, which is also the number of
    /// iteration counters per access.
    pub depth: u32,
    /// The function sliced down to its address computations.
    pub func: ir::Function,
    pub invariants: Vec<Invariant>,
    pub accesses: Vec<MemoryAccess>,
    pub program: boogie::Program,
}

impl VerificationUnit {
    pub fn new(
        func: &ir::Function,
        loop_name: &str,
        distance: u32,
    ) -> DassResult<Self> {
        let mut sliced = func.clone();
        slice_memory(&mut sliced);
        let nest = LoopNest::new(&sliced);
        let target = nest.by_name(loop_name).ok_or_else(|| {
            Error::configuration(format!(
                "`{}' has no loop named `{loop_name}'",
                func.name
            ))
        })?;
        let mut lowering = Lowering::new(&sliced, &nest, target)?;
        let procedure = lowering.procedure()?;
        let main = lowering.harness(distance);
        let (depth, invariants, accesses) = lowering.finish();
        Ok(VerificationUnit {
            loop_name: loop_name.into(),
            distance,
            depth,
            func: sliced,
            invariants,
            accesses,
            program: boogie::Program {
                procedures: vec![procedure, main],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use dass_utils::ErrorKind;

    #[test]
    fn unknown_loops_are_configuration_errors() {
        let f = fixtures::shifted_update(0);
        let err = VerificationUnit::new(&f, "L7", 1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Configuration(_)));
    }

    #[test]
    fn outermost_loops_cannot_be_checked() {
        let f = fixtures::shifted_update(0);
        let err = VerificationUnit::new(&f, "L1", 1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Unsupported(_)));
    }

    #[test]
    fn units_leave_the_input_untouched() {
        let f = fixtures::shifted_update(0);
        let unit = VerificationUnit::new(&f, "L2", 1).unwrap();
        assert!(f.inst_by_name("add1").is_some());
        assert!(unit.func.inst_by_name("add1").is_none());
    }
}
