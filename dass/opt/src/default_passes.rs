//! Defines the default passes available to [PassManager].
use crate::passes::{
    LoopInterchange, PortOffsets, StaticIslands, StaticLoopsCf,
    StaticLoopsMem,
};
use crate::traversal::Named;
use crate::pass_manager::{PassManager, PassResult};
use crate::register_alias;

impl PassManager {
    pub fn default_passes() -> PassResult<Self> {
        // Construct the pass manager and register all passes.
        let mut pm = PassManager::default();

        // Extraction passes
        pm.register_diagnostic::<StaticIslands>()?;
        pm.register_pass::<StaticLoopsMem>()?;
        pm.register_pass::<StaticLoopsCf>()?;

        // Verification passes
        pm.register_pass::<LoopInterchange>()?;

        // Reports
        pm.register_pass::<PortOffsets>()?;

        register_alias!(
            pm,
            "dass",
            [StaticIslands, StaticLoopsMem, StaticLoopsCf]
        );
        register_alias!(pm, "all", ["dass", LoopInterchange, PortOffsets]);
        Ok(pm)
    }
}
