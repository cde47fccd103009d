use crate::analysis::PortOffsetAnalysis;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use dass_ir as ir;
use dass_utils::{DassResult, OutputFile};
use std::io::Write;

/// Writes the port offset table of every statically scheduled function.
/// Functions without a schedule are listed with zero offsets.
pub struct PortOffsets {
    file: OutputFile,
}

impl Named for PortOffsets {
    fn name() -> &'static str {
        "port-offsets"
    }

    fn description() -> &'static str {
        "report pipeline offsets and FIFO depths of static function ports"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "file",
            "where to write the offset table",
            ParseVal::OutStream(OutputFile::Stdout),
            PassOpt::parse_outstream,
        )]
    }
}

impl ConstructVisitor for PortOffsets {
    fn from(ctx: &ir::Context) -> DassResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(PortOffsets {
            file: opts[&"file"].outstream(),
        })
    }

    fn clear_data(&mut self) {}
}

impl Visitor for PortOffsets {
    fn start(
        &mut self,
        func: &mut ir::Function,
        _outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        if !func.is_static() || func.name == "main" {
            return Ok(Action::Stop);
        }
        let analysis = PortOffsetAnalysis::new(func);
        log::info!(
            "`{}': {} ports written to {}",
            func.name,
            analysis.ports.len(),
            self.file
        );
        let mut w = self.file.get_write()?;
        write!(w, "{analysis}")?;
        w.flush()?;
        Ok(Action::Continue)
    }
}
