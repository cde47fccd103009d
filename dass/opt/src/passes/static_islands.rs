use super::skip;
use crate::analysis::IslandPartition;
use crate::traversal::{
    Action, ConstructVisitor, DiagnosticContext, DiagnosticPass, Named,
    ParseVal, PassOpt, VisResult, Visitor,
};
use dass_ir::{self as ir, DataflowGraph};
use dass_utils::DassResult;

/// Outlines islands of the dataflow graph into statically scheduled
/// functions.
///
/// Nodes are grouped with [IslandPartition]: neighbouring nodes are merged
/// as long as neither is a phi, a fork, a branch or a memory or call
/// operation, and the merge keeps the island inside one block. Every island
/// with more than one node and more than `min-size` arithmetic or
/// comparison instructions is extracted into a fresh `ssFunc_N` function
/// marked `dass_ss = "-1"`, and replaced in the caller by a call.
///
/// An island that cannot be extracted is reported and the pass moves on to
/// the next one. The errors are returned together once every function has
/// been visited.
pub struct StaticIslands {
    /// Islands must have strictly more substantial instructions than this.
    min_size: u64,
    diag: DiagnosticContext,
}

impl Named for StaticIslands {
    fn name() -> &'static str {
        "static-islands"
    }

    fn description() -> &'static str {
        "outline straight-line dataflow islands into static functions"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "min-size",
            "number of arithmetic instructions an island must exceed",
            ParseVal::Num(1),
            PassOpt::parse_num,
        )]
    }
}

impl ConstructVisitor for StaticIslands {
    fn from(ctx: &ir::Context) -> DassResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(StaticIslands {
            min_size: opts[&"min-size"].pos_num().unwrap_or(1),
            diag: DiagnosticContext::default(),
        })
    }

    fn clear_data(&mut self) {
        // Diagnostics are reported once the whole program is done.
    }
}

impl DiagnosticPass for StaticIslands {
    fn diagnostics(&self) -> &DiagnosticContext {
        &self.diag
    }
}

impl Visitor for StaticIslands {
    fn start(
        &mut self,
        func: &mut ir::Function,
        outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        if skip(func) || func.is_empty() {
            return Ok(Action::Stop);
        }
        let graph = DataflowGraph::build(func);
        let partition = IslandPartition::new(func, &graph);
        let islands = partition.static_islands(func, &graph, self.min_size);
        log::info!("`{}': {} static islands", func.name, islands.len());

        for isl in islands {
            let mut island = isl.to_island(func, &graph, &partition);
            // Earlier extractions reload their outputs under new names.
            island
                .inputs
                .retain(|v| v.as_inst().is_none_or(|d| func.is_live(d)));
            log::debug!(
                "`{}': island of {} instructions ({} substantial)",
                func.name,
                island.insts.len(),
                isl.inst_size
            );
            let name = outlined.fresh_name();
            match ir::extract_island(func, &island, name) {
                Ok(mut new) => {
                    new.mark_static("-1");
                    outlined.push(new);
                }
                Err(e) => self.diag.err(e),
            }
        }
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dass_ir::{Argument, Builder, Type, Value};

    fn arg(name: &str, ty: Type) -> Argument {
        Argument {
            name: name.into(),
            ty,
        }
    }

    /// *out = (a * b + c) - a
    fn fma() -> ir::Function {
        let mut f = ir::Function::new(
            "fma",
            vec![
                arg("a", Type::Int(32)),
                arg("b", Type::Int(32)),
                arg("c", Type::Int(32)),
                arg("out", Type::Int(32).ptr_to()),
            ],
        );
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let m = b.mul(Value::Arg(0), Value::Arg(1));
        let s = b.add(m.into(), Value::Arg(2));
        let d = b.sub(s.into(), Value::Arg(0));
        b.store(d.into(), Value::Arg(3));
        b.ret(None);
        f
    }

    #[test]
    fn arithmetic_is_outlined() {
        let mut ctx = ir::Context::new(vec![fma()]);
        let pass = StaticIslands::do_pass_default(&mut ctx).unwrap();
        assert_eq!(pass.diagnostics().errors_iter().count(), 0);
        assert_eq!(ctx.functions.len(), 2);
        let outlined = &ctx.functions[1];
        assert_eq!(outlined.name, "ssFunc_0");
        assert!(outlined.is_static());
        assert!(ctx.functions[0].has_calls());
    }

    #[test]
    fn small_islands_stay() {
        let mut ctx = ir::Context::new(vec![fma()]);
        ctx.extra_opts = vec!["static-islands:min-size=3".to_string()];
        StaticIslands::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 1);
        assert!(!ctx.functions[0].has_calls());
    }

    #[test]
    fn static_functions_are_skipped() {
        let mut f = fma();
        f.mark_static("0");
        let mut ctx = ir::Context::new(vec![f]);
        StaticIslands::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 1);
    }
}
