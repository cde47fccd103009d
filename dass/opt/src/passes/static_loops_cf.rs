use super::{extract_static_loops, skip};
use crate::analysis::ThroughputLoss;
use crate::traversal::{
    Action, ConstructVisitor, Named, Order, ParseVal, PassOpt, VisResult,
    Visitor,
};
use dass_ir::{self as ir, BlockIdx, DataflowGraph, LoopNest, Opcode};
use dass_utils::{DassResult, Id};
use std::collections::HashSet;

/// Makes loops flagged by `static-loops-mem` static when a fixed schedule
/// costs little throughput.
///
/// For every flagged loop the throughput loss of a static pipeline is
/// estimated from the dataflow graph and the edge profile. Loops whose loss
/// does not exceed `loss` are extracted; the flag is cleared either way.
///
/// Once every function is done, the function named by `top` is itself
/// marked static when it has no loops left and only calls static functions.
pub struct StaticLoopsCf {
    /// Largest affordable loss.
    loss: f64,
    top: Option<Id>,
}

impl Named for StaticLoopsCf {
    fn name() -> &'static str {
        "static-loops-cf"
    }

    fn description() -> &'static str {
        "extract flagged loops whose static schedule loses little throughput"
    }

    fn opts() -> Vec<PassOpt> {
        vec![
            PassOpt::new(
                "loss",
                "affordable throughput loss of a static loop",
                ParseVal::Float(0.05),
                PassOpt::parse_float,
            ),
            PassOpt::new(
                "top",
                "function promoted when everything it calls is static",
                ParseVal::Str(String::new()),
                PassOpt::parse_string,
            ),
        ]
    }
}

impl ConstructVisitor for StaticLoopsCf {
    fn from(ctx: &ir::Context) -> DassResult<Self> {
        let opts = Self::get_opts(ctx);
        let top = opts[&"top"].string();
        Ok(StaticLoopsCf {
            loss: opts[&"loss"].float(),
            top: (!top.is_empty()).then(|| Id::from(top)),
        })
    }

    fn clear_data(&mut self) {
        /* All data is shared */
    }
}

impl Visitor for StaticLoopsCf {
    /// Callees before callers.
    fn iteration_order() -> Order {
        Order::Post
    }

    fn start(
        &mut self,
        func: &mut ir::Function,
        outlined: &mut ir::Outlined,
        _funcs: &[ir::Function],
    ) -> VisResult {
        if skip(func) || func.is_empty() {
            return Ok(Action::Stop);
        }
        let nest = LoopNest::new(func);
        let flagged: Vec<_> = nest
            .iter()
            .filter(|(l, _)| {
                nest.metadata(*l, func).is_some_and(|md| md.cdfg_check)
            })
            .map(|(l, lp)| (l, lp.header))
            .collect();
        if flagged.is_empty() {
            return Ok(Action::Continue);
        }

        let graph = DataflowGraph::build(func);
        let mut extract: Vec<BlockIdx> = vec![];
        for (l, header) in &flagged {
            let loss = ThroughputLoss::new(func, &graph, &nest, *l).loss()?;
            log::info!(
                "`{}': loop at `{}' loses {loss:.4} of its throughput",
                func.name,
                func.block(*header).name
            );
            if loss <= self.loss {
                extract.push(*header);
            }
        }
        for (_, header) in &flagged {
            if let Some(md) = func.blocks[*header].loop_md.as_mut() {
                md.cdfg_check = false;
            }
        }
        extract_static_loops(func, &extract, outlined);
        Ok(Action::Continue)
    }

    fn finish_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        let Some(top) = self.top else {
            return Ok(Action::Continue);
        };
        let statics: HashSet<Id> = ctx
            .functions
            .iter()
            .filter(|f| f.is_static())
            .map(|f| f.name)
            .collect();
        let Some(func) = ctx.find_mut(top.as_str()) else {
            log::warn!("top function `{top}' does not exist");
            return Ok(Action::Continue);
        };
        let calls_static = func.inst_iter().all(|i| match &func.inst(i).op {
            Opcode::Call { callee } => statics.contains(callee),
            _ => true,
        });
        if calls_static && LoopNest::new(func).is_empty() && !func.is_static()
        {
            log::info!("`{top}' only calls static functions");
            func.mark_static("0");
        }
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::branchy_loop;
    use crate::passes::StaticLoopsMem;

    fn run(opts: &[&str]) -> ir::Context {
        let mut ctx = ir::Context::new(vec![branchy_loop()]);
        ctx.extra_opts = opts.iter().map(|o| o.to_string()).collect();
        StaticLoopsMem::do_pass_default(&mut ctx).unwrap();
        StaticLoopsCf::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    fn flag_of(ctx: &ir::Context) -> bool {
        let f = &ctx.functions[0];
        f.block_by_name("header")
            .and_then(|bb| f.blocks[bb].loop_md.as_ref())
            .is_some_and(|md| md.cdfg_check)
    }

    #[test]
    fn unbalanced_loop_stays_dynamic() {
        let ctx = run(&[]);
        assert_eq!(ctx.functions.len(), 1);
        assert!(!flag_of(&ctx));
    }

    #[test]
    fn generous_budget_extracts_the_loop() {
        let ctx = run(&["static-loops-cf:loss=0.7"]);
        assert_eq!(ctx.functions.len(), 2);
        assert!(ctx.functions[1].is_static());
        assert!(LoopNest::new(&ctx.functions[0]).is_empty());
    }

    #[test]
    fn top_is_promoted_when_all_callees_are_static() {
        let ctx = run(&["static-loops-cf:loss=1", "static-loops-cf:top=kernel"]);
        assert!(ctx.functions[0].is_static());

        let ctx = run(&["static-loops-cf:top=kernel"]);
        assert!(!ctx.functions[0].is_static());
    }
}
