use super::{extract_static_loops, skip};
use crate::analysis::{
    InductionVariable, has_at_most_stride_one_memory, is_dependence_safe,
    outermost_perfect_loop,
};
use crate::traversal::{Action, Named, VisResult, Visitor};
use dass_ir::{self as ir, BlockIdx, LoopNest};
use itertools::Itertools;

/// Makes innermost loops with simple memory access patterns static.
///
/// A loop qualifies when it has no calls, a constant-bounded induction
/// variable, and every address index has a stride of at most one with
/// respect to that variable. A single-block loop is widened to the
/// outermost perfect nest around it and extracted. A loop with internal
/// control flow is only flagged for the throughput check of
/// `static-loops-cf`, and only if no two iterations can touch the same
/// element of an array it writes.
#[derive(Default)]
pub struct StaticLoopsMem;

impl Named for StaticLoopsMem {
    fn name() -> &'static str {
        "static-loops-mem"
    }

    fn description() -> &'static str {
        "extract unit-strided innermost loops into static functions"
    }
}

impl Visitor for StaticLoopsMem {
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
        let mut extract: Vec<BlockIdx> = vec![];
        let mut flagged: Vec<BlockIdx> = vec![];
        for l in nest.innermost() {
            let lp = nest.get(l);
            let has_call = lp.blocks.iter().any(|bb| {
                func.block(*bb).insts.iter().any(|i| func.inst(*i).is_call())
            });
            if has_call {
                continue;
            }
            let Some(iv) = InductionVariable::find(func, &nest, l) else {
                log::debug!(
                    "`{}': loop at `{}' has no constant bounds",
                    func.name,
                    func.block(lp.header).name
                );
                continue;
            };
            if !has_at_most_stride_one_memory(func, &nest, l, &iv) {
                continue;
            }
            if lp.blocks.len() == 1 {
                let top = outermost_perfect_loop(func, &nest, l);
                extract.push(nest.get(top).header);
            } else if is_dependence_safe(func, &nest, l) {
                flagged.push(lp.header);
            }
        }

        for header in &flagged {
            log::info!(
                "`{}': loop at `{}' needs a throughput check",
                func.name,
                func.block(*header).name
            );
            func.blocks[*header]
                .loop_md
                .get_or_insert_with(Default::default)
                .cdfg_check = true;
        }
        let extract = extract.into_iter().unique().collect_vec();
        extract_static_loops(func, &extract, outlined);
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{branchy_loop, row_update, shifted_update};

    #[test]
    fn perfect_nest_is_extracted_whole() {
        let mut ctx = ir::Context::new(vec![row_update()]);
        StaticLoopsMem::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 2);
        let caller = &ctx.functions[0];
        assert!(LoopNest::new(caller).is_empty());
        assert!(caller.has_calls());
        let ss = &ctx.functions[1];
        assert!(ss.is_static());
        assert_eq!(ss.attributes[ir::DASS_SS], "0");
        let nest = LoopNest::new(ss);
        assert_eq!(nest.len(), 2);
        assert!(nest.by_name("L1").is_some());
    }

    #[test]
    fn computed_rows_are_not_unit_strided() {
        let mut ctx = ir::Context::new(vec![shifted_update(0)]);
        StaticLoopsMem::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 1);
    }

    #[test]
    fn control_flow_is_left_for_the_throughput_check() {
        let mut ctx = ir::Context::new(vec![branchy_loop()]);
        StaticLoopsMem::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 1);
        let f = &ctx.functions[0];
        let header = f.block_by_name("header").unwrap();
        let md = f.blocks[header].loop_md.as_ref().unwrap();
        assert!(md.cdfg_check);
    }

    #[test]
    fn main_is_skipped() {
        let mut f = row_update();
        f.name = "main".into();
        let mut ctx = ir::Context::new(vec![f]);
        StaticLoopsMem::do_pass_default(&mut ctx).unwrap();
        assert_eq!(ctx.functions.len(), 1);
    }
}
