//! Perfectly nested loop pairs: nothing but loop bookkeeping runs between the
//! outer loop and the inner one, so the pair can be scheduled as one unit.
use super::induction::InductionVariable;
use dass_ir::{self as ir, BlockIdx, InstIdx, LoopIdx, LoopNest, Opcode};
use itertools::Itertools;
use std::collections::HashSet;

fn unique_successor(func: &ir::Function, bb: BlockIdx) -> Option<BlockIdx> {
    func.successors(bb).into_iter().unique().exactly_one().ok()
}

fn unique_predecessor(func: &ir::Function, bb: BlockIdx) -> Option<BlockIdx> {
    func.predecessors(bb).into_iter().exactly_one().ok()
}

/// A block holding nothing but its terminator.
fn is_empty_block(func: &ir::Function, bb: BlockIdx) -> bool {
    func.block(bb).insts.len() == 1
}

/// Follow the chain of empty blocks starting after `from`. Returns `end` if
/// the chain reaches it, otherwise the last block of the chain.
fn skip_empty_blocks_until(
    func: &ir::Function,
    from: BlockIdx,
    end: BlockIdx,
    check_unique_pred: bool,
) -> BlockIdx {
    if from == end {
        return from;
    }
    let Some(mut bb) = unique_successor(func, from) else {
        return from;
    };
    let mut last = from;
    let mut visited = HashSet::new();
    while bb != end
        && is_empty_block(func, bb)
        && visited.insert(bb)
        && (!check_unique_pred || unique_predecessor(func, bb).is_some())
    {
        last = bb;
        match unique_successor(func, bb) {
            Some(next) => bb = next,
            None => return last,
        }
    }
    if bb == end { end } else { last }
}

/// The block whose conditional branch skips the rotated loop `l` entirely:
/// one side enters the preheader, the other lands right after the loop.
pub fn loop_guard_block(
    func: &ir::Function,
    nest: &LoopNest,
    l: LoopIdx,
) -> Option<BlockIdx> {
    if !nest.is_simplify_form(l) || !nest.is_rotated(l) {
        return None;
    }
    let preheader = nest.preheader(l)?;
    let exit = nest.unique_exit_block(l)?;
    let guard = unique_predecessor(func, preheader)?;
    let Opcode::CondBr { then_bb, else_bb } = func.inst(func.terminator(guard)?).op
    else {
        return None;
    };
    let other = if then_bb == preheader { else_bb } else { then_bb };
    (skip_empty_blocks_until(func, exit, other, true) == other).then_some(guard)
}

fn check_loops_structure(
    func: &ir::Function,
    nest: &LoopNest,
    outer: LoopIdx,
    inner: LoopIdx,
) -> bool {
    if nest.get(outer).children != [inner] || nest.get(inner).parent != Some(outer)
    {
        return false;
    }
    if !nest.is_simplify_form(outer) || !nest.is_simplify_form(inner) {
        return false;
    }
    if !nest.is_rotated(outer) || !nest.is_rotated(inner) {
        return false;
    }
    let (Some(outer_latch), Some(inner_preheader), Some(inner_exit)) = (
        nest.latch(outer),
        nest.preheader(inner),
        nest.exit_block(inner),
    ) else {
        return false;
    };
    let outer_header = nest.get(outer).header;

    let exit_has_lcssa_phi = func
        .phis(inner_exit)
        .any(|phi| func.inst(phi).operands.len() == 1);
    let is_extra_phi_block = |bb: BlockIdx| {
        let insts = &func.block(bb).insts;
        insts.len() == func.phis(bb).count() + 1
            && func.phis(bb).all(|phi| {
                func.inst(phi)
                    .incoming()
                    .all(|(from, _)| from == inner_exit || from == outer_header)
            })
    };

    let mut extra_phi_block = None;
    if outer_header != inner_preheader {
        let single =
            skip_empty_blocks_until(func, outer_header, inner_preheader, false);
        if single != inner_preheader {
            if loop_guard_block(func, nest, inner) != Some(single) {
                return false;
            }
            for succ in func.successors(single) {
                let (mut to_preheader, mut to_latch) = (succ, succ);
                if is_empty_block(func, succ) {
                    to_preheader =
                        skip_empty_blocks_until(func, succ, inner_preheader, false);
                    to_latch =
                        skip_empty_blocks_until(func, succ, outer_latch, false);
                }
                if to_preheader == inner_preheader || to_latch == outer_latch {
                    continue;
                }
                if exit_has_lcssa_phi
                    && is_extra_phi_block(succ)
                    && func.successors(succ).as_slice() == [outer_latch]
                {
                    extra_phi_block = Some(succ);
                    continue;
                }
                return false;
            }
        }
    }

    let reaches_extra_phi = extra_phi_block.is_some_and(|bb| {
        skip_empty_blocks_until(func, inner_exit, bb, false) == bb
    });
    reaches_extra_phi
        || skip_empty_blocks_until(func, inner_exit, outer_latch, false)
            == outer_latch
}

/// `outer` has a constant-bounded induction variable, `inner` is its only
/// child, and the code around `inner` is limited to loop control.
pub fn are_perfectly_nested(
    func: &ir::Function,
    nest: &LoopNest,
    outer: LoopIdx,
    inner: LoopIdx,
) -> bool {
    let Some(iv) = InductionVariable::find(func, nest, outer) else {
        return false;
    };
    if !check_loops_structure(func, nest, outer, inner) {
        return false;
    }
    let guard_cmp: Option<InstIdx> = loop_guard_block(func, nest, inner)
        .and_then(|g| func.terminator(g))
        .and_then(|t| func.inst(t).operands.first()?.as_inst())
        .filter(|c| func.inst(*c).is_cmp());

    let only_safe = |bb: BlockIdx| {
        func.block(bb).insts.iter().all(|i| {
            let inst = func.inst(*i);
            let allowed = inst.op.is_speculatable(&inst.operands)
                || inst.is_phi()
                || matches!(inst.op, Opcode::Br { .. } | Opcode::CondBr { .. });
            if !allowed {
                return false;
            }
            let stray_binary = inst.bin_op().is_some() && *i != iv.step_inst;
            let stray_cmp =
                inst.is_cmp() && *i != iv.cmp && Some(*i) != guard_cmp;
            !stray_binary && !stray_cmp
        })
    };

    let outer_header = nest.get(outer).header;
    let (Some(outer_latch), Some(inner_preheader), Some(inner_exit)) = (
        nest.latch(outer),
        nest.preheader(inner),
        nest.exit_block(inner),
    ) else {
        return false;
    };
    only_safe(outer_header)
        && only_safe(outer_latch)
        && (inner_preheader == outer_header || only_safe(inner_preheader))
        && only_safe(inner_exit)
}

/// Climb from `l` towards the root while each parent forms a perfect nest
/// with the loop below it.
pub fn outermost_perfect_loop(
    func: &ir::Function,
    nest: &LoopNest,
    mut l: LoopIdx,
) -> LoopIdx {
    while let Some(parent) = nest.get(l).parent {
        if !are_perfectly_nested(func, nest, parent, l) {
            break;
        }
        log::debug!(
            "`{}': loop at `{}' is perfectly nested in `{}'",
            func.name,
            func.block(nest.get(l).header).name,
            func.block(nest.get(parent).header).name
        );
        l = parent;
    }
    l
}
