//! Constant-bounded induction variables and the memory access patterns that
//! a statically scheduled loop may have.
use dass_ir::{
    self as ir, BinOp, BlockIdx, CastOp, ICmpPred, InstIdx, LoopIdx,
    LoopNest, Opcode, Value,
};
use std::collections::HashMap;

/// The latch comparison of a loop: the `icmp` that decides the conditional
/// branch ending `latch`.
pub fn latch_cmp(func: &ir::Function, latch: BlockIdx) -> Option<InstIdx> {
    let term = func.inst(func.terminator(latch)?);
    if !matches!(term.op, Opcode::CondBr { .. }) {
        return None;
    }
    let cmp = term.operands.first()?.as_inst()?;
    matches!(func.inst(cmp).op, Opcode::ICmp(_)).then_some(cmp)
}

/// A header phi that starts at a constant, moves by a constant step every
/// iteration and is compared against a constant at the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionVariable {
    pub phi: InstIdx,
    /// The value of the phi coming from the latch.
    pub step_inst: InstIdx,
    /// The latch comparison.
    pub cmp: InstIdx,
    pub start: i64,
    /// Negative for variables counting down.
    pub step: i64,
    /// The constant side of the latch comparison.
    pub end: i64,
    /// The relation `tested <pred> end` under which the loop runs another
    /// iteration, whichever way the latch branch is written.
    pub pred: ICmpPred,
    /// The latch compares the phi itself rather than its stepped value.
    pub tests_phi: bool,
    /// The last value of the compared side that still continues the loop.
    pub last: i64,
    pub width: u32,
}

impl InductionVariable {
    /// Finds the constant-bounded induction variable of `l`, if any.
    pub fn find(
        func: &ir::Function,
        nest: &LoopNest,
        l: LoopIdx,
    ) -> Option<Self> {
        let latch = nest.latch(l)?;
        let cmp = latch_cmp(func, latch)?;
        let cmp_inst = func.inst(cmp);
        let Opcode::ICmp(pred) = cmp_inst.op else {
            return None;
        };
        let &[lhs, rhs] = cmp_inst.operands.as_slice() else {
            return None;
        };
        let (end, tested, pred) = match (lhs.as_const_int(), rhs.as_const_int())
        {
            (_, Some(c)) => (c, lhs, pred),
            (Some(c), None) => (c, rhs, pred.swapped()),
            (None, None) => return None,
        };
        let Opcode::CondBr { then_bb, else_bb } =
            func.inst(func.terminator(latch)?).op
        else {
            return None;
        };
        let pred = match (nest.contains(l, then_bb), nest.contains(l, else_bb)) {
            (true, false) => pred,
            (false, true) => pred.inverse(),
            _ => return None,
        };

        func.phis(nest.get(l).header).find_map(|phi| {
            let inst = func.inst(phi);
            let width = inst.ty.int_width()?;
            if inst.operands.len() != 2 {
                return None;
            }
            let start = inst
                .incoming()
                .find(|(bb, _)| !nest.contains(l, *bb))?
                .1
                .as_const_int()?;
            let step_inst = inst.incoming_for(latch)?.as_inst()?;
            let step = Self::step_of(func, phi, step_inst)?;
            let tests_phi = tested == Value::Inst(phi);
            if step == 0 || !(tests_phi || tested == Value::Inst(step_inst)) {
                return None;
            }
            let first = if tests_phi { start } else { start.checked_add(step)? };
            let last = Self::last_continuing(pred, first, step, end)?;
            Some(InductionVariable {
                phi,
                step_inst,
                cmp,
                start,
                step,
                end,
                pred,
                tests_phi,
                last,
                width,
            })
        })
    }

    /// The last value of a compared side that starts at `first` and moves
    /// by `step` while `value <pred> end` holds. `None` for relations that
    /// never stop the loop without wrapping around.
    fn last_continuing(
        pred: ICmpPred,
        first: i64,
        step: i64,
        end: i64,
    ) -> Option<i64> {
        use ICmpPred::*;
        match pred {
            Slt | Ult if step > 0 => end.checked_sub(1),
            Sle | Ule if step > 0 => Some(end),
            Sgt | Ugt if step < 0 => end.checked_add(1),
            Sge | Uge if step < 0 => Some(end),
            Ne => {
                // The compared side has to land on `end` exactly.
                let dist = end.checked_sub(first)?;
                let trips = dist.checked_div(step)?;
                (dist.checked_rem(step)? == 0 && trips > 0)
                    .then(|| end.checked_sub(step))
                    .flatten()
            }
            _ => None,
        }
    }

    /// `phi + c`, `c + phi` or `phi - c`.
    fn step_of(
        func: &ir::Function,
        phi: InstIdx,
        step_inst: InstIdx,
    ) -> Option<i64> {
        let inst = func.inst(step_inst);
        let ops = &inst.operands;
        let phi = Value::Inst(phi);
        match inst.bin_op()? {
            BinOp::Add if ops[0] == phi => ops[1].as_const_int(),
            BinOp::Add if ops[1] == phi => ops[0].as_const_int(),
            BinOp::Sub if ops[0] == phi => ops[1].as_const_int().map(|c| -c),
            _ => None,
        }
    }
}

/// A stride of zero or one with respect to `ivar`: a constant, the variable
/// itself, an extension of either, or the variable offset by a constant.
pub fn is_at_most_stride_one(
    func: &ir::Function,
    expr: Value,
    ivar: Value,
) -> bool {
    if expr.as_const_int().is_some() || expr == ivar {
        return true;
    }
    let Some(idx) = expr.as_inst() else {
        return false;
    };
    let inst = func.inst(idx);
    match &inst.op {
        Opcode::Cast(CastOp::ZExt | CastOp::SExt) => {
            is_at_most_stride_one(func, inst.operands[0], ivar)
        }
        Opcode::Binary {
            op: BinOp::Add | BinOp::Sub,
            ..
        } => {
            let (a, b) = (inst.operands[0], inst.operands[1]);
            (a == ivar && b.as_const_int().is_some())
                || (b == ivar && a.as_const_int().is_some())
        }
        _ => false,
    }
}

/// Every load and store of `l` goes through an address computation whose
/// indices have a stride of at most one.
pub fn has_at_most_stride_one_memory(
    func: &ir::Function,
    nest: &LoopNest,
    l: LoopIdx,
    ivar: &InductionVariable,
) -> bool {
    let iv = Value::Inst(ivar.phi);
    memory_accesses(func, nest, l).all(|access| {
        let ok = gep_of(func, access).is_some_and(|gep| {
            func.inst(gep).operands[1..]
                .iter()
                .all(|idx| is_at_most_stride_one(func, *idx, iv))
        });
        if !ok {
            log::debug!(
                "`{}': access `{}' is not unit strided",
                func.name,
                ir::Printer::format_instruction(func, access)
            );
        }
        ok
    })
}

/// Each array written by `l` is only accessed at one index expression, so
/// that no two iterations touch the same element of a written array.
pub fn is_dependence_safe(
    func: &ir::Function,
    nest: &LoopNest,
    l: LoopIdx,
) -> bool {
    let mut index_of: HashMap<Value, Vec<Value>> = HashMap::new();
    let mut written = vec![];
    for access in memory_accesses(func, nest, l) {
        let Some(gep) = gep_of(func, access) else {
            return false;
        };
        let ops = &func.inst(gep).operands;
        let base = ops[0];
        index_of.entry(base).or_default().extend(&ops[1..]);
        if matches!(func.inst(access).op, Opcode::Store) {
            written.push(base);
        }
    }
    written.iter().all(|base| {
        let indices = &index_of[base];
        indices.iter().all(|i| *i == indices[0])
    })
}

fn memory_accesses<'a>(
    func: &'a ir::Function,
    nest: &'a LoopNest,
    l: LoopIdx,
) -> impl Iterator<Item = InstIdx> + 'a {
    nest.get(l)
        .blocks
        .iter()
        .flat_map(move |bb| func.block(*bb).insts.iter().copied())
        .filter(move |i| matches!(func.inst(*i).op, Opcode::Load | Opcode::Store))
}

fn gep_of(func: &ir::Function, access: InstIdx) -> Option<InstIdx> {
    let gep = func.inst(access).pointer_operand()?.as_inst()?;
    matches!(func.inst(gep).op, Opcode::Gep).then_some(gep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Argument, Builder, Type};

    /// `for (i = 0; i != 16; i += 1) a[i + k] = a[i] + 1` in rotated form.
    fn shifted_copy(k: Value) -> ir::Function {
        let mut f = ir::Function::new(
            "f",
            vec![Argument {
                name: "a".into(),
                ty: Type::Int(32).ptr_to(),
            }],
        );
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        let body = b.add_block("body");
        let exit = b.add_block("exit");
        b.set_insert_point(entry);
        b.br(body);
        b.set_insert_point(body);
        let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
        let src = b.gep(Value::Arg(0), i.into());
        let v = b.load(src.into());
        let v1 = b.add(v.into(), Value::int(32, 1));
        let idx = b.add(i.into(), k);
        let dst = b.gep(Value::Arg(0), idx.into());
        b.store(v1.into(), dst.into());
        let i1 = b.add(i.into(), Value::int(32, 1));
        b.add_incoming(i, body, i1.into());
        let c = b.icmp(ICmpPred::Ne, i1.into(), Value::int(32, 16));
        b.cond_br(c.into(), body, exit);
        b.set_insert_point(exit);
        b.ret(None);
        f
    }

    #[test]
    fn finds_counting_variable() {
        let f = shifted_copy(Value::int(32, 1));
        let nest = LoopNest::new(&f);
        let l = nest.innermost()[0];
        let iv = InductionVariable::find(&f, &nest, l).unwrap();
        assert_eq!(f.inst(iv.phi).name, "phi");
        assert_eq!((iv.start, iv.step, iv.end), (0, 1, 16));
        assert_eq!(iv.pred, ICmpPred::Ne);
        assert!(!iv.tests_phi);
        assert_eq!(iv.last, 15);
        assert!(has_at_most_stride_one_memory(&f, &nest, l, &iv));
        // a[i + 1] is written while a[i] is read.
        assert!(!is_dependence_safe(&f, &nest, l));
    }

    #[test]
    fn dynamic_offset_is_not_unit_strided() {
        let mut f = shifted_copy(Value::int(32, 0));
        f.args.push(Argument {
            name: "k".into(),
            ty: Type::Int(32),
        });
        let idx = f.inst_by_name("add0").unwrap();
        f.inst_mut(idx).operands[1] = Value::Arg(1);
        let nest = LoopNest::new(&f);
        let l = nest.innermost()[0];
        let iv = InductionVariable::find(&f, &nest, l).unwrap();
        assert!(!has_at_most_stride_one_memory(&f, &nest, l, &iv));
    }

    #[test]
    fn dynamic_bound_has_no_induction_variable() {
        let mut f = shifted_copy(Value::int(32, 1));
        f.args.push(Argument {
            name: "n".into(),
            ty: Type::Int(32),
        });
        let cmp = f.inst_by_name("cmp").unwrap();
        f.inst_mut(cmp).operands[1] = Value::Arg(1);
        let nest = LoopNest::new(&f);
        assert!(InductionVariable::find(&f, &nest, nest.innermost()[0]).is_none());
    }
}
