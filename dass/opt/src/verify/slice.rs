//! Reduce a function to the instructions that decide which memory
//! locations it touches.
use dass_ir::{self as ir, InstIdx, LoopNest, Opcode, Value};
use std::collections::HashSet;

/// Keep loop headers, memory accesses, terminators and everything they
/// depend on. Dependencies computed from floating-point operands are
/// dropped since they cannot produce addresses. Every other instruction is
/// replaced by `undef` and erased. Returns the number of erased
/// instructions.
pub fn slice_memory(func: &mut ir::Function) -> usize {
    if func.is_empty() {
        return 0;
    }
    let nest = LoopNest::new(func);
    let mut keep: Vec<InstIdx> = func
        .inst_iter()
        .filter(|i| {
            let inst = func.inst(*i);
            nest.is_header(inst.block)
                || matches!(inst.op, Opcode::Load | Opcode::Store)
                || inst.is_terminator()
        })
        .collect();
    let mut kept: HashSet<InstIdx> = keep.iter().copied().collect();

    let mut next = 0;
    while next < keep.len() {
        let inst = func.inst(keep[next]);
        next += 1;
        for (pos, op) in inst.operands.iter().enumerate() {
            // The stored value never influences an address.
            if matches!(inst.op, Opcode::Store) && pos == 0 {
                continue;
            }
            let Value::Inst(dep) = op else { continue };
            let fp = func
                .inst(*dep)
                .operands
                .iter()
                .any(|v| func.value_type(v).is_fp());
            if !fp && kept.insert(*dep) {
                keep.push(*dep);
            }
        }
    }

    let removed: Vec<InstIdx> =
        func.inst_iter().filter(|i| !kept.contains(i)).collect();
    for i in &removed {
        let ty = func.inst(*i).ty;
        func.replace_all_uses(Value::Inst(*i), Value::Undef(ty));
        func.erase_inst(*i);
    }
    log::debug!("{}: sliced away {} instructions", func.name, removed.len());
    removed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Argument, BinOp, Builder, ICmpPred, Type};

    /// for (i = 0; i < 8; i++) { t = x * 2.0; A[i + 1] = t; s += i }
    fn scaled_store() -> ir::Function {
        let args = vec![
            Argument {
                name: "A".into(),
                ty: Type::Double.ptr_to(),
            },
            Argument {
                name: "x".into(),
                ty: Type::Double,
            },
        ];
        let mut f = ir::Function::new("f", args);
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        let body = b.add_block("body");
        let latch = b.add_block("latch");
        let exit = b.add_block("exit");
        b.set_insert_point(entry);
        b.br(body);
        b.set_insert_point(body);
        let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
        let s = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
        b.br(latch);
        b.set_insert_point(latch);
        let t = b.binary(
            BinOp::FMul,
            Value::Arg(1),
            Value::Const(ir::Constant::double(2.0)),
        );
        let idx = b.add(i.into(), Value::int(32, 1));
        let addr = b.gep(Value::Arg(0), idx.into());
        b.store(t.into(), addr.into());
        let s1 = b.add(s.into(), i.into());
        let i1 = b.add(i.into(), Value::int(32, 1));
        b.add_incoming(i, latch, i1.into());
        b.add_incoming(s, latch, s1.into());
        let c = b.icmp(ICmpPred::Slt, i1.into(), Value::int(32, 8));
        b.cond_br(c.into(), body, exit);
        b.set_insert_point(exit);
        b.ret(None);
        f
    }

    #[test]
    fn keeps_address_computations() {
        let mut f = scaled_store();
        let removed = slice_memory(&mut f);
        let names: Vec<_> = f
            .inst_iter()
            .map(|i| f.inst(i).name.to_string())
            .filter(|n| !n.is_empty())
            .collect();
        // Only the stored product goes. The sum feeds a header phi.
        assert_eq!(removed, 1);
        assert!(f.inst_by_name("fmul").is_none());
        assert!(names.contains(&"arrayidx".to_string()));
        assert!(names.contains(&"add".to_string()));
        assert!(names.contains(&"add0".to_string()));
        let store = f
            .inst_iter()
            .find(|i| matches!(f.inst(*i).op, Opcode::Store))
            .unwrap();
        assert_eq!(f.inst(store).operands[0], Value::Undef(Type::Double));
    }
}
