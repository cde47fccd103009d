//! Outlining of code into new functions.
//!
//! Both routines follow the same protocol: values flowing into the outlined
//! code become leading parameters, and every value flowing out is written
//! through a pointer parameter that the caller allocates on its stack and
//! reloads after the call. The caller is only modified once the new function
//! has been built successfully, so a failed extraction leaves it untouched.
use crate::{
    Argument, BinOp, BlockIdx, Builder, CastOp, Function, InstIdx,
    Instruction, LoopIdx, LoopNest, Opcode, Type, Value,
};
use dass_utils::{DassResult, Error, Id, NameGenerator};
use itertools::Itertools;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Straight-line instructions of one block that should become a function.
#[derive(Debug, Clone, Default)]
pub struct Island {
    pub insts: Vec<InstIdx>,
    /// Values the island reads. Completed with every operand defined
    /// outside the island.
    pub inputs: Vec<Value>,
    /// Island values read afterwards. Completed with every instruction
    /// that has a user outside the island.
    pub outputs: Vec<InstIdx>,
}

/// Operations that may be moved into a statically scheduled function.
pub fn is_outlinable(op: &Opcode) -> bool {
    match op {
        Opcode::Binary { op, .. } => matches!(
            op,
            BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::SRem
                | BinOp::URem
                | BinOp::Shl
                | BinOp::SDiv
                | BinOp::LShr
                | BinOp::AShr
                | BinOp::And
                | BinOp::Or
                | BinOp::Xor
                | BinOp::FMul
                | BinOp::FAdd
                | BinOp::FSub
                | BinOp::FDiv
        ),
        Opcode::Cast(c) => matches!(c, CastOp::ZExt | CastOp::SExt),
        Opcode::ICmp(_)
        | Opcode::FCmp(_)
        | Opcode::Gep
        | Opcode::Store
        | Opcode::Load
        | Opcode::Select => true,
        _ => false,
    }
}

fn push_unique<T: PartialEq>(vec: &mut Vec<T>, v: T) {
    if !vec.contains(&v) {
        vec.push(v);
    }
}

fn void_inst(op: Opcode, operands: SmallVec<[Value; 3]>) -> Instruction {
    Instruction {
        name: Id::default(),
        op,
        operands,
        ty: Type::Void,
        block: BlockIdx::from(0u32),
    }
}

/// Parameters of an outlined function: inputs first, then one pointer per
/// output.
fn signature(
    func: &Function,
    inputs: &[Value],
    outputs: &[InstIdx],
    in_name: impl Fn(usize, &Value) -> Id,
    out_name: impl Fn(usize, InstIdx) -> Id,
) -> Vec<Argument> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, v)| Argument {
            name: in_name(i, v),
            ty: func.value_type(v),
        })
        .chain(outputs.iter().enumerate().map(|(k, o)| Argument {
            name: out_name(k, *o),
            ty: func.inst(*o).ty.ptr_to(),
        }))
        .collect()
}

/// Allocate one stack slot per output at the top of the entry block.
fn allocate_slots(
    func: &mut Function,
    outputs: &[InstIdx],
) -> DassResult<Vec<InstIdx>> {
    let entry = func.entry().ok_or_else(|| {
        Error::illegal_extraction(format!("function `{}' is empty", func.name))
    })?;
    let outs: Vec<(Id, Type)> = outputs
        .iter()
        .map(|o| (func.inst(*o).name, func.inst(*o).ty))
        .collect();
    let mut b = Builder::new(func);
    b.set_insert_before(entry, 0);
    Ok(outs
        .into_iter()
        .map(|(name, ty)| {
            b.build(
                Opcode::Alloca,
                SmallVec::new(),
                ty.ptr_to(),
                &format!("{name}.loc"),
            )
        })
        .collect())
}

/// Emit the call followed by one reload per output at the builder's current
/// insertion point.
fn emit_call(
    b: &mut Builder<'_>,
    callee: Id,
    inputs: &[Value],
    slots: &[InstIdx],
    outputs: &[InstIdx],
) -> Vec<InstIdx> {
    let args: Vec<Value> = inputs
        .iter()
        .copied()
        .chain(slots.iter().map(|s| Value::Inst(*s)))
        .collect();
    b.call(callee, &args, Type::Void);
    slots
        .iter()
        .zip(outputs)
        .map(|(slot, o)| {
            let (name, ty) = (b.func.inst(*o).name, b.func.inst(*o).ty);
            b.build(
                Opcode::Load,
                smallvec::smallvec![Value::Inst(*slot)],
                ty,
                &format!("{name}.reload"),
            )
        })
        .collect()
}

/// Move `island` out of `func` into a new function called `name`.
///
/// The instructions are re-emitted in a single block in dependence order,
/// each output being stored right after its definition. The caller gets the
/// call at the first point where all inputs are available and no longer
/// contains the island.
pub fn extract_island(
    func: &mut Function,
    island: &Island,
    name: Id,
) -> DassResult<Function> {
    let Some(&first) = island.insts.first() else {
        return Err(Error::illegal_extraction("the island is empty"));
    };
    let bb = func.inst(first).block;
    for i in &island.insts {
        let inst = func.inst(*i);
        if inst.block != bb || !func.is_live(*i) {
            return Err(Error::illegal_extraction(format!(
                "island of `{}' is not contained in a single block",
                func.name
            )));
        }
        if !is_outlinable(&inst.op) {
            return Err(Error::unsupported(format!(
                "`{}' cannot be moved into a static function ({})",
                inst.name,
                inst.op.mnemonic()
            )));
        }
    }
    let mut insts = island.insts.clone();
    insts.sort_by_key(|i| func.position(*i));
    insts.dedup();
    let members: HashSet<InstIdx> = insts.iter().copied().collect();

    let mut inputs = vec![];
    for v in &island.inputs {
        if !v.as_inst().is_some_and(|d| members.contains(&d)) {
            push_unique(&mut inputs, *v);
        }
    }
    for i in &insts {
        for v in &func.inst(*i).operands {
            match v {
                Value::Arg(_) => push_unique(&mut inputs, *v),
                Value::Inst(d) if !members.contains(d) => {
                    push_unique(&mut inputs, *v)
                }
                _ => {}
            }
        }
    }
    let mut outputs = vec![];
    for o in &island.outputs {
        if members.contains(o) && func.inst(*o).has_result() {
            push_unique(&mut outputs, *o);
        }
    }
    for i in &insts {
        let escapes = func
            .users(Value::Inst(*i))
            .into_iter()
            .any(|u| !members.contains(&u));
        if escapes {
            push_unique(&mut outputs, *i);
        }
    }

    // The call replaces the first island instruction unless an input is
    // defined later in the same block.
    let mut at = func.position(insts[0]).unwrap_or_default();
    for v in &inputs {
        if let Some(d) = v.as_inst() {
            if func.inst(d).block == bb {
                at = at.max(func.position(d).map_or(0, |p| p + 1));
            }
        }
    }
    for o in &outputs {
        let early = func.users(Value::Inst(*o)).into_iter().find(|u| {
            !members.contains(u)
                && func.inst(*u).block == bb
                && !func.inst(*u).is_phi()
                && func.position(*u).is_some_and(|p| p < at)
        });
        if let Some(u) = early {
            return Err(Error::illegal_extraction(format!(
                "`{}' uses island value `{}' before the island can run",
                func.inst(u).name,
                func.inst(*o).name
            )));
        }
    }

    let args = signature(
        func,
        &inputs,
        &outputs,
        |i, _| format!("arg_in{i}").into(),
        |k, _| format!("arg_out{k}").into(),
    );
    let mut outlined = Function::new(name, args);
    let entry = outlined.add_block("entry");
    let mut mirrored: HashMap<InstIdx, InstIdx> = HashMap::new();
    let mut pending = insts.clone();
    while !pending.is_empty() {
        let ready = |v: &Value| match v {
            Value::Const(_) | Value::Undef(_) => true,
            Value::Inst(d) => {
                mirrored.contains_key(d) || inputs.contains(v)
            }
            Value::Arg(_) => inputs.contains(v),
        };
        let Some(pos) = pending
            .iter()
            .position(|i| func.inst(*i).operands.iter().all(|v| ready(v)))
        else {
            return Err(Error::illegal_extraction(format!(
                "no schedule exists for the island of `{}'",
                func.name
            )));
        };
        let old = pending.remove(pos);
        let src = func.inst(old);
        let operands = src
            .operands
            .iter()
            .map(|v| match inputs.iter().position(|x| x == v) {
                Some(n) => Value::Arg(n as u32),
                None => match v {
                    Value::Inst(d) => Value::Inst(mirrored[d]),
                    _ => *v,
                },
            })
            .collect();
        let copy = outlined.push_inst(
            entry,
            Instruction {
                name: src.name,
                op: src.op.clone(),
                operands,
                ty: src.ty,
                block: entry,
            },
        );
        mirrored.insert(old, copy);
        if let Some(k) = outputs.iter().position(|o| *o == old) {
            let ptr = Value::Arg((inputs.len() + k) as u32);
            outlined.push_inst(
                entry,
                void_inst(
                    Opcode::Store,
                    smallvec::smallvec![Value::Inst(copy), ptr],
                ),
            );
        }
    }
    outlined.push_inst(entry, void_inst(Opcode::Ret, SmallVec::new()));

    let slots = allocate_slots(func, &outputs)?;
    let shift = if func.entry() == Some(bb) { slots.len() } else { 0 };
    let reloads = {
        let mut b = Builder::new(func);
        b.set_insert_before(bb, at + shift);
        emit_call(&mut b, name, &inputs, &slots, &outputs)
    };
    for (o, ld) in outputs.iter().zip(reloads) {
        func.replace_all_uses(Value::Inst(*o), Value::Inst(ld));
    }
    for i in &insts {
        func.erase_inst(*i);
    }
    log::debug!(
        "extracted {} instructions of `{}' into `{name}' ({} inputs, {} outputs)",
        insts.len(),
        func.name,
        inputs.len(),
        outputs.len()
    );
    Ok(outlined)
}

/// Move the loop `l` out of `func` into a new function called `name`.
///
/// The new function starts in `newFuncRoot`, which jumps to the loop
/// header, and leaves through `exitStub`, which stores the outputs. In the
/// caller the loop is replaced by a `codeRepl` block that performs the call
/// and continues at the loop's exit block.
pub fn extract_loop(
    func: &mut Function,
    nest: &LoopNest,
    l: LoopIdx,
    name: Id,
) -> DassResult<Function> {
    let lp = nest.get(l);
    let header = lp.header;
    let display = lp
        .name
        .map(|n| n.to_string())
        .unwrap_or_else(|| func.block(header).name.to_string());
    let illegal = |msg: &str| {
        Err(Error::illegal_extraction(format!("loop `{display}': {msg}")))
    };
    if func.entry() == Some(header) {
        return illegal("the header is the function entry");
    }
    let Some(preheader) = nest.preheader(l) else {
        return illegal("the loop has no preheader");
    };
    let exits: Vec<BlockIdx> =
        nest.exit_blocks(l).into_iter().unique().collect();
    let &[exit] = exits.as_slice() else {
        return illegal("the loop must leave to exactly one block");
    };
    for phi in func.phis(exit) {
        let from_loop = func
            .inst(phi)
            .incoming()
            .filter(|(bb, _)| lp.contains(*bb))
            .count();
        if from_loop > 1 {
            return illegal("the exit block merges values from several exits");
        }
    }

    let region_insts: Vec<InstIdx> = lp
        .blocks
        .iter()
        .flat_map(|bb| func.block(*bb).insts.iter().copied())
        .collect();
    let mut inputs = vec![];
    for i in &region_insts {
        for v in &func.inst(*i).operands {
            match v {
                Value::Arg(_) => push_unique(&mut inputs, *v),
                Value::Inst(d) if !lp.contains(func.inst(*d).block) => {
                    push_unique(&mut inputs, *v)
                }
                _ => {}
            }
        }
    }
    let outputs: Vec<InstIdx> = region_insts
        .iter()
        .copied()
        .filter(|i| {
            func.users(Value::Inst(*i))
                .into_iter()
                .any(|u| !lp.contains(func.inst(u).block))
        })
        .collect();

    let args = signature(
        func,
        &inputs,
        &outputs,
        |_, v| match v {
            Value::Arg(n) => func.args[*n as usize].name,
            Value::Inst(d) => func.inst(*d).name,
            _ => Id::default(),
        },
        |_, o| format!("{}.out", func.inst(o).name).into(),
    );
    let mut outlined = Function::new(name, args);
    let mut names = NameGenerator::with_prev_defined_names(
        lp.blocks.iter().map(|bb| func.block(*bb).name).collect(),
    );
    let root = outlined.add_block(names.gen_name("newFuncRoot"));
    let mut block_map: HashMap<BlockIdx, BlockIdx> = HashMap::new();
    for bb in &lp.blocks {
        let copy = outlined.add_block(func.block(*bb).name);
        outlined.blocks[copy].loop_md = func.block(*bb).loop_md.clone();
        block_map.insert(*bb, copy);
    }
    let stub = outlined.add_block(names.gen_name("exitStub"));
    block_map.insert(preheader, root);
    block_map.insert(exit, stub);

    let mut inst_map: HashMap<InstIdx, InstIdx> = HashMap::new();
    for i in &region_insts {
        let src = func.inst(*i);
        let copy = outlined.push_inst(block_map[&src.block], src.clone());
        inst_map.insert(*i, copy);
    }
    for copy in inst_map.values() {
        let inst = outlined.inst_mut(*copy);
        inst.op
            .map_blocks(|bb| block_map.get(&bb).copied().unwrap_or(bb));
        for v in inst.operands.iter_mut() {
            if let Some(n) = inputs.iter().position(|x| x == v) {
                *v = Value::Arg(n as u32);
            } else if let Some(d) = v.as_inst() {
                if let Some(c) = inst_map.get(&d) {
                    *v = Value::Inst(*c);
                }
            }
        }
    }
    outlined.push_inst(
        root,
        void_inst(
            Opcode::Br {
                target: block_map[&header],
            },
            SmallVec::new(),
        ),
    );
    for (k, o) in outputs.iter().enumerate() {
        let ptr = Value::Arg((inputs.len() + k) as u32);
        outlined.push_inst(
            stub,
            void_inst(
                Opcode::Store,
                smallvec::smallvec![Value::Inst(inst_map[o]), ptr],
            ),
        );
    }
    outlined.push_inst(stub, void_inst(Opcode::Ret, SmallVec::new()));

    let slots = allocate_slots(func, &outputs)?;
    let (repl, reloads) = {
        let mut b = Builder::new(func);
        let repl = b.add_block("codeRepl");
        b.set_insert_point(repl);
        let reloads = emit_call(&mut b, name, &inputs, &slots, &outputs);
        b.br(exit);
        (repl, reloads)
    };
    func.layout.retain(|bb| *bb != repl);
    let at = func
        .layout
        .iter()
        .position(|bb| *bb == header)
        .unwrap_or(func.layout.len());
    func.layout.insert(at, repl);
    if let Some(t) = func.terminator(preheader) {
        func.inst_mut(t).op.retarget(header, repl);
    }
    for phi in func.phis(exit).collect::<Vec<_>>() {
        func.inst_mut(phi)
            .op
            .map_blocks(|bb| if lp.contains(bb) { repl } else { bb });
    }
    func.remove_blocks(&lp.blocks);
    for (o, ld) in outputs.iter().zip(reloads) {
        func.replace_all_uses(Value::Inst(*o), Value::Inst(ld));
    }
    log::debug!(
        "extracted loop `{display}' of `{}' into `{name}' ({} blocks)",
        func.name,
        lp.blocks.len()
    );
    Ok(outlined)
}
