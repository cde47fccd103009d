//! Functions, basic blocks and the mutation interface used by the passes.
use crate::{
    BlockFreq, BlockIdx, InstIdx, Instruction, LoopMetadata, Opcode, Schedule,
    Type, Value,
};
use dass_idx::{maps::IndexedMap, IndexRef};
use dass_utils::{DassResult, Error, GetName, Id, NameGenerator};
use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Function attribute marking statically scheduled functions. Outlined
/// islands carry `-1`, which asks the scheduler for a fully pipelined
/// circuit. Loops and promoted top functions carry `0`, which lets the
/// scheduler pick the initiation interval.
pub const DASS_SS: &str = "dass_ss";

/// Ordered string attributes of a function.
pub type Attributes = LinkedHashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: Id,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub name: Id,
    /// Instructions in program order. The terminator is last.
    #[serde(default)]
    pub insts: Vec<InstIdx>,
    /// Present on loop headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_md: Option<LoopMetadata>,
}

impl BasicBlock {
    pub fn new(name: Id) -> Self {
        BasicBlock {
            name,
            insts: Vec::new(),
            loop_md: None,
        }
    }
}

/// A function in SSA form. Blocks and instructions live in arenas; the
/// `layout` and the per-block instruction lists decide what is part of the
/// function. Erased entries stay in the arenas but are unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: Id,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default = "void")]
    pub ret_ty: Type,
    pub blocks: IndexedMap<BlockIdx, BasicBlock>,
    pub insts: IndexedMap<InstIdx, Instruction>,
    /// Block order; the first block is the entry.
    pub layout: Vec<BlockIdx>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Profiled execution counts of CFG edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<BlockFreq>,
    /// Static pipeline schedule, present for scheduled static functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

fn void() -> Type {
    Type::Void
}

impl GetName for Function {
    fn name(&self) -> Id {
        self.name
    }
}

impl Function {
    pub fn new<S: Into<Id>>(name: S, args: Vec<Argument>) -> Self {
        Function {
            name: name.into(),
            args,
            ret_ty: Type::Void,
            blocks: IndexedMap::new(),
            insts: IndexedMap::new(),
            layout: Vec::new(),
            attributes: Attributes::new(),
            profile: Vec::new(),
            schedule: None,
        }
    }

    /* ============ Queries ============ */

    pub fn entry(&self) -> Option<BlockIdx> {
        self.layout.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Functions marked as statically scheduled.
    pub fn is_static(&self) -> bool {
        self.attributes.contains_key(DASS_SS)
    }

    pub fn mark_static(&mut self, ii: &str) {
        self.attributes.insert(DASS_SS.to_string(), ii.to_string());
    }

    pub fn block(&self, bb: BlockIdx) -> &BasicBlock {
        &self.blocks[bb]
    }

    pub fn inst(&self, idx: InstIdx) -> &Instruction {
        &self.insts[idx]
    }

    pub fn inst_mut(&mut self, idx: InstIdx) -> &mut Instruction {
        &mut self.insts[idx]
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockIdx> {
        self.layout
            .iter()
            .copied()
            .find(|bb| self.blocks[*bb].name == name)
    }

    pub fn inst_by_name(&self, name: &str) -> Option<InstIdx> {
        self.inst_iter().find(|idx| self.insts[*idx].name == name)
    }

    pub fn arg_by_name(&self, name: &str) -> Option<Value> {
        self.args
            .iter()
            .position(|a| a.name == name)
            .map(|i| Value::Arg(i as u32))
    }

    /// Live instructions in layout order.
    pub fn inst_iter(&self) -> impl Iterator<Item = InstIdx> + '_ {
        self.layout
            .iter()
            .flat_map(move |bb| self.blocks[*bb].insts.iter().copied())
    }

    pub fn terminator(&self, bb: BlockIdx) -> Option<InstIdx> {
        self.blocks[bb]
            .insts
            .last()
            .copied()
            .filter(|i| self.insts[*i].is_terminator())
    }

    pub fn successors(&self, bb: BlockIdx) -> SmallVec<[BlockIdx; 2]> {
        self.terminator(bb)
            .map(|t| self.insts[t].op.successors())
            .unwrap_or_default()
    }

    /// Distinct predecessors of `bb` in layout order.
    pub fn predecessors(&self, bb: BlockIdx) -> Vec<BlockIdx> {
        self.layout
            .iter()
            .copied()
            .filter(|p| self.successors(*p).contains(&bb))
            .collect()
    }

    /// Phi instructions at the top of `bb`.
    pub fn phis(&self, bb: BlockIdx) -> impl Iterator<Item = InstIdx> + '_ {
        self.blocks[bb]
            .insts
            .iter()
            .copied()
            .take_while(move |i| self.insts[*i].is_phi())
    }

    /// Index of `idx` within its block.
    pub fn position(&self, idx: InstIdx) -> Option<usize> {
        let bb = self.insts[idx].block;
        self.blocks[bb].insts.iter().position(|i| *i == idx)
    }

    pub fn is_live(&self, idx: InstIdx) -> bool {
        self.insts.contains(idx) && self.position(idx).is_some()
    }

    pub fn value_type(&self, v: &Value) -> Type {
        match v {
            Value::Arg(n) => self.args[*n as usize].ty,
            Value::Inst(i) => self.insts[*i].ty,
            Value::Const(c) => c.ty(),
            Value::Undef(ty) => *ty,
        }
    }

    /// Printable name of an operand.
    pub fn value_name(&self, v: &Value) -> String {
        match v {
            Value::Arg(n) => format!("%{}", self.args[*n as usize].name),
            Value::Inst(i) => format!("%{}", self.insts[*i].name),
            Value::Const(c) => c.to_string(),
            Value::Undef(_) => "undef".to_string(),
        }
    }

    /// Live instructions that use `v` as an operand.
    pub fn users(&self, v: Value) -> Vec<InstIdx> {
        self.inst_iter()
            .filter(|i| self.insts[*i].operands.contains(&v))
            .collect()
    }

    pub fn has_calls(&self) -> bool {
        self.inst_iter().any(|i| self.insts[i].is_call())
    }

    /// Names already used by blocks, instructions and arguments.
    pub fn defined_names(&self) -> HashSet<Id> {
        self.args
            .iter()
            .map(|a| a.name)
            .chain(self.layout.iter().map(|bb| self.blocks[*bb].name))
            .chain(self.inst_iter().map(|i| self.insts[i].name))
            .filter(|n| !n.as_str().is_empty())
            .collect()
    }

    pub fn namegen(&self) -> NameGenerator {
        NameGenerator::with_prev_defined_names(self.defined_names())
    }

    /* ============ Mutation ============ */

    pub fn add_block<S: Into<Id>>(&mut self, name: S) -> BlockIdx {
        let bb = self.blocks.push(BasicBlock::new(name.into()));
        self.layout.push(bb);
        bb
    }

    /// Append an instruction to the end of `bb`.
    pub fn push_inst(
        &mut self,
        bb: BlockIdx,
        mut inst: Instruction,
    ) -> InstIdx {
        inst.block = bb;
        let idx = self.insts.push(inst);
        self.blocks[bb].insts.push(idx);
        idx
    }

    /// Insert an instruction at position `pos` of `bb`.
    pub fn insert_inst(
        &mut self,
        bb: BlockIdx,
        pos: usize,
        mut inst: Instruction,
    ) -> InstIdx {
        inst.block = bb;
        let idx = self.insts.push(inst);
        self.blocks[bb].insts.insert(pos, idx);
        idx
    }

    /// Unlink an instruction from its block. Its uses are left untouched.
    pub fn erase_inst(&mut self, idx: InstIdx) {
        let bb = self.insts[idx].block;
        self.blocks[bb].insts.retain(|i| *i != idx);
    }

    /// Rewrite every use of `old` into `new`.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        for bb in &self.layout {
            for i in &self.blocks[*bb].insts {
                for op in self.insts[*i].operands.iter_mut() {
                    if *op == old {
                        *op = new;
                    }
                }
            }
        }
    }

    /// Remove blocks from the layout.
    pub fn remove_blocks(&mut self, blocks: &[BlockIdx]) {
        self.layout.retain(|bb| !blocks.contains(bb));
    }

    /* ============ Well-formedness ============ */

    /// Check the structural invariants that the analyses rely on.
    pub fn validate(&self) -> DassResult<()> {
        let err = |msg: String| {
            Err(Error::malformed_ir(format!("function `{}': {msg}", self.name)))
        };
        for bb in &self.layout {
            if !self.blocks.contains(*bb) {
                return err(format!("unknown block {}", bb.index()));
            }
            if let Some(i) =
                self.blocks[*bb].insts.iter().find(|i| !self.insts.contains(**i))
            {
                return err(format!("unknown instruction {}", i.index()));
            }
        }
        let live: HashSet<InstIdx> = self.inst_iter().collect();
        let mut preds: HashMap<BlockIdx, HashSet<BlockIdx>> = HashMap::new();
        for bb in &self.layout {
            for succ in self.successors(*bb) {
                preds.entry(succ).or_default().insert(*bb);
            }
        }
        for bb in &self.layout {
            let block = &self.blocks[*bb];
            let Some(last) = block.insts.last() else {
                return err(format!("block `{}' is empty", block.name));
            };
            if !self.insts[*last].is_terminator() {
                return err(format!(
                    "block `{}' does not end with a terminator",
                    block.name
                ));
            }
            let mut seen_non_phi = false;
            for (pos, i) in block.insts.iter().enumerate() {
                let inst = &self.insts[*i];
                if inst.block != *bb {
                    return err(format!(
                        "`{}' is listed in block `{}' but records another block",
                        inst.name, block.name
                    ));
                }
                if inst.is_terminator() && pos + 1 != block.insts.len() {
                    return err(format!(
                        "terminator in the middle of block `{}'",
                        block.name
                    ));
                }
                if inst.is_phi() {
                    if seen_non_phi {
                        return err(format!(
                            "phi `{}' after a non-phi instruction",
                            inst.name
                        ));
                    }
                } else {
                    seen_non_phi = true;
                }
                if !inst.op.accepts_operands(inst.operands.len()) {
                    return err(format!(
                        "`{}' has {} operands",
                        inst.name,
                        inst.operands.len()
                    ));
                }
                if let Some(bad) = self.bad_operand(inst, &live) {
                    return err(format!(
                        "`{}' uses an undefined operand {bad}",
                        inst.name
                    ));
                }
                if let Some(target) = inst
                    .op
                    .successors()
                    .into_iter()
                    .find(|s| !self.layout.contains(s))
                {
                    return err(format!(
                        "branch in `{}' targets a block outside the function ({})",
                        block.name,
                        target.index()
                    ));
                }
                if let Opcode::Phi { blocks } = &inst.op {
                    if blocks.len() != inst.operands.len() {
                        return err(format!(
                            "phi `{}' has mismatched incoming lists",
                            inst.name
                        ));
                    }
                    if blocks.iter().any(|b| !self.layout.contains(b)) {
                        return err(format!(
                            "phi `{}' has an incoming block outside the function",
                            inst.name
                        ));
                    }
                    let incoming: HashSet<BlockIdx> =
                        blocks.iter().copied().collect();
                    let expected = preds.get(bb).cloned().unwrap_or_default();
                    if incoming != expected {
                        return err(format!(
                            "phi `{}' does not list the predecessors of `{}'",
                            inst.name, block.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn bad_operand(
        &self,
        inst: &Instruction,
        live: &HashSet<InstIdx>,
    ) -> Option<String> {
        inst.operands.iter().find_map(|op| match op {
            Value::Arg(n) if *n as usize >= self.args.len() => {
                Some(format!("argument #{n}"))
            }
            Value::Inst(i) if !live.contains(i) => {
                Some(format!("instruction #{}", i.index()))
            }
            _ => None,
        })
    }
}
