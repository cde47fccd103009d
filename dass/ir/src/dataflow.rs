//! Elastic dataflow graph of a function. Every value crossing a block
//! boundary is routed the way a handshake circuit would carry it: through a
//! data branch at the end of a conditional block and a data merge at the top
//! of every block it is live into. A parallel control network carries one
//! token per executed block.
use crate::{BlockIdx, Cfg, Constant, Function, InstIdx, NodeIdx, Opcode, Value};
use dass_idx::maps::IndexedMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Computation backed by an instruction.
    Inst,
    Constant,
    /// The conditional terminator of a block. Feeds its condition to the data
    /// and control branches of the block.
    Branch,
    /// Steers a value to the successor chosen by the block's branch.
    BranchData,
    BranchControl,
    /// A phi instruction.
    Phi,
    /// Merges the copies of a value that flow into a block from its
    /// predecessors.
    PhiData,
    PhiControl,
    Fork,
    ForkControl,
    /// Function return.
    Exit,
}

impl NodeKind {
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            NodeKind::Branch | NodeKind::BranchData | NodeKind::BranchControl
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(
            self,
            NodeKind::Phi | NodeKind::PhiData | NodeKind::PhiControl
        )
    }

    pub fn is_fork(&self) -> bool {
        matches!(self, NodeKind::Fork | NodeKind::ForkControl)
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            NodeKind::BranchControl | NodeKind::PhiControl | NodeKind::ForkControl
        )
    }
}

/// A vertex of the dataflow graph.
#[derive(Debug, Clone)]
pub struct ENode {
    pub kind: NodeKind,
    /// Backing instruction of `Inst`, `Phi`, `Branch` and `Exit` nodes.
    pub instr: Option<InstIdx>,
    /// Literal produced by a `Constant` node.
    pub constant: Option<Constant>,
    pub preds: Vec<NodeIdx>,
    pub succs: Vec<NodeIdx>,
    pub block: Option<BlockIdx>,
}

/// Execution count of the CFG edge `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockFreq {
    pub from: BlockIdx,
    pub to: BlockIdx,
    pub freq: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    nodes: IndexedMap<NodeIdx, ENode>,
    freqs: HashMap<(BlockIdx, BlockIdx), f64>,
}

impl DataflowGraph {
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        instr: Option<InstIdx>,
        block: Option<BlockIdx>,
    ) -> NodeIdx {
        self.nodes.push(ENode {
            kind,
            instr,
            constant: None,
            preds: vec![],
            succs: vec![],
            block,
        })
    }

    pub fn add_constant(&mut self, c: Constant, block: BlockIdx) -> NodeIdx {
        let n = self.add_node(NodeKind::Constant, None, Some(block));
        self.nodes[n].constant = Some(c);
        n
    }

    /// Add the edge `from -> to`. Parallel edges are kept.
    pub fn connect(&mut self, from: NodeIdx, to: NodeIdx) {
        self.nodes[from].succs.push(to);
        self.nodes[to].preds.push(from);
    }

    pub fn set_freq(&mut self, from: BlockIdx, to: BlockIdx, freq: f64) {
        self.freqs.insert((from, to), freq);
    }

    pub fn freq(&self, from: BlockIdx, to: BlockIdx) -> Option<f64> {
        self.freqs.get(&(from, to)).copied()
    }

    /// Sum of the frequencies of the edges leaving `from`.
    pub fn total_freq(&self, from: BlockIdx) -> f64 {
        self.freqs
            .iter()
            .filter(|((f, _), _)| *f == from)
            .map(|(_, freq)| *freq)
            .sum()
    }

    pub fn node(&self, n: NodeIdx) -> &ENode {
        &self.nodes[n]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &ENode)> {
        self.nodes.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeIdx> + use<> {
        self.nodes.keys()
    }

    /// The node that computes `inst`, if any.
    pub fn node_of(&self, inst: InstIdx) -> Option<NodeIdx> {
        self.nodes
            .iter()
            .find(|(_, n)| n.instr == Some(inst))
            .map(|(idx, _)| idx)
    }

    /// Insert a fork behind every node, other than a branch, that feeds more
    /// than one successor.
    pub fn insert_forks(&mut self) {
        for n in self.keys().collect_vec() {
            let node = &self.nodes[n];
            if node.kind.is_branch() || node.succs.len() <= 1 {
                continue;
            }
            let kind = if node.kind.is_control() {
                NodeKind::ForkControl
            } else {
                NodeKind::Fork
            };
            let fork = self.add_node(kind, None, node.block);
            let succs = std::mem::replace(&mut self.nodes[n].succs, vec![fork]);
            self.nodes[fork].preds.push(n);
            for s in succs {
                if let Some(slot) =
                    self.nodes[s].preds.iter_mut().find(|p| **p == n)
                {
                    *slot = fork;
                }
                self.nodes[fork].succs.push(s);
            }
        }
    }

    /// Build the graph of `func`. Edge frequencies come from the function's
    /// profile; without one every CFG edge counts once.
    pub fn build(func: &Function) -> Self {
        let mut lower = Lowering::new(func);
        lower.run();
        let mut graph = lower.graph;
        graph.insert_forks();
        if func.profile.is_empty() {
            for bb in &func.layout {
                for s in func.successors(*bb) {
                    graph.set_freq(*bb, s, 1.0);
                }
            }
        } else {
            for f in &func.profile {
                graph.set_freq(f.from, f.to, f.freq);
            }
        }
        graph
    }
}

struct Lowering<'a> {
    func: &'a Function,
    cfg: Cfg,
    graph: DataflowGraph,
    inst_node: HashMap<InstIdx, NodeIdx>,
    branch: HashMap<BlockIdx, NodeIdx>,
    control: HashMap<BlockIdx, NodeIdx>,
    live_in: HashMap<InstIdx, HashSet<BlockIdx>>,
    phi_data: HashMap<(InstIdx, BlockIdx), NodeIdx>,
    branch_data: HashMap<(InstIdx, BlockIdx), NodeIdx>,
}

impl<'a> Lowering<'a> {
    fn new(func: &'a Function) -> Self {
        Lowering {
            func,
            cfg: Cfg::from(func),
            graph: DataflowGraph::default(),
            inst_node: HashMap::new(),
            branch: HashMap::new(),
            control: HashMap::new(),
            live_in: HashMap::new(),
            phi_data: HashMap::new(),
            branch_data: HashMap::new(),
        }
    }

    fn run(&mut self) {
        let func = self.func;
        for bb in &func.layout {
            let ctrl = self.graph.add_node(NodeKind::PhiControl, None, Some(*bb));
            self.control.insert(*bb, ctrl);
            for i in &func.blocks[*bb].insts {
                let kind = match &func.insts[*i].op {
                    Opcode::Phi { .. } => NodeKind::Phi,
                    Opcode::CondBr { .. } | Opcode::Switch { .. } => {
                        NodeKind::Branch
                    }
                    Opcode::Ret => NodeKind::Exit,
                    Opcode::Br { .. } => continue,
                    _ => NodeKind::Inst,
                };
                let n = self.graph.add_node(kind, Some(*i), Some(*bb));
                self.inst_node.insert(*i, n);
                if kind == NodeKind::Branch {
                    self.branch.insert(*bb, n);
                }
            }
        }
        self.compute_liveness();

        for bb in &func.layout {
            for i in &func.blocks[*bb].insts {
                let Some(n) = self.inst_node.get(i).copied() else {
                    continue;
                };
                let inst = &func.insts[*i];
                if inst.is_phi() {
                    for (pred, v) in inst.incoming() {
                        if let Some(src) = self.incoming_source(v, pred) {
                            self.graph.connect(src, n);
                        }
                    }
                } else {
                    for v in &inst.operands {
                        let src = match v {
                            Value::Inst(d) if self.inst_node.contains_key(d) => {
                                self.value_in(*d, *bb)
                            }
                            Value::Const(c) => self.graph.add_constant(*c, *bb),
                            _ => continue,
                        };
                        self.graph.connect(src, n);
                    }
                }
                if inst.op == Opcode::Ret {
                    self.graph.connect(self.control[bb], n);
                }
            }
            self.lower_control(*bb);
        }
    }

    fn lower_control(&mut self, bb: BlockIdx) {
        let ctrl = self.control[&bb];
        let out = match self.branch.get(&bb).copied() {
            Some(br) => {
                let bc = self.graph.add_node(
                    NodeKind::BranchControl,
                    None,
                    Some(bb),
                );
                self.graph.connect(ctrl, bc);
                self.graph.connect(br, bc);
                bc
            }
            None => ctrl,
        };
        for s in self.cfg.succs(bb).to_vec() {
            self.graph.connect(out, self.control[&s]);
        }
    }

    fn def_block(&self, d: InstIdx) -> BlockIdx {
        self.func.insts[d].block
    }

    fn compute_liveness(&mut self) {
        let func = self.func;
        for i in func.inst_iter() {
            let inst = &func.insts[i];
            if inst.is_phi() {
                for (pred, v) in inst.incoming() {
                    if let Value::Inst(d) = v {
                        self.mark_live_in(d, pred);
                    }
                }
            } else {
                for v in &inst.operands {
                    if let Value::Inst(d) = v {
                        self.mark_live_in(*d, inst.block);
                    }
                }
            }
        }
    }

    fn mark_live_in(&mut self, d: InstIdx, bb: BlockIdx) {
        let def = self.def_block(d);
        let set = self.live_in.entry(d).or_default();
        let mut work = vec![bb];
        while let Some(b) = work.pop() {
            if b == def || !set.insert(b) {
                continue;
            }
            work.extend(self.cfg.preds(b).iter().copied());
        }
    }

    /// The node carrying the value of `d` inside `bb`.
    fn value_in(&mut self, d: InstIdx, bb: BlockIdx) -> NodeIdx {
        if self.def_block(d) == bb {
            return self.inst_node[&d];
        }
        if let Some(n) = self.phi_data.get(&(d, bb)) {
            return *n;
        }
        let merge = self.graph.add_node(NodeKind::PhiData, None, Some(bb));
        self.phi_data.insert((d, bb), merge);
        let live = |p: &BlockIdx| {
            *p == self.def_block(d)
                || self.live_in.get(&d).is_some_and(|s| s.contains(p))
        };
        let preds = self.cfg.preds(bb).iter().copied().filter(live).collect_vec();
        for p in preds {
            let src = self.value_out(d, p);
            self.graph.connect(src, merge);
        }
        merge
    }

    /// The node carrying the value of `d` out of `bb`.
    fn value_out(&mut self, d: InstIdx, bb: BlockIdx) -> NodeIdx {
        let src = self.value_in(d, bb);
        let Some(br) = self.branch.get(&bb).copied() else {
            return src;
        };
        if let Some(n) = self.branch_data.get(&(d, bb)) {
            return *n;
        }
        let steer = self.graph.add_node(NodeKind::BranchData, None, Some(bb));
        self.graph.connect(src, steer);
        self.graph.connect(br, steer);
        self.branch_data.insert((d, bb), steer);
        steer
    }

    fn incoming_source(&mut self, v: Value, pred: BlockIdx) -> Option<NodeIdx> {
        match v {
            Value::Inst(d) if self.inst_node.contains_key(&d) => {
                Some(self.value_out(d, pred))
            }
            Value::Const(c) => {
                let cst = self.graph.add_constant(c, pred);
                let Some(br) = self.branch.get(&pred).copied() else {
                    return Some(cst);
                };
                let steer =
                    self.graph.add_node(NodeKind::BranchData, None, Some(pred));
                self.graph.connect(cst, steer);
                self.graph.connect(br, steer);
                Some(steer)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Builder, ICmpPred, Type};

    /// for (i = 0; i != 8; i++) s = s * 3 + i
    fn accumulate() -> Function {
        let mut f = Function::new("f", vec![]);
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        let body = b.add_block("body");
        let exit = b.add_block("exit");
        b.set_insert_point(entry);
        b.br(body);
        b.set_insert_point(body);
        let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
        let s = b.phi(Type::Int(32), &[(entry, Value::int(32, 1))]);
        let m = b.mul(s.into(), Value::int(32, 3));
        let s1 = b.add(m.into(), i.into());
        let i1 = b.add(i.into(), Value::int(32, 1));
        b.add_incoming(i, body, i1.into());
        b.add_incoming(s, body, s1.into());
        let c = b.icmp(ICmpPred::Ne, i1.into(), Value::int(32, 8));
        b.cond_br(c.into(), body, exit);
        b.set_insert_point(exit);
        b.ret(Some(s1.into()));
        f
    }

    #[test]
    fn loop_carried_values_pass_through_data_branches() {
        let f = accumulate();
        let g = DataflowGraph::build(&f);
        let body = f.block_by_name("body").unwrap();
        let phi = g.node_of(f.inst_by_name("phi").unwrap()).unwrap();
        let steered = g
            .node(phi)
            .preds
            .iter()
            .filter(|p| {
                g.node(**p).kind == NodeKind::BranchData
                    && g.node(**p).block == Some(body)
            })
            .count();
        assert_eq!(steered, 1);
        assert_eq!(g.freq(body, body), Some(1.0));
        assert_eq!(g.total_freq(body), 2.0);
    }

    #[test]
    fn only_branches_and_forks_fan_out() {
        let g = DataflowGraph::build(&accumulate());
        for (_, n) in g.iter() {
            if !n.kind.is_branch() && !n.kind.is_fork() {
                assert!(n.succs.len() <= 1, "{:?} fans out", n.kind);
            }
            if n.kind.is_fork() {
                assert_eq!(n.preds.len(), 1);
                assert!(n.succs.len() > 1);
            }
        }
    }
}
