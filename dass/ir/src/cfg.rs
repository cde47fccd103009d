//! Block-level control flow graph and dominator tree of a function.
use crate::{BlockIdx, Function};
use petgraph::{
    algo::dominators::{self, Dominators},
    graph::{DiGraph, NodeIndex},
};
use std::collections::HashMap;

/// A petgraph::DiGraph whose nodes are the blocks of a function in layout
/// order. Edges follow terminator successors.
pub struct Cfg {
    graph: DiGraph<BlockIdx, ()>,
    nodes: HashMap<BlockIdx, NodeIndex>,
    preds: HashMap<BlockIdx, Vec<BlockIdx>>,
    succs: HashMap<BlockIdx, Vec<BlockIdx>>,
    doms: Option<Dominators<NodeIndex>>,
}

impl From<&Function> for Cfg {
    fn from(func: &Function) -> Self {
        let mut graph = DiGraph::new();
        let nodes: HashMap<BlockIdx, NodeIndex> = func
            .layout
            .iter()
            .map(|bb| (*bb, graph.add_node(*bb)))
            .collect();
        let mut preds: HashMap<BlockIdx, Vec<BlockIdx>> =
            func.layout.iter().map(|bb| (*bb, vec![])).collect();
        let mut succs: HashMap<BlockIdx, Vec<BlockIdx>> = HashMap::new();
        for bb in &func.layout {
            let mut out = vec![];
            for s in func.successors(*bb) {
                if let Some(dst) = nodes.get(&s) {
                    graph.add_edge(nodes[bb], *dst, ());
                    let p = preds.entry(s).or_default();
                    if !p.contains(bb) {
                        p.push(*bb);
                    }
                    if !out.contains(&s) {
                        out.push(s);
                    }
                }
            }
            succs.insert(*bb, out);
        }
        let doms = func
            .entry()
            .map(|entry| dominators::simple_fast(&graph, nodes[&entry]));
        Cfg {
            graph,
            nodes,
            preds,
            succs,
            doms,
        }
    }
}

impl Cfg {
    /// Distinct predecessors in layout order.
    pub fn preds(&self, bb: BlockIdx) -> &[BlockIdx] {
        self.preds.get(&bb).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Distinct successors in terminator order.
    pub fn succs(&self, bb: BlockIdx) -> &[BlockIdx] {
        self.succs.get(&bb).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether `bb` can be reached from the entry block.
    pub fn is_reachable(&self, bb: BlockIdx) -> bool {
        match (&self.doms, self.nodes.get(&bb)) {
            (Some(doms), Some(n)) => doms.dominators(*n).is_some(),
            _ => false,
        }
    }

    /// Whether `a` dominates `b`. Unreachable blocks dominate nothing.
    pub fn dominates(&self, a: BlockIdx, b: BlockIdx) -> bool {
        let (Some(doms), Some(na), Some(nb)) =
            (&self.doms, self.nodes.get(&a), self.nodes.get(&b))
        else {
            return false;
        };
        doms.dominators(*nb)
            .map(|mut it| it.any(|d| d == *na))
            .unwrap_or(false)
    }

    pub fn immediate_dominator(&self, bb: BlockIdx) -> Option<BlockIdx> {
        let doms = self.doms.as_ref()?;
        let n = self.nodes.get(&bb)?;
        doms.immediate_dominator(*n).map(|d| self.graph[d])
    }

    /// Edges `(from, to)` where `to` dominates `from`, in layout order of
    /// `from`.
    pub fn back_edges(&self) -> Vec<(BlockIdx, BlockIdx)> {
        let mut edges = vec![];
        for n in self.graph.node_indices() {
            let from = self.graph[n];
            for to in self.succs(from) {
                if self.is_reachable(from) && self.dominates(*to, from) {
                    edges.push((from, *to));
                }
            }
        }
        edges
    }
}
