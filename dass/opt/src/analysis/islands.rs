//! Partition of a dataflow graph into static islands.
//!
//! Every node starts in its own island. Neighbouring nodes are merged when
//! neither of them is a control join or split, a call or a memory access.
//! Forks are only folded into the island of their successors once all of
//! them ended up in the same island.
use dass_idx::maps::SecondaryMap;
use dass_ir::{self as ir, DataflowGraph, InstIdx, NodeIdx, NodeKind, Value};
use linked_hash_map::LinkedHashMap;
use std::collections::HashSet;

/// `n` may share an island with its neighbours.
pub fn can_merge(func: &ir::Function, graph: &DataflowGraph, n: NodeIdx) -> bool {
    let node = graph.node(n);
    match node.kind {
        k if k.is_branch() => node.preds.len() <= 1 && node.succs.len() <= 1,
        k if k.is_phi() => node.preds.len() <= 1,
        NodeKind::Inst => node.instr.is_none_or(|i| {
            let inst = func.inst(i);
            !inst.is_call() && !inst.op.is_memory()
        }),
        _ => true,
    }
}

/// The edge `from -> to` may be merged. Edges leaving a fork are merged
/// separately.
pub fn can_merge_edge(
    func: &ir::Function,
    graph: &DataflowGraph,
    from: NodeIdx,
    to: NodeIdx,
) -> bool {
    can_merge(func, graph, from)
        && can_merge(func, graph, to)
        && !graph.node(from).kind.is_fork()
}

/// Island membership of every node of a dataflow graph.
#[derive(Debug, Clone)]
pub struct IslandPartition {
    /// Union-find forest. Roots have no parent and name their island.
    parent: SecondaryMap<NodeIdx, Option<NodeIdx>>,
    nodes: Vec<NodeIdx>,
}

impl IslandPartition {
    /// One island per node.
    pub fn singletons(graph: &DataflowGraph) -> Self {
        IslandPartition {
            parent: SecondaryMap::new(),
            nodes: graph.keys().collect(),
        }
    }

    /// Singletons merged into maximal islands.
    pub fn new(func: &ir::Function, graph: &DataflowGraph) -> Self {
        let mut partition = Self::singletons(graph);
        partition.merge(func, graph);
        partition
    }

    /// The island of `n`, named by its representative node.
    pub fn island_of(&self, n: NodeIdx) -> NodeIdx {
        let mut cur = n;
        while let Some(p) = self.parent[cur] {
            cur = p;
        }
        cur
    }

    fn find(&mut self, n: NodeIdx) -> NodeIdx {
        let root = self.island_of(n);
        let mut cur = n;
        while let Some(p) = self.parent[cur] {
            self.parent.insert(cur, Some(root));
            cur = p;
        }
        root
    }

    /// Move every member of the island of `from` into the island of `to`.
    fn union(&mut self, from: NodeIdx, to: NodeIdx) {
        let (a, b) = (self.find(from), self.find(to));
        if a != b {
            self.parent.insert(a, Some(b));
        }
    }

    /// Grow the islands along every mergeable edge, then fold in the forks
    /// whose successors all share one island. Merging a partition that is
    /// already merged changes nothing.
    pub fn merge(&mut self, func: &ir::Function, graph: &DataflowGraph) {
        for n in self.nodes.clone() {
            let node = graph.node(n);
            for p in &node.preds {
                if can_merge_edge(func, graph, *p, n) {
                    self.union(*p, n);
                }
            }
            for s in &node.succs {
                if can_merge_edge(func, graph, n, *s) {
                    self.union(n, *s);
                }
            }
        }

        // Joining one fork can make an earlier one joinable.
        let forks: Vec<NodeIdx> = self
            .nodes
            .iter()
            .copied()
            .filter(|n| {
                let node = graph.node(*n);
                node.kind.is_fork() && !node.succs.is_empty()
            })
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for n in &forks {
                let succs = &graph.node(*n).succs;
                let island = self.find(succs[0]);
                let joinable = succs.iter().all(|s| {
                    can_merge(func, graph, *s) && self.island_of(*s) == island
                });
                if joinable && self.find(*n) != island {
                    self.union(*n, island);
                    changed = true;
                }
            }
        }
    }

    /// Members of every island, ordered by their first node.
    pub fn groups(&self) -> LinkedHashMap<NodeIdx, Vec<NodeIdx>> {
        let mut groups: LinkedHashMap<NodeIdx, Vec<NodeIdx>> =
            LinkedHashMap::new();
        for n in &self.nodes {
            groups.entry(self.island_of(*n)).or_default().push(*n);
        }
        groups
    }

    /// Islands worth extracting: more than one node and more than `min_size`
    /// arithmetic or comparison instructions.
    pub fn static_islands(
        &self,
        func: &ir::Function,
        graph: &DataflowGraph,
        min_size: u64,
    ) -> Vec<StaticIsland> {
        self.groups()
            .into_iter()
            .map(|(id, nodes)| {
                let inst_size = nodes
                    .iter()
                    .filter_map(|n| inst_node(graph, *n))
                    .filter(|i| {
                        let inst = func.inst(*i);
                        inst.bin_op().is_some() || inst.is_cmp()
                    })
                    .count();
                StaticIsland {
                    id,
                    nodes,
                    inst_size,
                }
            })
            .filter(|isl| isl.nodes.len() > 1 && isl.inst_size as u64 > min_size)
            .collect()
    }
}

fn inst_node(graph: &DataflowGraph, n: NodeIdx) -> Option<InstIdx> {
    let node = graph.node(n);
    (node.kind == NodeKind::Inst).then_some(node.instr).flatten()
}

/// An island selected for extraction.
#[derive(Debug, Clone)]
pub struct StaticIsland {
    pub id: NodeIdx,
    pub nodes: Vec<NodeIdx>,
    /// Number of arithmetic and comparison instructions.
    pub inst_size: usize,
}

impl StaticIsland {
    /// The instructions, inputs and outputs to outline. Inputs are the
    /// operands of the instructions fed from outside the island, looking
    /// through phis and forks. Outputs are the instructions feeding a node
    /// outside the island, looking back through branches and forks.
    pub fn to_island(
        &self,
        func: &ir::Function,
        graph: &DataflowGraph,
        partition: &IslandPartition,
    ) -> ir::Island {
        let inside = |n: &NodeIdx| partition.island_of(*n) == self.id;
        let mut island = ir::Island::default();
        let mut visited = HashSet::new();
        for n in &self.nodes {
            let node = graph.node(*n);
            if let Some(i) = inst_node(graph, *n) {
                island.insts.push(i);
            }
            if node.preds.iter().any(|p| !inside(p)) {
                collect_args(func, graph, *n, &mut visited, &mut island.inputs);
            }
            if node.succs.iter().any(|s| !inside(s)) {
                let producer = match node.kind {
                    NodeKind::Inst => node.instr,
                    k if k.is_branch() || k.is_fork() => node
                        .preds
                        .first()
                        .and_then(|p| inst_node(graph, *p)),
                    _ => None,
                };
                if let Some(i) = producer {
                    if !island.outputs.contains(&i) {
                        island.outputs.push(i);
                    }
                }
            }
        }
        island
    }
}

fn collect_args(
    func: &ir::Function,
    graph: &DataflowGraph,
    n: NodeIdx,
    visited: &mut HashSet<NodeIdx>,
    inputs: &mut Vec<Value>,
) {
    if !visited.insert(n) {
        return;
    }
    let node = graph.node(n);
    match node.kind {
        NodeKind::Inst => {
            let Some(i) = node.instr else { return };
            for v in &func.inst(i).operands {
                if !inputs.contains(v) {
                    inputs.push(*v);
                }
            }
        }
        k if k.is_phi() => {
            if let &[s] = node.succs.as_slice() {
                collect_args(func, graph, s, visited, inputs);
            }
        }
        k if k.is_fork() => {
            for s in &node.succs {
                collect_args(func, graph, *s, visited, inputs);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Argument, Builder, Type};

    fn int_args(names: &[&str]) -> Vec<Argument> {
        names
            .iter()
            .map(|n| Argument {
                name: (*n).into(),
                ty: Type::Int(32),
            })
            .collect()
    }

    /// x = a + b; y = x * 2; z = use(x); w = y + z; return w
    fn diamond(call_in_branch: bool) -> ir::Function {
        let mut f = ir::Function::new("f", int_args(&["a", "b"]));
        f.ret_ty = Type::Int(32);
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let x = b.add(Value::Arg(0), Value::Arg(1));
        let y = b.mul(x.into(), Value::int(32, 2));
        let z = if call_in_branch {
            b.call("g", &[x.into()], Type::Int(32))
        } else {
            b.mul(x.into(), Value::int(32, 3))
        };
        let w = b.add(y.into(), z.into());
        b.ret(Some(w.into()));
        f
    }

    fn node(f: &ir::Function, g: &DataflowGraph, name: &str) -> NodeIdx {
        g.node_of(f.inst_by_name(name).unwrap()).unwrap()
    }

    #[test]
    fn fork_joins_when_all_branches_are_pure() {
        let f = diamond(false);
        let g = DataflowGraph::build(&f);
        let p = IslandPartition::new(&f, &g);
        let x = p.island_of(node(&f, &g, "add"));
        assert_eq!(x, p.island_of(node(&f, &g, "mul")));
        assert_eq!(x, p.island_of(node(&f, &g, "mul0")));
        assert_eq!(x, p.island_of(node(&f, &g, "add0")));
        let islands = p.static_islands(&f, &g, 1);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].inst_size, 4);
    }

    #[test]
    fn call_splits_the_fork() {
        let f = diamond(true);
        let g = DataflowGraph::build(&f);
        let p = IslandPartition::new(&f, &g);
        let call = node(&f, &g, "call");
        assert!(!can_merge(&f, &g, call));
        assert_ne!(p.island_of(node(&f, &g, "add")), p.island_of(node(&f, &g, "mul")));
        assert_eq!(p.island_of(node(&f, &g, "mul")), p.island_of(node(&f, &g, "add0")));
        assert!(g.keys().filter(|n| p.island_of(*n) == p.island_of(call)).count() == 1);
    }

    #[test]
    fn merging_twice_changes_nothing() {
        let f = diamond(true);
        let g = DataflowGraph::build(&f);
        let mut p = IslandPartition::new(&f, &g);
        let before = p.groups().into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        p.merge(&f, &g);
        let after = p.groups().into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn island_outputs_feed_outside_users() {
        let f = diamond(true);
        let g = DataflowGraph::build(&f);
        let p = IslandPartition::new(&f, &g);
        let islands = p.static_islands(&f, &g, 0);
        let x = f.inst_by_name("add").unwrap();
        let with_x = islands
            .iter()
            .find(|isl| isl.nodes.contains(&node(&f, &g, "add")))
            .unwrap();
        let island = with_x.to_island(&f, &g, &p);
        assert_eq!(island.insts, vec![x]);
        // The fork behind `x` feeds the call, which is outside.
        assert_eq!(island.outputs, vec![x]);
    }
}
