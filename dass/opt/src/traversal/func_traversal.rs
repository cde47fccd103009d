use dass_ir::{self as ir, Opcode};
use dass_utils::{DassResult, Error, Id};
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// The order in which the functions are traversed.
#[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Order {
    /// Use the program order.
    #[default]
    No,
    /// Callees before callers.
    Post,
}

/// Traversal of the functions of a program, in program order or in
/// post-order over the call graph.
///
/// ## Post-order
/// If a function `B` calls a function `A` then `A` is guaranteed to be
/// visited before `B`. This is done by finding a topological order over the
/// call graph where `A` has a directed edge to `B`. Calls to functions that
/// are not part of the program are ignored.
///
/// The traversal keeps the functions in their original vector and only
/// stores an `order` of indices into it, so that the program order is
/// restored once the traversal is done.
pub struct FuncTraversal {
    /// A topological ordering of the functions.
    order: Vec<NodeIndex>,
    /// Vector of functions in the original ordering.
    funcs: Vec<ir::Function>,
}

impl FuncTraversal {
    /// Fails if a post-order is requested for a recursive program.
    pub fn new(funcs: Vec<ir::Function>, order: Order) -> DassResult<Self> {
        if order == Order::No {
            return Ok(Self {
                order: (0..funcs.len()).map(NodeIndex::new).collect(),
                funcs,
            });
        }
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let rev_map: HashMap<Id, NodeIndex> = funcs
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name, graph.add_node(idx)))
            .collect();

        for func in &funcs {
            for i in func.inst_iter() {
                if let Opcode::Call { callee } = &func.inst(i).op {
                    if let Some(src) = rev_map.get(callee) {
                        graph.update_edge(*src, rev_map[&func.name], ());
                    }
                }
            }
        }

        let topo = algo::toposort(&graph, None).map_err(|cycle| {
            Error::unsupported(format!(
                "recursive call involving `{}'",
                funcs[graph[cycle.node_id()]].name
            ))
        })?;
        Ok(Self { order: topo, funcs })
    }

    /// Traverses functions in the chosen order and applies `upd`. The
    /// callback sees every other function of the program.
    pub fn apply_update<F>(&mut self, mut upd: F) -> DassResult<()>
    where
        F: FnMut(&mut ir::Function, &[ir::Function]) -> DassResult<()>,
    {
        for idx in self.order.iter() {
            let mut func = self.funcs.remove(idx.index());
            let res = upd(&mut func, &self.funcs);
            self.funcs.insert(idx.index(), func);
            res?;
        }
        Ok(())
    }

    /// Returns the underlying function vector in original order.
    pub fn take(self) -> Vec<ir::Function> {
        self.funcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Type};

    fn caller(name: &str, callees: &[&str]) -> ir::Function {
        let mut f = ir::Function::new(name, vec![]);
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        for c in callees {
            b.call(*c, &[], Type::Void);
        }
        b.ret(None);
        f
    }

    fn visit(funcs: Vec<ir::Function>, order: Order) -> Vec<String> {
        let mut seen = vec![];
        let mut po = FuncTraversal::new(funcs, order).unwrap();
        po.apply_update(|f, _| {
            seen.push(f.name.to_string());
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn callees_first_in_post_order() {
        let funcs = vec![
            caller("main", &["a", "puts"]),
            caller("a", &["b"]),
            caller("b", &[]),
        ];
        assert_eq!(visit(funcs.clone(), Order::Post), ["b", "a", "main"]);
        assert_eq!(visit(funcs, Order::No), ["main", "a", "b"]);
    }

    #[test]
    fn recursion_is_rejected() {
        let funcs = vec![caller("a", &["b"]), caller("b", &["a"])];
        assert!(FuncTraversal::new(funcs, Order::Post).is_err());
    }
}
