//! Throughput lost by running a dynamically scheduled loop as a static
//! pipeline. The loop-carried cycles of the dataflow graph are enumerated
//! with the probability of the control path they follow; a static schedule
//! always pays for the slowest cycle while the elastic circuit pays for the
//! expected one.
use dass_ir::{
    self as ir, BinOp, BlockIdx, DataflowGraph, LoopIdx, LoopNest, NodeIdx,
    NodeKind, Opcode,
};
use dass_utils::{DassResult, Error};
use std::collections::HashSet;

/// Cycles spent in `n` by the elastic circuit.
pub fn node_latency(func: &ir::Function, graph: &DataflowGraph, n: NodeIdx) -> u32 {
    let node = graph.node(n);
    if node.kind != NodeKind::Inst {
        return 0;
    }
    let Some(i) = node.instr else {
        return 0;
    };
    match &func.inst(i).op {
        Opcode::Binary { op, .. } => match op {
            BinOp::Mul => 4,
            BinOp::SRem | BinOp::URem => 16,
            BinOp::SDiv => 32,
            BinOp::FMul => 5,
            BinOp::FAdd | BinOp::FSub => 4,
            BinOp::FDiv => 16,
            _ => 0,
        },
        Opcode::FCmp(_) | Opcode::Store => 1,
        Opcode::Load => 2,
        _ => 0,
    }
}

/// One loop-carried path through the dataflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub latency: u32,
    /// Probability of the least likely block transition on the path.
    pub probability: f64,
    /// Blocks entered along the path.
    pub blocks: Vec<BlockIdx>,
}

impl Default for Cycle {
    fn default() -> Self {
        Cycle {
            latency: 0,
            probability: 1.0,
            blocks: vec![],
        }
    }
}

/// Throughput loss of one loop.
pub struct ThroughputLoss<'a> {
    func: &'a ir::Function,
    graph: &'a DataflowGraph,
    nest: &'a LoopNest,
    l: LoopIdx,
}

impl<'a> ThroughputLoss<'a> {
    pub fn new(
        func: &'a ir::Function,
        graph: &'a DataflowGraph,
        nest: &'a LoopNest,
        l: LoopIdx,
    ) -> Self {
        ThroughputLoss {
            func,
            graph,
            nest,
            l,
        }
    }

    /// Relative slowdown of the static pipeline: the worst loss over every
    /// header phi and latch data branch feeding it.
    pub fn loss(&self) -> DassResult<f64> {
        let lp = self.nest.get(self.l);
        let latch = self.nest.latch(self.l).ok_or_else(|| {
            Error::unsupported(format!(
                "loop at `{}' has no unique latch",
                self.func.block(lp.header).name
            ))
        })?;
        let mut loss: f64 = 0.0;
        for (n, node) in self.graph.iter() {
            if node.kind != NodeKind::Phi || node.block != Some(lp.header) {
                continue;
            }
            for pred in &node.preds {
                let p = self.graph.node(*pred);
                if p.kind != NodeKind::BranchData || p.block != Some(latch) {
                    continue;
                }
                let cycles = self.cycles(n, *pred)?;
                if cycles.is_empty() {
                    continue;
                }
                loss = loss.max(Self::cycle_loss(&cycles)?);
            }
        }
        Ok(loss)
    }

    /// Every path from `src` to `dst` inside the loop, one per block path.
    /// Paths sharing a block path keep the largest latency.
    pub fn cycles(&self, src: NodeIdx, dst: NodeIdx) -> DassResult<Vec<Cycle>> {
        let Some(src_block) = self.graph.node(src).block else {
            return Ok(vec![]);
        };
        let total = self.graph.total_freq(src_block);
        let mut found = vec![];
        let mut on_path = HashSet::from([src]);
        self.explore(src, dst, total, Cycle::default(), &mut on_path, &mut found)?;

        let mut unique: Vec<Cycle> = vec![];
        for c in found {
            match unique.iter_mut().find(|u| u.blocks == c.blocks) {
                Some(u) => u.latency = u.latency.max(c.latency),
                None => unique.push(c),
            }
        }
        Ok(unique)
    }

    fn explore(
        &self,
        n: NodeIdx,
        dst: NodeIdx,
        total: f64,
        cycle: Cycle,
        on_path: &mut HashSet<NodeIdx>,
        found: &mut Vec<Cycle>,
    ) -> DassResult<()> {
        if n == dst {
            found.push(cycle);
            return Ok(());
        }
        let node = self.graph.node(n);
        let dst_block = self.graph.node(dst).block;
        let lp = self.nest.get(self.l);
        for s in &node.succs {
            let succ = self.graph.node(*s);
            let Some(bb) = succ.block.filter(|bb| lp.contains(*bb)) else {
                continue;
            };
            // Branches steering other loop-carried values.
            if succ.kind.is_branch() && succ.block == dst_block && *s != dst {
                continue;
            }
            if on_path.contains(s) {
                continue;
            }
            let mut next = cycle.clone();
            next.latency += node_latency(self.func, self.graph, *s);
            if let Some(from) = node.block.filter(|from| *from != bb) {
                next.blocks.push(bb);
                let freq = self.graph.freq(from, bb).ok_or_else(|| {
                    Error::malformed_ir(format!(
                        "`{}': no frequency for the edge `{}' -> `{}'",
                        self.func.name,
                        self.func.block(from).name,
                        self.func.block(bb).name
                    ))
                })?;
                next.probability = next.probability.min(freq / total);
            }
            on_path.insert(*s);
            self.explore(*s, dst, total, next, on_path, found)?;
            on_path.remove(s);
        }
        Ok(())
    }

    /// `(static - dynamic) / (dynamic + 1)`, where the static pipeline waits
    /// for the slowest cycle and the dynamic circuit for the expected one.
    pub fn cycle_loss(cycles: &[Cycle]) -> DassResult<f64> {
        let mut dynamic = 0.0;
        let mut probability = 0.0;
        let mut worst = 0;
        for c in cycles {
            log::trace!(
                "cycle {:?}: p = {}, latency = {}",
                c.blocks,
                c.probability,
                c.latency
            );
            dynamic += f64::from(c.latency) * c.probability;
            probability += c.probability;
            worst = worst.max(c.latency);
        }
        // The cycles must cover every path through the loop.
        if probability != 1.0 {
            return Err(Error::misc(format!(
                "loop cycle probabilities sum to {probability} instead of 1"
            )));
        }
        let loss = (f64::from(worst) - dynamic) / (dynamic + 1.0);
        log::debug!(
            "throughput: {} / {}, loss {loss}",
            dynamic + 1.0,
            worst + 1
        );
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{BlockFreq, Builder, ICmpPred, Type, Value};

    /// for (i = 0; i != 8; i++) s = (i & 1) == 0 ? s * 3 : s + 1
    fn branchy_loop() -> ir::Function {
        let mut f = ir::Function::new("f", vec![]);
        f.ret_ty = Type::Int(32);
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        let header = b.add_block("header");
        let then = b.add_block("then");
        let other = b.add_block("else");
        let latch = b.add_block("latch");
        let exit = b.add_block("exit");
        b.set_insert_point(entry);
        b.br(header);
        b.set_insert_point(header);
        let i = b.phi(Type::Int(32), &[(entry, Value::int(32, 0))]);
        let s = b.phi(Type::Int(32), &[(entry, Value::int(32, 1))]);
        let odd = b.binary(BinOp::And, i.into(), Value::int(32, 1));
        let even = b.icmp(ICmpPred::Eq, odd.into(), Value::int(32, 0));
        b.cond_br(even.into(), then, other);
        b.set_insert_point(then);
        let s_then = b.mul(s.into(), Value::int(32, 3));
        b.br(latch);
        b.set_insert_point(other);
        let s_else = b.add(s.into(), Value::int(32, 1));
        b.br(latch);
        b.set_insert_point(latch);
        let s1 = b.phi(
            Type::Int(32),
            &[(then, s_then.into()), (other, s_else.into())],
        );
        let i1 = b.add(i.into(), Value::int(32, 1));
        b.add_incoming(i, latch, i1.into());
        b.add_incoming(s, latch, s1.into());
        let c = b.icmp(ICmpPred::Eq, i1.into(), Value::int(32, 8));
        b.cond_br(c.into(), exit, header);
        b.set_insert_point(exit);
        b.ret(Some(s1.into()));
        f
    }

    fn loss_of(f: &ir::Function) -> DassResult<f64> {
        let graph = DataflowGraph::build(f);
        let nest = LoopNest::new(f);
        ThroughputLoss::new(f, &graph, &nest, nest.top_level()[0]).loss()
    }

    fn set_profile(f: &mut ir::Function, edges: &[(&str, &str, f64)]) {
        f.profile = edges
            .iter()
            .map(|(from, to, freq)| BlockFreq {
                from: f.block_by_name(from).unwrap(),
                to: f.block_by_name(to).unwrap(),
                freq: *freq,
            })
            .collect();
    }

    #[test]
    fn unbalanced_branches_lose_throughput() {
        let loss = loss_of(&branchy_loop()).unwrap();
        // Both sides equally likely: static 4, dynamic 2.
        assert!((loss - 2.0 / 3.0).abs() < 1e-9, "loss = {loss}");
    }

    #[test]
    fn profile_weights_the_cycles() {
        let mut f = branchy_loop();
        set_profile(
            &mut f,
            &[
                ("entry", "header", 1.0),
                ("header", "then", 3.0),
                ("header", "else", 1.0),
                ("then", "latch", 3.0),
                ("else", "latch", 1.0),
                ("latch", "header", 3.0),
                ("latch", "exit", 1.0),
            ],
        );
        let loss = loss_of(&f).unwrap();
        assert!((loss - 0.25).abs() < 1e-9, "loss = {loss}");
    }

    #[test]
    fn missing_edge_frequency_is_an_error() {
        let mut f = branchy_loop();
        set_profile(&mut f, &[("header", "then", 1.0), ("header", "else", 1.0)]);
        assert!(loss_of(&f).is_err());
    }

    #[test]
    fn probabilities_must_cover_the_loop() {
        let cycles = [
            Cycle {
                latency: 2,
                probability: 0.5,
                blocks: vec![],
            },
            Cycle {
                latency: 2,
                probability: 0.25,
                blocks: vec![],
            },
        ];
        assert!(ThroughputLoss::cycle_loss(&cycles).is_err());
        assert_eq!(ThroughputLoss::cycle_loss(&cycles[..1]).ok(), None);
        let whole = Cycle {
            latency: 3,
            ..Default::default()
        };
        assert_eq!(ThroughputLoss::cycle_loss(&[whole]).unwrap(), 0.0);
    }
}
