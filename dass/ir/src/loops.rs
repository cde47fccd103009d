//! Natural loops of a function, organized as a nest.
use crate::{BlockIdx, Cfg, Function, LoopIdx, LoopMetadata};
use dass_idx::maps::IndexedMap;
use dass_utils::Id;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// One natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockIdx,
    /// Blocks of the loop (including nested loops) in layout order.
    pub blocks: Vec<BlockIdx>,
    pub parent: Option<LoopIdx>,
    /// Immediately nested loops in layout order of their headers.
    pub children: Vec<LoopIdx>,
    /// Outermost loops have depth 1.
    pub depth: u32,
    pub name: Option<Id>,
}

impl Loop {
    pub fn contains(&self, bb: BlockIdx) -> bool {
        self.blocks.contains(&bb)
    }
}

/// The loop forest of a function together with the CFG facts the loop
/// queries need. Computed from scratch; any change to the CFG invalidates it.
pub struct LoopNest {
    cfg: Cfg,
    loops: IndexedMap<LoopIdx, Loop>,
    top_level: Vec<LoopIdx>,
    innermost_of: HashMap<BlockIdx, LoopIdx>,
    by_name: HashMap<Id, LoopIdx>,
}

impl LoopNest {
    pub fn new(func: &Function) -> Self {
        let cfg = Cfg::from(func);
        let position: HashMap<BlockIdx, usize> = func
            .layout
            .iter()
            .enumerate()
            .map(|(i, bb)| (*bb, i))
            .collect();

        // Natural loop of every back edge, merged per header.
        let mut bodies: Vec<(BlockIdx, HashSet<BlockIdx>)> = vec![];
        for (latch, header) in cfg.back_edges() {
            let mut body: HashSet<BlockIdx> = HashSet::from([header]);
            let mut work = vec![latch];
            while let Some(bb) = work.pop() {
                if cfg.is_reachable(bb) && body.insert(bb) {
                    work.extend(cfg.preds(bb).iter().copied());
                }
            }
            match bodies.iter_mut().find(|(h, _)| *h == header) {
                Some((_, existing)) => existing.extend(body),
                None => bodies.push((header, body)),
            }
        }
        bodies.sort_by_key(|(h, _)| position[h]);

        let mut loops: IndexedMap<LoopIdx, Loop> = IndexedMap::new();
        for (header, body) in &bodies {
            let blocks = body
                .iter()
                .copied()
                .sorted_by_key(|bb| position[bb])
                .collect_vec();
            loops.push(Loop {
                header: *header,
                blocks,
                parent: None,
                children: vec![],
                depth: 1,
                name: func.blocks[*header]
                    .loop_md
                    .as_ref()
                    .and_then(|md| md.name),
            });
        }

        // The parent of a loop is the smallest other loop containing its
        // header.
        let keys = loops.keys().collect_vec();
        for l in &keys {
            let header = loops[*l].header;
            let parent = keys
                .iter()
                .filter(|m| *m != l && loops[**m].contains(header))
                .min_by_key(|m| loops[**m].blocks.len())
                .copied();
            loops[*l].parent = parent;
        }
        let mut top_level = vec![];
        for l in &keys {
            match loops[*l].parent {
                Some(p) => loops[p].children.push(*l),
                None => top_level.push(*l),
            }
        }
        // Headers are visited in layout order, so parents get their depth
        // before their children.
        for l in &keys {
            if let Some(p) = loops[*l].parent {
                loops[*l].depth = loops[p].depth + 1;
            }
        }

        let mut innermost_of = HashMap::new();
        for bb in &func.layout {
            if let Some(l) = keys
                .iter()
                .filter(|l| loops[**l].contains(*bb))
                .min_by_key(|l| loops[**l].blocks.len())
            {
                innermost_of.insert(*bb, *l);
            }
        }
        let by_name = loops
            .iter()
            .filter_map(|(idx, l)| l.name.map(|n| (n, idx)))
            .collect();

        LoopNest {
            cfg,
            loops,
            top_level,
            innermost_of,
            by_name,
        }
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn get(&self, l: LoopIdx) -> &Loop {
        &self.loops[l]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LoopIdx, &Loop)> {
        self.loops.iter()
    }

    pub fn top_level(&self) -> &[LoopIdx] {
        &self.top_level
    }

    /// Loops without children, outer loops first.
    pub fn innermost(&self) -> Vec<LoopIdx> {
        let mut out = vec![];
        let mut work = self.top_level.iter().rev().copied().collect_vec();
        while let Some(l) = work.pop() {
            let children = &self.loops[l].children;
            if children.is_empty() {
                out.push(l);
            } else {
                work.extend(children.iter().rev().copied());
            }
        }
        out
    }

    /// Innermost loop containing `bb`.
    pub fn loop_for(&self, bb: BlockIdx) -> Option<LoopIdx> {
        self.innermost_of.get(&bb).copied()
    }

    /// Loop depth of `bb`; zero outside of any loop.
    pub fn depth_of(&self, bb: BlockIdx) -> u32 {
        self.loop_for(bb).map(|l| self.loops[l].depth).unwrap_or(0)
    }

    pub fn contains(&self, l: LoopIdx, bb: BlockIdx) -> bool {
        self.loops[l].contains(bb)
    }

    pub fn is_header(&self, bb: BlockIdx) -> bool {
        self.loops.values().any(|l| l.header == bb)
    }

    pub fn by_name(&self, name: &str) -> Option<LoopIdx> {
        self.by_name.get(&Id::from(name)).copied()
    }

    /// Metadata attached to the header of `l`.
    pub fn metadata<'f>(
        &self,
        l: LoopIdx,
        func: &'f Function,
    ) -> Option<&'f LoopMetadata> {
        func.blocks[self.loops[l].header].loop_md.as_ref()
    }

    /// The enclosing loop at depth `depth`, `l` itself included.
    pub fn ancestor_at_depth(&self, l: LoopIdx, depth: u32) -> Option<LoopIdx> {
        let mut cur = Some(l);
        while let Some(c) = cur {
            if self.loops[c].depth == depth {
                return Some(c);
            }
            cur = self.loops[c].parent;
        }
        None
    }

    /// The unique block inside the loop that branches back to the header.
    pub fn latch(&self, l: LoopIdx) -> Option<BlockIdx> {
        let lp = &self.loops[l];
        self.cfg
            .preds(lp.header)
            .iter()
            .filter(|p| lp.contains(**p))
            .exactly_one()
            .ok()
            .copied()
    }

    /// The unique block outside the loop that enters it, provided its only
    /// successor is the header.
    pub fn preheader(&self, l: LoopIdx) -> Option<BlockIdx> {
        let lp = &self.loops[l];
        let pred = self
            .cfg
            .preds(lp.header)
            .iter()
            .filter(|p| !lp.contains(**p))
            .exactly_one()
            .ok()
            .copied()?;
        (self.cfg.succs(pred) == [lp.header]).then_some(pred)
    }

    /// Edges leaving the loop, one per distinct `(from, to)` pair.
    pub fn exit_edges(&self, l: LoopIdx) -> Vec<(BlockIdx, BlockIdx)> {
        let lp = &self.loops[l];
        lp.blocks
            .iter()
            .flat_map(|bb| {
                self.cfg
                    .succs(*bb)
                    .iter()
                    .filter(|s| !lp.contains(**s))
                    .map(move |s| (*bb, *s))
            })
            .collect()
    }

    /// Blocks inside the loop with a successor outside.
    pub fn exiting_blocks(&self, l: LoopIdx) -> Vec<BlockIdx> {
        self.exit_edges(l)
            .into_iter()
            .map(|(from, _)| from)
            .dedup()
            .collect()
    }

    pub fn exiting_block(&self, l: LoopIdx) -> Option<BlockIdx> {
        self.exiting_blocks(l).into_iter().exactly_one().ok()
    }

    /// Targets of the exit edges. A block reached by several exit edges
    /// appears several times.
    pub fn exit_blocks(&self, l: LoopIdx) -> Vec<BlockIdx> {
        self.exit_edges(l).into_iter().map(|(_, to)| to).collect()
    }

    /// The exit block when the loop has exactly one exit edge.
    pub fn exit_block(&self, l: LoopIdx) -> Option<BlockIdx> {
        self.exit_blocks(l).into_iter().exactly_one().ok()
    }

    /// The exit block when every exit edge targets the same block.
    pub fn unique_exit_block(&self, l: LoopIdx) -> Option<BlockIdx> {
        self.exit_blocks(l).into_iter().unique().exactly_one().ok()
    }

    /// Every exit block is only entered from inside the loop.
    pub fn has_dedicated_exits(&self, l: LoopIdx) -> bool {
        let lp = &self.loops[l];
        self.exit_blocks(l)
            .into_iter()
            .all(|e| self.cfg.preds(e).iter().all(|p| lp.contains(*p)))
    }

    /// Preheader, single latch and dedicated exits.
    pub fn is_simplify_form(&self, l: LoopIdx) -> bool {
        self.preheader(l).is_some()
            && self.latch(l).is_some()
            && self.has_dedicated_exits(l)
    }

    /// The latch is the only block that leaves the loop.
    pub fn is_rotated(&self, l: LoopIdx) -> bool {
        match (self.latch(l), self.exiting_block(l)) {
            (Some(latch), Some(exiting)) => latch == exiting,
            _ => false,
        }
    }
}
