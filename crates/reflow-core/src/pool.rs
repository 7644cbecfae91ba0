//! Node pool and graph primitives.
//!
//! All CFG nodes live in a single arena owned by the [`NodePool`]; every
//! inter-node reference is a [`NodeId`] index into it. Nodes are never
//! freed until the pool is dropped, so helper blocks orphaned by rewriting
//! simply become unreachable.
//!
//! Besides storage, the pool exposes the graph-editing primitives and the
//! dominator/post-dominator queries the structurizer passes are built on.

use std::collections::HashSet;
use std::ops::{Index, IndexMut};

use crate::node::{CfgNode, MergeKind, NodeId};

/// Arena owning every CFG node.
#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodePool {
    nodes: Vec<CfgNode>,
}

impl NodePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh node with a generated debug name.
    pub fn create_node(&mut self) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(CfgNode::new(format!("n{}", id.0)));
        id
    }

    /// Allocates a fresh node with the given debug name.
    pub fn create_named(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.create_node();
        self[id].name = name.into();
        id
    }

    /// Number of allocated nodes, including orphaned helpers.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all allocated node ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId::new)
    }

    /// Returns a reference to a node.
    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    /// Returns a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id.index()]
    }

    // --- Graph editing -----------------------------------------------------

    /// Adds a forward edge `from -> to`, updating both neighbor lists.
    /// Duplicate edges are collapsed.
    pub fn add_branch(&mut self, from: NodeId, to: NodeId) {
        if !self[from].succ.contains(&to) {
            self.node_mut(from).succ.push(to);
        }
        if !self[to].pred.contains(&from) {
            self.node_mut(to).pred.push(from);
        }
    }

    /// Removes the forward edge `from -> to` from both neighbor lists.
    pub fn remove_branch(&mut self, from: NodeId, to: NodeId) {
        self.node_mut(from).succ.retain(|&s| s != to);
        self.node_mut(to).pred.retain(|&p| p != from);
    }

    /// Re-points predecessor-side references from `old` to `this`.
    ///
    /// `this` must already hold the predecessor list stolen from `old`;
    /// each of those predecessors gets its successor entry and terminator
    /// targets rewritten so edges that referenced `old` now reference
    /// `this`.
    pub fn retarget_pred_from(&mut self, this: NodeId, old: NodeId) {
        let preds = self[this].pred.clone();
        for p in preds {
            for s in self.node_mut(p).succ.iter_mut() {
                if *s == old {
                    *s = this;
                }
            }
            self.node_mut(p).ir.terminator.retarget(old, this);
        }
    }

    /// Re-points successor-side references from `old` to `this`.
    ///
    /// `this` must already hold the successor list stolen from `old`; each
    /// of those successors gets its predecessor entry rewritten.
    pub fn retarget_succ_from(&mut self, this: NodeId, old: NodeId) {
        let succs = self[this].succ.clone();
        for s in succs {
            for p in self.node_mut(s).pred.iter_mut() {
                if *p == old {
                    *p = this;
                }
            }
        }
    }

    /// Registers `header` on `node`'s header list, ignoring duplicates.
    pub fn add_unique_header(&mut self, node: NodeId, header: NodeId) {
        if !self[node].headers.contains(&header) {
            self.node_mut(node).headers.push(header);
        }
    }

    // --- Dominator queries -------------------------------------------------

    /// Returns true if `a` dominates `b`. Reflexive.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self[cur].immediate_dominator {
                Some(idom) if idom != cur => cur = idom,
                _ => return false,
            }
        }
    }

    /// Walks two idom chains to their common ancestor.
    ///
    /// Both nodes must have valid dominator state from the same traversal;
    /// the chain member with the lower visit order (further from the entry)
    /// is advanced first.
    pub fn find_common_dominator(&self, mut a: NodeId, mut b: NodeId) -> NodeId {
        while a != b {
            if self[a].visit_order < self[b].visit_order {
                match self[a].immediate_dominator {
                    Some(idom) if idom != a => a = idom,
                    _ => return b,
                }
            } else {
                match self[b].immediate_dominator {
                    Some(idom) if idom != b => b = idom,
                    _ => return a,
                }
            }
        }
        a
    }

    /// Recomputes `node`'s immediate dominator from its forward
    /// predecessors. Predecessors not reached by the last traversal are
    /// ignored.
    pub fn recompute_immediate_dominator(&mut self, node: NodeId) {
        let preds: Vec<NodeId> = self[node]
            .pred
            .iter()
            .copied()
            .filter(|&p| self[p].visited)
            .collect();

        let mut idom: Option<NodeId> = None;
        for p in preds {
            idom = Some(match idom {
                Some(cur) => self.find_common_dominator(cur, p),
                None => p,
            });
        }
        self.node_mut(node).immediate_dominator = idom;
    }

    /// Nearest dominator (strictly above `node`) that is a selection
    /// header.
    pub fn get_outer_selection_dominator(&self, node: NodeId) -> Option<NodeId> {
        let mut cur = self[node].immediate_dominator?;
        loop {
            if self[cur].merge == MergeKind::Selection {
                return Some(cur);
            }
            let next = self[cur].immediate_dominator?;
            if next == cur {
                return None;
            }
            cur = next;
        }
    }

    /// Nearest dominator (strictly above `node`) that heads any structured
    /// construct.
    pub fn get_outer_header_dominator(&self, node: NodeId) -> Option<NodeId> {
        let mut cur = self[node].immediate_dominator?;
        loop {
            if self[cur].merge != MergeKind::None {
                return Some(cur);
            }
            let next = self[cur].immediate_dominator?;
            if next == cur {
                return None;
            }
            cur = next;
        }
    }

    /// Returns true if no loop header lies on the idom chain between
    /// `node` (inclusive) and `header` (exclusive), i.e. `header` is the
    /// innermost loop owning `node`.
    pub fn is_innermost_loop_header_for(&self, header: NodeId, node: NodeId) -> bool {
        let mut cur = node;
        while cur != header {
            if self[cur].pred_back_edge.is_some() {
                return false;
            }
            match self[cur].immediate_dominator {
                Some(idom) if idom != cur => cur = idom,
                _ => return false,
            }
        }
        true
    }

    /// Returns true if `header` can structurally declare `candidate` as
    /// its loop merge: the candidate must be dominated by the header and
    /// must not lie inside a loop that does not also contain the header.
    pub fn can_loop_merge_to(&self, header: NodeId, candidate: NodeId) -> bool {
        if !self.dominates(header, candidate) {
            return false;
        }
        for id in self.ids() {
            if id == header {
                continue;
            }
            let n = &self[id];
            if !n.visited || n.pred_back_edge.is_none() {
                continue;
            }
            if self.dominates(id, candidate) && !self.dominates(id, header) {
                return false;
            }
        }
        true
    }

    /// Returns true if every path from `node` to a program exit stays
    /// within blocks dominated by `node` and never crosses a back-edge.
    pub fn dominates_all_reachable_exits(&self, node: NodeId) -> bool {
        let mut checked = HashSet::new();
        self.exits_stay_dominated(node, node, &mut checked)
    }

    fn exits_stay_dominated(
        &self,
        header: NodeId,
        node: NodeId,
        checked: &mut HashSet<NodeId>,
    ) -> bool {
        if !checked.insert(node) {
            return true;
        }
        if self[node].succ_back_edge.is_some() {
            return false;
        }
        self[node]
            .succ
            .iter()
            .all(|&s| self.dominates(header, s) && self.exits_stay_dominated(header, s, checked))
    }

    // --- Graph walks -------------------------------------------------------

    /// Forward DFS from `from`. The callback returns whether to continue
    /// through the node; each node is visited at most once.
    pub fn walk_cfg_from(&self, from: NodeId, f: &mut dyn FnMut(NodeId) -> bool) {
        let mut visited = HashSet::new();
        self.walk_cfg_inner(from, f, &mut visited);
    }

    fn walk_cfg_inner(
        &self,
        node: NodeId,
        f: &mut dyn FnMut(NodeId) -> bool,
        visited: &mut HashSet<NodeId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if !f(node) {
            return;
        }
        for i in 0..self[node].succ.len() {
            let s = self[node].succ[i];
            self.walk_cfg_inner(s, f, visited);
        }
    }

    /// DFS over the dominator subtree rooted at `root`, following forward
    /// CFG edges and pruning where the callback returns false. The root
    /// itself is visited first.
    pub fn traverse_dominated_blocks(&self, root: NodeId, f: &mut dyn FnMut(NodeId) -> bool) {
        let mut visited = HashSet::new();
        self.traverse_dominated_inner(root, root, f, &mut visited);
    }

    fn traverse_dominated_inner(
        &self,
        root: NodeId,
        node: NodeId,
        f: &mut dyn FnMut(NodeId) -> bool,
        visited: &mut HashSet<NodeId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if !f(node) {
            return;
        }
        for i in 0..self[node].succ.len() {
            let s = self[node].succ[i];
            if self.dominates(root, s) {
                self.traverse_dominated_inner(root, s, f, visited);
            }
        }
    }

    /// Rewrites every edge within `root`'s dominated subtree that pointed
    /// at `from` so it points at `to` instead, keeping terminators in
    /// sync.
    pub fn traverse_dominated_blocks_and_rewrite_branch(
        &mut self,
        root: NodeId,
        from: NodeId,
        to: NodeId,
    ) {
        self.traverse_dominated_blocks_and_rewrite_branch_with(root, from, to, |_, _| true);
    }

    /// As [`Self::traverse_dominated_blocks_and_rewrite_branch`], pruning
    /// the walk (and the rewrite) at nodes failing the predicate.
    pub fn traverse_dominated_blocks_and_rewrite_branch_with(
        &mut self,
        root: NodeId,
        from: NodeId,
        to: NodeId,
        predicate: impl Fn(&NodePool, NodeId) -> bool,
    ) {
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if !predicate(self, node) {
                continue;
            }
            // Only retarget branches that go "down" the CFG; rerouting a
            // node into a block that dominates it would create a cycle.
            if self[node].succ.contains(&from) && !self.dominates(to, node) {
                for s in self.node_mut(node).succ.iter_mut() {
                    if *s == from {
                        *s = to;
                    }
                }
                self.node_mut(from).pred.retain(|&p| p != node);
                if !self[to].pred.contains(&node) {
                    self.node_mut(to).pred.push(node);
                }
                self.node_mut(node).ir.terminator.retarget(from, to);
            }
            for i in 0..self[node].succ.len() {
                let s = self[node].succ[i];
                if self.dominates(root, s) {
                    stack.push(s);
                }
            }
        }
    }

    /// Returns true if a forward path from `start` reaches `end` without
    /// passing through `avoid`.
    pub fn exists_path_in_cfg_without_intermediate_node(
        &self,
        start: NodeId,
        end: NodeId,
        avoid: NodeId,
    ) -> bool {
        let mut visited = HashSet::new();
        self.path_exists_inner(start, end, avoid, &mut visited)
    }

    fn path_exists_inner(
        &self,
        node: NodeId,
        end: NodeId,
        avoid: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> bool {
        if node == avoid {
            return false;
        }
        if node == end {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        self[node]
            .succ
            .iter()
            .any(|&s| self.path_exists_inner(s, end, avoid, visited))
    }

    // --- Dominance frontiers ----------------------------------------------

    /// Recomputes `header`'s dominance frontier: successors of the
    /// dominated subtree that leave it.
    pub fn recompute_dominance_frontier(&mut self, header: NodeId) {
        self.node_mut(header).dominance_frontier.clear();
        let mut traversed = HashSet::new();
        self.frontier_inner(header, header, &mut traversed);
    }

    fn frontier_inner(&mut self, header: NodeId, node: NodeId, traversed: &mut HashSet<NodeId>) {
        if !traversed.insert(node) {
            return;
        }
        for i in 0..self[node].succ.len() {
            let s = self[node].succ[i];
            if self.dominates(header, s) {
                self.frontier_inner(header, s, traversed);
            } else if !self[header].dominance_frontier.contains(&s) {
                self.node_mut(header).dominance_frontier.push(s);
            }
        }
    }

    // --- Post-dominator search ---------------------------------------------

    /// Finds the common post-dominator of `candidates` by advancing the
    /// earliest candidate through its successors until the set converges.
    /// Returns `None` when a candidate reaches a program exit first.
    pub fn find_common_post_dominator(&self, candidates: Vec<NodeId>) -> Option<NodeId> {
        self.find_common_post_dominator_with_ignored_break(candidates, None)
    }

    /// As [`Self::find_common_post_dominator`], skipping `ignored` while
    /// converging so a known break target does not count as a merge point.
    pub fn find_common_post_dominator_with_ignored_break(
        &self,
        candidates: Vec<NodeId>,
        ignored: Option<NodeId>,
    ) -> Option<NodeId> {
        let mut candidates: Vec<NodeId> = {
            let mut dedup = Vec::new();
            for c in candidates {
                if !dedup.contains(&c) {
                    dedup.push(c);
                }
            }
            dedup
        };
        if candidates.is_empty() {
            return None;
        }

        while candidates.len() > 1 {
            // Advance the earliest candidate in program order.
            candidates.sort_by(|a, b| self[*b].visit_order.cmp(&self[*a].visit_order));

            let front = candidates[0];
            if self[front].succ.is_empty() {
                return None;
            }

            let mut next: Vec<NodeId> = Vec::new();
            let add_unique = |n: NodeId, next: &mut Vec<NodeId>| {
                if Some(n) != ignored && !next.contains(&n) {
                    next.push(n);
                }
            };
            for &s in &self[front].succ {
                add_unique(s, &mut next);
            }
            for &c in &candidates[1..] {
                add_unique(c, &mut next);
            }

            if next.is_empty() {
                return None;
            }
            candidates = next;
        }

        candidates.first().copied()
    }
}

impl Index<NodeId> for NodePool {
    type Output = CfgNode;

    fn index(&self, id: NodeId) -> &CfgNode {
        self.node(id)
    }
}

impl IndexMut<NodeId> for NodePool {
    fn index_mut(&mut self, id: NodeId) -> &mut CfgNode {
        self.node_mut(id)
    }
}
