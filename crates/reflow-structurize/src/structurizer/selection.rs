//! Selection and switch merge discovery, plus the second-phase fixup for
//! two-way branches left without a merge.
//!
//! Join points (nodes with two or more forward predecessors) designate
//! their immediate dominator as a selection header. Conflicts with loop
//! headers are resolved by splitting header roles across helper blocks.
//! The fixup pass then handles branches where one side breaks out of the
//! construct, using post-dominance and escape analysis.

use std::collections::HashSet;

use log::{debug, warn};
use reflow_core::{MergeKind, NodeId, Terminator};

use super::Structurizer;

impl<'a> Structurizer<'a> {
    pub(crate) fn merge_to_succ(&mut self, node: NodeId, index: usize) {
        let succ = self.pool[node].succ[index];
        self.pool.add_unique_header(succ, node);
        self.pool[node].selection_merge_block = Some(succ);
        self.pool[node].merge = MergeKind::Selection;
        debug!(
            "fixup selection merge {} -> {}",
            self.pool[node].name, self.pool[succ].name
        );
    }

    /// True iff control leaving `node`'s construct reaches `merge` through
    /// a block the header does not dominate, or branches to `merge`
    /// directly.
    pub(crate) fn control_flow_is_escaping(
        &self,
        header: NodeId,
        node: NodeId,
        merge: NodeId,
    ) -> bool {
        let mut visited = HashSet::new();
        self.escaping_inner(header, node, merge, &mut visited)
    }

    fn escaping_inner(
        &self,
        header: NodeId,
        node: NodeId,
        merge: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> bool {
        if node == merge {
            return false;
        }
        // Loop exits from a continue block are not breaks.
        if self.pool[node].succ_back_edge.is_some() {
            return false;
        }
        if !visited.insert(node) {
            return false;
        }

        for i in 0..self.pool[node].succ.len() {
            let succ = self.pool[node].succ[i];
            if succ == merge {
                return true;
            }
            if self.pool.dominates(header, succ)
                && self.escaping_inner(header, succ, merge, visited)
            {
                return true;
            }
        }
        false
    }

    /// Assigns selection merges to switch blocks: the common
    /// post-dominator of the cases, or the dominated convergence point
    /// when some case escapes.
    pub(crate) fn find_switch_blocks(&mut self) {
        for index in (0..self.post_visit_order.len()).rev() {
            let node = self.post_visit_order[index];
            if !self.pool[node].is_switch {
                continue;
            }

            let succs = self.pool[node].succ.clone();
            let Some(merge) = self.pool.find_common_post_dominator(succs.clone()) else {
                warn!(
                    "cannot find a merge target for switch {}",
                    self.pool[node].name
                );
                continue;
            };

            if self.pool.dominates(node, merge) {
                debug!(
                    "switch merge: {} -> {}",
                    self.pool[node].name, self.pool[merge].name
                );
                self.pool[node].merge = MergeKind::Selection;
                self.pool[node].selection_merge_block = Some(merge);
                self.pool.add_unique_header(merge, node);
            } else {
                // Some case is escaping; find a post-dominator while
                // ignoring the break target.
                let dominated_merge_target = self
                    .pool
                    .find_common_post_dominator_with_ignored_break(succs, Some(merge));
                if let Some(dominated_merge_target) = dominated_merge_target {
                    if self.pool.dominates(node, dominated_merge_target) {
                        self.pool[node].merge = MergeKind::Selection;
                        self.pool[node].selection_merge_block = Some(merge);
                        self.pool.add_unique_header(dominated_merge_target, node);
                        self.pool.add_unique_header(merge, node);
                    }
                }
            }
        }
    }

    /// Join points designate their immediate dominator a selection
    /// header; loop headers that double as selection headers get split.
    pub(crate) fn find_selection_merges(&mut self, pass: u32) {
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            if self.pool[node].num_forward_preds() <= 1 {
                continue;
            }

            let Some(mut idom) = self.pool[node].immediate_dominator else {
                continue;
            };

            // Switch case fall-through is not a merge scenario.
            if let Some(inner_header) = self.pool.get_outer_selection_dominator(node) {
                if self.pool[inner_header].is_switch {
                    if self.pool[inner_header].selection_merge_block == Some(node) {
                        // Already handled as the switch merge.
                        continue;
                    }
                    if self.pool[inner_header].succ.contains(&node) {
                        // Fall-through.
                        continue;
                    }
                }
            }

            // A loop header already associated with this block acts as the
            // natural header.
            for i in 0..self.pool[node].headers.len() {
                let header = self.pool[node].headers[i];
                if self.pool[header].visit_order > self.pool[idom].visit_order {
                    idom = header;
                }
            }

            match self.pool[idom].merge {
                MergeKind::None | MergeKind::Selection => {
                    if self.pool[idom].is_switch {
                        continue;
                    }

                    if self.pool[idom].merge == MergeKind::Selection {
                        // An earlier pass mistook a break target for this
                        // header's selection merge. Rebuild the header as
                        // a loop and hang the new selection off a helper
                        // successor.
                        if pass == 0 {
                            self.pool[idom].merge = MergeKind::Loop;
                            let old_merge = self.pool[idom].selection_merge_block.take();
                            self.pool[idom].loop_merge_block = old_merge;
                            self.pool[idom].freeze_structured_analysis = true;
                            idom = self.create_helper_succ_block(idom);
                        } else {
                            warn!(
                                "mismatched selection headers for {} in pass 1",
                                self.pool[node].name
                            );
                        }
                    }

                    self.pool[idom].merge = MergeKind::Selection;
                    self.pool.add_unique_header(node, idom);
                    self.pool[idom].selection_merge_block = Some(node);
                    debug!(
                        "selection merge: {} -> {}",
                        self.pool[idom].name, self.pool[node].name
                    );
                }
                MergeKind::Loop => {
                    if self.pool[idom].loop_merge_block == Some(node)
                        && self.pool[idom].loop_ladder_block.is_some()
                    {
                        // The loop will ladder-break to this node; wrap
                        // the header in an outer shell that owns the
                        // merge.
                        let loop_node = self.create_helper_pred_block(idom);
                        self.pool[loop_node].merge = MergeKind::Loop;
                        self.pool[loop_node].loop_merge_block = Some(node);
                        self.pool[loop_node].freeze_structured_analysis = true;
                        self.pool.add_unique_header(node, loop_node);
                        debug!(
                            "loop merge: {} -> {}",
                            self.pool[loop_node].name, self.pool[node].name
                        );
                    } else if self.pool[idom].loop_merge_block != Some(node) {
                        // Split loop-header and selection-header roles so
                        // the selection can merge here.
                        let selection_idom = self.create_helper_succ_block(idom);
                        self.pool[selection_idom].merge = MergeKind::Selection;
                        self.pool[selection_idom].selection_merge_block = Some(node);
                        self.pool.add_unique_header(node, selection_idom);
                        debug!(
                            "selection merge: {} -> {}",
                            self.pool[selection_idom].name, self.pool[node].name
                        );
                    }
                }
            }
        }
    }

    /// Second-phase fixup: two-way branches with no assigned merge,
    /// typically where one path breaks and one path merges.
    pub(crate) fn fixup_broken_selection_merges(&mut self, pass: u32) {
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            if self.pool[node].succ.len() != 2 {
                continue;
            }
            if self.pool[node].merge != MergeKind::None {
                continue;
            }
            // A continue block never merges execution.
            if self.pool[node].succ_back_edge.is_some() {
                continue;
            }

            let succ_a = self.pool[node].succ[0];
            let succ_b = self.pool[node].succ[1];
            let dominates_a = self.pool.dominates(node, succ_a);
            let dominates_b = self.pool.dominates(node, succ_b);
            let a_has_header = !self.pool[succ_a].headers.is_empty();
            let b_has_header = !self.pool[succ_b].headers.is_empty();

            if dominates_a && !dominates_b && !a_has_header {
                // B is a direct break or continue target.
                self.merge_to_succ(node, 0);
            } else if dominates_b && !dominates_a && !b_has_header {
                self.merge_to_succ(node, 1);
            } else if dominates_a && dominates_b && !a_has_header && b_has_header {
                // One path hits a continue block, the other a ladder
                // merge block.
                self.merge_to_succ(node, 0);
            } else if dominates_a && dominates_b && a_has_header && !b_has_header {
                self.merge_to_succ(node, 1);
            } else if dominates_a && dominates_b && !a_has_header && !b_has_header {
                self.fixup_both_dominated(node, succ_a, succ_b, pass);
            } else if pass == 0 {
                // No obvious merge target; pick the post-dominator so the
                // first pass can set up ladders for any escape.
                if let Some(merge) = self.pool.find_common_post_dominator(vec![succ_a, succ_b]) {
                    let inner_header = self.pool.get_outer_header_dominator(node);
                    let conditional_switch_break = inner_header.is_some_and(|h| {
                        self.pool[h].merge == MergeKind::Selection
                            && self.pool[h].selection_merge_block == Some(merge)
                    });

                    if !conditional_switch_break {
                        self.pool[node].selection_merge_block = Some(merge);
                        self.pool[node].merge = MergeKind::Selection;
                        self.pool.add_unique_header(merge, node);
                        debug!(
                            "merging {} -> {}",
                            self.pool[node].name, self.pool[merge].name
                        );
                    }
                } else {
                    warn!(
                        "cannot find a merge target for block {}",
                        self.pool[node].name
                    );
                }
            }
        }
    }

    fn fixup_both_dominated(&mut self, node: NodeId, succ_a: NodeId, succ_b: NodeId, pass: u32) {
        // Execution can reconvene on either side; figure out where. A
        // break inside a selection construct means the merge block is not
        // dominated and gets fixed with ladders in pass 0.
        match self.pool.find_common_post_dominator(vec![succ_a, succ_b]) {
            Some(merge) => {
                let dominates_merge = self.pool.dominates(node, merge);
                let merges_to_continue = self.pool[merge].succ_back_edge.is_some();

                if dominates_merge && !self.pool[merge].headers.is_empty() {
                    // One side likely does a clean break out of a loop
                    // while the other merges normally.
                    let a_breaks = self.control_flow_is_escaping(node, succ_a, merge);
                    let b_breaks = self.control_flow_is_escaping(node, succ_b, merge);
                    if a_breaks && b_breaks {
                        self.synthesize_unreachable_merge(node);
                    } else if b_breaks {
                        self.merge_to_succ(node, 0);
                    } else {
                        self.merge_to_succ(node, 1);
                    }
                } else if !merges_to_continue
                    && (self.pool[merge].headers.is_empty() || pass == 0)
                {
                    // Register the merge target where we want it; pass 0
                    // will split blocks as needed.
                    self.pool[node].selection_merge_block = Some(merge);
                    self.pool[node].merge = MergeKind::Selection;
                    self.pool.add_unique_header(merge, node);
                    debug!(
                        "merging {} -> {}",
                        self.pool[node].name, self.pool[merge].name
                    );
                } else {
                    let a_breaks = self.control_flow_is_escaping(node, succ_a, merge);
                    let b_breaks = self.control_flow_is_escaping(node, succ_b, merge);
                    if a_breaks && b_breaks {
                        self.synthesize_unreachable_merge(node);
                    } else if b_breaks {
                        self.merge_to_succ(node, 0);
                    } else {
                        self.merge_to_succ(node, 1);
                    }
                }
            }
            None => {
                // One side of the branch took an exit.
                let a_dominates_exit = self.pool.dominates_all_reachable_exits(succ_a);
                let b_dominates_exit = self.pool.dominates_all_reachable_exits(succ_b);
                if !a_dominates_exit && b_dominates_exit {
                    self.merge_to_succ(node, 0);
                } else if !b_dominates_exit && a_dominates_exit {
                    self.merge_to_succ(node, 1);
                } else {
                    // Both paths lead to an exit; there is nothing to
                    // merge.
                    self.synthesize_unreachable_merge(node);
                }
            }
        }
    }

    fn synthesize_unreachable_merge(&mut self, node: NodeId) {
        let name = format!("{}.unreachable", self.pool[node].name);
        let dummy = self.pool.create_named(name);
        self.pool[dummy].ir.terminator = Terminator::Unreachable;
        self.pool[node].merge = MergeKind::Selection;
        self.pool[node].selection_merge_block = Some(dummy);
        debug!("merging {} -> unreachable", self.pool[node].name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::NodePool;

    fn branch(pool: &mut NodePool, from: NodeId, to: NodeId) {
        pool.add_branch(from, to);
        pool[from].ir.terminator = Terminator::Branch { target: to };
    }

    fn condition(pool: &mut NodePool, from: NodeId, t: NodeId, f: NodeId) {
        pool.add_branch(from, t);
        pool.add_branch(from, f);
        pool[from].ir.terminator = Terminator::Condition {
            condition: 1,
            true_target: t,
            false_target: f,
        };
    }

    #[test]
    fn test_diamond_selection_merge() {
        let mut pool = NodePool::new();
        let entry = pool.create_named("entry");
        let a = pool.create_named("a");
        let b = pool.create_named("b");
        let m = pool.create_named("m");
        condition(&mut pool, entry, a, b);
        branch(&mut pool, a, m);
        branch(&mut pool, b, m);
        pool[m].ir.terminator = Terminator::Return;

        let mut s = Structurizer::new(&mut pool, entry);
        s.recompute_cfg().unwrap();
        s.find_selection_merges(0);

        assert_eq!(pool[entry].merge, MergeKind::Selection);
        assert_eq!(pool[entry].selection_merge_block, Some(m));
        assert_eq!(pool[m].headers, vec![entry]);
    }

    #[test]
    fn test_switch_merge() {
        // entry switches to three cases which all join at m.
        let mut pool = NodePool::new();
        let entry = pool.create_named("entry");
        let c0 = pool.create_named("c0");
        let c1 = pool.create_named("c1");
        let c2 = pool.create_named("c2");
        let m = pool.create_named("m");
        pool.add_branch(entry, c0);
        pool.add_branch(entry, c1);
        pool.add_branch(entry, c2);
        pool[entry].ir.terminator = Terminator::Switch {
            selector: 1,
            cases: vec![
                reflow_core::SwitchCase { value: 0, target: c0 },
                reflow_core::SwitchCase { value: 1, target: c1 },
            ],
            default_target: c2,
        };
        branch(&mut pool, c0, m);
        branch(&mut pool, c1, m);
        branch(&mut pool, c2, m);
        pool[m].ir.terminator = Terminator::Return;

        let mut s = Structurizer::new(&mut pool, entry);
        s.recompute_cfg().unwrap();
        s.find_switch_blocks();

        assert_eq!(pool[entry].merge, MergeKind::Selection);
        assert_eq!(pool[entry].selection_merge_block, Some(m));
        assert_eq!(pool[m].headers, vec![entry]);
    }

    #[test]
    fn test_fixup_merges_dominated_side() {
        // n dominates a; b is an outside break target.
        //   entry -> {n, b}; n -> {a, b}; a -> m; b -> m
        let mut pool = NodePool::new();
        let entry = pool.create_named("entry");
        let n = pool.create_named("n");
        let a = pool.create_named("a");
        let b = pool.create_named("b");
        let m = pool.create_named("m");
        condition(&mut pool, entry, n, b);
        condition(&mut pool, n, a, b);
        branch(&mut pool, a, m);
        branch(&mut pool, b, m);
        pool[m].ir.terminator = Terminator::Return;

        let mut s = Structurizer::new(&mut pool, entry);
        s.recompute_cfg().unwrap();
        s.fixup_broken_selection_merges(1);

        assert_eq!(pool[n].merge, MergeKind::Selection);
        assert_eq!(pool[n].selection_merge_block, Some(a));
    }

    #[test]
    fn test_fixup_synthesizes_unreachable_for_two_returns() {
        // Both sides of n return; there is no reconvergence point.
        let mut pool = NodePool::new();
        let entry = pool.create_named("entry");
        let a = pool.create_named("a");
        let b = pool.create_named("b");
        condition(&mut pool, entry, a, b);
        pool[a].ir.terminator = Terminator::Return;
        pool[b].ir.terminator = Terminator::Return;

        let before = pool.len();
        let mut s = Structurizer::new(&mut pool, entry);
        s.recompute_cfg().unwrap();
        s.fixup_broken_selection_merges(1);

        assert_eq!(pool[entry].merge, MergeKind::Selection);
        let merge = pool[entry].selection_merge_block.unwrap();
        assert_eq!(pool.len(), before + 1);
        assert_eq!(pool[merge].ir.terminator, Terminator::Unreachable);
        assert!(pool[merge].pred.is_empty());
    }

    #[test]
    fn test_escape_analysis() {
        // header -> {x, m}; x -> m is a direct break to the merge.
        let mut pool = NodePool::new();
        let entry = pool.create_named("entry");
        let header = pool.create_named("header");
        let x = pool.create_named("x");
        let m = pool.create_named("m");
        branch(&mut pool, entry, header);
        condition(&mut pool, header, x, m);
        branch(&mut pool, x, m);
        pool[m].ir.terminator = Terminator::Return;

        let mut s = Structurizer::new(&mut pool, entry);
        s.recompute_cfg().unwrap();

        assert!(s.control_flow_is_escaping(header, x, m));
        assert!(!s.control_flow_is_escaping(header, m, m));
    }
}
