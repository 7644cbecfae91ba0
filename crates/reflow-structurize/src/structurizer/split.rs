//! Merge-scope splitting and helper-block insertion.
//!
//! Structured control allows one construct per merge block. The
//! preliminary pass gives every layer of nested breaks its own ladder
//! target; after pass 0, any block still merging several constructs is
//! split so that inner scopes break to the outer scope through
//! ladder chains, with synthesized boolean phis steering escape paths.

use std::cmp::Ordering;

use indexmap::IndexSet;
use log::{debug, warn};
use reflow_core::{MergeKind, NodeId, Phi, Terminator, ValueSource};

use super::Structurizer;

impl<'a> Structurizer<'a> {
    /// Allocates a block that takes over `node`'s forward predecessors
    /// and branches unconditionally to it. Becomes the new entry if
    /// `node` was the entry.
    pub(crate) fn create_helper_pred_block(&mut self, node: NodeId) -> NodeId {
        let name = format!("{}.pred", self.pool[node].name);
        let pred_node = self.pool.create_named(name);

        // Visit order is fixed up by the next CFG recomputation.
        self.pool[pred_node].visit_order = self.pool[node].visit_order;

        let stolen = std::mem::take(&mut self.pool[node].pred);
        self.pool[pred_node].pred = stolen;

        self.pool[pred_node].immediate_dominator = self.pool[node].immediate_dominator;
        self.pool[node].immediate_dominator = Some(pred_node);

        self.pool.retarget_pred_from(pred_node, node);
        self.pool.add_branch(pred_node, node);

        if node == self.entry {
            self.entry = pred_node;
        }

        self.pool[pred_node].ir.terminator = Terminator::Branch { target: node };
        pred_node
    }

    /// Allocates a block that takes over `node`'s forward successors and
    /// terminator; `node` then branches unconditionally to it. Back-edges
    /// stay on `node`.
    pub(crate) fn create_helper_succ_block(&mut self, node: NodeId) -> NodeId {
        let name = format!("{}.succ", self.pool[node].name);
        let succ_node = self.pool.create_named(name);

        self.pool[succ_node].visit_order = self.pool[node].visit_order;

        let stolen = std::mem::take(&mut self.pool[node].succ);
        self.pool[succ_node].succ = stolen;

        let terminator = std::mem::replace(
            &mut self.pool[node].ir.terminator,
            Terminator::Branch { target: succ_node },
        );
        self.pool[succ_node].ir.terminator = terminator;

        self.pool.retarget_succ_from(succ_node, node);
        self.pool[succ_node].immediate_dominator = Some(node);

        self.pool.add_branch(node, succ_node);
        succ_node
    }

    /// Preliminary pass: set up provisional selection scopes, then give
    /// each nested break layer its own ladder target so pass 0 sees one
    /// header per merge.
    pub(crate) fn split_merge_scopes(&mut self) {
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            if self.pool[node].num_forward_preds() <= 1 {
                continue;
            }
            // The idom is the natural header block.
            let Some(idom) = self.pool[node].immediate_dominator else {
                continue;
            };
            if self.pool[idom].merge == MergeKind::None {
                self.pool[idom].merge = MergeKind::Selection;
                self.pool[idom].selection_merge_block = Some(node);
            }
            self.pool.add_unique_header(node, idom);
        }

        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            if self.pool[node].num_forward_preds() <= 1 {
                continue;
            }
            // Continue blocks can be branched to from any scope; leave
            // them alone.
            if self.pool[node].succ_back_edge.is_some() {
                continue;
            }
            let Some(idom) = self.pool[node].immediate_dominator else {
                continue;
            };
            self.rewrite_selection_breaks(idom, node);
        }
    }

    /// Within `header`'s subtree, every inner branching construct that
    /// breaks to `ladder_to` gets its own ladder block, recursively, so
    /// each layer of a selection "onion" has a named merge target.
    fn rewrite_selection_breaks(&mut self, header: NodeId, ladder_to: NodeId) {
        // Loops and switches own their break semantics.
        if self.pool[header].pred_back_edge.is_some() {
            return;
        }
        if self.pool[header].is_switch {
            return;
        }

        let mut construct = IndexSet::new();
        {
            let pool = &*self.pool;
            let mut nodes = IndexSet::new();
            pool.traverse_dominated_blocks(header, &mut |n| {
                if nodes.insert(n) {
                    if n != header
                        && pool[n].succ.len() >= 2
                        && pool.get_outer_selection_dominator(n) == Some(header)
                    {
                        construct.insert(n);
                    }
                    true
                } else {
                    false
                }
            });
        }

        for index in 0..construct.len() {
            let inner_block = construct[index];
            let name = format!(
                "{}.{}.ladder",
                self.pool[ladder_to].name, self.pool[inner_block].name
            );
            let ladder = self.pool.create_named(name);
            self.pool.add_branch(ladder, ladder_to);
            self.pool[ladder].ir.terminator = Terminator::Branch { target: ladder_to };

            debug!(
                "rewriting branches {} -> {} within {}",
                self.pool[ladder_to].name, self.pool[ladder].name, self.pool[inner_block].name
            );

            // Stop rewriting once we hit the inner construct's own merge.
            let stop = self.pool[inner_block].selection_merge_block;
            self.pool.traverse_dominated_blocks_and_rewrite_branch_with(
                inner_block,
                ladder_to,
                ladder,
                |_, n| stop != Some(n),
            );

            if self.pool[ladder].pred.is_empty() {
                // Nothing broke to this layer; unlink the unused ladder.
                self.pool.remove_branch(ladder, ladder_to);
            } else {
                self.rewrite_selection_breaks(inner_block, ladder);
            }
        }
    }

    /// Splits every block that is still the merge target of more than one
    /// construct. Scopes are handled innermost-out; each inner scope's
    /// breaks are rerouted to the outer scope's ladder or merge.
    pub(crate) fn split_merge_blocks(&mut self, values: &mut dyn ValueSource) {
        for index in 0..self.post_visit_order.len() {
            let mut node = self.post_visit_order[index];
            if self.pool[node].headers.len() <= 1 {
                continue;
            }

            // Sort headers outer-first; nested scopes sort by dominance.
            let mut headers = std::mem::take(&mut self.pool[node].headers);
            headers.sort_by(|&a, &b| {
                if a == b {
                    Ordering::Equal
                } else if self.pool.dominates(a, b) {
                    Ordering::Less
                } else if self.pool.dominates(b, a) {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            });
            for i in 1..headers.len() {
                if !self.pool.dominates(headers[i - 1], headers[i]) {
                    warn!("merge scopes for {} are not nested", self.pool[node].name);
                }
            }
            if self.pool[headers[0]].loop_ladder_block.is_some() {
                debug!(
                    "outer loop header of {} needs a ladder break",
                    self.pool[node].name
                );
            }
            self.pool[node].headers = headers;

            let mut full_break_target: Option<NodeId> = None;

            let mut i = self.pool[node].headers.len() - 1;
            while i > 0 {
                let headers = self.pool[node].headers.clone();
                let header = headers[i];

                // Innermost enclosing loop header to break to.
                let mut target_header = None;
                for j in (0..i).rev() {
                    if self.pool[headers[j]].merge == MergeKind::Loop {
                        target_header = Some(headers[j]);
                        break;
                    }
                }

                match self.pool[header].merge {
                    MergeKind::Loop => {
                        if let Some(loop_ladder) = self.pool[header].loop_ladder_block {
                            if let Some(target) = target_header {
                                self.split_loop_ladder(node, header, loop_ladder, target, values);
                            } else if self.pool[loop_ladder].succ.len() == 1
                                && self.pool[loop_ladder].succ[0] == node
                            {
                                self.split_trivial_selection_break(loop_ladder, values);
                            } else if let Some(fbt) = full_break_target {
                                self.pool
                                    .traverse_dominated_blocks_and_rewrite_branch(header, node, fbt);
                            } else {
                                node = self.install_full_break_target(
                                    node,
                                    header,
                                    &mut full_break_target,
                                );
                            }
                        } else {
                            debug!("no loop ladder candidate for {}", self.pool[header].name);
                        }
                    }
                    MergeKind::Selection => {
                        if let Some(target) = target_header {
                            // Break out to the nearest outer loop scope.
                            if let Some(ladder) = self.pool[target].loop_ladder_block {
                                self.pool
                                    .traverse_dominated_blocks_and_rewrite_branch(header, node, ladder);
                            } else if let Some(merge) = self.pool[target].loop_merge_block {
                                self.pool
                                    .traverse_dominated_blocks_and_rewrite_branch(header, node, merge);
                            } else {
                                warn!("loop header {} has no merge block", self.pool[target].name);
                            }
                        } else if let Some(fbt) = full_break_target {
                            self.pool
                                .traverse_dominated_blocks_and_rewrite_branch(header, node, fbt);
                        } else {
                            node =
                                self.install_full_break_target(node, header, &mut full_break_target);
                        }
                    }
                    MergeKind::None => {
                        warn!("invalid merge type on header {}", self.pool[header].name);
                    }
                }

                i -= 1;
            }
        }
    }

    /// The ladder block before the old merge: a boolean phi records
    /// whether we arrived on the normal merge path or through an escape;
    /// escapes break on to the outer scope.
    fn split_loop_ladder(
        &mut self,
        node: NodeId,
        header: NodeId,
        loop_ladder: NodeId,
        target_header: NodeId,
        values: &mut dyn ValueSource,
    ) {
        let ladder = self.create_helper_pred_block(loop_ladder);
        self.pool[ladder].is_ladder = true;

        let normal_preds: IndexSet<NodeId> = self.pool[ladder]
            .pred
            .iter()
            .copied()
            .filter(|&p| !self.pool[p].is_ladder)
            .collect();

        // Escape branches merge to the ladder instead.
        self.pool
            .traverse_dominated_blocks_and_rewrite_branch(header, node, ladder);

        let condition = values.allocate_id();
        let mut phi = Phi::new(condition, values.bool_type());
        for k in 0..self.pool[ladder].pred.len() {
            let pred = self.pool[ladder].pred[k];
            let value = values.bool_constant(!normal_preds.contains(&pred));
            phi.add_incoming(pred, value);
        }
        self.pool[ladder].ir.phi.push(phi);

        let break_target = self.pool[target_header]
            .loop_ladder_block
            .or(self.pool[target_header].loop_merge_block);
        match break_target {
            Some(target) => {
                self.pool[ladder].ir.terminator = Terminator::Condition {
                    condition,
                    true_target: target,
                    false_target: loop_ladder,
                };
                self.pool.add_branch(ladder, target);
            }
            None => warn!(
                "loop header {} has no merge block",
                self.pool[target_header].name
            ),
        }
    }

    /// Trivial break out of a selection construct: the ladder becomes a
    /// diamond (pre -> {merge, post}) steered by a boolean phi.
    fn split_trivial_selection_break(&mut self, loop_ladder: NodeId, values: &mut dyn ValueSource) {
        let ladder_pre = self.create_helper_pred_block(loop_ladder);
        let ladder_post = self.create_helper_succ_block(loop_ladder);
        self.pool.add_branch(ladder_pre, ladder_post);

        let condition = values.allocate_id();
        self.pool[ladder_pre].ir.terminator = Terminator::Condition {
            condition,
            true_target: ladder_post,
            false_target: loop_ladder,
        };
        self.pool[ladder_pre].is_ladder = true;

        let mut phi = Phi::new(condition, values.bool_type());
        for k in 0..self.pool[ladder_pre].pred.len() {
            let pred = self.pool[ladder_pre].pred[k];
            let value = values.bool_constant(self.pool[pred].is_ladder);
            phi.add_incoming(pred, value);
        }
        self.pool[ladder_pre].ir.phi.push(phi);
    }

    /// Last resort: wrap the shared merge in a synthesized loop so that
    /// every inner break becomes a well-formed loop break to the old
    /// block, while normal paths merge at its new predecessor.
    fn install_full_break_target(
        &mut self,
        node: NodeId,
        header: NodeId,
        full_break_target: &mut Option<NodeId>,
    ) -> NodeId {
        let new_selection_merge = self.create_helper_pred_block(node);
        let headers = self.pool[node].headers.clone();
        self.pool[new_selection_merge].headers = headers.clone();

        *full_break_target = Some(node);

        let outer = headers[0];
        let loop_node = self.create_helper_pred_block(outer);

        if self.pool[outer].merge != MergeKind::Selection {
            warn!("expected a selection header on {}", self.pool[outer].name);
        }
        self.pool[outer].selection_merge_block = Some(new_selection_merge);
        self.pool[node].headers[0] = loop_node;

        self.pool[loop_node].merge = MergeKind::Loop;
        self.pool[loop_node].loop_merge_block = Some(node);
        self.pool[loop_node].freeze_structured_analysis = true;

        self.pool
            .traverse_dominated_blocks_and_rewrite_branch(header, new_selection_merge, node);
        new_selection_merge
    }
}
