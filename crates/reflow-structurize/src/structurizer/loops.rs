//! Loop discovery and loop-merge selection.
//!
//! Every node with an incoming back-edge is a natural-loop header. The
//! loop body is recovered by back-tracing from the back-edge source; the
//! successors leaving the body are the loop exits, classified against the
//! header to decide which block (if any) can serve as the loop merge and
//! whether escape paths will need a ladder.

use indexmap::IndexSet;
use log::{debug, warn};
use reflow_core::{MergeKind, NodeId, NodePool};

use super::Structurizer;

/// Classification of a loop exit against its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExitType {
    /// The header owns the exit and every path from it leads out of the
    /// program.
    Exit,
    /// An inner nested loop owns this exit.
    InnerLoopExit,
    /// The header dominates the exit and can structurally merge to it.
    Merge,
    /// The header dominates the exit but an inner loop claims it first.
    InnerLoopMerge,
    /// The header does not own the exit; a multi-level break.
    Escape,
}

/// Collects the loop body by walking predecessor chains from the
/// back-edge source up to the header.
fn trace_to_parent(pool: &NodePool, header: NodeId, block: NodeId, traced: &mut IndexSet<NodeId>) {
    if block == header {
        traced.insert(block);
        return;
    }
    if traced.insert(block) {
        for i in 0..pool[block].pred.len() {
            trace_to_parent(pool, header, pool[block].pred[i], traced);
        }
    }
}

/// Walks forward from the header, restricted to the traced body; any
/// successor outside the body is a loop exit.
fn trace_exits(
    pool: &NodePool,
    body: &IndexSet<NodeId>,
    node: NodeId,
    exits: &mut IndexSet<NodeId>,
    traced: &mut IndexSet<NodeId>,
) {
    if !body.contains(&node) {
        exits.insert(node);
        return;
    }
    for i in 0..pool[node].succ.len() {
        let succ = pool[node].succ[i];
        if traced.insert(succ) {
            trace_exits(pool, body, succ, exits, traced);
        }
    }
}

impl<'a> Structurizer<'a> {
    fn get_loop_exit_type(&self, header: NodeId, node: NodeId) -> LoopExitType {
        let is_innermost = self.pool.is_innermost_loop_header_for(header, node);

        if self.pool.dominates(header, node) && self.pool.dominates_all_reachable_exits(node) {
            return if is_innermost {
                LoopExitType::Exit
            } else {
                LoopExitType::InnerLoopExit
            };
        }

        if self.pool.dominates(header, node) {
            if is_innermost {
                // Even a dominated exit may sit inside a foreign construct.
                if !self.pool.can_loop_merge_to(header, node) {
                    return LoopExitType::Escape;
                }
                LoopExitType::Merge
            } else {
                LoopExitType::InnerLoopMerge
            }
        } else {
            LoopExitType::Escape
        }
    }

    /// Finds loop headers in reverse post-order (outer loops first) and
    /// chooses their merge blocks.
    pub(crate) fn find_loops(&mut self) {
        for index in (0..self.post_visit_order.len()).rev() {
            let node = self.post_visit_order[index];

            if self.pool[node].freeze_structured_analysis
                && self.pool[node].merge == MergeKind::Loop
            {
                // Pre-created ladder-break loop; just re-register the
                // header on its merge block.
                if let Some(merge) = self.pool[node].loop_merge_block {
                    self.pool.add_unique_header(merge, node);
                }
                continue;
            }

            if !self.pool[node].has_pred_back_edges() {
                continue;
            }

            self.pool[node].merge = MergeKind::Loop;

            // The CFG is reducible, so the header dominates the back-edge
            // source; the pred chain from it delimits the natural loop.
            let back_edge_source = self.pool[node].pred_back_edge.unwrap_or(node);
            let mut body = IndexSet::new();
            trace_to_parent(self.pool, node, back_edge_source, &mut body);

            let mut exits = IndexSet::new();
            let mut traced = IndexSet::new();
            trace_exits(self.pool, &body, node, &mut exits, &mut traced);

            let mut direct_exits = Vec::new();
            let mut dominated_exit = Vec::new();
            let mut inner_dominated_exit = Vec::new();
            let mut non_dominated_exit = Vec::new();

            for &exit in &exits {
                match self.get_loop_exit_type(node, exit) {
                    LoopExitType::Exit => direct_exits.push(exit),
                    // Not an exit for us, but for the inner loop.
                    LoopExitType::InnerLoopExit => {}
                    LoopExitType::Merge => dominated_exit.push(exit),
                    LoopExitType::InnerLoopMerge => inner_dominated_exit.push(exit),
                    LoopExitType::Escape => non_dominated_exit.push(exit),
                }
            }

            // A single direct exit doubles as the merge candidate.
            if direct_exits.len() == 1 && dominated_exit.is_empty() && non_dominated_exit.is_empty()
            {
                if self.pool.dominates(node, direct_exits[0]) {
                    std::mem::swap(&mut dominated_exit, &mut direct_exits);
                } else {
                    std::mem::swap(&mut non_dominated_exit, &mut direct_exits);
                }
            }

            if dominated_exit.len() >= 2 {
                // Several clean break blocks may share a post-dominator
                // which can act as the one merge block.
                if let Some(post_dom) = self.pool.find_common_post_dominator(dominated_exit.clone())
                {
                    if dominated_exit.contains(&post_dom) {
                        dominated_exit.clear();
                        dominated_exit.push(post_dom);
                    }
                }
            }

            if direct_exits.is_empty()
                && dominated_exit.is_empty()
                && non_dominated_exit.is_empty()
                && inner_dominated_exit.is_empty()
            {
                // Infinite loop. The emission driver will synthesize an
                // unreachable merge block.
                self.pool[node].loop_merge_block = None;
                debug!("loop without merge: {}", self.pool[node].name);
            } else if direct_exits.is_empty()
                && dominated_exit.len() == 1
                && non_dominated_exit.is_empty()
                && inner_dominated_exit.is_empty()
            {
                let merge = dominated_exit[0];
                self.pool[node].loop_merge_block = Some(merge);
                self.pool.add_unique_header(merge, node);
                debug!(
                    "loop with simple merge: {} -> {}",
                    self.pool[node].name, self.pool[merge].name
                );
            } else if direct_exits.is_empty()
                && dominated_exit.is_empty()
                && inner_dominated_exit.is_empty()
                && non_dominated_exit.len() == 1
            {
                // Unique escape; ladder workarounds happen downstream.
                let merge = non_dominated_exit[0];
                self.pool[node].loop_merge_block = Some(merge);
                self.pool.add_unique_header(merge, node);
                debug!(
                    "loop with ladder merge: {} -> {}",
                    self.pool[node].name, self.pool[merge].name
                );
            } else {
                // Multiple merge candidates; the merge is the common
                // post-dominator of all exits.
                let mut merges = Vec::with_capacity(
                    direct_exits.len()
                        + inner_dominated_exit.len()
                        + dominated_exit.len()
                        + non_dominated_exit.len(),
                );
                merges.extend_from_slice(&direct_exits);
                merges.extend_from_slice(&inner_dominated_exit);
                merges.extend_from_slice(&dominated_exit);
                merges.extend_from_slice(&non_dominated_exit);
                let merge = self.pool.find_common_post_dominator(merges);

                let mut dominated_merge = if dominated_exit.len() > 1 {
                    // Dominated exits that still escape are break blocks,
                    // not merge candidates.
                    let non_breaking: Vec<NodeId> = dominated_exit
                        .iter()
                        .copied()
                        .filter(|&exit| match merge {
                            Some(m) => !self.control_flow_is_escaping(node, exit, m),
                            None => true,
                        })
                        .collect();
                    self.pool.find_common_post_dominator(non_breaking)
                } else {
                    self.pool.find_common_post_dominator(dominated_exit.clone())
                };

                if dominated_merge.is_none() {
                    debug!("no candidate for ladder merging");
                }
                if let Some(dm) = dominated_merge {
                    if !self.pool.dominates(node, dm) {
                        debug!(
                            "loop header {} does not dominate ladder candidate {}",
                            self.pool[node].name, self.pool[dm].name
                        );
                        dominated_merge = None;
                    }
                }

                match merge {
                    None => warn!(
                        "failed to find a common merge point for loop header {}",
                        self.pool[node].name
                    ),
                    Some(merge) => {
                        self.pool[node].loop_merge_block = Some(merge);
                        self.pool.add_unique_header(merge, node);

                        if self.pool.can_loop_merge_to(node, merge) {
                            debug!(
                                "loop with simple multi-exit merge: {} -> {}",
                                self.pool[node].name, self.pool[merge].name
                            );
                        } else {
                            debug!(
                                "loop with ladder multi-exit merge: {} -> {}",
                                self.pool[node].name, self.pool[merge].name
                            );
                            // The break staging point for escape paths.
                            self.pool[node].loop_ladder_block = dominated_merge;
                        }
                    }
                }
            }
        }
    }
}
