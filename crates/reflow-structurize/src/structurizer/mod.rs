//! CFG structurization driver.
//!
//! The pipeline runs over a [`NodePool`] shared with the IR loader:
//!
//! 1. Recompute the CFG (post-order traversal, back-edge extraction,
//!    immediate dominators).
//! 2. Split preliminary merge scopes so nested breaks get their own
//!    ladder targets.
//! 3. Structurize pass 0: loops, switches, selections, fixup, then split
//!    merge blocks shared by several constructs.
//! 4. Recompute and structurize pass 1 over the stabilized graph.
//! 5. Repair phi nodes whose predecessors were rewritten.
//! 6. Validate; emission is driven separately through [`BlockSink`].
//!
//! Pass 0 inserts helper blocks and changes dominance, which is why the
//! analysis runs twice.

mod emit;
mod loops;
mod phi;
mod selection;
mod split;
mod validate;

pub use emit::BlockSink;
pub use validate::ValidationIssue;

use log::debug;
use reflow_core::{MergeKind, NodeId, NodePool, ValueSource};

use crate::error::Error;

/// The CFG structurizer.
///
/// Borrows the node pool for the duration of the run; the entry node may
/// be replaced by a helper block, so callers must read it back through
/// [`Structurizer::entry_block`] afterwards.
pub struct Structurizer<'a> {
    pool: &'a mut NodePool,
    entry: NodeId,
    post_visit_order: Vec<NodeId>,
}

impl<'a> Structurizer<'a> {
    /// Creates a structurizer over `pool` rooted at `entry`.
    pub fn new(pool: &'a mut NodePool, entry: NodeId) -> Self {
        Self {
            pool,
            entry,
            post_visit_order: Vec::new(),
        }
    }

    /// The current entry node.
    pub fn entry_block(&self) -> NodeId {
        self.entry
    }

    /// Runs the full structurization pipeline.
    ///
    /// `values` supplies fresh ids and boolean constants for the phi
    /// conditions synthesized in ladder blocks. Validation findings are
    /// logged and can be re-collected with
    /// [`Structurizer::validate_structured`]; they do not fail the run.
    pub fn run(&mut self, values: &mut dyn ValueSource) -> Result<(), Error> {
        self.recompute_cfg()?;

        self.split_merge_scopes();
        self.recompute_cfg()?;

        debug!("structurize pass 0");
        self.structurize(0, values);

        self.recompute_cfg()?;

        debug!("structurize pass 1");
        self.structurize(1, values);

        self.insert_phi();
        self.validate_structured();
        Ok(())
    }

    fn structurize(&mut self, pass: u32, values: &mut dyn ValueSource) {
        self.find_loops();
        self.find_switch_blocks();
        self.find_selection_merges(pass);
        self.fixup_broken_selection_merges(pass);
        if pass == 0 {
            self.split_merge_blocks(values);
        }
    }

    // --- Traversal and dominators ------------------------------------------

    /// Clears per-node analysis state and re-inserts extracted back-edges
    /// so the next traversal sees the true CFG. Merge annotations survive
    /// on nodes marked `freeze_structured_analysis`.
    fn reset_traversal(&mut self) {
        self.post_visit_order.clear();
        for i in 0..self.pool.len() {
            let node = self.pool.node_mut(NodeId::new(i as u32));
            node.visited = false;
            node.traversing = false;
            node.immediate_dominator = None;

            if !node.freeze_structured_analysis {
                node.headers.clear();
                node.merge = MergeKind::None;
                node.loop_merge_block = None;
                node.loop_ladder_block = None;
                node.selection_merge_block = None;
            }

            if let Some(back) = node.succ_back_edge.take() {
                if !node.succ.contains(&back) {
                    node.succ.push(back);
                }
            }
            if let Some(back) = node.pred_back_edge.take() {
                if !node.pred.contains(&back) {
                    node.pred.push(back);
                }
            }
        }
    }

    /// Post-order DFS. Edges to a node on the traversal stack are
    /// classified as back-edges and moved out of the forward lists; a
    /// second back-edge in either direction means the CFG is irreducible.
    fn visit(&mut self, node: NodeId) -> Result<(), Error> {
        self.pool[node].visited = true;
        self.pool[node].traversing = true;

        for i in 0..self.pool[node].succ.len() {
            let succ = self.pool[node].succ[i];
            if self.pool[succ].traversing {
                if self.pool[node]
                    .succ_back_edge
                    .is_some_and(|back| back != succ)
                {
                    return Err(Error::IrreducibleSuccBackEdge {
                        node: self.pool[node].name.clone(),
                    });
                }
                self.pool[node].succ_back_edge = Some(succ);

                if self.pool[succ]
                    .pred_back_edge
                    .is_some_and(|back| back != node)
                {
                    return Err(Error::IrreduciblePredBackEdge {
                        node: self.pool[succ].name.clone(),
                    });
                }
                self.pool[succ].pred_back_edge = Some(node);
            } else if !self.pool[succ].visited {
                self.visit(succ)?;
            }
        }

        // Keep only forward edges in the neighbor lists; this removes any
        // cycle from the lists the passes iterate.
        if let Some(back) = self.pool[node].succ_back_edge {
            self.pool[node].succ.retain(|&s| s != back);
        }
        if let Some(back) = self.pool[node].pred_back_edge {
            self.pool[node].pred.retain(|&p| p != back);
        }

        self.pool[node].traversing = false;
        self.pool[node].visit_order = self.post_visit_order.len();
        self.post_visit_order.push(node);

        self.pool[node].is_switch = self.pool[node].succ.len() > 2;
        Ok(())
    }

    /// Rebuilds immediate dominators in reverse post-order. A single pass
    /// suffices on a reducible graph visited dominator-first.
    fn build_immediate_dominators(&mut self) {
        for index in (0..self.post_visit_order.len()).rev() {
            let node = self.post_visit_order[index];
            self.pool.recompute_immediate_dominator(node);
        }
    }

    pub(crate) fn recompute_cfg(&mut self) -> Result<(), Error> {
        self.reset_traversal();
        self.visit(self.entry)?;
        self.build_immediate_dominators();
        Ok(())
    }

    pub(crate) fn compute_dominance_frontier(&mut self) {
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            self.pool.recompute_dominance_frontier(node);
        }
    }
}
