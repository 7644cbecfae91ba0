//! Emission driver.
//!
//! Blocks are handed to the sink in reverse post-order, so a dominating
//! block is always emitted before the blocks it dominates. Merge and
//! continue blocks are registered before the block that references them.

use reflow_core::{MergeInfo, MergeKind, NodeId, NodePool, Terminator};

use super::Structurizer;

/// Sink receiving structured blocks from the emission driver.
pub trait BlockSink {
    /// Called for every block before it can be referenced; must assign a
    /// stable non-zero external id to the node if it has none.
    fn register_block(&mut self, pool: &mut NodePool, node: NodeId);

    /// Called once per block in reverse post-order. The node's
    /// `ir.merge_info` carries its merge annotation; any referenced merge
    /// or continue block is already registered.
    fn emit_basic_block(&mut self, pool: &NodePool, node: NodeId);
}

impl<'a> Structurizer<'a> {
    /// Drives emission through the sink.
    pub fn traverse(&mut self, sink: &mut dyn BlockSink) {
        // The backend needs to know every block before code is emitted.
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            sink.register_block(self.pool, node);
        }

        for index in (0..self.post_visit_order.len()).rev() {
            let node = self.post_visit_order[index];
            match self.pool[node].merge {
                MergeKind::Selection => {
                    let merge_block = self.pool[node].selection_merge_block;
                    if let Some(merge) = merge_block {
                        sink.register_block(self.pool, merge);
                    }
                    self.pool[node].ir.merge_info = MergeInfo {
                        merge_kind: MergeKind::Selection,
                        merge_block,
                        continue_block: None,
                    };
                    sink.emit_basic_block(self.pool, node);
                }
                MergeKind::Loop => {
                    // A loop without exits merges to a synthesized
                    // unreachable block.
                    let merge_block = match self.pool[node].loop_merge_block {
                        Some(merge) => merge,
                        None => self.synthesize_unreachable_loop_merge(node),
                    };
                    let continue_block = self.pool[node].pred_back_edge;

                    sink.register_block(self.pool, merge_block);
                    if let Some(cont) = continue_block {
                        sink.register_block(self.pool, cont);
                    }
                    self.pool[node].ir.merge_info = MergeInfo {
                        merge_kind: MergeKind::Loop,
                        merge_block: Some(merge_block),
                        continue_block,
                    };
                    sink.emit_basic_block(self.pool, node);
                }
                MergeKind::None => {
                    self.pool[node].ir.merge_info = MergeInfo::default();
                    sink.emit_basic_block(self.pool, node);
                }
            }
        }
    }

    fn synthesize_unreachable_loop_merge(&mut self, header: NodeId) -> NodeId {
        let name = format!("{}.unreachable", self.pool[header].name);
        let merge = self.pool.create_named(name);
        self.pool[merge].ir.terminator = Terminator::Unreachable;
        self.pool[header].loop_merge_block = Some(merge);
        merge
    }
}
