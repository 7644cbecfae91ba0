//! CFG node representation.

use crate::ir::{IrPayload, MergeInfo};

/// Unique identifier for a CFG node within a [`NodePool`](crate::NodePool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    /// Creates a new node ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Structured-control construct kind declared on a header node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MergeKind {
    /// Not a structured header.
    #[default]
    None,
    /// Selection construct (two-way branch or switch).
    Selection,
    /// Loop construct.
    Loop,
}

/// A CFG node.
///
/// A node carries three groups of state:
/// - the user-declared graph (`succ`/`pred` edge lists and the IR payload),
/// - per-traversal analysis state (visit order, back-edges, dominators),
/// - structured-control annotations (merge kind and merge targets).
///
/// Analysis state is rebuilt by every CFG recomputation; structured-control
/// annotations are rebuilt too unless `freeze_structured_analysis` is set.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CfgNode {
    /// Debug name. Not semantically significant.
    pub name: String,
    /// External identifier assigned by the emission sink. `0` = unassigned.
    pub id: u32,

    /// Forward successors, in branch order.
    pub succ: Vec<NodeId>,
    /// Forward predecessors.
    pub pred: Vec<NodeId>,
    /// Outgoing back-edge, if any. At most one per node.
    pub succ_back_edge: Option<NodeId>,
    /// Incoming back-edge, if any. At most one per node.
    pub pred_back_edge: Option<NodeId>,

    /// Post-order index. Larger means nearer the entry, i.e. earlier in
    /// program order.
    pub visit_order: usize,
    /// Immediate dominator. `None` for the entry and unreachable nodes.
    pub immediate_dominator: Option<NodeId>,
    /// Dominance frontier. Only valid after an explicit recomputation.
    pub dominance_frontier: Vec<NodeId>,
    /// Whether the last traversal reached this node.
    pub visited: bool,
    /// DFS stack marker used during traversal to spot back-edges.
    pub traversing: bool,

    /// Headers that declared this node as their merge target.
    pub headers: Vec<NodeId>,
    /// Declared structured-control kind.
    pub merge: MergeKind,
    /// Merge target when `merge == MergeKind::Selection`.
    pub selection_merge_block: Option<NodeId>,
    /// Merge target when `merge == MergeKind::Loop`.
    pub loop_merge_block: Option<NodeId>,
    /// Break staging block for loops whose merge needs ladder workarounds.
    pub loop_ladder_block: Option<NodeId>,

    /// True iff the node had more than two forward successors when the CFG
    /// was last recomputed.
    pub is_switch: bool,
    /// True iff this node was synthesized as a ladder step.
    pub is_ladder: bool,
    /// Preserve merge annotations across CFG recomputations.
    pub freeze_structured_analysis: bool,

    /// Opaque IR payload: terminator, phi nodes, emission merge info.
    pub ir: IrPayload,
}

impl CfgNode {
    /// Creates a fresh node with the given debug name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            succ: Vec::new(),
            pred: Vec::new(),
            succ_back_edge: None,
            pred_back_edge: None,
            visit_order: 0,
            immediate_dominator: None,
            dominance_frontier: Vec::new(),
            visited: false,
            traversing: false,
            headers: Vec::new(),
            merge: MergeKind::None,
            selection_merge_block: None,
            loop_merge_block: None,
            loop_ladder_block: None,
            is_switch: false,
            is_ladder: false,
            freeze_structured_analysis: false,
            ir: IrPayload::default(),
        }
    }

    /// Number of forward predecessors. Back-edges are tracked separately
    /// and do not count.
    pub fn num_forward_preds(&self) -> usize {
        self.pred.len()
    }

    /// Returns true if a back-edge points at this node, i.e. the node is a
    /// loop header.
    pub fn has_pred_back_edges(&self) -> bool {
        self.pred_back_edge.is_some()
    }

    /// The merge info slot handed to the emission sink.
    pub fn merge_info(&self) -> &MergeInfo {
        &self.ir.merge_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(0).to_string(), "n0");
        assert_eq!(NodeId::new(42).to_string(), "n42");
    }

    #[test]
    fn test_new_node_is_clean() {
        let node = CfgNode::new("entry");
        assert_eq!(node.name, "entry");
        assert_eq!(node.id, 0);
        assert!(node.succ.is_empty());
        assert!(node.pred.is_empty());
        assert_eq!(node.merge, MergeKind::None);
        assert!(!node.has_pred_back_edges());
        assert_eq!(node.num_forward_preds(), 0);
    }

    #[test]
    fn test_merge_kind_default() {
        assert_eq!(MergeKind::default(), MergeKind::None);
    }
}
