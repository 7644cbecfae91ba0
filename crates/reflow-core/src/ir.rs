//! Opaque IR payload carried by CFG nodes.
//!
//! The structurizer does not interpret block contents; it only needs the
//! terminator (to keep branch targets in sync with edge rewrites), the phi
//! list (repaired after rewriting), and a merge-info slot filled in just
//! before emission.

use crate::node::{MergeKind, NodeId};

/// External SSA value identifier, minted by the embedder.
pub type ValueId = u32;

/// External type identifier, minted by the embedder.
pub type TypeId = u32;

/// How a block transfers control.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Terminator {
    /// Unconditional branch.
    Branch { target: NodeId },

    /// Two-way conditional branch.
    Condition {
        condition: ValueId,
        true_target: NodeId,
        false_target: NodeId,
    },

    /// N-way switch.
    Switch {
        selector: ValueId,
        cases: Vec<SwitchCase>,
        default_target: NodeId,
    },

    /// Function return.
    Return,

    /// Unreachable terminator (also used for synthesized merge blocks).
    #[default]
    Unreachable,
}

impl Terminator {
    /// Rewrites every target that referenced `from` to reference `to`.
    ///
    /// Used when an edge is rerouted through a helper block so the payload
    /// stays consistent with the `succ` list.
    pub fn retarget(&mut self, from: NodeId, to: NodeId) {
        match self {
            Self::Branch { target } => {
                if *target == from {
                    *target = to;
                }
            }
            Self::Condition {
                true_target,
                false_target,
                ..
            } => {
                if *true_target == from {
                    *true_target = to;
                }
                if *false_target == from {
                    *false_target = to;
                }
            }
            Self::Switch {
                cases,
                default_target,
                ..
            } => {
                for case in cases {
                    if case.target == from {
                        case.target = to;
                    }
                }
                if *default_target == from {
                    *default_target = to;
                }
            }
            Self::Return | Self::Unreachable => {}
        }
    }
}

/// One arm of a switch terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchCase {
    /// Selector value for this arm.
    pub value: u64,
    /// Branch target.
    pub target: NodeId,
}

/// An incoming phi operand: the value `id` flows in from `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Incoming {
    pub block: NodeId,
    /// Value id; `0` marks a placeholder the emitter materializes when it
    /// creates the intermediate phi at that block.
    pub id: ValueId,
}

/// An SSA phi node.
///
/// After structurization and phi repair, the incoming blocks are exactly
/// the forward predecessors of the block holding the phi.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Phi {
    pub id: ValueId,
    pub type_id: TypeId,
    pub incoming: Vec<Incoming>,
}

impl Phi {
    /// Creates an empty phi.
    pub fn new(id: ValueId, type_id: TypeId) -> Self {
        Self {
            id,
            type_id,
            incoming: Vec::new(),
        }
    }

    /// Adds an incoming operand.
    pub fn add_incoming(&mut self, block: NodeId, id: ValueId) {
        self.incoming.push(Incoming { block, id });
    }
}

/// Merge annotation handed to the emission sink alongside each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MergeInfo {
    pub merge_kind: MergeKind,
    pub merge_block: Option<NodeId>,
    /// For loops: the source of the back-edge into the header.
    pub continue_block: Option<NodeId>,
}

/// Per-node IR payload.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrPayload {
    pub terminator: Terminator,
    pub phi: Vec<Phi>,
    /// Written by the emission driver just before `emit_basic_block`.
    pub merge_info: MergeInfo,
}

/// Source of externally minted value and type identifiers.
///
/// The structurizer needs fresh ids for the boolean phi conditions it
/// synthesizes in ladder blocks; the embedder's module owns the id space,
/// the boolean type and its constants.
pub trait ValueSource {
    /// Allocates a fresh value id.
    fn allocate_id(&mut self) -> ValueId;
    /// Returns the boolean type id.
    fn bool_type(&mut self) -> TypeId;
    /// Returns the id of the given boolean constant.
    fn bool_constant(&mut self, value: bool) -> ValueId;
}
