//! # reflow-core
//!
//! Core CFG data model for the reflow structurizer. This crate defines the
//! node pool (arena), CFG nodes with their analysis and structured-control
//! state, the opaque IR payload (terminators, phi nodes, merge info), and
//! the graph/dominator primitives the structurization passes build on.

pub mod ir;
pub mod node;
pub mod output;
pub mod pool;

pub use ir::{Incoming, IrPayload, MergeInfo, Phi, SwitchCase, Terminator, TypeId, ValueId, ValueSource};
pub use node::{CfgNode, MergeKind, NodeId};
pub use output::{escape_dot_string, render_cfg, DotConfig};
pub use pool::NodePool;
