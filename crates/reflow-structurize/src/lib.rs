//! # reflow-structurize
//!
//! Structurization passes for reflow. This crate turns a reducible,
//! unstructured CFG (built from an SSA-form IR) into structured control
//! flow: every loop and selection gets a declared merge block, multi-level
//! breaks are rewritten through synthesized ladder blocks, and phi nodes
//! are repaired to reference the rewritten predecessors.
//!
//! The entry point is [`Structurizer`]; emission is driven through the
//! [`BlockSink`] trait after [`Structurizer::run`] completes.

pub mod error;
pub mod structurizer;

pub use error::Error;
pub use structurizer::{BlockSink, Structurizer, ValidationIssue};
