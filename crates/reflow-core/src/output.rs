//! Output format utilities.
//!
//! Currently this is DOT (Graphviz) rendering of a node pool, used to
//! inspect the graph before and after structurization.

pub mod dot;

pub use dot::{escape_dot_string, render_cfg, DotConfig};
