//! Error types for reflow-structurize.

use thiserror::Error;

/// Structurization error.
#[derive(Error, Debug)]
pub enum Error {
    /// A node grew a second outgoing back-edge; the input CFG is not
    /// reducible.
    #[error("irreducible control flow: {node} has more than one outgoing back-edge")]
    IrreducibleSuccBackEdge {
        /// Debug name of the offending node.
        node: String,
    },

    /// A node grew a second incoming back-edge; the input CFG is not
    /// reducible.
    #[error("irreducible control flow: {node} has more than one incoming back-edge")]
    IrreduciblePredBackEdge {
        /// Debug name of the offending node.
        node: String,
    },
}
