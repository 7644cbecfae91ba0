//! Structured-control validation.

use log::warn;
use reflow_core::MergeKind;
use thiserror::Error;

use super::Structurizer;

/// A structured-control violation.
///
/// Findings are diagnostic, not fatal: emission can still run, and it is
/// the caller's burden to reject the program or re-run with a fixed-up
/// CFG if a stricter consumer would refuse the output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A block is the declared merge target of several constructs.
    #[error("{node} is the merge target of {count} constructs")]
    MultipleHeaders { node: String, count: usize },

    /// A loop header does not dominate its merge block.
    #[error("loop header {header} does not dominate its merge block {merge}")]
    LoopMergeNotDominated { header: String, merge: String },

    /// A selection header has no merge block at all.
    #[error("selection header {header} has no merge block")]
    MissingSelectionMerge { header: String },

    /// A selection header does not dominate its merge block.
    #[error("selection header {header} does not dominate its merge block {merge}")]
    SelectionMergeNotDominated { header: String, merge: String },

    /// A branching block carries no merge annotation. Often benign
    /// (switch fall-through), sometimes a missed merge candidate.
    #[error("{node} has {count} successors but no merge annotation")]
    MissingMergeAnnotation { node: String, count: usize },
}

impl ValidationIssue {
    /// True for findings that tolerate emission without risk; currently
    /// only the missing-annotation warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::MissingMergeAnnotation { .. })
    }
}

impl<'a> Structurizer<'a> {
    /// Verifies structured-control invariants over the reachable graph,
    /// logging and returning every finding. Merge blocks without any
    /// predecessor are synthesized unreachable merges and are exempt from
    /// the dominance checks.
    pub fn validate_structured(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for &node in &self.post_visit_order {
            let n = &self.pool[node];

            if n.headers.len() > 1 {
                issues.push(ValidationIssue::MultipleHeaders {
                    node: n.name.clone(),
                    count: n.headers.len(),
                });
            }

            match n.merge {
                MergeKind::Loop => {
                    // A merge-less loop gets a synthesized unreachable
                    // block at emission; nothing to check here.
                    if let Some(merge) = n.loop_merge_block {
                        if !self.pool.dominates(node, merge) && !self.pool[merge].pred.is_empty() {
                            issues.push(ValidationIssue::LoopMergeNotDominated {
                                header: n.name.clone(),
                                merge: self.pool[merge].name.clone(),
                            });
                        }
                    }
                }
                MergeKind::Selection => match n.selection_merge_block {
                    None => issues.push(ValidationIssue::MissingSelectionMerge {
                        header: n.name.clone(),
                    }),
                    Some(merge) => {
                        if !self.pool.dominates(node, merge) && !self.pool[merge].pred.is_empty() {
                            issues.push(ValidationIssue::SelectionMergeNotDominated {
                                header: n.name.clone(),
                                merge: self.pool[merge].name.clone(),
                            });
                        }
                    }
                },
                MergeKind::None => {}
            }

            if n.succ.len() >= 2 && n.merge == MergeKind::None {
                issues.push(ValidationIssue::MissingMergeAnnotation {
                    node: n.name.clone(),
                    count: n.succ.len(),
                });
            }
        }

        for issue in &issues {
            warn!("{issue}");
        }
        issues
    }
}
