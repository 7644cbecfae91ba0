//! Phi repair.
//!
//! After structurization, phi operands may reference predecessors that no
//! longer branch directly to the phi block; ladders and helper blocks have
//! intervened. Each phi's incoming set is walked down dominator-linear
//! chains and merged at dominance frontiers, top-down, until every
//! incoming block is a direct predecessor again. Values merged at a
//! frontier get a placeholder id the emitter fills in when it
//! materializes the intermediate phi there.

use indexmap::IndexSet;
use log::{debug, warn};
use reflow_core::{Incoming, NodeId};

use super::Structurizer;

impl<'a> Structurizer<'a> {
    pub(crate) fn insert_phi(&mut self) {
        self.compute_dominance_frontier();

        let mut phi_nodes: Vec<(NodeId, usize)> = Vec::new();
        for index in 0..self.post_visit_order.len() {
            let node = self.post_visit_order[index];
            for phi_index in 0..self.pool[node].ir.phi.len() {
                phi_nodes.push((node, phi_index));
            }
        }

        // Phis may feed other phis; resolve entry-first.
        phi_nodes.sort_by(|a, b| self.pool[b.0].visit_order.cmp(&self.pool[a.0].visit_order));

        for (block, phi_index) in phi_nodes {
            self.insert_phi_for(block, phi_index);
        }
    }

    /// The incoming value whose block most immediately dominates
    /// `frontier_pred`: of all dominating definitions, the one with the
    /// lowest visit order wins.
    fn find_incoming_value(&self, frontier_pred: NodeId, incoming: &[Incoming]) -> Option<usize> {
        let mut candidate: Option<usize> = None;
        for (i, inc) in incoming.iter().enumerate() {
            if self.pool.dominates(inc.block, frontier_pred) {
                let better = match candidate {
                    Some(c) => {
                        self.pool[inc.block].visit_order
                            < self.pool[incoming[c].block].visit_order
                    }
                    None => true,
                };
                if better {
                    candidate = Some(i);
                }
            }
        }
        candidate
    }

    fn insert_phi_for(&mut self, block: NodeId, phi_index: usize) {
        // Delimit the subgraph reachable from the incoming blocks without
        // crossing the phi block itself.
        let mut cfg_subset: IndexSet<NodeId> = IndexSet::new();
        {
            let pool = &*self.pool;
            let incoming = &pool[block].ir.phi[phi_index].incoming;
            for inc in incoming.iter() {
                let start = inc.block;
                pool.walk_cfg_from(start, &mut |n| {
                    if n == block || cfg_subset.contains(&n) {
                        false
                    } else {
                        cfg_subset.insert(n);
                        true
                    }
                });
            }
        }

        let mut incoming = std::mem::take(&mut self.pool[block].ir.phi[phi_index].incoming);

        loop {
            // Advance each incoming as close to a frontier as possible.
            for inc in incoming.iter_mut() {
                loop {
                    let b = inc.block;
                    if self.pool[b].succ.len() == 1 && self.pool.dominates(b, self.pool[b].succ[0])
                    {
                        inc.block = self.pool[b].succ[0];
                    } else {
                        break;
                    }
                }
            }

            // All inputs direct branches again? Then the phi is valid.
            let preds = &self.pool[block].pred;
            if incoming.iter().all(|inc| preds.contains(&inc.block)) {
                debug!("resolved phi in {}", self.pool[block].name);
                break;
            }

            // Pick the earliest dominance frontier within the subset; we
            // merge top to bottom.
            let mut frontier: Option<NodeId> = None;
            for inc in incoming.iter() {
                for k in 0..self.pool[inc.block].dominance_frontier.len() {
                    let candidate = self.pool[inc.block].dominance_frontier[k];
                    if !cfg_subset.contains(&candidate) {
                        continue;
                    }
                    let better = match frontier {
                        Some(f) => self.pool[candidate].visit_order > self.pool[f].visit_order,
                        None => true,
                    };
                    if better {
                        frontier = Some(candidate);
                    }
                }
            }
            let Some(frontier) = frontier else {
                warn!(
                    "no dominance frontier candidate for phi in {}",
                    self.pool[block].name
                );
                break;
            };

            // Retire inputs the frontier fully covers; inputs that can
            // still reach the phi block elsewhere stay live.
            for k in 0..self.pool[frontier].pred.len() {
                let input = self.pool[frontier].pred[k];
                let Some(itr) = self.find_incoming_value(input, &incoming) else {
                    continue;
                };
                let inc_block = incoming[itr].block;
                let exists_path = self
                    .pool
                    .exists_path_in_cfg_without_intermediate_node(inc_block, block, frontier);
                if exists_path {
                    debug!("keeping phi input in {}", self.pool[inc_block].name);
                } else {
                    debug!("removing phi input in {}", self.pool[inc_block].name);
                    incoming.remove(itr);
                }
            }

            cfg_subset.swap_remove(&frontier);

            // The merged value; the emitter assigns the real id when it
            // creates the intermediate phi at the frontier.
            incoming.push(Incoming {
                block: frontier,
                id: 0,
            });
        }

        self.pool[block].ir.phi[phi_index].incoming = incoming;
    }
}
