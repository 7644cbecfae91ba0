//! Shared test harness: a by-name graph builder over the node pool, a
//! deterministic id source, and a recording emission sink.

#![allow(dead_code)]

use std::collections::HashMap;

use reflow_core::{
    MergeKind, NodeId, NodePool, Phi, SwitchCase, Terminator, TypeId, ValueId, ValueSource,
};
use reflow_structurize::BlockSink;

/// Builds CFGs by block name, the way an IR loader would.
pub struct GraphBuilder {
    pub pool: NodePool,
    names: HashMap<String, NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            pool: NodePool::new(),
            names: HashMap::new(),
        }
    }

    /// Returns the block with the given name, creating it (as a plain
    /// return block) on first use.
    pub fn get(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = self.pool.create_named(name);
        self.pool[id].ir.terminator = Terminator::Return;
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn add_branch(&mut self, from: &str, to: &str) {
        let f = self.get(from);
        let t = self.get(to);
        self.pool.add_branch(f, t);
        self.pool[f].ir.terminator = Terminator::Branch { target: t };
    }

    pub fn add_selection(&mut self, from: &str, on_true: &str, on_false: &str) {
        let f = self.get(from);
        let t = self.get(on_true);
        let e = self.get(on_false);
        self.pool.add_branch(f, t);
        self.pool.add_branch(f, e);
        self.pool[f].ir.terminator = Terminator::Condition {
            condition: 1,
            true_target: t,
            false_target: e,
        };
    }

    /// The last target is the default case.
    pub fn add_switch(&mut self, from: &str, targets: &[&str]) {
        let f = self.get(from);
        let ids: Vec<NodeId> = targets.iter().map(|t| self.get(t)).collect();
        for &id in &ids {
            self.pool.add_branch(f, id);
        }
        let (&default_target, case_targets) = ids.split_last().expect("switch needs targets");
        self.pool[f].ir.terminator = Terminator::Switch {
            selector: 1,
            cases: case_targets
                .iter()
                .enumerate()
                .map(|(value, &target)| SwitchCase {
                    value: value as u64,
                    target,
                })
                .collect(),
            default_target,
        };
    }

    pub fn add_phi(&mut self, block: &str, type_id: TypeId, incoming: &[(&str, ValueId)]) {
        let b = self.get(block);
        let phi_id = 1000 + self.pool[b].ir.phi.len() as u32;
        let mut phi = Phi::new(phi_id, type_id);
        for &(from, id) in incoming {
            let from = self.get(from);
            phi.add_incoming(from, id);
        }
        self.pool[b].ir.phi.push(phi);
    }
}

/// Deterministic id source standing in for the embedder's module.
pub struct TestValues {
    next_id: u32,
}

impl TestValues {
    pub fn new() -> Self {
        Self { next_id: 100 }
    }
}

impl ValueSource for TestValues {
    fn allocate_id(&mut self) -> ValueId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bool_type(&mut self) -> TypeId {
        2
    }

    fn bool_constant(&mut self, value: bool) -> ValueId {
        if value {
            11
        } else {
            12
        }
    }
}

/// Recorded merge annotation, resolved to block names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedMerge {
    pub merge_kind: MergeKind,
    pub merge_block: Option<String>,
    pub continue_block: Option<String>,
}

/// Sink that records registration and emission order.
pub struct RecordingSink {
    next_id: u32,
    pub emitted: Vec<String>,
    pub merges: HashMap<String, EmittedMerge>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            emitted: Vec::new(),
            merges: HashMap::new(),
        }
    }
}

impl BlockSink for RecordingSink {
    fn register_block(&mut self, pool: &mut NodePool, node: NodeId) {
        if pool[node].id == 0 {
            pool[node].id = self.next_id;
            self.next_id += 1;
        }
    }

    fn emit_basic_block(&mut self, pool: &NodePool, node: NodeId) {
        assert_ne!(pool[node].id, 0, "block emitted before registration");
        let info = &pool[node].ir.merge_info;
        self.merges.insert(
            pool[node].name.clone(),
            EmittedMerge {
                merge_kind: info.merge_kind,
                merge_block: info.merge_block.map(|m| pool[m].name.clone()),
                continue_block: info.continue_block.map(|c| pool[c].name.clone()),
            },
        );
        self.emitted.push(pool[node].name.clone());
    }
}
