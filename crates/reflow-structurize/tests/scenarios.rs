//! End-to-end structurization scenarios.
//!
//! Each test builds a small unstructured CFG the way an IR loader would,
//! runs the full pipeline, and checks the merge annotations, the emitted
//! block order, and the validator's verdict.

mod common;

use common::{GraphBuilder, RecordingSink, TestValues};
use reflow_core::{MergeKind, Terminator};
use reflow_structurize::Structurizer;

#[test]
fn diamond_gets_selection_merge() {
    // entry -> {a, b}; a -> m; b -> m; m -> exit
    let mut g = GraphBuilder::new();
    g.add_selection("entry", "a", "b");
    g.add_branch("a", "m");
    g.add_branch("b", "m");
    g.add_branch("m", "exit");
    let entry = g.get("entry");
    let (a, b, m) = (g.get("a"), g.get("b"), g.get("m"));

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);

    let mut sink = RecordingSink::new();
    s.traverse(&mut sink);

    assert_eq!(pool[entry].merge, MergeKind::Selection);
    assert_eq!(pool[entry].selection_merge_block, Some(m));
    assert_eq!(pool[m].headers, vec![entry]);

    // No helper blocks were needed.
    assert_eq!(pool.len(), 5);
    let _ = (a, b);

    // Dominators come first; the two arms emit in visit order.
    assert_eq!(sink.emitted.len(), 5);
    assert_eq!(sink.emitted[0], "entry");
    assert_eq!(sink.emitted[3], "m");
    assert_eq!(sink.emitted[4], "exit");
    assert_eq!(sink.merges["entry"].merge_block.as_deref(), Some("m"));
}

#[test]
fn simple_loop_gets_loop_merge_and_continue() {
    // entry -> h; h -> {body, exit}; body -> h (back); exit -> end
    let mut g = GraphBuilder::new();
    g.add_branch("entry", "h");
    g.add_selection("h", "body", "exit");
    g.add_branch("body", "h");
    g.add_branch("exit", "end");
    let entry = g.get("entry");
    let (h, body, exit) = (g.get("h"), g.get("body"), g.get("exit"));

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);

    let mut sink = RecordingSink::new();
    s.traverse(&mut sink);

    assert_eq!(pool[h].merge, MergeKind::Loop);
    assert_eq!(pool[h].loop_merge_block, Some(exit));
    assert_eq!(pool[h].pred_back_edge, Some(body));

    // No selection merges anywhere.
    for id in pool.ids() {
        assert_ne!(pool[id].merge, MergeKind::Selection, "{}", pool[id].name);
    }

    let merge = &sink.merges["h"];
    assert_eq!(merge.merge_kind, MergeKind::Loop);
    assert_eq!(merge.merge_block.as_deref(), Some("exit"));
    assert_eq!(merge.continue_block.as_deref(), Some("body"));
    assert_eq!(sink.emitted[0], "entry");
    assert_eq!(sink.emitted[1], "h");
}

#[test]
fn break_from_selection_inside_loop() {
    // h -> {a, exit}; a -> {b, c}; b -> exit (break); c -> h (back)
    let mut g = GraphBuilder::new();
    g.add_branch("entry", "h");
    g.add_selection("h", "a", "exit");
    g.add_selection("a", "b", "c");
    g.add_branch("b", "exit");
    g.add_branch("c", "h");
    let entry = g.get("entry");
    let (h, a, b, c, exit) = (g.get("h"), g.get("a"), g.get("b"), g.get("c"), g.get("exit"));

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);

    assert_eq!(pool[h].merge, MergeKind::Loop);
    assert_eq!(pool[h].loop_merge_block, Some(exit));
    assert_eq!(pool[h].pred_back_edge, Some(c));
    assert_eq!(pool[exit].headers, vec![h]);

    // The breaking selection cannot merge inside the loop; it gets a
    // synthesized unreachable merge.
    assert_eq!(pool[a].merge, MergeKind::Selection);
    let merge = pool[a].selection_merge_block.expect("selection merge");
    assert!(merge != b && merge != c && merge != exit);
    assert_eq!(pool[merge].ir.terminator, Terminator::Unreachable);
    assert!(pool[merge].pred.is_empty());
}

#[test]
fn multi_level_break_goes_through_boolean_ladder() {
    // Two nested loops share the outer merge: the inner loop's escape
    // (esc -> om) must be rewritten through a ladder carrying a boolean
    // phi that distinguishes break paths from the normal merge path.
    //
    //   entry -> outer_h -> inner_h -> work -> {esc, wnext}
    //   esc -> om                      (break out of both loops)
    //   wnext -> latch -> {inner_h (back), d}
    //   d -> olatch -> {outer_h (back), om}
    //   outer_h -> {inner_h, om}; om -> end
    let mut g = GraphBuilder::new();
    g.add_branch("entry", "outer_h");
    g.add_selection("outer_h", "inner_h", "om");
    g.add_branch("inner_h", "work");
    g.add_selection("work", "esc", "wnext");
    g.add_branch("esc", "om");
    g.add_branch("wnext", "latch");
    g.add_selection("latch", "inner_h", "d");
    g.add_branch("d", "olatch");
    g.add_selection("olatch", "outer_h", "om");
    g.add_branch("om", "end");
    let entry = g.get("entry");
    let (outer_h, inner_h, esc, latch, d, om) = (
        g.get("outer_h"),
        g.get("inner_h"),
        g.get("esc"),
        g.get("latch"),
        g.get("d"),
        g.get("om"),
    );

    let before = g.pool.len();
    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    let issues = s.validate_structured();
    let mut sink = RecordingSink::new();
    s.traverse(&mut sink);
    assert_eq!(issues, vec![]);

    // Exactly one helper block: the boolean ladder in front of the inner
    // break staging block.
    assert_eq!(pool.len(), before + 1);
    let ladder = pool[esc].succ[0];
    assert_ne!(ladder, om, "escape must no longer branch straight out");
    assert!(pool[ladder].is_ladder);

    // The ladder decides between breaking to the outer merge and
    // continuing to the old staging block.
    assert_eq!(
        pool[ladder].ir.terminator,
        Terminator::Condition {
            condition: 100,
            true_target: om,
            false_target: d,
        }
    );
    let phi = &pool[ladder].ir.phi[0];
    assert_eq!(phi.id, 100);
    assert_eq!(phi.type_id, 2);
    assert_eq!(phi.incoming.len(), 2);
    assert!(phi.incoming.iter().any(|i| i.block == latch));
    assert!(phi.incoming.iter().any(|i| i.block == esc));

    // Final annotations: the inner loop now merges at the ladder, the
    // outer loop at the shared merge.
    assert_eq!(pool[inner_h].merge, MergeKind::Loop);
    assert_eq!(pool[inner_h].loop_merge_block, Some(ladder));
    assert_eq!(pool[outer_h].merge, MergeKind::Loop);
    assert_eq!(pool[outer_h].loop_merge_block, Some(om));

    assert_eq!(sink.merges["inner_h"].continue_block.as_deref(), Some("latch"));
}

#[test]
fn phi_is_repaired_through_inserted_ladder() {
    // p2 and p3 stop branching directly to m once their break layer gets
    // its own ladder; the phi must follow.
    //
    //   entry -> {c1, p1}; c1 -> {p2, p3}; p2 -> l; p3 -> l; l -> m;
    //   p1 -> m; phi(m) = [(p1, 11), (p2, 12), (p3, 13)]
    let mut g = GraphBuilder::new();
    g.add_selection("entry", "c1", "p1");
    g.add_selection("c1", "p2", "p3");
    g.add_branch("p2", "l");
    g.add_branch("p3", "l");
    g.add_branch("l", "m");
    g.add_branch("p1", "m");
    g.add_phi("m", 4, &[("p1", 11), ("p2", 12), ("p3", 13)]);
    let entry = g.get("entry");
    let (p1, l, m) = (g.get("p1"), g.get("l"), g.get("m"));

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);

    let phi = &pool[m].ir.phi[0];
    assert_eq!(phi.incoming.len(), 2);
    assert!(phi.incoming.iter().any(|i| i.block == p1 && i.id == 11));
    // p2/p3 merged into a placeholder at the join that covers them.
    assert!(phi.incoming.iter().any(|i| i.block == l && i.id == 0));

    // Incoming blocks are exactly m's forward predecessors.
    let mut incoming_blocks: Vec<_> = phi.incoming.iter().map(|i| i.block).collect();
    incoming_blocks.sort();
    let mut preds = pool[m].pred.clone();
    preds.sort();
    assert_eq!(incoming_blocks, preds);
}

#[test]
fn infinite_loop_gets_synthesized_unreachable_merge() {
    // entry -> h; h -> h
    let mut g = GraphBuilder::new();
    g.add_branch("entry", "h");
    g.add_branch("h", "h");
    let entry = g.get("entry");
    let h = g.get("h");

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);

    let mut sink = RecordingSink::new();
    s.traverse(&mut sink);

    assert_eq!(pool[h].merge, MergeKind::Loop);
    assert_eq!(pool[h].pred_back_edge, Some(h));

    let merge = &sink.merges["h"];
    assert_eq!(merge.merge_kind, MergeKind::Loop);
    assert_eq!(merge.merge_block.as_deref(), Some("h.unreachable"));
    assert_eq!(merge.continue_block.as_deref(), Some("h"));

    let synthesized = pool[h].loop_merge_block.expect("synthesized merge");
    assert_eq!(pool[synthesized].ir.terminator, Terminator::Unreachable);
    assert!(pool[synthesized].pred.is_empty());
}

#[test]
fn switch_merges_at_common_post_dominator() {
    // entry switches over three cases, all of which join at m.
    let mut g = GraphBuilder::new();
    g.add_switch("entry", &["c0", "c1", "c2"]);
    g.add_branch("c0", "m");
    g.add_branch("c1", "m");
    g.add_branch("c2", "m");
    g.add_branch("m", "end");
    let entry = g.get("entry");
    let m = g.get("m");

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(s.validate_structured(), vec![]);
    assert!(pool[entry].is_switch);
    assert_eq!(pool[entry].merge, MergeKind::Selection);
    assert_eq!(pool[entry].selection_merge_block, Some(m));
    assert_eq!(pool[m].headers, vec![entry]);
}

#[test]
fn structurizing_structured_output_is_stable() {
    // Running the pipeline again over already-structured graphs neither
    // adds helper blocks nor changes the annotations.
    let mut g = GraphBuilder::new();
    g.add_selection("entry", "a", "b");
    g.add_branch("a", "m");
    g.add_branch("b", "m");
    g.add_branch("m", "exit");
    let entry = g.get("entry");
    let m = g.get("m");

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();
    let len_after_first = pool.len();

    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(pool.len(), len_after_first);
    assert_eq!(pool[entry].merge, MergeKind::Selection);
    assert_eq!(pool[entry].selection_merge_block, Some(m));
}

#[test]
fn structurizing_structured_loop_is_stable() {
    let mut g = GraphBuilder::new();
    g.add_branch("entry", "h");
    g.add_selection("h", "body", "exit");
    g.add_branch("body", "h");
    g.add_branch("exit", "end");
    let entry = g.get("entry");
    let (h, exit) = (g.get("h"), g.get("exit"));

    let mut pool = g.pool;
    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();
    let len_after_first = pool.len();

    let mut s = Structurizer::new(&mut pool, entry);
    s.run(&mut TestValues::new()).unwrap();

    assert_eq!(pool.len(), len_after_first);
    assert_eq!(pool[h].merge, MergeKind::Loop);
    assert_eq!(pool[h].loop_merge_block, Some(exit));
}
