// Property-based tests for compiler invariants.
//
// Random straight-line programs are generated as source text and pushed
// through the real front-end, so every property exercises the same path the
// driver uses. Three categories:
// 1. Legalization invariants: no Undetermined kinds, no Sub ops, edges stay
//    bidirectional
// 2. Optimizer invariants: golden equivalence, value-numbering idempotence,
//    tree-height monotonicity
// 3. Scheduler invariants: feasibility on the default accelerator
//
// Uses proptest with explicit configuration to prevent CI flakiness; the
// generator avoids division so random inputs cannot hit near-zero
// denominators.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use forge::eval::{evaluate_compare, evaluate_golden};
use forge::graph::Graph;
use forge::node::{NodeKind, NodeOp};
use forge::optimize;
use forge::processor::{HwConfig, Processor};
use forge::scheduler::schedule;

// ── Program generator ───────────────────────────────────────────────────────

/// Expression strategy: variables, bounded literals, and the operator
/// vocabulary minus division (near-zero denominators would turn float
/// noise into spurious mismatch reports).
fn arb_expr() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")].prop_map(String::from),
        (1u32..1000).prop_map(|n| format!("{}.{:03}", n / 100, n % 1000)),
    ];
    leaf.prop_recursive(3, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({l} + {r})")),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({l} - {r})")),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({l} * {r})")),
            inner.clone().prop_map(|e| format!("(-{e})")),
            inner.clone().prop_map(|e| format!("sin({e})")),
            inner.clone().prop_map(|e| format!("cos({e})")),
            inner.prop_map(|e| format!("power({e}, 2)")),
        ]
    })
}

/// A program: 1–3 assignments to distinct outputs.
fn arb_program() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_expr(), 1..=3).prop_map(|exprs| {
        exprs
            .iter()
            .enumerate()
            .map(|(i, e)| format!("y{i} = {e}\n"))
            .collect()
    })
}

// ── Shared helpers ──────────────────────────────────────────────────────────

fn build(source: &str) -> Graph {
    let parsed = forge::parser::parse(source);
    assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
    let lowered = forge::lower::lower(&parsed.program.unwrap(), source);
    assert!(lowered.diagnostics.is_empty());
    let mut graph = lowered.graph;
    let diags = forge::legalize::legalize(&mut graph);
    assert!(diags.is_empty(), "legalize diagnostics: {:?}", diags);
    graph
}

fn assert_edges_bidirectional(graph: &Graph) {
    for id in graph.all_ids() {
        let node = graph.node(id);
        for i in 0..node.num_fanins() {
            let fanin = node.fanin(i);
            let down = graph
                .node(fanin)
                .fanouts()
                .iter()
                .filter(|&&fo| fo == id)
                .count();
            let up = node.fanins().iter().filter(|&&fi| fi == fanin).count();
            assert_eq!(down, up, "edge multiplicity mismatch");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 256,
        .. ProptestConfig::default()
    })]

    // ── Legalization ────────────────────────────────────────────────────

    #[test]
    fn legalized_graphs_are_well_formed(source in arb_program()) {
        let graph = build(&source);
        for id in graph.all_ids() {
            prop_assert_ne!(graph.node(id).kind, NodeKind::Undetermined);
        }
        for id in graph.operation_ids() {
            prop_assert_ne!(graph.node(id).op, NodeOp::Sub);
        }
        assert_edges_bidirectional(&graph);
    }

    // ── Optimizer equivalence ───────────────────────────────────────────

    #[test]
    fn optimization_preserves_the_function(source in arb_program()) {
        let mut graph = build(&source);
        let mut rng = StdRng::seed_from_u64(0xf0e5);
        let golden = evaluate_golden(&mut graph, 3, &mut rng);
        optimize::optimize(&mut graph);
        let mismatches = evaluate_compare(&mut graph, &golden);
        prop_assert!(
            mismatches.is_empty(),
            "equivalence broken for:\n{}\n{:?}",
            source,
            mismatches
        );
        assert_edges_bidirectional(&graph);
    }

    #[test]
    fn value_numbering_is_idempotent(source in arb_program()) {
        let mut graph = build(&source);
        optimize::simplify_arithmetic(&mut graph);
        optimize::eliminate_duplicated_operation(&mut graph);
        let after_first = graph.num_all_nodes();
        optimize::eliminate_duplicated_operation(&mut graph);
        prop_assert_eq!(graph.num_all_nodes(), after_first);
    }

    #[test]
    fn tree_height_reduction_never_deepens(source in arb_program()) {
        let mut graph = build(&source);
        let before = graph.levelize();
        optimize::maximize_parallelism(&mut graph);
        let after = graph.levelize();
        prop_assert!(after <= before, "height grew {} -> {} for:\n{}", before, after, source);
    }

    // ── Scheduler feasibility ───────────────────────────────────────────

    #[test]
    fn schedules_are_feasible(source in arb_program()) {
        let mut graph = build(&source);
        optimize::optimize(&mut graph);

        let mut processor = Processor::configure(&HwConfig::default());
        let result = schedule(&mut graph, &mut processor);
        prop_assert!(
            result.diagnostics.is_empty(),
            "schedule diagnostics for:\n{}\n{:?}",
            source,
            result.diagnostics
        );
        let program = result.schedule.expect("no schedule");

        // Exclusive execution seats.
        let mut seats = std::collections::HashSet::new();
        for record in &program.records {
            prop_assert!(seats.insert((record.pg, record.pe, record.start)));
        }

        // Dependencies honored with the inter-group penalty.
        for id in graph.operation_ids() {
            let node = graph.node(id);
            prop_assert!(node.is_scheduled);
            for i in 0..node.num_fanins() {
                let fanin = graph.node(node.fanin(i));
                if fanin.kind != NodeKind::Operation {
                    continue;
                }
                let mut ready = fanin.finish_time;
                if fanin.pg_scheduled != node.pg_scheduled {
                    ready += 1;
                }
                prop_assert!(node.start_time >= ready);
            }
        }
    }
}
