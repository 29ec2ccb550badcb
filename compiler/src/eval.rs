// eval.rs — Randomized evaluation and the golden oracle
//
// Evaluates the graph bottom-up in level order and uses snapshots of
// randomized runs to verify that optimization passes preserve the function:
// `evaluate_golden` records N random input/output vector pairs, and
// `evaluate_compare` replays the stored inputs after a rewrite, reporting
// any output drifting past tolerance.
//
// Preconditions: graph is legalized (no Undetermined kinds, no Sub ops).
// Postconditions: every operation/output node's `value` reflects the last
//                 evaluated input set.
// Failure modes: mismatches are reported as warnings, never fatal — they
//                surface that a pass broke equivalence.
// Side effects: writes node `value` fields only.

use std::collections::BTreeMap;

use rand::Rng;

use crate::diag::{codes, Diagnostic};
use crate::graph::Graph;
use crate::node::{NodeId, NodeOp};
use crate::pq::MinHeap;

/// Mismatch tolerance: a result is wrong only when BOTH the absolute
/// difference exceeds 0.01 and the relative difference exceeds 1%.
const TOLERANCE_ABS: f64 = 0.01;
const TOLERANCE_REL: f64 = 0.01;

/// A recorded evaluation: one random input vector and the outputs it
/// produced on the unoptimized graph.
#[derive(Debug, Clone)]
pub struct GoldenSet {
    pub inputs: BTreeMap<String, f64>,
    pub outputs: BTreeMap<String, f64>,
}

/// The golden record across all input sets.
#[derive(Debug, Clone, Default)]
pub struct Golden {
    pub sets: Vec<GoldenSet>,
}

/// Evaluate the graph on `num_sets` random input vectors (each input node
/// sampled from U(0,1)) and snapshot the outputs as the golden result.
pub fn evaluate_golden(graph: &mut Graph, num_sets: usize, rng: &mut impl Rng) -> Golden {
    graph.levelize();

    let mut golden = Golden::default();
    for _ in 0..num_sets {
        let mut inputs = BTreeMap::new();
        for id in graph.input_ids() {
            let value = rng.random::<f64>();
            graph.node_mut(id).value = value;
            inputs.insert(graph.node(id).name.clone(), value);
        }

        eval(graph);

        let mut outputs = BTreeMap::new();
        for id in graph.output_ids() {
            outputs.insert(graph.node(id).name.clone(), graph.node(id).value);
        }
        golden.sets.push(GoldenSet { inputs, outputs });
    }
    golden
}

/// Replay the stored input sets and compare each output against its golden
/// snapshot. Used to verify that a graph transformation preserved the
/// function. Returns one warning per mismatching (set, output) pair.
pub fn evaluate_compare(graph: &mut Graph, golden: &Golden) -> Vec<Diagnostic> {
    graph.levelize();

    let mut diagnostics = Vec::new();
    for (set_index, set) in golden.sets.iter().enumerate() {
        for (name, &value) in &set.inputs {
            if let Some(id) = graph.lookup(name) {
                graph.node_mut(id).value = value;
            }
        }

        eval(graph);

        for id in graph.output_ids() {
            let name = &graph.node(id).name;
            let Some(&expected) = set.outputs.get(name) else {
                continue;
            };
            let result = graph.node(id).value;

            let diff_abs = (result - expected).abs();
            let diff_rel = (diff_abs / expected).abs();
            if diff_abs > TOLERANCE_ABS && diff_rel > TOLERANCE_REL {
                diagnostics.push(
                    Diagnostic::warning(format!(
                        "mismatch in set {set_index}: {result} != {expected}"
                    ))
                    .with_code(codes::W0301)
                    .with_node(name.clone()),
                );
            }
        }
    }
    diagnostics
}

/// Evaluate every operation and output node in level order. Inputs and
/// constants must already carry values.
pub fn eval(graph: &mut Graph) {
    graph.levelize();

    let mut pq = MinHeap::new();
    for id in graph.operation_ids() {
        pq.push(id, graph.node(id).level);
    }
    for id in graph.output_ids() {
        pq.push(id, graph.node(id).level);
    }

    while let Some((id, _)) = pq.pop() {
        let value = eval_node(graph, id);
        graph.node_mut(id).value = value;
    }
}

/// Compute one node's value from its fanins with sign bits applied as ±1.
fn eval_node(graph: &Graph, id: NodeId) -> f64 {
    let node = graph.node(id);
    let signed: Vec<f64> = (0..node.num_fanins())
        .map(|i| {
            let value = graph.node(node.fanin(i)).value;
            if node.fanin_sign(i) {
                -value
            } else {
                value
            }
        })
        .collect();

    match (node.op, signed.as_slice()) {
        (NodeOp::Equal, [v]) => *v,
        (NodeOp::Add, vs) => vs.iter().sum(),
        (NodeOp::Mul, vs) => vs.iter().product(),
        (NodeOp::Div, [a, b]) => a / b,
        (NodeOp::Power, [a, b]) => a.powf(*b),
        (NodeOp::Sin, [v]) => v.sin(),
        (NodeOp::Cos, [v]) => v.cos(),
        // Sub never survives legalization; keep its meaning anyway so a
        // raw graph still evaluates sensibly.
        (NodeOp::Sub, [v]) => -v,
        (NodeOp::Sub, [a, b]) => a - b,
        _ => node.value,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build(source: &str) -> Graph {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty());
        let result = crate::lower::lower(&parsed.program.unwrap(), source);
        assert!(result.diagnostics.is_empty());
        let mut g = result.graph;
        let diags = crate::legalize::legalize(&mut g);
        assert!(diags.is_empty(), "legalize diagnostics: {:?}", diags);
        g
    }

    fn set_input(g: &mut Graph, name: &str, value: f64) {
        let id = g.lookup(name).expect("input not found");
        g.node_mut(id).value = value;
    }

    fn output_value(g: &Graph, name: &str) -> f64 {
        g.node(g.lookup(name).expect("output not found")).value
    }

    #[test]
    fn evaluates_arithmetic() {
        let mut g = build("y = (a + b) * c - a / b");
        set_input(&mut g, "VARa", 6.0);
        set_input(&mut g, "VARb", 2.0);
        set_input(&mut g, "VARc", 0.5);
        eval(&mut g);
        assert!((output_value(&g, "VARy") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn evaluates_intrinsics_and_constants() {
        let mut g = build("y = power(x, 2) + sin(w) * 0.0 + cos(w) * 0.0 + 1.5");
        set_input(&mut g, "VARx", 3.0);
        set_input(&mut g, "VARw", 0.7);
        eval(&mut g);
        assert!((output_value(&g, "VARy") - 10.5).abs() < 1e-12);
    }

    #[test]
    fn negated_output_evaluates_negative() {
        // y = -x evaluates to −x via the sign bit alone.
        let mut g = build("y = -x");
        set_input(&mut g, "VARx", 0.25);
        eval(&mut g);
        assert_eq!(output_value(&g, "VARy"), -0.25);
    }

    #[test]
    fn golden_records_every_set() {
        let mut g = build("y = a * b + c");
        let mut rng = StdRng::seed_from_u64(7);
        let golden = evaluate_golden(&mut g, 3, &mut rng);
        assert_eq!(golden.sets.len(), 3);
        for set in &golden.sets {
            assert_eq!(set.inputs.len(), 3);
            assert_eq!(set.outputs.len(), 1);
            let expected = set.inputs["VARa"] * set.inputs["VARb"] + set.inputs["VARc"];
            assert!((set.outputs["VARy"] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn compare_passes_on_untouched_graph() {
        let mut g = build("y = a * b + sin(c)");
        let mut rng = StdRng::seed_from_u64(11);
        let golden = evaluate_golden(&mut g, 4, &mut rng);
        let diags = evaluate_compare(&mut g, &golden);
        assert!(diags.is_empty(), "unexpected mismatches: {:?}", diags);
    }

    #[test]
    fn compare_detects_broken_rewrite() {
        let mut g = build("y = a + b");
        let mut rng = StdRng::seed_from_u64(13);
        let golden = evaluate_golden(&mut g, 2, &mut rng);

        // Break equivalence: turn a + b into a − b.
        let op = g.operation_ids()[0];
        g.node_mut(op).negate_fanin(1);

        let diags = evaluate_compare(&mut g, &golden);
        assert!(!diags.is_empty());
        assert!(diags.iter().all(|d| d.code == Some(codes::W0301)));
    }

    #[test]
    fn small_drift_within_tolerance_is_accepted() {
        let mut g = build("y = x");
        let mut rng = StdRng::seed_from_u64(17);
        let golden = evaluate_golden(&mut g, 1, &mut rng);

        // Perturb the stored golden output by less than the absolute
        // tolerance; comparison must stay quiet.
        let mut nudged = golden.clone();
        for set in &mut nudged.sets {
            for v in set.outputs.values_mut() {
                *v += 0.005;
            }
        }
        let diags = evaluate_compare(&mut g, &nudged);
        assert!(diags.is_empty());
    }
}
