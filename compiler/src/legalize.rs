// legalize.rs — Resolve the raw graph into its evaluable form
//
// Runs exactly once, after construction and before any evaluation or
// optimization. Resolves every Undetermined node to Input/Output or splices
// it out as a passthrough, normalizes subtraction into Add-with-sign form
// in level order, normalizes signs locally, and parses constant values out
// of `CON` node names.
//
// Preconditions: `graph` is a raw graph fresh from lowering.
// Postconditions: no Undetermined kinds, no Sub ops; constants carry their
//                 parsed values; the level cache is invalidated.
// Failure modes: unexpected Sub arity and multi-fanin passthroughs are
//                reported; legalization continues but correctness is no
//                longer guaranteed.
// Side effects: none beyond the graph.

use crate::diag::{codes, Diagnostic};
use crate::graph::Graph;
use crate::node::{NodeKind, NodeOp};
use crate::optimize::propagate_sign;
use crate::pq::MinHeap;

/// Legalize a raw graph in place. Returns accumulated diagnostics.
pub fn legalize(graph: &mut Graph) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    resolve_undetermined(graph, &mut diagnostics);
    graph.levelize();
    normalize_subtraction(graph, &mut diagnostics);
    propagate_sign(graph);
    parse_constants(graph, &mut diagnostics);
    graph.invalidate_levels();

    diagnostics
}

// ── Step 1: Undetermined resolution ─────────────────────────────────────────

/// Resolve each Undetermined node: no fanins → Input, no fanouts → Output,
/// both → internal passthrough, spliced out with no sign change.
fn resolve_undetermined(graph: &mut Graph, diagnostics: &mut Vec<Diagnostic>) {
    let undetermined: Vec<_> = graph
        .all_ids()
        .into_iter()
        .filter(|&id| graph.node(id).kind == NodeKind::Undetermined)
        .collect();

    for id in undetermined {
        let num_fanins = graph.node(id).num_fanins();
        let num_fanouts = graph.node(id).num_fanouts();

        match (num_fanins, num_fanouts) {
            (0, n) if n > 0 => graph.set_kind(id, NodeKind::Input),
            (n, 0) if n > 0 => graph.set_kind(id, NodeKind::Output),
            (0, 0) => {
                // Dangling name with no uses at all; drop it.
                let name = graph.node(id).name.clone();
                graph.delete(&name);
            }
            (1, _) => splice_passthrough(graph, id),
            _ => {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "passthrough has {num_fanins} fanins, expected exactly 1"
                    ))
                    .with_code(codes::E0202)
                    .with_node(graph.node(id).name.clone()),
                );
            }
        }
    }
}

/// Rewire a single-fanin passthrough's producer directly to each consumer.
fn splice_passthrough(graph: &mut Graph, id: crate::node::NodeId) {
    let producer = graph.node(id).fanin(0);
    let consumers = graph.node(id).fanouts().to_vec();

    for consumer in consumers {
        graph.node_mut(consumer).replace_fanin(id, producer);
        graph.node_mut(producer).add_fanout(consumer);
    }
    graph.node_mut(producer).remove_fanout(id);

    let name = graph.node(id).name.clone();
    graph.delete(&name);
}

// ── Step 3: Sub normalization ───────────────────────────────────────────────

/// Rewrite subtraction in order of increasing level: unary minus is spliced
/// into a sign toggle on each consumer edge; binary subtract becomes Add
/// with a negated second operand. Level order matters — a stacked negation
/// must fold into its consumer edge before the consumer is processed.
fn normalize_subtraction(graph: &mut Graph, diagnostics: &mut Vec<Diagnostic>) {
    let mut pq = MinHeap::new();
    for id in graph.operation_ids() {
        if graph.node(id).op == NodeOp::Sub {
            pq.push(id, graph.node(id).level);
        }
    }

    while let Some((id, _)) = pq.pop() {
        match graph.node(id).num_fanins() {
            1 => splice_unary_minus(graph, id),
            2 => {
                graph.node_mut(id).op = NodeOp::Add;
                graph.node_mut(id).negate_fanin(1);
            }
            n => {
                diagnostics.push(
                    Diagnostic::error(format!("subtraction with unexpected arity {n}"))
                        .with_code(codes::E0201)
                        .with_node(graph.node(id).name.clone()),
                );
            }
        }
    }
    graph.invalidate_levels();
}

/// Splice out a 1-fanin Sub. The net factor composes the negation with the
/// node's own fanin sign, so `-(−x)` folds to no toggle at all.
fn splice_unary_minus(graph: &mut Graph, id: crate::node::NodeId) {
    let producer = graph.node(id).fanin(0);
    let negates = !graph.node(id).fanin_sign(0);
    let consumers = graph.node(id).fanouts().to_vec();

    for consumer in consumers {
        let index = graph
            .node(consumer)
            .index_of_fanin(id)
            .expect("fanout without matching fanin");
        graph.node_mut(consumer).replace_fanin(id, producer);
        if negates {
            graph.node_mut(consumer).negate_fanin(index);
        }
        graph.node_mut(producer).add_fanout(consumer);
    }
    graph.node_mut(producer).remove_fanout(id);

    let name = graph.node(id).name.clone();
    graph.delete(&name);
}

// ── Step 5: Constant parsing ────────────────────────────────────────────────

/// Parse each `CON<decimal>` name suffix into the node's value.
fn parse_constants(graph: &mut Graph, diagnostics: &mut Vec<Diagnostic>) {
    for id in graph.constant_ids() {
        let name = graph.node(id).name.clone();
        match name[3..].parse::<f64>() {
            Ok(value) => graph.node_mut(id).value = value,
            Err(_) => diagnostics.push(
                Diagnostic::error(format!("cannot parse constant value from '{name}'"))
                    .with_code(codes::E0203)
                    .with_node(name),
            ),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
