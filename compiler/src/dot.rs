// dot.rs — Graphviz DOT output for dataflow graphs
//
// Renders the graph for inspection with `dot` or other Graphviz layout
// engines: inputs pinned to the top rank in light blue, outputs to the
// bottom rank in dark blue, constants as plain text, operations as
// rectangles labeled with their symbol, and negated operand edges in red.
//
// Preconditions: `graph` is fully constructed (any phase).
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::Graph;

/// Emit the graph as a Graphviz DOT string. Node and edge order follows
/// the name-sorted views, so output is deterministic.
pub fn emit_dot(graph: &Graph) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph forge {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();

    // Input nodes pinned to the top rank.
    writeln!(buf, "    {{rank=min").unwrap();
    for id in graph.input_ids() {
        let node = graph.node(id);
        writeln!(
            buf,
            "        \"{}\" [shape=rect, style=\"rounded,filled\", fillcolor=deepskyblue, label=\"{}\"];",
            node.name,
            strip_prefix(&node.name),
        )
        .unwrap();
    }
    writeln!(buf, "    }}").unwrap();

    // Output nodes pinned to the bottom rank.
    writeln!(buf, "    {{rank=max").unwrap();
    for id in graph.output_ids() {
        let node = graph.node(id);
        writeln!(
            buf,
            "        \"{}\" [shape=rect, style=\"rounded,filled\", fillcolor=deepskyblue4, fontcolor=white, label=\"{}\"];",
            node.name,
            strip_prefix(&node.name),
        )
        .unwrap();
    }
    writeln!(buf, "    }}").unwrap();

    // Constants as plain text.
    for id in graph.constant_ids() {
        let node = graph.node(id);
        writeln!(
            buf,
            "    \"{}\" [shape=plaintext, label=\"{}\"];",
            node.name,
            strip_prefix(&node.name),
        )
        .unwrap();
    }

    // Operations as rectangles labeled by symbol.
    for id in graph.operation_ids() {
        let node = graph.node(id);
        writeln!(
            buf,
            "    \"{}\" [shape=rect, label=\"{}\"];",
            node.name,
            node.op.symbol(),
        )
        .unwrap();
    }

    // Edges; a negated operand renders red.
    for id in graph.all_ids() {
        let node = graph.node(id);
        for i in 0..node.num_fanins() {
            let fanin = graph.node(node.fanin(i));
            if node.fanin_sign(i) {
                writeln!(
                    buf,
                    "    \"{}\" -> \"{}\" [color=red];",
                    fanin.name, node.name
                )
                .unwrap();
            } else {
                writeln!(buf, "    \"{}\" -> \"{}\";", fanin.name, node.name).unwrap();
            }
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

/// Drop the 3-character provenance prefix for display.
fn strip_prefix(name: &str) -> &str {
    name.get(3..).unwrap_or(name)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn build(source: &str) -> Graph {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty());
        let result = crate::lower::lower(&parsed.program.unwrap(), source);
        assert!(result.diagnostics.is_empty());
        let mut g = result.graph;
        let diags = crate::legalize::legalize(&mut g);
        assert!(diags.is_empty());
        g
    }

    #[test]
    fn ranks_and_shapes() {
        let dot = emit_dot(&build("y = a * 2.5"));
        assert!(dot.starts_with("digraph forge {"));
        assert!(dot.contains("{rank=min"));
        assert!(dot.contains("{rank=max"));
        assert!(dot.contains("fillcolor=deepskyblue,"));
        assert!(dot.contains("fillcolor=deepskyblue4"));
        assert!(dot.contains("\"CON2.5\" [shape=plaintext, label=\"2.5\"];"));
        assert!(dot.contains("[shape=rect, label=\"*\"];"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn negated_edge_is_red() {
        let dot = emit_dot(&build("y = a - b"));
        assert!(dot.contains("\"VARb\" -> \"OPR0\" [color=red];"));
        assert!(dot.contains("\"VARa\" -> \"OPR0\";"));
    }

    #[test]
    fn labels_drop_the_prefix() {
        let dot = emit_dot(&build("y = alpha + 1.5"));
        assert!(dot.contains("label=\"alpha\""));
        assert!(dot.contains("label=\"y\""));
        assert!(!dot.contains("label=\"VARalpha\""));
    }

    #[test]
    fn output_is_deterministic() {
        let a = emit_dot(&build("y = a + b * c"));
        let b = emit_dot(&build("y = a + b * c"));
        assert_eq!(a, b);
    }
}
