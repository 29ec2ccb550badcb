// graph.rs — Owning node container and construction API
//
// Nodes live in a single arena indexed by `NodeId`; fanin/fanout lists hold
// indices, so the bidirectional edge representation carries no ownership
// cycle. Name lookup and the kind-partitioned views are separate maps over
// the arena. The front-end drives construction exclusively through
// `add_operation`, `get_or_create`, and `connect`.
//
// Preconditions: callers pass ids obtained from this graph.
// Postconditions: for every edge (u → v), u ∈ v.fanins ⇔ v ∈ u.fanouts;
//                 every view entry is also present in `all`.
// Failure modes: malformed name prefixes and unknown operator symbols are
//                returned as construction diagnostics.
// Side effects: none beyond the owned arena.

use std::collections::BTreeMap;

use crate::diag::{codes, Diagnostic};
use crate::node::{Node, NodeId, NodeKind, NodeOp};

// ── Graph ───────────────────────────────────────────────────────────────────

/// The dataflow graph: an arena of nodes plus name-keyed views.
///
/// Views are `BTreeMap`s so every iteration order is deterministic; the
/// level-ordered passes must never depend on incidental map order.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,

    all: BTreeMap<String, NodeId>,
    inputs: BTreeMap<String, NodeId>,
    outputs: BTreeMap<String, NodeId>,
    operations: BTreeMap<String, NodeId>,
    constants: BTreeMap<String, NodeId>,

    next_opr: u32,
    is_levelized: bool,
    max_level: i32,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    // ── Arena access ────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize].as_ref().expect("stale node id")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize].as_mut().expect("stale node id")
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.all.get(name).copied()
    }

    // ── View iteration (name order, deterministic) ──────────────────────

    pub fn all_ids(&self) -> Vec<NodeId> {
        self.all.values().copied().collect()
    }

    pub fn input_ids(&self) -> Vec<NodeId> {
        self.inputs.values().copied().collect()
    }

    pub fn output_ids(&self) -> Vec<NodeId> {
        self.outputs.values().copied().collect()
    }

    pub fn operation_ids(&self) -> Vec<NodeId> {
        self.operations.values().copied().collect()
    }

    pub fn constant_ids(&self) -> Vec<NodeId> {
        self.constants.values().copied().collect()
    }

    pub fn num_all_nodes(&self) -> usize {
        self.all.len()
    }

    pub fn num_input_nodes(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_output_nodes(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_operation_nodes(&self) -> usize {
        self.operations.len()
    }

    pub fn num_constant_nodes(&self) -> usize {
        self.constants.len()
    }

    // ── Construction API ────────────────────────────────────────────────

    /// Create a fresh Operation node for the given operator symbol.
    /// The node is named `OPR<N>` with an increasing counter.
    pub fn add_operation(&mut self, symbol: &str) -> Result<NodeId, Diagnostic> {
        let op = NodeOp::from_symbol(symbol).ok_or_else(|| {
            Diagnostic::error(format!("unknown operator symbol '{symbol}'"))
                .with_code(codes::E0102)
                .with_hint("supported operators: = + - * / power sin cos")
        })?;

        let name = format!("OPR{}", self.next_opr);
        self.next_opr += 1;

        let id = self.insert(Node::new(&name, NodeKind::Operation, op));
        Ok(id)
    }

    /// Look up a named node, creating it from its 3-character prefix if
    /// absent: `CON` → Constant, `VAR`/`ARR` → Undetermined. `OPR` names
    /// must come through `add_operation`.
    pub fn get_or_create(&mut self, name: &str) -> Result<NodeId, Diagnostic> {
        if let Some(id) = self.all.get(name) {
            return Ok(*id);
        }

        let kind = match name.get(0..3) {
            Some("CON") => NodeKind::Constant,
            Some("VAR") | Some("ARR") => NodeKind::Undetermined,
            Some("OPR") => {
                return Err(Diagnostic::error(format!(
                    "operation node '{name}' must be created through add_operation"
                ))
                .with_code(codes::E0103)
                .with_node(name));
            }
            _ => {
                return Err(
                    Diagnostic::error(format!("malformed name prefix in '{name}'"))
                        .with_code(codes::E0103)
                        .with_node(name),
                );
            }
        };

        let id = self.insert(Node::new(name, kind, NodeOp::Equal));
        Ok(id)
    }

    /// Wire `producer` as the next fanin of `consumer` (sign positive).
    pub fn connect(&mut self, producer: NodeId, consumer: NodeId) {
        self.node_mut(consumer).add_fanin(producer);
        self.node_mut(producer).add_fanout(consumer);
        self.is_levelized = false;
    }

    /// Remove a node from the arena and every view. Edges referencing the
    /// node must already have been unhooked by the caller.
    pub fn delete(&mut self, name: &str) -> bool {
        let Some(id) = self.all.remove(name) else {
            return false;
        };
        self.inputs.remove(name);
        self.outputs.remove(name);
        self.operations.remove(name);
        self.constants.remove(name);
        self.nodes[id.0 as usize] = None;
        self.is_levelized = false;
        true
    }

    /// Move a node to a different kind view. Used by legalization when an
    /// Undetermined node resolves to Input or Output.
    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        let name = self.node(id).name.clone();
        self.inputs.remove(&name);
        self.outputs.remove(&name);
        self.operations.remove(&name);
        self.constants.remove(&name);
        self.node_mut(id).kind = kind;
        match kind {
            NodeKind::Input => {
                self.inputs.insert(name, id);
            }
            NodeKind::Output => {
                self.outputs.insert(name, id);
            }
            NodeKind::Operation => {
                self.operations.insert(name, id);
            }
            NodeKind::Constant => {
                self.constants.insert(name, id);
            }
            NodeKind::Undetermined => {}
        }
    }

    /// Mark the level cache stale. Passes call this after any structural
    /// mutation performed through `node_mut`.
    pub fn invalidate_levels(&mut self) {
        self.is_levelized = false;
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let name = node.name.clone();
        let kind = node.kind;
        self.nodes.push(Some(node));
        self.all.insert(name.clone(), id);
        match kind {
            NodeKind::Input => {
                self.inputs.insert(name, id);
            }
            NodeKind::Output => {
                self.outputs.insert(name, id);
            }
            NodeKind::Operation => {
                self.operations.insert(name, id);
            }
            NodeKind::Constant => {
                self.constants.insert(name, id);
            }
            NodeKind::Undetermined => {}
        }
        self.is_levelized = false;
        id
    }

    // ── Levelization ────────────────────────────────────────────────────

    /// Compute every node's depth from the inputs/constants (level 0);
    /// any other node sits at 1 + max(fanin level). Memoized until the
    /// next structural mutation. Returns the graph's maximum level.
    pub fn levelize(&mut self) -> i32 {
        if self.is_levelized {
            return self.max_level;
        }

        let ids = self.all_ids();
        for &id in &ids {
            self.node_mut(id).level = -1;
        }

        let mut max_level = 0;
        for &id in &ids {
            self.compute_level(id);
            max_level = max_level.max(self.node(id).level);
        }

        self.max_level = max_level;
        self.is_levelized = true;
        max_level
    }

    /// Iterative depth-first level computation from `start`.
    fn compute_level(&mut self, start: NodeId) {
        let mut stack = vec![start];
        while let Some(&id) = stack.last() {
            if self.node(id).level >= 0 {
                stack.pop();
                continue;
            }
            let node = self.node(id);
            if matches!(node.kind, NodeKind::Input | NodeKind::Constant)
                || node.num_fanins() == 0
            {
                self.node_mut(id).level = 0;
                stack.pop();
                continue;
            }

            let mut ready = true;
            let mut max_fanin = -1;
            for i in 0..self.node(id).num_fanins() {
                let fi = self.node(id).fanin(i);
                let fi_level = self.node(fi).level;
                if fi_level < 0 {
                    stack.push(fi);
                    ready = false;
                } else {
                    max_fanin = max_fanin.max(fi_level);
                }
            }
            if ready {
                self.node_mut(id).level = 1 + max_fanin;
                stack.pop();
            }
        }
    }

    // ── Multi-graph support ─────────────────────────────────────────────

    /// Rename every node `name` → `name_<postfix>`, so graphs built from
    /// different source files can be merged without collisions.
    pub fn apply_postfix(&mut self, postfix: &str) {
        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                node.name = format!("{}_{}", node.name, postfix);
            }
        }
        self.rebuild_views();
    }

    /// Union another graph into this one. Nodes are re-indexed into this
    /// arena; a name collision is reported and the colliding node (plus
    /// any edges to it) is dropped.
    pub fn merge(&mut self, other: Graph) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut remap: BTreeMap<NodeId, NodeId> = BTreeMap::new();

        let mut incoming: Vec<(NodeId, Node)> = Vec::new();
        for (name, &old_id) in &other.all {
            let node = other.node(old_id).clone();
            if self.all.contains_key(name) {
                diagnostics.push(
                    Diagnostic::error(format!("merge collision on node name '{name}'"))
                        .with_code(codes::E0101)
                        .with_node(name.clone()),
                );
                continue;
            }
            incoming.push((old_id, node));
        }

        for (old_id, node) in &incoming {
            let new_id = self.insert(Node::new(&node.name, node.kind, node.op));
            remap.insert(*old_id, new_id);
        }

        // Rewire edge lists through the remap, dropping edges to nodes
        // that were skipped in the collision pass.
        for (old_id, node) in incoming {
            let new_id = remap[&old_id];
            for i in 0..node.num_fanins() {
                if let Some(&fi) = remap.get(&node.fanin(i)) {
                    self.node_mut(new_id).add_fanin(fi);
                    let last = self.node(new_id).num_fanins() - 1;
                    self.node_mut(new_id)
                        .set_fanin_sign(last, node.fanin_sign(i));
                }
            }
            for i in 0..node.num_fanouts() {
                if let Some(&fo) = remap.get(&node.fanout(i)) {
                    self.node_mut(new_id).add_fanout(fo);
                }
            }
            self.node_mut(new_id).value = node.value;
        }

        self.is_levelized = false;
        diagnostics
    }

    fn rebuild_views(&mut self) {
        self.all.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.operations.clear();
        self.constants.clear();
        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot else { continue };
            let id = NodeId(index as u32);
            self.all.insert(node.name.clone(), id);
            match node.kind {
                NodeKind::Input => {
                    self.inputs.insert(node.name.clone(), id);
                }
                NodeKind::Output => {
                    self.outputs.insert(node.name.clone(), id);
                }
                NodeKind::Operation => {
                    self.operations.insert(node.name.clone(), id);
                }
                NodeKind::Constant => {
                    self.constants.insert(node.name.clone(), id);
                }
                NodeKind::Undetermined => {}
            }
        }
        self.is_levelized = false;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Build `y = x * 1` as the front-end would: x and y Undetermined,
    /// CON1 constant, OPR0 the Mul.
    fn mul_by_one_graph() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let x = g.get_or_create("VARx").unwrap();
        let one = g.get_or_create("CON1").unwrap();
        let op = g.add_operation("*").unwrap();
        let y = g.get_or_create("VARy").unwrap();
        g.connect(x, op);
        g.connect(one, op);
        g.connect(op, y);
        (g, x, one, op, y)
    }

    #[test]
    fn operation_names_count_up() {
        let mut g = Graph::new();
        let a = g.add_operation("+").unwrap();
        let b = g.add_operation("*").unwrap();
        assert_eq!(g.node(a).name, "OPR0");
        assert_eq!(g.node(b).name, "OPR1");
        assert_eq!(g.node(a).op, NodeOp::Add);
        assert_eq!(g.node(b).op, NodeOp::Mul);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut g = Graph::new();
        let err = g.add_operation("tan").unwrap_err();
        assert_eq!(err.code, Some(codes::E0102));
    }

    #[test]
    fn get_or_create_by_prefix() {
        let mut g = Graph::new();
        let v = g.get_or_create("VARx").unwrap();
        assert_eq!(g.node(v).kind, NodeKind::Undetermined);
        let c = g.get_or_create("CON2.5").unwrap();
        assert_eq!(g.node(c).kind, NodeKind::Constant);
        let a = g.get_or_create("ARRq[0]").unwrap();
        assert_eq!(g.node(a).kind, NodeKind::Undetermined);

        // Re-requesting a name returns the same node.
        assert_eq!(g.get_or_create("VARx").unwrap(), v);
        assert_eq!(g.num_all_nodes(), 3);
    }

    #[test]
    fn bad_prefixes_are_rejected() {
        let mut g = Graph::new();
        assert_eq!(
            g.get_or_create("OPR7").unwrap_err().code,
            Some(codes::E0103)
        );
        assert_eq!(
            g.get_or_create("bogus").unwrap_err().code,
            Some(codes::E0103)
        );
        assert_eq!(g.num_all_nodes(), 0);
    }

    #[test]
    fn connect_is_bidirectional() {
        let (g, x, one, op, y) = mul_by_one_graph();
        assert_eq!(g.node(op).fanins(), &[x, one]);
        assert_eq!(g.node(x).fanouts(), &[op]);
        assert_eq!(g.node(one).fanouts(), &[op]);
        assert_eq!(g.node(y).fanins(), &[op]);
        assert_eq!(g.node(op).fanouts(), &[y]);
        assert!(!g.node(op).fanin_sign(0));
        assert!(!g.node(op).fanin_sign(1));
    }

    #[test]
    fn kind_views_partition_nodes() {
        let (mut g, x, _, op, y) = mul_by_one_graph();
        // Before legalization, VAR nodes sit only in `all`.
        assert_eq!(g.num_input_nodes(), 0);
        assert_eq!(g.num_constant_nodes(), 1);
        assert_eq!(g.num_operation_nodes(), 1);

        g.set_kind(x, NodeKind::Input);
        g.set_kind(y, NodeKind::Output);
        assert_eq!(g.num_input_nodes(), 1);
        assert_eq!(g.num_output_nodes(), 1);
        assert_eq!(g.lookup("VARx"), Some(x));
        assert_eq!(g.operation_ids(), vec![op]);
    }

    #[test]
    fn delete_removes_from_all_views() {
        let (mut g, _, one, op, _) = mul_by_one_graph();
        // Unhook CON1 from the Mul first.
        g.node_mut(op).remove_fanin(one);
        g.node_mut(one).remove_fanout(op);
        assert!(g.delete("CON1"));
        assert_eq!(g.num_constant_nodes(), 0);
        assert_eq!(g.lookup("CON1"), None);
        assert!(!g.delete("CON1"));
    }

    #[test]
    fn levelize_chain() {
        let (mut g, x, one, op, y) = mul_by_one_graph();
        g.set_kind(x, NodeKind::Input);
        g.set_kind(y, NodeKind::Output);
        let max = g.levelize();
        assert_eq!(max, 2);
        assert_eq!(g.node(x).level, 0);
        assert_eq!(g.node(one).level, 0);
        assert_eq!(g.node(op).level, 1);
        assert_eq!(g.node(y).level, 2);
    }

    #[test]
    fn levelize_is_memoized_until_mutation() {
        let (mut g, x, _, _, y) = mul_by_one_graph();
        g.set_kind(x, NodeKind::Input);
        g.set_kind(y, NodeKind::Output);
        assert_eq!(g.levelize(), 2);
        assert_eq!(g.levelize(), 2);

        // A structural mutation invalidates the cache.
        let z = g.get_or_create("VARz").unwrap();
        let add = g.add_operation("+").unwrap();
        g.connect(y, add);
        g.connect(z, add);
        assert!(g.levelize() >= 3);
    }

    #[test]
    fn postfix_renames_every_node() {
        let (mut g, _, _, _, _) = mul_by_one_graph();
        g.apply_postfix("1");
        assert!(g.lookup("VARx_1").is_some());
        assert!(g.lookup("CON1_1").is_some());
        assert!(g.lookup("OPR0_1").is_some());
        assert!(g.lookup("VARx").is_none());
    }

    #[test]
    fn merge_distinct_names_unions_views() {
        let (mut g1, _, _, _, _) = mul_by_one_graph();
        let (mut g2, _, _, _, _) = mul_by_one_graph();
        g1.apply_postfix("1");
        g2.apply_postfix("2");

        let diags = g1.merge(g2);
        assert!(diags.is_empty());
        assert!(g1.lookup("VARx_1").is_some());
        assert!(g1.lookup("VARx_2").is_some());
        assert_eq!(g1.num_all_nodes(), 8);

        // Edges survived the re-indexing.
        let op2 = g1.lookup("OPR0_2").unwrap();
        let x2 = g1.lookup("VARx_2").unwrap();
        assert_eq!(g1.node(op2).fanin(0), x2);
        assert_eq!(g1.node(x2).fanouts(), &[op2]);
    }

    #[test]
    fn merge_collision_is_reported() {
        let (mut g1, _, _, _, _) = mul_by_one_graph();
        let (g2, _, _, _, _) = mul_by_one_graph();
        let diags = g1.merge(g2);
        assert_eq!(diags.len(), 4); // VARx, CON1, OPR0, VARy all collide
        assert!(diags.iter().all(|d| d.code == Some(codes::E0101)));
    }
}
