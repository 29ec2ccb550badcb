// optimize.rs — Algebraic optimization passes
//
// Five equivalence-preserving rewrites over the legalized graph:
//   simplify_arithmetic          multiply-by-one elimination
//   eliminate_duplicated_operation  value numbering (level-ordered)
//   maximize_parallelism         tree-height reduction over Add-chains
//   propagate_sign               local sign normalization
//   delete_unused_nodes          drop fully disconnected nodes
//
// Preconditions: graph is legalized; value numbering and sign propagation
//                additionally require a levelized graph (they levelize
//                themselves).
// Postconditions: graph computes the same function (verified externally by
//                 the golden oracle); level cache invalidated.
// Failure modes: none — these passes cannot fail, only miss rewrites.
// Side effects: none beyond the graph.

use std::collections::{HashMap, HashSet};

use crate::graph::Graph;
use crate::node::{NodeId, NodeKind, NodeOp};
use crate::pq::MinHeap;

/// Run the full pass pipeline in its fixed order.
pub fn optimize(graph: &mut Graph) {
    simplify_arithmetic(graph);
    eliminate_duplicated_operation(graph);
    maximize_parallelism(graph);
    propagate_sign(graph);
    delete_unused_nodes(graph);
}

// ── SimplifyArithmetic ──────────────────────────────────────────────────────

/// Splice out every `x * 1.0`, wiring the non-constant operand directly to
/// each consumer. When the two fanin signs differ the product is negative,
/// so the consumer edge's sign is toggled during rewiring.
pub fn simplify_arithmetic(graph: &mut Graph) {
    for id in graph.operation_ids() {
        let node = graph.node(id);
        if node.op != NodeOp::Mul || node.num_fanins() != 2 {
            continue;
        }

        let const_index = if is_constant_one(graph, node.fanin(0)) {
            0
        } else if is_constant_one(graph, node.fanin(1)) {
            1
        } else {
            continue;
        };
        let keep_index = 1 - const_index;

        let keep = node.fanin(keep_index);
        let one = node.fanin(const_index);
        let toggle = node.fanin_sign(0) != node.fanin_sign(1);

        for consumer in graph.node(id).fanouts().to_vec() {
            let index = graph
                .node(consumer)
                .index_of_fanin(id)
                .expect("fanout without matching fanin");
            graph.node_mut(consumer).replace_fanin(id, keep);
            if toggle {
                graph.node_mut(consumer).negate_fanin(index);
            }
            graph.node_mut(keep).add_fanout(consumer);
        }
        graph.node_mut(keep).remove_fanout(id);
        graph.node_mut(one).remove_fanout(id);

        let name = graph.node(id).name.clone();
        graph.delete(&name);
    }
    graph.invalidate_levels();
}

fn is_constant_one(graph: &Graph, id: NodeId) -> bool {
    let node = graph.node(id);
    node.kind == NodeKind::Constant && node.value == 1.0
}

// ── EliminateDuplicatedOperation (value numbering) ──────────────────────────

/// Remove operations that recompute an existing value.
///
/// Keys are `<op><sign?><fanin name>…` in operand order; processing in
/// increasing level order guarantees a canonical node is registered before
/// any of its duplicates is visited, so duplicates always collapse onto the
/// first. Operand order is kept significant even for commutative ops,
/// matching the key scheme in Engineering a Compiler §8.4.1.
pub fn eliminate_duplicated_operation(graph: &mut Graph) {
    graph.levelize();

    let mut pq = MinHeap::new();
    for id in graph.operation_ids() {
        pq.push(id, graph.node(id).level);
    }

    let mut vn_map: HashMap<String, NodeId> = HashMap::new();

    while let Some((id, _)) = pq.pop() {
        let node = graph.node(id);
        let mut key = String::from(node.op.symbol());
        for i in 0..node.num_fanins() {
            if node.fanin_sign(i) {
                key.push('-');
            }
            key.push_str(&graph.node(node.fanin(i)).name);
        }

        if let Some(&canonical) = vn_map.get(&key) {
            // Duplicate: rewire every consumer to the canonical node.
            for fanin in graph.node(id).fanins().to_vec() {
                graph.node_mut(fanin).remove_fanout(id);
            }
            for consumer in graph.node(id).fanouts().to_vec() {
                graph.node_mut(canonical).add_fanout(consumer);
                graph.node_mut(consumer).replace_fanin(id, canonical);
            }
            let name = graph.node(id).name.clone();
            graph.delete(&name);
        } else {
            vn_map.insert(key, id);
        }
    }
    graph.invalidate_levels();
}

// ── MaximizeParallelism (tree-height reduction) ─────────────────────────────

const ADD_PRECEDENCE: i64 = 1;

/// Rebalance skewed Add-chains into (approximately) balanced trees.
///
/// Phase 1 collects candidate roots: Add nodes whose result leaves the
/// chain (multiple fanouts, or a single fanout with a different op).
/// Phase 2 flattens each root's chain into ranked operands and rebuilds a
/// balanced tree, reusing the chain's interior nodes so the rewrite is
/// allocation-neutral. See Engineering a Compiler §8.4.2.
pub fn maximize_parallelism(graph: &mut Graph) {
    let mut candidates = MinHeap::new();
    for id in graph.operation_ids() {
        let node = graph.node(id);
        let leaves_chain = node.num_fanouts() > 1
            || (node.num_fanouts() == 1 && graph.node(node.fanout(0)).op != node.op);
        if leaves_chain && node.op == NodeOp::Add {
            candidates.push(id, ADD_PRECEDENCE);
        }
    }

    let mut balancer = Balancer {
        graph,
        ranks: HashMap::new(),
        candidates,
    };
    while let Some((root, _)) = balancer.candidates.pop() {
        balancer.balance(root);
    }
    balancer.graph.invalidate_levels();
}

/// Shared state for one tree-height reduction run: the rank map persists
/// across roots so an already-balanced sub-tree is treated as an operand.
struct Balancer<'a> {
    graph: &'a mut Graph,
    ranks: HashMap<NodeId, i64>,
    candidates: MinHeap<NodeId, i64>,
}

/// Operand heap entry: the operand node and its accumulated sign, keyed by
/// rank. Each collected occurrence carries its own sign, so an operand
/// reached twice with different signs stays correct.
type OperandHeap = MinHeap<(NodeId, bool), i64>;

impl Balancer<'_> {
    /// Flatten and rebuild the chain rooted at `root`.
    fn balance(&mut self, root: NodeId) {
        if self.ranks.contains_key(&root) {
            return; // already processed via another root
        }

        let mut operands = OperandHeap::new();
        let mut operations: Vec<NodeId> = Vec::new();

        let op = self.graph.node(root).op;
        let (f0, s0) = (self.graph.node(root).fanin(0), self.graph.node(root).fanin_sign(0));
        let (f1, s1) = (self.graph.node(root).fanin(1), self.graph.node(root).fanin_sign(1));

        let rank = self.flatten(f0, op, s0, &mut operands, &mut operations)
            + self.flatten(f1, op, s1, &mut operands, &mut operations);
        self.ranks.insert(root, rank);

        self.rebuild(root, operands, operations);
    }

    /// Collect the operands of the same-op chain below `n`.
    ///
    /// `sign` is the accumulated negation along the path: fanin signs
    /// XOR-compose, and a negated interior node inverts all of its
    /// descendants. Returns `n`'s rank (its operand count).
    fn flatten(
        &mut self,
        n: NodeId,
        op: NodeOp,
        sign: bool,
        operands: &mut OperandHeap,
        operations: &mut Vec<NodeId>,
    ) -> i64 {
        if let Some(&rank) = self.ranks.get(&n) {
            // Already processed; it becomes an operand.
            operands.push((n, sign), rank);
            return rank;
        }

        let kind = self.graph.node(n).kind;
        let node_op = self.graph.node(n).op;
        if kind == NodeKind::Constant {
            self.ranks.insert(n, 0);
            operands.push((n, sign), 0);
            0
        } else if kind == NodeKind::Input || node_op != op {
            // Chain boundary: an input or a different operation.
            self.ranks.insert(n, 1);
            operands.push((n, sign), 1);
            1
        } else if self.candidates.contains(&n) {
            // A nested candidate root: balance it first, then treat the
            // whole balanced sub-tree as one operand.
            self.balance(n);
            let rank = self.ranks[&n];
            operands.push((n, sign), rank);
            rank
        } else {
            // Interior same-op node: recurse into both operands.
            let (f0, s0) = (self.graph.node(n).fanin(0), self.graph.node(n).fanin_sign(0));
            let (f1, s1) = (self.graph.node(n).fanin(1), self.graph.node(n).fanin_sign(1));
            let rank = self.flatten(f0, op, s0 ^ sign, operands, operations)
                + self.flatten(f1, op, s1 ^ sign, operands, operations);
            self.ranks.insert(n, rank);
            operations.push(n);
            rank
        }
    }

    /// Build a balanced tree over the collected operands, reusing the
    /// detached interior nodes. The interior count is exactly
    /// operand_count − 1 (root included), so the pool empties as the root
    /// is produced.
    fn rebuild(&mut self, root: NodeId, mut operands: OperandHeap, mut operations: Vec<NodeId>) {
        // Two operands mean a single operation; nothing to rebuild.
        if operands.len() == 2 {
            return;
        }

        // Detach the root from its fanins.
        for fanin in self.graph.node(root).fanins().to_vec() {
            self.graph.node_mut(fanin).remove_fanout(root);
        }
        self.graph.node_mut(root).clear_fanins();

        // Detach interior nodes from everything.
        for &n in &operations {
            for fanin in self.graph.node(n).fanins().to_vec() {
                self.graph.node_mut(fanin).remove_fanout(n);
            }
            self.graph.node_mut(n).clear_fanins();
            for fanout in self.graph.node(n).fanouts().to_vec() {
                self.graph.node_mut(fanout).remove_fanin(n);
            }
            self.graph.node_mut(n).clear_fanouts();
        }

        // Repeatedly combine the two lowest-rank operands.
        loop {
            let ((left, left_sign), left_rank) =
                operands.pop().expect("operand heap underflow");
            let ((right, right_sign), right_rank) =
                operands.pop().expect("operand heap underflow");

            let target = if operands.is_empty() {
                root
            } else {
                operations.pop().expect("interior node pool exhausted")
            };

            self.graph.connect(left, target);
            self.graph.connect(right, target);
            if left_sign {
                self.graph.node_mut(target).negate_fanin(0);
            }
            if right_sign {
                self.graph.node_mut(target).negate_fanin(1);
            }

            let rank = left_rank + right_rank;
            self.ranks.insert(target, rank);

            if operands.is_empty() {
                break;
            }
            operands.push((target, false), rank);
        }
    }
}

// ── PropagateSign ───────────────────────────────────────────────────────────

/// Normalize fanin signs locally at each node, in increasing level order so
/// a toggle pushed into a consumer is seen before the consumer is visited:
///   Add with both operands negative  → clear both, negate in every fanout;
///   Mul/Div with an odd negative count → clear all, negate in every fanout;
///   Mul/Div with an even count         → clear all.
pub fn propagate_sign(graph: &mut Graph) {
    graph.levelize();

    let mut pq = MinHeap::new();
    for id in graph.operation_ids() {
        pq.push(id, graph.node(id).level);
    }

    while let Some((id, _)) = pq.pop() {
        match graph.node(id).op {
            NodeOp::Add => {
                let node = graph.node(id);
                let both_negative =
                    node.num_fanins() == 2 && node.fanin_sign(0) && node.fanin_sign(1);
                if both_negative {
                    graph.node_mut(id).set_fanin_sign(0, false);
                    graph.node_mut(id).set_fanin_sign(1, false);
                    toggle_sign_in_fanouts(graph, id);
                }
            }
            NodeOp::Mul | NodeOp::Div => {
                let node = graph.node(id);
                let negatives = (0..node.num_fanins())
                    .filter(|&i| node.fanin_sign(i))
                    .count();
                for i in 0..graph.node(id).num_fanins() {
                    graph.node_mut(id).set_fanin_sign(i, false);
                }
                if negatives % 2 == 1 {
                    toggle_sign_in_fanouts(graph, id);
                }
            }
            _ => {}
        }
    }
}

/// Negate `id`'s sign bit in every consumer edge (every occurrence of `id`
/// in every fanout's fanin list).
fn toggle_sign_in_fanouts(graph: &mut Graph, id: NodeId) {
    let mut seen = HashSet::new();
    for consumer in graph.node(id).fanouts().to_vec() {
        if !seen.insert(consumer) {
            continue;
        }
        let indices: Vec<usize> = graph
            .node(consumer)
            .fanins()
            .iter()
            .enumerate()
            .filter(|&(_, &fanin)| fanin == id)
            .map(|(i, _)| i)
            .collect();
        for index in indices {
            graph.node_mut(consumer).negate_fanin(index);
        }
    }
}

// ── DeleteUnusedNodes ───────────────────────────────────────────────────────

/// Remove every node whose fanin and fanout lists are both empty — the
/// debris other passes leave behind (spliced constants, collapsed chains).
pub fn delete_unused_nodes(graph: &mut Graph) {
    for id in graph.all_ids() {
        let node = graph.node(id);
        if node.num_fanins() == 0 && node.num_fanouts() == 0 {
            let name = node.name.clone();
            graph.delete(&name);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
