// scheduler.rs — Heterogeneous list scheduler
//
// Two stages. Partition: every operation whose result leaves its expression
// tree (multiple consumers, or feeding an output) roots a sub-tree; roots
// are prioritized so the ones whose producers sit shallowest schedule
// first. Schedule: sub-trees are placed depth-first, each operation onto
// the (group, element, cycle) minimizing its start subject to execution
// slots, the group's input fetch bandwidth, and a one-cycle penalty for
// operands arriving from another group.
//
// Preconditions: graph is legalized and optimized; processor configured.
// Postconditions: every reachable operation carries (pg, pe, start, finish);
//                 the result lists per-operation records and the makespan.
// Failure modes: unsupported op, execution-slot collision, or exhausting
//                the cycle bound — all fatal, aborting the schedule.
// Side effects: writes node scheduling state and processor reservations.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::graph::Graph;
use crate::node::{NodeId, NodeKind};
use crate::pq::MinHeap;
use crate::processor::{latency, Processor};

// ── Public types ────────────────────────────────────────────────────────────

/// Where and when one operation executes.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRecord {
    pub name: String,
    pub op: String,
    pub pg: usize,
    pub pe: usize,
    pub start: usize,
    pub finish: usize,
}

/// Aggregate schedule quality numbers.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSummary {
    pub operation_count: usize,
    pub final_finish_time: usize,
    pub speedup: f64,
}

/// The computed schedule artifact.
#[derive(Debug, Serialize)]
pub struct ScheduledProgram {
    pub records: Vec<ScheduleRecord>,
    pub summary: ScheduleSummary,
}

/// Result of scheduling: the artifact (absent on fatal errors) plus
/// diagnostics.
#[derive(Debug)]
pub struct ScheduleResult {
    pub schedule: Option<ScheduledProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Schedule every operation in the graph onto the processor.
pub fn schedule(graph: &mut Graph, processor: &mut Processor) -> ScheduleResult {
    let mut ctx = ScheduleCtx::new(graph, processor);
    let ok = ctx.run();
    ctx.build_result(ok)
}

// ── Internal context ────────────────────────────────────────────────────────

struct ScheduleCtx<'a> {
    graph: &'a mut Graph,
    processor: &'a mut Processor,
    /// Sub-tree roots identified by the partition stage.
    roots: HashSet<NodeId>,
    /// External nodes (inputs, constants, other roots) feeding each root's
    /// sub-tree; intersection size drives same-priority sibling ordering.
    root_ext: HashMap<NodeId, HashSet<NodeId>>,
    /// Allocated input fetch times: (external name, group) → cycle. An
    /// external value occupies a group's fetch table at most once.
    input_map: HashMap<(String, usize), usize>,
    records: Vec<ScheduleRecord>,
    final_finish_time: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ScheduleCtx<'a> {
    fn new(graph: &'a mut Graph, processor: &'a mut Processor) -> Self {
        ScheduleCtx {
            graph,
            processor,
            roots: HashSet::new(),
            root_ext: HashMap::new(),
            input_map: HashMap::new(),
            records: Vec::new(),
            final_finish_time: 0,
            diagnostics: Vec::new(),
        }
    }

    fn fatal(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    fn build_result(self, ok: bool) -> ScheduleResult {
        let schedule = if ok {
            let operation_count = self.graph.num_operation_nodes();
            let speedup = if self.final_finish_time > 0 {
                operation_count as f64 / self.final_finish_time as f64
            } else {
                0.0
            };
            Some(ScheduledProgram {
                records: self.records,
                summary: ScheduleSummary {
                    operation_count,
                    final_finish_time: self.final_finish_time,
                    speedup,
                },
            })
        } else {
            None
        };
        ScheduleResult {
            schedule,
            diagnostics: self.diagnostics,
        }
    }

    // ── Partition ───────────────────────────────────────────────────────

    /// Identify sub-tree roots and push them into a priority heap.
    ///
    /// Priority is `-(1000×(100 − max_input_level) + Σ external fanouts)`,
    /// popped min-first: a root whose deepest producer-root sits shallower
    /// pops earlier (its operands are ready sooner), with the external
    /// fanout footprint breaking ties.
    fn partition(&mut self) -> MinHeap<NodeId, i64> {
        self.graph.levelize();

        for id in self.graph.operation_ids() {
            let node = self.graph.node(id);
            let is_root = node.num_fanouts() > 1
                || (node.num_fanouts() == 1
                    && self.graph.node(node.fanout(0)).kind == NodeKind::Output);
            if is_root {
                self.roots.insert(id);
            }
        }

        let mut heap = MinHeap::new();
        for root in self.graph.operation_ids() {
            if !self.roots.contains(&root) {
                continue;
            }

            let mut ext: HashSet<NodeId> = HashSet::new();
            let mut max_input_level: i64 = 0;
            let mut stack = vec![root];
            while let Some(n) = stack.pop() {
                for i in 0..self.graph.node(n).num_fanins() {
                    let fanin = self.graph.node(n).fanin(i);
                    if self.roots.contains(&fanin) {
                        max_input_level = max_input_level.max(self.graph.node(fanin).level as i64);
                        ext.insert(fanin);
                    } else if matches!(
                        self.graph.node(fanin).kind,
                        NodeKind::Input | NodeKind::Constant
                    ) {
                        ext.insert(fanin);
                    } else {
                        stack.push(fanin);
                    }
                }
            }

            let ext_fanout_sum: i64 = ext
                .iter()
                .map(|&id| self.graph.node(id).num_fanouts() as i64)
                .sum();
            let priority = -(1000 * (100 - max_input_level) + ext_fanout_sum);
            heap.push(root, priority);
            self.root_ext.insert(root, ext);
        }
        heap
    }

    // ── Main loop ───────────────────────────────────────────────────────

    fn run(&mut self) -> bool {
        let mut heap = self.partition();

        while let Some((root, priority)) = heap.pop() {
            // Collect every root sharing exactly this priority.
            let mut siblings = vec![root];
            while heap.peek_priority() == Some(priority) {
                if let Some((sibling, _)) = heap.pop() {
                    siblings.push(sibling);
                }
            }

            while !siblings.is_empty() {
                let current = siblings.remove(0);
                if !self.schedule_subtree(current) {
                    return false;
                }

                // Among the remaining siblings, schedule next the one
                // sharing the most external nodes with the sub-tree just
                // placed — overlapping inputs reuse the same fetch slots.
                if siblings.len() > 1 {
                    let current_ext = &self.root_ext[&current];
                    let mut best_index = 0;
                    let mut best_common = 0;
                    for (index, sibling) in siblings.iter().enumerate() {
                        let common = current_ext
                            .intersection(&self.root_ext[sibling])
                            .count();
                        if common > best_common {
                            best_common = common;
                            best_index = index;
                        }
                    }
                    let chosen = siblings.remove(best_index);
                    siblings.insert(0, chosen);
                }
            }
        }
        true
    }

    // ── Sub-tree traversal ──────────────────────────────────────────────

    /// Place the sub-tree under `root` in post-order: every fanin chain of
    /// single-consumer operations belongs to this sub-tree; roots, inputs,
    /// and constants terminate the walk.
    fn schedule_subtree(&mut self, root: NodeId) -> bool {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                order.push(n);
                continue;
            }
            stack.push((n, true));
            for i in (0..self.graph.node(n).num_fanins()).rev() {
                let fanin = self.graph.node(n).fanin(i);
                if self.is_internal(fanin) {
                    stack.push((fanin, false));
                }
            }
        }

        for n in order {
            if !self.place(n) {
                return false;
            }
        }
        true
    }

    fn is_internal(&self, id: NodeId) -> bool {
        let node = self.graph.node(id);
        node.kind == NodeKind::Operation
            && !self.roots.contains(&id)
            && node.num_fanouts() == 1
    }

    fn is_external_operand(&self, id: NodeId) -> bool {
        matches!(
            self.graph.node(id).kind,
            NodeKind::Input | NodeKind::Constant
        )
    }

    // ── Placement ───────────────────────────────────────────────────────

    /// Place one operation: cost every compatible (group, element), then
    /// commit the cheapest.
    fn place(&mut self, n: NodeId) -> bool {
        let op = self.graph.node(n).op;
        let Some(op_latency) = latency(op) else {
            let name = self.graph.node(n).name.clone();
            self.fatal(
                Diagnostic::error(format!("no process element supports '{}'", op.symbol()))
                    .with_code(codes::E0401)
                    .with_node(name),
            );
            return false;
        };

        // Cost table: earliest start per compatible (pg, pe).
        let mut best: Option<(usize, usize, usize)> = None; // (time, pg, pe)
        let mut any_compatible = false;

        for pg_index in 0..self.processor.num_groups() {
            let pes = self.processor.compatible_elements(op, pg_index).to_vec();
            if pes.is_empty() {
                continue;
            }
            any_compatible = true;

            let Some(latest_arrival) = self.latest_arrival(n, pg_index) else {
                continue; // fetch table exhausted in this group
            };

            for pe_index in pes {
                let group = self.processor.group(pg_index);
                if let Some(time) = group.elements()[pe_index].earliest_free_slot(latest_arrival)
                {
                    if best.map_or(true, |(best_time, _, _)| time < best_time) {
                        best = Some((time, pg_index, pe_index));
                    }
                }
            }
        }

        if !any_compatible {
            let name = self.graph.node(n).name.clone();
            self.fatal(
                Diagnostic::error(format!("no process element supports '{}'", op.symbol()))
                    .with_code(codes::E0401)
                    .with_node(name),
            );
            return false;
        }
        let Some((time, pg_index, pe_index)) = best else {
            let name = self.graph.node(n).name.clone();
            self.fatal(
                Diagnostic::error(format!(
                    "schedule exceeds the {}-cycle bound",
                    self.processor.max_cycles()
                ))
                .with_code(codes::E0403)
                .with_node(name),
            );
            return false;
        };

        self.commit(n, pg_index, pe_index, time, op_latency)
    }

    /// Latest cycle at which all of `n`'s operands can be present at group
    /// `pg_index`. External operands come through the group's fetch table
    /// (reusing an already-allocated seat when one exists); operation
    /// operands arrive at their finish time, plus one cycle when they were
    /// executed on a different group. Returns None if the fetch table has
    /// no seat left.
    fn latest_arrival(&self, n: NodeId, pg_index: usize) -> Option<usize> {
        let mut latest = 0;
        let mut probe: Option<(usize, usize)> = None;

        for i in 0..self.graph.node(n).num_fanins() {
            let fanin = self.graph.node(n).fanin(i);
            let arrival = if self.is_external_operand(fanin) {
                let key = (self.graph.node(fanin).name.clone(), pg_index);
                match self.input_map.get(&key) {
                    Some(&time) => time,
                    None => {
                        let (line, time) = self
                            .processor
                            .group(pg_index)
                            .get_earliest_input_slot(probe)?;
                        probe = Some((line, time));
                        time
                    }
                }
            } else {
                let fanin_node = self.graph.node(fanin);
                let mut time = fanin_node.finish_time;
                if fanin_node.is_scheduled && fanin_node.pg_scheduled != pg_index as i32 {
                    time += 1; // inter-group transfer
                }
                time
            };
            latest = latest.max(arrival);
        }
        Some(latest)
    }

    /// Reserve the chosen seat: allocate fetch slots for any external
    /// operand not yet seated in this group, mark the execution slot, and
    /// write the node's scheduling state.
    fn commit(
        &mut self,
        n: NodeId,
        pg_index: usize,
        pe_index: usize,
        time: usize,
        op_latency: usize,
    ) -> bool {
        let mut probe: Option<(usize, usize)> = None;
        for i in 0..self.graph.node(n).num_fanins() {
            let fanin = self.graph.node(n).fanin(i);
            if !self.is_external_operand(fanin) {
                continue;
            }
            let key = (self.graph.node(fanin).name.clone(), pg_index);
            if self.input_map.contains_key(&key) {
                continue;
            }
            let Some((line, slot_time)) = self
                .processor
                .group(pg_index)
                .get_earliest_input_slot(probe)
            else {
                let name = self.graph.node(fanin).name.clone();
                self.fatal(
                    Diagnostic::error(format!(
                        "input fetch table exceeds the {}-cycle bound",
                        self.processor.max_cycles()
                    ))
                    .with_code(codes::E0403)
                    .with_node(name),
                );
                return false;
            };
            self.processor
                .group_mut(pg_index)
                .allocate_input(line, slot_time, fanin);
            self.input_map.insert(key, slot_time);
            probe = Some((line, slot_time));
        }

        let group = self.processor.group_mut(pg_index);
        if group.elements()[pe_index].slot(time).is_some() {
            let name = self.graph.node(n).name.clone();
            self.fatal(
                Diagnostic::error(format!(
                    "execution slot collision at group {pg_index}, element {pe_index}, cycle {time}"
                ))
                .with_code(codes::E0402)
                .with_node(name),
            );
            return false;
        }
        group.element_mut(pe_index).occupy(time, n);

        let node = self.graph.node_mut(n);
        node.start_time = time;
        node.finish_time = time + op_latency;
        node.pg_scheduled = pg_index as i32;
        node.pe_scheduled = pe_index as i32;
        node.is_scheduled = true;

        let record = ScheduleRecord {
            name: self.graph.node(n).name.clone(),
            op: self.graph.node(n).op.symbol().to_string(),
            pg: pg_index,
            pe: pe_index,
            start: time,
            finish: time + op_latency,
        };
        self.final_finish_time = self.final_finish_time.max(record.finish);
        self.records.push(record);
        true
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
