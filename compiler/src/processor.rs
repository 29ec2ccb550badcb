// processor.rs — Static model of the heterogeneous accelerator
//
// Describes the target hardware: process groups holding banks of typed
// process elements (adders, multipliers, dividers, CORDIC units), each
// group with a bounded set of shared input fetch slots. The op→(group→PEs)
// compatibility table is built while groups are added and is read-only
// thereafter; the scheduler receives the processor by reference.
//
// Preconditions: groups are added before scheduling begins.
// Postconditions: reservation tables sized to the configured cycle bound.
// Failure modes: slot probes return None past the cycle bound — the
//                scheduler turns that into an explicit error.
// Side effects: none.

use std::collections::HashMap;

use crate::node::{NodeId, NodeOp};

/// Default schedule horizon in cycles.
pub const DEFAULT_MAX_CYCLES: usize = 32767;

/// Hardware configuration knobs.
#[derive(Debug, Clone, Copy)]
pub struct HwConfig {
    /// Upper bound on schedulable cycles (reservation table capacity).
    pub max_cycles: usize,
}

impl Default for HwConfig {
    fn default() -> Self {
        HwConfig {
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

// ── Process element ─────────────────────────────────────────────────────────

/// The functional flavor of a process element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    Add,
    Mul,
    Div,
    Cordic,
}

impl PeKind {
    /// Operations this element kind can execute.
    fn executes(self) -> &'static [NodeOp] {
        match self {
            PeKind::Add => &[NodeOp::Add],
            PeKind::Mul => &[NodeOp::Mul, NodeOp::Power],
            PeKind::Div => &[NodeOp::Div],
            PeKind::Cordic => &[NodeOp::Sin, NodeOp::Cos],
        }
    }
}

/// Issue latency per operation, in cycles. `None` means no hardware
/// supports the op.
pub fn latency(op: NodeOp) -> Option<usize> {
    match op {
        NodeOp::Add => Some(1),
        NodeOp::Mul | NodeOp::Power => Some(2),
        NodeOp::Div | NodeOp::Sin | NodeOp::Cos => Some(3),
        _ => None,
    }
}

/// A single typed hardware unit with a per-cycle reservation table.
#[derive(Debug, Clone)]
pub struct ProcessElement {
    pub kind: PeKind,
    execution_slots: Vec<Option<NodeId>>,
}

impl ProcessElement {
    fn new(kind: PeKind, max_cycles: usize) -> Self {
        ProcessElement {
            kind,
            execution_slots: vec![None; max_cycles],
        }
    }

    pub fn slot(&self, cycle: usize) -> Option<NodeId> {
        self.execution_slots[cycle]
    }

    pub fn occupy(&mut self, cycle: usize, node: NodeId) {
        self.execution_slots[cycle] = Some(node);
    }

    /// First free cycle at or after `from`, or None past the cycle bound.
    pub fn earliest_free_slot(&self, from: usize) -> Option<usize> {
        (from..self.execution_slots.len()).find(|&cycle| self.execution_slots[cycle].is_none())
    }
}

// ── Process group ───────────────────────────────────────────────────────────

/// A bank of process elements sharing a bounded input fetch bandwidth:
/// `input_slots[line][cycle]` seats one external value, at most once.
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    input_slots: Vec<Vec<Option<NodeId>>>,
    process_elements: Vec<ProcessElement>,
    max_cycles: usize,
}

impl ProcessGroup {
    pub fn new(num_input_lines: usize, max_cycles: usize) -> Self {
        ProcessGroup {
            input_slots: vec![vec![None; max_cycles]; num_input_lines],
            process_elements: Vec::new(),
            max_cycles,
        }
    }

    pub fn add_process_element(&mut self, kind: PeKind) {
        self.process_elements
            .push(ProcessElement::new(kind, self.max_cycles));
    }

    pub fn num_input_lines(&self) -> usize {
        self.input_slots.len()
    }

    pub fn elements(&self) -> &[ProcessElement] {
        &self.process_elements
    }

    pub fn element_mut(&mut self, index: usize) -> &mut ProcessElement {
        &mut self.process_elements[index]
    }

    pub fn input_slot(&self, line: usize, cycle: usize) -> Option<NodeId> {
        self.input_slots[line][cycle]
    }

    pub fn allocate_input(&mut self, line: usize, cycle: usize, node: NodeId) {
        self.input_slots[line][cycle] = Some(node);
    }

    /// Probe for the next free input slot.
    ///
    /// `last` is the previously returned (line, time); None restarts from
    /// (0, 0). Otherwise the probe advances one seat — wrapping to the next
    /// cycle after the last line — then scans forward in row-major (time,
    /// then line) order. Returns None once the cycle bound is exhausted.
    pub fn get_earliest_input_slot(&self, last: Option<(usize, usize)>) -> Option<(usize, usize)> {
        let (start_line, start_time) = match last {
            None => (0, 0),
            Some((line, time)) => {
                if line == self.input_slots.len() - 1 {
                    (0, time + 1)
                } else {
                    (line + 1, time)
                }
            }
        };

        for time in start_time..self.max_cycles {
            let first_line = if time == start_time { start_line } else { 0 };
            for line in first_line..self.input_slots.len() {
                if self.input_slots[line][time].is_none() {
                    return Some((line, time));
                }
            }
        }
        None
    }
}

// ── Processor ───────────────────────────────────────────────────────────────

/// The whole accelerator: its process groups plus the compatibility table
/// `op → group → [element index]` computed as groups are added.
#[derive(Debug)]
pub struct Processor {
    groups: Vec<ProcessGroup>,
    compatible: HashMap<NodeOp, Vec<Vec<usize>>>,
    max_cycles: usize,
}

impl Processor {
    pub fn new(config: &HwConfig) -> Self {
        Processor {
            groups: Vec::new(),
            compatible: HashMap::new(),
            max_cycles: config.max_cycles,
        }
    }

    /// The default accelerator: two basic-arithmetic groups of five
    /// elements each (2×Add, 2×Mul, 1×Div) and one sinusoid group of two
    /// CORDIC elements, with two input lines per group.
    pub fn configure(config: &HwConfig) -> Self {
        let mut processor = Processor::new(config);

        for _ in 0..2 {
            let mut pg = ProcessGroup::new(2, config.max_cycles);
            pg.add_process_element(PeKind::Add);
            pg.add_process_element(PeKind::Add);
            pg.add_process_element(PeKind::Mul);
            pg.add_process_element(PeKind::Mul);
            pg.add_process_element(PeKind::Div);
            processor.add_process_group(pg);
        }

        let mut pg = ProcessGroup::new(2, config.max_cycles);
        pg.add_process_element(PeKind::Cordic);
        pg.add_process_element(PeKind::Cordic);
        processor.add_process_group(pg);

        processor
    }

    /// Add a group and extend the compatibility table with its elements.
    pub fn add_process_group(&mut self, pg: ProcessGroup) {
        let pg_index = self.groups.len();

        for entry in self.compatible.values_mut() {
            entry.push(Vec::new());
        }

        for (pe_index, pe) in pg.elements().iter().enumerate() {
            for &op in pe.kind.executes() {
                let per_group = self
                    .compatible
                    .entry(op)
                    .or_insert_with(|| vec![Vec::new(); pg_index + 1]);
                per_group[pg_index].push(pe_index);
            }
        }

        self.groups.push(pg);
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, index: usize) -> &ProcessGroup {
        &self.groups[index]
    }

    pub fn group_mut(&mut self, index: usize) -> &mut ProcessGroup {
        &mut self.groups[index]
    }

    pub fn max_cycles(&self) -> usize {
        self.max_cycles
    }

    /// Element indices in `pg_index` able to execute `op` (empty if none).
    pub fn compatible_elements(&self, op: NodeOp, pg_index: usize) -> &[usize] {
        static EMPTY: Vec<usize> = Vec::new();
        self.compatible
            .get(&op)
            .and_then(|per_group| per_group.get(pg_index))
            .unwrap_or(&EMPTY)
    }

    /// True if at least one element anywhere can execute `op`.
    pub fn supports(&self, op: NodeOp) -> bool {
        (0..self.num_groups()).any(|pg| !self.compatible_elements(op, pg).is_empty())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> HwConfig {
        HwConfig { max_cycles: 16 }
    }

    #[test]
    fn default_layout_compatibility() {
        let p = Processor::configure(&HwConfig::default());
        assert_eq!(p.num_groups(), 3);

        // Basic groups: adders at 0-1, multipliers at 2-3, divider at 4.
        for pg in 0..2 {
            assert_eq!(p.compatible_elements(NodeOp::Add, pg), &[0, 1]);
            assert_eq!(p.compatible_elements(NodeOp::Mul, pg), &[2, 3]);
            assert_eq!(p.compatible_elements(NodeOp::Power, pg), &[2, 3]);
            assert_eq!(p.compatible_elements(NodeOp::Div, pg), &[4]);
            assert!(p.compatible_elements(NodeOp::Sin, pg).is_empty());
        }

        // Sinusoid group: CORDIC only.
        assert_eq!(p.compatible_elements(NodeOp::Sin, 2), &[0, 1]);
        assert_eq!(p.compatible_elements(NodeOp::Cos, 2), &[0, 1]);
        assert!(p.compatible_elements(NodeOp::Add, 2).is_empty());
    }

    #[test]
    fn unsupported_ops_have_no_elements() {
        let p = Processor::configure(&HwConfig::default());
        assert!(!p.supports(NodeOp::Equal));
        assert!(!p.supports(NodeOp::Sub));
        assert!(p.supports(NodeOp::Power));
    }

    #[test]
    fn latency_table() {
        assert_eq!(latency(NodeOp::Add), Some(1));
        assert_eq!(latency(NodeOp::Mul), Some(2));
        assert_eq!(latency(NodeOp::Power), Some(2));
        assert_eq!(latency(NodeOp::Div), Some(3));
        assert_eq!(latency(NodeOp::Sin), Some(3));
        assert_eq!(latency(NodeOp::Cos), Some(3));
        assert_eq!(latency(NodeOp::Equal), None);
    }

    #[test]
    fn input_slot_probe_walks_lines_then_cycles() {
        let pg = ProcessGroup::new(2, 16);
        // Fresh probe starts at the origin.
        assert_eq!(pg.get_earliest_input_slot(None), Some((0, 0)));
        // Advancing from (0,0) moves to line 1 of the same cycle.
        assert_eq!(pg.get_earliest_input_slot(Some((0, 0))), Some((1, 0)));
        // Advancing off the last line wraps to the next cycle.
        assert_eq!(pg.get_earliest_input_slot(Some((1, 0))), Some((0, 1)));
    }

    #[test]
    fn input_slot_probe_skips_occupied_seats() {
        let mut pg = ProcessGroup::new(2, 16);
        pg.allocate_input(0, 0, NodeId(1));
        pg.allocate_input(1, 0, NodeId(2));
        pg.allocate_input(0, 1, NodeId(3));
        assert_eq!(pg.get_earliest_input_slot(None), Some((1, 1)));
    }

    #[test]
    fn input_slot_probe_exhausts_at_bound() {
        let mut pg = ProcessGroup::new(1, 2);
        pg.allocate_input(0, 0, NodeId(1));
        pg.allocate_input(0, 1, NodeId(2));
        assert_eq!(pg.get_earliest_input_slot(None), None);
    }

    #[test]
    fn execution_slot_scan() {
        let mut pg = ProcessGroup::new(2, small_config().max_cycles);
        pg.add_process_element(PeKind::Add);
        let pe = pg.element_mut(0);
        pe.occupy(0, NodeId(1));
        pe.occupy(1, NodeId(2));
        assert_eq!(pe.earliest_free_slot(0), Some(2));
        assert_eq!(pe.earliest_free_slot(1), Some(2));
        assert_eq!(pe.earliest_free_slot(3), Some(3));
    }

    #[test]
    fn execution_slot_scan_exhausts_at_bound() {
        let mut pg = ProcessGroup::new(1, 2);
        pg.add_process_element(PeKind::Add);
        let pe = pg.element_mut(0);
        pe.occupy(0, NodeId(1));
        pe.occupy(1, NodeId(2));
        assert_eq!(pe.earliest_free_slot(0), None);
    }
}
