// pipeline.rs — Compilation flow and options
//
// Runs the fixed phase order per source file — parse, lower, legalize,
// golden evaluation, optimize, compare — then postfixes and merges
// multi-file graphs into one composite before handing it to the scheduler.
//
// Preconditions: source texts are loaded by the caller.
// Postconditions: returns the composite graph, the schedule (absent when
//                 scheduling failed), and all accumulated diagnostics.
// Failure modes: unparsable sources return `PipelineError`; construction,
//                legalization, and evaluation problems accumulate as
//                diagnostics; scheduling failure leaves `schedule` empty.
// Side effects: verbose per-phase timing on stderr.

use std::fmt;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::diag::Diagnostic;
use crate::eval::{evaluate_compare, evaluate_golden};
use crate::graph::Graph;
use crate::legalize::legalize;
use crate::lower::lower;
use crate::optimize::optimize;
use crate::processor::{HwConfig, Processor, DEFAULT_MAX_CYCLES};
use crate::scheduler::{schedule, ScheduledProgram};

// ── Options and results ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Random input sets recorded by the golden oracle.
    pub num_eval_sets: usize,
    /// Schedule horizon in cycles.
    pub max_cycles: usize,
    /// Golden-oracle RNG seed; random when absent.
    pub seed: Option<u64>,
    /// Print per-phase timing to stderr.
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            num_eval_sets: 1,
            max_cycles: DEFAULT_MAX_CYCLES,
            seed: None,
            verbose: false,
        }
    }
}

/// One input source: a display name (usually the path) and its text.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Everything the driver needs after a compile.
#[derive(Debug)]
pub struct CompileOutput {
    pub graph: Graph,
    /// Absent when scheduling failed; the diagnostics say why.
    pub schedule: Option<ScheduledProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A phase failure that stops the compile outright.
#[derive(Debug)]
pub struct PipelineError {
    pub phase: &'static str,
    pub file: String,
    pub message: String,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}: {}", self.phase, self.file, self.message)
    }
}

impl std::error::Error for PipelineError {}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Compile one or more sources into a scheduled composite graph.
///
/// With multiple sources, each file's graph is renamed with a 1-based
/// `_<index>` postfix before merging, so same-named variables stay
/// distinct.
pub fn compile(
    sources: &[SourceFile],
    options: &CompileOptions,
) -> Result<CompileOutput, PipelineError> {
    let mut diagnostics = Vec::new();
    let mut rng: StdRng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut graphs = Vec::new();
    for source in sources {
        let graph = build_one(source, options, &mut rng, &mut diagnostics)?;
        graphs.push(graph);
    }

    let mut composite = if graphs.len() == 1 {
        graphs.pop().expect("one graph")
    } else {
        let mut iter = graphs.into_iter().enumerate();
        let (_, mut first) = iter.next().expect("at least one source");
        first.apply_postfix("1");
        for (index, mut graph) in iter {
            graph.apply_postfix(&(index + 1).to_string());
            diagnostics.extend(first.merge(graph));
        }
        first
    };

    let started = Instant::now();
    let mut processor = Processor::configure(&HwConfig {
        max_cycles: options.max_cycles,
    });
    let result = schedule(&mut composite, &mut processor);
    diagnostics.extend(result.diagnostics);
    if options.verbose {
        eprintln!(
            "forge: schedule complete, {:.1}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(CompileOutput {
        graph: composite,
        schedule: result.schedule,
        diagnostics,
    })
}

// ── Per-file front half ─────────────────────────────────────────────────────

fn build_one(
    source: &SourceFile,
    options: &CompileOptions,
    rng: &mut StdRng,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Graph, PipelineError> {
    let verbose = options.verbose;
    let timer = |name: &str, started: Instant| {
        if verbose {
            eprintln!(
                "forge: {}: {} complete, {:.1}ms",
                source.name,
                name,
                started.elapsed().as_secs_f64() * 1000.0
            );
        }
    };

    let started = Instant::now();
    let parsed = crate::parser::parse(&source.text);
    let Some(program) = parsed.program else {
        let message = parsed
            .errors
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "empty parse".to_string());
        return Err(PipelineError {
            phase: "parse",
            file: source.name.clone(),
            message,
        });
    };
    if let Some(error) = parsed.errors.first() {
        return Err(PipelineError {
            phase: "parse",
            file: source.name.clone(),
            message: error.to_string(),
        });
    }
    timer("parse", started);

    let started = Instant::now();
    let lowered = lower(&program, &source.text);
    diagnostics.extend(lowered.diagnostics);
    let mut graph = lowered.graph;
    timer("lower", started);

    let started = Instant::now();
    diagnostics.extend(legalize(&mut graph));
    timer("legalize", started);

    let started = Instant::now();
    let golden = evaluate_golden(&mut graph, options.num_eval_sets, rng);
    timer("golden", started);

    let started = Instant::now();
    optimize(&mut graph);
    timer("optimize", started);

    let started = Instant::now();
    diagnostics.extend(evaluate_compare(&mut graph, &golden));
    timer("compare", started);

    Ok(graph)
}

// ── Tests ───────────────────────────────────────────────────────────────────
