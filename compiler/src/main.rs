use clap::Parser;
use std::path::PathBuf;

use forge::diag::has_errors;
use forge::pipeline::{compile, CompileOptions, SourceFile};
use forge::processor::DEFAULT_MAX_CYCLES;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    All,
    Dot,
    Schedule,
}

#[derive(Parser, Debug)]
#[command(
    name = "forge",
    version,
    about = "Compiles straight-line expression programs to cycle-accurate accelerator schedules"
)]
struct Cli {
    /// Input source files; multiple files are merged with per-file name postfixes
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output directory for emitted artifacts
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Which artifacts to write
    #[arg(long, value_enum, default_value_t = EmitStage::All)]
    emit: EmitStage,

    /// Random input sets recorded by the golden oracle
    #[arg(long, default_value_t = 1)]
    eval_sets: usize,

    /// Schedule horizon in cycles
    #[arg(long, default_value_t = DEFAULT_MAX_CYCLES)]
    max_cycles: usize,

    /// Golden-oracle RNG seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // ── Load sources ──
    let mut sources = Vec::new();
    for path in &cli.sources {
        match std::fs::read_to_string(path) {
            Ok(text) => sources.push(SourceFile {
                name: path.display().to_string(),
                text,
            }),
            Err(error) => {
                eprintln!("forge: error: cannot read {}: {}", path.display(), error);
                std::process::exit(2);
            }
        }
    }

    let options = CompileOptions {
        num_eval_sets: cli.eval_sets,
        max_cycles: cli.max_cycles,
        seed: cli.seed,
        verbose: cli.verbose,
    };

    // ── Compile ──
    let output = match compile(&sources, &options) {
        Ok(output) => output,
        Err(error) => {
            eprintln!("forge: error: {error}");
            std::process::exit(1);
        }
    };

    for diag in &output.diagnostics {
        eprintln!("forge: {diag}");
    }

    // ── Emit artifacts ──
    if matches!(cli.emit, EmitStage::All | EmitStage::Dot) {
        let dot_path = cli.output.join("graph.dot");
        let dot = forge::dot::emit_dot(&output.graph);
        if let Err(error) = std::fs::write(&dot_path, dot) {
            eprintln!("forge: error: cannot write {}: {}", dot_path.display(), error);
            std::process::exit(2);
        }
        if cli.verbose {
            eprintln!("forge: wrote {}", dot_path.display());
        }
    }

    let Some(program) = &output.schedule else {
        eprintln!("forge: error: scheduling failed");
        std::process::exit(1);
    };

    if matches!(cli.emit, EmitStage::All | EmitStage::Schedule) {
        let json_path = cli.output.join("schedule.json");
        let json = serde_json::to_string_pretty(program)
            .expect("schedule serialization should not fail");
        if let Err(error) = std::fs::write(&json_path, json) {
            eprintln!(
                "forge: error: cannot write {}: {}",
                json_path.display(),
                error
            );
            std::process::exit(2);
        }
        if cli.verbose {
            eprintln!("forge: wrote {}", json_path.display());
        }

        println!(
            "{:<12} {:>6} {:>4} {:>4} {:>6} {:>7}",
            "name", "op", "pg", "pe", "start", "finish"
        );
        for record in &program.records {
            println!(
                "{:<12} {:>6} {:>4} {:>4} {:>6} {:>7}",
                record.name, record.op, record.pg, record.pe, record.start, record.finish
            );
        }
    }

    println!(
        "forge: {} operations, finish time {}, speedup {:.2}",
        program.summary.operation_count,
        program.summary.final_finish_time,
        program.summary.speedup
    );

    if has_errors(&output.diagnostics) {
        std::process::exit(1);
    }
}
