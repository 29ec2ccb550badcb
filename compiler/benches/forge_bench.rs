use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use forge::pipeline::{compile, CompileOptions, SourceFile};

// ── Sample programs ─────────────────────────────────────────────────────────

const OSCILLATOR: &str = r#"
k = 2.5
x = q[0]
v = q[1]
e = 0.5 * k * x * x + 0.5 * v * v
f[0] = -k * x + power(x, 3) - sin(w)
f[1] = e * cos(w) / m
"#;

/// A left-leaning addition chain of `n` distinct inputs — the worst case
/// for tree height, the best case for the balancer.
fn generate_add_chain(n: usize) -> String {
    let mut source = String::from("y = a0");
    for i in 1..n {
        source.push_str(&format!(" + a{i}"));
    }
    source.push('\n');
    source
}

/// `terms` polynomial terms with shared powers of x, exercising value
/// numbering and the mixed-latency process elements.
fn generate_polynomial(terms: usize) -> String {
    let mut source = String::from("y = c0");
    for i in 1..terms {
        source.push_str(&format!(" + c{i} * power(x, {i})"));
    }
    source.push('\n');
    source
}

fn options() -> CompileOptions {
    CompileOptions {
        seed: Some(1),
        ..CompileOptions::default()
    }
}

fn run(text: &str) {
    let sources = [SourceFile {
        name: "bench.fx".to_string(),
        text: text.to_string(),
    }];
    let output = compile(&sources, &options()).expect("bench compile failed");
    black_box(output.schedule.expect("bench schedule failed"));
}

// ── Benchmarks ──────────────────────────────────────────────────────────────

fn bench_oscillator(c: &mut Criterion) {
    c.bench_function("compile/oscillator", |b| b.iter(|| run(OSCILLATOR)));
}

fn bench_add_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/add_chain");
    for size in [8usize, 64, 256] {
        let source = generate_add_chain(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, text| {
            b.iter(|| run(text));
        });
    }
    group.finish();
}

fn bench_polynomials(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/polynomial");
    for terms in [4usize, 16, 64] {
        let source = generate_polynomial(terms);
        group.bench_with_input(BenchmarkId::from_parameter(terms), &source, |b, text| {
            b.iter(|| run(text));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_oscillator,
    bench_add_chains,
    bench_polynomials
);
criterion_main!(benches);
