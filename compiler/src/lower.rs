// lower.rs — AST to dataflow-graph lowering
//
// Walks the parsed program and drives the graph construction API: every
// literal, variable, and array element becomes a named node through
// `get_or_create`, every operator and intrinsic call an `OPR` node through
// `add_operation`, every operand position a `connect`. Assignments wire the
// expression result directly into the target node; whether a named node
// ends up Input, Output, or a spliced passthrough is decided later by
// legalization, never here.
//
// Preconditions: `program` is a parsed AST.
// Postconditions: returns a raw (pre-legalization) graph plus diagnostics.
// Failure modes: unknown intrinsics and bad arities produce construction
//                diagnostics; the offending statement is skipped.
// Side effects: none.

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::graph::Graph;
use crate::node::NodeId;

/// Result of lowering.
#[derive(Debug)]
pub struct LowerResult {
    pub graph: Graph,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower a program into a raw dataflow graph.
///
/// `source` is the original text; numeric literal lexemes are sliced from
/// it to form constant-node names (`CON3.14`).
pub fn lower(program: &Program, source: &str) -> LowerResult {
    let mut ctx = LowerCtx {
        source,
        graph: Graph::new(),
        diagnostics: Vec::new(),
    };

    for stmt in &program.statements {
        ctx.lower_statement(stmt);
    }

    LowerResult {
        graph: ctx.graph,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct LowerCtx<'a> {
    source: &'a str,
    graph: Graph,
    diagnostics: Vec<Diagnostic>,
}

impl LowerCtx<'_> {
    fn lower_statement(&mut self, stmt: &Statement) {
        let Some(rhs) = self.lower_expr(&stmt.expr) else {
            return;
        };

        let target_name = match &stmt.target {
            Target::Scalar(ident) => format!("VAR{}", ident.name),
            Target::Element(ident, index, _) => format!("ARR{}[{}]", ident.name, index),
        };

        match self.graph.get_or_create(&target_name) {
            Ok(target) => self.graph.connect(rhs, target),
            Err(diag) => self.diagnostics.push(diag.with_span(stmt.span)),
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Option<NodeId> {
        match expr {
            Expr::Number(_, span) => {
                let lexeme = &self.source[span.start..span.end];
                self.named(&format!("CON{lexeme}"), *span)
            }
            Expr::Scalar(ident) => self.named(&format!("VAR{}", ident.name), ident.span),
            Expr::Element(ident, index, span) => {
                self.named(&format!("ARR{}[{}]", ident.name, index), *span)
            }
            Expr::Neg(inner, span) => {
                let operand = self.lower_expr(inner)?;
                let op = self.operation("-", *span)?;
                self.graph.connect(operand, op);
                Some(op)
            }
            Expr::Binary(bin_op, lhs, rhs, span) => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let op = self.operation(bin_op.symbol(), *span)?;
                self.graph.connect(lhs, op);
                self.graph.connect(rhs, op);
                Some(op)
            }
            Expr::Call(callee, args, span) => self.lower_call(callee, args, *span),
        }
    }

    fn lower_call(&mut self, callee: &Ident, args: &[Expr], span: Span) -> Option<NodeId> {
        let arity = match callee.name.as_str() {
            "sin" | "cos" => 1,
            "power" => 2,
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(format!("unknown intrinsic '{}'", callee.name))
                        .with_code(codes::E0102)
                        .with_span(callee.span)
                        .with_hint("supported intrinsics: sin, cos, power"),
                );
                return None;
            }
        };

        if args.len() != arity {
            self.diagnostics.push(
                Diagnostic::error(format!(
                    "'{}' takes {} argument{}, got {}",
                    callee.name,
                    arity,
                    if arity == 1 { "" } else { "s" },
                    args.len()
                ))
                .with_code(codes::E0102)
                .with_span(span),
            );
            return None;
        }

        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.lower_expr(arg)?);
        }
        let op = self.operation(&callee.name, span)?;
        for operand in operands {
            self.graph.connect(operand, op);
        }
        Some(op)
    }

    fn named(&mut self, name: &str, span: Span) -> Option<NodeId> {
        match self.graph.get_or_create(name) {
            Ok(id) => Some(id),
            Err(diag) => {
                self.diagnostics.push(diag.with_span(span));
                None
            }
        }
    }

    fn operation(&mut self, symbol: &str, span: Span) -> Option<NodeId> {
        match self.graph.add_operation(symbol) {
            Ok(id) => Some(id),
            Err(diag) => {
                self.diagnostics.push(diag.with_span(span));
                None
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
