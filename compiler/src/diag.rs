// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
// Front-end diagnostics carry a source span; graph, evaluation, and
// scheduler diagnostics carry the offending node name instead.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by phase.
pub mod codes {
    use super::DiagCode;

    // Construction (non-fatal: reported, skipped)
    pub const E0101: DiagCode = DiagCode("E0101"); // duplicate node name (construction or merge)
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown operator symbol
    pub const E0103: DiagCode = DiagCode("E0103"); // malformed name prefix

    // Legalization (non-fatal, but correctness no longer guaranteed)
    pub const E0201: DiagCode = DiagCode("E0201"); // unexpected Sub arity
    pub const E0202: DiagCode = DiagCode("E0202"); // passthrough fanin count != 1
    pub const E0203: DiagCode = DiagCode("E0203"); // unparsable constant value

    // Evaluation (non-fatal)
    pub const W0301: DiagCode = DiagCode("W0301"); // golden output mismatch

    // Scheduling (fatal: abort the compile)
    pub const E0401: DiagCode = DiagCode("E0401"); // unsupported operation
    pub const E0402: DiagCode = DiagCode("E0402"); // execution slot collision
    pub const E0403: DiagCode = DiagCode("E0403"); // cycle bound exceeded
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Source location, when the diagnostic originates from source text.
    pub span: Option<Span>,
    /// Offending node, when the diagnostic originates from the graph.
    pub node: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span, node, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            node: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach the offending node's name.
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(node) = &self.node {
            write!(f, " (node {})", node)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
