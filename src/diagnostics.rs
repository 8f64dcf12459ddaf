//! Miette-backed diagnostic rendering for the four error phases.
//!
//! A single `Diagnostic`-deriving struct carrying the offending span plus a
//! `NamedSource`, with a small per-phase `from_*` constructor picking the
//! message. No spell-check suggestions, no multi-command surface: spec.md
//! §6/§7 only asks for a single phase-prefixed diagnostic line per run, not
//! an IDE-grade report.

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::errors::{CompileError, LexError, MinlangError, ParseError, RuntimeError, Span};

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct MinlangDiagnostic {
    message: String,
    #[source_code]
    src: NamedSource,
    #[label("here")]
    span: SourceSpan,
}

impl MinlangDiagnostic {
    fn new(message: impl Into<String>, source_name: &str, source_text: &str, span: Span) -> Self {
        MinlangDiagnostic {
            message: message.into(),
            src: NamedSource::new(source_name.to_string(), source_text.to_string()),
            span: (span.start, (span.end.saturating_sub(span.start)).max(1)).into(),
        }
    }
}

/// Renders a [`MinlangError`] against its source text, phase-prefixing the
/// message the way spec.md §6/§7 require (`lex error:`, `parse error:`, ...)
/// and attaching a miette source snippet wherever the error carries a span.
pub fn report(err: &MinlangError, source_name: &str, source_text: &str) -> miette::Report {
    match err {
        MinlangError::Io(e) => miette::miette!("io error: {e}"),
        MinlangError::Lex(e) => {
            miette::Report::new(MinlangDiagnostic::new(format!("lex error: {e}"), source_name, source_text, lex_span(e)))
        }
        MinlangError::Parse(e) => miette::Report::new(MinlangDiagnostic::new(
            format!("parse error: {e}"),
            source_name,
            source_text,
            parse_span(e),
        )),
        MinlangError::Compile(e) => miette::Report::new(MinlangDiagnostic::new(
            format!("compile error: {e}"),
            source_name,
            source_text,
            compile_span(e),
        )),
        MinlangError::Runtime(e) => miette::miette!("runtime error: {}", runtime_message(e)),
    }
}

fn lex_span(e: &LexError) -> Span {
    e.span()
}

fn parse_span(e: &ParseError) -> Span {
    e.span()
}

fn compile_span(e: &CompileError) -> Span {
    e.span()
}

/// Runtime errors never carry a span (they surface after compilation, deep
/// inside the VM loop), so they're reported as a plain phase-prefixed line
/// rather than a source-snippet diagnostic.
fn runtime_message(e: &RuntimeError) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Span;

    #[test]
    fn lex_error_report_carries_a_named_source_snippet() {
        let err = MinlangError::Lex(LexError::UnexpectedCharacter { ch: '$', span: Span::new(3, 4, 1) });
        let report = report(&err, "demo.ml", "a $ b");
        assert!(format!("{report:?}").contains("lex error"));
    }

    #[test]
    fn runtime_error_report_has_no_source_snippet() {
        let err = MinlangError::Runtime(RuntimeError::DivisionByZero);
        let report = report(&err, "demo.ml", "1/0;");
        assert!(format!("{report}").contains("runtime error"));
    }
}
