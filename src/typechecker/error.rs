use std::{error::Error, fmt::Display};

use crate::lexer::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub message: String,
    pub span: Span,
}

impl Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} ({}:{})",
            self.message, self.span.start.line, self.span.start.col
        ))
    }
}

impl Error for TypeError {}

/// Result of type checking a single node or item.
pub type TResult<T> = Result<T, TypeError>;

/// Non-fatal observation collected while typing a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax,
    Type,
    Warning,
    /// A non-parse failure that stopped the analysis pass.
    Exception,
}

/// A reportable problem attached to the typer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
}

impl From<TypeError> for Diagnostic {
    fn from(error: TypeError) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Type,
            message: error.message,
            span: error.span,
        }
    }
}

impl From<Warning> for Diagnostic {
    fn from(warning: Warning) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Warning,
            message: warning.message,
            span: warning.span,
        }
    }
}
