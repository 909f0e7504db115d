use std::{error::Error, fmt::Display};

use crate::history::Sync;
use crate::lexer::{Position, Span, Token};

use super::ast::ItemGroup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} ({}:{})",
            self.message, self.span.start.line, self.span.start.col
        ))
    }
}

impl Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    /// `module M = struct` was recognized; the constraint, if any, was
    /// stripped from the header.
    EnterModule { name: String },
    /// Top-level `end`; `back` is the chunk-history offset of the matching
    /// opening.
    LeaveModule { name: String, back: usize },
    Definition { group: ItemGroup },
    /// The construct extends the previous definition; never stored, the
    /// driver reacts to it immediately.
    Rollback,
    /// End of input after a well-formed construct.
    Done,
    /// End of input inside an open construct.
    Unterminated,
    SyntaxError { error: SyntaxError },
    /// A non-parse failure from a grammar action; the pass stops.
    Exception { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub start: Position,
    /// End position of the last consumed token.
    pub end: Position,
    pub sync: Sync<Token>,
}

impl Chunk {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ChunkKind::Done | ChunkKind::Unterminated | ChunkKind::Exception { .. }
        )
    }
}
