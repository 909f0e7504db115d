//! Per-document analysis pipeline.
//!
//! A buffer owns the triple of synchronized histories (tokens, chunks,
//! typer states) plus the parser counters. Editors send whole buffer
//! contents; the common prefix with the previous text locates the edit
//! point, and everything to its left is reused across the pipeline.

use log::debug;
use ropey::Rope;

use crate::chunker::{self, Chunk, ChunkKind, Counters};
use crate::config::ProjectConfig;
use crate::history::History;
use crate::lexer::Token;
use crate::query::{
    complete_prefix, errors, outline, refactor_open, type_at, CompletionEntry, Edit, ErrorReport,
    OpenAction, OutlineItem,
};
use crate::typechecker::{self, TyperState};

pub struct Buffer {
    source: String,
    rope: Rope,
    tokens: History<Token>,
    chunks: History<Chunk>,
    typer: History<TyperState>,
    counters: Counters,
    config: Option<ProjectConfig>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_config(None)
    }

    pub fn with_config(config: Option<ProjectConfig>) -> Self {
        Self {
            source: String::new(),
            rope: Rope::new(),
            tokens: History::new(),
            chunks: History::new(),
            typer: History::new(),
            counters: Counters::default(),
            config,
        }
    }

    pub fn config(&self) -> Option<&ProjectConfig> {
        self.config.as_ref()
    }

    /// Replace the buffer contents and re-synchronize the pipeline from
    /// the first byte that changed.
    pub fn tell(&mut self, text: &str) {
        let edit = divergence_offset(&self.source, text);
        debug!("tell: {} bytes, edit at {edit}", text.len());

        self.source = text.to_string();
        self.rope = Rope::from_str(text);

        chunker::sync(
            &self.source,
            &mut self.tokens,
            &mut self.chunks,
            edit,
            &mut self.counters,
        );
        typechecker::sync(&mut self.chunks, &mut self.typer);

        debug_assert_eq!(self.chunks.len(), self.typer.len());
    }

    /// The state at the cursor; `None` before the first `tell`.
    pub fn state(&self) -> Option<&TyperState> {
        self.typer.prev()
    }

    /// Message of the exception chunk the last pass stopped on, if any.
    pub fn exception(&self) -> Option<&str> {
        match self.chunks.prev() {
            Some(Chunk {
                kind: ChunkKind::Exception { message },
                ..
            }) => Some(message),
            _ => None,
        }
    }

    /// Byte offset of an editor position (1-indexed line, 0-indexed
    /// column), clamped to the buffer.
    pub fn offset_of(&self, line: usize, col: usize) -> usize {
        if line == 0 || self.rope.len_lines() == 0 {
            return 0;
        }
        let line_index = (line - 1).min(self.rope.len_lines() - 1);
        let start = self.rope.line_to_byte(line_index);
        (start + col).min(self.rope.len_bytes())
    }

    pub fn outline(&self) -> Vec<OutlineItem> {
        self.state().map(outline).unwrap_or_default()
    }

    pub fn type_at(&self, line: usize, col: usize) -> Option<String> {
        let offset = self.offset_of(line, col);
        self.state().and_then(|state| type_at(state, offset))
    }

    pub fn completions(&self, prefix: &str) -> Vec<CompletionEntry> {
        self.state()
            .map(|state| complete_prefix(state, prefix))
            .unwrap_or_default()
    }

    pub fn refactor_open(&self, line: usize, col: usize, action: OpenAction) -> Vec<Edit> {
        let offset = self.offset_of(line, col);
        refactor_open(&self.typer, offset, action)
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.state().map(errors).unwrap_or_default()
    }
}

/// First byte where the two texts differ, clamped to a character boundary.
fn divergence_offset(old: &str, new: &str) -> usize {
    let mut offset = old
        .as_bytes()
        .iter()
        .zip(new.as_bytes())
        .take_while(|(a, b)| a == b)
        .count();
    while !new.is_char_boundary(offset.min(new.len())) {
        offset -= 1;
    }
    offset.min(new.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_offset() {
        assert_eq!(divergence_offset("", ""), 0);
        assert_eq!(divergence_offset("abc", "abc"), 3);
        assert_eq!(divergence_offset("abc", "abd"), 2);
        assert_eq!(divergence_offset("abc", "abcdef"), 3);
        assert_eq!(divergence_offset("abcdef", "abc"), 3);
    }

    #[test]
    fn test_tell_then_queries() {
        let mut buffer = Buffer::new();
        buffer.tell("let a = 1\nlet b = succ a");

        let outline = buffer.outline();
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[0].name, "a");
        assert_eq!(outline[0].type_repr.as_deref(), Some("int"));

        assert_eq!(buffer.type_at(1, 4).as_deref(), Some("int"));
        assert!(buffer.errors().is_empty());
    }

    #[test]
    fn test_incremental_tell_matches_fresh() {
        let first = "let a = 1\nlet b = 2";
        let second = "let a = 1\nlet b = 2\nlet c = succ b";

        let mut incremental = Buffer::new();
        incremental.tell(first);
        incremental.tell(second);

        let mut fresh = Buffer::new();
        fresh.tell(second);

        assert_eq!(incremental.outline(), fresh.outline());
        assert_eq!(incremental.errors(), fresh.errors());
        assert_eq!(
            incremental.type_at(3, 4),
            fresh.type_at(3, 4)
        );
    }

    #[test]
    fn test_offset_of_clamps() {
        let mut buffer = Buffer::new();
        buffer.tell("let a = 1");
        assert_eq!(buffer.offset_of(1, 0), 0);
        assert_eq!(buffer.offset_of(1, 100), 9);
        assert_eq!(buffer.offset_of(50, 0), 0);
    }
}
