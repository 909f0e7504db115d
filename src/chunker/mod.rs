//! The chunk parser: carves a buffer into top-level constructs.
//!
//! The driver feeds the grammar from the replayable token stream and turns
//! every tagged emission into a chunk. A syntax error is a chunk too, so
//! well-formed constructs after the error stay reachable. On an edit, only
//! the suffix after the deepest still-valid chunk boundary is re-parsed.

pub mod ast;
mod chunk;
mod grammar;

pub use chunk::*;

use log::debug;

use crate::history::{rewind, History};
use crate::lexer::{HistoryLexer, Token};

use self::grammar::{Parse, ParseFail};

/// Shared parser counters, threaded explicitly through the grammar.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    /// How many prospective group emissions to suppress; re-armed by the
    /// driver when a rollback joins `and`-continued definitions.
    pub filter_first: usize,
    /// Depth of inline module forms; no top-level chunk is emitted while
    /// this is non-zero.
    pub nesting: usize,
}

/// Re-chunk `source` after an edit at byte offset `edit`.
///
/// Everything at or before the deepest chunk boundary not touched by the
/// edit is reused; tokens between that boundary and the edit are replayed
/// from the history, and only the changed suffix is rescanned.
pub fn sync(
    source: &str,
    tokens: &mut History<Token>,
    chunks: &mut History<Chunk>,
    edit: usize,
    counters: &mut Counters,
) {
    // tokens ending strictly before the edit cannot have changed; a token
    // ending exactly at it could be extended by the new text
    tokens.seek(|token| {
        if token.span.end.offset < edit {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    });
    tokens.cutoff();

    rewind(|chunk: &Chunk| chunk.sync, tokens, chunks);
    chunks.cutoff();

    // terminal chunks describe the end of input, which the edit may have
    // moved; re-derive them
    while chunks.prev().map(Chunk::is_terminal).unwrap_or(false) {
        chunks.backward();
    }
    chunks.cutoff();
    let resume = chunks.prev().map(|chunk| chunk.sync.offset()).unwrap_or(0);
    tokens.seek_offset(resume);

    let mut module_stack = open_modules(chunks);

    counters.filter_first = 0;
    counters.nesting = 0;

    // a rollback whose re-parse fails to consume the `and` must not fire a
    // second time at the same chunk boundary
    let mut rolled_back_at: Option<usize> = None;

    let mut lx = HistoryLexer::wrap(source, tokens);
    loop {
        match grammar::parse_item(&mut lx, counters) {
            Ok(Parse::Done { pos }) => {
                let kind = if module_stack.is_empty() {
                    ChunkKind::Done
                } else {
                    ChunkKind::Unterminated
                };
                chunks.insert(Chunk {
                    kind,
                    start: pos,
                    end: pos,
                    sync: lx.mark(),
                });
                break;
            }
            Ok(Parse::Group { group, start }) => {
                chunks.insert(Chunk {
                    kind: ChunkKind::Definition { group },
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
            }
            Ok(Parse::Enter { name, start }) => {
                module_stack.push((chunks.offset(), name.clone()));
                chunks.insert(Chunk {
                    kind: ChunkKind::EnterModule { name },
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
            }
            Ok(Parse::Leave { start }) => match module_stack.pop() {
                Some((back, name)) => {
                    chunks.insert(Chunk {
                        kind: ChunkKind::LeaveModule { name, back },
                        start,
                        end: lx.last_end(),
                        sync: lx.mark(),
                    });
                }
                None => {
                    let error = SyntaxError {
                        message: "unmatched 'end'".to_string(),
                        span: crate::lexer::Span::new(start, lx.last_end()),
                    };
                    chunks.insert(Chunk {
                        kind: ChunkKind::SyntaxError { error },
                        start,
                        end: lx.last_end(),
                        sync: lx.mark(),
                    });
                }
            },
            Ok(Parse::Rollback { start }) => {
                let extendable = matches!(
                    chunks.prev().map(|chunk| &chunk.kind),
                    Some(ChunkKind::Definition { group })
                        if matches!(
                            group.items.first(),
                            Some(ast::Item::Binding(_)) | Some(ast::Item::TypeDecl(_))
                        )
                );
                if extendable && rolled_back_at != Some(chunks.offset()) {
                    rolled_back_at = Some(chunks.offset());
                    let group_start = chunks.prev().map(|chunk| chunk.start.offset).unwrap_or(0);
                    chunks.backward();
                    chunks.cutoff();
                    lx.seek_before(group_start);
                    counters.filter_first = 1;
                    debug!("rollback at {}:{}, re-reading joined group", start.line, start.col);
                    continue;
                }

                // an `and` with nothing before it to extend
                grammar::skip_one(&mut lx);
                grammar::skip_to_sync(&mut lx);
                let error = SyntaxError {
                    message: "no definition to extend with 'and'".to_string(),
                    span: crate::lexer::Span::new(start, lx.last_end()),
                };
                chunks.insert(Chunk {
                    kind: ChunkKind::SyntaxError { error },
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
            }
            Err(ParseFail::Syntax(error)) => {
                debug!("{}", error.span.highlight(source, &error.message));
                grammar::skip_to_sync(&mut lx);
                counters.filter_first = 0;
                counters.nesting = 0;
                let start = error.span.start;
                chunks.insert(Chunk {
                    kind: ChunkKind::SyntaxError { error },
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
            }
            Err(ParseFail::Eof { start }) => {
                chunks.insert(Chunk {
                    kind: ChunkKind::Unterminated,
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
                break;
            }
            Err(ParseFail::Depth { start }) => {
                chunks.insert(Chunk {
                    kind: ChunkKind::Exception {
                        message: "construct nests too deeply".to_string(),
                    },
                    start,
                    end: lx.last_end(),
                    sync: lx.mark(),
                });
                break;
            }
        }
    }
}

/// Reconstruct the stack of open `module … = struct` chunks from the past.
fn open_modules(chunks: &History<Chunk>) -> Vec<(usize, String)> {
    let mut stack = vec![];
    for (offset, chunk) in chunks.iter_past().enumerate() {
        match &chunk.kind {
            ChunkKind::EnterModule { name } => stack.push((offset, name.clone())),
            ChunkKind::LeaveModule { .. } => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::ast::Item;
    use super::*;

    fn chunk_kinds(source: &str) -> Vec<Chunk> {
        let mut tokens = History::new();
        let mut chunks = History::new();
        let mut counters = Counters::default();
        sync(source, &mut tokens, &mut chunks, 0, &mut counters);
        chunks.iter_past().cloned().collect()
    }

    fn resync(
        source: &str,
        tokens: &mut History<Token>,
        chunks: &mut History<Chunk>,
        edit: usize,
    ) {
        let mut counters = Counters::default();
        sync(source, tokens, chunks, edit, &mut counters);
    }

    #[test]
    fn test_empty_buffer_is_done() {
        let chunks = chunk_kinds("");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Done);
    }

    #[test]
    fn test_definitions_then_done() {
        let chunks = chunk_kinds("let a = 1\nlet b = a");
        assert_eq!(chunks.len(), 3);
        assert!(matches!(chunks[0].kind, ChunkKind::Definition { .. }));
        assert!(matches!(chunks[1].kind, ChunkKind::Definition { .. }));
        assert_eq!(chunks[2].kind, ChunkKind::Done);
    }

    #[test]
    fn test_chunk_positions_strictly_increase() {
        let chunks = chunk_kinds("let a = 1\nmodule M = struct\nlet b = 2\nend\nlet c = 3");
        let mut last = None;
        for chunk in &chunks {
            if let Some(prev) = last {
                assert!(chunk.start > prev, "chunk at {:?} not after {:?}", chunk.start, prev);
            }
            last = Some(chunk.start);
        }
    }

    #[test]
    fn test_module_enter_leave_back_offset() {
        let chunks = chunk_kinds("module M = struct\nlet u = ()\nend");
        assert!(matches!(chunks[0].kind, ChunkKind::EnterModule { .. }));
        assert!(matches!(chunks[1].kind, ChunkKind::Definition { .. }));
        assert_eq!(
            chunks[2].kind,
            ChunkKind::LeaveModule {
                name: "M".to_string(),
                back: 0
            }
        );
        assert_eq!(chunks[3].kind, ChunkKind::Done);
    }

    #[test]
    fn test_unterminated_module() {
        let chunks = chunk_kinds("module M = struct\nlet u = ()");
        assert!(matches!(chunks[0].kind, ChunkKind::EnterModule { .. }));
        assert!(matches!(chunks[1].kind, ChunkKind::Definition { .. }));
        assert_eq!(chunks[2].kind, ChunkKind::Unterminated);
    }

    #[test]
    fn test_unterminated_binding() {
        let chunks = chunk_kinds("let a = 1\nlet b =");
        assert!(matches!(chunks[0].kind, ChunkKind::Definition { .. }));
        assert_eq!(chunks[1].kind, ChunkKind::Unterminated);
    }

    #[test]
    fn test_single_invalid_token() {
        let chunks = chunk_kinds("#");
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[0].kind, ChunkKind::SyntaxError { .. }));
        assert_eq!(chunks[1].kind, ChunkKind::Done);
    }

    #[test]
    fn test_recovery_reaches_trailing_definitions() {
        let chunks = chunk_kinds("let a = 1\nlet ! = 2\nlet b = 3");
        assert!(matches!(chunks[0].kind, ChunkKind::Definition { .. }));
        assert!(matches!(chunks[1].kind, ChunkKind::SyntaxError { .. }));
        assert!(matches!(chunks[2].kind, ChunkKind::Definition { .. }));
        assert_eq!(chunks[3].kind, ChunkKind::Done);
    }

    #[test]
    fn test_and_group_joined_by_rollback() {
        let chunks = chunk_kinds("let a = 1 and b = 2");
        assert_eq!(chunks.len(), 2);
        let ChunkKind::Definition { group } = &chunks[0].kind else {
            panic!("expected a definition chunk");
        };
        assert_eq!(group.items.len(), 2);
        let names = group
            .items
            .iter()
            .map(|item| match item {
                Item::Binding(binding) => binding.name.clone().unwrap(),
                _ => panic!("expected bindings"),
            })
            .collect::<Vec<_>>();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_incremental_append_joins_group() {
        let mut tokens = History::new();
        let mut chunks = History::new();

        let before = "let a = 1";
        resync(before, &mut tokens, &mut chunks, 0);
        assert_eq!(chunks.offset(), 2);

        let after = "let a = 1 and b = 2";
        resync(after, &mut tokens, &mut chunks, before.len());

        let collected = chunks.iter_past().cloned().collect::<Vec<_>>();
        assert_eq!(collected.len(), 2);
        let ChunkKind::Definition { group } = &collected[0].kind else {
            panic!("expected a definition chunk");
        };
        assert_eq!(group.items.len(), 2);
    }

    #[test]
    fn test_edit_preserves_prefix() {
        let mut tokens = History::new();
        let mut chunks = History::new();

        let before = "let a = 1\nlet b = 2\nlet c = 3";
        resync(before, &mut tokens, &mut chunks, 0);
        let original = chunks.iter_past().cloned().collect::<Vec<_>>();

        // touch only the last definition
        let after = "let a = 1\nlet b = 2\nlet c = 33";
        let edit = before.len() - 1;
        resync(after, &mut tokens, &mut chunks, edit);

        let updated = chunks.iter_past().cloned().collect::<Vec<_>>();
        assert_eq!(updated.len(), 4);
        // the first two definitions are the exact same chunks
        assert_eq!(original[0], updated[0]);
        assert_eq!(original[1], updated[1]);
        assert_ne!(original[2], updated[2]);
    }

    #[test]
    fn test_replay_matches_incremental() {
        let before = "let a = 1\nlet b = 2";
        let after = "let a = 1\nlet b = 2\nlet c = 3";

        let mut tokens = History::new();
        let mut chunks = History::new();
        resync(before, &mut tokens, &mut chunks, 0);
        resync(after, &mut tokens, &mut chunks, before.len());
        let incremental = chunks
            .iter_past()
            .map(|chunk| (chunk.kind.clone(), chunk.start, chunk.end))
            .collect::<Vec<_>>();

        let mut tokens = History::new();
        let mut chunks = History::new();
        resync(after, &mut tokens, &mut chunks, 0);
        let fresh = chunks
            .iter_past()
            .map(|chunk| (chunk.kind.clone(), chunk.start, chunk.end))
            .collect::<Vec<_>>();

        assert_eq!(incremental, fresh);
    }

    #[test]
    fn test_nested_inline_module_emits_no_chunks() {
        let chunks = chunk_kinds("let x = let module M = struct let a = 1 end in a");
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[0].kind, ChunkKind::Definition { .. }));
        assert_eq!(chunks[1].kind, ChunkKind::Done);
    }

    #[test]
    fn test_double_semicolon_separators() {
        let chunks = chunk_kinds("let a = 1;;\nlet b = 2;;");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_runaway_nesting_stops_the_pass() {
        let source = format!("let a = {}1{}", "(".repeat(600), ")".repeat(600));
        let chunks = chunk_kinds(&source);
        assert!(matches!(
            chunks.last().map(|chunk| &chunk.kind),
            Some(ChunkKind::Exception { .. })
        ));
    }
}
