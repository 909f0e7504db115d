use crate::history::{History, Sync};

use super::{LexResult, Lexer, Position, Token};

/// Lexer wrapper that records every produced token in a token history and
/// replays the history's future instead of rescanning.
///
/// Comments are filtered from the stream the parser sees but still recorded,
/// so repositioning after an edit lands on real token boundaries. Pushing a
/// consumed lookahead back is a cursor move, which is all the pushback
/// buffer the chunker needs.
pub struct HistoryLexer<'a, 'h> {
    lexer: Lexer<'a>,
    history: &'h mut History<Token>,
}

impl<'a, 'h> HistoryLexer<'a, 'h> {
    /// Wrap `history`, resuming the scan where its cursor currently is.
    pub fn wrap(source: &'a str, history: &'h mut History<Token>) -> Self {
        let pos = history
            .prev()
            .map(|token| token.span.end)
            .unwrap_or_default();
        Self {
            lexer: Lexer::at(source, pos),
            history,
        }
    }

    fn next_any(&mut self) -> LexResult<Option<Token>> {
        if let Some(token) = self.history.next().cloned() {
            self.history.forward();
            self.lexer.reposition(token.span.end);
            return Ok(Some(token));
        }

        match self.lexer.next_token()? {
            Some(token) => {
                self.history.insert(token.clone());
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Next non-comment token; `Ok(None)` is end of input.
    pub fn next(&mut self) -> LexResult<Option<Token>> {
        loop {
            match self.next_any()? {
                Some(token) if token.is_comment() => continue,
                other => return Ok(other),
            }
        }
    }

    /// Look at the next non-comment token without consuming it.
    pub fn peek(&mut self) -> LexResult<Option<Token>> {
        let token = self.next()?;
        if token.is_some() {
            self.push_back();
        }
        Ok(token)
    }

    /// Return the most recently consumed non-comment token to the stream.
    pub fn push_back(&mut self) {
        while let Some(token) = self.history.backward() {
            if !token.is_comment() {
                break;
            }
        }
        let pos = self
            .history
            .prev()
            .map(|token| token.span.end)
            .unwrap_or_default();
        self.lexer.reposition(pos);
    }

    /// End position of the last consumed token.
    pub fn last_end(&self) -> Position {
        self.history
            .prev()
            .map(|token| token.span.end)
            .unwrap_or_default()
    }

    /// Current scan position (after the last consumed token and any
    /// whitespace already skipped).
    pub fn pos(&self) -> Position {
        self.lexer.position()
    }

    /// Capture the token history cursor for a chunk sync marker.
    pub fn mark(&self) -> Sync<Token> {
        Sync::at(self.history)
    }

    /// Move the cursor back so that every past token ends at or before
    /// `offset`; replaying resumes from there.
    pub fn seek_before(&mut self, offset: usize) {
        self.history.seek(|token| {
            if token.span.end.offset <= offset {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
        let pos = self
            .history
            .prev()
            .map(|token| token.span.end)
            .unwrap_or_default();
        self.lexer.reposition(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;

    #[test]
    fn test_tokens_are_recorded() {
        let mut history = History::new();
        let mut lx = HistoryLexer::wrap("let a = 1", &mut history);

        while lx.next().unwrap().is_some() {}
        assert_eq!(history.offset(), 4);
    }

    #[test]
    fn test_replay_from_history() {
        let source = "let a = 1";
        let mut history = History::new();

        let mut lx = HistoryLexer::wrap(source, &mut history);
        while lx.next().unwrap().is_some() {}

        history.seek_offset(0);
        let mut lx = HistoryLexer::wrap(source, &mut history);
        let replayed = lx.next().unwrap().unwrap();
        assert_eq!(replayed.kind, TokenKind::Let);
        // replay did not duplicate anything
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_comments_filtered_but_recorded() {
        let mut history = History::new();
        let mut lx = HistoryLexer::wrap("(* hi *) let", &mut history);

        let first = lx.next().unwrap().unwrap();
        assert_eq!(first.kind, TokenKind::Let);
        assert_eq!(history.offset(), 2);
    }

    #[test]
    fn test_peek_then_next() {
        let mut history = History::new();
        let mut lx = HistoryLexer::wrap("(* c *) let a", &mut history);

        let peeked = lx.peek().unwrap().unwrap();
        let consumed = lx.next().unwrap().unwrap();
        assert_eq!(peeked, consumed);
        assert_eq!(consumed.kind, TokenKind::Let);
    }

    #[test]
    fn test_seek_before_replays_suffix() {
        let source = "let a = 1 let b = 2";
        let mut history = History::new();
        let mut lx = HistoryLexer::wrap(source, &mut history);
        while lx.next().unwrap().is_some() {}

        // 9 is the end of the first item
        let mut lx = HistoryLexer::wrap(source, &mut history);
        lx.seek_before(9);
        let next = lx.next().unwrap().unwrap();
        assert_eq!(next.kind, TokenKind::Let);
        assert_eq!(next.span.start.offset, 10);
        assert_eq!(history.len(), 8);
    }
}
