mod adapter;
mod token;

pub use adapter::*;
pub use token::*;

use once_cell::sync::Lazy;
use std::{collections::HashMap, error::Error, fmt::Display, iter::Peekable, str::Chars};

#[derive(Debug, Clone, Default)]
struct LexMap {
    map: HashMap<&'static str, TokenKind>,
}

impl LexMap {
    pub fn insert(&mut self, key: &'static str, value: TokenKind) {
        self.map.insert(key, value);
    }

    pub fn can_match(&self, key: &str) -> bool {
        for map_key in self.map.keys() {
            if map_key.starts_with(key) {
                return true;
            }
        }
        false
    }

    pub fn get(&self, key: &str) -> Option<TokenKind> {
        self.map.get(key).cloned()
    }
}

macro_rules! terminal {
    ($map:ident, $name:ident, $value:expr) => {
        $map.insert($value, TokenKind::$name);
    };
}

static KEYWORDS: Lazy<LexMap> = Lazy::new(|| {
    let mut m = LexMap::default();

    terminal!(m, Let, "let");
    terminal!(m, Rec, "rec");
    terminal!(m, And, "and");
    terminal!(m, In, "in");
    terminal!(m, Module, "module");
    terminal!(m, Struct, "struct");
    terminal!(m, Sig, "sig");
    terminal!(m, End, "end");
    terminal!(m, Open, "open");
    terminal!(m, Type, "type");
    terminal!(m, Exception, "exception");
    terminal!(m, Class, "class");
    terminal!(m, Object, "object");
    terminal!(m, Fun, "fun");
    terminal!(m, If, "if");
    terminal!(m, Then, "then");
    terminal!(m, Else, "else");
    terminal!(m, True, "true");
    terminal!(m, False, "false");
    terminal!(m, Of, "of");
    terminal!(m, Underscore, "_");

    m
});

static SYMBOLS: Lazy<LexMap> = Lazy::new(|| {
    let mut m = LexMap::default();

    terminal!(m, Eq, "=");
    terminal!(m, LParen, "(");
    terminal!(m, RParen, ")");
    terminal!(m, SmallRightArrow, "->");
    terminal!(m, Star, "*");
    terminal!(m, Dot, ".");
    terminal!(m, Comma, ",");
    terminal!(m, Colon, ":");
    terminal!(m, Semicolon, ";");
    terminal!(m, DoubleSemicolon, ";;");
    terminal!(m, LBrace, "{");
    terminal!(m, RBrace, "}");
    terminal!(m, Pipe, "|");

    m
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub position: Position,
}

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} ({}:{})",
            self.message, self.position.line, self.position.col
        ))
    }
}

impl Error for LexError {}

/// Token scanner over a single buffer.
///
/// The scanner produces one token per call and can be constructed at any
/// previously produced [`Position`], which is what makes replaying from a
/// token history cheap: the wrapper repositions instead of rescanning.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    iterator: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::at(source, Position::default())
    }

    /// Start scanning at `pos`, which must lie on a character boundary.
    pub fn at(source: &'a str, pos: Position) -> Self {
        Self {
            source,
            iterator: source[pos.offset..].chars().peekable(),
            line: pos.line,
            col: pos.col,
            offset: pos.offset,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            col: self.col,
            offset: self.offset,
        }
    }

    /// Jump to `pos` if the scanner is not already there.
    pub fn reposition(&mut self, pos: Position) {
        if pos.offset != self.offset {
            *self = Self::at(self.source, pos);
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.iterator.peek()
    }

    fn bump(&mut self) -> Option<char> {
        let next = self.iterator.next()?;
        self.offset += next.len_utf8();
        if next == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(next)
    }

    fn bump_if(&mut self, func: impl FnOnce(&char) -> bool) -> Option<char> {
        if self.peek().map(func).unwrap_or(false) {
            return self.bump();
        }
        None
    }

    fn eat_whitespace(&mut self) {
        while self.bump_if(|item| item.is_whitespace()).is_some() {}
    }

    fn error(&self, message: impl ToString, position: Position) -> LexError {
        LexError {
            message: message.to_string(),
            position,
        }
    }

    /// Scan the next token. `Ok(None)` is end of input.
    pub fn next_token(&mut self) -> LexResult<Option<Token>> {
        self.eat_whitespace();

        let Some(next) = self.peek() else {
            return Ok(None);
        };

        match next {
            'a'..='z' | '_' => self.lex_word(),
            'A'..='Z' => self.lex_uppercase_word(),
            '0'..='9' => self.lex_numeric(),
            '"' => self.lex_string(),
            '\'' => self.lex_type_var(),
            '(' => self.lex_paren_or_comment(),
            _ => self.lex_special(),
        }
        .map(Some)
    }

    fn token(&self, kind: TokenKind, start: Position) -> Token {
        Token {
            kind,
            span: Span::new(start, self.position()),
        }
    }

    fn lex_word(&mut self) -> LexResult<Token> {
        let start = self.position();
        let mut stack = vec![];

        while let Some(next) = self.bump_if(|item| item.is_alphanumeric() || *item == '_') {
            stack.push(next);
        }

        let read = stack.iter().collect::<String>();

        let kind = KEYWORDS.get(read.as_str()).unwrap_or(TokenKind::Ident(read));
        Ok(self.token(kind, start))
    }

    fn lex_uppercase_word(&mut self) -> LexResult<Token> {
        let start = self.position();
        let mut stack = vec![];

        while let Some(next) = self.bump_if(|item| item.is_alphanumeric() || *item == '_') {
            stack.push(next);
        }

        let read = stack.iter().collect::<String>();
        Ok(self.token(TokenKind::UIdent(read), start))
    }

    fn lex_numeric(&mut self) -> LexResult<Token> {
        let start = self.position();
        let mut stack = vec![];

        while let Some(next) = self.bump_if(|item| item.is_numeric()) {
            stack.push(next)
        }

        let read = stack.iter().collect::<String>();
        let value = read
            .parse::<i64>()
            .map_err(|_| self.error(format!("failed to parse numeric '{read}'"), start))?;

        Ok(self.token(TokenKind::Int(value), start))
    }

    fn lex_string(&mut self) -> LexResult<Token> {
        let start = self.position();
        self.bump();

        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal", start)),
                Some('"') => break,
                Some('\\') => {
                    raw.push('\\');
                    let Some(escaped) = self.bump() else {
                        return Err(self.error("unterminated string literal", start));
                    };
                    raw.push(escaped);
                }
                Some(other) => raw.push(other),
            }
        }

        let Some(value) = unescape::unescape(&raw) else {
            return Err(self.error(format!("invalid escape sequence in \"{raw}\""), start));
        };

        Ok(self.token(TokenKind::Str(value), start))
    }

    fn lex_type_var(&mut self) -> LexResult<Token> {
        let start = self.position();
        self.bump();

        let mut stack = vec![];
        while let Some(next) = self.bump_if(|item| item.is_alphanumeric() || *item == '_') {
            stack.push(next);
        }

        if stack.is_empty() {
            return Err(self.error("expected a type variable after '''", start));
        }

        Ok(self.token(TokenKind::TypeVar(stack.iter().collect()), start))
    }

    fn lex_paren_or_comment(&mut self) -> LexResult<Token> {
        let start = self.position();
        self.bump();

        if self.bump_if(|item| *item == '*').is_none() {
            return Ok(self.token(TokenKind::LParen, start));
        }

        // comments nest; an unterminated one extends to end of input
        let mut depth = 1;
        let mut text = String::new();
        while depth > 0 {
            match self.bump() {
                None => break,
                Some('(') if self.peek() == Some(&'*') => {
                    self.bump();
                    depth += 1;
                    text.push_str("(*");
                }
                Some('*') if self.peek() == Some(&')') => {
                    self.bump();
                    depth -= 1;
                    if depth > 0 {
                        text.push_str("*)");
                    }
                }
                Some(other) => text.push(other),
            }
        }

        Ok(self.token(TokenKind::Comment(text), start))
    }

    fn lex_special(&mut self) -> LexResult<Token> {
        let start = self.position();
        let mut stack = vec![];

        while let Some(next) = self.bump() {
            stack.push(next);

            let read = stack.iter().collect::<String>();

            let can_read_next = self
                .peek()
                .map(|item| {
                    let mut stack = stack.clone();
                    stack.push(*item);
                    let read = stack.iter().collect::<String>();
                    SYMBOLS.can_match(read.as_str())
                })
                .unwrap_or(false);

            if can_read_next {
                continue;
            }

            let Some(kind) = SYMBOLS.get(read.as_str()) else {
                return Err(self.error(format!("failed to lex '{read}'"), start));
            };

            return Ok(self.token(kind, start));
        }

        Err(self.error("unexpected end of input", start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(input: &str) -> LexResult<Vec<TokenKind>> {
        let mut lexer = Lexer::new(input);
        let mut kinds = vec![];
        while let Some(token) = lexer.next_token()? {
            kinds.push(token.kind);
        }
        Ok(kinds)
    }

    #[test]
    fn test_lex_keywords_and_idents() {
        assert_eq!(
            lex_all("let rec letter = fun x -> x"),
            Ok(vec![
                TokenKind::Let,
                TokenKind::Rec,
                TokenKind::Ident("letter".into()),
                TokenKind::Eq,
                TokenKind::Fun,
                TokenKind::Ident("x".into()),
                TokenKind::SmallRightArrow,
                TokenKind::Ident("x".into()),
            ])
        );
    }

    #[test]
    fn test_lex_qualified_path() {
        assert_eq!(
            lex_all("M.N.u"),
            Ok(vec![
                TokenKind::UIdent("M".into()),
                TokenKind::Dot,
                TokenKind::UIdent("N".into()),
                TokenKind::Dot,
                TokenKind::Ident("u".into()),
            ])
        );
    }

    #[test]
    fn test_lex_positions() {
        let mut lexer = Lexer::new("let u = ()\nlet v = 1");
        let first = lexer.next_token().unwrap().unwrap();
        assert_eq!(first.span.start, Position { line: 1, col: 0, offset: 0 });
        assert_eq!(first.span.end, Position { line: 1, col: 3, offset: 3 });

        let mut last = first;
        while let Some(token) = lexer.next_token().unwrap() {
            last = token;
        }
        assert_eq!(last.kind, TokenKind::Int(1));
        assert_eq!(last.span.start.line, 2);
        assert_eq!(last.span.start.col, 8);
    }

    #[test]
    fn test_lex_string_with_escape() {
        assert_eq!(
            lex_all(r#"let s = "a\nb""#),
            Ok(vec![
                TokenKind::Let,
                TokenKind::Ident("s".into()),
                TokenKind::Eq,
                TokenKind::Str("a\nb".into()),
            ])
        );
    }

    #[test]
    fn test_lex_nested_comment() {
        assert_eq!(
            lex_all("(* a (* b *) c *) let"),
            Ok(vec![
                TokenKind::Comment(" a (* b *) c ".into()),
                TokenKind::Let,
            ])
        );
    }

    #[test]
    fn test_lex_double_semicolon() {
        assert_eq!(
            lex_all(";; ;"),
            Ok(vec![TokenKind::DoubleSemicolon, TokenKind::Semicolon])
        );
    }

    #[test]
    fn test_lex_invalid_token() {
        let mut lexer = Lexer::new("#");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.message, "failed to lex '#'");
        // the scanner made progress, so recovery can continue
        assert_eq!(lexer.position().offset, 1);
    }

    #[test]
    fn test_resume_at_position() {
        let source = "let a = 1\nlet b = 2";
        let mut lexer = Lexer::new(source);
        let mut boundary = Position::default();
        for _ in 0..4 {
            boundary = lexer.next_token().unwrap().unwrap().span.end;
        }

        let mut resumed = Lexer::at(source, boundary);
        let next = resumed.next_token().unwrap().unwrap();
        assert_eq!(next.kind, TokenKind::Let);
        assert_eq!(next.span.start.line, 2);
    }
}
