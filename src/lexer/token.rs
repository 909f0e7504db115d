use colored::Colorize;

/// A point in the buffer. Lines are 1-indexed, columns 0-indexed; the byte
/// offset is the authoritative total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            col: 0,
            offset: 0,
        }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.offset.cmp(&other.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start.offset <= offset && offset < self.end.offset
    }

    /// Render the span inside its source line with the offending range
    /// highlighted, for human-readable traces.
    pub fn highlight(&self, source: &str, msg: impl ToString) -> String {
        let lines = source.lines().collect::<Vec<_>>();
        let Some(line_str) = lines.get(self.start.line - 1) else {
            return msg.to_string();
        };

        let col_end = if self.end.line == self.start.line {
            self.end.col.min(line_str.len())
        } else {
            line_str.len()
        };
        let col_start = self.start.col.min(col_end);

        let margin = format!("{}", self.start.line).len();
        let margin_fill = " ".repeat(margin);
        let padding = " ".repeat(col_start);
        let squiggles = "^".repeat((col_end - col_start).max(1)).red();

        format!(
            "{margin_fill} |\n{line} |{line_str}\n{margin_fill} |{padding}{squiggles} {}",
            msg.to_string(),
            line = self.start.line,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // keywords
    Let,
    Rec,
    And,
    In,
    Module,
    Struct,
    Sig,
    End,
    Open,
    Type,
    Exception,
    Class,
    Object,
    Fun,
    If,
    Then,
    Else,
    True,
    False,
    Of,
    // punctuation
    Eq,
    LParen,
    RParen,
    SmallRightArrow,
    Star,
    Dot,
    Comma,
    Colon,
    Semicolon,
    DoubleSemicolon,
    LBrace,
    RBrace,
    Pipe,
    Underscore,
    // carriers
    Ident(String),
    UIdent(String),
    Int(i64),
    Str(String),
    TypeVar(String),
    Comment(String),
}

impl TokenKind {
    /// Terminals the chunker resynchronizes on after a syntax error.
    pub fn is_sync_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Let
                | TokenKind::Module
                | TokenKind::Open
                | TokenKind::Type
                | TokenKind::Exception
                | TokenKind::Class
                | TokenKind::End
        )
    }

    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::UIdent(name) => format!("identifier '{name}'"),
            TokenKind::Int(value) => format!("literal '{value}'"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::TypeVar(name) => format!("type variable '{name}'"),
            TokenKind::Comment(_) => "comment".to_string(),
            TokenKind::Let => "'let'".to_string(),
            TokenKind::Rec => "'rec'".to_string(),
            TokenKind::And => "'and'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Module => "'module'".to_string(),
            TokenKind::Struct => "'struct'".to_string(),
            TokenKind::Sig => "'sig'".to_string(),
            TokenKind::End => "'end'".to_string(),
            TokenKind::Open => "'open'".to_string(),
            TokenKind::Type => "'type'".to_string(),
            TokenKind::Exception => "'exception'".to_string(),
            TokenKind::Class => "'class'".to_string(),
            TokenKind::Object => "'object'".to_string(),
            TokenKind::Fun => "'fun'".to_string(),
            TokenKind::If => "'if'".to_string(),
            TokenKind::Then => "'then'".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::Of => "'of'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::SmallRightArrow => "'->'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Semicolon => "';'".to_string(),
            TokenKind::DoubleSemicolon => "';;'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Pipe => "'|'".to_string(),
            TokenKind::Underscore => "'_'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::Comment(_))
    }
}
