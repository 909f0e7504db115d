//! Recursive grammar over the replayable token stream.
//!
//! Every function consumes tokens through the [`HistoryLexer`], so a
//! lookahead that turns out to belong to the next construct is returned to
//! the stream with a cursor move instead of a side buffer. Emission is a
//! tagged return ([`Parse`]); the driver in the parent module decides what
//! becomes a chunk.

use crate::lexer::{HistoryLexer, LexError, Position, Span, Token, TokenKind};

use super::ast::{
    Binding, Expr, ExprKind, Item, ItemGroup, LabelDecl, Longident, ModExpr, Param, TypeBody,
    TypeDecl, TypeExpr, TypeExprKind,
};
use super::chunk::SyntaxError;
use super::Counters;

/// Recursion guard for pathological nesting.
const MAX_DEPTH: usize = 500;

#[derive(Debug)]
pub(super) enum ParseFail {
    Syntax(SyntaxError),
    /// End of input in the middle of a construct.
    Eof { start: Position },
    /// The recursion guard was blown; the pass stops.
    Depth { start: Position },
}

impl From<LexError> for ParseFail {
    fn from(error: LexError) -> Self {
        ParseFail::Syntax(SyntaxError {
            message: error.message,
            span: Span::new(error.position, error.position),
        })
    }
}

type PResult<T> = Result<T, ParseFail>;

/// Outcome of one top-level parse step.
#[derive(Debug)]
pub(super) enum Parse {
    /// `module M = struct` — the structure body follows as further chunks.
    Enter { name: String, start: Position },
    /// A top-level `end`.
    Leave { start: Position },
    /// A completed definition group.
    Group { group: ItemGroup, start: Position },
    /// The next token extends the previous definition; nothing consumed.
    Rollback { start: Position },
    /// Clean end of input.
    Done { pos: Position },
}

fn next(lx: &mut HistoryLexer) -> PResult<Option<Token>> {
    Ok(lx.next()?)
}

fn peek(lx: &mut HistoryLexer) -> PResult<Option<Token>> {
    Ok(lx.peek()?)
}

fn eat(lx: &mut HistoryLexer, pred: impl Fn(&TokenKind) -> bool) -> PResult<Option<Token>> {
    match peek(lx)? {
        Some(token) if pred(&token.kind) => {
            next(lx)?;
            Ok(Some(token))
        }
        _ => Ok(None),
    }
}

fn unexpected(token: &Token, expected: &str) -> ParseFail {
    ParseFail::Syntax(SyntaxError {
        message: format!("expected {expected} but found {}", token.kind.describe()),
        span: token.span,
    })
}

fn expect(
    lx: &mut HistoryLexer,
    expected: &str,
    pred: impl Fn(&TokenKind) -> bool,
) -> PResult<Token> {
    match next(lx)? {
        None => Err(ParseFail::Eof {
            start: lx.last_end(),
        }),
        Some(token) if pred(&token.kind) => Ok(token),
        Some(token) => {
            lx.push_back();
            Err(unexpected(&token, expected))
        }
    }
}

fn guard(depth: usize, at: Position) -> PResult<usize> {
    if depth > MAX_DEPTH {
        return Err(ParseFail::Depth { start: at });
    }
    Ok(depth + 1)
}

/// Parse one top-level construct.
pub(super) fn parse_item(lx: &mut HistoryLexer, counters: &mut Counters) -> PResult<Parse> {
    loop {
        let Some(token) = peek(lx)? else {
            return Ok(Parse::Done { pos: lx.last_end() });
        };
        let start = token.span.start;

        let parsed = match token.kind {
            TokenKind::DoubleSemicolon => {
                next(lx)?;
                continue;
            }
            TokenKind::And => return Ok(Parse::Rollback { start }),
            TokenKind::End => {
                next(lx)?;
                return Ok(Parse::Leave { start });
            }
            TokenKind::Module => return parse_module_item(lx),
            TokenKind::Let => parse_let_group(lx, counters, 0),
            TokenKind::Type => parse_type_group(lx, counters, 0),
            TokenKind::Exception => parse_exception(lx, 0),
            TokenKind::Class => parse_class(lx),
            TokenKind::Open => parse_open(lx),
            _ => Err(unexpected(&token, "a top-level definition")),
        };

        return match parsed {
            Ok((group, span)) => Ok(Parse::Group {
                group,
                start: span.start,
            }),
            // the construct started here, not where input ran out
            Err(ParseFail::Eof { .. }) => Err(ParseFail::Eof { start }),
            Err(other) => Err(other),
        };
    }
}

/// Skip tokens until a terminal the grammar can restart on.
pub(super) fn skip_to_sync(lx: &mut HistoryLexer) {
    loop {
        match lx.peek() {
            Ok(None) => return,
            Ok(Some(token)) if token.kind.is_sync_keyword() => return,
            Ok(Some(_)) => {
                let _ = lx.next();
            }
            // the scanner advanced past the offending bytes already
            Err(_) => continue,
        }
    }
}

/// Consume one token unconditionally, for recovery paths that must progress.
pub(super) fn skip_one(lx: &mut HistoryLexer) {
    let _ = lx.next();
}

fn parse_let_group(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<(ItemGroup, Span)> {
    let let_tok = expect(lx, "'let'", |k| matches!(k, TokenKind::Let))?;
    let rec_flag = eat(lx, |k| matches!(k, TokenKind::Rec))?.is_some();

    let first = parse_binding(lx, counters, depth)?;
    let mut span = Span::new(let_tok.span.start, first.span.end);
    let mut items = vec![Item::Binding(first)];

    if coalesce(counters) {
        while eat(lx, |k| matches!(k, TokenKind::And))?.is_some() {
            let binding = parse_binding(lx, counters, depth)?;
            span.end = binding.span.end;
            items.push(Item::Binding(binding));
        }
    }

    Ok((ItemGroup { rec_flag, items }, span))
}

/// Whether a group parse consumes its `and` continuations itself.
///
/// Inside a nested structure there is no chunk boundary to roll back over,
/// so groups always coalesce there. At top level the first prospective
/// emission goes through the suppression counter: the driver re-arms it
/// when it reacts to a rollback, and only then does the re-parse swallow
/// the continuations and re-emit the joined group.
fn coalesce(counters: &mut Counters) -> bool {
    if counters.nesting > 0 {
        return true;
    }
    if counters.filter_first > 0 {
        counters.filter_first -= 1;
        return true;
    }
    false
}

fn parse_binding(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<Binding> {
    let depth = guard(depth, lx.last_end())?;

    let name_tok = expect(lx, "a binding name", |k| {
        matches!(k, TokenKind::Ident(_) | TokenKind::Underscore)
    })?;
    let name = match &name_tok.kind {
        TokenKind::Ident(name) => Some(name.clone()),
        _ => None,
    };

    let mut params = vec![];
    let mut annotation = None;
    loop {
        let Some(token) = peek(lx)? else {
            return Err(ParseFail::Eof {
                start: name_tok.span.start,
            });
        };
        match token.kind {
            TokenKind::Eq => {
                next(lx)?;
                break;
            }
            TokenKind::Colon => {
                next(lx)?;
                annotation = Some(parse_type_expr(lx, depth)?);
                expect(lx, "'='", |k| matches!(k, TokenKind::Eq))?;
                break;
            }
            TokenKind::Ident(_) | TokenKind::Underscore | TokenKind::LParen => {
                params.push(parse_param(lx, depth)?);
            }
            _ => return Err(unexpected(&token, "a parameter or '='")),
        }
    }

    let body = parse_expr(lx, counters, depth)?;
    let span = Span::new(name_tok.span.start, body.span.end);

    Ok(Binding {
        name,
        name_span: name_tok.span,
        params,
        annotation,
        body,
        span,
    })
}

fn parse_param(lx: &mut HistoryLexer, depth: usize) -> PResult<Param> {
    let token = expect(lx, "a parameter", |k| {
        matches!(
            k,
            TokenKind::Ident(_) | TokenKind::Underscore | TokenKind::LParen
        )
    })?;

    match &token.kind {
        TokenKind::Ident(name) => Ok(Param {
            name: Some(name.clone()),
            annotation: None,
            span: token.span,
        }),
        TokenKind::Underscore => Ok(Param {
            name: None,
            annotation: None,
            span: token.span,
        }),
        _ => {
            // `()` or `(name : type)`
            if let Some(close) = eat(lx, |k| matches!(k, TokenKind::RParen))? {
                return Ok(Param {
                    name: None,
                    annotation: Some(TypeExpr {
                        kind: TypeExprKind::Name(Longident::simple("unit")),
                        span: token.span.merge(&close.span),
                    }),
                    span: token.span.merge(&close.span),
                });
            }
            let name_tok = expect(lx, "a parameter name", |k| matches!(k, TokenKind::Ident(_)))?;
            let TokenKind::Ident(name) = &name_tok.kind else {
                unreachable!()
            };
            expect(lx, "':'", |k| matches!(k, TokenKind::Colon))?;
            let annotation = parse_type_expr(lx, depth)?;
            let close = expect(lx, "')'", |k| matches!(k, TokenKind::RParen))?;
            Ok(Param {
                name: Some(name.clone()),
                annotation: Some(annotation),
                span: token.span.merge(&close.span),
            })
        }
    }
}

fn parse_expr(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let depth = guard(depth, lx.last_end())?;

    let Some(token) = peek(lx)? else {
        return Err(ParseFail::Eof {
            start: lx.last_end(),
        });
    };

    match token.kind {
        TokenKind::Fun => parse_fun(lx, counters, depth),
        TokenKind::If => parse_if(lx, counters, depth),
        TokenKind::Let => parse_let_in(lx, counters, depth),
        _ => parse_app(lx, counters, depth),
    }
}

fn parse_fun(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let fun_tok = expect(lx, "'fun'", |k| matches!(k, TokenKind::Fun))?;

    let mut params = vec![parse_param(lx, depth)?];
    while matches!(
        peek(lx)?.map(|t| t.kind),
        Some(TokenKind::Ident(_) | TokenKind::Underscore | TokenKind::LParen)
    ) {
        params.push(parse_param(lx, depth)?);
    }

    expect(lx, "'->'", |k| matches!(k, TokenKind::SmallRightArrow))?;
    let body = parse_expr(lx, counters, depth)?;
    let span = Span::new(fun_tok.span.start, body.span.end);

    Ok(Expr {
        kind: ExprKind::Fun {
            params,
            body: Box::new(body),
        },
        span,
    })
}

fn parse_if(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let if_tok = expect(lx, "'if'", |k| matches!(k, TokenKind::If))?;
    let condition = parse_expr(lx, counters, depth)?;
    expect(lx, "'then'", |k| matches!(k, TokenKind::Then))?;
    let then_branch = parse_expr(lx, counters, depth)?;

    let mut span = Span::new(if_tok.span.start, then_branch.span.end);
    let else_branch = if eat(lx, |k| matches!(k, TokenKind::Else))?.is_some() {
        let expr = parse_expr(lx, counters, depth)?;
        span.end = expr.span.end;
        Some(Box::new(expr))
    } else {
        None
    };

    Ok(Expr {
        kind: ExprKind::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch,
        },
        span,
    })
}

fn parse_let_in(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let let_tok = expect(lx, "'let'", |k| matches!(k, TokenKind::Let))?;

    if eat(lx, |k| matches!(k, TokenKind::Module))?.is_some() {
        let name_tok = expect(lx, "a module name", |k| matches!(k, TokenKind::UIdent(_)))?;
        let TokenKind::UIdent(name) = &name_tok.kind else {
            unreachable!()
        };
        expect(lx, "'='", |k| matches!(k, TokenKind::Eq))?;
        let expr = parse_mod_expr(lx, counters, depth)?;
        expect(lx, "'in'", |k| matches!(k, TokenKind::In))?;
        let body = parse_expr(lx, counters, depth)?;
        let span = Span::new(let_tok.span.start, body.span.end);

        return Ok(Expr {
            kind: ExprKind::LetModuleIn {
                name: name.clone(),
                expr,
                body: Box::new(body),
            },
            span,
        });
    }

    let rec_flag = eat(lx, |k| matches!(k, TokenKind::Rec))?.is_some();
    let mut bindings = vec![parse_binding(lx, counters, depth)?];
    while eat(lx, |k| matches!(k, TokenKind::And))?.is_some() {
        bindings.push(parse_binding(lx, counters, depth)?);
    }

    expect(lx, "'in'", |k| matches!(k, TokenKind::In))?;
    let body = parse_expr(lx, counters, depth)?;
    let span = Span::new(let_tok.span.start, body.span.end);

    Ok(Expr {
        kind: ExprKind::LetIn {
            rec_flag,
            bindings,
            body: Box::new(body),
        },
        span,
    })
}

fn is_atom_start(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Ident(_)
            | TokenKind::UIdent(_)
            | TokenKind::Int(_)
            | TokenKind::Str(_)
            | TokenKind::True
            | TokenKind::False
            | TokenKind::LParen
    )
}

fn parse_app(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let func = parse_atom(lx, counters, depth)?;

    let mut args = vec![];
    while matches!(peek(lx)?, Some(token) if is_atom_start(&token.kind)) {
        args.push(parse_atom(lx, counters, depth)?);
    }

    if args.is_empty() {
        return Ok(func);
    }

    let end = args.last().map(|a| a.span.end).unwrap_or(func.span.end);
    let span = Span::new(func.span.start, end);
    Ok(Expr {
        kind: ExprKind::App {
            func: Box::new(func),
            args,
        },
        span,
    })
}

fn parse_atom(lx: &mut HistoryLexer, counters: &mut Counters, depth: usize) -> PResult<Expr> {
    let Some(token) = next(lx)? else {
        return Err(ParseFail::Eof {
            start: lx.last_end(),
        });
    };

    match &token.kind {
        TokenKind::Int(value) => Ok(Expr {
            kind: ExprKind::Int(*value),
            span: token.span,
        }),
        TokenKind::Str(value) => Ok(Expr {
            kind: ExprKind::Str(value.clone()),
            span: token.span,
        }),
        TokenKind::True => Ok(Expr {
            kind: ExprKind::Bool(true),
            span: token.span,
        }),
        TokenKind::False => Ok(Expr {
            kind: ExprKind::Bool(false),
            span: token.span,
        }),
        TokenKind::Ident(_) | TokenKind::UIdent(_) => {
            lx.push_back();
            let (path, span) = parse_value_path(lx)?;
            Ok(Expr {
                kind: ExprKind::Ident(path),
                span,
            })
        }
        TokenKind::LParen => {
            if let Some(close) = eat(lx, |k| matches!(k, TokenKind::RParen))? {
                return Ok(Expr {
                    kind: ExprKind::Unit,
                    span: token.span.merge(&close.span),
                });
            }

            let first = parse_expr(lx, counters, depth)?;
            if matches!(peek(lx)?.map(|t| t.kind), Some(TokenKind::Comma)) {
                let mut elements = vec![first];
                while eat(lx, |k| matches!(k, TokenKind::Comma))?.is_some() {
                    elements.push(parse_expr(lx, counters, depth)?);
                }
                let close = expect(lx, "')'", |k| matches!(k, TokenKind::RParen))?;
                return Ok(Expr {
                    kind: ExprKind::Tuple(elements),
                    span: token.span.merge(&close.span),
                });
            }

            let close = expect(lx, "')'", |k| matches!(k, TokenKind::RParen))?;
            Ok(Expr {
                kind: first.kind,
                span: token.span.merge(&close.span),
            })
        }
        _ => {
            lx.push_back();
            Err(unexpected(&token, "an expression"))
        }
    }
}

/// `M.N.u` or `M.N` — uppercase segments may continue with a dot, a final
/// lowercase segment ends the path.
fn parse_value_path(lx: &mut HistoryLexer) -> PResult<(Longident, Span)> {
    let first = expect(lx, "an identifier", |k| {
        matches!(k, TokenKind::Ident(_) | TokenKind::UIdent(_))
    })?;

    let mut span = first.span;
    let mut segments = vec![];
    let mut last_upper = match &first.kind {
        TokenKind::Ident(name) => {
            segments.push(name.clone());
            false
        }
        TokenKind::UIdent(name) => {
            segments.push(name.clone());
            true
        }
        _ => unreachable!(),
    };

    while last_upper {
        if eat(lx, |k| matches!(k, TokenKind::Dot))?.is_none() {
            break;
        }
        let segment = expect(lx, "an identifier after '.'", |k| {
            matches!(k, TokenKind::Ident(_) | TokenKind::UIdent(_))
        })?;
        span.end = segment.span.end;
        last_upper = match &segment.kind {
            TokenKind::Ident(name) => {
                segments.push(name.clone());
                false
            }
            TokenKind::UIdent(name) => {
                segments.push(name.clone());
                true
            }
            _ => unreachable!(),
        };
    }

    Ok((Longident(segments), span))
}

/// A module path: uppercase segments only.
fn parse_module_path(lx: &mut HistoryLexer) -> PResult<(Longident, Span)> {
    let first = expect(lx, "a module name", |k| matches!(k, TokenKind::UIdent(_)))?;
    let TokenKind::UIdent(name) = &first.kind else {
        unreachable!()
    };

    let mut span = first.span;
    let mut segments = vec![name.clone()];
    while matches!(peek(lx)?.map(|t| t.kind), Some(TokenKind::Dot)) {
        next(lx)?;
        let segment = expect(lx, "a module name after '.'", |k| {
            matches!(k, TokenKind::UIdent(_))
        })?;
        let TokenKind::UIdent(name) = &segment.kind else {
            unreachable!()
        };
        segments.push(name.clone());
        span.end = segment.span.end;
    }

    Ok((Longident(segments), span))
}

fn parse_type_expr(lx: &mut HistoryLexer, depth: usize) -> PResult<TypeExpr> {
    let depth = guard(depth, lx.last_end())?;

    let lhs = parse_type_tuple(lx, depth)?;
    if eat(lx, |k| matches!(k, TokenKind::SmallRightArrow))?.is_some() {
        let rhs = parse_type_expr(lx, depth)?;
        let span = lhs.span.merge(&rhs.span);
        return Ok(TypeExpr {
            kind: TypeExprKind::Arrow(Box::new(lhs), Box::new(rhs)),
            span,
        });
    }
    Ok(lhs)
}

fn parse_type_tuple(lx: &mut HistoryLexer, depth: usize) -> PResult<TypeExpr> {
    let first = parse_type_atom(lx, depth)?;
    if !matches!(peek(lx)?.map(|t| t.kind), Some(TokenKind::Star)) {
        return Ok(first);
    }

    let mut span = first.span;
    let mut elements = vec![first];
    while eat(lx, |k| matches!(k, TokenKind::Star))?.is_some() {
        let element = parse_type_atom(lx, depth)?;
        span.end = element.span.end;
        elements.push(element);
    }
    Ok(TypeExpr {
        kind: TypeExprKind::Tuple(elements),
        span,
    })
}

fn parse_type_atom(lx: &mut HistoryLexer, depth: usize) -> PResult<TypeExpr> {
    let Some(token) = next(lx)? else {
        return Err(ParseFail::Eof {
            start: lx.last_end(),
        });
    };

    match &token.kind {
        TokenKind::TypeVar(name) => Ok(TypeExpr {
            kind: TypeExprKind::Var(name.clone()),
            span: token.span,
        }),
        TokenKind::Ident(_) | TokenKind::UIdent(_) => {
            lx.push_back();
            let (path, span) = parse_value_path(lx)?;
            Ok(TypeExpr {
                kind: TypeExprKind::Name(path),
                span,
            })
        }
        TokenKind::LParen => {
            let inner = parse_type_expr(lx, depth)?;
            let close = expect(lx, "')'", |k| matches!(k, TokenKind::RParen))?;
            Ok(TypeExpr {
                kind: inner.kind,
                span: token.span.merge(&close.span),
            })
        }
        _ => {
            lx.push_back();
            Err(unexpected(&token, "a type"))
        }
    }
}

fn parse_type_group(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<(ItemGroup, Span)> {
    let type_tok = expect(lx, "'type'", |k| matches!(k, TokenKind::Type))?;

    let first = parse_type_decl(lx, type_tok.span.start, depth)?;
    let mut span = Span::new(type_tok.span.start, first.span.end);
    let mut items = vec![Item::TypeDecl(first)];

    if coalesce(counters) {
        while let Some(and_tok) = eat(lx, |k| matches!(k, TokenKind::And))? {
            let decl = parse_type_decl(lx, and_tok.span.start, depth)?;
            span.end = decl.span.end;
            items.push(Item::TypeDecl(decl));
        }
    }

    Ok((
        ItemGroup {
            rec_flag: false,
            items,
        },
        span,
    ))
}

fn parse_type_decl(lx: &mut HistoryLexer, start: Position, depth: usize) -> PResult<TypeDecl> {
    let mut params = vec![];
    while let Some(token) = eat(lx, |k| matches!(k, TokenKind::TypeVar(_)))? {
        let TokenKind::TypeVar(name) = token.kind else {
            unreachable!()
        };
        params.push(name);
    }

    let name_tok = expect(lx, "a type name", |k| matches!(k, TokenKind::Ident(_)))?;
    let TokenKind::Ident(name) = &name_tok.kind else {
        unreachable!()
    };

    let mut span = Span::new(start, name_tok.span.end);
    let body = if eat(lx, |k| matches!(k, TokenKind::Eq))?.is_some() {
        if matches!(peek(lx)?.map(|t| t.kind), Some(TokenKind::LBrace)) {
            let (labels, end) = parse_record_body(lx, depth)?;
            span.end = end;
            TypeBody::Record(labels)
        } else {
            let alias = parse_type_expr(lx, depth)?;
            span.end = alias.span.end;
            TypeBody::Alias(alias)
        }
    } else {
        TypeBody::Abstract
    };

    Ok(TypeDecl {
        name: name.clone(),
        params,
        body,
        span,
    })
}

fn parse_record_body(lx: &mut HistoryLexer, depth: usize) -> PResult<(Vec<LabelDecl>, Position)> {
    expect(lx, "'{'", |k| matches!(k, TokenKind::LBrace))?;

    let mut labels = vec![];
    loop {
        if let Some(close) = eat(lx, |k| matches!(k, TokenKind::RBrace))? {
            return Ok((labels, close.span.end));
        }

        let name_tok = expect(lx, "a label name", |k| matches!(k, TokenKind::Ident(_)))?;
        let TokenKind::Ident(name) = &name_tok.kind else {
            unreachable!()
        };
        expect(lx, "':'", |k| matches!(k, TokenKind::Colon))?;
        let ty = parse_type_expr(lx, depth)?;
        let span = Span::new(name_tok.span.start, ty.span.end);
        labels.push(LabelDecl {
            name: name.clone(),
            ty,
            span,
        });

        if eat(lx, |k| matches!(k, TokenKind::Semicolon))?.is_none() {
            let close = expect(lx, "'}'", |k| matches!(k, TokenKind::RBrace))?;
            return Ok((labels, close.span.end));
        }
    }
}

fn parse_exception(lx: &mut HistoryLexer, depth: usize) -> PResult<(ItemGroup, Span)> {
    let exc_tok = expect(lx, "'exception'", |k| matches!(k, TokenKind::Exception))?;
    let name_tok = expect(lx, "an exception name", |k| matches!(k, TokenKind::UIdent(_)))?;
    let TokenKind::UIdent(name) = &name_tok.kind else {
        unreachable!()
    };

    let mut span = Span::new(exc_tok.span.start, name_tok.span.end);
    let arg = if eat(lx, |k| matches!(k, TokenKind::Of))?.is_some() {
        let ty = parse_type_expr(lx, depth)?;
        span.end = ty.span.end;
        Some(ty)
    } else {
        None
    };

    Ok((
        ItemGroup {
            rec_flag: false,
            items: vec![Item::Exception {
                name: name.clone(),
                arg,
                span,
            }],
        },
        span,
    ))
}

/// `class c = object … end` — the body is recognized but not analyzed.
fn parse_class(lx: &mut HistoryLexer) -> PResult<(ItemGroup, Span)> {
    let class_tok = expect(lx, "'class'", |k| matches!(k, TokenKind::Class))?;
    let name_tok = expect(lx, "a class name", |k| matches!(k, TokenKind::Ident(_)))?;
    let TokenKind::Ident(name) = &name_tok.kind else {
        unreachable!()
    };
    expect(lx, "'='", |k| matches!(k, TokenKind::Eq))?;
    expect(lx, "'object'", |k| matches!(k, TokenKind::Object))?;

    let mut depth = 1;
    while depth > 0 {
        let Some(token) = next(lx)? else {
            return Err(ParseFail::Eof {
                start: class_tok.span.start,
            });
        };
        match token.kind {
            TokenKind::Object | TokenKind::Struct | TokenKind::Sig => depth += 1,
            TokenKind::End => depth -= 1,
            _ => {}
        }
    }

    let span = Span::new(class_tok.span.start, lx.last_end());
    Ok((
        ItemGroup {
            rec_flag: false,
            items: vec![Item::Class {
                name: name.clone(),
                span,
            }],
        },
        span,
    ))
}

fn parse_open(lx: &mut HistoryLexer) -> PResult<(ItemGroup, Span)> {
    let open_tok = expect(lx, "'open'", |k| matches!(k, TokenKind::Open))?;
    let (path, path_span) = parse_module_path(lx)?;
    let span = Span::new(open_tok.span.start, path_span.end);

    Ok((
        ItemGroup {
            rec_flag: false,
            items: vec![Item::Open { path, span }],
        },
        span,
    ))
}

/// Top-level `module` item: either the beginning of a streamed structure or
/// a complete alias definition.
fn parse_module_item(lx: &mut HistoryLexer) -> PResult<Parse> {
    let module_tok = expect(lx, "'module'", |k| matches!(k, TokenKind::Module))?;
    let start = module_tok.span.start;
    let name_tok = expect(lx, "a module name", |k| matches!(k, TokenKind::UIdent(_)))?;
    let TokenKind::UIdent(name) = &name_tok.kind else {
        unreachable!()
    };

    // a signature constraint is parsed and stripped
    if eat(lx, |k| matches!(k, TokenKind::Colon))?.is_some() {
        parse_module_path(lx)?;
    }
    expect(lx, "'='", |k| matches!(k, TokenKind::Eq))?;

    if eat(lx, |k| matches!(k, TokenKind::Struct))?.is_some() {
        return Ok(Parse::Enter {
            name: name.clone(),
            start,
        });
    }

    let (path, path_span) = parse_module_path(lx)?;
    let span = Span::new(start, path_span.end);
    Ok(Parse::Group {
        group: ItemGroup {
            rec_flag: false,
            items: vec![Item::Module {
                name: name.clone(),
                expr: ModExpr::Path(path),
                span,
            }],
        },
        start,
    })
}

/// A module expression in a nested position (`let module … in …`).
fn parse_mod_expr(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<ModExpr> {
    if eat(lx, |k| matches!(k, TokenKind::Struct))?.is_some() {
        let groups = parse_struct_body(lx, counters, depth)?;
        return Ok(ModExpr::Struct(groups));
    }
    let (path, _) = parse_module_path(lx)?;
    Ok(ModExpr::Path(path))
}

/// Items of an inline structure, after its `struct`, up to and including
/// the closing `end`. No chunks are emitted while this runs.
fn parse_struct_body(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<Vec<ItemGroup>> {
    let depth = guard(depth, lx.last_end())?;

    counters.nesting += 1;
    let result = parse_struct_items(lx, counters, depth);
    counters.nesting -= 1;
    result
}

fn parse_struct_items(
    lx: &mut HistoryLexer,
    counters: &mut Counters,
    depth: usize,
) -> PResult<Vec<ItemGroup>> {
    let mut groups = vec![];
    loop {
        let Some(token) = peek(lx)? else {
            return Err(ParseFail::Eof {
                start: lx.last_end(),
            });
        };

        match token.kind {
            TokenKind::DoubleSemicolon => {
                next(lx)?;
            }
            TokenKind::End => {
                next(lx)?;
                return Ok(groups);
            }
            TokenKind::Let => groups.push(parse_let_group(lx, counters, depth)?.0),
            TokenKind::Type => groups.push(parse_type_group(lx, counters, depth)?.0),
            TokenKind::Exception => groups.push(parse_exception(lx, depth)?.0),
            TokenKind::Class => groups.push(parse_class(lx)?.0),
            TokenKind::Open => groups.push(parse_open(lx)?.0),
            TokenKind::Module => {
                let module_tok = expect(lx, "'module'", |k| matches!(k, TokenKind::Module))?;
                let name_tok =
                    expect(lx, "a module name", |k| matches!(k, TokenKind::UIdent(_)))?;
                let TokenKind::UIdent(name) = &name_tok.kind else {
                    unreachable!()
                };
                if eat(lx, |k| matches!(k, TokenKind::Colon))?.is_some() {
                    parse_module_path(lx)?;
                }
                expect(lx, "'='", |k| matches!(k, TokenKind::Eq))?;
                let expr = parse_mod_expr(lx, counters, depth)?;
                let span = Span::new(module_tok.span.start, lx.last_end());
                groups.push(ItemGroup {
                    rec_flag: false,
                    items: vec![Item::Module {
                        name: name.clone(),
                        expr,
                        span,
                    }],
                });
            }
            _ => return Err(unexpected(&token, "a definition or 'end'")),
        }
    }
}
