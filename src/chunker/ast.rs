//! Raw syntax produced by the chunk grammar, before typing.

use std::fmt::Display;

use crate::lexer::Span;

/// A possibly qualified identifier path, `M.N.u`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Longident(pub Vec<String>);

impl Longident {
    pub fn simple(name: impl ToString) -> Self {
        Longident(vec![name.to_string()])
    }

    pub fn is_qualified(&self) -> bool {
        self.0.len() > 1
    }

    /// The final segment.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn starts_with(&self, prefix: &Longident) -> bool {
        self.0.len() > prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// The path with `prefix` removed from the front.
    pub fn strip_prefix(&self, prefix: &Longident) -> Longident {
        Longident(self.0[prefix.0.len()..].to_vec())
    }
}

impl Display for Longident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
    Ident(Longident),
    Tuple(Vec<Expr>),
    App {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Fun {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    LetIn {
        rec_flag: bool,
        bindings: Vec<Binding>,
        body: Box<Expr>,
    },
    LetModuleIn {
        name: String,
        expr: ModExpr,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub annotation: Option<TypeExpr>,
    pub span: Span,
}

/// One `name = expr` of a `let` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// `None` for a wildcard pattern.
    pub name: Option<String>,
    pub name_span: Span,
    pub params: Vec<Param>,
    /// Declared type of the body, `let f x : t = …`.
    pub annotation: Option<TypeExpr>,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExprKind {
    Var(String),
    Name(Longident),
    Arrow(Box<TypeExpr>, Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeBody {
    Abstract,
    Alias(TypeExpr),
    Record(Vec<LabelDecl>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: TypeBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModExpr {
    /// An inline structure; only occurs nested (top-level structures
    /// stream through the chunk history instead).
    Struct(Vec<ItemGroup>),
    Path(Longident),
}

/// A top-level item as the typer consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Binding(Binding),
    TypeDecl(TypeDecl),
    Exception {
        name: String,
        arg: Option<TypeExpr>,
        span: Span,
    },
    Class {
        name: String,
        span: Span,
    },
    Module {
        name: String,
        expr: ModExpr,
        span: Span,
    },
    Open {
        path: Longident,
        span: Span,
    },
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Binding(binding) => binding.span,
            Item::TypeDecl(decl) => decl.span,
            Item::Exception { span, .. } => *span,
            Item::Class { span, .. } => *span,
            Item::Module { span, .. } => *span,
            Item::Open { span, .. } => *span,
        }
    }
}

/// An ordered sequence of items sharing one recursion flag; the payload of
/// a definition chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemGroup {
    pub rec_flag: bool,
    pub items: Vec<Item>,
}
