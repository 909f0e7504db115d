//! Typed trees, the query-facing result of checking a chunk.

use std::sync::Arc;

use crate::chunker::ast::Longident;
use crate::lexer::Span;

use super::types::{Origin, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub ty: Type,
    pub span: Span,
    pub kind: TypedExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Lit,
    Ident {
        path: Longident,
        /// Definition site of what the path resolved to.
        resolution: Option<Origin>,
    },
    Tuple(Vec<TypedExpr>),
    App {
        func: Box<TypedExpr>,
        args: Vec<TypedExpr>,
    },
    Fun {
        params: Vec<TypedParam>,
        body: Box<TypedExpr>,
    },
    If {
        condition: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Option<Box<TypedExpr>>,
    },
    LetIn {
        bindings: Vec<TypedLetBinding>,
        body: Box<TypedExpr>,
    },
    LetModuleIn {
        name: String,
        body: Box<TypedExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedParam {
    pub name: Option<String>,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedLetBinding {
    pub name: Option<String>,
    pub name_span: Span,
    pub expr: TypedExpr,
}

impl TypedExpr {
    /// Immediate subexpressions, for span-directed walks.
    pub fn children(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            TypedExprKind::Lit | TypedExprKind::Ident { .. } => vec![],
            TypedExprKind::Tuple(elements) => elements.iter().collect(),
            TypedExprKind::App { func, args } => {
                let mut all = vec![func.as_ref()];
                all.extend(args.iter());
                all
            }
            TypedExprKind::Fun { body, .. } => vec![body.as_ref()],
            TypedExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut all = vec![condition.as_ref(), then_branch.as_ref()];
                if let Some(else_branch) = else_branch {
                    all.push(else_branch.as_ref());
                }
                all
            }
            TypedExprKind::LetIn { bindings, body } => {
                let mut all = bindings.iter().map(|b| &b.expr).collect::<Vec<_>>();
                all.push(body.as_ref());
                all
            }
            TypedExprKind::LetModuleIn { body, .. } => vec![body.as_ref()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedItem {
    Value {
        name: Option<String>,
        name_span: Span,
        span: Span,
        ty: Type,
        body: TypedExpr,
    },
    Type {
        name: String,
        span: Span,
        labels: Vec<(String, Type, Span)>,
    },
    Exception {
        name: String,
        span: Span,
        arg: Option<Type>,
    },
    Class {
        name: String,
        span: Span,
    },
    Module {
        name: String,
        span: Span,
        items: Vec<Arc<TypedItem>>,
    },
    Open {
        path: Longident,
        span: Span,
    },
}

impl TypedItem {
    pub fn span(&self) -> Span {
        match self {
            TypedItem::Value { span, .. }
            | TypedItem::Type { span, .. }
            | TypedItem::Exception { span, .. }
            | TypedItem::Class { span, .. }
            | TypedItem::Module { span, .. }
            | TypedItem::Open { span, .. } => *span,
        }
    }
}
