//! Read-only projections of the current typer state.
//!
//! Every adapter takes the state (and, where needed, the typer history) by
//! reference and never mutates it; the answers are plain serializable
//! values ready for the protocol layer.

mod complete;
mod enclosing;
mod errors;
mod outline;
mod refactor;

pub use complete::*;
pub use enclosing::*;
pub use errors::*;
pub use outline::*;
pub use refactor::*;

use std::sync::Arc;

use serde::Serialize;

use crate::lexer::Position;
use crate::typechecker::{TypedExpr, TypedExprKind, TypedItem};

/// Editor-facing location: 1-indexed line, 0-indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl From<Position> for Loc {
    fn from(pos: Position) -> Self {
        Loc {
            line: pos.line,
            col: pos.col,
        }
    }
}

/// Depth-first walk over all items, module bodies included.
pub(crate) fn walk_items<'a>(
    items: &'a [Arc<TypedItem>],
    visit: &mut impl FnMut(&'a TypedItem),
) {
    for item in items {
        visit(item);
        if let TypedItem::Module { items, .. } = item.as_ref() {
            walk_items(items, visit);
        }
    }
}

/// All qualified-or-not identifier occurrences in an expression.
pub(crate) fn walk_idents<'a>(expr: &'a TypedExpr, visit: &mut impl FnMut(&'a TypedExpr)) {
    if matches!(expr.kind, TypedExprKind::Ident { .. }) {
        visit(expr);
    }
    for child in expr.children() {
        walk_idents(child, visit);
    }
}
