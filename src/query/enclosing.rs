use crate::typechecker::{Type, TypedExpr, TypedItem, TyperState};

/// The printed type of the innermost typed node enclosing `offset`.
pub fn type_at(state: &TyperState, offset: usize) -> Option<String> {
    let ty = state
        .trees
        .iter()
        .find_map(|tree| find_in_item(tree, offset))?;
    Some(ty.print(&state.env))
}

fn find_in_item(item: &TypedItem, offset: usize) -> Option<Type> {
    match item {
        TypedItem::Value {
            name_span,
            span,
            ty,
            body,
            ..
        } => {
            if !span.contains_offset(offset) {
                return None;
            }
            if let Some(found) = find_in_expr(body, offset) {
                return Some(found.ty.clone());
            }
            if name_span.contains_offset(offset) {
                return Some(ty.clone());
            }
            Some(ty.clone())
        }
        TypedItem::Module { span, items, .. } => {
            if !span.contains_offset(offset) {
                return None;
            }
            items.iter().find_map(|item| find_in_item(item, offset))
        }
        TypedItem::Exception { span, arg, .. } => {
            if span.contains_offset(offset) {
                arg.clone()
            } else {
                None
            }
        }
        TypedItem::Type { .. } | TypedItem::Class { .. } | TypedItem::Open { .. } => None,
    }
}

/// Innermost subexpression whose range encloses `offset`.
fn find_in_expr(expr: &TypedExpr, offset: usize) -> Option<&TypedExpr> {
    if !expr.span.contains_offset(offset) {
        return None;
    }
    for child in expr.children() {
        if let Some(found) = find_in_expr(child, offset) {
            return Some(found);
        }
    }
    Some(expr)
}
