use serde::{Deserialize, Serialize};

use crate::chunker::ast::Longident;
use crate::history::History;
use crate::lexer::Span;
use crate::typechecker::{initial_env, Env, TypedExprKind, TypedItem, TyperState};

use super::{walk_idents, walk_items, Loc};

/// A single replacement the editor applies to the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edit {
    pub start: Loc,
    pub end: Loc,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAction {
    Qualify,
    Unqualify,
}

/// Rewrite identifier paths in the scope of the `open` nearest at or
/// before `offset`.
///
/// `unqualify` drops the opened prefix from qualified paths whose
/// resolution does not change without it; the replacement covers the whole
/// identifier range and its content is the remaining path printed with
/// dots, even when the identifier spans several lines. `qualify` is the
/// dual: names that resolve through the open gain its prefix.
pub fn refactor_open(
    typer: &History<TyperState>,
    offset: usize,
    action: OpenAction,
) -> Vec<Edit> {
    let Some(current) = typer.prev() else {
        return vec![];
    };

    let Some((opened, open_span)) = select_open(current, offset) else {
        return vec![];
    };

    let mut edits = vec![];
    for index in 0..typer.offset() {
        let Some(state) = typer.nth_past(index) else {
            continue;
        };
        let prev_env = match index {
            0 => initial_env(),
            _ => typer
                .nth_past(index - 1)
                .map(|state| &state.env)
                .unwrap_or_else(|| initial_env()),
        };

        for tree in &state.added {
            // module trees re-wrap items that already had their own chunk
            let TypedItem::Value { body, .. } = tree.as_ref() else {
                continue;
            };
            walk_idents(body, &mut |ident| {
                let TypedExprKind::Ident { path, resolution } = &ident.kind else {
                    return;
                };
                if ident.span.start.offset <= open_span.end.offset {
                    return;
                }
                if let Some(edit) =
                    rewrite(prev_env, &opened, path, resolution.as_ref(), ident.span, action)
                {
                    edits.push(edit);
                }
            });
        }
    }

    edits.sort_by_key(|edit| (edit.start.line, edit.start.col));
    edits
}

/// The last `open` item starting at or before `offset`.
fn select_open(state: &TyperState, offset: usize) -> Option<(Longident, Span)> {
    let mut selected: Option<(Longident, Span)> = None;
    walk_items(&state.trees, &mut |item| {
        if let TypedItem::Open { path, span } = item {
            if span.start.offset <= offset {
                let better = match &selected {
                    Some((_, previous)) => span.start.offset > previous.start.offset,
                    None => true,
                };
                if better {
                    selected = Some((path.clone(), *span));
                }
            }
        }
    });
    selected
}

fn rewrite(
    env: &Env,
    opened: &Longident,
    path: &Longident,
    resolution: Option<&crate::typechecker::Origin>,
    span: Span,
    action: OpenAction,
) -> Option<Edit> {
    match action {
        OpenAction::Unqualify => {
            if !path.starts_with(opened) {
                return None;
            }
            let stripped = path.strip_prefix(opened);
            let (_, origin) = env.lookup_longident(&stripped)?;
            if Some(&origin) != resolution {
                return None;
            }
            Some(Edit {
                start: span.start.into(),
                end: span.end.into(),
                content: stripped.to_string(),
            })
        }
        OpenAction::Qualify => {
            if path.starts_with(opened) {
                return None;
            }
            let qualified = Longident(
                opened
                    .0
                    .iter()
                    .chain(path.0.iter())
                    .cloned()
                    .collect::<Vec<_>>(),
            );
            let (_, origin) = env.lookup_longident(&qualified)?;
            if Some(&origin) != resolution {
                return None;
            }
            Some(Edit {
                start: span.start.into(),
                end: span.end.into(),
                content: qualified.to_string(),
            })
        }
    }
}
