use serde::Serialize;

use crate::typechecker::{Env, TypedItem, TyperState};

use super::Loc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutlineKind {
    Value,
    Type,
    Class,
    Exception,
    Label,
    Module,
}

/// One entry of the navigation tree an editor renders from the buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineItem {
    pub name: String,
    pub kind: OutlineKind,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_repr: Option<String>,
    pub start: Loc,
    pub end: Loc,
    pub children: Vec<OutlineItem>,
}

/// Project the state's typed trees into outline entries.
pub fn outline(state: &TyperState) -> Vec<OutlineItem> {
    state
        .trees
        .iter()
        .filter_map(|tree| item_outline(tree, &state.env))
        .collect()
}

fn item_outline(item: &TypedItem, env: &Env) -> Option<OutlineItem> {
    match item {
        TypedItem::Value {
            name: Some(name),
            name_span,
            span,
            ty,
            ..
        } => Some(OutlineItem {
            name: name.clone(),
            kind: OutlineKind::Value,
            type_repr: Some(ty.print(env)),
            start: name_span.start.into(),
            end: span.end.into(),
            children: vec![],
        }),
        // wildcard bindings have nothing to navigate to
        TypedItem::Value { name: None, .. } => None,
        TypedItem::Type { name, span, labels } => Some(OutlineItem {
            name: name.clone(),
            kind: OutlineKind::Type,
            type_repr: None,
            start: span.start.into(),
            end: span.end.into(),
            children: labels
                .iter()
                .map(|(label, ty, label_span)| OutlineItem {
                    name: label.clone(),
                    kind: OutlineKind::Label,
                    type_repr: Some(ty.print(env)),
                    start: label_span.start.into(),
                    end: label_span.end.into(),
                    children: vec![],
                })
                .collect(),
        }),
        TypedItem::Exception { name, span, arg } => Some(OutlineItem {
            name: name.clone(),
            kind: OutlineKind::Exception,
            type_repr: arg.as_ref().map(|ty| ty.print(env)),
            start: span.start.into(),
            end: span.end.into(),
            children: vec![],
        }),
        TypedItem::Class { name, span } => Some(OutlineItem {
            name: name.clone(),
            kind: OutlineKind::Class,
            type_repr: None,
            start: span.start.into(),
            end: span.end.into(),
            children: vec![],
        }),
        TypedItem::Module { name, span, items } => Some(OutlineItem {
            name: name.clone(),
            kind: OutlineKind::Module,
            type_repr: None,
            start: span.start.into(),
            end: span.end.into(),
            children: items
                .iter()
                .filter_map(|item| item_outline(item, env))
                .collect(),
        }),
        TypedItem::Open { .. } => None,
    }
}
