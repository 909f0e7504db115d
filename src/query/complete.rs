use std::collections::HashSet;

use serde::Serialize;

use crate::typechecker::{Binding, Env, SigItem, TyperState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEntry {
    pub name: String,
    pub kind: &'static str,
    pub desc: String,
}

/// Names reachable at the cursor that start with `prefix`.
///
/// A qualified prefix (`M.N.pre`) lists the matching members of the module
/// it names; an unqualified one walks the environment chain, innermost
/// binding first, shadowed names reported once.
pub fn complete_prefix(state: &TyperState, prefix: &str) -> Vec<CompletionEntry> {
    match prefix.rsplit_once('.') {
        Some((module_path, partial)) => {
            let segments = module_path
                .split('.')
                .map(str::to_string)
                .collect::<Vec<_>>();
            let Some(sig) = state.env.lookup_module_path(&segments) else {
                return vec![];
            };
            sig.iter()
                .filter(|item| item.name().starts_with(partial))
                .map(|item| sig_entry(&state.env, item))
                .collect()
        }
        None => env_completions(&state.env, prefix),
    }
}

fn env_completions(env: &Env, partial: &str) -> Vec<CompletionEntry> {
    let mut seen = HashSet::new();
    let mut entries = vec![];

    for binding in env.bindings() {
        match binding {
            Binding::Value { name, ty, .. } => {
                if name.starts_with(partial) && seen.insert(name.clone()) {
                    entries.push(CompletionEntry {
                        name: name.clone(),
                        kind: "Value",
                        desc: ty.print(env),
                    });
                }
            }
            Binding::TypeDef { name, .. } => {
                if name.starts_with(partial) && seen.insert(name.clone()) {
                    entries.push(CompletionEntry {
                        name: name.clone(),
                        kind: "Type",
                        desc: String::new(),
                    });
                }
            }
            Binding::Exception { name, .. } => {
                if name.starts_with(partial) && seen.insert(name.clone()) {
                    entries.push(CompletionEntry {
                        name: name.clone(),
                        kind: "Exception",
                        desc: String::new(),
                    });
                }
            }
            Binding::Class { name, .. } => {
                if name.starts_with(partial) && seen.insert(name.clone()) {
                    entries.push(CompletionEntry {
                        name: name.clone(),
                        kind: "Class",
                        desc: String::new(),
                    });
                }
            }
            Binding::Module { name, .. } => {
                if name.starts_with(partial) && seen.insert(name.clone()) {
                    entries.push(CompletionEntry {
                        name: name.clone(),
                        kind: "Module",
                        desc: String::new(),
                    });
                }
            }
            Binding::Open { sig, .. } => {
                for item in sig.iter() {
                    if item.name().starts_with(partial) && seen.insert(item.name().to_string()) {
                        entries.push(sig_entry(env, item));
                    }
                }
            }
        }
    }

    entries
}

fn sig_entry(env: &Env, item: &SigItem) -> CompletionEntry {
    match item {
        SigItem::Value { name, ty, .. } => CompletionEntry {
            name: name.clone(),
            kind: "Value",
            desc: ty.print(env),
        },
        SigItem::TypeDef { name, .. } => CompletionEntry {
            name: name.clone(),
            kind: "Type",
            desc: String::new(),
        },
        SigItem::Exception { name, .. } => CompletionEntry {
            name: name.clone(),
            kind: "Exception",
            desc: String::new(),
        },
        SigItem::Class { name, .. } => CompletionEntry {
            name: name.clone(),
            kind: "Class",
            desc: String::new(),
        },
        SigItem::Module { name, .. } => CompletionEntry {
            name: name.clone(),
            kind: "Module",
            desc: String::new(),
        },
    }
}
