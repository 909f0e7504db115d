//! The incremental typer.
//!
//! For every chunk the typer records the environment, the accumulated typed
//! trees and the diagnostic list that hold *after* applying that chunk. When
//! the chunk history changes, [`sync`] rewinds to the deepest still-valid
//! state and re-types only the suffix; everything to the left is reused
//! untouched, which [`type_structure_count`] makes observable.

mod env;
mod error;
mod infer;
mod typed;
mod types;

pub use env::{Binding, Env};
pub use error::*;
pub use typed::*;
pub use types::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;

use crate::chunker::ast::{Expr, ExprKind, Item, ItemGroup, Longident, ModExpr, TypeBody};
use crate::chunker::{Chunk, ChunkKind};
use crate::history::{rewind, History, Sync};
use crate::lexer::Span;

use self::infer::{annotation_type, canonical_type, finalize, infer_binding_body, Infer};

/// State after applying one chunk.
///
/// `trees` and `sigs` are cumulative with closed modules collapsed: while
/// a module is open its members sit at the tail, and the matching
/// `LeaveModule` replaces that tail with a single module entry. A module
/// opening therefore marks a prefix, which is all the bookkeeping the
/// closing needs.
#[derive(Debug, Clone)]
pub struct TyperState {
    pub env: Env,
    /// All typed trees visible at this point, outline order.
    pub trees: Vec<Arc<TypedItem>>,
    /// Trees contributed by this chunk alone.
    pub added: Vec<Arc<TypedItem>>,
    /// Signature items visible at this point.
    pub sigs: Vec<SigItem>,
    /// All diagnostics up to this point.
    pub diagnostics: Vec<Diagnostic>,
    pub sync: Sync<Chunk>,
}

static INITIAL_ENV: Lazy<Env> = Lazy::new(|| {
    let sig = Arc::new(prelude_sig());
    Env::empty()
        .extend(Binding::Module {
            name: "Prelude".to_string(),
            sig: sig.clone(),
            origin: Origin::Prelude,
        })
        .extend(Binding::Open {
            path: Longident::simple("Prelude"),
            sig,
        })
});

/// The memoized environment every buffer starts from: the prelude module,
/// opened against the empty environment.
pub fn initial_env() -> &'static Env {
    &INITIAL_ENV
}

fn prelude_sig() -> Vec<SigItem> {
    let value = |name: &str, ty: Type| SigItem::Value {
        name: name.to_string(),
        ty,
        origin: Origin::Prelude,
    };

    vec![
        value("print_string", Type::arrow(Type::Str, Type::Unit)),
        value("print_endline", Type::arrow(Type::Str, Type::Unit)),
        value("print_int", Type::arrow(Type::Int, Type::Unit)),
        value("not", Type::arrow(Type::Bool, Type::Bool)),
        value("succ", Type::arrow(Type::Int, Type::Int)),
        value("pred", Type::arrow(Type::Int, Type::Int)),
        value("string_length", Type::arrow(Type::Str, Type::Int)),
        value("string_of_int", Type::arrow(Type::Int, Type::Str)),
        value("int_of_string", Type::arrow(Type::Str, Type::Int)),
        value("failwith", Type::arrow(Type::Str, Type::Unit)),
    ]
}

static TYPE_STRUCTURE_CALLS: AtomicU64 = AtomicU64::new(0);

/// Process-wide count of [`type_structure`] invocations; lets callers (and
/// the incrementality tests) observe how much work a sync actually did.
pub fn type_structure_count() -> u64 {
    TYPE_STRUCTURE_CALLS.load(Ordering::Relaxed)
}

/// Type one top-level item against `env`.
///
/// Pure with respect to the environment: the result shares `env` as its
/// parent instead of modifying it.
pub fn type_structure(env: &Env, item: &Item) -> TResult<(Arc<TypedItem>, Vec<SigItem>, Env)> {
    TYPE_STRUCTURE_CALLS.fetch_add(1, Ordering::Relaxed);

    match item {
        Item::Binding(binding) => {
            let mut inf = Infer::new();
            let body = infer_binding_body(env, &mut inf, binding)?;
            let (ty, body) = finalize(&inf, body.ty.clone(), body);

            let tree = Arc::new(TypedItem::Value {
                name: binding.name.clone(),
                name_span: binding.name_span,
                span: binding.span,
                ty: ty.clone(),
                body,
            });

            match &binding.name {
                Some(name) => {
                    let origin = Origin::Def(binding.name_span.start);
                    let next = env.extend(Binding::Value {
                        name: name.clone(),
                        ty: ty.clone(),
                        origin,
                    });
                    let sig = SigItem::Value {
                        name: name.clone(),
                        ty,
                        origin,
                    };
                    Ok((tree, vec![sig], next))
                }
                // a wildcard binds nothing
                None => Ok((tree, vec![], env.clone())),
            }
        }
        Item::TypeDecl(decl) => {
            let mut inf = Infer::new();
            let origin = Origin::Def(decl.span.start);

            let (info, labels) = match &decl.body {
                TypeBody::Abstract => (TypeInfo::Abstract, vec![]),
                TypeBody::Alias(alias) => {
                    let ty = annotation_type(env, &mut inf, alias)?;
                    (TypeInfo::Alias(canonical_type(&inf, &ty)), vec![])
                }
                TypeBody::Record(decls) => {
                    let mut fields = vec![];
                    let mut labels = vec![];
                    for label in decls {
                        let ty = annotation_type(env, &mut inf, &label.ty)?;
                        let ty = canonical_type(&inf, &ty);
                        fields.push((label.name.clone(), ty.clone()));
                        labels.push((label.name.clone(), ty, label.span));
                    }
                    (TypeInfo::Record(fields), labels)
                }
            };

            let tree = Arc::new(TypedItem::Type {
                name: decl.name.clone(),
                span: decl.span,
                labels,
            });
            let sig = SigItem::TypeDef {
                name: decl.name.clone(),
                decl: info.clone(),
                origin,
            };
            let next = env.extend(Binding::TypeDef {
                name: decl.name.clone(),
                decl: info,
                origin,
            });
            Ok((tree, vec![sig], next))
        }
        Item::Exception { name, arg, span } => {
            let mut inf = Infer::new();
            let arg = match arg {
                Some(annotation) => {
                    let ty = annotation_type(env, &mut inf, annotation)?;
                    Some(canonical_type(&inf, &ty))
                }
                None => None,
            };
            let origin = Origin::Def(span.start);

            let tree = Arc::new(TypedItem::Exception {
                name: name.clone(),
                span: *span,
                arg: arg.clone(),
            });
            let sig = SigItem::Exception {
                name: name.clone(),
                arg: arg.clone(),
                origin,
            };
            let next = env.extend(Binding::Exception {
                name: name.clone(),
                arg,
                origin,
            });
            Ok((tree, vec![sig], next))
        }
        Item::Class { name, span } => {
            let origin = Origin::Def(span.start);
            let tree = Arc::new(TypedItem::Class {
                name: name.clone(),
                span: *span,
            });
            let sig = SigItem::Class {
                name: name.clone(),
                origin,
            };
            let next = env.extend(Binding::Class {
                name: name.clone(),
                origin,
            });
            Ok((tree, vec![sig], next))
        }
        Item::Module { name, expr, span } => {
            let sig = match expr {
                ModExpr::Path(path) => {
                    env.lookup_module_path(&path.0).ok_or_else(|| TypeError {
                        message: format!("unbound module '{path}'"),
                        span: *span,
                    })?
                }
                ModExpr::Struct(groups) => type_inline_structure(env, groups)?,
            };
            let origin = Origin::Def(span.start);

            let tree = Arc::new(TypedItem::Module {
                name: name.clone(),
                span: *span,
                items: vec![],
            });
            let sig_item = SigItem::Module {
                name: name.clone(),
                sig: sig.clone(),
                origin,
            };
            let next = env.extend(Binding::Module {
                name: name.clone(),
                sig,
                origin,
            });
            Ok((tree, vec![sig_item], next))
        }
        Item::Open { path, span } => {
            let sig = env.lookup_module_path(&path.0).ok_or_else(|| TypeError {
                message: format!("unbound module '{path}'"),
                span: *span,
            })?;

            let tree = Arc::new(TypedItem::Open {
                path: path.clone(),
                span: *span,
            });
            let next = env.extend(Binding::Open {
                path: path.clone(),
                sig,
            });
            // an open contributes nothing to the enclosing signature
            Ok((tree, vec![], next))
        }
    }
}

/// Type the body of an inline `struct … end` and return its signature.
pub(crate) fn type_inline_structure(env: &Env, groups: &[ItemGroup]) -> TResult<Arc<Vec<SigItem>>> {
    let mut inner = env.clone();
    let mut sigs = vec![];

    for group in groups {
        for item in &group.items {
            let (_, item_sigs, next) = type_structure(&inner, item)?;
            sigs.extend(item_sigs);
            inner = next;
        }
    }

    Ok(Arc::new(sigs))
}

/// Re-align the typer history with the chunk history.
///
/// Rewinds both to their deepest common ancestor, discards the typer's
/// future and walks the chunk future forward, appending one state per
/// chunk. On return the two cursors agree and the typer history is exactly
/// as long as the chunk history.
pub fn sync(chunks: &mut History<Chunk>, typer: &mut History<TyperState>) {
    rewind(|state: &TyperState| state.sync, chunks, typer);
    typer.cutoff();

    let reused = typer.offset();
    while chunks.next().is_some() {
        chunks.forward();
        let chunk = chunks.prev().cloned().expect("chunk was just forwarded");
        let state = append_step(&chunk, chunks, typer);
        typer.insert(state);
    }
    debug!(
        "typer sync: {} states reused, {} recomputed",
        reused,
        typer.offset() - reused
    );
}

fn append_step(
    chunk: &Chunk,
    chunks: &History<Chunk>,
    typer: &History<TyperState>,
) -> TyperState {
    let (mut env, mut trees, mut sigs, mut diagnostics) = match typer.prev() {
        Some(state) => (
            state.env.clone(),
            state.trees.clone(),
            state.sigs.clone(),
            state.diagnostics.clone(),
        ),
        None => (initial_env().clone(), vec![], vec![], vec![]),
    };
    let mut added = vec![];

    match &chunk.kind {
        ChunkKind::Definition { group } => {
            let mut warnings = vec![];

            if group.rec_flag {
                env = prebind_recursive_group(&env, group);
                if !group_uses_bound_names(group) {
                    warnings.push(Warning {
                        message: "unused rec flag".to_string(),
                        span: chunk_group_span(chunk, group),
                    });
                }
            }

            for item in &group.items {
                match type_structure(&env, item) {
                    Ok((tree, item_sigs, next)) => {
                        added.push(tree.clone());
                        trees.push(tree);
                        sigs.extend(item_sigs);
                        env = next;
                    }
                    Err(error) => diagnostics.push(error.into()),
                }
            }

            diagnostics.extend(warnings.into_iter().map(Diagnostic::from));
        }
        ChunkKind::EnterModule { name } => {
            // the structure body types against the same environment; the
            // outer state is recovered from the history when `end` arrives
            debug!("entering module {name}");
        }
        ChunkKind::LeaveModule { name, back } => {
            // everything after the opening's prefix belongs to the module
            let (outer_trees, outer_sigs) = typer
                .nth_past(*back)
                .map(|opening| (opening.trees.clone(), opening.sigs.clone()))
                .unwrap_or_default();
            let members = trees.get(outer_trees.len()..).unwrap_or_default().to_vec();
            let member_sigs = sigs.get(outer_sigs.len()..).unwrap_or_default().to_vec();

            let outer_env = if *back == 0 {
                initial_env().clone()
            } else {
                typer
                    .nth_past(back - 1)
                    .map(|state| state.env.clone())
                    .unwrap_or_else(|| initial_env().clone())
            };

            let start = chunks
                .nth_past(*back)
                .map(|opening| opening.start)
                .unwrap_or(chunk.start);
            let span = Span::new(start, chunk.end);
            let origin = Origin::Def(start);

            let module_tree = Arc::new(TypedItem::Module {
                name: name.clone(),
                span,
                items: members,
            });
            let sig = Arc::new(member_sigs);

            trees = outer_trees;
            trees.push(module_tree.clone());
            sigs = outer_sigs;
            sigs.push(SigItem::Module {
                name: name.clone(),
                sig: sig.clone(),
                origin,
            });
            added = vec![module_tree];

            env = outer_env.extend(Binding::Module {
                name: name.clone(),
                sig,
                origin,
            });
        }
        ChunkKind::SyntaxError { error } => {
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::Syntax,
                message: error.message.clone(),
                span: error.span,
            });
        }
        ChunkKind::Exception { message } => {
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::Exception,
                message: message.clone(),
                span: Span::new(chunk.start, chunk.end),
            });
        }
        ChunkKind::Done | ChunkKind::Unterminated => {}
        ChunkKind::Rollback => unreachable!("rollback chunks are never stored"),
    }

    TyperState {
        env,
        trees,
        added,
        sigs,
        diagnostics,
        sync: Sync::at(chunks),
    }
}

/// Extend `env` with best-effort types for the names of a recursive group,
/// so the bodies can mention them.
fn prebind_recursive_group(env: &Env, group: &ItemGroup) -> Env {
    let mut extended = env.clone();
    for item in &group.items {
        let Item::Binding(binding) = item else {
            continue;
        };
        let Some(name) = &binding.name else { continue };

        let mut inf = Infer::new();
        match infer::recursive_approximation(env, &mut inf, binding) {
            Ok(Some(ty)) => {
                extended = extended.extend(Binding::Value {
                    name: name.clone(),
                    ty: canonical_type(&inf, &ty),
                    origin: Origin::Def(binding.name_span.start),
                });
            }
            _ => continue,
        }
    }
    extended
}

fn chunk_group_span(chunk: &Chunk, group: &ItemGroup) -> Span {
    group
        .items
        .first()
        .map(|item| item.span())
        .unwrap_or_else(|| Span::new(chunk.start, chunk.end))
}

fn group_uses_bound_names(group: &ItemGroup) -> bool {
    let names = group
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Binding(binding) => binding.name.clone(),
            _ => None,
        })
        .collect::<Vec<_>>();

    group.items.iter().any(|item| match item {
        Item::Binding(binding) => expr_mentions(&binding.body, &names),
        _ => false,
    })
}

fn expr_mentions(expr: &Expr, names: &[String]) -> bool {
    match &expr.kind {
        ExprKind::Ident(path) => names.iter().any(|name| path.0.first() == Some(name)),
        ExprKind::Unit | ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Str(_) => false,
        ExprKind::Tuple(elements) => elements.iter().any(|e| expr_mentions(e, names)),
        ExprKind::App { func, args } => {
            expr_mentions(func, names) || args.iter().any(|a| expr_mentions(a, names))
        }
        ExprKind::Fun { body, .. } => expr_mentions(body, names),
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            expr_mentions(condition, names)
                || expr_mentions(then_branch, names)
                || else_branch
                    .as_ref()
                    .map(|e| expr_mentions(e, names))
                    .unwrap_or(false)
        }
        ExprKind::LetIn { bindings, body, .. } => {
            bindings.iter().any(|b| expr_mentions(&b.body, names))
                || expr_mentions(body, names)
        }
        ExprKind::LetModuleIn { body, .. } => expr_mentions(body, names),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{self, Counters};
    use crate::lexer::Token;

    fn analyze(source: &str) -> (History<Chunk>, History<TyperState>) {
        let mut tokens: History<Token> = History::new();
        let mut chunks = History::new();
        let mut typer = History::new();
        let mut counters = Counters::default();
        chunker::sync(source, &mut tokens, &mut chunks, 0, &mut counters);
        sync(&mut chunks, &mut typer);
        (chunks, typer)
    }

    fn final_state(typer: &History<TyperState>) -> &TyperState {
        typer.prev().expect("typer history is never empty")
    }

    #[test]
    fn test_typer_length_matches_chunks() {
        let (chunks, typer) = analyze("let a = 1\nlet b = a\nlet c = succ b");
        assert_eq!(chunks.len(), typer.len());
        assert_eq!(chunks.offset(), typer.offset());
    }

    #[test]
    fn test_empty_buffer_keeps_initial_env() {
        let (chunks, typer) = analyze("");
        assert_eq!(chunks.len(), 1);
        let state = final_state(&typer);
        assert!(state.trees.is_empty());
        assert!(state.diagnostics.is_empty());
        assert!(state.env.lookup_value("print_endline").is_some());
    }

    #[test]
    fn test_simple_types() {
        let (_, typer) = analyze("let a = 1\nlet b = succ a\nlet s = string_of_int b");
        let state = final_state(&typer);
        assert!(state.diagnostics.is_empty());
        assert_eq!(state.env.lookup_value("a").map(|(ty, _)| ty), Some(Type::Int));
        assert_eq!(state.env.lookup_value("b").map(|(ty, _)| ty), Some(Type::Int));
        assert_eq!(state.env.lookup_value("s").map(|(ty, _)| ty), Some(Type::Str));
    }

    #[test]
    fn test_function_types() {
        let (_, typer) = analyze("let f (x : int) = succ x");
        let state = final_state(&typer);
        assert_eq!(
            state.env.lookup_value("f").map(|(ty, _)| ty),
            Some(Type::arrow(Type::Int, Type::Int))
        );
    }

    #[test]
    fn test_error_locality() {
        let (_, typer) = analyze("let a = 1\nlet b = missing\nlet c = succ a");
        let state = final_state(&typer);
        // exactly one failure, reported once
        assert_eq!(state.diagnostics.len(), 1);
        assert!(state.diagnostics[0].message.contains("missing"));
        // the failing chunk did not poison the suffix
        assert_eq!(state.env.lookup_value("c").map(|(ty, _)| ty), Some(Type::Int));
        assert!(state.env.lookup_value("b").is_none());
    }

    #[test]
    fn test_module_scoping() {
        let (_, typer) = analyze("module M = struct\nlet u = ()\nend\nlet v = M.u");
        let state = final_state(&typer);
        assert!(state.diagnostics.is_empty());
        // the member is not in scope unqualified
        assert!(state.env.lookup_value("u").is_none());
        assert_eq!(state.env.lookup_value("v").map(|(ty, _)| ty), Some(Type::Unit));
        // the module tree nests its items
        let module = state
            .trees
            .iter()
            .find_map(|tree| match tree.as_ref() {
                TypedItem::Module { name, items, .. } if name == "M" => Some(items.len()),
                _ => None,
            })
            .expect("module tree");
        assert_eq!(module, 1);
    }

    #[test]
    fn test_open_brings_module_members_into_scope() {
        let (_, typer) = analyze("module M = struct\nlet u = ()\nend\nopen M\nlet v = u");
        let state = final_state(&typer);
        assert!(state.diagnostics.is_empty());
        assert_eq!(state.env.lookup_value("v").map(|(ty, _)| ty), Some(Type::Unit));
    }

    #[test]
    fn test_type_alias_in_annotation() {
        let (_, typer) = analyze("type t = int\nlet x : t = 1");
        let state = final_state(&typer);
        assert!(state.diagnostics.is_empty());
    }

    #[test]
    fn test_unused_rec_warning() {
        let (_, typer) = analyze("let rec a = 1");
        let state = final_state(&typer);
        assert_eq!(state.diagnostics.len(), 1);
        assert_eq!(state.diagnostics[0].kind, DiagnosticKind::Warning);
    }

    #[test]
    fn test_syntax_error_chunk_becomes_diagnostic() {
        let (chunks, typer) = analyze("let ! = 1\nlet a = 2");
        let state = final_state(&typer);
        assert_eq!(chunks.len(), typer.len());
        assert!(state
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Syntax));
        assert_eq!(state.env.lookup_value("a").map(|(ty, _)| ty), Some(Type::Int));
    }

    #[test]
    fn test_nested_modules() {
        let source = "module M = struct\nmodule N = struct\nlet u = ()\nend\nend\nlet v = M.N.u";
        let (_, typer) = analyze(source);
        let state = final_state(&typer);
        assert!(state.diagnostics.is_empty());
        assert_eq!(state.env.lookup_value("v").map(|(ty, _)| ty), Some(Type::Unit));
    }
}
