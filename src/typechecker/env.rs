//! The persistent typing environment.
//!
//! Every typer-history entry holds an [`Env`]; extending one is a single
//! allocation that shares the whole parent chain, so a hundred chunks cost
//! a hundred nodes, not a hundred copies of the map.

use std::sync::Arc;

use crate::chunker::ast::Longident;

use super::types::{Origin, SigItem, Type, TypeInfo};

#[derive(Debug, Clone)]
pub enum Binding {
    Value {
        name: String,
        ty: Type,
        origin: Origin,
    },
    TypeDef {
        name: String,
        decl: TypeInfo,
        origin: Origin,
    },
    Exception {
        name: String,
        arg: Option<Type>,
        origin: Origin,
    },
    Class {
        name: String,
        origin: Origin,
    },
    Module {
        name: String,
        sig: Arc<Vec<SigItem>>,
        origin: Origin,
    },
    /// Everything in `sig` becomes reachable unqualified.
    Open {
        path: Longident,
        sig: Arc<Vec<SigItem>>,
    },
}

#[derive(Debug)]
struct Node {
    parent: Option<Arc<Node>>,
    binding: Binding,
}

#[derive(Debug, Clone, Default)]
pub struct Env {
    node: Option<Arc<Node>>,
}

impl Env {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn extend(&self, binding: Binding) -> Env {
        Env {
            node: Some(Arc::new(Node {
                parent: self.node.clone(),
                binding,
            })),
        }
    }

    /// Innermost-first walk over all bindings in scope.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        let mut cursor = self.node.as_deref();
        std::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.parent.as_deref();
            Some(&node.binding)
        })
    }

    pub fn lookup_value(&self, wanted: &str) -> Option<(Type, Origin)> {
        for binding in self.bindings() {
            match binding {
                Binding::Value { name, ty, origin } if name == wanted => {
                    return Some((ty.clone(), *origin))
                }
                Binding::Open { sig, .. } => {
                    if let Some(found) = sig_value(sig, wanted) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Resolve a possibly qualified value path.
    pub fn lookup_longident(&self, path: &Longident) -> Option<(Type, Origin)> {
        if !path.is_qualified() {
            return self.lookup_value(path.name());
        }
        let sig = self.lookup_module_path(&path.0[..path.0.len() - 1])?;
        sig_value(&sig, path.name())
    }

    /// Resolve a module path to its signature.
    pub fn lookup_module_path(&self, segments: &[String]) -> Option<Arc<Vec<SigItem>>> {
        let (first, rest) = segments.split_first()?;

        let mut sig = self.lookup_module(first)?;
        for segment in rest {
            sig = sig_module(&sig, segment)?;
        }
        Some(sig)
    }

    fn lookup_module(&self, wanted: &str) -> Option<Arc<Vec<SigItem>>> {
        for binding in self.bindings() {
            match binding {
                Binding::Module { name, sig, .. } if name == wanted => return Some(sig.clone()),
                Binding::Open { sig, .. } => {
                    if let Some(found) = sig_module(sig, wanted) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }

    pub fn lookup_type(&self, path: &Longident) -> Option<TypeInfo> {
        if path.is_qualified() {
            let sig = self.lookup_module_path(&path.0[..path.0.len() - 1])?;
            return sig.iter().find_map(|item| match item {
                SigItem::TypeDef { name, decl, .. } if name == path.name() => Some(decl.clone()),
                _ => None,
            });
        }

        for binding in self.bindings() {
            match binding {
                Binding::TypeDef { name, decl, .. } if name == path.name() => {
                    return Some(decl.clone())
                }
                Binding::Open { sig, .. } => {
                    let found = sig.iter().find_map(|item| match item {
                        SigItem::TypeDef { name, decl, .. } if name == path.name() => {
                            Some(decl.clone())
                        }
                        _ => None,
                    });
                    if found.is_some() {
                        return found;
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn sig_value(sig: &[SigItem], wanted: &str) -> Option<(Type, Origin)> {
    sig.iter().find_map(|item| match item {
        SigItem::Value { name, ty, origin } if name == wanted => Some((ty.clone(), *origin)),
        _ => None,
    })
}

fn sig_module(sig: &[SigItem], wanted: &str) -> Option<Arc<Vec<SigItem>>> {
    sig.iter().find_map(|item| match item {
        SigItem::Module { name, sig, .. } if name == wanted => Some(sig.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Position;

    fn def(offset: usize) -> Origin {
        Origin::Def(Position {
            line: 1,
            col: offset,
            offset,
        })
    }

    #[test]
    fn test_shadowing_is_innermost_first() {
        let env = Env::empty()
            .extend(Binding::Value {
                name: "x".into(),
                ty: Type::Int,
                origin: def(0),
            })
            .extend(Binding::Value {
                name: "x".into(),
                ty: Type::Bool,
                origin: def(10),
            });

        assert_eq!(env.lookup_value("x"), Some((Type::Bool, def(10))));
    }

    #[test]
    fn test_extension_shares_parent() {
        let base = Env::empty().extend(Binding::Value {
            name: "x".into(),
            ty: Type::Int,
            origin: def(0),
        });
        let extended = base.extend(Binding::Value {
            name: "y".into(),
            ty: Type::Bool,
            origin: def(5),
        });

        // the original is not affected by the extension
        assert!(base.lookup_value("y").is_none());
        assert!(extended.lookup_value("x").is_some());
    }

    #[test]
    fn test_open_brings_members_into_scope() {
        let sig = Arc::new(vec![SigItem::Value {
            name: "u".into(),
            ty: Type::Unit,
            origin: def(20),
        }]);
        let env = Env::empty()
            .extend(Binding::Module {
                name: "M".into(),
                sig: sig.clone(),
                origin: def(0),
            })
            .extend(Binding::Open {
                path: Longident::simple("M"),
                sig,
            });

        assert_eq!(env.lookup_value("u"), Some((Type::Unit, def(20))));
        assert_eq!(
            env.lookup_longident(&Longident(vec!["M".into(), "u".into()])),
            Some((Type::Unit, def(20)))
        );
    }

    #[test]
    fn test_nested_module_path() {
        let inner = Arc::new(vec![SigItem::Value {
            name: "u".into(),
            ty: Type::Unit,
            origin: def(30),
        }]);
        let outer = Arc::new(vec![SigItem::Module {
            name: "N".into(),
            sig: inner,
            origin: def(10),
        }]);
        let env = Env::empty().extend(Binding::Module {
            name: "M".into(),
            sig: outer,
            origin: def(0),
        });

        let path = Longident(vec!["M".into(), "N".into(), "u".into()]);
        assert_eq!(env.lookup_longident(&path), Some((Type::Unit, def(30))));
    }
}
