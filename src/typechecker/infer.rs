//! Local type synthesis for expressions.
//!
//! Inference is per-definition: a fresh [`Infer`] is created for every
//! top-level item, variables are solved by a small substitution, and the
//! survivors are renumbered deterministically before the result enters the
//! environment. Nothing mutable leaks into the persistent [`Env`].

use std::collections::HashMap;

use crate::chunker::ast::{Expr, ExprKind, ModExpr, Param, TypeExpr, TypeExprKind};
use crate::lexer::Span;

use super::env::{Binding, Env};
use super::error::{TResult, TypeError};
use super::typed::{TypedExpr, TypedExprKind, TypedLetBinding, TypedParam};
use super::types::{Origin, Type, TypeInfo};

#[derive(Debug, Default)]
pub(super) struct Infer {
    subst: Vec<Option<Type>>,
    named_vars: HashMap<String, usize>,
}

impl Infer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> Type {
        let index = self.subst.len();
        self.subst.push(None);
        Type::Var(index)
    }

    fn named_var(&mut self, name: &str) -> Type {
        if let Some(index) = self.named_vars.get(name) {
            return Type::Var(*index);
        }
        let Type::Var(index) = self.fresh() else {
            unreachable!()
        };
        self.named_vars.insert(name.to_string(), index);
        Type::Var(index)
    }

    /// Follow substitution links at the head of `ty`. Variables this
    /// inference never created (instantiated environment types keep them
    /// out, but stay safe) count as unbound.
    fn shallow(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        while let Type::Var(index) = current {
            match self.subst.get(index) {
                Some(Some(solution)) => current = solution.clone(),
                _ => return Type::Var(index),
            }
        }
        current
    }

    /// Replace every generalized variable of an environment type with a
    /// fresh live one; live variables (a parameter bound earlier in this
    /// same inference) pass through untouched.
    pub fn instantiate(&mut self, ty: &Type) -> Type {
        let mut mapping = HashMap::new();
        self.instantiate_inner(ty, &mut mapping)
    }

    fn instantiate_inner(&mut self, ty: &Type, mapping: &mut HashMap<usize, Type>) -> Type {
        match ty {
            Type::Gen(index) => mapping
                .entry(*index)
                .or_insert_with(|| self.fresh())
                .clone(),
            Type::Arrow(param, result) => Type::arrow(
                self.instantiate_inner(param, mapping),
                self.instantiate_inner(result, mapping),
            ),
            Type::Tuple(elements) => Type::Tuple(
                elements
                    .iter()
                    .map(|e| self.instantiate_inner(e, mapping))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn occurs(&self, index: usize, ty: &Type) -> bool {
        match self.shallow(ty) {
            Type::Var(other) => other == index,
            Type::Arrow(param, result) => {
                self.occurs(index, &param) || self.occurs(index, &result)
            }
            Type::Tuple(elements) => elements.iter().any(|e| self.occurs(index, e)),
            _ => false,
        }
    }

    pub fn unify(&mut self, env: &Env, a: &Type, b: &Type, span: Span) -> TResult<()> {
        let a = self.shallow(a);
        let b = self.shallow(b);

        match (&a, &b) {
            (Type::Var(i), Type::Var(j)) if i == j => Ok(()),
            (Type::Var(i), other) => {
                if self.occurs(*i, other) {
                    return Err(TypeError {
                        message: "this expression has a cyclic type".to_string(),
                        span,
                    });
                }
                self.subst[*i] = Some(other.clone());
                Ok(())
            }
            (_, Type::Var(_)) => self.unify(env, &b, &a, span),
            (Type::Unit, Type::Unit)
            | (Type::Int, Type::Int)
            | (Type::Bool, Type::Bool)
            | (Type::Str, Type::Str) => Ok(()),
            (Type::Gen(i), Type::Gen(j)) if i == j => Ok(()),
            (Type::Arrow(a1, a2), Type::Arrow(b1, b2)) => {
                self.unify(env, a1, b1, span)?;
                self.unify(env, a2, b2, span)
            }
            (Type::Tuple(xs), Type::Tuple(ys)) if xs.len() == ys.len() => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    self.unify(env, x, y, span)?;
                }
                Ok(())
            }
            (Type::Named(p), Type::Named(q)) if p == q => Ok(()),
            (Type::Named(p), _) => match env.lookup_type(p) {
                Some(TypeInfo::Alias(body)) => self.unify(env, &body, &b, span),
                _ => Err(self.mismatch(env, &a, &b, span)),
            },
            (_, Type::Named(q)) => match env.lookup_type(q) {
                Some(TypeInfo::Alias(body)) => self.unify(env, &a, &body, span),
                _ => Err(self.mismatch(env, &a, &b, span)),
            },
            _ => Err(self.mismatch(env, &a, &b, span)),
        }
    }

    fn mismatch(&self, env: &Env, got: &Type, expected: &Type, span: Span) -> TypeError {
        TypeError {
            message: format!(
                "this expression has type {} but was expected of type {}",
                self.substitute(got).print(env),
                self.substitute(expected).print(env)
            ),
            span,
        }
    }

    /// Apply the substitution all the way down.
    pub fn substitute(&self, ty: &Type) -> Type {
        match self.shallow(ty) {
            Type::Arrow(param, result) => {
                Type::arrow(self.substitute(&param), self.substitute(&result))
            }
            Type::Tuple(elements) => {
                Type::Tuple(elements.iter().map(|e| self.substitute(e)).collect())
            }
            other => other,
        }
    }
}

/// Convert a syntactic type to a checked one.
///
/// `inf` is consulted for type variables so that repeated `'a` within one
/// item denote the same variable.
pub(super) fn annotation_type(
    env: &Env,
    inf: &mut Infer,
    annotation: &TypeExpr,
) -> TResult<Type> {
    match &annotation.kind {
        TypeExprKind::Var(name) => Ok(inf.named_var(name)),
        TypeExprKind::Name(path) => {
            if !path.is_qualified() {
                match path.name() {
                    "unit" => return Ok(Type::Unit),
                    "int" => return Ok(Type::Int),
                    "bool" => return Ok(Type::Bool),
                    "string" => return Ok(Type::Str),
                    _ => {}
                }
            }
            if env.lookup_type(path).is_none() {
                return Err(TypeError {
                    message: format!("unbound type constructor '{path}'"),
                    span: annotation.span,
                });
            }
            Ok(Type::Named(path.clone()))
        }
        TypeExprKind::Arrow(param, result) => {
            let param = annotation_type(env, inf, param)?;
            let result = annotation_type(env, inf, result)?;
            Ok(Type::arrow(param, result))
        }
        TypeExprKind::Tuple(elements) => {
            let mut types = vec![];
            for element in elements {
                types.push(annotation_type(env, inf, element)?);
            }
            Ok(Type::Tuple(types))
        }
    }
}

pub(super) fn param_type(env: &Env, inf: &mut Infer, param: &Param) -> TResult<Type> {
    match &param.annotation {
        Some(annotation) => annotation_type(env, inf, annotation),
        None => Ok(inf.fresh()),
    }
}

pub(super) fn infer_expr(env: &Env, inf: &mut Infer, expr: &Expr) -> TResult<TypedExpr> {
    match &expr.kind {
        ExprKind::Unit => Ok(lit(Type::Unit, expr.span)),
        ExprKind::Int(_) => Ok(lit(Type::Int, expr.span)),
        ExprKind::Bool(_) => Ok(lit(Type::Bool, expr.span)),
        ExprKind::Str(_) => Ok(lit(Type::Str, expr.span)),
        ExprKind::Ident(path) => {
            let Some((ty, origin)) = env.lookup_longident(path) else {
                return Err(TypeError {
                    message: format!("unbound identifier '{path}'"),
                    span: expr.span,
                });
            };
            let ty = inf.instantiate(&ty);
            Ok(TypedExpr {
                ty,
                span: expr.span,
                kind: TypedExprKind::Ident {
                    path: path.clone(),
                    resolution: Some(origin),
                },
            })
        }
        ExprKind::Tuple(elements) => {
            let mut typed = vec![];
            for element in elements {
                typed.push(infer_expr(env, inf, element)?);
            }
            let ty = Type::Tuple(typed.iter().map(|e| e.ty.clone()).collect());
            Ok(TypedExpr {
                ty,
                span: expr.span,
                kind: TypedExprKind::Tuple(typed),
            })
        }
        ExprKind::App { func, args } => {
            let func = infer_expr(env, inf, func)?;
            let mut result = func.ty.clone();
            let mut typed_args = vec![];
            for arg in args {
                let typed = infer_expr(env, inf, arg)?;
                let out = inf.fresh();
                inf.unify(
                    env,
                    &result,
                    &Type::arrow(typed.ty.clone(), out.clone()),
                    arg.span,
                )?;
                result = out;
                typed_args.push(typed);
            }
            Ok(TypedExpr {
                ty: result,
                span: expr.span,
                kind: TypedExprKind::App {
                    func: Box::new(func),
                    args: typed_args,
                },
            })
        }
        ExprKind::Fun { params, body } => {
            let mut scope = env.clone();
            let mut typed_params = vec![];
            for param in params {
                let ty = param_type(env, inf, param)?;
                if let Some(name) = &param.name {
                    scope = scope.extend(Binding::Value {
                        name: name.clone(),
                        ty: ty.clone(),
                        origin: Origin::Def(param.span.start),
                    });
                }
                typed_params.push(TypedParam {
                    name: param.name.clone(),
                    ty,
                    span: param.span,
                });
            }

            let body = infer_expr(&scope, inf, body)?;
            let ty = typed_params
                .iter()
                .rev()
                .fold(body.ty.clone(), |acc, param| {
                    Type::arrow(param.ty.clone(), acc)
                });

            Ok(TypedExpr {
                ty,
                span: expr.span,
                kind: TypedExprKind::Fun {
                    params: typed_params,
                    body: Box::new(body),
                },
            })
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let condition = infer_expr(env, inf, condition)?;
            inf.unify(env, &condition.ty, &Type::Bool, condition.span)?;

            let then_branch = infer_expr(env, inf, then_branch)?;
            let (ty, else_branch) = match else_branch {
                Some(else_expr) => {
                    let else_branch = infer_expr(env, inf, else_expr)?;
                    inf.unify(env, &then_branch.ty, &else_branch.ty, else_branch.span)?;
                    (then_branch.ty.clone(), Some(Box::new(else_branch)))
                }
                None => {
                    inf.unify(env, &then_branch.ty, &Type::Unit, then_branch.span)?;
                    (Type::Unit, None)
                }
            };

            Ok(TypedExpr {
                ty,
                span: expr.span,
                kind: TypedExprKind::If {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch,
                },
            })
        }
        ExprKind::LetIn {
            rec_flag,
            bindings,
            body,
        } => {
            let mut scope = env.clone();

            if *rec_flag {
                for binding in bindings {
                    if let (Some(name), Some(ty)) =
                        (&binding.name, recursive_approximation(env, inf, binding)?)
                    {
                        scope = scope.extend(Binding::Value {
                            name: name.clone(),
                            ty,
                            origin: Origin::Def(binding.name_span.start),
                        });
                    }
                }
            }

            let mut typed_bindings = vec![];
            for binding in bindings {
                let typed = infer_binding_body(&scope, inf, binding)?;
                if let Some(name) = &binding.name {
                    scope = scope.extend(Binding::Value {
                        name: name.clone(),
                        ty: typed.ty.clone(),
                        origin: Origin::Def(binding.name_span.start),
                    });
                }
                typed_bindings.push(TypedLetBinding {
                    name: binding.name.clone(),
                    name_span: binding.name_span,
                    expr: typed,
                });
            }

            let body = infer_expr(&scope, inf, body)?;
            Ok(TypedExpr {
                ty: body.ty.clone(),
                span: expr.span,
                kind: TypedExprKind::LetIn {
                    bindings: typed_bindings,
                    body: Box::new(body),
                },
            })
        }
        ExprKind::LetModuleIn {
            name,
            expr: mod_expr,
            body,
        } => {
            let sig = match mod_expr {
                ModExpr::Struct(groups) => super::type_inline_structure(env, groups)?,
                ModExpr::Path(path) => env
                    .lookup_module_path(&path.0)
                    .ok_or_else(|| TypeError {
                        message: format!("unbound module '{path}'"),
                        span: expr.span,
                    })?,
            };
            let scope = env.extend(Binding::Module {
                name: name.clone(),
                sig,
                origin: Origin::Def(expr.span.start),
            });

            let body = infer_expr(&scope, inf, body)?;
            Ok(TypedExpr {
                ty: body.ty.clone(),
                span: expr.span,
                kind: TypedExprKind::LetModuleIn {
                    name: name.clone(),
                    body: Box::new(body),
                },
            })
        }
    }
}

/// Type the whole right-hand side of a binding, parameters included.
pub(super) fn infer_binding_body(
    env: &Env,
    inf: &mut Infer,
    binding: &crate::chunker::ast::Binding,
) -> TResult<TypedExpr> {
    let mut scope = env.clone();
    let mut typed_params = vec![];
    for param in &binding.params {
        let ty = param_type(env, inf, param)?;
        if let Some(name) = &param.name {
            scope = scope.extend(Binding::Value {
                name: name.clone(),
                ty: ty.clone(),
                origin: Origin::Def(param.span.start),
            });
        }
        typed_params.push(TypedParam {
            name: param.name.clone(),
            ty,
            span: param.span,
        });
    }

    let body = infer_expr(&scope, inf, &binding.body)?;

    if let Some(annotation) = &binding.annotation {
        let expected = annotation_type(env, inf, annotation)?;
        inf.unify(env, &body.ty, &expected, binding.body.span)?;
    }

    if typed_params.is_empty() {
        return Ok(body);
    }

    let ty = typed_params
        .iter()
        .rev()
        .fold(body.ty.clone(), |acc, param| {
            Type::arrow(param.ty.clone(), acc)
        });
    let span = binding.span;
    Ok(TypedExpr {
        ty,
        span,
        kind: TypedExprKind::Fun {
            params: typed_params,
            body: Box::new(body),
        },
    })
}

/// Best-effort type for pre-binding a recursive name: the annotation if
/// given, otherwise an arrow over the annotated parameter types.
pub(super) fn recursive_approximation(
    env: &Env,
    inf: &mut Infer,
    binding: &crate::chunker::ast::Binding,
) -> TResult<Option<Type>> {
    if binding.params.is_empty() {
        return match &binding.annotation {
            Some(annotation) => Ok(Some(annotation_type(env, inf, annotation)?)),
            None => Ok(None),
        };
    }

    let result = match &binding.annotation {
        Some(annotation) => annotation_type(env, inf, annotation)?,
        None => inf.fresh(),
    };
    let mut ty = result;
    for param in binding.params.iter().rev() {
        let param_ty = param_type(env, inf, param)?;
        ty = Type::arrow(param_ty, ty);
    }
    Ok(Some(ty))
}

fn lit(ty: Type, span: Span) -> TypedExpr {
    TypedExpr {
        ty,
        span,
        kind: TypedExprKind::Lit,
    }
}

/// Resolve a lone type against the final substitution and renumber its
/// surviving variables deterministically.
pub(super) fn canonical_type(inf: &Infer, ty: &Type) -> Type {
    let ty = inf.substitute(ty);
    let mut mapping = HashMap::new();
    collect_vars(&ty, &mut mapping);
    renumber(&ty, &mapping)
}

/// Resolve every type in the tree against the final substitution and
/// renumber the surviving variables deterministically, primary type first.
pub(super) fn finalize(inf: &Infer, ty: Type, body: TypedExpr) -> (Type, TypedExpr) {
    let ty = inf.substitute(&ty);
    let body = substitute_expr(inf, body);

    let mut mapping = HashMap::new();
    collect_vars(&ty, &mut mapping);
    collect_vars_expr(&body, &mut mapping);

    (renumber(&ty, &mapping), renumber_expr(body, &mapping))
}

fn substitute_expr(inf: &Infer, expr: TypedExpr) -> TypedExpr {
    let ty = inf.substitute(&expr.ty);
    let kind = match expr.kind {
        TypedExprKind::Lit => TypedExprKind::Lit,
        TypedExprKind::Ident { path, resolution } => TypedExprKind::Ident { path, resolution },
        TypedExprKind::Tuple(elements) => TypedExprKind::Tuple(
            elements
                .into_iter()
                .map(|e| substitute_expr(inf, e))
                .collect(),
        ),
        TypedExprKind::App { func, args } => TypedExprKind::App {
            func: Box::new(substitute_expr(inf, *func)),
            args: args.into_iter().map(|a| substitute_expr(inf, a)).collect(),
        },
        TypedExprKind::Fun { params, body } => TypedExprKind::Fun {
            params: params
                .into_iter()
                .map(|p| TypedParam {
                    ty: inf.substitute(&p.ty),
                    ..p
                })
                .collect(),
            body: Box::new(substitute_expr(inf, *body)),
        },
        TypedExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => TypedExprKind::If {
            condition: Box::new(substitute_expr(inf, *condition)),
            then_branch: Box::new(substitute_expr(inf, *then_branch)),
            else_branch: else_branch.map(|e| Box::new(substitute_expr(inf, *e))),
        },
        TypedExprKind::LetIn { bindings, body } => TypedExprKind::LetIn {
            bindings: bindings
                .into_iter()
                .map(|b| TypedLetBinding {
                    expr: substitute_expr(inf, b.expr),
                    ..b
                })
                .collect(),
            body: Box::new(substitute_expr(inf, *body)),
        },
        TypedExprKind::LetModuleIn { name, body } => TypedExprKind::LetModuleIn {
            name,
            body: Box::new(substitute_expr(inf, *body)),
        },
    };
    TypedExpr { ty, span: expr.span, kind }
}

fn collect_vars(ty: &Type, mapping: &mut HashMap<usize, usize>) {
    match ty {
        Type::Var(index) => {
            let next = mapping.len();
            mapping.entry(*index).or_insert(next);
        }
        Type::Arrow(param, result) => {
            collect_vars(param, mapping);
            collect_vars(result, mapping);
        }
        Type::Tuple(elements) => {
            for element in elements {
                collect_vars(element, mapping);
            }
        }
        _ => {}
    }
}

fn collect_vars_expr(expr: &TypedExpr, mapping: &mut HashMap<usize, usize>) {
    collect_vars(&expr.ty, mapping);
    if let TypedExprKind::Fun { params, .. } = &expr.kind {
        for param in params {
            collect_vars(&param.ty, mapping);
        }
    }
    for child in expr.children() {
        collect_vars_expr(child, mapping);
    }
}

// surviving live variables generalize on the way into the environment
fn renumber(ty: &Type, mapping: &HashMap<usize, usize>) -> Type {
    match ty {
        Type::Var(index) => Type::Gen(*mapping.get(index).unwrap_or(index)),
        Type::Arrow(param, result) => {
            Type::arrow(renumber(param, mapping), renumber(result, mapping))
        }
        Type::Tuple(elements) => {
            Type::Tuple(elements.iter().map(|e| renumber(e, mapping)).collect())
        }
        other => other.clone(),
    }
}

fn renumber_expr(expr: TypedExpr, mapping: &HashMap<usize, usize>) -> TypedExpr {
    let ty = renumber(&expr.ty, mapping);
    let kind = match expr.kind {
        TypedExprKind::Lit => TypedExprKind::Lit,
        TypedExprKind::Ident { path, resolution } => TypedExprKind::Ident { path, resolution },
        TypedExprKind::Tuple(elements) => TypedExprKind::Tuple(
            elements
                .into_iter()
                .map(|e| renumber_expr(e, mapping))
                .collect(),
        ),
        TypedExprKind::App { func, args } => TypedExprKind::App {
            func: Box::new(renumber_expr(*func, mapping)),
            args: args.into_iter().map(|a| renumber_expr(a, mapping)).collect(),
        },
        TypedExprKind::Fun { params, body } => TypedExprKind::Fun {
            params: params
                .into_iter()
                .map(|p| TypedParam {
                    ty: renumber(&p.ty, mapping),
                    ..p
                })
                .collect(),
            body: Box::new(renumber_expr(*body, mapping)),
        },
        TypedExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => TypedExprKind::If {
            condition: Box::new(renumber_expr(*condition, mapping)),
            then_branch: Box::new(renumber_expr(*then_branch, mapping)),
            else_branch: else_branch.map(|e| Box::new(renumber_expr(*e, mapping))),
        },
        TypedExprKind::LetIn { bindings, body } => TypedExprKind::LetIn {
            bindings: bindings
                .into_iter()
                .map(|b| TypedLetBinding {
                    expr: renumber_expr(b.expr, mapping),
                    ..b
                })
                .collect(),
            body: Box::new(renumber_expr(*body, mapping)),
        },
        TypedExprKind::LetModuleIn { name, body } => TypedExprKind::LetModuleIn {
            name,
            body: Box::new(renumber_expr(*body, mapping)),
        },
    };
    TypedExpr { ty, span: expr.span, kind }
}
