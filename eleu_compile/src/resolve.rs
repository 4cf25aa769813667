use std::collections::HashMap;

use eleu_syntax::{
    ast::{Expr, ExprKind, FunctionDecl, Ident, Item, ItemKind, NodeId},
    span::Span,
    stack::ensure_sufficient_stack,
};
use log::debug;

use crate::error::{resolution_error, ErrorMsg, RuntimeError};

/// Scope distances of every local variable reference. References
/// missing from the table are globals and are looked up by name.
pub type Locals = HashMap<NodeId, usize>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FunctionType {
    Function,
    Method,
    Initialiser,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClassType {
    Class,
    Subclass,
}

#[derive(Debug, Default)]
pub struct Resolver {
    /// Only nested scopes are tracked, the global scope is dynamic.
    scopes: Vec<HashMap<String, bool>>,
    locals: Locals,
    function: Option<FunctionType>,
    class: Option<ClassType>,
    loop_depth: usize,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(mut self, items: &[Item]) -> Result<Locals, RuntimeError> {
        self.resolve_all(items)?;
        Ok(self.locals)
    }

    fn resolve_all(&mut self, items: &[Item]) -> Result<(), RuntimeError> {
        items.iter().try_for_each(|item| self.resolve_item(item))
    }

    fn resolve_item(&mut self, item: &Item) -> Result<(), RuntimeError> {
        ensure_sufficient_stack(|| self.resolve_item_kind(item))
    }

    fn resolve_item_kind(&mut self, item: &Item) -> Result<(), RuntimeError> {
        match &item.kind {
            ItemKind::ExprStmt(expr) => self.resolve_expr(expr),
            ItemKind::VarDecl { name, init } => self.resolve_var_decl(name, init.as_ref(), &item.span),
            ItemKind::Block(items) => self.resolve_block(items),
            ItemKind::IfStmt {
                condition,
                if_item,
                else_item,
            } => {
                self.resolve_expr(condition)?;
                self.resolve_item(if_item)?;
                if let Some(item) = else_item {
                    self.resolve_item(item)?;
                }
                Ok(())
            }
            ItemKind::WhileStmt {
                condition,
                body,
                increment,
            } => {
                self.resolve_expr(condition)?;
                self.resolve_loop_body(body)?;
                if let Some(expr) = increment {
                    self.resolve_expr(expr)?;
                }
                Ok(())
            }
            ItemKind::RepeatStmt { count, body } => {
                self.resolve_expr(count)?;
                self.resolve_loop_body(body)
            }
            ItemKind::ReturnStmt(expr) => self.resolve_return_stmt(expr.as_ref(), &item.span),
            ItemKind::Break | ItemKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = if matches!(item.kind, ItemKind::Break) { "break" } else { "continue" };
                    return Err(resolution_error(
                        ErrorMsg::LoopControlOutsideLoop,
                        format!("('{keyword}')"),
                    )
                    .at(&item.span));
                }
                Ok(())
            }
            ItemKind::Assert { expr, .. } => self.resolve_expr(expr),
            ItemKind::Function(decl) => {
                self.declare(&decl.name, &item.span)?;
                self.define(&decl.name);
                self.resolve_function(decl, FunctionType::Function)
            }
            ItemKind::Class {
                name,
                parent,
                methods,
            } => self.resolve_class(name, parent.as_ref(), methods, &item.span),
        }
    }

    fn resolve_block(&mut self, items: &[Item]) -> Result<(), RuntimeError> {
        self.init_scope();
        let res = self.resolve_all(items);
        self.end_scope();
        res
    }

    fn resolve_loop_body(&mut self, body: &Item) -> Result<(), RuntimeError> {
        self.loop_depth += 1;
        let res = self.resolve_item(body);
        self.loop_depth -= 1;
        res
    }

    fn resolve_var_decl(
        &mut self,
        name: &str,
        init: Option<&Expr>,
        span: &Span,
    ) -> Result<(), RuntimeError> {
        self.declare(name, span)?;
        if let Some(expr) = init {
            self.resolve_expr(expr)?;
        }
        self.define(name);
        Ok(())
    }

    fn resolve_return_stmt(&mut self, expr: Option<&Expr>, span: &Span) -> Result<(), RuntimeError> {
        match self.function {
            None => Err(resolution_error(ErrorMsg::ReturnOutsideFunction, "").at(span)),
            Some(FunctionType::Initialiser) if expr.is_some() => {
                Err(resolution_error(ErrorMsg::ReturnFromInit, "").at(span))
            }
            _ => expr.map_or(Ok(()), |e| self.resolve_expr(e)),
        }
    }

    fn resolve_function(
        &mut self,
        decl: &FunctionDecl,
        function: FunctionType,
    ) -> Result<(), RuntimeError> {
        let old_function = self.function.replace(function);
        // Loop control never crosses a function boundary
        let old_loop_depth = std::mem::take(&mut self.loop_depth);
        self.init_scope();

        let res = decl
            .params
            .iter()
            .try_for_each(|param| {
                self.declare(param, &decl.span)?;
                self.define(param);
                Ok(())
            })
            .and_then(|_| self.resolve_all(&decl.body));

        self.end_scope();
        self.loop_depth = old_loop_depth;
        self.function = old_function;
        res
    }

    fn resolve_class(
        &mut self,
        name: &str,
        parent: Option<&Ident>,
        methods: &[std::rc::Rc<FunctionDecl>],
        span: &Span,
    ) -> Result<(), RuntimeError> {
        let old_class = self.class.replace(ClassType::Class);
        self.declare(name, span)?;
        self.define(name);

        if let Some(parent) = parent {
            if parent.name == name {
                return Err(resolution_error(ErrorMsg::SelfInheritance, format!("('{name}')")).at(span));
            }
            self.resolve_local(parent);
            self.class = Some(ClassType::Subclass);
            self.init_scope();
            self.define("super");
        }

        self.init_scope();
        self.define("this");
        let res = methods.iter().try_for_each(|method| {
            let function = if method.name == "init" {
                FunctionType::Initialiser
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, function)
        });
        self.end_scope();

        if parent.is_some() {
            self.end_scope();
        }
        self.class = old_class;
        res
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        ensure_sufficient_stack(|| self.resolve_expr_kind(expr))
    }

    fn resolve_expr_kind(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        match &expr.kind {
            ExprKind::Literal(_) => Ok(()),
            ExprKind::List(elements) => elements.iter().try_for_each(|e| self.resolve_expr(e)),
            ExprKind::Ident(ident) => self.resolve_ident(ident, &expr.span),
            ExprKind::Assignment { ident, value } => {
                self.resolve_expr(value)?;
                self.resolve_local(ident);
                Ok(())
            }
            ExprKind::Unary { expr, .. } | ExprKind::Group(expr) => self.resolve_expr(expr),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => self
                .resolve_expr(lhs)
                .and_then(|_| self.resolve_expr(rhs)),
            ExprKind::Call { func, args } => {
                self.resolve_expr(func)?;
                args.iter().try_for_each(|arg| self.resolve_expr(arg))
            }
            ExprKind::FieldGet { object, .. } => self.resolve_expr(object),
            ExprKind::FieldSet { object, value, .. } => self
                .resolve_expr(value)
                .and_then(|_| self.resolve_expr(object)),
            ExprKind::This(ident) => {
                if self.class.is_none() {
                    return Err(resolution_error(ErrorMsg::ThisOutsideClass, "").at(&expr.span));
                }
                self.resolve_local(ident);
                Ok(())
            }
            ExprKind::Super { ident, .. } => {
                match self.class {
                    None => {
                        return Err(resolution_error(ErrorMsg::SuperOutsideClass, "").at(&expr.span))
                    }
                    Some(ClassType::Class) => {
                        return Err(resolution_error(ErrorMsg::SuperWithoutParent, "").at(&expr.span))
                    }
                    Some(ClassType::Subclass) => (),
                }
                self.resolve_local(ident);
                Ok(())
            }
        }
    }

    fn resolve_ident(&mut self, ident: &Ident, span: &Span) -> Result<(), RuntimeError> {
        if let Some(false) = self.scopes.last().and_then(|s| s.get(&ident.name)) {
            return Err(
                resolution_error(ErrorMsg::SelfInitialiser, format!("('{}')", ident.name)).at(span),
            );
        }
        self.resolve_local(ident);
        Ok(())
    }

    fn resolve_local(&mut self, ident: &Ident) {
        if let Some(distance) = self
            .scopes
            .iter()
            .rev()
            .position(|s| s.contains_key(&ident.name))
        {
            debug!("Resolved {} (#{}) at distance {distance}", ident.name, ident.id);
            self.locals.insert(ident.id, distance);
        }
    }

    fn init_scope(&mut self) {
        self.scopes.push(HashMap::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, span: &Span) -> Result<(), RuntimeError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };
        if scope.contains_key(name) {
            return Err(resolution_error(ErrorMsg::Redeclaration, format!("('{name}')")).at(span));
        }
        scope.insert(name.to_string(), false);
        Ok(())
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }
}
