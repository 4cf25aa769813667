use eleu_compile::{
    error::{runtime_error, ErrorMsg, RuntimeError},
    resolve::Locals,
    types::Value,
};
use eleu_syntax::{
    ast::{BinOp, Expr, ExprKind, FunctionDecl, FunctionKind, Ident, Item, ItemKind},
    span::Span,
    stack::ensure_sufficient_stack,
};

use crate::chunk::{Chunk, Op};

/// Pending `break`/`continue` jumps of the innermost loops.
#[derive(Debug, Default)]
struct Loop {
    scope_depth: usize,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Lowers resolved syntax to one chunk per program or function body.
#[derive(Debug)]
pub struct Generator<'a> {
    locals: &'a Locals,
    list_constructor: Value,
    chunk: Chunk,
    /// Scopes entered since the start of the chunk.
    scope_depth: usize,
    loops: Vec<Loop>,
    in_initialiser: bool,
}

impl<'a> Generator<'a> {
    pub fn new(locals: &'a Locals, list_constructor: Value) -> Self {
        Self {
            locals,
            list_constructor,
            chunk: Chunk::default(),
            scope_depth: 0,
            loops: vec![],
            in_initialiser: false,
        }
    }

    pub fn generate(mut self, name: &str, items: &[Item]) -> Result<Chunk, RuntimeError> {
        self.chunk = Chunk::new(name);
        self.generate_all(items)?;
        Ok(self.chunk)
    }

    pub fn generate_function(mut self, decl: &FunctionDecl) -> Result<Chunk, RuntimeError> {
        self.chunk = Chunk::new(&decl.name);
        self.in_initialiser = decl.kind == FunctionKind::Method && decl.name == "init";
        self.generate_all(&decl.body)?;
        self.generate_implicit_return(&decl.span);
        Ok(self.chunk)
    }

    fn generate_all(&mut self, items: &[Item]) -> Result<(), RuntimeError> {
        items.iter().try_for_each(|item| self.generate_item(item))
    }

    fn generate_item(&mut self, item: &Item) -> Result<(), RuntimeError> {
        ensure_sufficient_stack(|| self.generate_item_kind(item))
    }

    fn generate_item_kind(&mut self, item: &Item) -> Result<(), RuntimeError> {
        let span = Some(&item.span);
        match &item.kind {
            ItemKind::ExprStmt(expr) => {
                self.generate_expr(expr)?;
                self.chunk.add_op(Op::Pop, span);
            }
            ItemKind::VarDecl { name, init } => {
                match init {
                    Some(expr) => self.generate_expr(expr)?,
                    None => {
                        self.chunk.add_op(Op::Constant(Value::Nil), span);
                    }
                }
                self.chunk.add_op(Op::DeclareVar(name.clone()), span);
            }
            ItemKind::Block(items) => {
                self.chunk.add_op(Op::EnterScope, span);
                self.scope_depth += 1;
                self.generate_all(items)?;
                self.scope_depth -= 1;
                self.chunk.add_op(Op::LeaveScope(1), span);
            }
            ItemKind::IfStmt {
                condition,
                if_item,
                else_item,
            } => {
                self.generate_expr(condition)?;
                let jump_else = self
                    .chunk
                    .add_op(Op::JumpIfFalse(usize::MAX), Some(&condition.span));
                self.chunk.add_op(Op::Pop, span);
                self.generate_item(if_item)?;
                let jump_end = self.chunk.add_op(Op::Jump(usize::MAX), span);
                self.chunk.patch(jump_else, self.chunk.ops.len());
                self.chunk.add_op(Op::Pop, span);
                if let Some(else_item) = else_item {
                    self.generate_item(else_item)?;
                }
                self.chunk.patch(jump_end, self.chunk.ops.len());
            }
            ItemKind::WhileStmt {
                condition,
                body,
                increment,
            } => self.generate_while(condition, body, increment.as_ref(), &item.span)?,
            ItemKind::RepeatStmt { count, body } => self.generate_repeat(count, body, &item.span)?,
            ItemKind::ReturnStmt(expr) => match expr {
                Some(expr) => {
                    self.generate_expr(expr)?;
                    self.chunk.add_op(Op::Return, span);
                }
                None => self.generate_implicit_return(&item.span),
            },
            ItemKind::Break | ItemKind::Continue => {
                let loop_depth = self.loops.last().map_or(0, |l| l.scope_depth);
                let unwind = self.scope_depth - loop_depth;
                if unwind > 0 {
                    self.chunk.add_op(Op::LeaveScope(unwind), span);
                }
                let jump = self.chunk.add_op(Op::Jump(usize::MAX), span);
                if let Some(current) = self.loops.last_mut() {
                    if matches!(item.kind, ItemKind::Break) {
                        current.breaks.push(jump);
                    } else {
                        current.continues.push(jump);
                    }
                }
            }
            ItemKind::Assert {
                expr,
                message,
                expect_error,
            } => {
                if *expect_error {
                    let begin = self.chunk.add_op(
                        Op::AssertErrorBegin {
                            message: message.clone(),
                            catch: usize::MAX,
                        },
                        span,
                    );
                    self.generate_expr(expr)?;
                    self.chunk.add_op(Op::AssertErrorEnd, Some(&expr.span));
                    self.chunk.patch(begin, self.chunk.ops.len());
                } else {
                    self.generate_expr(expr)?;
                    self.chunk.add_op(Op::Assert(message.clone()), span);
                }
            }
            ItemKind::Function(decl) => {
                self.chunk.add_op(Op::Function(decl.clone()), span);
            }
            ItemKind::Class {
                name,
                parent,
                methods,
            } => {
                if let Some(parent) = parent {
                    self.generate_variable(parent, &item.span);
                }
                self.chunk
                    .add_op(Op::Constant(Value::Boolean(parent.is_some())), span);
                self.chunk.add_op(
                    Op::Class {
                        name: name.clone(),
                        methods: methods.clone(),
                    },
                    span,
                );
            }
        }
        Ok(())
    }

    fn generate_while(
        &mut self,
        condition: &Expr,
        body: &Item,
        increment: Option<&Expr>,
        span: &Span,
    ) -> Result<(), RuntimeError> {
        let start = self.chunk.ops.len();
        self.generate_expr(condition)?;
        let exit = self
            .chunk
            .add_op(Op::JumpIfFalse(usize::MAX), Some(&condition.span));
        self.chunk.add_op(Op::Pop, Some(span));

        self.begin_loop();
        self.generate_item(body)?;
        let current = self.end_loop();

        let next = self.chunk.ops.len();
        if let Some(expr) = increment {
            self.generate_expr(expr)?;
            self.chunk.add_op(Op::Pop, Some(&expr.span));
        }
        self.chunk.add_op(Op::Jump(start), Some(span));
        self.chunk.patch(exit, self.chunk.ops.len());
        self.chunk.add_op(Op::Pop, Some(span));
        // The condition was already popped when the body breaks out
        let end = self.chunk.ops.len();

        current.breaks.into_iter().for_each(|j| self.chunk.patch(j, end));
        current.continues.into_iter().for_each(|j| self.chunk.patch(j, next));
        Ok(())
    }

    fn generate_repeat(&mut self, count: &Expr, body: &Item, span: &Span) -> Result<(), RuntimeError> {
        self.generate_expr(count)?;
        let test = self
            .chunk
            .add_op(Op::RepeatTest(usize::MAX), Some(&count.span));

        self.begin_loop();
        self.generate_item(body)?;
        let current = self.end_loop();

        let next = self.chunk.ops.len();
        self.chunk.add_op(Op::Constant(Value::Number(1usize.into())), Some(span));
        self.chunk
            .add_op(Op::Binary(BinOp::Minus), Some(span));
        self.chunk.add_op(Op::Jump(test), Some(span));
        // The counter stays on the stack until the loop is left
        let end = self.chunk.ops.len();
        self.chunk.add_op(Op::Pop, Some(span));

        self.chunk.patch(test, end);
        current.breaks.into_iter().for_each(|j| self.chunk.patch(j, end));
        current.continues.into_iter().for_each(|j| self.chunk.patch(j, next));
        Ok(())
    }

    fn begin_loop(&mut self) {
        self.loops.push(Loop {
            scope_depth: self.scope_depth,
            ..Default::default()
        });
    }

    fn end_loop(&mut self) -> Loop {
        self.loops.pop().unwrap_or_default()
    }

    /// Functions return `nil`, initialisers return their instance.
    fn generate_implicit_return(&mut self, span: &Span) {
        let op = if self.in_initialiser {
            // `this` lives in the scope enclosing the parameters
            Op::LookupVar {
                name: "this".to_string(),
                depth: Some(self.scope_depth + 1),
            }
        } else {
            Op::Constant(Value::Nil)
        };
        self.chunk.add_op(op, Some(span));
        self.chunk.add_op(Op::Return, Some(span));
    }

    fn generate_expr(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        ensure_sufficient_stack(|| self.generate_expr_kind(expr))
    }

    fn generate_expr_kind(&mut self, expr: &Expr) -> Result<(), RuntimeError> {
        let span = Some(&expr.span);
        match &expr.kind {
            ExprKind::Literal(lit) => {
                let value = Value::from_literal(lit).map_err(|e| e.at(&expr.span))?;
                self.chunk.add_op(Op::Constant(value), span);
            }
            ExprKind::List(elements) => {
                for element in elements {
                    self.generate_expr(element)?;
                }
                self.chunk
                    .add_op(Op::Constant(self.list_constructor.clone()), span);
                self.chunk.add_op(Op::Call(elements.len()), span);
            }
            ExprKind::Ident(ident) | ExprKind::This(ident) => {
                self.generate_variable(ident, &expr.span)
            }
            ExprKind::Assignment { ident, value } => {
                self.generate_expr(value)?;
                self.chunk.add_op(
                    Op::AssignVar {
                        name: ident.name.clone(),
                        depth: self.locals.get(&ident.id).copied(),
                    },
                    span,
                );
            }
            ExprKind::Unary { op, expr: inner } => {
                self.generate_expr(inner)?;
                self.chunk.add_op(Op::Unary(*op), span);
            }
            ExprKind::Binary { lhs, op, rhs } => {
                self.generate_expr(lhs)?;
                self.generate_expr(rhs)?;
                self.chunk.add_op(Op::Binary(*op), span);
            }
            ExprKind::Logical { lhs, op, rhs } => {
                self.generate_expr(lhs)?;
                self.generate_expr(rhs)?;
                self.chunk.add_op(Op::Logical(*op), span);
            }
            ExprKind::Group(inner) => self.generate_expr(inner)?,
            ExprKind::Call { func, args } => {
                for arg in args {
                    self.generate_expr(arg)?;
                }
                self.generate_expr(func)?;
                self.chunk.add_op(Op::Call(args.len()), span);
            }
            ExprKind::FieldGet { object, field } => {
                self.generate_expr(object)?;
                self.chunk.add_op(Op::GetField(field.clone()), span);
            }
            ExprKind::FieldSet {
                object,
                field,
                value,
            } => {
                self.generate_expr(object)?;
                self.generate_expr(value)?;
                self.chunk.add_op(Op::SetField(field.clone()), span);
            }
            ExprKind::Super { ident, method } => {
                // The resolver only records `super` inside subclasses
                let depth = self.locals.get(&ident.id).copied().ok_or_else(|| {
                    runtime_error(ErrorMsg::MisresolvedVar, "'super'").at(&expr.span)
                })?;
                self.chunk.add_op(
                    Op::GetSuper {
                        method: method.clone(),
                        depth,
                    },
                    span,
                );
            }
        }
        Ok(())
    }

    fn generate_variable(&mut self, ident: &Ident, span: &Span) {
        self.chunk.add_op(
            Op::LookupVar {
                name: ident.name.clone(),
                depth: self.locals.get(&ident.id).copied(),
            },
            Some(span),
        );
    }
}
