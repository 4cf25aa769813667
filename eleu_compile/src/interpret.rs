use std::{cell::RefCell, rc::Rc};

use eleu_syntax::{
    ast::{Expr, ExprKind, FunctionDecl, Ident, Item, ItemKind, Source},
    span::Span,
    stack::ensure_sufficient_stack,
};
use log::{debug, trace};

use crate::{
    environment::Env,
    error::{assertion_error, runtime_error, ErrorKind, ErrorMsg, Exception, RuntimeError},
    ops,
    options::Options,
    resolve::{Locals, Resolver},
    stdlib,
    types::{super_method, Callable, Class, Func, Host, Instance, NativeFunc, Value},
    EleuResult,
};

/// An active call, kept for the stack dump of runtime errors.
#[derive(Clone, Debug)]
struct CallInfo {
    name: String,
    span: Span,
}

/// Tree-walking executor over resolved syntax trees.
pub struct Interpreter {
    options: Options,
    globals: Rc<RefCell<Env>>,
    env: Rc<RefCell<Env>>,
    locals: Locals,
    call_stack: Vec<CallInfo>,
    /// Snapshot of `call_stack` taken where the pending error was raised.
    error_trace: Option<Vec<CallInfo>>,
    instruction_count: usize,
}

impl Interpreter {
    pub fn new(options: Options) -> Self {
        let globals = Env::new();
        stdlib::init(&mut globals.borrow_mut());
        Self {
            options,
            env: globals.clone(),
            globals,
            locals: Locals::default(),
            call_stack: vec![],
            error_trace: None,
            instruction_count: 0,
        }
    }

    /// Makes a host function available to scripts as a global.
    pub fn define_native<F>(&mut self, name: &str, params: &[&str], body: F)
    where
        F: Fn(&mut dyn Host, Vec<Value>) -> Result<Value, RuntimeError> + 'static,
    {
        self.define_native_func(stdlib::native(name, params, body));
    }

    pub fn define_native_func(&mut self, func: NativeFunc) {
        let name = func.name.clone();
        self.globals
            .borrow_mut()
            .define(&name, Value::Callable(Callable::Native(func)));
    }

    /// Number of statements executed so far.
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Resolves and executes `source`, reporting any error to the error
    /// sink of the options.
    pub fn run(&mut self, source: &Source) -> EleuResult {
        match self.interpret(source) {
            Ok(()) => EleuResult::Ok,
            Err(e) if e.kind == ErrorKind::Resolve => {
                self.options.write_err(&e.to_string());
                EleuResult::CompileError
            }
            Err(e) => {
                let trace = self
                    .error_trace
                    .take()
                    .unwrap_or_default()
                    .iter()
                    .rev()
                    .map(|call| format!("{}() called at {}", call.name, call.span))
                    .collect::<Vec<String>>();
                crate::report_runtime_error(&self.options, &e, &trace);
                EleuResult::RuntimeError
            }
        }
    }

    pub fn interpret(&mut self, source: &Source) -> Result<(), RuntimeError> {
        trace!("Resolving {} items", source.items.len());
        let locals = Resolver::new().resolve(&source.items)?;
        self.locals.extend(locals);
        trace!("Interpreting {} items", source.items.len());
        self.error_trace = None;
        for item in &source.items {
            match self.interpret_item(item) {
                Ok(()) => (),
                Err(Exception::Error(e)) => return Err(e),
                // The resolver rejects control flow outside functions and loops
                Err(exception) => debug!("Ignoring {exception} at top level"),
            }
        }
        Ok(())
    }

    fn interpret_item(&mut self, item: &Item) -> Result<(), Exception> {
        if self.options.cancelled() {
            return Err(runtime_error(ErrorMsg::Cancelled, "").at(&item.span).into());
        }
        self.instruction_count += 1;
        ensure_sufficient_stack(|| self.interpret_stmt(item)).map_err(|e| match e {
            Exception::Error(e) => Exception::Error(e.at(&item.span)),
            e => e,
        })
    }

    fn interpret_stmt(&mut self, item: &Item) -> Result<(), Exception> {
        match &item.kind {
            ItemKind::ExprStmt(expr) => {
                self.interpret_expr(expr)?;
            }
            ItemKind::VarDecl { name, init } => {
                let value = match init {
                    Some(expr) => self.interpret_expr(expr)?,
                    None => Value::Nil,
                };
                self.env.borrow_mut().declare(name, value)?;
            }
            ItemKind::Block(items) => {
                let env = Env::with_parent(self.env.clone());
                self.execute_block(items, env)?;
            }
            ItemKind::IfStmt {
                condition,
                if_item,
                else_item,
            } => {
                let value = self.interpret_expr(condition)?;
                if ops::truthy(&value).map_err(|e| e.at(&condition.span))? {
                    self.interpret_item(if_item)?;
                } else if let Some(item) = else_item {
                    self.interpret_item(item)?;
                }
            }
            ItemKind::WhileStmt {
                condition,
                body,
                increment,
            } => self.interpret_while_stmt(condition, body, increment.as_ref())?,
            ItemKind::RepeatStmt { count, body } => self.interpret_repeat_stmt(count, body)?,
            ItemKind::ReturnStmt(expr) => {
                let value = match expr {
                    Some(expr) => self.interpret_expr(expr)?,
                    None => Value::Nil,
                };
                return Err(Exception::Return(value));
            }
            ItemKind::Break => return Err(Exception::Break),
            ItemKind::Continue => return Err(Exception::Continue),
            ItemKind::Assert {
                expr,
                message,
                expect_error,
            } => {
                if *expect_error {
                    self.interpret_error_assert(expr, message.as_deref())?;
                } else {
                    let value = self.interpret_expr(expr)?;
                    if !ops::truthy(&value)? {
                        let ctx = message
                            .as_ref()
                            .map(|m| format!("('{m}')"))
                            .unwrap_or_default();
                        return Err(assertion_error(ErrorMsg::AssertionFailed, ctx).into());
                    }
                }
            }
            ItemKind::Function(decl) => {
                let func = Func::new(decl.clone(), self.env.clone(), false);
                self.env
                    .borrow_mut()
                    .define(&decl.name, Value::Callable(Callable::Function(func)));
            }
            ItemKind::Class {
                name,
                parent,
                methods,
            } => self.interpret_class(name, parent.as_ref(), methods)?,
        }
        Ok(())
    }

    fn interpret_while_stmt(
        &mut self,
        condition: &Expr,
        body: &Item,
        increment: Option<&Expr>,
    ) -> Result<(), Exception> {
        loop {
            let value = self.interpret_expr(condition)?;
            if !ops::truthy(&value).map_err(|e| e.at(&condition.span))? {
                break;
            }
            match self.interpret_item(body) {
                Ok(()) | Err(Exception::Continue) => (),
                Err(Exception::Break) => break,
                Err(e) => return Err(e),
            }
            if let Some(expr) = increment {
                self.interpret_expr(expr)?;
            }
        }
        Ok(())
    }

    fn interpret_repeat_stmt(&mut self, count: &Expr, body: &Item) -> Result<(), Exception> {
        let value = self.interpret_expr(count)?;
        let times = match &value {
            Value::Number(n) => n.as_int().filter(|&n| n >= 0),
            _ => None,
        }
        .ok_or_else(|| runtime_error(ErrorMsg::InvalidRepeatCount, value.repr()).at(&count.span))?;
        for _ in 0..times {
            match self.interpret_item(body) {
                Ok(()) | Err(Exception::Continue) => (),
                Err(Exception::Break) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// `assert break`: the expression must raise a runtime error, and
    /// the error must carry `message` when one is given.
    fn interpret_error_assert(
        &mut self,
        expr: &Expr,
        message: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let res = self
            .interpret_expr(expr)
            .and_then(|value| ops::truthy(&value).map_err(|e| e.at(&expr.span)));
        match res {
            Ok(_) => Err(assertion_error(ErrorMsg::ErrorExpected, "")),
            Err(e) => {
                self.error_trace = None;
                match message {
                    Some(expected) if expected != e.msg => {
                        Err(assertion_error(ErrorMsg::WrongError, format!("'{}'", e.msg)))
                    }
                    _ => {
                        debug!("Caught expected error: {e}");
                        Ok(())
                    }
                }
            }
        }
    }

    fn interpret_class(
        &mut self,
        name: &str,
        parent: Option<&Ident>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<(), RuntimeError> {
        let superclass = parent.map(|ident| self.lookup(ident)).transpose()?;
        Class::declare(&self.env, name, superclass, methods)
    }

    /// Runs `items` in `env` and restores the current environment
    /// afterwards, whatever the outcome.
    pub fn execute_block(
        &mut self,
        items: &[Item],
        env: Rc<RefCell<Env>>,
    ) -> Result<(), Exception> {
        let previous = std::mem::replace(&mut self.env, env);
        let res = items.iter().try_for_each(|item| self.interpret_item(item));
        self.env = previous;
        res
    }

    fn interpret_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.evaluate(expr)).map_err(|e| e.at(&expr.span))
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Literal(lit) => Value::from_literal(lit),
            ExprKind::List(elements) => {
                let values = elements
                    .iter()
                    .map(|e| self.interpret_expr(e))
                    .collect::<Result<Vec<Value>, RuntimeError>>()?;
                Ok(Value::list(values))
            }
            ExprKind::Ident(ident) | ExprKind::This(ident) => self.lookup(ident),
            ExprKind::Assignment { ident, value } => {
                let value = self.interpret_expr(value)?;
                self.assign(ident, value.clone())?;
                Ok(value)
            }
            ExprKind::Unary { op, expr } => {
                let value = self.interpret_expr(expr)?;
                ops::unary(*op, value)
            }
            ExprKind::Binary { lhs, op, rhs } => {
                let left = self.interpret_expr(lhs)?;
                let right = self.interpret_expr(rhs)?;
                ops::binary(*op, left, right)
            }
            ExprKind::Logical { lhs, op, rhs } => {
                let left = self.interpret_expr(lhs)?;
                let right = self.interpret_expr(rhs)?;
                ops::logical(*op, left, right)
            }
            ExprKind::Group(expr) => self.interpret_expr(expr),
            ExprKind::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|e| self.interpret_expr(e))
                    .collect::<Result<Vec<Value>, RuntimeError>>()?;
                let callee = self.interpret_expr(func)?;
                self.call(callee, args, &expr.span)
            }
            ExprKind::FieldGet { object, field } => match self.interpret_expr(object)? {
                Value::Instance(instance) => instance.get(field),
                other => Err(runtime_error(ErrorMsg::InvalidObject, other.repr())),
            },
            ExprKind::FieldSet {
                object,
                field,
                value,
            } => {
                let instance = match self.interpret_expr(object)? {
                    Value::Instance(instance) => instance,
                    other => return Err(runtime_error(ErrorMsg::InvalidObject, other.repr())),
                };
                let value = self.interpret_expr(value)?;
                instance.set(field, value.clone());
                Ok(value)
            }
            ExprKind::Super { ident, method } => self.interpret_super(ident, method),
        }
    }

    fn interpret_super(&mut self, ident: &Ident, method: &str) -> Result<Value, RuntimeError> {
        let distance = self
            .locals
            .get(&ident.id)
            .copied()
            .ok_or_else(|| runtime_error(ErrorMsg::MisresolvedVar, "'super'"))?;
        super_method(&self.env.borrow(), distance, method)
    }

    fn lookup(&self, ident: &Ident) -> Result<Value, RuntimeError> {
        match self.locals.get(&ident.id) {
            Some(&distance) => self.env.borrow().get_at_depth(&ident.name, distance),
            None => self.globals.borrow().get(&ident.name),
        }
    }

    fn assign(&mut self, ident: &Ident, value: Value) -> Result<(), RuntimeError> {
        match self.locals.get(&ident.id) {
            Some(&distance) => self
                .env
                .borrow_mut()
                .assign_at_depth(&ident.name, value, distance),
            None => self.globals.borrow_mut().assign(&ident.name, value),
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, span: &Span) -> Result<Value, RuntimeError> {
        let Value::Callable(callable) = callee else {
            return Err(runtime_error(ErrorMsg::InvalidCallExpr, callee.repr()));
        };
        callable.check_arity(args.len())?;
        match callable {
            Callable::Native(func) => (func.body)(self, args),
            Callable::Function(func) => self.call_func(&func, args, span),
            Callable::Class(class) => {
                let instance = Instance::new(class.clone());
                if let Some(init) = class.find_method("init") {
                    self.call_func(&init.bind(instance.clone()), args, span)?;
                }
                Ok(Value::Instance(instance))
            }
        }
    }

    fn call_func(&mut self, func: &Func, args: Vec<Value>, span: &Span) -> Result<Value, RuntimeError> {
        if self.call_stack.len() >= self.options.max_call_depth {
            return Err(runtime_error(ErrorMsg::TooManyNestedCalls, ""));
        }
        let env = Env::with_parent(func.env.clone());
        for (param, arg) in func.decl.params.iter().zip(args) {
            env.borrow_mut().define(param, arg);
        }

        self.call_stack.push(CallInfo {
            name: func.name().to_string(),
            span: span.clone(),
        });
        let res = ensure_sufficient_stack(|| self.execute_block(&func.decl.body, env));
        if matches!(res, Err(Exception::Error(_))) && self.error_trace.is_none() {
            self.error_trace = Some(self.call_stack.clone());
        }
        self.call_stack.pop();

        match res {
            // Initialisers always produce their instance
            Ok(()) | Err(Exception::Return(_)) if func.is_init => {
                func.env.borrow().get_at_depth("this", 0)
            }
            Ok(()) => Ok(Value::Nil),
            Err(Exception::Return(value)) => Ok(value),
            Err(Exception::Error(e)) => Err(e),
            Err(Exception::Break | Exception::Continue) => Ok(Value::Nil),
        }
    }
}

impl Host for Interpreter {
    fn print(&mut self, text: &str) {
        self.options.write_out(text);
    }

    fn notify(&mut self, what: &str) {
        self.options.notify(what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::Capture, parse};
    use assert_matches::assert_matches;

    fn run_with(source: &str, mut options: Options) -> (EleuResult, String, String) {
        let (out, err) = (Capture::default(), Capture::default());
        options.out = out.sink();
        options.err = err.sink();
        let result = match parse(source, "test", &options) {
            Some(source) => Interpreter::new(options).run(&source),
            None => EleuResult::CompileError,
        };
        (result, out.contents(), err.contents())
    }

    fn run(source: &str) -> (EleuResult, String, String) {
        run_with(source, Options::default())
    }

    fn output(source: &str) -> String {
        let (result, out, err) = run(source);
        assert_eq!(result, EleuResult::Ok, "{err}");
        out
    }

    #[test]
    fn var_decl() {
        assert_eq!(output("var x = 5; print(x);"), "5\n");
        assert_eq!(output("var x; print(x);"), "nil\n");
        let (result, _, err) = run("var x = 1; var x = 2;");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("already declared"), "{err}");
    }

    #[test]
    fn if_stmt() {
        assert_eq!(output("if (1 < 2) print(\"yes\"); else print(\"no\");"), "yes\n");
        assert_eq!(output("if (false) print(1); else if (true) print(2);"), "2\n");
        let (result, _, err) = run("if (1) print(1);");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("boolean"), "{err}");
    }

    #[test]
    fn loops() {
        assert_eq!(output("var i = 0; while (i < 3) { print(i); i = i + 1; }"), "0\n1\n2\n");
        assert_eq!(
            output("for (var i = 0; i < 4; i = i + 1) { if (i == 1) continue; if (i == 3) break; print(i); }"),
            "0\n2\n"
        );
        assert_eq!(output("var n = 0; repeat (3) n = n + 2; print(n);"), "6\n");
        assert_eq!(output("repeat (0) print(1);"), "");
        let (result, _, err) = run("repeat (1.5) print(1);");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("natural number"), "{err}");
    }

    #[test]
    fn block_shadowing() {
        let source = "var a = \"outer\"; { var a = \"inner\"; print(a); } print(a);";
        assert_eq!(output(source), "inner\nouter\n");
    }

    #[test]
    fn closures_share_env() {
        let source = r#"
            fun counter() {
                var n = 0;
                fun inc() { n = n + 1; return n; }
                fun get() { return n; }
                return [inc, get];
            }
            var fs = counter();
            var inc = at(fs, 0);
            var get = at(fs, 1);
            inc();
            inc();
            print(get());
        "#;
        assert_eq!(output(source), "2\n");
    }

    #[test]
    fn classes() {
        let source = r#"
            class A {
                init(x) { this.x = x; }
                name() { return "A" + this.x; }
                hello() { return "hello " + this.name(); }
            }
            class B < A {
                name() { return "B/" + super.name(); }
            }
            var b = B(1);
            print(b.hello());
            print(typeof(b));
            print(b.init(2).x);
        "#;
        assert_eq!(output(source), "hello B/A1\nclass B\n2\n");
    }

    #[test]
    fn class_reopening() {
        let source = r#"
            class A { f() { return 1; } }
            var a = A();
            class A { g() { return 2; } }
            print(a.f() + a.g());
        "#;
        assert_eq!(output(source), "3\n");
        let (result, _, err) = run("class A {} class B {} class A < B {}");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("superclass"), "{err}");
    }

    #[test]
    fn asserts() {
        let (result, _, err) = run("assert 1 == 2;");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("assertion failed"), "{err}");
        assert_eq!(output("assert break 1 / 0;"), "");
        assert_eq!(output("assert break 1 < \"a\" \"different data types cannot be compared\";"), "");
        let (_, _, err) = run("assert break 1 / 0 \"something else\";");
        assert!(err.contains("different runtime error"), "{err}");
        let (_, _, err) = run("assert break 1 == 1;");
        assert!(err.contains("runtime error was expected"), "{err}");
    }

    #[test]
    fn errors_carry_location_and_stack() {
        let (result, _, err) = run("fun f() {\n  return 1 / 0;\n}\nf();");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.starts_with("test(2,"), "{err}");
        assert!(err.contains("result is not defined for '1 / 0'"), "{err}");
        assert!(err.contains("f() called at test(4,"), "{err}");
    }

    #[test]
    fn deep_recursion() {
        let (result, _, err) = run("fun f(n) { return f(n + 1); } f(0);");
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("too many nested calls"), "{err}");
        assert_eq!(output("fun f(n) { if (n == 0) return 0; return 1 + f(n - 1); } print(f(150));"), "150\n");
    }

    #[test]
    fn resolve_errors_are_compile_errors() {
        let (result, _, err) = run("return 1;");
        assert_eq!(result, EleuResult::CompileError);
        assert!(err.contains("top-level"), "{err}");
    }

    #[test]
    fn lists_are_fresh() {
        let source = r#"
            fun make() { return []; }
            var a = make();
            var b = make();
            push(a, 1);
            print(len(a));
            print(len(b));
            print(a == b);
        "#;
        assert_eq!(output(source), "1\n0\nfalse\n");
    }

    #[test]
    fn cancellation() {
        let options = Options {
            cancel: Some(Rc::new(|| true)),
            ..Default::default()
        };
        let (result, _, err) = run_with("print(1);", options);
        assert_eq!(result, EleuResult::RuntimeError);
        assert!(err.contains("execution cancelled"), "{err}");
    }

    #[test]
    fn host_natives() {
        let seen = Rc::new(RefCell::new(vec![]));
        let hook_seen = seen.clone();
        let (out, err) = (Capture::default(), Capture::default());
        let options = Options {
            out: out.sink(),
            err: err.sink(),
            on_state_change: Some(Rc::new(move |what: &str| {
                hook_seen.borrow_mut().push(what.to_string())
            })),
            ..Default::default()
        };
        let source = parse("twice(21); changed(\"door\");", "test", &options).unwrap();
        let mut interpreter = Interpreter::new(options);
        interpreter.define_native("twice", &["n"], |host, args| {
            host.print(&format!("{}", args[0].clone()));
            ops::binary(eleu_syntax::ast::BinOp::Star, args[0].clone(), args[0].clone())
        });
        interpreter.define_native("changed", &["what"], |host, args| {
            host.notify(&args[0].to_string());
            Ok(Value::Nil)
        });
        assert_matches!(interpreter.run(&source), EleuResult::Ok);
        assert_eq!(out.contents(), "21\n");
        assert_eq!(*seen.borrow(), vec!["door".to_string()]);
        assert!(interpreter.instruction_count() >= 2);
    }
}
