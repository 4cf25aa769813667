use std::{cell::RefCell, collections::HashMap, rc::Rc};

use eleu_compile::{
    environment::Env,
    error::{assertion_error, runtime_error, ErrorMsg, RuntimeError},
    ops,
    options::Options,
    report_runtime_error,
    resolve::{Locals, Resolver},
    stdlib,
    types::{super_method, Callable, Class, Func, Host, Instance, NativeFunc, Value},
    EleuResult,
};
use eleu_syntax::{
    ast::{FunctionDecl, NodeId, Source},
    span::Span,
};
use log::{debug, trace};

use crate::{
    chunk::{Chunk, Op},
    codegen::Generator,
    error::{self, vm_error},
};

/// Number of stack values shown per line of an instruction dump.
const DUMP_STACK_DEPTH: usize = 10;

#[derive(Debug)]
struct CallFrame {
    chunk: Rc<Chunk>,
    ip: usize,
    name: String,
    /// Where the call was made; `None` for the program itself.
    span: Option<Span>,
    /// Stack height below the frame's temporaries.
    base: usize,
}

/// An active `assert break`, restoring the machine state when the
/// expected error is raised.
#[derive(Debug)]
struct Handler {
    message: Option<String>,
    span: Option<Span>,
    catch: usize,
    frames: usize,
    envs: usize,
    env: Rc<RefCell<Env>>,
    stack: usize,
}

/// Stack machine executing chunks one instruction per `step`.
pub struct Vm {
    options: Options,
    globals: Rc<RefCell<Env>>,
    env: Rc<RefCell<Env>>,
    /// Environments of the callers, restored on return.
    envs: Vec<Rc<RefCell<Env>>>,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<Handler>,
    locals: Locals,
    chunks: HashMap<NodeId, Rc<Chunk>>,
    list_constructor: Value,
    instruction_count: usize,
    /// Set once a runtime error ends the program.
    failed: bool,
}

impl Vm {
    pub fn new(options: Options) -> Self {
        let globals = Env::new();
        stdlib::init(&mut globals.borrow_mut());
        Self {
            options,
            env: globals.clone(),
            globals,
            envs: vec![],
            stack: vec![],
            frames: vec![],
            handlers: vec![],
            locals: Locals::default(),
            chunks: HashMap::default(),
            list_constructor: Value::Callable(Callable::Native(stdlib::list_constructor())),
            instruction_count: 0,
            failed: false,
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

    /// Number of instructions executed so far.
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    /// Resolves and compiles `source`, then runs it to completion.
    pub fn run(&mut self, source: &Source) -> EleuResult {
        match self.start(source) {
            EleuResult::NextStep => self.interpret(),
            result => result,
        }
    }

    /// Resolves and compiles `source` and installs the program frame.
    /// Returns `NextStep` when the program is ready to be stepped.
    pub fn start(&mut self, source: &Source) -> EleuResult {
        trace!("Resolving {} items", source.items.len());
        let locals = match Resolver::new().resolve(&source.items) {
            Ok(locals) => locals,
            Err(e) => {
                self.options.write_err(&e.to_string());
                return EleuResult::CompileError;
            }
        };
        self.locals.extend(locals);

        let generator = Generator::new(&self.locals, self.list_constructor.clone());
        let chunk = match generator.generate("script", &source.items) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.options.write_err(&e.to_string());
                return EleuResult::CompileError;
            }
        };
        trace!("Executing chunk\n{chunk}");

        self.failed = false;
        self.stack.clear();
        self.handlers.clear();
        self.envs.clear();
        self.env = self.globals.clone();
        self.frames = vec![CallFrame {
            chunk: Rc::new(chunk),
            ip: 0,
            name: "script".to_string(),
            span: None,
            base: 0,
        }];
        EleuResult::NextStep
    }

    /// Steps until the program finishes or fails.
    pub fn interpret(&mut self) -> EleuResult {
        loop {
            if self.options.cancelled() {
                self.fail(&runtime_error(ErrorMsg::Cancelled, ""));
                return EleuResult::RuntimeError;
            }
            let result = self.step();
            if result != EleuResult::NextStep {
                return result;
            }
        }
    }

    /// Steps for as long as `predicate` holds and the program runs.
    pub fn step_while(&mut self, mut predicate: impl FnMut(&Vm) -> bool) -> EleuResult {
        loop {
            let result = self.step();
            if result != EleuResult::NextStep || !predicate(self) {
                return result;
            }
        }
    }

    /// Executes a single instruction.
    pub fn step(&mut self) -> EleuResult {
        let Some(frame) = self.frames.last_mut() else {
            return if self.failed {
                EleuResult::RuntimeError
            } else {
                EleuResult::Ok
            };
        };
        let chunk = frame.chunk.clone();
        let ip = frame.ip;
        let Some(op) = chunk.ops.get(ip) else {
            // Only the program chunk runs off its end
            self.frames.clear();
            return EleuResult::Ok;
        };
        frame.ip += 1;
        self.instruction_count += 1;
        debug!("{}", chunk.decode(ip));
        self.dump(&chunk, ip);

        let span = chunk.span(ip);
        let res = self.execute(op, span).or_else(|e| {
            let e = match span {
                Some(span) => e.at(span),
                None => e,
            };
            self.recover(e)
        });
        match res {
            Ok(()) => self.status(),
            Err(e) => {
                self.fail(&e);
                EleuResult::RuntimeError
            }
        }
    }

    fn status(&mut self) -> EleuResult {
        let finished = match self.frames.as_slice() {
            [program] => program.ip >= program.chunk.ops.len(),
            frames => frames.is_empty(),
        };
        if finished {
            self.frames.clear();
            return EleuResult::Ok;
        }
        EleuResult::NextStep
    }

    fn fail(&mut self, err: &RuntimeError) {
        let call_stack = self
            .frames
            .iter()
            .skip(1)
            .rev()
            .map(|frame| {
                let span = frame.span.as_ref().map(Span::to_string).unwrap_or_default();
                format!("{}() called at {span}", frame.name)
            })
            .collect::<Vec<String>>();
        report_runtime_error(&self.options, err, &call_stack);
        self.failed = true;
        self.frames.clear();
        self.handlers.clear();
    }

    fn dump(&self, chunk: &Chunk, ip: usize) {
        if self.options.dump.is_none() {
            return;
        }
        let top = self
            .stack
            .iter()
            .rev()
            .take(DUMP_STACK_DEPTH)
            .map(Value::repr)
            .collect::<Vec<String>>();
        self.options
            .write_dump(&format!("{:<40} | {}", chunk.decode(ip), top.join(", ")));
    }

    /// Hands `err` to the innermost `assert break`, unwinding to its
    /// state. Fails if no handler accepts the error.
    fn recover(&mut self, mut err: RuntimeError) -> Result<(), RuntimeError> {
        while let Some(handler) = self.handlers.pop() {
            self.frames.truncate(handler.frames);
            self.envs.truncate(handler.envs);
            self.env = handler.env;
            self.stack.truncate(handler.stack);
            match handler.message {
                Some(expected) if expected != err.msg => {
                    let wrong = assertion_error(ErrorMsg::WrongError, format!("'{}'", err.msg));
                    err = match &handler.span {
                        Some(span) => wrong.at(span),
                        None => wrong,
                    };
                }
                _ => {
                    debug!("Caught expected error: {err}");
                    self.jump(handler.catch);
                    return Ok(());
                }
            }
        }
        Err(err)
    }

    fn execute(&mut self, op: &Op, span: Option<&Span>) -> Result<(), RuntimeError> {
        match op {
            Op::Constant(value) => self.stack.push(value.clone()),
            Op::Pop => {
                self.pop(op)?;
            }
            Op::DeclareVar(name) => {
                let value = self.pop(op)?;
                self.env.borrow_mut().declare(name, value)?;
            }
            Op::Function(decl) => {
                let func = Func::new(decl.clone(), self.env.clone(), false);
                self.env
                    .borrow_mut()
                    .define(&decl.name, Value::Callable(Callable::Function(func)));
            }
            Op::Class { name, methods } => {
                let has_parent = self.pop(op)? == Value::Boolean(true);
                let superclass = if has_parent { Some(self.pop(op)?) } else { None };
                Class::declare(&self.env, name, superclass, methods)?;
            }
            Op::LookupVar { name, depth } => {
                let value = match depth {
                    Some(depth) => self.env.borrow().get_at_depth(name, *depth)?,
                    None => self.globals.borrow().get(name)?,
                };
                self.stack.push(value);
            }
            Op::AssignVar { name, depth } => {
                let value = self.peek(op)?.clone();
                match depth {
                    Some(depth) => self.env.borrow_mut().assign_at_depth(name, value, *depth)?,
                    None => self.globals.borrow_mut().assign(name, value)?,
                }
            }
            Op::GetField(field) => match self.pop(op)? {
                Value::Instance(instance) => {
                    let value = instance.get(field)?;
                    self.stack.push(value);
                }
                other => return Err(runtime_error(ErrorMsg::InvalidObject, other.repr())),
            },
            Op::SetField(field) => {
                let value = self.pop(op)?;
                match self.pop(op)? {
                    Value::Instance(instance) => {
                        instance.set(field, value.clone());
                        self.stack.push(value);
                    }
                    other => return Err(runtime_error(ErrorMsg::InvalidObject, other.repr())),
                }
            }
            Op::GetSuper { method, depth } => {
                let value = super_method(&self.env.borrow(), *depth, method)?;
                self.stack.push(value);
            }
            Op::Unary(unary) => {
                let value = self.pop(op)?;
                self.stack.push(ops::unary(*unary, value)?);
            }
            Op::Binary(binary) => {
                let right = self.pop(op)?;
                let left = self.pop(op)?;
                self.stack.push(ops::binary(*binary, left, right)?);
            }
            Op::Logical(logical) => {
                let right = self.pop(op)?;
                let left = self.pop(op)?;
                self.stack.push(ops::logical(*logical, left, right)?);
            }
            Op::Jump(target) => self.jump(*target),
            Op::JumpIfFalse(target) => {
                if !ops::truthy(self.peek(op)?)? {
                    self.jump(*target);
                }
            }
            Op::RepeatTest(target) => {
                let count = self.peek(op)?;
                let remaining = match count {
                    Value::Number(n) => n.as_int().filter(|&n| n >= 0),
                    _ => None,
                }
                .ok_or_else(|| runtime_error(ErrorMsg::InvalidRepeatCount, count.repr()))?;
                if remaining == 0 {
                    self.jump(*target);
                }
            }
            Op::EnterScope => self.env = Env::with_parent(self.env.clone()),
            Op::LeaveScope(n) => {
                for _ in 0..*n {
                    let parent = self.env.borrow().parent.clone();
                    self.env = parent.ok_or_else(|| vm_error(error::ErrorMsg::NoParentScope, op))?;
                }
            }
            Op::Call(argc) => {
                let callee = self.pop(op)?;
                if self.stack.len() < *argc {
                    return Err(vm_error(error::ErrorMsg::EmptyStack, op));
                }
                let args = self.stack.split_off(self.stack.len() - argc);
                self.call(callee, args, span)?;
            }
            Op::Return => {
                let value = self.pop(op)?;
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| vm_error(error::ErrorMsg::NoFrame, op))?;
                self.stack.truncate(frame.base);
                self.env = self
                    .envs
                    .pop()
                    .ok_or_else(|| vm_error(error::ErrorMsg::NoFrame, op))?;
                self.stack.push(value);
            }
            Op::Assert(message) => {
                let value = self.pop(op)?;
                if !ops::truthy(&value)? {
                    let ctx = message
                        .as_ref()
                        .map(|m| format!("('{m}')"))
                        .unwrap_or_default();
                    return Err(assertion_error(ErrorMsg::AssertionFailed, ctx));
                }
            }
            Op::AssertErrorBegin { message, catch } => self.handlers.push(Handler {
                message: message.clone(),
                span: span.cloned(),
                catch: *catch,
                frames: self.frames.len(),
                envs: self.envs.len(),
                env: self.env.clone(),
                stack: self.stack.len(),
            }),
            Op::AssertErrorEnd => {
                // Still guarded by the handler
                let value = self.pop(op)?;
                ops::truthy(&value)?;
                let err = assertion_error(ErrorMsg::ErrorExpected, "");
                return Err(match self.handlers.pop().and_then(|h| h.span) {
                    Some(span) => err.at(&span),
                    None => err,
                });
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: Option<&Span>,
    ) -> Result<(), RuntimeError> {
        let Value::Callable(callable) = callee else {
            return Err(runtime_error(ErrorMsg::InvalidCallExpr, callee.repr()));
        };
        callable.check_arity(args.len())?;
        match callable {
            Callable::Native(func) => {
                let value = (func.body)(self, args)?;
                self.stack.push(value);
            }
            Callable::Function(func) => self.push_frame(&func, args, span)?,
            Callable::Class(class) => {
                let instance = Instance::new(class.clone());
                match class.find_method("init") {
                    // The initialiser chunk returns the instance
                    Some(init) => self.push_frame(&init.bind(instance), args, span)?,
                    None => self.stack.push(Value::Instance(instance)),
                }
            }
        }
        Ok(())
    }

    fn push_frame(
        &mut self,
        func: &Func,
        args: Vec<Value>,
        span: Option<&Span>,
    ) -> Result<(), RuntimeError> {
        // The program frame does not count as a call
        if self.frames.len() > self.options.max_call_depth {
            return Err(runtime_error(ErrorMsg::TooManyNestedCalls, ""));
        }
        let chunk = self.chunk_for(&func.decl)?;
        let env = Env::with_parent(func.env.clone());
        for (param, arg) in func.decl.params.iter().zip(args) {
            env.borrow_mut().define(param, arg);
        }
        self.envs.push(std::mem::replace(&mut self.env, env));
        self.frames.push(CallFrame {
            chunk,
            ip: 0,
            name: func.name().to_string(),
            span: span.cloned(),
            base: self.stack.len(),
        });
        Ok(())
    }

    /// Function bodies are compiled on their first call.
    fn chunk_for(&mut self, decl: &FunctionDecl) -> Result<Rc<Chunk>, RuntimeError> {
        if let Some(chunk) = self.chunks.get(&decl.id) {
            return Ok(chunk.clone());
        }
        let generator = Generator::new(&self.locals, self.list_constructor.clone());
        let chunk = Rc::new(generator.generate_function(decl)?);
        trace!("Compiled function\n{chunk}");
        self.chunks.insert(decl.id, chunk.clone());
        Ok(chunk)
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = target;
        }
    }

    fn pop(&mut self, op: &Op) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| vm_error(error::ErrorMsg::EmptyStack, op))
    }

    fn peek(&self, op: &Op) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| vm_error(error::ErrorMsg::EmptyStack, op))
    }
}

impl Host for Vm {
    fn print(&mut self, text: &str) {
        self.options.write_out(text);
    }

    fn notify(&mut self, what: &str) {
        self.options.notify(what);
    }
}
