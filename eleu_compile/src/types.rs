use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{Debug, Display},
    rc::Rc,
};

use eleu_syntax::ast::{FunctionDecl, Literal};
use log::debug;

use crate::{
    environment::Env,
    error::{runtime_error, ErrorMsg, RuntimeError},
};

/// A finite double. Construction rejects NaN and the infinities.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Number(f64);

impl Number {
    pub fn new(n: f64) -> Option<Self> {
        n.is_finite().then_some(Self(n))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The value as an integer, if it has no fractional part.
    pub fn as_int(self) -> Option<i64> {
        (self.0.fract() == 0.0 && self.0.abs() < i64::MAX as f64).then_some(self.0 as i64)
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Avoid printing `-0`
        if self.0 == 0.0 {
            return f.write_str("0");
        }
        Display::fmt(&self.0, f)
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Self(n as f64)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(Number),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Callable(Callable),
    Instance(Rc<Instance>),
}

impl Value {
    pub fn from_literal(lit: &Literal) -> Result<Self, RuntimeError> {
        Ok(match lit {
            Literal::Nil => Self::Nil,
            Literal::Boolean(b) => Self::Boolean(*b),
            Literal::Str(s) => Self::Str(s.clone()),
            Literal::Number(n) => Self::Number(
                Number::new(*n).ok_or_else(|| runtime_error(ErrorMsg::ResultTooLarge, n))?,
            ),
        })
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(values)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Self::Nil => "undefined".to_string(),
            Self::Boolean(_) => "boolean".to_string(),
            Self::Number(_) => "number".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::List(_) => "list".to_string(),
            Self::Callable(Callable::Class(c)) => format!("metaclass {}", c.name),
            Self::Callable(_) => "function".to_string(),
            Self::Instance(i) => format!("class {}", i.class.name),
        }
    }

    /// Display form used in diagnostics, with strings quoted.
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("\"{s}\""),
            _ => self.to_string(),
        }
    }
}

/// Numbers, strings, booleans and nil compare by value, everything
/// else by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Callable(a), Self::Callable(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => Display::fmt(b, f),
            Self::Number(n) => Display::fmt(n, f),
            Self::Str(s) => f.write_str(s),
            Self::List(l) => {
                let items = l
                    .borrow()
                    .iter()
                    .map(Value::repr)
                    .collect::<Vec<String>>();
                write!(f, "[{}]", items.join(", "))
            }
            Self::Callable(c) => Display::fmt(c, f),
            Self::Instance(i) => Display::fmt(i, f),
        }
    }
}

/// Services an executor offers to native functions.
pub trait Host {
    /// Writes one line to the program output.
    fn print(&mut self, text: &str);
    /// Forwards a state change to the embedding host, if it listens.
    fn notify(&mut self, what: &str);
}

pub type NativeFn = Rc<dyn Fn(&mut dyn Host, Vec<Value>) -> Result<Value, RuntimeError>>;

#[derive(Clone)]
pub struct NativeFunc {
    pub name: String,
    pub args: Vec<String>,
    pub body: NativeFn,
}

impl Debug for NativeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunc")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl Display for NativeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "native fun {}({})", self.name, self.args.join(", "))
    }
}

/// A user function together with the environment it closes over.
#[derive(Clone)]
pub struct Func {
    pub decl: Rc<FunctionDecl>,
    pub env: Rc<RefCell<Env>>,
    pub is_init: bool,
}

impl Func {
    pub fn new(decl: Rc<FunctionDecl>, env: Rc<RefCell<Env>>, is_init: bool) -> Self {
        Self { decl, env, is_init }
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    /// Returns a copy of the method whose closure defines `this`.
    pub fn bind(&self, instance: Rc<Instance>) -> Func {
        let env = Env::with_parent(self.env.clone());
        env.borrow_mut().define("this", Value::Instance(instance));
        Func::new(self.decl.clone(), env, self.is_init)
    }
}

// The closure env usually contains the function itself, so only
// identifying fields are printed
impl Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.decl.name)
            .field("params", &self.decl.params)
            .field("is_init", &self.is_init)
            .finish()
    }
}

impl Display for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fun {}({})", self.decl.name, self.decl.params.join(", "))
    }
}

pub struct Class {
    pub name: String,
    pub parent: Option<Rc<Class>>,
    methods: RefCell<HashMap<String, Func>>,
}

impl Class {
    pub fn new(name: &str, parent: Option<Rc<Class>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            parent,
            methods: RefCell::default(),
        })
    }

    /// Adds or replaces a method. Reopening a class goes through here too.
    pub fn set_method(&self, name: &str, method: Func) {
        self.methods.borrow_mut().insert(name.to_string(), method);
    }

    /// Looks the method up on this class, then along the superclass chain.
    pub fn find_method(&self, name: &str) -> Option<Func> {
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(method.clone());
        }
        self.parent.as_ref().and_then(|p| p.find_method(name))
    }

    pub fn arity(&self) -> usize {
        self.find_method("init").map_or(0, |init| init.arity())
    }

    /// Executes a class declaration in `env`. A class already defined in
    /// `env` itself is reopened and gets the new methods, provided the
    /// superclass is the same. Any other value of that name is an error.
    pub fn declare(
        env: &Rc<RefCell<Env>>,
        name: &str,
        superclass: Option<Value>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<(), RuntimeError> {
        let superclass = match superclass {
            Some(Value::Callable(Callable::Class(class))) => Some(class),
            Some(other) => return Err(runtime_error(ErrorMsg::InvalidSuperclass, other.repr())),
            None => None,
        };

        let existing = env.borrow().get_at_depth(name, 0).ok();
        let class = match existing {
            Some(Value::Callable(Callable::Class(class))) => {
                let same_parent = match (&class.parent, &superclass) {
                    (None, None) => true,
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    _ => false,
                };
                if !same_parent {
                    return Err(runtime_error(ErrorMsg::SuperclassChanged, format!("'{name}'")));
                }
                debug!("Reopening class {name}");
                class
            }
            Some(_) => return Err(runtime_error(ErrorMsg::AlreadyDefined, format!("'{name}'"))),
            None => Class::new(name, superclass.clone()),
        };

        let method_env = match &superclass {
            Some(superclass) => {
                let method_env = Env::with_parent(env.clone());
                method_env
                    .borrow_mut()
                    .define("super", Value::Callable(Callable::Class(superclass.clone())));
                method_env
            }
            None => env.clone(),
        };
        for method in methods {
            let is_init = method.name == "init";
            class.set_method(&method.name, Func::new(method.clone(), method_env.clone(), is_init));
        }

        env.borrow_mut()
            .define(name, Value::Callable(Callable::Class(class)));
        Ok(())
    }
}

/// Resolves `super.method` where `super` sits `distance` scopes above
/// `env`, binding the method to the `this` of the scope just below.
pub fn super_method(env: &Env, distance: usize, method: &str) -> Result<Value, RuntimeError> {
    let superclass = env.get_at_depth("super", distance)?;
    let this = match distance.checked_sub(1) {
        Some(d) => env.get_at_depth("this", d)?,
        None => return Err(runtime_error(ErrorMsg::MisresolvedVar, "'this'")),
    };
    let (Value::Callable(Callable::Class(superclass)), Value::Instance(this)) = (superclass, this)
    else {
        return Err(runtime_error(ErrorMsg::MisresolvedVar, "'super'"));
    };
    superclass
        .find_method(method)
        .map(|m| Value::Callable(Callable::Function(m.bind(this))))
        .ok_or_else(|| runtime_error(ErrorMsg::UndefinedMember, format!("'{method}'")))
}

impl Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .finish()
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "class {}", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum Callable {
    Native(NativeFunc),
    Function(Func),
    Class(Rc<Class>),
}

impl Callable {
    /// The number of arguments a call must supply. Natives check their
    /// own arguments and report `None`.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Native(_) => None,
            Self::Function(f) => Some(f.arity()),
            Self::Class(c) => Some(c.arity()),
        }
    }

    pub fn check_arity(&self, found: usize) -> Result<(), RuntimeError> {
        match self.arity() {
            Some(expected) if expected != found => Err(runtime_error(
                ErrorMsg::ArityMismatch,
                format!("for '{}': expected {expected}, found {found}", self.name()),
            )),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Native(f) => &f.name,
            Self::Function(f) => f.name(),
            Self::Class(c) => &c.name,
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(&a.body, &b.body),
            (Self::Function(a), Self::Function(b)) => {
                Rc::ptr_eq(&a.decl, &b.decl) && Rc::ptr_eq(&a.env, &b.env)
            }
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(n) => Display::fmt(n, f),
            Self::Function(func) => Display::fmt(func, f),
            Self::Class(c) => Display::fmt(c, f),
        }
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    fields: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Rc<Self> {
        Rc::new(Self {
            class,
            fields: RefCell::default(),
        })
    }

    /// Fields shadow methods; methods come back bound to `self`.
    pub fn get(self: &Rc<Self>, member: &str) -> Result<Value, RuntimeError> {
        if let Some(value) = self.fields.borrow().get(member) {
            return Ok(value.clone());
        }
        if let Some(method) = self.class.find_method(member) {
            return Ok(Value::Callable(Callable::Function(method.bind(self.clone()))));
        }
        Err(runtime_error(ErrorMsg::UndefinedMember, format!("'{member}'")))
    }

    pub fn set(&self, field: &str, value: Value) {
        self.fields.borrow_mut().insert(field.to_string(), value);
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .finish()
    }
}

impl Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} instance", self.class.name)
    }
}
