use std::fmt::Display;

use eleu_syntax::span::Span;

use crate::types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Static error found by the resolver before execution.
    Resolve,
    Runtime,
    /// A failed `assert`.
    Assertion,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{}{}", location(.span), .msg)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub msg: String,
}

fn location(span: &Option<Span>) -> String {
    span.as_ref().map(|s| format!("{s}: ")).unwrap_or_default()
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, msg: impl Display) -> Self {
        Self {
            kind,
            span: None,
            msg: msg.to_string(),
        }
    }

    /// Attaches `span` unless the error already carries a location.
    pub fn at(mut self, span: &Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span.clone());
        }
        self
    }
}

/// Non-local control flow of the tree-walking interpreter.
#[derive(Debug)]
pub enum Exception {
    Error(RuntimeError),
    Return(Value),
    Break,
    Continue,
}

impl From<RuntimeError> for Exception {
    fn from(e: RuntimeError) -> Self {
        Self::Error(e)
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => e.fmt(f),
            Self::Return(val) => val.fmt(f),
            Self::Break => f.write_str("break"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

#[derive(Debug)]
pub enum ErrorMsg {
    // Resolution errors
    SelfInitialiser,
    Redeclaration,
    ReturnOutsideFunction,
    ReturnFromInit,
    ThisOutsideClass,
    SuperOutsideClass,
    SuperWithoutParent,
    SelfInheritance,
    LoopControlOutsideLoop,
    // Runtime errors
    ExpectedBoolean,
    ExpectedNumber,
    ExpectedNumOrStr,
    IncomparableTypes,
    ResultNotDefined,
    ResultTooLarge,
    InvalidCallExpr,
    ArityMismatch,
    TooManyNestedCalls,
    InvalidObject,
    UndefinedMember,
    InvalidSuperclass,
    SuperclassChanged,
    InvalidRepeatCount,
    InvalidArgument,
    Cancelled,
    // Assertions
    AssertionFailed,
    ErrorExpected,
    WrongError,
    // Memory errors
    UndefinedVar,
    MisresolvedVar,
    AlreadyDefined,
}

impl Display for ErrorMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SelfInitialiser => "cannot read a local variable in its own initialiser",
            Self::Redeclaration => "a variable with this name already exists in this scope",
            Self::ReturnOutsideFunction => "cannot return from top-level code",
            Self::ReturnFromInit => "cannot return a value from an initialiser",
            Self::ThisOutsideClass => "cannot use 'this' outside of a class",
            Self::SuperOutsideClass => "cannot use 'super' outside of a class",
            Self::SuperWithoutParent => "cannot use 'super' in a class with no superclass",
            Self::SelfInheritance => "a class cannot inherit from itself",
            Self::LoopControlOutsideLoop => "only allowed inside a loop",
            Self::ExpectedBoolean => "a boolean value is expected, found",
            Self::ExpectedNumber => "expected numeric operand, found",
            Self::ExpectedNumOrStr => "expected two numbers, or a string and a number or string, found",
            Self::IncomparableTypes => "different data types cannot be compared",
            Self::ResultNotDefined => "result is not defined for",
            Self::ResultTooLarge => "result is too large for",
            Self::InvalidCallExpr => "can only call functions and classes, found",
            Self::ArityMismatch => "wrong number of arguments",
            Self::TooManyNestedCalls => "too many nested calls",
            Self::InvalidObject => "only instances have properties, found",
            Self::UndefinedMember => "undefined property",
            Self::InvalidSuperclass => "superclass must be a class, found",
            Self::SuperclassChanged => "a reopened class must keep its superclass",
            Self::InvalidRepeatCount => "repeat expects a natural number, found",
            Self::InvalidArgument => "invalid argument",
            Self::Cancelled => "execution cancelled",
            Self::AssertionFailed => "assertion failed",
            Self::ErrorExpected => "a runtime error was expected",
            Self::WrongError => "a different runtime error was expected, found",
            Self::UndefinedVar => "undefined variable",
            Self::MisresolvedVar => "misresolved variable",
            Self::AlreadyDefined => "variable is already declared in this scope",
        })
    }
}

fn compose(msg: ErrorMsg, ctx: impl Display) -> String {
    let ctx = ctx.to_string();
    if ctx.is_empty() {
        msg.to_string()
    } else {
        format!("{msg} {ctx}")
    }
}

pub fn runtime_error(msg: ErrorMsg, ctx: impl Display) -> RuntimeError {
    RuntimeError::new(ErrorKind::Runtime, compose(msg, ctx))
}

pub fn resolution_error(msg: ErrorMsg, ctx: impl Display) -> RuntimeError {
    RuntimeError::new(ErrorKind::Resolve, compose(msg, ctx))
}

pub fn assertion_error(msg: ErrorMsg, ctx: impl Display) -> RuntimeError {
    RuntimeError::new(ErrorKind::Assertion, compose(msg, ctx))
}
