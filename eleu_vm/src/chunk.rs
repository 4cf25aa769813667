use std::{fmt::Display, rc::Rc};

use eleu_compile::types::Value;
use eleu_syntax::{
    ast::{BinOp, FunctionDecl, LogicalOp, UnaryOp},
    span::Span,
};

#[derive(Clone, Debug)]
pub enum Op {
    Constant(Value),
    Pop,
    /// Pops the initial value and declares a `var` in the current scope.
    DeclareVar(String),
    /// Defines a function closing over the current scope.
    Function(Rc<FunctionDecl>),
    /// Pops a flag and, if set, the superclass, then declares the class.
    Class {
        name: String,
        methods: Vec<Rc<FunctionDecl>>,
    },
    /// `depth` is `None` for globals.
    LookupVar {
        name: String,
        depth: Option<usize>,
    },
    /// Assigns the top of the stack, leaving it in place.
    AssignVar {
        name: String,
        depth: Option<usize>,
    },
    GetField(String),
    SetField(String),
    GetSuper {
        method: String,
        depth: usize,
    },
    Unary(UnaryOp),
    Binary(BinOp),
    Logical(LogicalOp),
    Jump(usize),
    /// Jumps if the top of the stack is `false`, without popping it.
    JumpIfFalse(usize),
    /// Checks the repeat counter on top of the stack and jumps once it
    /// reaches zero.
    RepeatTest(usize),
    EnterScope,
    LeaveScope(usize),
    /// Pops the callee, then its arguments.
    Call(usize),
    Return,
    Assert(Option<String>),
    /// Installs a handler that resumes at `catch` when a runtime error is
    /// raised before the matching `AssertErrorEnd`.
    AssertErrorBegin {
        message: Option<String>,
        catch: usize,
    },
    AssertErrorEnd,
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "CONSTANT {}", v.repr()),
            Self::Pop => f.write_str("POP"),
            Self::DeclareVar(name) => write!(f, "DECLARE_VAR {name}"),
            Self::Function(decl) => write!(f, "FUNCTION {}", decl.name),
            Self::Class { name, methods } => write!(f, "CLASS {name} ({} methods)", methods.len()),
            Self::LookupVar { name, depth } => write!(f, "LOOKUP_VAR {name}{}", at(depth)),
            Self::AssignVar { name, depth } => write!(f, "ASSIGN_VAR {name}{}", at(depth)),
            Self::GetField(field) => write!(f, "GET_FIELD {field}"),
            Self::SetField(field) => write!(f, "SET_FIELD {field}"),
            Self::GetSuper { method, depth } => write!(f, "GET_SUPER {method}@{depth}"),
            Self::Unary(op) => write!(f, "UNARY {op}"),
            Self::Binary(op) => write!(f, "BINARY {op}"),
            Self::Logical(op) => write!(f, "LOGICAL {op}"),
            Self::Jump(target) => write!(f, "JUMP {target:0>4}"),
            Self::JumpIfFalse(target) => write!(f, "JUMP_IF_FALSE {target:0>4}"),
            Self::RepeatTest(target) => write!(f, "REPEAT_TEST {target:0>4}"),
            Self::EnterScope => f.write_str("ENTER_SCOPE"),
            Self::LeaveScope(n) => write!(f, "LEAVE_SCOPE {n}"),
            Self::Call(n) => write!(f, "CALL {n}"),
            Self::Return => f.write_str("RETURN"),
            Self::Assert(_) => f.write_str("ASSERT"),
            Self::AssertErrorBegin { catch, .. } => write!(f, "ASSERT_ERROR_BEGIN {catch:0>4}"),
            Self::AssertErrorEnd => f.write_str("ASSERT_ERROR_END"),
        }
    }
}

fn at(depth: &Option<usize>) -> String {
    depth.map(|d| format!("@{d}")).unwrap_or_default()
}

/// A compiled function body or program, with the source span of every
/// instruction.
#[derive(Debug, Default, Clone)]
pub struct Chunk {
    pub name: String,
    pub ops: Vec<Op>,
    pub spans: Vec<Option<Span>>,
}

impl Chunk {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Appends `op` and returns its offset.
    pub fn add_op(&mut self, op: Op, span: Option<&Span>) -> usize {
        self.ops.push(op);
        self.spans.push(span.cloned());
        self.ops.len() - 1
    }

    /// Points the jump at `offset` to `target`.
    pub fn patch(&mut self, offset: usize, target: usize) {
        match self.ops.get_mut(offset) {
            Some(
                Op::Jump(t)
                | Op::JumpIfFalse(t)
                | Op::RepeatTest(t)
                | Op::AssertErrorBegin { catch: t, .. },
            ) => *t = target,
            op => log::warn!("Cannot patch {op:?} at {offset}"),
        }
    }

    pub fn span(&self, offset: usize) -> Option<&Span> {
        self.spans.get(offset).and_then(Option::as_ref)
    }

    /// Decodes the instruction at the given offset and pretty prints it
    pub fn decode(&self, offset: usize) -> String {
        match self.ops.get(offset) {
            Some(op) => format!("{offset:0>4} {op}"),
            None => format!("{offset:0>4} invalid offset"),
        }
    }
}

impl Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        for offset in 0..self.ops.len() {
            writeln!(f, "{}", self.decode(offset))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_and_decode() {
        let mut chunk = Chunk::new("test");
        chunk.add_op(Op::Constant(Value::Boolean(true)), None);
        let jump = chunk.add_op(Op::JumpIfFalse(usize::MAX), None);
        chunk.add_op(Op::Pop, None);
        chunk.patch(jump, 3);

        assert_eq!(chunk.decode(0), "0000 CONSTANT true");
        assert_eq!(chunk.decode(1), "0001 JUMP_IF_FALSE 0003");
        assert_eq!(chunk.decode(2), "0002 POP");
        assert_eq!(chunk.decode(9), "0009 invalid offset");
        assert!(chunk.span(0).is_none());
        assert_eq!(
            chunk.to_string(),
            "=== test ===\n0000 CONSTANT true\n0001 JUMP_IF_FALSE 0003\n0002 POP\n"
        );
    }
}
