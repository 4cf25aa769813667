use std::fmt::Display;

use eleu_compile::error::{ErrorKind, RuntimeError};

/// Internal VM faults. Correctly generated code never raises them.
#[derive(Debug)]
pub enum ErrorMsg {
    EmptyStack,
    NoFrame,
    NoParentScope,
}

impl Display for ErrorMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::EmptyStack => "stack is empty for operation",
            Self::NoFrame => "no active call frame for operation",
            Self::NoParentScope => "cannot leave the global scope in operation",
        })
    }
}

pub fn vm_error(msg: ErrorMsg, ctx: impl Display) -> RuntimeError {
    RuntimeError::new(ErrorKind::Runtime, format!("{msg} {ctx}"))
}
