//! Operator semantics shared by the tree-walking interpreter and the VM.

use std::cmp::Ordering;

use eleu_syntax::ast::{BinOp, LogicalOp, UnaryOp};

use crate::{
    error::{runtime_error, ErrorMsg, RuntimeError},
    types::{Number, Value},
};

/// Conditions must be booleans; there is no implicit truthiness.
pub fn truthy(value: &Value) -> Result<bool, RuntimeError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        _ => Err(runtime_error(ErrorMsg::ExpectedBoolean, value.repr())),
    }
}

pub fn unary(op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
    match op {
        UnaryOp::Bang => Ok(Value::Boolean(!truthy(&value)?)),
        UnaryOp::Minus => match value {
            Value::Number(n) => number(-n.value(), || format!("-{n}")),
            _ => Err(runtime_error(ErrorMsg::ExpectedNumber, value.repr())),
        },
    }
}

/// Both operands are already evaluated and both must be booleans.
pub fn logical(op: LogicalOp, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let left = truthy(&lhs)?;
    let right = truthy(&rhs)?;
    Ok(Value::Boolean(match op {
        LogicalOp::And => left && right,
        LogicalOp::Or => left || right,
    }))
}

pub fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match op {
        BinOp::EqualEqual => Ok(Value::Boolean(lhs == rhs)),
        BinOp::BangEqual => Ok(Value::Boolean(lhs != rhs)),
        BinOp::Greater => Ok(Value::Boolean(compare(&lhs, &rhs)? == Ordering::Greater)),
        BinOp::GreaterEqual => Ok(Value::Boolean(compare(&lhs, &rhs)? != Ordering::Less)),
        BinOp::Less => Ok(Value::Boolean(compare(&lhs, &rhs)? == Ordering::Less)),
        BinOp::LessEqual => Ok(Value::Boolean(compare(&lhs, &rhs)? != Ordering::Greater)),
        BinOp::Plus => add(lhs, rhs),
        BinOp::Minus | BinOp::Star | BinOp::Slash | BinOp::Modulo => {
            let (Value::Number(l), Value::Number(r)) = (&lhs, &rhs) else {
                let culprit = if matches!(lhs, Value::Number(_)) { &rhs } else { &lhs };
                return Err(runtime_error(ErrorMsg::ExpectedNumber, culprit.repr()));
            };
            let (a, b) = (l.value(), r.value());
            let ctx = || format!("'{l} {op} {r}'");
            // Division by zero is undefined rather than infinite
            if matches!(op, BinOp::Slash | BinOp::Modulo) && b == 0.0 {
                return Err(runtime_error(ErrorMsg::ResultNotDefined, ctx()));
            }
            number(
                match op {
                    BinOp::Minus => a - b,
                    BinOp::Star => a * b,
                    BinOp::Slash => a / b,
                    _ => a % b,
                },
                ctx,
            )
        }
    }
}

fn add(lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => {
            number(l.value() + r.value(), || format!("'{l} + {r}'"))
        }
        (Value::Str(l), Value::Str(r)) => Ok(Value::Str(l + &r)),
        (Value::Str(l), Value::Number(r)) => Ok(Value::Str(format!("{l}{r}"))),
        (Value::Number(l), Value::Str(r)) => Ok(Value::Str(format!("{l}{r}"))),
        (l, r) => Err(runtime_error(
            ErrorMsg::ExpectedNumOrStr,
            format!("{} + {}", l.repr(), r.repr()),
        )),
    }
}

/// Orders two numbers or two strings (ordinally).
pub fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => l
            .partial_cmp(r)
            .ok_or_else(|| runtime_error(ErrorMsg::IncomparableTypes, "")),
        (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
        _ => Err(runtime_error(ErrorMsg::IncomparableTypes, "")),
    }
}

/// Wraps an arithmetic result, rejecting NaN and the infinities.
pub fn number(n: f64, ctx: impl FnOnce() -> String) -> Result<Value, RuntimeError> {
    if n.is_nan() {
        return Err(runtime_error(ErrorMsg::ResultNotDefined, ctx()));
    }
    Number::new(n)
        .map(Value::Number)
        .ok_or_else(|| runtime_error(ErrorMsg::ResultTooLarge, ctx()))
}
