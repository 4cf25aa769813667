use std::{
    cell::RefCell,
    f64::consts::PI,
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    environment::Env,
    error::{runtime_error, ErrorMsg, RuntimeError},
    ops,
    types::{Callable, Host, NativeFunc, Number, Value},
};

/// Name of the hidden constructor the VM calls for list literals.
pub const LIST_CONSTRUCTOR: &str = "list";

pub fn native<F>(name: &str, args: &[&str], body: F) -> NativeFunc
where
    F: Fn(&mut dyn Host, Vec<Value>) -> Result<Value, RuntimeError> + 'static,
{
    NativeFunc {
        name: name.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        body: Rc::new(body),
    }
}

/// Defines the native library and the global constants in `env`.
pub fn init(env: &mut Env) {
    for func in natives() {
        let name = func.name.clone();
        env.define(&name, Value::Callable(Callable::Native(func)));
    }
    env.define("PI", Value::Number(num(PI)));
}

/// Builds a fresh list from its arguments.
pub fn list_constructor() -> NativeFunc {
    native(LIST_CONSTRUCTOR, &["...elements"], |_, args| Ok(Value::list(args)))
}

fn natives() -> Vec<NativeFunc> {
    vec![
        native("print", &["value"], |host, args| {
            check_arg_len("print", &args, 1, 1)?;
            host.print(&args[0].to_string());
            Ok(Value::Nil)
        }),
        native("clock", &[], |_, args| {
            check_arg_len("clock", &args, 0, 0)?;
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            Ok(Value::Number(num(secs)))
        }),
        native("random", &[], |_, args| {
            check_arg_len("random", &args, 0, 0)?;
            Ok(Value::Number(num(rand::random::<f64>())))
        }),
        native("typeof", &["value"], |_, args| {
            check_arg_len("typeof", &args, 1, 1)?;
            Ok(Value::Str(args[0].type_name()))
        }),
        native("toString", &["value"], |_, args| {
            check_arg_len("toString", &args, 1, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }),
        math("sqrt", f64::sqrt),
        math("abs", f64::abs),
        math("acos", f64::acos),
        math("asin", f64::asin),
        math("ceil", f64::ceil),
        math("cos", f64::cos),
        math("floor", f64::floor),
        math("log10", f64::log10),
        math("sin", f64::sin),
        native("pow", &["base", "exp"], |_, args| {
            check_arg_len("pow", &args, 2, 2)?;
            let base = num_arg("pow", &args, 0)?;
            let exp = num_arg("pow", &args, 1)?;
            ops::number(base.powf(exp), || format!("'pow({base}, {exp})'"))
        }),
        native("toFixed", &["value", "digits"], |_, args| {
            check_arg_len("toFixed", &args, 2, 2)?;
            let x = num_arg("toFixed", &args, 0)?;
            let digits = int_arg("toFixed", &args, 1)?;
            if !(0..=20).contains(&digits) {
                return Err(invalid_arg("toFixed", "digits must be between 0 and 20"));
            }
            Ok(Value::Str(format!("{x:.*}", digits as usize)))
        }),
        native("parseInt", &["text"], |_, args| {
            check_arg_len("parseInt", &args, 1, 1)?;
            let n = parse_number("parseInt", str_arg("parseInt", &args, 0)?)?;
            if n.as_int().is_none() {
                return Err(invalid_arg("parseInt", "not an integer"));
            }
            Ok(Value::Number(n))
        }),
        native("parseFloat", &["text"], |_, args| {
            check_arg_len("parseFloat", &args, 1, 1)?;
            parse_number("parseFloat", str_arg("parseFloat", &args, 0)?).map(Value::Number)
        }),
        native("parseNum", &["text"], |_, args| {
            check_arg_len("parseNum", &args, 1, 1)?;
            parse_number("parseNum", str_arg("parseNum", &args, 0)?).map(Value::Number)
        }),
        native("len", &["value"], |_, args| {
            check_arg_len("len", &args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Number(Number::from(s.chars().count()))),
                Value::List(l) => Ok(Value::Number(Number::from(l.borrow().len()))),
                other => Err(invalid_arg("len", format!("expected string or list, found {}", other.repr()))),
            }
        }),
        native("charAt", &["text", "index"], |_, args| {
            check_arg_len("charAt", &args, 2, 2)?;
            let chars: Vec<char> = str_arg("charAt", &args, 0)?.chars().collect();
            let idx = index_arg("charAt", &args, 1, chars.len())?;
            chars
                .get(idx)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| invalid_arg("charAt", format!("index {idx} is out of range")))
        }),
        native("substr", &["text", "start", "length"], |_, args| {
            check_arg_len("substr", &args, 2, 3)?;
            let chars: Vec<char> = str_arg("substr", &args, 0)?.chars().collect();
            let start = index_arg("substr", &args, 1, chars.len())?;
            let len = if args.len() > 2 {
                index_arg("substr", &args, 2, chars.len())?
            } else {
                chars.len() - start
            };
            if start + len > chars.len() {
                return Err(invalid_arg("substr", "range exceeds the string"));
            }
            Ok(Value::Str(chars[start..start + len].iter().collect()))
        }),
        native("indexOf", &["text", "search", "from"], |_, args| {
            check_arg_len("indexOf", &args, 2, 3)?;
            let chars: Vec<char> = str_arg("indexOf", &args, 0)?.chars().collect();
            let search: Vec<char> = str_arg("indexOf", &args, 1)?.chars().collect();
            let from = if args.len() > 2 {
                index_arg("indexOf", &args, 2, chars.len())?
            } else {
                0
            };
            let found = (from..=chars.len().saturating_sub(search.len()))
                .find(|&i| chars[i..].starts_with(&search));
            Ok(Value::Number(position(found)))
        }),
        native("lastIndexOf", &["text", "search", "from"], |_, args| {
            check_arg_len("lastIndexOf", &args, 2, 3)?;
            let chars: Vec<char> = str_arg("lastIndexOf", &args, 0)?.chars().collect();
            let search: Vec<char> = str_arg("lastIndexOf", &args, 1)?.chars().collect();
            let from = if args.len() > 2 {
                index_arg("lastIndexOf", &args, 2, chars.len())?
            } else {
                chars.len()
            };
            let found = if search.len() > chars.len() {
                None
            } else {
                (0..=from.min(chars.len() - search.len()))
                    .rev()
                    .find(|&i| chars[i..].starts_with(&search))
            };
            Ok(Value::Number(position(found)))
        }),
        native("toLowerCase", &["text"], |_, args| {
            check_arg_len("toLowerCase", &args, 1, 1)?;
            Ok(Value::Str(str_arg("toLowerCase", &args, 0)?.to_lowercase()))
        }),
        native("toUpperCase", &["text"], |_, args| {
            check_arg_len("toUpperCase", &args, 1, 1)?;
            Ok(Value::Str(str_arg("toUpperCase", &args, 0)?.to_uppercase()))
        }),
        native("push", &["list", "value"], |_, mut args| {
            check_arg_len("push", &args, 2, 2)?;
            let value = args.pop().unwrap_or(Value::Nil);
            let list = list_arg("push", &args, 0)?;
            list.borrow_mut().push(value);
            Ok(Value::Nil)
        }),
        native("at", &["list", "index"], |_, args| {
            check_arg_len("at", &args, 2, 2)?;
            let list = list_arg("at", &args, 0)?;
            let len = list.borrow().len();
            let idx = index_arg("at", &args, 1, len)?;
            let item = list.borrow().get(idx).cloned();
            item.ok_or_else(|| invalid_arg("at", format!("index {idx} is out of range")))
        }),
    ]
}

fn math(name: &'static str, func: fn(f64) -> f64) -> NativeFunc {
    native(name, &["x"], move |_, args| {
        check_arg_len(name, &args, 1, 1)?;
        let x = num_arg(name, &args, 0)?;
        ops::number(func(x), || format!("'{name}({x})'"))
    })
}

fn num(n: f64) -> Number {
    Number::new(n).unwrap_or_else(|| Number::from(0))
}

fn position(found: Option<usize>) -> Number {
    found.map_or_else(|| num(-1.0), Number::from)
}

fn parse_number(name: &str, text: &str) -> Result<Number, RuntimeError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::new)
        .ok_or_else(|| invalid_arg(name, format!("'{text}' is not a number")))
}

fn invalid_arg(name: &str, detail: impl std::fmt::Display) -> RuntimeError {
    runtime_error(ErrorMsg::InvalidArgument, format!("in '{name}': {detail}"))
}

fn check_arg_len(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(runtime_error(
            ErrorMsg::ArityMismatch,
            format!("for '{name}': expected {expected}, found {}", args.len()),
        ));
    }
    Ok(())
}

fn num_arg(name: &str, args: &[Value], idx: usize) -> Result<f64, RuntimeError> {
    match args.get(idx) {
        Some(Value::Number(n)) => Ok(n.value()),
        other => Err(invalid_arg(name, format!("argument {} must be a number{}", idx + 1, found(other)))),
    }
}

fn int_arg(name: &str, args: &[Value], idx: usize) -> Result<i64, RuntimeError> {
    let arg = args.get(idx);
    match arg {
        Some(Value::Number(n)) => n.as_int(),
        _ => None,
    }
    .ok_or_else(|| invalid_arg(name, format!("argument {} must be an integer{}", idx + 1, found(arg))))
}

/// An integer argument in `0..=limit`.
fn index_arg(name: &str, args: &[Value], idx: usize, limit: usize) -> Result<usize, RuntimeError> {
    let n = int_arg(name, args, idx)?;
    usize::try_from(n)
        .ok()
        .filter(|&i| i <= limit)
        .ok_or_else(|| invalid_arg(name, format!("index {n} is out of range")))
}

fn str_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str, RuntimeError> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s),
        other => Err(invalid_arg(name, format!("argument {} must be a string{}", idx + 1, found(other)))),
    }
}

fn list_arg(
    name: &str,
    args: &[Value],
    idx: usize,
) -> Result<Rc<RefCell<Vec<Value>>>, RuntimeError> {
    match args.get(idx) {
        Some(Value::List(l)) => Ok(l.clone()),
        other => Err(invalid_arg(name, format!("argument {} must be a list{}", idx + 1, found(other)))),
    }
}

fn found(value: Option<&Value>) -> String {
    value.map(|v| format!(", found {}", v.repr())).unwrap_or_default()
}
