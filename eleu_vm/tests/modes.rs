use std::{cell::RefCell, rc::Rc};

use eleu_compile::{
    error::{runtime_error, ErrorMsg},
    interpret::Interpreter,
    options::{Capture, Options},
    parse,
    types::Value,
    EleuResult,
};
use eleu_syntax::span::Span;
use eleu_vm::vm::Vm;

#[derive(Clone, Copy, Debug)]
enum Mode {
    Interpreter,
    Vm,
}

#[derive(Debug)]
struct Run {
    result: EleuResult,
    out: String,
    err: String,
}

impl Run {
    /// First diagnostic without its location prefix.
    fn message(&self) -> &str {
        let first = self.err.lines().next().unwrap_or_default();
        first.split_once("): ").map_or(first, |(_, msg)| msg)
    }
}

fn run_in(mode: Mode, source: &str) -> Run {
    let (out, err) = (Capture::default(), Capture::default());
    let options = Options {
        out: out.sink(),
        err: err.sink(),
        ..Default::default()
    };
    let result = match parse(source, "test", &options) {
        None => EleuResult::CompileError,
        Some(root) => match mode {
            Mode::Interpreter => Interpreter::new(options).run(&root),
            Mode::Vm => Vm::new(options).run(&root),
        },
    };
    Run {
        result,
        out: out.contents(),
        err: err.contents(),
    }
}

/// Runs `source` with both executors and checks that they agree.
fn run(source: &str) -> Run {
    let int = run_in(Mode::Interpreter, source);
    let vm = run_in(Mode::Vm, source);
    assert_eq!(int.result, vm.result, "interpreter: {int:?}\nvm: {vm:?}");
    assert_eq!(int.out, vm.out);
    assert_eq!(int.message(), vm.message(), "interpreter: {int:?}\nvm: {vm:?}");
    vm
}

fn output(source: &str) -> String {
    let run = run(source);
    assert_eq!(run.result, EleuResult::Ok, "{}", run.err);
    run.out
}

fn runtime_error_message(source: &str) -> String {
    let run = run(source);
    assert_eq!(run.result, EleuResult::RuntimeError, "{}", run.out);
    run.message().to_string()
}

#[test]
fn failed_assertion() {
    assert_eq!(runtime_error_message("assert 1 == 2;"), "assertion failed");
    assert_eq!(
        runtime_error_message("assert 1 == 2 \"numbers\";"),
        "assertion failed ('numbers')"
    );
    assert_eq!(output("assert 1 == 1; print(\"ok\");"), "ok\n");
}

#[test]
fn division_by_zero() {
    assert_eq!(
        runtime_error_message("print(1 / 0);"),
        "result is not defined for '1 / 0'"
    );
}

#[test]
fn mixed_comparison() {
    assert_eq!(
        runtime_error_message("print(1 < \"a\");"),
        "different data types cannot be compared"
    );
}

#[test]
fn inheritance_and_overriding() {
    let source = r#"
        class Animal {
            init(name) { this.name = name; }
            speak() { return this.name + " makes a sound"; }
            describe() { return "I am " + this.name; }
        }
        class Dog < Animal {
            speak() { return super.speak() + ", woof"; }
        }
        var d = Dog("Rex");
        print(d.speak());
        print(d.describe());
        print(typeof(d));
        print(typeof(Dog));
    "#;
    assert_eq!(
        output(source),
        "Rex makes a sound, woof\nI am Rex\nclass Dog\nmetaclass Dog\n"
    );
}

#[test]
fn block_shadowing() {
    let source = r#"
        var a = "global";
        {
            var a = "block";
            print(a);
        }
        print(a);
    "#;
    assert_eq!(output(source), "block\nglobal\n");
}

#[test]
fn closures_share_environment() {
    let source = r#"
        fun counter() {
            var n = 0;
            fun inc() { n = n + 1; return n; }
            fun get() { return n; }
            return [inc, get];
        }
        var pair = counter();
        var inc = at(pair, 0);
        var get = at(pair, 1);
        inc();
        inc();
        print(get());
        print(at(counter(), 1)());
    "#;
    assert_eq!(output(source), "2\n0\n");
}

#[test]
fn continue_runs_increment() {
    let source = r#"
        var seen = 0;
        for (var i = 0; i < 5; i = i + 1) {
            if (i == 2) continue;
            seen = seen + 1;
        }
        print(seen);
    "#;
    assert_eq!(output(source), "4\n");
}

#[test]
fn list_literals_are_fresh() {
    let source = r#"
        fun make() { return [1, 2]; }
        print(make() == make());
        var a = make();
        print(a == a);
        push(a, 3);
        print(a);
        print(len(make()));
    "#;
    assert_eq!(output(source), "false\ntrue\n[1, 2, 3]\n2\n");
}

#[test]
fn unbounded_recursion() {
    let run = run("fun f(n) { return f(n + 1); }\nf(0);");
    assert_eq!(run.result, EleuResult::RuntimeError);
    assert_eq!(run.message(), "too many nested calls");
    assert!(run.err.contains("Call stack:"));
    assert!(run.err.contains("f() called at test(1,"));
}

#[test]
fn logical_operators_evaluate_both_sides() {
    let source = r#"
        fun yes() { print("called"); return true; }
        print(false and yes());
        print(true or yes());
        print(!false);
    "#;
    assert_eq!(output(source), "called\nfalse\ncalled\ntrue\ntrue\n");
    assert_eq!(
        runtime_error_message("if (1) print(1);"),
        "a boolean value is expected, found 1"
    );
    assert_eq!(
        runtime_error_message("print(true and 1);"),
        "a boolean value is expected, found 1"
    );
}

#[test]
fn loops() {
    let source = r#"
        var i = 0;
        var s = "";
        while (i < 3) {
            s = s + i;
            i = i + 1;
        }
        print(s);
        var n = 0;
        repeat (4) n = n + 2;
        print(n);
        repeat (0) print("never");
        repeat (10) { n = n + 1; if (n == 10) break; }
        print(n);
    "#;
    assert_eq!(output(source), "012\n8\n10\n");
    assert_eq!(
        runtime_error_message("repeat (-1) { print(1); }"),
        "repeat expects a natural number, found -1"
    );
    assert_eq!(
        runtime_error_message("repeat (1.5) { print(1); }"),
        "repeat expects a natural number, found 1.5"
    );
}

#[test]
fn expected_errors() {
    let source = r#"
        assert break 1 / 0;
        assert break 1 / 0 "result is not defined for '1 / 0'";
        fun fail() { return undefinedThing; }
        assert break fail() "undefined variable 'undefinedThing'";
        assert break 1 + 1;
        print("done");
    "#;
    assert_eq!(output(source), "done\n");
    assert_eq!(
        runtime_error_message("assert break 1 == 1;"),
        "a runtime error was expected"
    );
    assert_eq!(
        runtime_error_message("assert break 1 / 0 \"boom\";"),
        "a different runtime error was expected, found 'result is not defined for '1 / 0''"
    );
}

#[test]
fn class_reopening() {
    let source = r#"
        class A { one() { return 1; } }
        var a = A();
        class A { two() { return 2; } }
        print(a.one() + a.two());
    "#;
    assert_eq!(output(source), "3\n");
    let source = r#"
        class A {}
        class B {}
        class C < A {}
        class C < B {}
    "#;
    assert_eq!(
        runtime_error_message(source),
        "a reopened class must keep its superclass 'C'"
    );
}

#[test]
fn object_errors() {
    assert_eq!(
        runtime_error_message("var x = 1; print(x.y);"),
        "only instances have properties, found 1"
    );
    assert_eq!(
        runtime_error_message("class P {} print(P().missing);"),
        "undefined property 'missing'"
    );
    assert_eq!(
        runtime_error_message("class P { init(x) {} } P();"),
        "wrong number of arguments for 'P': expected 1, found 0"
    );
    assert_eq!(
        runtime_error_message("\"text\"();"),
        "can only call functions and classes, found \"text\""
    );
    assert_eq!(
        runtime_error_message("var v = 1; class C < v {}"),
        "superclass must be a class, found 1"
    );
}

#[test]
fn redeclaration() {
    assert_eq!(
        runtime_error_message("var a = 1; var a = 2;"),
        "variable is already declared in this scope 'a'"
    );
    let run = run("{ var a = 1; var a = 2; }");
    assert_eq!(run.result, EleuResult::CompileError);
    assert_eq!(
        runtime_error_message("var A = 1; class A {}"),
        "variable is already declared in this scope 'A'"
    );
    assert_eq!(output("var A = 1; { class A {} print(A); } print(A);"), "class A\n1\n");
}

#[test]
fn deep_nesting() {
    let depth = 5000;
    let unary = format!("print({}1);", "-".repeat(depth));
    assert_eq!(output(&unary), "1\n");
    let groups = format!("print({}2{});", "(".repeat(depth), ")".repeat(depth));
    assert_eq!(output(&groups), "2\n");
    let blocks = format!(
        "var x = 0; {} x = x + 1; {} print(x);",
        "{".repeat(1000),
        "}".repeat(1000)
    );
    assert_eq!(output(&blocks), "1\n");
    let branches = format!("{} print(3);", "if (true) ".repeat(1000));
    assert_eq!(output(&branches), "3\n");
}

#[test]
fn this_and_super_in_nested_closures() {
    let source = r#"
        class Base {
            greet() { return "base"; }
        }
        class Derived < Base {
            init(tag) { this.tag = tag; }
            greet() {
                fun outer() {
                    var mark = "!";
                    fun inner() {
                        { return super.greet() + "/" + this.tag + mark; }
                    }
                    return inner();
                }
                return outer();
            }
            later() {
                var suffix = "?";
                fun f() { return this.tag + suffix + super.greet(); }
                return f;
            }
        }
        var d = Derived("d");
        print(d.greet());
        var g = d.later();
        print(g());
        class Third < Derived {
            greet() { fun up() { return super.greet(); } return "3:" + up(); }
        }
        print(Third("t").greet());
    "#;
    assert_eq!(output(source), "base/d!\nd?base\n3:base/t!\n");
}

#[test]
fn static_errors_stop_both_modes() {
    for source in ["return 1;", "print(this);", "break;", "fun f() { var a = a; }"] {
        let run = run(source);
        assert_eq!(run.result, EleuResult::CompileError, "{source}");
        assert_eq!(run.out, "");
    }
    let run = run("print(1)\nprint(2;");
    assert_eq!(run.result, EleuResult::CompileError);
    assert!(run.err.lines().count() >= 1);
}

#[test]
fn natives() {
    let source = r#"
        print(sqrt(16));
        print(pow(2, 8));
        print(toFixed(PI, 3));
        print(parseInt("12") + 1);
        print(toUpperCase(substr("eleu script", 0, 4)));
        print(indexOf("banana", "an") + lastIndexOf("banana", "an"));
        print(charAt("abc", 2));
        print(typeof(nil) + " " + typeof(print) + " " + typeof([]));
        print(toString(0.1 + 0.2));
        var r = random();
        print(r >= 0 and r < 1);
    "#;
    assert_eq!(
        output(source),
        "4\n256\n3.142\n13\nELEU\n4\nc\nundefined function list\n0.30000000000000004\ntrue\n"
    );
}

#[test]
fn diagnostics_carry_parseable_locations() {
    let run = run("var a = 1;\nprint(a + nope);");
    assert_eq!(run.result, EleuResult::RuntimeError);
    let span = Span::parse_hint(run.err.lines().next().unwrap_or_default()).unwrap();
    assert_eq!(span.line_start, 2);
    assert_eq!(run.message(), "undefined variable 'nope'");
}

#[test]
fn host_natives_and_state_changes() {
    for mode in [Mode::Interpreter, Mode::Vm] {
        let (out, err) = (Capture::default(), Capture::default());
        let changes = Rc::new(RefCell::new(vec![]));
        let seen = changes.clone();
        let options = Options {
            out: out.sink(),
            err: err.sink(),
            on_state_change: Some(Rc::new(move |what: &str| {
                seen.borrow_mut().push(what.to_string())
            })),
            ..Default::default()
        };
        let root = parse("move(3); print(move(-1));", "test", &options).unwrap();
        let body = |host: &mut dyn eleu_compile::types::Host, args: Vec<Value>| match &args[0] {
            Value::Number(n) if n.value() >= 0.0 => {
                host.notify(&format!("moved {n}"));
                Ok(Value::Boolean(true))
            }
            other => Err(runtime_error(ErrorMsg::InvalidArgument, other.repr())),
        };
        let result = match mode {
            Mode::Interpreter => {
                let mut interpreter = Interpreter::new(options);
                interpreter.define_native("move", &["steps"], body);
                interpreter.run(&root)
            }
            Mode::Vm => {
                let mut vm = Vm::new(options);
                vm.define_native("move", &["steps"], body);
                vm.run(&root)
            }
        };
        assert_eq!(result, EleuResult::RuntimeError, "{mode:?}");
        assert_eq!(*changes.borrow(), vec!["moved 3".to_string()]);
        assert!(err.contents().contains("invalid argument -1"), "{mode:?}");
    }
}

#[test]
fn call_depth_is_configurable() {
    let source = "fun f(n) { if (n == 0) return 0; return f(n - 1); }\nf(10);";
    for mode in [Mode::Interpreter, Mode::Vm] {
        let (out, err) = (Capture::default(), Capture::default());
        let options = Options {
            out: out.sink(),
            err: err.sink(),
            max_call_depth: 5,
            dump_stack_on_error: false,
            ..Default::default()
        };
        let root = parse(source, "test", &options).unwrap();
        let result = match mode {
            Mode::Interpreter => Interpreter::new(options).run(&root),
            Mode::Vm => Vm::new(options).run(&root),
        };
        assert_eq!(result, EleuResult::RuntimeError, "{mode:?}");
        let err = err.contents();
        assert!(err.contains("too many nested calls"), "{mode:?}: {err}");
        assert!(!err.contains("Call stack:"), "{mode:?}: {err}");
    }
}

#[test]
fn cancellation_stops_both_modes() {
    for mode in [Mode::Interpreter, Mode::Vm] {
        let err = Capture::default();
        let options = Options {
            err: err.sink(),
            cancel: Some(Rc::new(|| true)),
            ..Default::default()
        };
        let root = parse("while (true) {}", "test", &options).unwrap();
        let result = match mode {
            Mode::Interpreter => Interpreter::new(options).run(&root),
            Mode::Vm => Vm::new(options).run(&root),
        };
        assert_eq!(result, EleuResult::RuntimeError, "{mode:?}");
        assert!(err.contents().contains("execution cancelled"), "{mode:?}");
    }
}
