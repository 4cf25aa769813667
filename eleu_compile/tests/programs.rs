use eleu_compile::{
    interpret,
    interpret::Interpreter,
    options::{Capture, Options},
    parse, EleuResult,
};

fn run_with(source: &str, mut options: Options) -> (EleuResult, String, String) {
    let (out, err) = (Capture::default(), Capture::default());
    options.out = out.sink();
    options.err = err.sink();
    let result = interpret(source, "prog.eleu", options);
    (result, out.contents(), err.contents())
}

fn run(source: &str) -> (EleuResult, String, String) {
    run_with(source, Options::default())
}

#[test]
fn game_of_counting() {
    let source = r#"
        class Counter {
            init(start) { this.value = start; this.history = []; }
            step(by) {
                push(this.history, this.value);
                this.value = this.value + by;
                return this;
            }
        }
        var c = Counter(1);
        c.step(2).step(3);
        print(c.value);
        print(c.history);
        print(len(c.history));
    "#;
    let (result, out, err) = run(source);
    assert_eq!(result, EleuResult::Ok, "{err}");
    assert_eq!(out, "6\n[1, 3]\n2\n");
}

#[test]
fn string_building() {
    let source = r#"
        fun pad(text, width) {
            while (len(text) < width) text = " " + text;
            return text;
        }
        var lines = "";
        for (var i = 1; i <= 3; i = i + 1) {
            lines = lines + pad(toString(i * i), 3);
        }
        print(lines);
        print("a" < "b");
        print("ab" == "a" + "b");
    "#;
    let (result, out, err) = run(source);
    assert_eq!(result, EleuResult::Ok, "{err}");
    assert_eq!(out, "  1  4  9\ntrue\ntrue\n");
}

#[test]
fn call_stack_lists_innermost_first() {
    let source = "fun inner() {\n  return 1 / 0;\n}\nfun outer() {\n  return inner();\n}\nouter();";
    let (result, _, err) = run(source);
    assert_eq!(result, EleuResult::RuntimeError);
    let lines = err.lines().collect::<Vec<&str>>();
    assert!(lines[0].starts_with("prog.eleu(2,"), "{err}");
    assert!(lines[0].ends_with("result is not defined for '1 / 0'"), "{err}");
    assert_eq!(lines[1], "Call stack:");
    assert!(lines[2].starts_with("    at inner() called at prog.eleu(5,"), "{err}");
    assert!(lines[3].starts_with("    at outer() called at prog.eleu(7,"), "{err}");
    assert_eq!(lines.len(), 4);
}

#[test]
fn syntax_errors_are_all_reported() {
    let source = "var = 1;\nprint(;\nvar ok = 2;";
    let (result, out, err) = run(source);
    assert_eq!(result, EleuResult::CompileError);
    assert_eq!(out, "");
    assert_eq!(err.lines().count(), 2, "{err}");

    let options = Options {
        only_first_error: true,
        ..Default::default()
    };
    let (result, _, err) = run_with(source, options);
    assert_eq!(result, EleuResult::CompileError);
    assert_eq!(err.lines().count(), 1, "{err}");
}

#[test]
fn counts_statements() {
    let options = Options {
        out: Capture::default().sink(),
        ..Default::default()
    };
    let root = parse("var a = 0; repeat (3) a = a + 1;", "prog.eleu", &options).unwrap();
    let mut interpreter = Interpreter::new(options);
    assert_eq!(interpreter.run(&root), EleuResult::Ok);
    assert_eq!(interpreter.instruction_count(), 5);
}

#[test]
fn numbers_stay_finite() {
    let (result, _, err) = run("print(pow(10, 400));");
    assert_eq!(result, EleuResult::RuntimeError);
    assert!(err.contains("result is too large for 'pow(10, 400)'"), "{err}");
    let (result, _, err) = run("var big = pow(10, 300);\nprint(big * big);");
    assert_eq!(result, EleuResult::RuntimeError);
    assert!(err.contains("result is too large for"), "{err}");
}
