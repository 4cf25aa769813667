pub mod environment;
pub mod error;
pub mod interpret;
pub mod ops;
pub mod options;
pub mod resolve;
pub mod stdlib;
pub mod types;

use eleu_syntax::{ast::Source, lex::Lexer, parse::Parser};
use error::RuntimeError;
use interpret::Interpreter;
use log::trace;
use options::Options;

/// Outcome of running a program, or of a single VM step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EleuResult {
    Ok,
    CompileError,
    RuntimeError,
    /// The VM can execute further instructions.
    NextStep,
}

/// Scans and parses `source`. Every syntax error is written to the error
/// sink, and any error prevents execution.
pub fn parse(source: &str, file: &str, options: &Options) -> Option<Source> {
    trace!("Lexing {file}");
    let tokens = Lexer::new(source, file).lex_all();
    trace!("Parsing {tokens:#?}");
    let parser = Parser::new(&tokens).stop_at_first_error(options.only_first_error);
    match parser.parse_all() {
        Ok(root) => {
            trace!("Parsed {root:#?}");
            Some(root)
        }
        Err(errors) => {
            errors
                .iter()
                .for_each(|e| options.write_err(&e.to_string()));
            None
        }
    }
}

/// Writes `err` to the error sink, followed by the active calls
/// (innermost first) when stack dumps are enabled.
pub fn report_runtime_error(options: &Options, err: &RuntimeError, call_stack: &[String]) {
    options.write_err(&err.to_string());
    if options.dump_stack_on_error && !call_stack.is_empty() {
        options.write_err("Call stack:");
        for call in call_stack {
            options.write_err(&format!("    at {call}"));
        }
    }
}

/// Runs `source` with the tree-walking interpreter.
pub fn interpret(source: &str, file: &str, options: Options) -> EleuResult {
    let Some(root) = parse(source, file, &options) else {
        return EleuResult::CompileError;
    };
    Interpreter::new(options).run(&root)
}
