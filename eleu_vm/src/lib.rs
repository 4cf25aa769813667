pub mod chunk;
pub mod codegen;
pub mod error;
pub mod vm;

use eleu_compile::{options::Options, parse, EleuResult};
use vm::Vm;

/// Runs `source` with the bytecode VM.
pub fn run(source: &str, file: &str, options: Options) -> EleuResult {
    let Some(root) = parse(source, file, &options) else {
        return EleuResult::CompileError;
    };
    Vm::new(options).run(&root)
}
